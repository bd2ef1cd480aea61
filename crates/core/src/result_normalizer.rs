use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use once_cell::sync::Lazy;
use regex::{Regex, RegexSet};
use serde::Serialize;

/// Largest integer a double can hold without losing precision.
pub const MAX_SAFE_INTEGER: u64 = (1 << 53) - 1;

static LARGE_INTEGER_TEXT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[0-9]{15,}$").expect("large integer pattern is valid"));

static TEMPORAL_TEXT: Lazy<RegexSet> = Lazy::new(|| {
    RegexSet::new([
        r"^[0-9]{4}-[0-9]{2}-[0-9]{2}$",
        r"^[0-9]{4}-[0-9]{2}-[0-9]{2} [0-9]{2}:[0-9]{2}:[0-9]{2}$",
        r"^[0-9]{4}-[0-9]{2}-[0-9]{2}T[0-9]{2}:[0-9]{2}:[0-9]{2}",
        r"^[0-9]{4}-[0-9]{2}-[0-9]{2} [0-9]{2}:[0-9]{2}:[0-9]{2}\.[0-9]+$",
    ])
    .expect("temporal patterns are valid")
});

/// A value as the driver handed it over, before any display decisions.
#[derive(Debug, Clone, PartialEq)]
pub enum RawValue {
    Null,
    Integer(i64),
    UnsignedInteger(u64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct RawResultSet {
    pub columns: Vec<String>,
    /// Each row holds one value per entry of `columns`, in the same order.
    pub rows: Vec<Vec<RawValue>>,
    pub affected_rows: u64,
    pub last_insert_id: Option<u64>,
}

impl RawResultSet {
    #[must_use]
    pub fn new(columns: Vec<String>, rows: Vec<Vec<RawValue>>) -> Self {
        Self {
            columns,
            rows,
            affected_rows: 0,
            last_insert_id: None,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    #[must_use]
    pub fn value(&self, row: usize, column: &str) -> Option<&RawValue> {
        let index = self.columns.iter().position(|name| name == column)?;
        self.rows.get(row).and_then(|values| values.get(index))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum DisplayValue {
    Null,
    PlainText(String),
    /// Decimal digits kept verbatim, never reparsed into a machine integer.
    LargeInteger(String),
    /// `YYYY-MM-DD HH:MM:SS.ffff`
    Temporal(String),
}

impl DisplayValue {
    #[must_use]
    pub fn as_text(&self) -> &str {
        match self {
            Self::Null => "NULL",
            Self::PlainText(text) | Self::LargeInteger(text) | Self::Temporal(text) => text,
        }
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

impl fmt::Display for DisplayValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_text())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct NormalizedResultSet {
    columns: Vec<String>,
    rows: Vec<Vec<DisplayValue>>,
    affected_rows: u64,
    last_insert_id: Option<u64>,
}

impl NormalizedResultSet {
    #[must_use]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    #[must_use]
    pub fn affected_rows(&self) -> u64 {
        self.affected_rows
    }

    #[must_use]
    pub fn last_insert_id(&self) -> Option<u64> {
        self.last_insert_id
    }

    #[must_use]
    pub fn row(&self, index: usize) -> Option<DisplayRow<'_>> {
        self.rows.get(index).map(|values| DisplayRow {
            columns: &self.columns,
            values,
        })
    }

    pub fn rows(&self) -> impl Iterator<Item = DisplayRow<'_>> {
        self.rows.iter().map(|values| DisplayRow {
            columns: &self.columns,
            values,
        })
    }

    /// Text of every non-null value in one column, in row order.
    #[must_use]
    pub fn column_texts(&self, index: usize) -> Vec<String> {
        self.rows
            .iter()
            .filter_map(|values| values.get(index))
            .filter(|value| !value.is_null())
            .map(|value| value.as_text().to_string())
            .collect()
    }
}

/// One normalized row viewed as an ordered column -> value mapping.
#[derive(Debug, Clone, Copy)]
pub struct DisplayRow<'a> {
    columns: &'a [String],
    values: &'a [DisplayValue],
}

impl<'a> DisplayRow<'a> {
    #[must_use]
    pub fn get(&self, column: &str) -> Option<&'a DisplayValue> {
        let index = self.columns.iter().position(|name| name == column)?;
        self.values.get(index)
    }

    #[must_use]
    pub fn values(&self) -> &'a [DisplayValue] {
        self.values
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'a str, &'a DisplayValue)> {
        self.columns
            .iter()
            .map(String::as_str)
            .zip(self.values.iter())
    }
}

#[must_use]
pub fn normalize(raw: RawResultSet) -> NormalizedResultSet {
    let rows = raw
        .rows
        .iter()
        .map(|row| row.iter().map(normalize_value).collect())
        .collect();

    NormalizedResultSet {
        columns: raw.columns,
        rows,
        affected_rows: raw.affected_rows,
        last_insert_id: raw.last_insert_id,
    }
}

#[must_use]
pub fn normalize_value(value: &RawValue) -> DisplayValue {
    match value {
        RawValue::Null => DisplayValue::Null,
        RawValue::Integer(number) if number.unsigned_abs() > MAX_SAFE_INTEGER => {
            DisplayValue::LargeInteger(number.to_string())
        }
        RawValue::Integer(number) => DisplayValue::PlainText(number.to_string()),
        RawValue::UnsignedInteger(number) if *number > MAX_SAFE_INTEGER => {
            DisplayValue::LargeInteger(number.to_string())
        }
        RawValue::UnsignedInteger(number) => DisplayValue::PlainText(number.to_string()),
        RawValue::Float(number) => DisplayValue::PlainText(number.to_string()),
        RawValue::Text(text) => normalize_text(text),
        RawValue::Bytes(bytes) => {
            DisplayValue::PlainText(String::from_utf8_lossy(bytes).into_owned())
        }
        RawValue::Date(date) => {
            DisplayValue::Temporal(format_timestamp(&date.and_time(NaiveTime::MIN)))
        }
        RawValue::DateTime(timestamp) => DisplayValue::Temporal(format_timestamp(timestamp)),
    }
}

fn normalize_text(text: &str) -> DisplayValue {
    if LARGE_INTEGER_TEXT.is_match(text) {
        return DisplayValue::LargeInteger(text.to_string());
    }

    if let Some(timestamp) = parse_temporal_text(text) {
        return DisplayValue::Temporal(format_timestamp(&timestamp));
    }

    DisplayValue::PlainText(text.to_string())
}

/// Recognizes date/time shaped text and checks it names a real instant.
#[must_use]
pub fn parse_temporal_text(text: &str) -> Option<NaiveDateTime> {
    let text = strip_one_quote_pair(text);
    if !TEMPORAL_TEXT.is_match(text) {
        return None;
    }

    if text.len() == 10 {
        return NaiveDate::parse_from_str(text, "%Y-%m-%d")
            .ok()
            .map(|date| date.and_time(NaiveTime::MIN));
    }

    if text.as_bytes().get(10) == Some(&b'T') {
        // Offsets are dropped: the wall-clock time as written is shown.
        return DateTime::parse_from_rfc3339(text)
            .map(|timestamp| timestamp.naive_local())
            .or_else(|_| NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f"))
            .ok();
    }

    NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f").ok()
}

fn strip_one_quote_pair(text: &str) -> &str {
    let text = text.strip_prefix(['\'', '"']).unwrap_or(text);
    text.strip_suffix(['\'', '"']).unwrap_or(text)
}

#[must_use]
pub fn format_timestamp(timestamp: &NaiveDateTime) -> String {
    let ten_thousandths = (timestamp.nanosecond() % 1_000_000_000) / 100_000;
    format!(
        "{}.{ten_thousandths:04}",
        timestamp.format("%Y-%m-%d %H:%M:%S")
    )
}
