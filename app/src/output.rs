use comfy_table::presets::UTF8_FULL;
use comfy_table::{Cell, Color, Table};
use nextsql_core::profiles::ConnectionProfile;
use nextsql_core::result_normalizer::{DisplayValue, NormalizedResultSet};

use crate::cli::OutputFormat;

pub fn render_result(
    result: &NormalizedResultSet,
    format: OutputFormat,
) -> Result<String, serde_json::Error> {
    match format {
        OutputFormat::Table => Ok(render_table(result)),
        OutputFormat::Json => serde_json::to_string_pretty(result),
    }
}

fn render_table(result: &NormalizedResultSet) -> String {
    if result.columns().is_empty() {
        return match result.last_insert_id() {
            Some(id) if id > 0 => format!(
                "Query OK, {} row(s) affected, last insert id {id}",
                result.affected_rows()
            ),
            _ => format!("Query OK, {} row(s) affected", result.affected_rows()),
        };
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(
        result
            .columns()
            .iter()
            .map(|column| Cell::new(column).fg(Color::Green)),
    );
    for row in result.rows() {
        table.add_row(row.values().iter().map(value_cell));
    }

    format!("{table}\n{} row(s)", result.len())
}

fn value_cell(value: &DisplayValue) -> Cell {
    match value {
        DisplayValue::Null => Cell::new("NULL").fg(Color::DarkGrey),
        other => Cell::new(other.as_text()),
    }
}

pub fn render_names(names: &[String], format: OutputFormat) -> Result<String, serde_json::Error> {
    match format {
        OutputFormat::Table => Ok(names.join("\n")),
        OutputFormat::Json => serde_json::to_string_pretty(names),
    }
}

pub fn render_profiles(profiles: &[ConnectionProfile]) -> String {
    if profiles.is_empty() {
        return "No saved profiles".to_string();
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(["id", "name", "endpoint", "database", "selected databases"]);
    for profile in profiles {
        table.add_row([
            profile.id.clone(),
            profile.name.clone(),
            profile.endpoint(),
            profile.database.clone().unwrap_or_default(),
            if profile.selected_databases.is_empty() {
                "(all)".to_string()
            } else {
                profile.selected_databases.join(", ")
            },
        ]);
    }
    table.to_string()
}

#[cfg(test)]
mod tests {
    use nextsql_core::profiles::ConnectionProfile;
    use nextsql_core::result_normalizer::{normalize, RawResultSet, RawValue};

    use super::{render_names, render_profiles, render_result};
    use crate::cli::OutputFormat;

    fn sample_result() -> RawResultSet {
        RawResultSet::new(
            vec!["id".to_string(), "note".to_string()],
            vec![vec![
                RawValue::Text("123456789012345678".to_string()),
                RawValue::Null,
            ]],
        )
    }

    #[test]
    fn table_output_shows_values_and_row_count() {
        let rendered = render_result(&normalize(sample_result()), OutputFormat::Table)
            .expect("table rendering should succeed");
        assert!(rendered.contains("123456789012345678"));
        assert!(rendered.contains("NULL"));
        assert!(rendered.ends_with("1 row(s)"));
    }

    #[test]
    fn json_output_keeps_value_tags() {
        let rendered = render_result(&normalize(sample_result()), OutputFormat::Json)
            .expect("json rendering should succeed");
        let parsed: serde_json::Value =
            serde_json::from_str(&rendered).expect("output should be valid json");
        assert_eq!(parsed["rows"][0][0]["kind"], "large_integer");
        assert_eq!(parsed["rows"][0][0]["value"], "123456789012345678");
        assert_eq!(parsed["rows"][0][1]["kind"], "null");
    }

    #[test]
    fn statements_without_columns_report_affected_rows() {
        let mut raw = RawResultSet::default();
        raw.affected_rows = 3;
        let rendered = render_result(&normalize(raw), OutputFormat::Table)
            .expect("rendering should succeed");
        assert_eq!(rendered, "Query OK, 3 row(s) affected");
    }

    #[test]
    fn names_render_one_per_line() {
        let names = vec!["crm".to_string(), "shop".to_string()];
        assert_eq!(
            render_names(&names, OutputFormat::Table).expect("render"),
            "crm\nshop"
        );
    }

    #[test]
    fn profiles_show_selected_databases() {
        let mut profile = ConnectionProfile::with_id("p1", "local", "127.0.0.1", "root");
        assert!(render_profiles(&[profile.clone()]).contains("(all)"));

        profile.selected_databases = vec!["shop".to_string()];
        let rendered = render_profiles(&[profile]);
        assert!(rendered.contains("root@127.0.0.1:3306"));
        assert!(rendered.contains("shop"));
        assert_eq!(render_profiles(&[]), "No saved profiles");
    }
}
