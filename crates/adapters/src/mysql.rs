use std::io::ErrorKind;

use async_trait::async_trait;
use chrono::NaiveDate;
use mysql_async::consts::ColumnType;
use mysql_async::prelude::{Protocol, Queryable};
use mysql_async::{Conn, DriverError, IoError, OptsBuilder, QueryResult, Row, Value};
use nextsql_core::profiles::{ConnectionProfile, PasswordSource};
use nextsql_core::query_dispatcher::{QueryOptions, StatementKind};
use nextsql_core::result_normalizer::{RawResultSet, RawValue};
use nextsql_core::session::{BackendError, BackendErrorCode, SessionBackend};
use tracing::{debug, warn};

pub const PASSWORD_ENV_VAR: &str = "NEXTSQL_DB_PASSWORD";
const KEYRING_SERVICE: &str = "nextsql";

#[derive(Debug, Clone, Default)]
pub struct MysqlSessionBackend;

#[async_trait]
impl SessionBackend for MysqlSessionBackend {
    type Connection = Conn;

    async fn connect(&self, profile: &ConnectionProfile) -> Result<Self::Connection, BackendError> {
        debug!(
            profile_id = %profile.id,
            endpoint = %profile.endpoint(),
            "opening mysql connection"
        );
        Conn::new(opts_from_profile(profile))
            .await
            .map_err(to_backend_error)
    }

    async fn execute(
        &self,
        connection: &mut Self::Connection,
        sql: &str,
        kind: StatementKind,
        options: &QueryOptions,
    ) -> Result<RawResultSet, BackendError> {
        let collected = match kind {
            StatementKind::Direct => {
                let result = connection.query_iter(sql).await.map_err(to_backend_error)?;
                collect_result(result, options).await
            }
            StatementKind::Prepared => {
                let result = connection
                    .exec_iter(sql, ())
                    .await
                    .map_err(to_backend_error)?;
                collect_result(result, options).await
            }
        };
        collected.map_err(to_backend_error)
    }

    async fn keep_alive(
        &self,
        connection: &mut Self::Connection,
        statement: &str,
    ) -> Result<(), BackendError> {
        connection
            .query_drop(statement)
            .await
            .map_err(to_backend_error)
    }

    async fn close(&self, connection: Self::Connection) -> Result<(), BackendError> {
        connection.disconnect().await.map_err(to_backend_error)
    }
}

/// Reads the first result set and discards any that follow.
async fn collect_result<P: Protocol>(
    mut result: QueryResult<'_, 'static, P>,
    options: &QueryOptions,
) -> Result<RawResultSet, mysql_async::Error> {
    let column_meta = result
        .columns()
        .map(|columns| {
            columns
                .iter()
                .map(|column| (column.name_str().into_owned(), column.column_type()))
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();

    let rows = if column_meta.is_empty() {
        Vec::new()
    } else {
        result.collect::<Row>().await?
    };
    let affected_rows = result.affected_rows();
    let last_insert_id = result.last_insert_id();
    result.drop_result().await?;

    let types = column_meta
        .iter()
        .map(|(_, column_type)| *column_type)
        .collect::<Vec<_>>();
    let rows = rows
        .into_iter()
        .map(|row| {
            row.unwrap()
                .into_iter()
                .zip(types.iter())
                .map(|(value, column_type)| to_raw_value(value, *column_type, options))
                .collect()
        })
        .collect();

    let mut raw = RawResultSet::new(
        column_meta.into_iter().map(|(name, _)| name).collect(),
        rows,
    );
    raw.affected_rows = affected_rows;
    raw.last_insert_id = last_insert_id;
    Ok(raw)
}

fn opts_from_profile(profile: &ConnectionProfile) -> OptsBuilder {
    let mut builder = OptsBuilder::default()
        .ip_or_hostname(profile.host.clone())
        .tcp_port(profile.port)
        .user(Some(profile.user.clone()));

    if let Some(password) = resolve_password(profile) {
        builder = builder.pass(Some(password));
    }

    if let Some(database) = &profile.database {
        builder = builder.db_name(Some(database.clone()));
    }

    builder
}

fn resolve_password(profile: &ConnectionProfile) -> Option<String> {
    let env_password = || std::env::var(PASSWORD_ENV_VAR).ok().filter(|pw| !pw.is_empty());

    match profile.password_source {
        PasswordSource::Inline => profile.password.clone().filter(|pw| !pw.is_empty()),
        PasswordSource::EnvVar => env_password(),
        PasswordSource::Keyring => {
            if let Some(password) = load_keyring_password(profile) {
                return Some(password);
            }

            let password = env_password()?;
            store_keyring_password(profile, &password);
            Some(password)
        }
    }
}

#[cfg(any(target_os = "linux", target_os = "macos", target_os = "windows"))]
fn load_keyring_password(profile: &ConnectionProfile) -> Option<String> {
    let entry = keyring::Entry::new(KEYRING_SERVICE, &profile.id).ok()?;
    entry.get_password().ok().filter(|pw| !pw.is_empty())
}

#[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
fn load_keyring_password(_profile: &ConnectionProfile) -> Option<String> {
    None
}

#[cfg(any(target_os = "linux", target_os = "macos", target_os = "windows"))]
fn store_keyring_password(profile: &ConnectionProfile, password: &str) {
    let stored = keyring::Entry::new(KEYRING_SERVICE, &profile.id)
        .and_then(|entry| entry.set_password(password));
    if let Err(error) = stored {
        warn!(profile_id = %profile.id, %error, "could not store password in keyring");
    }
}

#[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
fn store_keyring_password(_profile: &ConnectionProfile, _password: &str) {}

fn is_integer_column(column_type: ColumnType) -> bool {
    matches!(
        column_type,
        ColumnType::MYSQL_TYPE_TINY
            | ColumnType::MYSQL_TYPE_SHORT
            | ColumnType::MYSQL_TYPE_INT24
            | ColumnType::MYSQL_TYPE_LONG
            | ColumnType::MYSQL_TYPE_LONGLONG
            | ColumnType::MYSQL_TYPE_YEAR
    )
}

fn to_raw_value(value: Value, column_type: ColumnType, options: &QueryOptions) -> RawValue {
    let bigint_as_text =
        options.large_integer_as_text && column_type == ColumnType::MYSQL_TYPE_LONGLONG;

    match value {
        Value::NULL => RawValue::Null,
        Value::Int(value) if bigint_as_text => RawValue::Text(value.to_string()),
        Value::Int(value) => RawValue::Integer(value),
        Value::UInt(value) if bigint_as_text => RawValue::Text(value.to_string()),
        Value::UInt(value) => RawValue::UnsignedInteger(value),
        Value::Float(value) => RawValue::Float(f64::from(value)),
        Value::Double(value) => RawValue::Float(value),
        Value::Bytes(bytes) => bytes_to_raw_value(bytes, column_type, bigint_as_text),
        Value::Date(year, month, day, hour, minute, second, micros) => {
            let date = NaiveDate::from_ymd_opt(i32::from(year), u32::from(month), u32::from(day));
            let timestamp = date.and_then(|date| {
                date.and_hms_micro_opt(
                    u32::from(hour),
                    u32::from(minute),
                    u32::from(second),
                    micros,
                )
            });
            match (date, timestamp) {
                (Some(date), _) if column_type == ColumnType::MYSQL_TYPE_DATE => {
                    RawValue::Date(date)
                }
                (_, Some(timestamp)) => RawValue::DateTime(timestamp),
                // Zero dates such as 0000-00-00 have no calendar value.
                _ => RawValue::Text(format_date_parts(year, month, day, hour, minute, second)),
            }
        }
        Value::Time(is_negative, days, hours, minutes, seconds, micros) => {
            let sign = if is_negative { "-" } else { "" };
            let total_hours = days * 24 + u32::from(hours);
            RawValue::Text(format!(
                "{sign}{total_hours:02}:{minutes:02}:{seconds:02}.{micros:06}"
            ))
        }
    }
}

fn bytes_to_raw_value(bytes: Vec<u8>, column_type: ColumnType, bigint_as_text: bool) -> RawValue {
    let text = match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(error) => return RawValue::Bytes(error.into_bytes()),
    };

    if is_integer_column(column_type) && !bigint_as_text {
        if let Ok(value) = text.parse::<i64>() {
            return RawValue::Integer(value);
        }
        if let Ok(value) = text.parse::<u64>() {
            return RawValue::UnsignedInteger(value);
        }
    }
    RawValue::Text(text)
}

fn format_date_parts(year: u16, month: u8, day: u8, hour: u8, minute: u8, second: u8) -> String {
    format!("{year:04}-{month:02}-{day:02} {hour:02}:{minute:02}:{second:02}")
}

fn to_backend_error(error: mysql_async::Error) -> BackendError {
    let code = match &error {
        mysql_async::Error::Driver(DriverError::ConnectionClosed) => {
            Some(BackendErrorCode::ProtocolConnectionLost)
        }
        mysql_async::Error::Io(IoError::Io(io_error)) => io_error_code(io_error.kind()),
        mysql_async::Error::Server(server_error) => {
            Some(BackendErrorCode::Server(server_error.code))
        }
        _ => None,
    };

    let backend_error = BackendError::new(error.to_string());
    match code {
        Some(code) => backend_error.with_code(code),
        None => backend_error,
    }
}

fn io_error_code(kind: ErrorKind) -> Option<BackendErrorCode> {
    match kind {
        ErrorKind::ConnectionReset => Some(BackendErrorCode::ConnectionReset),
        ErrorKind::BrokenPipe => Some(BackendErrorCode::BrokenPipe),
        ErrorKind::ConnectionAborted | ErrorKind::UnexpectedEof | ErrorKind::NotConnected => {
            Some(BackendErrorCode::ProtocolConnectionLost)
        }
        ErrorKind::TimedOut => Some(BackendErrorCode::TimedOut),
        _ => None,
    }
}
