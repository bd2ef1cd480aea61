use std::env;
use std::time::Duration;

use thiserror::Error;

pub const DEFAULT_KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_KEEP_ALIVE_STATEMENT: &str = "SELECT 1";
/// Longest accepted probe interval: one day.
pub const MAX_KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

const KEEP_ALIVE_SECS_VAR: &str = "NEXTSQL_KEEPALIVE_SECS";
const KEEP_ALIVE_STATEMENT_VAR: &str = "NEXTSQL_KEEPALIVE_STATEMENT";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{variable} must be a whole number of seconds, got `{value}`")]
    InvalidSeconds { variable: &'static str, value: String },
    #[error("{variable} must be at most {max} seconds, got {value}")]
    SecondsOutOfRange {
        variable: &'static str,
        value: u64,
        max: u64,
    },
}

/// Runtime tuning for live sessions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// `None` disables the keep-alive probe.
    pub keep_alive_interval: Option<Duration>,
    pub keep_alive_statement: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            keep_alive_interval: Some(DEFAULT_KEEP_ALIVE_INTERVAL),
            keep_alive_statement: DEFAULT_KEEP_ALIVE_STATEMENT.to_string(),
        }
    }
}

impl SessionConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// `NEXTSQL_KEEPALIVE_SECS=0` turns the probe off.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(raw) = lookup(KEEP_ALIVE_SECS_VAR) {
            let seconds = raw
                .trim()
                .parse::<u64>()
                .map_err(|_| ConfigError::InvalidSeconds {
                    variable: KEEP_ALIVE_SECS_VAR,
                    value: raw.clone(),
                })?;
            let max = MAX_KEEP_ALIVE_INTERVAL.as_secs();
            if seconds > max {
                return Err(ConfigError::SecondsOutOfRange {
                    variable: KEEP_ALIVE_SECS_VAR,
                    value: seconds,
                    max,
                });
            }
            config.keep_alive_interval = (seconds > 0).then(|| Duration::from_secs(seconds));
        }

        if let Some(statement) = lookup(KEEP_ALIVE_STATEMENT_VAR) {
            let statement = statement.trim();
            if !statement.is_empty() {
                config.keep_alive_statement = statement.to_string();
            }
        }

        Ok(config)
    }

    /// The interval the probe actually runs at. A zero interval disables the
    /// probe and anything longer than a day is clamped.
    #[must_use]
    pub fn effective_keep_alive_interval(&self) -> Option<Duration> {
        self.keep_alive_interval
            .filter(|interval| !interval.is_zero())
            .map(|interval| interval.min(MAX_KEEP_ALIVE_INTERVAL))
    }
}
