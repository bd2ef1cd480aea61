use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use crate::error::SessionError;
use crate::result_normalizer::RawResultSet;
use crate::session::{SessionBackend, SessionHandle};

// Administrative statements the prepared-statement path cannot run.
static DIRECT_STATEMENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(SHOW|USE|DESCRIBE|DESC|EXPLAIN)\b")
        .expect("direct statement pattern is valid")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    /// Sent through the prepared path, currently always with zero parameters.
    Prepared,
    /// Sent as plain text without parameter binding.
    Direct,
}

/// Picks the execution path from the statement's leading keyword.
///
/// Purely a prefix check: a leading comment or hint in front of `SHOW` makes
/// the statement `Prepared`.
#[must_use]
pub fn classify(sql: &str) -> StatementKind {
    if DIRECT_STATEMENT.is_match(sql.trim_start()) {
        StatementKind::Direct
    } else {
        StatementKind::Prepared
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryOptions {
    /// Return 64-bit integers as decimal text instead of native numbers.
    pub large_integer_as_text: bool,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            large_integer_as_text: true,
        }
    }
}

pub async fn execute<B: SessionBackend>(
    backend: &B,
    session: &SessionHandle<B::Connection>,
    sql: &str,
    options: &QueryOptions,
) -> Result<RawResultSet, SessionError> {
    let kind = classify(sql);
    debug!(
        profile_id = session.profile_id(),
        generation = session.generation(),
        ?kind,
        "dispatching statement"
    );

    session
        .execute(backend, sql, kind, options)
        .await
        .map_err(|source| SessionError::Execution { source })
}

#[cfg(test)]
mod tests {
    use super::{classify, execute, QueryOptions, StatementKind};
    use crate::error::SessionError;
    use crate::session::{BackendError, Session};
    use crate::testing::{FakeBackend, FakeConnection};

    #[test]
    fn administrative_statements_are_direct() {
        for sql in [
            "SHOW DATABASES",
            "  use mydb",
            "desc t",
            "DESCRIBE t",
            "EXPLAIN SELECT 1",
            "\n\tShow Tables",
            "USE `shop`",
        ] {
            assert_eq!(classify(sql), StatementKind::Direct, "sql {sql:?}");
        }
    }

    #[test]
    fn everything_else_is_prepared() {
        for sql in [
            "SELECT 1",
            "INSERT INTO t VALUES (1)",
            "UPDATE t SET a = 1",
            "showcase",
            "USER_DEFINED()",
            "/* hint */ SHOW TABLES",
            "",
        ] {
            assert_eq!(classify(sql), StatementKind::Prepared, "sql {sql:?}");
        }
    }

    #[test]
    fn large_integers_default_to_text() {
        assert!(QueryOptions::default().large_integer_as_text);
    }

    #[tokio::test]
    async fn execute_passes_classification_and_wraps_failures() {
        let backend = FakeBackend::default();
        let session = Session::new("p1", 1, FakeConnection::new(1));
        let handle = session.handle();

        execute(&backend, &handle, "SHOW TABLES", &QueryOptions::default())
            .await
            .expect("show should succeed");
        execute(&backend, &handle, "SELECT 1", &QueryOptions::default())
            .await
            .expect("select should succeed");
        assert_eq!(
            backend.executed(),
            vec![
                ("SHOW TABLES".to_string(), StatementKind::Direct),
                ("SELECT 1".to_string(), StatementKind::Prepared),
            ]
        );

        backend.fail_next_execute(BackendError::new("You have an error in your SQL syntax"));
        let err = execute(&backend, &handle, "SELEC 1", &QueryOptions::default())
            .await
            .expect_err("server rejection should surface");
        assert!(matches!(err, SessionError::Execution { .. }));
        assert!(err.to_string().contains("SQL syntax"));
    }
}
