use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use nextsql_core::profiles::ConnectionProfile;
use nextsql_core::query_dispatcher::{QueryOptions, StatementKind};
use nextsql_core::result_normalizer::{RawResultSet, RawValue};
use nextsql_core::session::{BackendError, SessionBackend};

/// Canned backend for command tests. Each connection remembers the profile
/// it was opened for.
#[derive(Debug, Clone, Default)]
pub struct StubBackend {
    connect_calls: Arc<AtomicUsize>,
    fail_keep_alive: Arc<AtomicBool>,
    executed: Arc<Mutex<Vec<(String, String)>>>,
}

impl StubBackend {
    pub fn connect_calls(&self) -> usize {
        self.connect_calls.load(Ordering::SeqCst)
    }

    /// `(profile id, sql)` for every statement run.
    pub fn executed(&self) -> Vec<(String, String)> {
        self.executed.lock().expect("executed lock").clone()
    }

    pub fn fail_keep_alive(&self, fail: bool) {
        self.fail_keep_alive.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl SessionBackend for StubBackend {
    type Connection = String;

    async fn connect(&self, profile: &ConnectionProfile) -> Result<String, BackendError> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        Ok(profile.id.clone())
    }

    async fn execute(
        &self,
        connection: &mut String,
        sql: &str,
        kind: StatementKind,
        _options: &QueryOptions,
    ) -> Result<RawResultSet, BackendError> {
        self.executed
            .lock()
            .expect("executed lock")
            .push((connection.clone(), sql.to_string()));
        match (sql, kind) {
            ("SHOW DATABASES", StatementKind::Direct) => Ok(RawResultSet::new(
                vec!["Database".to_string()],
                vec![
                    vec![RawValue::Text("crm".to_string())],
                    vec![RawValue::Text("shop".to_string())],
                ],
            )),
            (_, StatementKind::Prepared) => Ok(RawResultSet::new(
                vec!["total".to_string()],
                vec![vec![RawValue::Text("9007199254740993".to_string())]],
            )),
            _ => Err(BackendError::new(format!("unexpected statement {sql}"))),
        }
    }

    async fn keep_alive(
        &self,
        _connection: &mut String,
        _statement: &str,
    ) -> Result<(), BackendError> {
        if self.fail_keep_alive.load(Ordering::SeqCst) {
            return Err(BackendError::new("MySQL server has gone away"));
        }
        Ok(())
    }

    async fn close(&self, _connection: String) -> Result<(), BackendError> {
        Ok(())
    }
}
