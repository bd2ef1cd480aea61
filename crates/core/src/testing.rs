use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::profiles::ConnectionProfile;
use crate::query_dispatcher::{QueryOptions, StatementKind};
use crate::result_normalizer::RawResultSet;
use crate::session::{BackendError, BackendErrorCode, SessionBackend};

#[derive(Debug, Default)]
struct FakeState {
    connect_calls: AtomicUsize,
    close_calls: AtomicUsize,
    keep_alive_calls: AtomicUsize,
    fail_close: AtomicBool,
    connect_failures: Mutex<VecDeque<BackendError>>,
    execute_failures: Mutex<VecDeque<BackendError>>,
    keep_alive_failures: Mutex<VecDeque<BackendError>>,
    connect_delay: Mutex<Option<Duration>>,
    statement_delay: Mutex<Option<Duration>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    executed: Mutex<Vec<(String, StatementKind)>>,
    connected_profiles: Mutex<Vec<String>>,
    responses: Mutex<HashMap<String, RawResultSet>>,
}

/// Scriptable in-memory backend. Clones share their counters and scripts.
#[derive(Debug, Clone, Default)]
pub(crate) struct FakeBackend {
    state: Arc<FakeState>,
}

#[derive(Debug)]
pub(crate) struct FakeConnection {
    _id: usize,
}

impl FakeConnection {
    pub(crate) fn new(id: usize) -> Self {
        Self { _id: id }
    }
}

pub(crate) fn connection_lost() -> BackendError {
    BackendError::new("Connection lost: The server closed the connection.")
        .with_code(BackendErrorCode::ProtocolConnectionLost)
}

impl FakeBackend {
    pub(crate) fn connect_calls(&self) -> usize {
        self.state.connect_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn close_calls(&self) -> usize {
        self.state.close_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn keep_alive_calls(&self) -> usize {
        self.state.keep_alive_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn executed(&self) -> Vec<(String, StatementKind)> {
        self.state.executed.lock().expect("executed lock").clone()
    }

    pub(crate) fn connected_profiles(&self) -> Vec<String> {
        self.state
            .connected_profiles
            .lock()
            .expect("connected profiles lock")
            .clone()
    }

    pub(crate) fn fail_next_connect(&self, error: BackendError) {
        self.state
            .connect_failures
            .lock()
            .expect("connect failures lock")
            .push_back(error);
    }

    pub(crate) fn fail_next_execute(&self, error: BackendError) {
        self.state
            .execute_failures
            .lock()
            .expect("execute failures lock")
            .push_back(error);
    }

    pub(crate) fn fail_next_keep_alive(&self, error: BackendError) {
        self.state
            .keep_alive_failures
            .lock()
            .expect("keep-alive failures lock")
            .push_back(error);
    }

    pub(crate) fn fail_close(&self, fail: bool) {
        self.state.fail_close.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn set_connect_delay(&self, delay: Duration) {
        *self.state.connect_delay.lock().expect("connect delay lock") = Some(delay);
    }

    /// Makes every statement and probe take this long on the transport.
    pub(crate) fn set_statement_delay(&self, delay: Duration) {
        *self.state.statement_delay.lock().expect("statement delay lock") = Some(delay);
    }

    /// Most statements or probes ever observed running at the same time.
    pub(crate) fn max_in_flight(&self) -> usize {
        self.state.max_in_flight.load(Ordering::SeqCst)
    }

    async fn on_transport(&self) {
        let running = self.state.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.max_in_flight.fetch_max(running, Ordering::SeqCst);
        let delay = *self.state.statement_delay.lock().expect("statement delay lock");
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.state.in_flight.fetch_sub(1, Ordering::SeqCst);
    }

    pub(crate) fn respond_to(&self, sql: &str, result: RawResultSet) {
        self.state
            .responses
            .lock()
            .expect("responses lock")
            .insert(sql.to_string(), result);
    }
}

#[async_trait::async_trait]
impl SessionBackend for FakeBackend {
    type Connection = FakeConnection;

    async fn connect(&self, profile: &ConnectionProfile) -> Result<Self::Connection, BackendError> {
        let delay = *self.state.connect_delay.lock().expect("connect delay lock");
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let id = self.state.connect_calls.fetch_add(1, Ordering::SeqCst) + 1;
        let failure = self
            .state
            .connect_failures
            .lock()
            .expect("connect failures lock")
            .pop_front();
        if let Some(error) = failure {
            return Err(error);
        }

        self.state
            .connected_profiles
            .lock()
            .expect("connected profiles lock")
            .push(profile.id.clone());
        Ok(FakeConnection::new(id))
    }

    async fn execute(
        &self,
        _connection: &mut Self::Connection,
        sql: &str,
        kind: StatementKind,
        _options: &QueryOptions,
    ) -> Result<RawResultSet, BackendError> {
        self.state
            .executed
            .lock()
            .expect("executed lock")
            .push((sql.to_string(), kind));
        self.on_transport().await;

        let failure = self
            .state
            .execute_failures
            .lock()
            .expect("execute failures lock")
            .pop_front();
        if let Some(error) = failure {
            return Err(error);
        }

        let response = self
            .state
            .responses
            .lock()
            .expect("responses lock")
            .get(sql)
            .cloned();
        Ok(response.unwrap_or_default())
    }

    async fn keep_alive(
        &self,
        _connection: &mut Self::Connection,
        _statement: &str,
    ) -> Result<(), BackendError> {
        self.state.keep_alive_calls.fetch_add(1, Ordering::SeqCst);
        self.on_transport().await;
        let failure = self
            .state
            .keep_alive_failures
            .lock()
            .expect("keep-alive failures lock")
            .pop_front();
        match failure {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    async fn close(&self, _connection: Self::Connection) -> Result<(), BackendError> {
        self.state.close_calls.fetch_add(1, Ordering::SeqCst);
        if self.state.fail_close.load(Ordering::SeqCst) {
            return Err(BackendError::new("close failed"));
        }
        Ok(())
    }
}
