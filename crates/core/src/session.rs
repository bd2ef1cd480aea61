use std::fmt;
use std::sync::Arc;
use std::time::SystemTime;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::profiles::ConnectionProfile;
use crate::query_dispatcher::{classify, QueryOptions, StatementKind};
use crate::result_normalizer::RawResultSet;

/// Transport-level failure codes the driver adapter can attach to an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendErrorCode {
    ProtocolConnectionLost,
    ConnectionReset,
    BrokenPipe,
    TimedOut,
    /// Numeric error code reported by the server.
    Server(u16),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct BackendError {
    message: String,
    code: Option<BackendErrorCode>,
}

impl BackendError {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
        }
    }

    #[must_use]
    pub fn with_code(mut self, code: BackendErrorCode) -> Self {
        self.code = Some(code);
        self
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    #[must_use]
    pub fn code(&self) -> Option<BackendErrorCode> {
        self.code
    }
}

/// The driver seam: everything the session layer needs from a database client.
#[async_trait]
pub trait SessionBackend: Send + Sync + 'static {
    type Connection: Send + 'static;

    async fn connect(&self, profile: &ConnectionProfile) -> Result<Self::Connection, BackendError>;

    async fn execute(
        &self,
        connection: &mut Self::Connection,
        sql: &str,
        kind: StatementKind,
        options: &QueryOptions,
    ) -> Result<RawResultSet, BackendError>;

    async fn keep_alive(
        &self,
        connection: &mut Self::Connection,
        statement: &str,
    ) -> Result<(), BackendError> {
        self.execute(
            connection,
            statement,
            classify(statement),
            &QueryOptions::default(),
        )
        .await
        .map(|_| ())
    }

    async fn close(&self, connection: Self::Connection) -> Result<(), BackendError>;
}

type ConnectionSlot<C> = Arc<Mutex<Option<C>>>;

/// Call-scoped view of a live session.
///
/// The transport sits behind an async mutex, so a keep-alive probe and a user
/// statement on the same session run one after the other, never interleaved.
pub struct SessionHandle<C> {
    profile_id: Arc<str>,
    generation: u64,
    created_at: SystemTime,
    connection: ConnectionSlot<C>,
}

impl<C> Clone for SessionHandle<C> {
    fn clone(&self) -> Self {
        Self {
            profile_id: Arc::clone(&self.profile_id),
            generation: self.generation,
            created_at: self.created_at,
            connection: Arc::clone(&self.connection),
        }
    }
}

impl<C> fmt::Debug for SessionHandle<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHandle")
            .field("profile_id", &self.profile_id)
            .field("generation", &self.generation)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

impl<C: Send + 'static> SessionHandle<C> {
    #[must_use]
    pub fn profile_id(&self) -> &str {
        &self.profile_id
    }

    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    #[must_use]
    pub fn created_at(&self) -> SystemTime {
        self.created_at
    }

    pub async fn execute<B>(
        &self,
        backend: &B,
        sql: &str,
        kind: StatementKind,
        options: &QueryOptions,
    ) -> Result<RawResultSet, BackendError>
    where
        B: SessionBackend<Connection = C>,
    {
        let mut slot = self.connection.lock().await;
        let connection = slot.as_mut().ok_or_else(closed_session_error)?;
        backend.execute(connection, sql, kind, options).await
    }

    pub async fn keep_alive<B>(&self, backend: &B, statement: &str) -> Result<(), BackendError>
    where
        B: SessionBackend<Connection = C>,
    {
        let mut slot = self.connection.lock().await;
        let connection = slot.as_mut().ok_or_else(closed_session_error)?;
        backend.keep_alive(connection, statement).await
    }
}

fn closed_session_error() -> BackendError {
    BackendError::new("session has been closed")
}

/// Stop handle for a session's keep-alive task.
///
/// Dropping the handle stops the task, so a session removed from the
/// registry on any path takes its timer with it.
#[derive(Debug)]
pub struct KeepAlive {
    task: JoinHandle<()>,
}

impl KeepAlive {
    pub(crate) fn new(task: JoinHandle<()>) -> Self {
        Self { task }
    }

    pub fn stop(self) {
        drop(self);
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for KeepAlive {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// A live session as owned by the registry.
pub(crate) struct Session<C> {
    handle: SessionHandle<C>,
    keep_alive: Option<KeepAlive>,
}

impl<C: Send + 'static> Session<C> {
    pub(crate) fn new(profile_id: &str, generation: u64, connection: C) -> Self {
        Self {
            handle: SessionHandle {
                profile_id: Arc::from(profile_id),
                generation,
                created_at: SystemTime::now(),
                connection: Arc::new(Mutex::new(Some(connection))),
            },
            keep_alive: None,
        }
    }

    pub(crate) fn handle(&self) -> SessionHandle<C> {
        self.handle.clone()
    }

    pub(crate) fn generation(&self) -> u64 {
        self.handle.generation
    }

    pub(crate) fn attach_keep_alive(&mut self, keep_alive: KeepAlive) {
        self.keep_alive = Some(keep_alive);
    }

    /// Stops the keep-alive task and closes the transport.
    ///
    /// Waits for any statement already running on the session to finish.
    pub(crate) async fn close<B>(mut self, backend: &B) -> Result<(), BackendError>
    where
        B: SessionBackend<Connection = C>,
    {
        if let Some(keep_alive) = self.keep_alive.take() {
            keep_alive.stop();
        }

        let connection = self.handle.connection.lock().await.take();
        match connection {
            Some(connection) => backend.close(connection).await,
            None => Ok(()),
        }
    }
}
