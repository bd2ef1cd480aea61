use tracing::warn;

use crate::error::SessionError;
use crate::profiles::ConnectionProfile;
use crate::query_dispatcher::{self, QueryOptions};
use crate::result_normalizer::RawResultSet;
use crate::session::{BackendError, BackendErrorCode, SessionBackend};
use crate::session_registry::SessionRegistry;

const SERVER_GONE_AWAY: u16 = 2006;
const SERVER_LOST: u16 = 2013;

const LOST_CONNECTION_MESSAGES: [&str; 4] = [
    "connection lost",
    "connection reset",
    "connection timed out",
    "server has gone away",
];

/// Whether the failure means the transport is dead rather than the statement
/// being rejected.
#[must_use]
pub fn is_connection_lost(error: &BackendError) -> bool {
    let by_code = matches!(
        error.code(),
        Some(
            BackendErrorCode::ProtocolConnectionLost
                | BackendErrorCode::ConnectionReset
                | BackendErrorCode::BrokenPipe
                | BackendErrorCode::TimedOut
                | BackendErrorCode::Server(SERVER_GONE_AWAY | SERVER_LOST)
        )
    );
    if by_code {
        return true;
    }

    let message = error.message().to_lowercase();
    LOST_CONNECTION_MESSAGES
        .iter()
        .any(|needle| message.contains(needle))
}

/// Runs a statement, reconnecting at most once if the session turns out to be
/// dead.
///
/// Statements are re-sent blindly after a reconnect, so a write whose
/// acknowledgement was lost can run twice.
pub async fn execute_with_reconnect<B: SessionBackend>(
    registry: &SessionRegistry<B>,
    profile: &ConnectionProfile,
    sql: &str,
    options: &QueryOptions,
) -> Result<RawResultSet, SessionError> {
    let session = registry
        .ensure_connected(profile)
        .await
        .map_err(|source| SessionError::connect(&profile.id, source))?;

    let error = match query_dispatcher::execute(registry.backend(), &session, sql, options).await {
        Ok(result) => {
            registry.mark_active(&profile.id);
            return Ok(result);
        }
        Err(SessionError::Execution { source }) if is_connection_lost(&source) => source,
        Err(other) => return Err(other),
    };

    warn!(profile_id = %profile.id, %error, "connection lost, reconnecting once");
    registry.evict(&session);

    let session = registry
        .ensure_connected(profile)
        .await
        .map_err(|source| SessionError::connect(&profile.id, source))?;

    match query_dispatcher::execute(registry.backend(), &session, sql, options).await {
        Ok(result) => {
            registry.mark_active(&profile.id);
            Ok(result)
        }
        Err(SessionError::Execution { source }) if is_connection_lost(&source) => {
            registry.evict(&session);
            Err(SessionError::ConnectionLost {
                profile_id: profile.id.clone(),
                source,
            })
        }
        Err(other) => Err(other),
    }
}
