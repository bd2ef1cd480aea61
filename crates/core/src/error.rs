use thiserror::Error;

use crate::profiles::ProfilesError;
use crate::session::BackendError;

/// Failures that cross the core boundary.
///
/// Close failures never show up here: disconnecting always succeeds from the
/// caller's point of view and close errors are only logged.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("no connection profile with id `{profile_id}`")]
    ProfileNotFound { profile_id: String },
    #[error("failed to connect to `{profile_id}`: {source}")]
    Connect {
        profile_id: String,
        #[source]
        source: BackendError,
    },
    #[error("connection to `{profile_id}` was lost and could not be recovered: {source}")]
    ConnectionLost {
        profile_id: String,
        #[source]
        source: BackendError,
    },
    #[error("query execution failed: {source}")]
    Execution {
        #[source]
        source: BackendError,
    },
    #[error(transparent)]
    Profiles(#[from] ProfilesError),
}

impl SessionError {
    pub(crate) fn profile_not_found(profile_id: &str) -> Self {
        Self::ProfileNotFound {
            profile_id: profile_id.to_string(),
        }
    }

    pub(crate) fn connect(profile_id: &str, source: BackendError) -> Self {
        Self::Connect {
            profile_id: profile_id.to_string(),
            source,
        }
    }
}
