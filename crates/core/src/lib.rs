pub mod config;
pub mod connection_manager;
pub mod error;
pub mod profiles;
pub mod query_dispatcher;
pub mod reconnect;
pub mod result_normalizer;
pub mod schema_explorer;
pub mod session;
pub mod session_registry;

#[cfg(test)]
pub(crate) mod testing;

pub use config::SessionConfig;
pub use connection_manager::ConnectionManager;
pub use error::SessionError;
pub use profiles::{ConnectionProfile, FileProfilesStore, PasswordSource, ProfileStore};
pub use query_dispatcher::{QueryOptions, StatementKind};
pub use result_normalizer::{DisplayValue, NormalizedResultSet, RawResultSet, RawValue};
pub use session::{BackendError, BackendErrorCode, SessionBackend};
pub use session_registry::SessionRegistry;
