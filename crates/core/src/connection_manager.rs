use parking_lot::Mutex;
use tracing::{debug, info};

use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::profiles::{generate_profile_id, ConnectionProfile, ProfileStore};
use crate::query_dispatcher::{self, QueryOptions};
use crate::reconnect::execute_with_reconnect;
use crate::result_normalizer::{normalize, NormalizedResultSet};
use crate::session::SessionBackend;
use crate::session_registry::SessionRegistry;

const TEMPORARY_PROFILE_PREFIX: &str = "temp-";
const SHOW_DATABASES: &str = "SHOW DATABASES";

/// The boundary the rest of the tool talks to: profiles from the store,
/// sessions from the registry, results already normalized for display.
pub struct ConnectionManager<B: SessionBackend, S: ProfileStore> {
    registry: SessionRegistry<B>,
    store: Mutex<S>,
}

impl<B: SessionBackend, S: ProfileStore> ConnectionManager<B, S> {
    #[must_use]
    pub fn new(backend: B, store: S) -> Self {
        Self::with_config(backend, store, SessionConfig::default())
    }

    #[must_use]
    pub fn with_config(backend: B, store: S, config: SessionConfig) -> Self {
        Self {
            registry: SessionRegistry::new(backend, config),
            store: Mutex::new(store),
        }
    }

    #[must_use]
    pub fn registry(&self) -> &SessionRegistry<B> {
        &self.registry
    }

    #[must_use]
    pub fn list_profiles(&self) -> Vec<ConnectionProfile> {
        self.store.lock().profiles().to_vec()
    }

    pub fn profile(&self, id: &str) -> Result<ConnectionProfile, SessionError> {
        self.store
            .lock()
            .profile(id)
            .cloned()
            .ok_or_else(|| SessionError::profile_not_found(id))
    }

    pub fn add_profile(&self, profile: ConnectionProfile) -> Result<(), SessionError> {
        let mut store = self.store.lock();
        info!(profile_id = %profile.id, endpoint = %profile.endpoint(), "saving profile");
        store.upsert_profile(profile);
        store.persist()?;
        Ok(())
    }

    /// Disconnects the profile if needed, then deletes it. Returns whether a
    /// profile was removed.
    pub async fn remove_profile(&self, id: &str) -> Result<bool, SessionError> {
        self.registry.disconnect(id).await;

        let mut store = self.store.lock();
        let removed = store.delete_profile(id);
        if removed {
            store.persist()?;
            info!(profile_id = id, "profile removed");
        }
        Ok(removed)
    }

    pub fn set_selected_databases(
        &self,
        id: &str,
        databases: Vec<String>,
    ) -> Result<ConnectionProfile, SessionError> {
        let mut store = self.store.lock();
        let mut profile = store
            .profile(id)
            .cloned()
            .ok_or_else(|| SessionError::profile_not_found(id))?;
        profile.selected_databases = databases;
        store.upsert_profile(profile.clone());
        store.persist()?;
        Ok(profile)
    }

    pub async fn connect(&self, id: &str) -> Result<(), SessionError> {
        let profile = self.profile(id)?;
        self.registry
            .connect(&profile)
            .await
            .map_err(|source| SessionError::connect(id, source))?;
        Ok(())
    }

    pub async fn disconnect(&self, id: &str) {
        self.registry.disconnect(id).await;
    }

    #[must_use]
    pub fn is_connected(&self, id: &str) -> bool {
        self.registry.is_connected(id)
    }

    pub async fn execute_query(
        &self,
        id: &str,
        sql: &str,
        options: &QueryOptions,
    ) -> Result<NormalizedResultSet, SessionError> {
        let profile = self.profile(id)?;
        let raw = execute_with_reconnect(&self.registry, &profile, sql, options).await?;
        debug!(profile_id = id, rows = raw.len(), "query finished");
        Ok(normalize(raw))
    }

    /// The last-active profile, if its session is still live and the profile
    /// still exists.
    #[must_use]
    pub fn last_active(&self) -> Option<ConnectionProfile> {
        let id = self.registry.last_active_id()?;
        self.store.lock().profile(&id).cloned()
    }

    /// Makes the profile the default target, connecting first if needed.
    pub async fn select_active(&self, id: &str) -> Result<(), SessionError> {
        let profile = self.profile(id)?;
        self.registry
            .ensure_connected(&profile)
            .await
            .map_err(|source| SessionError::connect(id, source))?;
        self.registry.mark_active(id);
        self.registry.notify_status_changed();
        Ok(())
    }

    pub fn on_status_changed(&self, listener: impl Fn() + Send + Sync + 'static) {
        self.registry.on_status_changed(listener);
    }

    /// Lists the databases visible to an unsaved profile through a throwaway
    /// session. The session is closed and the previous last-active pointer
    /// restored whether or not the listing succeeds.
    pub async fn discover_databases(
        &self,
        draft: &ConnectionProfile,
    ) -> Result<Vec<String>, SessionError> {
        let mut temporary = draft.clone();
        temporary.id = format!("{TEMPORARY_PROFILE_PREFIX}{}", generate_profile_id());
        let previous = self.registry.raw_last_active();

        let outcome = self.list_databases_once(&temporary).await;

        self.registry.disconnect(&temporary.id).await;
        self.registry.set_last_active(previous.as_deref());
        outcome
    }

    async fn list_databases_once(
        &self,
        profile: &ConnectionProfile,
    ) -> Result<Vec<String>, SessionError> {
        let session = self
            .registry
            .connect(profile)
            .await
            .map_err(|source| SessionError::connect(&profile.id, source))?;
        let raw = query_dispatcher::execute(
            self.registry.backend(),
            &session,
            SHOW_DATABASES,
            &QueryOptions::default(),
        )
        .await?;
        Ok(normalize(raw).column_texts(0))
    }

    /// Closes every open session.
    pub async fn shutdown(&self) {
        self.registry.disconnect_all().await;
    }
}
