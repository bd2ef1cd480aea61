use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::SessionConfig;
use crate::profiles::ConnectionProfile;
use crate::session::{BackendError, KeepAlive, Session, SessionBackend, SessionHandle};

type StatusListener = Arc<dyn Fn() + Send + Sync>;
type ConnectGate = Arc<tokio::sync::Mutex<()>>;

struct RegistryState<C> {
    sessions: HashMap<String, Session<C>>,
    last_active: Option<String>,
    next_generation: u64,
}

struct Shared<B: SessionBackend> {
    backend: B,
    config: SessionConfig,
    // Never held across an await point.
    state: Mutex<RegistryState<B::Connection>>,
    connect_gates: Mutex<HashMap<String, ConnectGate>>,
    listeners: RwLock<Vec<StatusListener>>,
}

impl<B: SessionBackend> Shared<B> {
    fn notify_status_changed(&self) {
        let listeners = self.listeners.read().clone();
        for listener in listeners {
            listener();
        }
    }

    /// Removes the entry only while it still belongs to the failed session.
    fn drop_failed_session(&self, failed: &SessionHandle<B::Connection>) -> bool {
        let removed = {
            let mut state = self.state.lock();
            let is_current = state
                .sessions
                .get(failed.profile_id())
                .is_some_and(|session| session.generation() == failed.generation());
            if is_current {
                state.sessions.remove(failed.profile_id())
            } else {
                None
            }
        };

        let was_removed = removed.is_some();
        drop(removed);
        if was_removed {
            self.notify_status_changed();
        }
        was_removed
    }
}

/// Owns every live session, keyed by profile id, plus the last-active pointer.
pub struct SessionRegistry<B: SessionBackend> {
    shared: Arc<Shared<B>>,
}

impl<B: SessionBackend> SessionRegistry<B> {
    #[must_use]
    pub fn new(backend: B, config: SessionConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                backend,
                config,
                state: Mutex::new(RegistryState {
                    sessions: HashMap::new(),
                    last_active: None,
                    next_generation: 1,
                }),
                connect_gates: Mutex::new(HashMap::new()),
                listeners: RwLock::new(Vec::new()),
            }),
        }
    }

    #[must_use]
    pub fn backend(&self) -> &B {
        &self.shared.backend
    }

    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.shared.config
    }

    #[must_use]
    pub fn is_connected(&self, profile_id: &str) -> bool {
        self.shared.state.lock().sessions.contains_key(profile_id)
    }

    #[must_use]
    pub fn session(&self, profile_id: &str) -> Option<SessionHandle<B::Connection>> {
        self.shared
            .state
            .lock()
            .sessions
            .get(profile_id)
            .map(Session::handle)
    }

    #[must_use]
    pub fn connected_profile_ids(&self) -> Vec<String> {
        let mut ids = self
            .shared
            .state
            .lock()
            .sessions
            .keys()
            .cloned()
            .collect::<Vec<_>>();
        ids.sort_unstable();
        ids
    }

    /// The last-active profile id, only while its session is still live.
    #[must_use]
    pub fn last_active_id(&self) -> Option<String> {
        let state = self.shared.state.lock();
        state
            .last_active
            .as_ref()
            .filter(|id| state.sessions.contains_key(id.as_str()))
            .cloned()
    }

    pub(crate) fn raw_last_active(&self) -> Option<String> {
        self.shared.state.lock().last_active.clone()
    }

    pub(crate) fn mark_active(&self, profile_id: &str) {
        let mut state = self.shared.state.lock();
        if state.sessions.contains_key(profile_id) {
            state.last_active = Some(profile_id.to_string());
        }
    }

    pub(crate) fn set_last_active(&self, profile_id: Option<&str>) {
        self.shared.state.lock().last_active = profile_id.map(str::to_string);
    }

    pub fn on_status_changed(&self, listener: impl Fn() + Send + Sync + 'static) {
        self.shared.listeners.write().push(Arc::new(listener));
    }

    pub(crate) fn notify_status_changed(&self) {
        self.shared.notify_status_changed();
    }

    /// Opens a fresh session, closing any session already held for the profile.
    pub async fn connect(
        &self,
        profile: &ConnectionProfile,
    ) -> Result<SessionHandle<B::Connection>, BackendError> {
        let gate = self.connect_gate(&profile.id);
        let _guard = gate.lock().await;
        self.connect_locked(profile).await
    }

    /// Returns the live session for the profile, connecting on demand.
    pub async fn ensure_connected(
        &self,
        profile: &ConnectionProfile,
    ) -> Result<SessionHandle<B::Connection>, BackendError> {
        if let Some(handle) = self.session(&profile.id) {
            return Ok(handle);
        }

        let gate = self.connect_gate(&profile.id);
        let _guard = gate.lock().await;
        // Another caller may have connected while we waited on the gate.
        if let Some(handle) = self.session(&profile.id) {
            return Ok(handle);
        }
        self.connect_locked(profile).await
    }

    /// Returns whether a session was actually closed.
    pub async fn disconnect(&self, profile_id: &str) -> bool {
        let gate = self.connect_gate(profile_id);
        let guard = gate.lock().await;

        let removed = {
            let mut state = self.shared.state.lock();
            let removed = state.sessions.remove(profile_id);
            if removed.is_some() && state.last_active.as_deref() == Some(profile_id) {
                state.last_active = None;
            }
            removed
        };

        let closed = match removed {
            Some(session) => {
                self.close_session(profile_id, session).await;
                info!(profile_id, "session disconnected");
                self.shared.notify_status_changed();
                true
            }
            None => false,
        };

        drop(guard);
        self.release_gate(profile_id, gate);
        closed
    }

    /// Drops a session whose transport is known to be dead, without a close
    /// handshake. A newer session for the same profile is left alone.
    pub fn evict(&self, stale: &SessionHandle<B::Connection>) -> bool {
        let evicted = self.shared.drop_failed_session(stale);
        if evicted {
            warn!(
                profile_id = stale.profile_id(),
                generation = stale.generation(),
                "evicted stale session"
            );
        }
        evicted
    }

    pub async fn disconnect_all(&self) {
        for profile_id in self.connected_profile_ids() {
            self.disconnect(&profile_id).await;
        }
    }

    fn connect_gate(&self, profile_id: &str) -> ConnectGate {
        let mut gates = self.shared.connect_gates.lock();
        Arc::clone(gates.entry(profile_id.to_string()).or_default())
    }

    /// Forgets the profile's gate once nobody else holds or waits on it.
    fn release_gate(&self, profile_id: &str, gate: ConnectGate) {
        let mut gates = self.shared.connect_gates.lock();
        // One reference in the map plus ours.
        if Arc::strong_count(&gate) == 2 {
            gates.remove(profile_id);
        }
    }

    #[cfg(test)]
    fn gate_count(&self) -> usize {
        self.shared.connect_gates.lock().len()
    }

    async fn connect_locked(
        &self,
        profile: &ConnectionProfile,
    ) -> Result<SessionHandle<B::Connection>, BackendError> {
        let previous = self.shared.state.lock().sessions.remove(&profile.id);
        let replaced = previous.is_some();
        if let Some(previous) = previous {
            debug!(profile_id = %profile.id, "replacing existing session");
            self.close_session(&profile.id, previous).await;
        }

        let connection = match self.shared.backend.connect(profile).await {
            Ok(connection) => connection,
            Err(error) => {
                warn!(
                    profile_id = %profile.id,
                    endpoint = %profile.endpoint(),
                    %error,
                    "connect failed"
                );
                // The old session is already gone, so the profile went down.
                if replaced {
                    self.shared.notify_status_changed();
                }
                return Err(error);
            }
        };

        let handle = {
            let mut state = self.shared.state.lock();
            let generation = state.next_generation;
            state.next_generation += 1;

            let mut session = Session::new(&profile.id, generation, connection);
            let handle = session.handle();
            if let Some(interval) = self.shared.config.effective_keep_alive_interval() {
                if let Some(keep_alive) = self.spawn_keep_alive(handle.clone(), interval) {
                    session.attach_keep_alive(keep_alive);
                }
            }
            state.sessions.insert(profile.id.clone(), session);
            state.last_active = Some(profile.id.clone());
            handle
        };

        info!(
            profile_id = %profile.id,
            generation = handle.generation(),
            endpoint = %profile.endpoint(),
            "session connected"
        );
        self.shared.notify_status_changed();
        Ok(handle)
    }

    async fn close_session(&self, profile_id: &str, session: Session<B::Connection>) {
        if let Err(error) = session.close(&self.shared.backend).await {
            warn!(profile_id, %error, "error while closing session, ignoring");
        }
    }

    fn spawn_keep_alive(
        &self,
        handle: SessionHandle<B::Connection>,
        interval: Duration,
    ) -> Option<KeepAlive> {
        let Some(start) = Instant::now().checked_add(interval) else {
            warn!(
                profile_id = handle.profile_id(),
                ?interval,
                "keep-alive interval out of range, probe disabled"
            );
            return None;
        };
        let shared: Weak<Shared<B>> = Arc::downgrade(&self.shared);
        let statement = self.shared.config.keep_alive_statement.clone();

        Some(KeepAlive::new(tokio::spawn(async move {
            let mut ticker = interval_at(start, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                let Some(shared) = shared.upgrade() else {
                    return;
                };

                match handle.keep_alive(&shared.backend, &statement).await {
                    Ok(()) => {
                        debug!(profile_id = handle.profile_id(), "keep-alive probe succeeded");
                    }
                    Err(error) => {
                        warn!(
                            profile_id = handle.profile_id(),
                            generation = handle.generation(),
                            %error,
                            "keep-alive probe failed, dropping session"
                        );
                        shared.drop_failed_session(&handle);
                        return;
                    }
                }
            }
        })))
    }
}
