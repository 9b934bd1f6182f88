//! Session → hub lookup with lazy creation and idle cleanup.
//!
//! [`HubRegistry`] stores one [`Hub`] handle per session in a
//! `RwLock<HashMap<...>>`. The lock guards only the map of handles; each
//! hub's membership lives inside its own event loop.
//!
//! # Empty sessions
//!
//! A hub whose last participant left is kept for a grace period so a
//! participant that drops and reconnects rejoins the same hub. A periodic
//! cleanup pass retires hubs that stayed empty for the whole period.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;

use crate::config::{HubConfig, RelayConfig};
use crate::domain::SessionId;
use crate::hub::{Hub, HubError, HubStats};

/// Registry of live session hubs.
#[derive(Debug)]
pub struct HubRegistry {
    hubs: RwLock<HashMap<SessionId, Hub>>,
    hub_config: HubConfig,
    grace_period: Duration,
    cleanup_interval: Duration,
}

impl HubRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new(config: &RelayConfig) -> Self {
        Self {
            hubs: RwLock::new(HashMap::new()),
            hub_config: config.hub.clone(),
            grace_period: config.session_grace_period,
            cleanup_interval: config.cleanup_interval,
        }
    }

    /// Creates the hub for `session_id` with an explicit capacity, as the
    /// session owner does when opening a jam. If the hub already exists
    /// its capacity is updated.
    pub async fn open_session(&self, session_id: SessionId, capacity: usize) -> Hub {
        let mut map = self.hubs.write().await;
        if let Some(hub) = map.get(&session_id).filter(|hub| !hub.is_closed()) {
            let hub = hub.clone();
            drop(map);
            if hub.set_capacity(capacity).await.is_ok() {
                return hub;
            }
            map = self.hubs.write().await;
        }
        let hub = Hub::spawn(session_id, capacity, &self.hub_config);
        map.insert(session_id, hub.clone());
        hub
    }

    /// Returns the live hub for `session_id`, if any.
    pub async fn get(&self, session_id: SessionId) -> Option<Hub> {
        let map = self.hubs.read().await;
        map.get(&session_id).filter(|hub| !hub.is_closed()).cloned()
    }

    /// Finds or lazily creates the hub for `session_id` and checks that
    /// one more participant fits.
    ///
    /// Called before the protocol upgrade so a full session allocates
    /// nothing for the rejected participant.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::CapacityExceeded`] if the session is full.
    pub async fn admit(&self, session_id: SessionId) -> Result<Hub, HubError> {
        let hub = self.get_or_create(session_id).await;
        match hub.admit().await {
            Ok(_) => Ok(hub),
            Err(HubError::Closed) => {
                // Retired between lookup and admission; start a fresh one.
                let hub = self.replace(session_id, &hub).await;
                hub.admit().await.map(|_| hub)
            }
            Err(err) => Err(err),
        }
    }

    /// Membership snapshot of one session.
    pub async fn stats(&self, session_id: SessionId) -> Option<HubStats> {
        let hub = self.get(session_id).await?;
        hub.stats().await.ok()
    }

    /// Number of sessions with a hub.
    pub async fn len(&self) -> usize {
        self.hubs.read().await.len()
    }

    /// `true` if no session has a hub.
    pub async fn is_empty(&self) -> bool {
        self.hubs.read().await.is_empty()
    }

    /// Stops the hub of `session_id`, closing its connections. Returns
    /// `false` if there was none.
    pub async fn close_session(&self, session_id: SessionId) -> bool {
        let removed = self.hubs.write().await.remove(&session_id);
        match removed {
            Some(hub) => {
                hub.shutdown().await;
                tracing::info!(%session_id, "session closed");
                true
            }
            None => false,
        }
    }

    /// Runs one cleanup pass. Returns the number of hubs removed.
    pub async fn cleanup(&self) -> usize {
        let snapshot: Vec<(SessionId, Hub)> = {
            let map = self.hubs.read().await;
            map.iter().map(|(id, hub)| (*id, hub.clone())).collect()
        };

        let mut retired = Vec::new();
        for (session_id, hub) in snapshot {
            if hub.retire_if_idle(self.grace_period).await {
                retired.push((session_id, hub));
            }
        }
        if retired.is_empty() {
            return 0;
        }

        let mut map = self.hubs.write().await;
        let mut removed = 0;
        for (session_id, hub) in retired {
            // The entry may already point at a replacement hub.
            if map.get(&session_id).is_some_and(|current| current.same_hub(&hub)) {
                map.remove(&session_id);
                removed += 1;
                tracing::info!(%session_id, "idle session removed");
            }
        }
        removed
    }

    /// Spawns the periodic cleanup task.
    ///
    /// Returns a handle that can be used to abort the task.
    pub fn spawn_cleanup_task(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let registry = Arc::clone(self);
        let interval = registry.cleanup_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let removed = registry.cleanup().await;
                if removed > 0 {
                    tracing::debug!(removed, "cleanup pass finished");
                }
            }
        })
    }

    /// Stops every hub. Used on process shutdown.
    pub async fn shutdown(&self) {
        let hubs: Vec<Hub> = self.hubs.write().await.drain().map(|(_, hub)| hub).collect();
        tracing::info!(sessions = hubs.len(), "closing all sessions");
        for hub in hubs {
            hub.shutdown().await;
        }
    }

    async fn get_or_create(&self, session_id: SessionId) -> Hub {
        if let Some(hub) = self.get(session_id).await {
            return hub;
        }
        let mut map = self.hubs.write().await;
        match map.get(&session_id) {
            Some(hub) if !hub.is_closed() => hub.clone(),
            _ => {
                let hub = Hub::spawn(session_id, self.hub_config.capacity, &self.hub_config);
                map.insert(session_id, hub.clone());
                hub
            }
        }
    }

    async fn replace(&self, session_id: SessionId, stale: &Hub) -> Hub {
        let mut map = self.hubs.write().await;
        match map.get(&session_id) {
            Some(current) if !current.same_hub(stale) && !current.is_closed() => current.clone(),
            _ => {
                let hub = Hub::spawn(session_id, self.hub_config.capacity, &self.hub_config);
                map.insert(session_id, hub.clone());
                hub
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::domain::ParticipantId;
    use crate::transport::ConnectionHandle;

    fn registry(capacity: usize) -> HubRegistry {
        let mut config = RelayConfig::default();
        config.hub.capacity = capacity;
        config.session_grace_period = Duration::from_secs(30);
        HubRegistry::new(&config)
    }

    #[tokio::test]
    async fn admit_creates_hub_lazily() {
        let registry = registry(0);
        let session = SessionId::new();
        assert!(registry.get(session).await.is_none());

        let Ok(hub) = registry.admit(session).await else {
            panic!("unbounded session admits");
        };
        assert_eq!(hub.session_id(), session);
        assert_eq!(registry.len().await, 1);

        let Ok(again) = registry.admit(session).await else {
            panic!("second admission succeeds");
        };
        assert!(again.same_hub(&hub));
    }

    #[tokio::test]
    async fn admit_rejects_full_session() {
        let registry = registry(0);
        let session = SessionId::new();
        let hub = registry.open_session(session, 1).await;

        let (handle, _rx) = ConnectionHandle::channel(ParticipantId::new(), 4);
        assert!(hub.register(handle).await.is_ok());

        assert_eq!(
            registry.admit(session).await.err(),
            Some(HubError::CapacityExceeded { capacity: 1 })
        );
    }

    #[tokio::test]
    async fn open_session_updates_existing_capacity() {
        let registry = registry(0);
        let session = SessionId::new();
        let first = registry.open_session(session, 4).await;
        let second = registry.open_session(session, 8).await;

        assert!(first.same_hub(&second));
        let Some(stats) = registry.stats(session).await else {
            panic!("session exists");
        };
        assert_eq!(stats.capacity, 8);
    }

    #[tokio::test]
    async fn closed_hub_is_replaced_on_admission() {
        let registry = registry(0);
        let session = SessionId::new();
        let Ok(first) = registry.admit(session).await else {
            panic!("admits");
        };
        first.shutdown().await;
        while !first.is_closed() {
            tokio::task::yield_now().await;
        }

        let Ok(second) = registry.admit(session).await else {
            panic!("replacement admits");
        };
        assert!(!second.same_hub(&first));
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cleanup_retires_idle_sessions_after_grace() {
        let registry = registry(0);
        let idle = SessionId::new();
        let busy = SessionId::new();
        assert!(registry.admit(idle).await.is_ok());
        let Ok(busy_hub) = registry.admit(busy).await else {
            panic!("admits");
        };
        let (handle, _rx) = ConnectionHandle::channel(ParticipantId::new(), 4);
        assert!(busy_hub.register(handle).await.is_ok());

        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(registry.cleanup().await, 0);

        tokio::time::advance(Duration::from_secs(25)).await;
        assert_eq!(registry.cleanup().await, 1);
        assert!(registry.get(idle).await.is_none());
        assert!(registry.get(busy).await.is_some());
    }

    #[tokio::test]
    async fn close_session_and_shutdown() {
        let registry = registry(0);
        let a = SessionId::new();
        let b = SessionId::new();
        assert!(registry.admit(a).await.is_ok());
        assert!(registry.admit(b).await.is_ok());

        assert!(registry.close_session(a).await);
        assert!(!registry.close_session(a).await);
        assert_eq!(registry.len().await, 1);

        registry.shutdown().await;
        assert!(registry.is_empty().await);
    }
}
