//! Global presence tracking.
//!
//! The [`PresenceStore`] is the source of truth for who is online across all
//! processes: an online set plus a last-seen timestamp per identity. The
//! [`PresenceTracker`] drives the per-identity state machine on top of it and
//! publishes a `PresenceChanged` event on every online/offline transition.
//!
//! ```text
//! OFFLINE ──heartbeat──▶ ONLINE ──heartbeat──▶ ONLINE (TTL reset)
//!    ▲                      │
//!    └──logout / expiry─────┘
//! ```

use crate::bridge::EventBridge;
use crate::error::BackendError;
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::{DashMap, DashSet};
use herald_protocol::{channels, now_millis, DomainEvent, Identity, PresenceChange};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Default presence time-to-live.
pub const DEFAULT_PRESENCE_TTL: Duration = Duration::from_secs(30);

/// Storage for online membership and last-seen timestamps.
#[async_trait]
pub trait PresenceStore: Send + Sync {
    /// Add `identity` to the online set and record `now` as last seen.
    ///
    /// Returns `true` if the identity was not online before.
    async fn mark_online(&self, identity: &str, now: u64) -> Result<bool, BackendError>;

    /// Remove `identity` from the online set and drop its last-seen value.
    ///
    /// Returns `true` if the identity was online.
    async fn mark_offline(&self, identity: &str) -> Result<bool, BackendError>;

    /// Remove `identity` from the online set if its last-seen value is
    /// missing or older than `cutoff`.
    ///
    /// The check and removal are atomic. Returns `true` only for the call
    /// that removed the identity.
    async fn expire_if_stale(&self, identity: &str, cutoff: u64) -> Result<bool, BackendError>;

    /// Get every identity in the online set.
    async fn online(&self) -> Result<Vec<Identity>, BackendError>;

    /// Get the last-seen timestamp of `identity`.
    async fn last_seen(&self, identity: &str) -> Result<Option<u64>, BackendError>;
}

/// In-process presence store.
#[derive(Debug, Default)]
pub struct MemoryPresenceStore {
    online: DashSet<Identity>,
    last_seen: DashMap<Identity, u64>,
}

impl MemoryPresenceStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop the last-seen value of `identity`, leaving its online membership.
    pub fn forget_last_seen(&self, identity: &str) {
        self.last_seen.remove(identity);
    }
}

#[async_trait]
impl PresenceStore for MemoryPresenceStore {
    async fn mark_online(&self, identity: &str, now: u64) -> Result<bool, BackendError> {
        self.last_seen.insert(identity.to_string(), now);
        Ok(self.online.insert(identity.to_string()))
    }

    async fn mark_offline(&self, identity: &str) -> Result<bool, BackendError> {
        self.last_seen.remove(identity);
        Ok(self.online.remove(identity).is_some())
    }

    async fn expire_if_stale(&self, identity: &str, cutoff: u64) -> Result<bool, BackendError> {
        // Holding the last-seen entry serializes this against mark_online.
        let entry = self.last_seen.entry(identity.to_string());
        let stale = match &entry {
            Entry::Occupied(seen) => *seen.get() < cutoff,
            Entry::Vacant(_) => true,
        };
        if !stale {
            return Ok(false);
        }

        let removed = self.online.remove(identity).is_some();
        if let Entry::Occupied(seen) = entry {
            seen.remove();
        }
        Ok(removed)
    }

    async fn online(&self) -> Result<Vec<Identity>, BackendError> {
        Ok(self.online.iter().map(|id| id.key().clone()).collect())
    }

    async fn last_seen(&self, identity: &str) -> Result<Option<u64>, BackendError> {
        Ok(self.last_seen.get(identity).map(|seen| *seen))
    }
}

/// An online identity and when it was last seen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceRecord {
    pub identity: Identity,
    pub last_seen: u64,
}

/// Drives presence transitions and publishes them on the bus.
pub struct PresenceTracker {
    store: Arc<dyn PresenceStore>,
    bridge: Arc<EventBridge>,
    ttl: Duration,
}

impl PresenceTracker {
    /// Create a tracker expiring identities after `ttl` without a heartbeat.
    #[must_use]
    pub fn new(store: Arc<dyn PresenceStore>, bridge: Arc<EventBridge>, ttl: Duration) -> Self {
        Self { store, bridge, ttl }
    }

    /// Get the presence time-to-live.
    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Refresh `identity`'s presence.
    ///
    /// # Errors
    ///
    /// Returns an error if the presence store is unavailable.
    pub async fn heartbeat(&self, identity: &str) -> Result<PresenceRecord, BackendError> {
        self.heartbeat_at(identity, now_millis()).await
    }

    /// Refresh `identity`'s presence as of `now` (milliseconds).
    ///
    /// Publishes `PresenceChanged{online: true}` on the OFFLINE -> ONLINE
    /// transition; a refresh of an online identity only resets its TTL.
    ///
    /// # Errors
    ///
    /// Returns an error if the presence store is unavailable.
    pub async fn heartbeat_at(&self, identity: &str, now: u64) -> Result<PresenceRecord, BackendError> {
        let came_online = self.store.mark_online(identity, now).await?;

        if came_online {
            info!(identity = %identity, "Identity online");
            self.publish(identity, true, now).await;
        } else {
            debug!(identity = %identity, "Presence refreshed");
        }

        Ok(PresenceRecord {
            identity: identity.to_string(),
            last_seen: now,
        })
    }

    /// Mark `identity` offline immediately.
    ///
    /// Returns `true` and publishes `PresenceChanged{online: false}` if the
    /// identity was online.
    ///
    /// # Errors
    ///
    /// Returns an error if the presence store is unavailable.
    pub async fn logout(&self, identity: &str) -> Result<bool, BackendError> {
        let was_online = self.store.mark_offline(identity).await?;

        if was_online {
            info!(identity = %identity, "Identity offline");
            self.publish(identity, false, now_millis()).await;
        }

        Ok(was_online)
    }

    /// Get every online identity with its last-seen time.
    ///
    /// Identities whose last-seen value is missing report the current time.
    ///
    /// # Errors
    ///
    /// Returns an error if the presence store is unavailable.
    pub async fn online(&self) -> Result<Vec<PresenceRecord>, BackendError> {
        let identities = self.store.online().await?;
        let mut records = Vec::with_capacity(identities.len());

        for identity in identities {
            let last_seen = self.store.last_seen(&identity).await?.unwrap_or_else(now_millis);
            records.push(PresenceRecord { identity, last_seen });
        }

        Ok(records)
    }

    /// Expire identities not seen within the TTL.
    ///
    /// # Errors
    ///
    /// Returns an error if the presence store is unavailable; the rest of
    /// the cycle is skipped.
    pub async fn sweep(&self) -> Result<Vec<Identity>, BackendError> {
        self.sweep_at(now_millis()).await
    }

    /// Expire identities whose last-seen age at `now` exceeds the TTL.
    ///
    /// Publishes exactly one offline event per expired identity. Running it
    /// again immediately publishes nothing for the same identities.
    ///
    /// # Errors
    ///
    /// Returns an error if the presence store is unavailable.
    pub async fn sweep_at(&self, now: u64) -> Result<Vec<Identity>, BackendError> {
        let cutoff = now.saturating_sub(self.ttl.as_millis() as u64);
        let mut expired = Vec::new();

        for identity in self.store.online().await? {
            if self.store.expire_if_stale(&identity, cutoff).await? {
                info!(identity = %identity, "Presence expired");
                self.publish(&identity, false, now).await;
                expired.push(identity);
            }
        }

        Ok(expired)
    }

    async fn publish(&self, identity: &str, online: bool, timestamp: u64) {
        let event = DomainEvent::PresenceChanged(PresenceChange {
            identity: identity.to_string(),
            online,
            timestamp,
        });
        self.bridge.publish(channels::PRESENCE, &event).await;
    }
}
