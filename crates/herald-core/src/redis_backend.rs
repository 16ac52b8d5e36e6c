//! Redis backend for multi-node deployments.
//!
//! One connection manager serves every store; pub/sub subscriptions each get
//! a dedicated connection. Key layout:
//!
//! | Key                        | Type   | Contents                        |
//! |----------------------------|--------|---------------------------------|
//! | `online-users`             | set    | online identities               |
//! | `user:{u}:last-seen`       | string | last heartbeat (ms), expires    |
//! | `room:{r}:users`           | set    | room members (room service)     |
//! | `user:{u}:notifications`   | list   | pending notifications, newest first |

use crate::bus::{BusStream, EventBus};
use crate::error::BackendError;
use crate::presence::PresenceStore;
use crate::queue::{PendingQueue, DEFAULT_RETAIN};
use crate::rooms::RoomDirectory;
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use herald_protocol::{Identity, Notification, NotificationPayload};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Set of online identities.
const ONLINE_KEY: &str = "online-users";

/// Remove an identity from the online set if its last-seen value is missing
/// or older than the cutoff.
///
/// KEYS[1] = online set
/// KEYS[2] = last-seen key
/// ARGV[1] = identity
/// ARGV[2] = cutoff (ms)
///
/// Returns 1 if this call removed the identity, 0 otherwise.
const EXPIRE_SCRIPT: &str = r#"
    local seen = redis.call('GET', KEYS[2])
    if seen and tonumber(seen) >= tonumber(ARGV[2]) then
        return 0
    end
    redis.call('DEL', KEYS[2])
    return redis.call('SREM', KEYS[1], ARGV[1])
"#;

fn last_seen_key(identity: &str) -> String {
    format!("user:{identity}:last-seen")
}

fn room_key(room: &str) -> String {
    format!("room:{room}:users")
}

fn notifications_key(identity: &str) -> String {
    format!("user:{identity}:notifications")
}

/// Presence store, room directory, pending queue and bus over one Redis.
#[derive(Clone)]
pub struct RedisBackend {
    client: redis::Client,
    conn: ConnectionManager,
    presence_ttl: Duration,
    retain: usize,
}

impl RedisBackend {
    /// Connect to the Redis server at `url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid or the server is unreachable.
    pub async fn connect(url: &str) -> Result<Self, BackendError> {
        let client = redis::Client::open(url)?;
        let conn = client.get_connection_manager().await?;

        info!("Connected to Redis");

        Ok(Self {
            client,
            conn,
            presence_ttl: crate::presence::DEFAULT_PRESENCE_TTL,
            retain: DEFAULT_RETAIN,
        })
    }

    /// Expire last-seen keys after `ttl`.
    #[must_use]
    pub fn with_presence_ttl(mut self, ttl: Duration) -> Self {
        self.presence_ttl = ttl;
        self
    }

    /// Keep up to `retain` pending notifications per identity.
    #[must_use]
    pub fn with_retain(mut self, retain: usize) -> Self {
        self.retain = retain.max(1);
        self
    }
}

#[async_trait]
impl EventBus for RedisBackend {
    async fn publish(&self, channel: &str, payload: Bytes) -> Result<(), BackendError> {
        let mut conn = self.conn.clone();
        let receivers: i64 = conn.publish(channel, payload.to_vec()).await?;
        debug!(channel = %channel, receivers, "Published to Redis");
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<BusStream, BackendError> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(channel).await?;

        debug!(channel = %channel, "Subscribed to Redis channel");

        let stream = pubsub
            .into_on_message()
            .map(|msg| Bytes::copy_from_slice(msg.get_payload_bytes()));
        Ok(stream.boxed())
    }
}

#[async_trait]
impl PresenceStore for RedisBackend {
    async fn mark_online(&self, identity: &str, now: u64) -> Result<bool, BackendError> {
        let mut conn = self.conn.clone();
        let ttl_secs = self.presence_ttl.as_secs().max(1);

        let (added,): (i64,) = redis::pipe()
            .atomic()
            .set_ex(last_seen_key(identity), now, ttl_secs)
            .ignore()
            .sadd(ONLINE_KEY, identity)
            .query_async(&mut conn)
            .await?;

        Ok(added > 0)
    }

    async fn mark_offline(&self, identity: &str) -> Result<bool, BackendError> {
        let mut conn = self.conn.clone();

        let (removed,): (i64,) = redis::pipe()
            .atomic()
            .del(last_seen_key(identity))
            .ignore()
            .srem(ONLINE_KEY, identity)
            .query_async(&mut conn)
            .await?;

        Ok(removed > 0)
    }

    async fn expire_if_stale(&self, identity: &str, cutoff: u64) -> Result<bool, BackendError> {
        let mut conn = self.conn.clone();

        let removed: i64 = redis::Script::new(EXPIRE_SCRIPT)
            .key(ONLINE_KEY)
            .key(last_seen_key(identity))
            .arg(identity)
            .arg(cutoff)
            .invoke_async(&mut conn)
            .await?;

        Ok(removed > 0)
    }

    async fn online(&self) -> Result<Vec<Identity>, BackendError> {
        let mut conn = self.conn.clone();
        Ok(conn.smembers(ONLINE_KEY).await?)
    }

    async fn last_seen(&self, identity: &str) -> Result<Option<u64>, BackendError> {
        let mut conn = self.conn.clone();
        Ok(conn.get(last_seen_key(identity)).await?)
    }
}

#[async_trait]
impl RoomDirectory for RedisBackend {
    async fn members(&self, room: &str) -> Result<HashSet<Identity>, BackendError> {
        let mut conn = self.conn.clone();
        Ok(conn.smembers(room_key(room)).await?)
    }
}

#[async_trait]
impl PendingQueue for RedisBackend {
    async fn enqueue(&self, notification: Notification) -> Result<(), BackendError> {
        let key = notifications_key(&notification.recipient);
        let entry = serde_json::to_string(&notification.payload())
            .map_err(|e| BackendError::InvalidData(e.to_string()))?;
        let mut conn = self.conn.clone();

        let _: () = redis::pipe()
            .atomic()
            .lpush(&key, entry)
            .ignore()
            .ltrim(&key, 0, self.retain as isize - 1)
            .ignore()
            .query_async(&mut conn)
            .await?;

        Ok(())
    }

    async fn drain_all(&self, identity: &str) -> Result<Vec<Notification>, BackendError> {
        let key = notifications_key(identity);
        let mut conn = self.conn.clone();

        let (entries,): (Vec<String>,) = redis::pipe()
            .atomic()
            .lrange(&key, 0, -1)
            .del(&key)
            .ignore()
            .query_async(&mut conn)
            .await?;

        let notifications = entries
            .iter()
            .filter_map(|entry| match serde_json::from_str::<NotificationPayload>(entry) {
                Ok(payload) => Some(payload.into_notification(identity)),
                Err(e) => {
                    warn!(identity = %identity, error = %e, "Skipping malformed stored notification");
                    None
                }
            })
            .collect();

        Ok(notifications)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_layout() {
        assert_eq!(last_seen_key("alice"), "user:alice:last-seen");
        assert_eq!(room_key("general"), "room:general:users");
        assert_eq!(notifications_key("bob"), "user:bob:notifications");
    }

    #[test]
    fn test_stored_notification_shape() {
        let notification = Notification::new("alice", "Build", "passed");
        let entry = serde_json::to_string(&notification.payload()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&entry).unwrap();

        assert_eq!(value["title"], "Build");
        assert_eq!(value["message"], "passed");
        assert!(value.get("recipient").is_none());

        let restored: NotificationPayload = serde_json::from_str(&entry).unwrap();
        assert_eq!(restored.into_notification("alice"), notification);
    }
}
