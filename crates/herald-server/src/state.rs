//! Shared server state and background tasks.

use crate::config::{BusBackend, Config};
use crate::metrics;
use anyhow::{Context, Result};
use async_trait::async_trait;
use herald_core::{
    BackendError, ConnectionRegistry, EventBridge, EventBus, EventHandler, FanoutRouter,
    MemoryBus, MemoryPendingQueue, MemoryPresenceStore, MemoryRoomDirectory, PendingQueue,
    PresenceStore, PresenceTracker, RoomDirectory, Sweeper, SweeperHandle,
};
use herald_protocol::{channels, DomainEvent};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Shared server state.
pub struct AppState {
    /// Server configuration.
    pub config: Config,
    /// Live connections on this process.
    pub registry: Arc<ConnectionRegistry>,
    /// Bus publisher and subscriber.
    pub bridge: Arc<EventBridge>,
    /// Global presence.
    pub presence: Arc<PresenceTracker>,
    /// Event fan-out.
    pub router: Arc<FanoutRouter>,
    /// Room directory fed from the bus, when membership is held in memory.
    room_mirror: Option<Arc<MemoryRoomDirectory>>,
    /// Connection slots.
    slots: Arc<Semaphore>,
}

/// Stores and bus selected by `bus.backend`.
struct Backends {
    bus: Arc<dyn EventBus>,
    presence: Arc<dyn PresenceStore>,
    rooms: Arc<dyn RoomDirectory>,
    pending: Arc<dyn PendingQueue>,
    room_mirror: Option<Arc<MemoryRoomDirectory>>,
}

impl Backends {
    fn memory(config: &Config) -> Self {
        let rooms = Arc::new(MemoryRoomDirectory::new());
        Self {
            bus: Arc::new(MemoryBus::with_capacity(config.bus.capacity)),
            presence: Arc::new(MemoryPresenceStore::new()),
            rooms: rooms.clone(),
            pending: Arc::new(MemoryPendingQueue::with_retain(config.notifications.retain)),
            room_mirror: Some(rooms),
        }
    }

    #[cfg(feature = "redis")]
    async fn redis(config: &Config) -> Result<Self> {
        let backend = herald_core::RedisBackend::connect(&config.bus.redis_url)
            .await
            .context("Failed to connect to Redis")?
            .with_presence_ttl(config.presence.ttl())
            .with_retain(config.notifications.retain);
        let backend = Arc::new(backend);

        Ok(Self {
            bus: backend.clone(),
            presence: backend.clone(),
            rooms: backend.clone(),
            pending: backend,
            room_mirror: None,
        })
    }

    #[cfg(not(feature = "redis"))]
    async fn redis(_config: &Config) -> Result<Self> {
        anyhow::bail!("bus.backend = \"redis\" requires the `redis` feature")
    }
}

impl AppState {
    /// Create the state for `config`, connecting to the configured backend.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be reached.
    pub async fn build(config: Config) -> Result<Arc<Self>> {
        let backends = match config.bus.backend {
            BusBackend::Memory => Backends::memory(&config),
            BusBackend::Redis => Backends::redis(&config).await?,
        };

        info!(
            backend = ?config.bus.backend,
            codec = config.bus.codec.name(),
            "Initialized backends"
        );

        let registry = Arc::new(ConnectionRegistry::new());
        let bridge = Arc::new(EventBridge::new(backends.bus, config.bus.codec));
        let presence = Arc::new(PresenceTracker::new(
            backends.presence,
            bridge.clone(),
            config.presence.ttl(),
        ));
        let router = Arc::new(FanoutRouter::new(
            registry.clone(),
            backends.rooms,
            backends.pending,
        ));
        let slots = Arc::new(Semaphore::new(config.limits.max_connections));

        Ok(Arc::new(Self {
            config,
            registry,
            bridge,
            presence,
            router,
            room_mirror: backends.room_mirror,
            slots,
        }))
    }

    /// Subscribe to the bus and start the sweeper.
    ///
    /// # Errors
    ///
    /// Returns an error if a bus subscription is refused.
    pub async fn start(&self) -> Result<Background> {
        let mut subscriptions = Vec::new();

        if let Some(mirror) = &self.room_mirror {
            subscriptions.push(
                self.bridge
                    .subscribe(channels::ROOM, mirror.clone())
                    .await
                    .context("Failed to subscribe room directory")?,
            );
        }

        let handler: Arc<dyn EventHandler> = Arc::new(MeteredRouter(self.router.clone()));
        for channel in channels::ALL {
            let task = self
                .bridge
                .subscribe(channel, handler.clone())
                .await
                .with_context(|| format!("Failed to subscribe to {channel}"))?;
            subscriptions.push(task);
        }

        let sweeper = Sweeper::new(self.presence.clone(), self.config.presence.sweep_interval())
            .on_sweep(|expired| metrics::record_expired(expired.len()))
            .spawn();

        Ok(Background {
            subscriptions,
            sweeper,
        })
    }

    /// Reserve a connection slot, or `None` at the connection limit.
    #[must_use]
    pub fn try_acquire_slot(&self) -> Option<OwnedSemaphorePermit> {
        self.slots.clone().try_acquire_owned().ok()
    }
}

/// Routes events and records the outcome.
struct MeteredRouter(Arc<FanoutRouter>);

#[async_trait]
impl EventHandler for MeteredRouter {
    async fn handle(&self, event: DomainEvent) -> Result<(), BackendError> {
        let name = event.name();
        match self.0.route(&event).await {
            Ok(delivery) => {
                metrics::record_routed(name, delivery);
                Ok(())
            }
            Err(e) => {
                metrics::record_error("route");
                Err(e)
            }
        }
    }
}

/// Bus subscriptions and the sweeper.
pub struct Background {
    subscriptions: Vec<JoinHandle<()>>,
    sweeper: SweeperHandle,
}

impl Background {
    /// Stop every background task.
    pub async fn shutdown(self) {
        for task in &self.subscriptions {
            task.abort();
        }
        self.sweeper.shutdown().await;
        debug!("Background tasks stopped");
    }
}
