//! Liveness sweeper.
//!
//! Runs [`PresenceTracker::sweep`] on a fixed cadence in a single task, so two
//! sweeps never overlap. Ticks missed while a sweep is still running are
//! skipped. A failed sweep is logged and retried on the next tick.

use crate::presence::PresenceTracker;
use herald_protocol::Identity;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace, warn};

/// Callback invoked with the identities expired by each sweep.
pub type SweepHook = Box<dyn Fn(&[Identity]) + Send + Sync>;

/// Periodic presence expiry.
pub struct Sweeper {
    tracker: Arc<PresenceTracker>,
    interval: Duration,
    on_sweep: Option<SweepHook>,
}

impl Sweeper {
    /// Create a sweeper running every `interval`.
    #[must_use]
    pub fn new(tracker: Arc<PresenceTracker>, interval: Duration) -> Self {
        Self {
            tracker,
            interval,
            on_sweep: None,
        }
    }

    /// Call `hook` after every successful sweep.
    #[must_use]
    pub fn on_sweep(mut self, hook: impl Fn(&[Identity]) + Send + Sync + 'static) -> Self {
        self.on_sweep = Some(Box::new(hook));
        self
    }

    /// Start sweeping in a background task.
    #[must_use]
    pub fn spawn(self) -> SweeperHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        info!(
            interval_ms = self.interval.as_millis() as u64,
            ttl_ms = self.tracker.ttl().as_millis() as u64,
            "Starting presence sweeper"
        );

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick() => self.run_once().await,
                    _ = shutdown_rx.changed() => break,
                }
            }

            debug!("Presence sweeper stopped");
        });

        SweeperHandle {
            shutdown: shutdown_tx,
            task,
        }
    }

    async fn run_once(&self) {
        match self.tracker.sweep().await {
            Ok(expired) => {
                if expired.is_empty() {
                    trace!("Presence sweep found nothing to expire");
                } else {
                    info!(expired = expired.len(), "Presence sweep expired identities");
                }
                if let Some(hook) = &self.on_sweep {
                    hook(&expired);
                }
            }
            Err(e) => warn!(error = %e, "Presence sweep skipped"),
        }
    }
}

/// Handle to a running sweeper.
pub struct SweeperHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SweeperHandle {
    /// Stop the sweeper and wait for its task to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        let _ = self.task.await;
    }
}
