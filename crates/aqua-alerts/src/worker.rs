//! Background loops for the outbox, escalations and the auto-resolve sweep.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info, warn};

use crate::engine::AlertEngine;

/// Intervals of the background loops.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// How often to drain the outbox (in seconds).
    pub outbox_interval_secs: u64,
    /// How often to apply due escalations (in seconds).
    pub escalation_interval_secs: u64,
    /// How often to run the auto-resolve sweep (in seconds).
    pub auto_resolve_interval_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            outbox_interval_secs: 5,
            escalation_interval_secs: 30,
            auto_resolve_interval_secs: 60,
        }
    }
}

impl WorkerConfig {
    /// Returns the outbox interval.
    #[must_use]
    pub const fn outbox_interval(&self) -> Duration {
        Duration::from_secs(self.outbox_interval_secs)
    }

    /// Returns the escalation interval.
    #[must_use]
    pub const fn escalation_interval(&self) -> Duration {
        Duration::from_secs(self.escalation_interval_secs)
    }

    /// Returns the auto-resolve interval.
    #[must_use]
    pub const fn auto_resolve_interval(&self) -> Duration {
        Duration::from_secs(self.auto_resolve_interval_secs)
    }
}

/// Handles to the spawned background loops.
#[derive(Debug)]
pub struct BackgroundWorkers {
    handles: Vec<JoinHandle<()>>,
}

impl BackgroundWorkers {
    /// Spawns the three loops. They stop once `shutdown` turns true.
    #[must_use]
    pub fn spawn(
        engine: Arc<AlertEngine>,
        config: &WorkerConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        info!(
            outbox_secs = config.outbox_interval_secs,
            escalation_secs = config.escalation_interval_secs,
            auto_resolve_secs = config.auto_resolve_interval_secs,
            "Starting alert background workers"
        );

        let handles = vec![
            tokio::spawn(outbox_loop(
                Arc::clone(&engine),
                config.outbox_interval(),
                shutdown.clone(),
            )),
            tokio::spawn(escalation_loop(
                Arc::clone(&engine),
                config.escalation_interval(),
                shutdown.clone(),
            )),
            tokio::spawn(auto_resolve_loop(
                engine,
                config.auto_resolve_interval(),
                shutdown,
            )),
        ];
        Self { handles }
    }

    /// Waits for every loop to finish.
    pub async fn join(self) {
        for handle in self.handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "background worker panicked");
            }
        }
    }
}

fn ticker(period: Duration) -> tokio::time::Interval {
    let mut ticker = interval(period.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

async fn outbox_loop(engine: Arc<AlertEngine>, period: Duration, mut shutdown: watch::Receiver<bool>) {
    let signal = engine.outbox_signal();
    let mut ticker = ticker(period);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            () = signal.notified() => {}
            changed = shutdown.changed() => {
                // A dropped sender also stops the worker.
                if changed.is_err() || *shutdown.borrow() {
                    info!("outbox worker shutting down");
                    break;
                }
                continue;
            }
        }

        match engine.drain_outbox().await {
            Ok(report) if report.processed > 0 => {
                debug!(processed = report.processed, "outbox drain finished");
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "failed to drain outbox"),
        }
    }
}

async fn escalation_loop(
    engine: Arc<AlertEngine>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = ticker(period);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = engine.process_due_escalations().await {
                    warn!(error = %e, "failed to process escalations");
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    info!("escalation worker shutting down");
                    break;
                }
            }
        }
    }
}

async fn auto_resolve_loop(
    engine: Arc<AlertEngine>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = ticker(period);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = engine.process_auto_resolve_alerts().await {
                    warn!(error = %e, "auto-resolve sweep failed");
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    info!("auto-resolve worker shutting down");
                    break;
                }
            }
        }
    }
}
