// src/supervisor/health.rs

//! Periodic liveness backstop.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::supervisor::Supervisor;

/// Background task running [`Supervisor::health_sweep`] on a fixed interval.
///
/// Sweeps run on a single task, so they never overlap. Ticks missed while a
/// sweep is running are skipped rather than bunched up.
#[derive(Debug)]
pub struct HealthMonitor {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl HealthMonitor {
    pub fn spawn(supervisor: Supervisor, period: Duration) -> Self {
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let handle = tokio::spawn(async move {
            info!(interval_ms = period.as_millis() as u64, "health monitor started");
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // First tick completes immediately; the fleet was just started.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        info!("health monitor stopping");
                        break;
                    }
                    _ = ticker.tick() => {
                        let corrected = supervisor.health_sweep();
                        debug!(corrected = corrected.len(), "health sweep done");
                    }
                }
            }
        });

        Self { cancel, handle }
    }

    /// Stop the timer and wait for an in-flight sweep to finish.
    pub async fn stop(self) {
        self.cancel.cancel();
        let _ = self.handle.await;
    }
}
