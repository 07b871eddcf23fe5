//! Schedule-driven reconciliation loop.
//!
//! Arms a timer for the configured wall time, runs one reconciliation per
//! firing through the single-flight gate, then re-arms from the then-current
//! instant. A firing that cannot take the gate skips its tick; it never
//! queues behind the run in flight.

use std::sync::Arc;

use chrono_tz::Tz;
use tracing::{error, info, warn};

use fsyncd_engine::{CancelToken, ScheduleClock, SyncError, SyncGate};

use crate::config::SyncConfig;
use crate::drivers::ConfigSource;

pub struct SyncScheduler {
    source: Arc<dyn ConfigSource>,
    gate: Arc<SyncGate>,
    tz: Tz,
}

impl SyncScheduler {
    pub fn new(source: Arc<dyn ConfigSource>, gate: Arc<SyncGate>, tz: Tz) -> Self {
        Self { source, gate, tz }
    }

    /// Run until the token is cancelled. `initial` must already be
    /// validated; updates picked up from the driver replace it after each
    /// tick, and a driver that stops loading keeps the last good
    /// configuration in effect.
    pub async fn run(
        &self,
        initial: SyncConfig,
        cancel: CancelToken,
    ) -> Result<(), SyncError> {
        let mut config = initial;

        loop {
            let wall_time = config
                .wall_time()
                .map_err(|e| SyncError::InvalidSyncTime(e.to_string()))?;
            let clock = ScheduleClock::new(wall_time, self.tz);
            let interval = clock.next_interval()?;
            info!(next_sync_in = ?interval, sync_time = %wall_time, "scheduler armed");

            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("scheduler stopped");
                    return Ok(());
                }
                _ = tokio::time::sleep(interval) => {}
            }

            match self.gate.acquire() {
                Some(_guard) => {
                    match fsyncd_engine::reconcile(
                        &config.src_path,
                        &config.dst_path,
                        config.max_diff_percent,
                        &cancel,
                    )
                    .await
                    {
                        Ok(()) => {
                            info!(stage = "synchronized", state = "success", "scheduled reconciliation finished");
                        }
                        Err(err @ SyncError::TooLargeDifference { .. }) => {
                            warn!(error = %err, "trees differ too much; reconciliation abandoned until next tick");
                        }
                        Err(SyncError::Cancelled) => {
                            info!("reconciliation cancelled; scheduler stopped");
                            return Ok(());
                        }
                        Err(err) if err.is_fatal() => return Err(err),
                        Err(err) => {
                            error!(error = %err, "scheduled reconciliation failed; waiting for next tick");
                        }
                    }
                }
                None => {
                    warn!("previous reconciliation still in flight; skipping tick");
                }
            }

            // pick up operator updates for the next tick
            match self.source.load().await {
                Ok(next) => config = next,
                Err(e) => {
                    warn!(error = %e, "failed to reload sync configuration; keeping previous");
                }
            }
        }
    }
}
