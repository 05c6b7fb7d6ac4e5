//! Periodic recovery loop for sync runs.
//!
//! [`SyncScheduler`] runs as a background task started at boot. Every tick
//! it fails stale RUNNING attempts (queuing a retry for their event) and
//! then starts PENDING attempts whose lock is free, which covers batches
//! that found their lock busy when requested.

use std::sync::Arc;

use dealersync_core::error::SyncError;
use tokio_util::sync::CancellationToken;

use crate::orchestrator::BatchSyncOrchestrator;

/// Background service driving stale recovery and pending retries.
pub struct SyncScheduler {
    orchestrator: Arc<BatchSyncOrchestrator>,
}

/// What one scheduler tick did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickSummary {
    pub recovered: usize,
    pub started: usize,
}

impl SyncScheduler {
    pub fn new(orchestrator: Arc<BatchSyncOrchestrator>) -> Self {
        Self { orchestrator }
    }

    /// Run the scheduler loop until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.orchestrator.config().scheduler_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        tracing::info!(
            interval_secs = self.orchestrator.config().scheduler_interval.as_secs(),
            "Sync scheduler started"
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Sync scheduler cancelled");
                    break;
                }
                _ = interval.tick() => {
                    if let Err(e) = self.tick().await {
                        tracing::error!(error = %e, "Sync scheduler tick failed");
                    }
                }
            }
        }
    }

    /// One pass: recover stale runs, then start pending ones.
    pub async fn tick(&self) -> Result<TickSummary, SyncError> {
        let recovered = self
            .orchestrator
            .recover_stale_runs(self.orchestrator.config().stale_run_after)
            .await?;
        let started = self.orchestrator.run_pending().await?;
        if recovered > 0 || started > 0 {
            tracing::info!(recovered, started, "Sync scheduler tick");
        }
        Ok(TickSummary { recovered, started })
    }
}
