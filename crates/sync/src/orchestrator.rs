//! Lock-guarded execution of batch sync runs.
//!
//! A run moves PENDING -> RUNNING only while its process-type lock is held,
//! then to COMPLETED once every dealer has an outcome, or to FAILED on store
//! failure, cancellation, lost lock or panic. The lock is released on every
//! exit path.

use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dealersync_core::error::SyncError;
use dealersync_core::sync::{validate_id_carga, validate_process_type, validate_registros};
use dealersync_core::types::{DbId, Timestamp};
use dealersync_db::models::status::SyncStatus;
use dealersync_db::models::sync_control::{CreateSyncControl, SyncControl};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::config::SyncConfig;
use crate::delivery::WebhookError;
use crate::dispatcher::WebhookDispatcher;
use crate::lock::{DistributedLockService, LockHandle};
use crate::store::SyncStores;

/// Failure reason persisted when a run is interrupted by shutdown.
pub const REASON_SHUTDOWN: &str = "Shutdown requested";

/// Failure reason persisted when the lock could not be renewed.
pub const REASON_LOCK_LOST: &str = "Lock lost during dispatch";

/// Failure reason persisted for RUNNING attempts nobody is driving.
pub const REASON_ABANDONED: &str = "Abandoned: no progress and no active lock";

// ---------------------------------------------------------------------------
// Request / outcome types
// ---------------------------------------------------------------------------

/// Input to [`BatchSyncOrchestrator::start_batch`].
#[derive(Debug, Clone, Deserialize)]
pub struct StartBatchRequest {
    pub process_type: String,
    pub id_carga: String,
    /// Load timestamp; defaults to now.
    #[serde(default)]
    pub fecha_carga: Option<Timestamp>,
    /// Records in the load; defaults to 0.
    #[serde(default)]
    pub registros: Option<i32>,
}

/// Result of a start request. Lock contention is reported here, not as an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StartBatchOutcome {
    pub process_id: DbId,
    pub lock_acquired: bool,
    pub message: String,
}

impl StartBatchOutcome {
    fn new(process_id: DbId, lock_acquired: bool, message: &str) -> Self {
        Self {
            process_id,
            lock_acquired,
            message: message.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// BatchSyncOrchestrator
// ---------------------------------------------------------------------------

/// Top-level control loop for batch sync runs.
///
/// Runs are spawned on an internal [`TaskTracker`] and share one shutdown
/// [`CancellationToken`]; see [`BatchSyncOrchestrator::shutdown`].
pub struct BatchSyncOrchestrator {
    stores: SyncStores,
    locks: Arc<DistributedLockService>,
    dispatcher: WebhookDispatcher,
    config: SyncConfig,
    shutdown: CancellationToken,
    tracker: TaskTracker,
}

impl BatchSyncOrchestrator {
    pub fn new(
        stores: SyncStores,
        locks: Arc<DistributedLockService>,
        config: SyncConfig,
    ) -> Result<Self, WebhookError> {
        let dispatcher = WebhookDispatcher::new(stores.clone(), &config)?;
        Ok(Self {
            stores,
            locks,
            dispatcher,
            config,
            shutdown: CancellationToken::new(),
            tracker: TaskTracker::new(),
        })
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn stores(&self) -> &SyncStores {
        &self.stores
    }

    pub fn locks(&self) -> &Arc<DistributedLockService> {
        &self.locks
    }

    /// Record (or reuse) a PENDING attempt and start it if the lock is free.
    ///
    /// When the lock is busy the attempt stays PENDING and the scheduler
    /// picks it up later. An attempt that is already RUNNING is reported as
    /// such without touching the lock.
    pub async fn start_batch(
        self: &Arc<Self>,
        request: StartBatchRequest,
    ) -> Result<StartBatchOutcome, SyncError> {
        let control = self.find_or_create_attempt(&request).await?;

        if control.status() == Some(SyncStatus::Running) {
            return Ok(StartBatchOutcome::new(
                control.id,
                false,
                "Batch is already running",
            ));
        }
        if self.shutdown.is_cancelled() {
            return Ok(StartBatchOutcome::new(
                control.id,
                false,
                "Service is shutting down; batch left pending",
            ));
        }

        match self.try_lock(&control.process_type).await {
            Ok(handle) => {
                self.spawn_run(handle, control.id);
                Ok(StartBatchOutcome::new(control.id, true, "Batch sync started"))
            }
            Err(SyncError::LockBusy(_)) => Ok(StartBatchOutcome::new(
                control.id,
                false,
                "Lock busy; batch left pending",
            )),
            Err(e) => Err(e),
        }
    }

    /// Find the open attempt for `(process_type, id_carga)` or create one.
    ///
    /// A new load creates a new event and snapshots the active dealers; a
    /// load whose latest attempt is terminal gets a new attempt for the same
    /// event and keeps its snapshot.
    async fn find_or_create_attempt(
        &self,
        request: &StartBatchRequest,
    ) -> Result<SyncControl, SyncError> {
        validate_process_type(&request.process_type)?;
        validate_id_carga(&request.id_carga)?;
        let registros = request.registros.unwrap_or(0);
        validate_registros(registros)?;

        let latest = self
            .stores
            .controls
            .find_latest_for_carga(&request.process_type, &request.id_carga)
            .await?;

        let (control, new_event) = match latest {
            Some(existing) if !existing.status().is_some_and(|s| s.is_terminal()) => {
                (existing, false)
            }
            latest => {
                let input = CreateSyncControl {
                    process_type: request.process_type.clone(),
                    id_carga: request.id_carga.clone(),
                    fecha_carga: request.fecha_carga.unwrap_or_else(Utc::now),
                    registros_carga: registros,
                    evento_carga_proceso_id: latest.as_ref().map(|c| c.evento_carga_proceso_id),
                };
                match self.stores.controls.create_pending(&input).await {
                    Ok(created) => {
                        tracing::info!(
                            process_id = created.id,
                            process_type = %created.process_type,
                            id_carga = %created.id_carga,
                            evento_carga_proceso_id = created.evento_carga_proceso_id,
                            "Sync attempt created"
                        );
                        (created, latest.is_none())
                    }
                    // A concurrent request created the open attempt first.
                    Err(SyncError::Duplicate(_)) => {
                        let open = self
                            .stores
                            .controls
                            .find_latest_for_carga(&request.process_type, &request.id_carga)
                            .await?
                            .ok_or_else(|| {
                                SyncError::Unexpected(
                                    "Open attempt vanished after duplicate insert".to_string(),
                                )
                            })?;
                        (open, false)
                    }
                    Err(e) => return Err(e),
                }
            }
        };

        let needs_snapshot = new_event
            || (control.status() == Some(SyncStatus::Pending)
                && self
                    .stores
                    .dealers
                    .list_snapshot(control.evento_carga_proceso_id)
                    .await?
                    .is_empty());
        if needs_snapshot {
            let added = self
                .stores
                .dealers
                .snapshot_active(control.evento_carga_proceso_id)
                .await?;
            tracing::info!(
                evento_carga_proceso_id = control.evento_carga_proceso_id,
                dealers = added,
                "Dealer snapshot taken"
            );
        }

        Ok(control)
    }

    /// Start the oldest PENDING attempt of every process type whose lock is free.
    ///
    /// Returns the number of runs started.
    pub async fn run_pending(self: &Arc<Self>) -> Result<usize, SyncError> {
        if self.shutdown.is_cancelled() {
            return Ok(0);
        }
        let pending = self
            .stores
            .controls
            .list(Some(SyncStatus::Pending), self.config.pending_batch_limit)
            .await?;

        let mut seen = HashSet::new();
        let mut started = 0;
        for control in pending {
            if !seen.insert(control.process_type.clone()) {
                continue;
            }
            match self.try_lock(&control.process_type).await {
                Ok(handle) => {
                    self.spawn_run(handle, control.id);
                    started += 1;
                }
                Err(SyncError::LockBusy(process_type)) => {
                    tracing::debug!(
                        process_id = control.id,
                        %process_type,
                        "Lock busy; attempt left pending"
                    );
                }
                Err(e) => return Err(e),
            }
        }
        if started > 0 {
            tracing::info!(started, "Pending sync runs started");
        }
        Ok(started)
    }

    /// Fail RUNNING attempts idle for `stale_after` whose lock has expired,
    /// and queue a fresh PENDING attempt for the same event.
    ///
    /// Returns the number of attempts recovered.
    pub async fn recover_stale_runs(&self, stale_after: Duration) -> Result<usize, SyncError> {
        let stale_after = chrono::Duration::from_std(stale_after)
            .map_err(|e| SyncError::Validation(format!("Invalid stale threshold: {e}")))?;
        let cutoff = Utc::now() - stale_after;
        let stale = self.stores.controls.list_stale_running(cutoff).await?;

        let mut recovered = 0;
        for control in stale {
            match self.locks.is_lock_active(&control.process_type).await {
                Ok(false) => {}
                Ok(true) => continue,
                Err(e) => {
                    tracing::warn!(
                        process_id = control.id,
                        error = %e,
                        "Cannot check lock for stale run; skipping"
                    );
                    continue;
                }
            }

            let details = serde_json::json!({
                "job_id": control.job_id,
                "last_update": control.updated_at,
            });
            if !self
                .stores
                .controls
                .mark_failed(control.id, REASON_ABANDONED, Some(&details))
                .await?
            {
                continue;
            }
            tracing::warn!(
                process_id = control.id,
                process_type = %control.process_type,
                "Stale sync run marked FAILED"
            );

            let retry = CreateSyncControl {
                process_type: control.process_type.clone(),
                id_carga: control.id_carga.clone(),
                fecha_carga: control.fecha_carga,
                registros_carga: control.registros_carga,
                evento_carga_proceso_id: Some(control.evento_carga_proceso_id),
            };
            match self.stores.controls.create_pending(&retry).await {
                Ok(created) => {
                    tracing::info!(
                        process_id = created.id,
                        replaces = control.id,
                        "Retry attempt queued for stale run"
                    );
                }
                Err(SyncError::Duplicate(_)) => {}
                Err(e) => return Err(e),
            }
            recovered += 1;
        }
        Ok(recovered)
    }

    /// Take the lock for `process_type`.
    ///
    /// Fails with [`SyncError::LockBusy`] when another holder has it or the
    /// lock store is unreachable.
    async fn try_lock(&self, process_type: &str) -> Result<LockHandle, SyncError> {
        let busy = || SyncError::LockBusy(process_type.to_string());
        match self
            .locks
            .try_acquire_lock(process_type, self.config.lock_ttl)
            .await
        {
            Ok(handle) => handle.ok_or_else(busy),
            Err(e) => {
                tracing::warn!(
                    process_type,
                    error = %e,
                    "Lock store unavailable; treating lock as not acquired"
                );
                Err(busy())
            }
        }
    }

    fn spawn_run(self: &Arc<Self>, handle: LockHandle, process_id: DbId) {
        let this = Arc::clone(self);
        self.tracker.spawn(async move {
            if let Err(e) = this.execute(handle, process_id).await {
                tracing::error!(process_id, error = %e, "Sync run could not be finalized");
            }
        });
    }

    /// Drive one attempt to a terminal status while holding `handle`.
    ///
    /// Releases the lock before returning, whatever the outcome. Returns the
    /// status persisted; an error means the final status could not be
    /// written and the attempt is left for stale recovery.
    pub async fn execute(
        &self,
        handle: LockHandle,
        process_id: DbId,
    ) -> Result<SyncStatus, SyncError> {
        let result = match AssertUnwindSafe(self.run_locked(&handle, process_id))
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(panic) => {
                let message = panic_message(&*panic);
                tracing::error!(process_id, panic = %message, "Sync run panicked");
                let details = serde_json::json!({ "panic": message });
                self.finish_failed(process_id, "Sync run panicked", Some(&details))
                    .await
            }
        };

        match handle.release().await {
            Ok(_) => {}
            Err(e) => {
                tracing::error!(process_id, error = %e, "Failed to release lock; it will expire");
            }
        }
        result
    }

    async fn run_locked(
        &self,
        handle: &LockHandle,
        process_id: DbId,
    ) -> Result<SyncStatus, SyncError> {
        let control = self
            .stores
            .controls
            .find_by_id(process_id)
            .await?
            .ok_or(SyncError::NotFound {
                entity: "SyncControl",
                id: process_id,
            })?;

        if !self
            .stores
            .controls
            .mark_running(process_id, handle.lock_value())
            .await?
        {
            return Err(SyncError::Unexpected(format!(
                "Sync control {process_id} is not PENDING"
            )));
        }
        tracing::info!(
            process_id,
            process_type = %control.process_type,
            job_id = %handle.lock_value(),
            "Sync run started"
        );

        let run_cancel = self.shutdown.child_token();
        let heartbeat_stop = CancellationToken::new();
        let dispatch = async {
            let result = self.dispatcher.dispatch(&control, &run_cancel).await;
            heartbeat_stop.cancel();
            result
        };
        let heartbeat = self.heartbeat(handle, &run_cancel, &heartbeat_stop);
        let (dispatch_result, lock_lost) = tokio::join!(dispatch, heartbeat);

        let tally = match dispatch_result {
            Ok(tally) => tally,
            Err(e) => {
                tracing::error!(process_id, error = %e, "Dispatch aborted");
                let details = serde_json::json!({ "error": e.to_string() });
                return self
                    .finish_failed(process_id, "Dispatch aborted by a store failure", Some(&details))
                    .await;
            }
        };

        let details = serde_json::json!({ "tally": tally });
        if lock_lost {
            return self
                .finish_failed(process_id, REASON_LOCK_LOST, Some(&details))
                .await;
        }
        if run_cancel.is_cancelled() && !tally.is_complete() {
            return self
                .finish_failed(process_id, REASON_SHUTDOWN, Some(&details))
                .await;
        }

        if !self.stores.controls.mark_completed(process_id, &tally).await? {
            return Err(SyncError::Unexpected(format!(
                "Sync control {process_id} left RUNNING before completion"
            )));
        }
        tracing::info!(
            process_id,
            totales = tally.totales,
            procesados = tally.procesados,
            fallidos = tally.fallidos,
            omitidos = tally.omitidos,
            "Sync run completed"
        );
        Ok(SyncStatus::Completed)
    }

    /// Renew the lock until `stop` fires. Returns `true` if the lock was lost,
    /// after cancelling `run_cancel`.
    async fn heartbeat(
        &self,
        handle: &LockHandle,
        run_cancel: &CancellationToken,
        stop: &CancellationToken,
    ) -> bool {
        let period = self.config.lock_renew_interval.max(Duration::from_millis(1));
        let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);

        loop {
            tokio::select! {
                _ = stop.cancelled() => return false,
                _ = interval.tick() => {
                    match self
                        .locks
                        .renew_lock(handle.process_type(), handle.lock_value(), self.config.lock_ttl)
                        .await
                    {
                        Ok(true) => {
                            tracing::debug!(process_type = %handle.process_type(), "Lock renewed");
                        }
                        Ok(false) => {
                            tracing::error!(
                                process_type = %handle.process_type(),
                                "Lock lost; stopping dispatch"
                            );
                            run_cancel.cancel();
                            return true;
                        }
                        Err(e) => {
                            tracing::warn!(
                                process_type = %handle.process_type(),
                                error = %e,
                                "Lock renewal failed; retrying on next tick"
                            );
                        }
                    }
                }
            }
        }
    }

    async fn finish_failed(
        &self,
        process_id: DbId,
        message: &str,
        details: Option<&serde_json::Value>,
    ) -> Result<SyncStatus, SyncError> {
        if self
            .stores
            .controls
            .mark_failed(process_id, message, details)
            .await?
        {
            tracing::warn!(process_id, reason = message, "Sync run failed");
        }
        Ok(SyncStatus::Failed)
    }

    /// Wait until no run is in flight.
    pub async fn wait_for_idle(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        if !self.shutdown.is_cancelled() {
            self.tracker.reopen();
        }
    }

    /// Cancel in-flight runs and wait up to `grace` for them to persist
    /// their final status and release their locks.
    ///
    /// Returns `false` if runs were still active when `grace` elapsed.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        tracing::info!(in_flight = self.tracker.len(), "Stopping sync runs");
        self.shutdown.cancel();
        self.tracker.close();
        let drained = tokio::time::timeout(grace, self.tracker.wait()).await.is_ok();
        if !drained {
            tracing::warn!(
                remaining = self.tracker.len(),
                "Sync runs still active after shutdown grace period"
            );
        }
        drained
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
