//! Persistence ports consumed by the orchestrator and dispatcher.
//!
//! [`postgres`] adapts the `dealersync-db` repositories; [`memory`] keeps
//! everything in process for single-node runs and tests. Both enforce the
//! same guarded transitions and uniqueness rules.

pub mod memory;
pub mod postgres;

use std::sync::Arc;

use async_trait::async_trait;
use dealersync_core::error::SyncError;
use dealersync_core::sync::DispatchTally;
use dealersync_core::types::{DbId, Timestamp};
use dealersync_db::models::confirmation::{CreateConfirmation, SincCargaProcesoDealer};
use dealersync_db::models::dealer::{CreateDealer, Dealer, SnapshotDealer, WebhookAttemptResult};
use dealersync_db::models::status::SyncStatus;
use dealersync_db::models::sync_control::{CreateSyncControl, SyncControl};

pub use memory::InMemorySyncStore;
pub use postgres::PgSyncStore;

/// Run-state persistence. Transition methods return `false` when the row
/// was not in the expected source status.
#[async_trait]
pub trait SyncControlStore: Send + Sync {
    async fn create_pending(&self, input: &CreateSyncControl) -> Result<SyncControl, SyncError>;

    async fn find_by_id(&self, id: DbId) -> Result<Option<SyncControl>, SyncError>;

    async fn find_latest_for_carga(
        &self,
        process_type: &str,
        id_carga: &str,
    ) -> Result<Option<SyncControl>, SyncError>;

    async fn list(
        &self,
        status: Option<SyncStatus>,
        limit: i64,
    ) -> Result<Vec<SyncControl>, SyncError>;

    async fn list_stale_running(&self, cutoff: Timestamp) -> Result<Vec<SyncControl>, SyncError>;

    /// PENDING -> RUNNING, recording the lock owner token as job id.
    async fn mark_running(&self, id: DbId, job_id: &str) -> Result<bool, SyncError>;

    /// Overwrite the counters of a RUNNING attempt.
    async fn update_progress(&self, id: DbId, tally: &DispatchTally) -> Result<bool, SyncError>;

    /// RUNNING -> COMPLETED with final counters.
    async fn mark_completed(&self, id: DbId, tally: &DispatchTally) -> Result<bool, SyncError>;

    /// RUNNING -> FAILED.
    async fn mark_failed(
        &self,
        id: DbId,
        message: &str,
        details: Option<&serde_json::Value>,
    ) -> Result<bool, SyncError>;

    /// Cheap reachability check.
    async fn ping(&self) -> Result<(), SyncError>;
}

/// Dealer registry and per-event snapshot persistence.
#[async_trait]
pub trait DealerStore: Send + Sync {
    async fn register_dealer(&self, input: &CreateDealer) -> Result<Dealer, SyncError>;

    /// Copy active registry dealers into the event snapshot, leaving existing
    /// snapshot rows untouched. Returns the number of rows added.
    async fn snapshot_active(&self, evento_id: DbId) -> Result<u64, SyncError>;

    async fn list_snapshot(&self, evento_id: DbId) -> Result<Vec<SnapshotDealer>, SyncError>;

    /// Record a delivery outcome on a snapshot row. Returns `false` when the
    /// row is missing or already EXITOSO and `result` is not a success.
    async fn record_webhook_result(
        &self,
        evento_id: DbId,
        dealer_bac: &str,
        result: &WebhookAttemptResult,
    ) -> Result<bool, SyncError>;
}

/// Confirmation record persistence. Inserting a second row for the same
/// `(evento_carga_proceso_id, dealer_bac)` fails with [`SyncError::Duplicate`].
#[async_trait]
pub trait ConfirmationStore: Send + Sync {
    async fn insert_confirmation(
        &self,
        input: &CreateConfirmation,
    ) -> Result<SincCargaProcesoDealer, SyncError>;

    async fn list_confirmations(
        &self,
        evento_id: DbId,
    ) -> Result<Vec<SincCargaProcesoDealer>, SyncError>;
}

/// The three stores a sync run needs, as shared trait objects.
#[derive(Clone)]
pub struct SyncStores {
    pub controls: Arc<dyn SyncControlStore>,
    pub dealers: Arc<dyn DealerStore>,
    pub confirmations: Arc<dyn ConfirmationStore>,
}

impl SyncStores {
    /// Stores backed by Postgres.
    pub fn postgres(pool: dealersync_db::DbPool) -> Self {
        let store = Arc::new(PgSyncStore::new(pool));
        Self {
            controls: store.clone(),
            dealers: store.clone(),
            confirmations: store,
        }
    }

    /// Stores backed by one shared in-memory store.
    pub fn in_memory(store: Arc<InMemorySyncStore>) -> Self {
        Self {
            controls: store.clone(),
            dealers: store.clone(),
            confirmations: store,
        }
    }
}
