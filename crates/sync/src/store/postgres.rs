//! Postgres adapter over the `dealersync-db` repositories.

use async_trait::async_trait;
use dealersync_core::error::SyncError;
use dealersync_core::sync::DispatchTally;
use dealersync_core::types::{DbId, Timestamp};
use dealersync_db::models::confirmation::{CreateConfirmation, SincCargaProcesoDealer};
use dealersync_db::models::dealer::{CreateDealer, Dealer, SnapshotDealer, WebhookAttemptResult};
use dealersync_db::models::status::SyncStatus;
use dealersync_db::models::sync_control::{CreateSyncControl, SyncControl};
use dealersync_db::repositories::{ConfirmationRepo, DealerRepo, SyncControlRepo};
use dealersync_db::DbPool;

use super::{ConfirmationStore, DealerStore, SyncControlStore};

/// Implements every store port against one connection pool.
pub struct PgSyncStore {
    pool: DbPool,
}

impl PgSyncStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

/// Classify a sqlx error into a [`SyncError`].
///
/// - Unique violations (SQLSTATE 23505) on a constraint named `uq_*` map to
///   `Duplicate`.
/// - Everything else maps to `DataAccess`.
pub fn classify_sqlx_error(err: sqlx::Error) -> SyncError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.code().as_deref() == Some("23505") {
            let constraint = db_err.constraint().unwrap_or("unknown");
            if constraint.starts_with("uq_") {
                return SyncError::Duplicate(format!(
                    "Duplicate value violates unique constraint: {constraint}"
                ));
            }
        }
    }
    tracing::error!(error = %err, "Database error");
    SyncError::DataAccess(err.to_string())
}

#[async_trait]
impl SyncControlStore for PgSyncStore {
    async fn create_pending(&self, input: &CreateSyncControl) -> Result<SyncControl, SyncError> {
        SyncControlRepo::create_pending(&self.pool, input)
            .await
            .map_err(classify_sqlx_error)
    }

    async fn find_by_id(&self, id: DbId) -> Result<Option<SyncControl>, SyncError> {
        SyncControlRepo::find_by_id(&self.pool, id)
            .await
            .map_err(classify_sqlx_error)
    }

    async fn find_latest_for_carga(
        &self,
        process_type: &str,
        id_carga: &str,
    ) -> Result<Option<SyncControl>, SyncError> {
        SyncControlRepo::find_latest_for_carga(&self.pool, process_type, id_carga)
            .await
            .map_err(classify_sqlx_error)
    }

    async fn list(
        &self,
        status: Option<SyncStatus>,
        limit: i64,
    ) -> Result<Vec<SyncControl>, SyncError> {
        SyncControlRepo::list(&self.pool, status, limit)
            .await
            .map_err(classify_sqlx_error)
    }

    async fn list_stale_running(&self, cutoff: Timestamp) -> Result<Vec<SyncControl>, SyncError> {
        SyncControlRepo::list_stale_running(&self.pool, cutoff)
            .await
            .map_err(classify_sqlx_error)
    }

    async fn mark_running(&self, id: DbId, job_id: &str) -> Result<bool, SyncError> {
        SyncControlRepo::mark_running(&self.pool, id, job_id)
            .await
            .map_err(classify_sqlx_error)
    }

    async fn update_progress(&self, id: DbId, tally: &DispatchTally) -> Result<bool, SyncError> {
        SyncControlRepo::update_progress(&self.pool, id, tally)
            .await
            .map_err(classify_sqlx_error)
    }

    async fn mark_completed(&self, id: DbId, tally: &DispatchTally) -> Result<bool, SyncError> {
        SyncControlRepo::mark_completed(&self.pool, id, tally)
            .await
            .map_err(classify_sqlx_error)
    }

    async fn mark_failed(
        &self,
        id: DbId,
        message: &str,
        details: Option<&serde_json::Value>,
    ) -> Result<bool, SyncError> {
        SyncControlRepo::mark_failed(&self.pool, id, message, details)
            .await
            .map_err(classify_sqlx_error)
    }

    async fn ping(&self) -> Result<(), SyncError> {
        dealersync_db::health_check(&self.pool)
            .await
            .map_err(classify_sqlx_error)
    }
}

#[async_trait]
impl DealerStore for PgSyncStore {
    async fn register_dealer(&self, input: &CreateDealer) -> Result<Dealer, SyncError> {
        DealerRepo::upsert(&self.pool, input)
            .await
            .map_err(classify_sqlx_error)
    }

    async fn snapshot_active(&self, evento_id: DbId) -> Result<u64, SyncError> {
        DealerRepo::snapshot_active(&self.pool, evento_id)
            .await
            .map_err(classify_sqlx_error)
    }

    async fn list_snapshot(&self, evento_id: DbId) -> Result<Vec<SnapshotDealer>, SyncError> {
        DealerRepo::list_snapshot(&self.pool, evento_id)
            .await
            .map_err(classify_sqlx_error)
    }

    async fn record_webhook_result(
        &self,
        evento_id: DbId,
        dealer_bac: &str,
        result: &WebhookAttemptResult,
    ) -> Result<bool, SyncError> {
        DealerRepo::record_webhook_result(&self.pool, evento_id, dealer_bac, result)
            .await
            .map_err(classify_sqlx_error)
    }
}

#[async_trait]
impl ConfirmationStore for PgSyncStore {
    async fn insert_confirmation(
        &self,
        input: &CreateConfirmation,
    ) -> Result<SincCargaProcesoDealer, SyncError> {
        ConfirmationRepo::create(&self.pool, input)
            .await
            .map_err(classify_sqlx_error)
    }

    async fn list_confirmations(
        &self,
        evento_id: DbId,
    ) -> Result<Vec<SincCargaProcesoDealer>, SyncError> {
        ConfirmationRepo::list_for_evento(&self.pool, evento_id)
            .await
            .map_err(classify_sqlx_error)
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn row_not_found_is_data_access() {
        assert_matches!(
            classify_sqlx_error(sqlx::Error::RowNotFound),
            SyncError::DataAccess(_)
        );
    }

    #[test]
    fn pool_timeout_is_data_access() {
        assert_matches!(
            classify_sqlx_error(sqlx::Error::PoolTimedOut),
            SyncError::DataAccess(_)
        );
    }
}
