//! Repository for the `sync_controls` table.
//!
//! Every status-changing statement is guarded by the expected current
//! status in its `WHERE` clause, so a transition that lost a race reports
//! `false` instead of overwriting a newer state.

use dealersync_core::sync::DispatchTally;
use dealersync_core::types::{DbId, Timestamp};
use sqlx::PgPool;

use crate::models::status::SyncStatus;
use crate::models::sync_control::{CreateSyncControl, SyncControl};

const COLUMNS: &str = "\
    id, process_type, id_carga, fecha_carga, evento_carga_proceso_id, \
    registros_carga, status_id, job_id, webhooks_totales, webhooks_procesados, \
    webhooks_fallidos, webhooks_omitidos, error_message, error_details, \
    started_at, completed_at, created_at, updated_at";

/// Provides lifecycle operations for sync attempts.
pub struct SyncControlRepo;

impl SyncControlRepo {
    /// Insert a PENDING attempt. Allocates a new load event id from
    /// `evento_carga_proceso_seq` when none is given.
    pub async fn create_pending(
        pool: &PgPool,
        input: &CreateSyncControl,
    ) -> Result<SyncControl, sqlx::Error> {
        let query = format!(
            "INSERT INTO sync_controls \
                 (process_type, id_carga, fecha_carga, registros_carga, \
                  evento_carga_proceso_id, status_id) \
             VALUES ($1, $2, $3, $4, \
                     COALESCE($5, nextval('evento_carga_proceso_seq')), $6) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, SyncControl>(&query)
            .bind(&input.process_type)
            .bind(&input.id_carga)
            .bind(input.fecha_carga)
            .bind(input.registros_carga)
            .bind(input.evento_carga_proceso_id)
            .bind(SyncStatus::Pending.id())
            .fetch_one(pool)
            .await
    }

    /// Find an attempt by ID.
    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<SyncControl>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM sync_controls WHERE id = $1");
        sqlx::query_as::<_, SyncControl>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Find the most recent attempt for a `(process_type, id_carga)` pair.
    pub async fn find_latest_for_carga(
        pool: &PgPool,
        process_type: &str,
        id_carga: &str,
    ) -> Result<Option<SyncControl>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM sync_controls \
             WHERE process_type = $1 AND id_carga = $2 \
             ORDER BY id DESC LIMIT 1"
        );
        sqlx::query_as::<_, SyncControl>(&query)
            .bind(process_type)
            .bind(id_carga)
            .fetch_optional(pool)
            .await
    }

    /// List attempts, optionally filtered by status. PENDING/RUNNING lists
    /// come back oldest first (work order); everything else newest first.
    pub async fn list(
        pool: &PgPool,
        status: Option<SyncStatus>,
        limit: i64,
    ) -> Result<Vec<SyncControl>, sqlx::Error> {
        let order = match status {
            Some(SyncStatus::Pending | SyncStatus::Running) => "ASC",
            _ => "DESC",
        };
        let query = format!(
            "SELECT {COLUMNS} FROM sync_controls \
             WHERE ($1::SMALLINT IS NULL OR status_id = $1) \
             ORDER BY id {order} LIMIT $2"
        );
        sqlx::query_as::<_, SyncControl>(&query)
            .bind(status.map(SyncStatus::id))
            .bind(limit)
            .fetch_all(pool)
            .await
    }

    /// List RUNNING attempts not updated since `cutoff`.
    pub async fn list_stale_running(
        pool: &PgPool,
        cutoff: Timestamp,
    ) -> Result<Vec<SyncControl>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM sync_controls \
             WHERE status_id = $1 AND updated_at <= $2 \
             ORDER BY id ASC"
        );
        sqlx::query_as::<_, SyncControl>(&query)
            .bind(SyncStatus::Running.id())
            .bind(cutoff)
            .fetch_all(pool)
            .await
    }

    /// PENDING -> RUNNING. Returns `false` if the attempt was not PENDING.
    pub async fn mark_running(pool: &PgPool, id: DbId, job_id: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE sync_controls SET \
                 status_id = $2, \
                 job_id = $3, \
                 started_at = NOW(), \
                 updated_at = NOW() \
             WHERE id = $1 AND status_id = $4",
        )
        .bind(id)
        .bind(SyncStatus::Running.id())
        .bind(job_id)
        .bind(SyncStatus::Pending.id())
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Overwrite the webhook counters of a RUNNING attempt.
    pub async fn update_progress(
        pool: &PgPool,
        id: DbId,
        tally: &DispatchTally,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE sync_controls SET \
                 webhooks_totales = $2, \
                 webhooks_procesados = $3, \
                 webhooks_fallidos = $4, \
                 webhooks_omitidos = $5, \
                 updated_at = NOW() \
             WHERE id = $1 AND status_id = $6",
        )
        .bind(id)
        .bind(tally.totales)
        .bind(tally.procesados)
        .bind(tally.fallidos)
        .bind(tally.omitidos)
        .bind(SyncStatus::Running.id())
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// RUNNING -> COMPLETED with final counters.
    pub async fn mark_completed(
        pool: &PgPool,
        id: DbId,
        tally: &DispatchTally,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE sync_controls SET \
                 status_id = $2, \
                 webhooks_totales = $3, \
                 webhooks_procesados = $4, \
                 webhooks_fallidos = $5, \
                 webhooks_omitidos = $6, \
                 completed_at = NOW(), \
                 updated_at = NOW() \
             WHERE id = $1 AND status_id = $7",
        )
        .bind(id)
        .bind(SyncStatus::Completed.id())
        .bind(tally.totales)
        .bind(tally.procesados)
        .bind(tally.fallidos)
        .bind(tally.omitidos)
        .bind(SyncStatus::Running.id())
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// RUNNING -> FAILED with an error message and optional details.
    pub async fn mark_failed(
        pool: &PgPool,
        id: DbId,
        message: &str,
        details: Option<&serde_json::Value>,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE sync_controls SET \
                 status_id = $2, \
                 error_message = $3, \
                 error_details = $4, \
                 completed_at = NOW(), \
                 updated_at = NOW() \
             WHERE id = $1 AND status_id = $5",
        )
        .bind(id)
        .bind(SyncStatus::Failed.id())
        .bind(message)
        .bind(details)
        .bind(SyncStatus::Running.id())
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}
