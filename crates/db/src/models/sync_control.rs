//! Sync control models: one row per batch sync attempt.

use dealersync_core::sync::DispatchTally;
use dealersync_core::types::{DbId, Timestamp};
use serde::Serialize;
use sqlx::FromRow;

use super::status::{StatusId, SyncStatus};

/// A row from the `sync_controls` table.
///
/// Several rows may share one `evento_carga_proceso_id`: each retry of a
/// load event is a new attempt row so that status transitions stay
/// monotonic per row.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct SyncControl {
    pub id: DbId,
    pub process_type: String,
    pub id_carga: String,
    pub fecha_carga: Timestamp,
    pub evento_carga_proceso_id: DbId,
    pub registros_carga: i32,
    pub status_id: StatusId,
    pub job_id: Option<String>,
    pub webhooks_totales: i32,
    pub webhooks_procesados: i32,
    pub webhooks_fallidos: i32,
    pub webhooks_omitidos: i32,
    pub error_message: Option<String>,
    pub error_details: Option<serde_json::Value>,
    pub started_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl SyncControl {
    /// Decoded lifecycle status, `None` for an unknown status ID.
    pub fn status(&self) -> Option<SyncStatus> {
        SyncStatus::from_id(self.status_id)
    }

    /// Current webhook counters.
    pub fn tally(&self) -> DispatchTally {
        DispatchTally {
            totales: self.webhooks_totales,
            procesados: self.webhooks_procesados,
            fallidos: self.webhooks_fallidos,
            omitidos: self.webhooks_omitidos,
        }
    }
}

/// DTO for creating a PENDING attempt.
///
/// When `evento_carga_proceso_id` is `None` a new load event id is allocated.
#[derive(Debug, Clone)]
pub struct CreateSyncControl {
    pub process_type: String,
    pub id_carga: String,
    pub fecha_carga: Timestamp,
    pub registros_carga: i32,
    pub evento_carga_proceso_id: Option<DbId>,
}
