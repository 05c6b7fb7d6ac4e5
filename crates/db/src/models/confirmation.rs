//! Dealer confirmation records (`sinc_carga_proceso_dealers`).

use dealersync_core::types::{DbId, Timestamp};
use serde::Serialize;
use sqlx::FromRow;

/// A row from `sinc_carga_proceso_dealers`. Immutable once written.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct SincCargaProcesoDealer {
    pub id: DbId,
    pub evento_carga_proceso_id: DbId,
    pub dealer_bac: String,
    pub fecha_sincronizacion: Timestamp,
    pub registros_sincronizados: i32,
    pub token_confirmacion: String,
    pub created_at: Timestamp,
}

/// DTO for inserting a confirmation record.
#[derive(Debug, Clone)]
pub struct CreateConfirmation {
    pub evento_carga_proceso_id: DbId,
    pub dealer_bac: String,
    pub fecha_sincronizacion: Timestamp,
    pub registros_sincronizados: i32,
    pub token_confirmacion: String,
}
