//! Dealer registry and per-event dealer snapshot models.

use dealersync_core::types::{DbId, Timestamp};
use serde::Serialize;
use sqlx::FromRow;

use super::status::{StatusId, WebhookStatus};

/// A row from the `dealers` registry table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Dealer {
    pub id: DbId,
    pub dealer_bac: String,
    pub nombre_dealer: String,
    pub url_webhook: String,
    #[serde(skip_serializing)]
    pub secret_key: String,
    pub is_active: bool,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// DTO for registering (or updating) a dealer in the registry.
#[derive(Debug, Clone)]
pub struct CreateDealer {
    pub dealer_bac: String,
    pub nombre_dealer: String,
    pub url_webhook: String,
    pub secret_key: String,
    pub is_active: bool,
}

/// A row from `evento_carga_snapshot_dealers`: one dispatch target of a
/// load event, with its webhook delivery state.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct SnapshotDealer {
    pub id: DbId,
    pub evento_carga_proceso_id: DbId,
    pub dealer_bac: String,
    pub nombre_dealer: String,
    pub url_webhook: String,
    #[serde(skip_serializing)]
    pub secret_key: String,
    pub estado_webhook_id: StatusId,
    pub intentos_webhook: i32,
    pub ultimo_intento_webhook: Option<Timestamp>,
    pub ultimo_error_webhook: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl SnapshotDealer {
    /// Decoded webhook status, `None` for an unknown status ID.
    pub fn estado(&self) -> Option<WebhookStatus> {
        WebhookStatus::from_id(self.estado_webhook_id)
    }

    /// A dealer is dispatched unless it already acknowledged this event.
    pub fn is_eligible(&self) -> bool {
        self.estado() != Some(WebhookStatus::Exitoso)
    }
}

/// Outcome of one dispatch to a snapshot dealer.
#[derive(Debug, Clone)]
pub struct WebhookAttemptResult {
    pub estado: WebhookStatus,
    pub attempts: i32,
    pub error: Option<String>,
    pub attempted_at: Timestamp,
}
