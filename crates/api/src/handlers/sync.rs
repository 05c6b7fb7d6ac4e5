//! Handlers for triggering and observing batch sync runs.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use chrono::{SubsecRound, Utc};
use dealersync_core::error::SyncError;
use dealersync_core::hashing::generate_token_confirmacion;
use dealersync_core::sync::{
    validate_dealer_bac, validate_id_carga, validate_process_type, validate_registros,
};
use dealersync_core::types::{DbId, Timestamp};
use dealersync_db::models::confirmation::CreateConfirmation;
use dealersync_db::models::dealer::WebhookAttemptResult;
use dealersync_db::models::status::{SyncStatus, WebhookStatus};
use dealersync_db::models::sync_control::SyncControl;
use dealersync_db::repositories::clamp_limit;
use dealersync_sync::StartBatchRequest;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};
use crate::query::ListBatchesParams;
use crate::response::DataResponse;
use crate::state::AppState;

/// Body of `POST /sync/confirmations`.
#[derive(Debug, Deserialize)]
pub struct SubmitConfirmation {
    pub evento_carga_proceso_id: DbId,
    pub dealer_bac: String,
    pub proceso: String,
    pub id_carga: String,
    pub fecha_sincronizacion: Timestamp,
    pub registros_sincronizados: i32,
}

/// Lock status payload.
#[derive(Debug, Serialize)]
pub struct LockStatus {
    pub process_type: String,
    pub active: bool,
}

async fn load_batch(state: &AppState, id: DbId) -> AppResult<SyncControl> {
    state
        .stores()
        .controls
        .find_by_id(id)
        .await?
        .ok_or(AppError::Sync(SyncError::NotFound {
            entity: "SyncControl",
            id,
        }))
}

/// POST /api/v1/sync/batches
///
/// Record a batch sync attempt and start it if the process-type lock is free.
/// Always 202: a busy lock leaves the attempt PENDING for the scheduler.
pub async fn start_batch(
    State(state): State<AppState>,
    Json(input): Json<StartBatchRequest>,
) -> AppResult<impl IntoResponse> {
    let outcome = state.orchestrator.start_batch(input).await?;

    tracing::info!(
        process_id = outcome.process_id,
        lock_acquired = outcome.lock_acquired,
        "Batch sync requested"
    );

    Ok((StatusCode::ACCEPTED, Json(DataResponse { data: outcome })))
}

/// GET /api/v1/sync/batches?status=&limit=
pub async fn list_batches(
    State(state): State<AppState>,
    Query(params): Query<ListBatchesParams>,
) -> AppResult<impl IntoResponse> {
    let status = params
        .status
        .as_deref()
        .map(|name| {
            SyncStatus::from_name(name)
                .ok_or_else(|| AppError::BadRequest(format!("Unknown status: {name}")))
        })
        .transpose()?;

    let batches = state
        .stores()
        .controls
        .list(status, clamp_limit(params.limit))
        .await?;
    Ok(Json(DataResponse { data: batches }))
}

/// GET /api/v1/sync/batches/{id}
pub async fn get_batch(
    State(state): State<AppState>,
    Path(id): Path<DbId>,
) -> AppResult<impl IntoResponse> {
    let batch = load_batch(&state, id).await?;
    Ok(Json(DataResponse { data: batch }))
}

/// GET /api/v1/sync/batches/{id}/dealers
///
/// Dealer snapshot of the attempt's event with per-dealer webhook state.
pub async fn list_batch_dealers(
    State(state): State<AppState>,
    Path(id): Path<DbId>,
) -> AppResult<impl IntoResponse> {
    let batch = load_batch(&state, id).await?;
    let dealers = state
        .stores()
        .dealers
        .list_snapshot(batch.evento_carga_proceso_id)
        .await?;
    Ok(Json(DataResponse { data: dealers }))
}

/// GET /api/v1/sync/batches/{id}/confirmations
pub async fn list_batch_confirmations(
    State(state): State<AppState>,
    Path(id): Path<DbId>,
) -> AppResult<impl IntoResponse> {
    let batch = load_batch(&state, id).await?;
    let confirmations = state
        .stores()
        .confirmations
        .list_confirmations(batch.evento_carga_proceso_id)
        .await?;
    Ok(Json(DataResponse { data: confirmations }))
}

/// POST /api/v1/sync/confirmations
///
/// Record a confirmation reported by a dealer outside the webhook ack. The
/// token is computed server-side. A second submission for the same event
/// and dealer is rejected with 409.
pub async fn submit_confirmation(
    State(state): State<AppState>,
    Json(input): Json<SubmitConfirmation>,
) -> AppResult<impl IntoResponse> {
    validate_dealer_bac(&input.dealer_bac)?;
    validate_process_type(&input.proceso)?;
    validate_id_carga(&input.id_carga)?;
    validate_registros(input.registros_sincronizados)?;

    let fecha_sincronizacion = input.fecha_sincronizacion.trunc_subsecs(0);
    let token = generate_token_confirmacion(
        &input.id_carga,
        &input.dealer_bac,
        &input.proceso,
        &fecha_sincronizacion,
        input.registros_sincronizados,
    );

    let confirmation = state
        .stores()
        .confirmations
        .insert_confirmation(&CreateConfirmation {
            evento_carga_proceso_id: input.evento_carga_proceso_id,
            dealer_bac: input.dealer_bac.clone(),
            fecha_sincronizacion,
            registros_sincronizados: input.registros_sincronizados,
            token_confirmacion: token,
        })
        .await?;

    // A confirmed dealer must not be dispatched again for this event.
    state
        .stores()
        .dealers
        .record_webhook_result(
            input.evento_carga_proceso_id,
            &input.dealer_bac,
            &WebhookAttemptResult {
                estado: WebhookStatus::Exitoso,
                attempts: 0,
                error: None,
                attempted_at: Utc::now(),
            },
        )
        .await?;

    tracing::info!(
        evento_carga_proceso_id = confirmation.evento_carga_proceso_id,
        dealer_bac = %confirmation.dealer_bac,
        "Dealer confirmation recorded"
    );

    Ok((StatusCode::CREATED, Json(DataResponse { data: confirmation })))
}

/// GET /api/v1/sync/locks/{process_type}
pub async fn lock_status(
    State(state): State<AppState>,
    Path(process_type): Path<String>,
) -> AppResult<impl IntoResponse> {
    validate_process_type(&process_type)?;
    let active = state
        .locks()
        .is_lock_active(&process_type)
        .await
        .map_err(|e| AppError::InternalError(e.to_string()))?;
    Ok(Json(DataResponse {
        data: LockStatus {
            process_type,
            active,
        },
    }))
}
