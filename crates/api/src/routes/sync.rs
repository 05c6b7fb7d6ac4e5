use axum::routing::{get, post};
use axum::Router;

use crate::handlers::sync;
use crate::state::AppState;

/// Routes mounted at `/api/v1/sync`.
pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/batches",
            post(sync::start_batch).get(sync::list_batches),
        )
        .route("/batches/{id}", get(sync::get_batch))
        .route("/batches/{id}/dealers", get(sync::list_batch_dealers))
        .route(
            "/batches/{id}/confirmations",
            get(sync::list_batch_confirmations),
        )
        .route("/confirmations", post(sync::submit_confirmation))
        .route("/locks/{process_type}", get(sync::lock_status))
}
