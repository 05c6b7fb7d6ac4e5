pub mod health;
pub mod sync;

use axum::Router;

use crate::state::AppState;

/// Build the `/api/v1` route tree.
///
/// Route hierarchy:
///
/// ```text
/// /sync/batches                          start (POST), list (GET)
/// /sync/batches/{id}                     get one attempt
/// /sync/batches/{id}/dealers             dealer snapshot of the attempt's event
/// /sync/batches/{id}/confirmations       confirmations of the attempt's event
/// /sync/confirmations                    submit a dealer confirmation (POST)
/// /sync/locks/{process_type}             lock status
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new().nest("/sync", sync::router())
}
