//! Query parameter types for API handlers.

use serde::Deserialize;

/// Query parameters for `GET /sync/batches` (`?status=&limit=`).
///
/// `status` is a status name (`PENDING`, `RUNNING`, ...), matched
/// case-insensitively. `limit` is clamped in the handler via `clamp_limit`.
#[derive(Debug, Default, Deserialize)]
pub struct ListBatchesParams {
    pub status: Option<String>,
    pub limit: Option<i64>,
}
