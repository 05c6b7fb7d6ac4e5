use crate::types::DbId;

/// Closed set of failures a sync operation can report.
///
/// Per-dealer delivery failures never surface here; they are recorded on the
/// dealer row and counted. Everything in this enum is either a caller error
/// or fatal to the operation that raised it.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: &'static str, id: DbId },

    #[error("Duplicate: {0}")]
    Duplicate(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Data access error: {0}")]
    DataAccess(String),

    #[error("Lock busy for process type {0}")]
    LockBusy(String),

    #[error("Unexpected error: {0}")]
    Unexpected(String),
}
