//! Repository layer.
//!
//! Each repository is a zero-sized struct providing async methods that
//! accept `&PgPool` as the first argument.

pub mod confirmation_repo;
pub mod dealer_repo;
pub mod sync_control_repo;

pub use confirmation_repo::ConfirmationRepo;
pub use dealer_repo::DealerRepo;
pub use sync_control_repo::SyncControlRepo;

/// Default page size for list queries.
pub const DEFAULT_LIMIT: i64 = 50;

/// Upper bound for list queries.
pub const MAX_LIMIT: i64 = 500;

/// Clamp a caller-supplied limit into `1..=MAX_LIMIT`.
pub fn clamp_limit(limit: Option<i64>) -> i64 {
    limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
}
