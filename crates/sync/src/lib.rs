//! Lock-guarded batch synchronization of dealer webhooks.
//!
//! This crate provides the building blocks of a sync run:
//!
//! - [`lock`] — [`DistributedLockService`] with Redis and in-process backends.
//! - [`store`] — persistence ports for runs, dealers and confirmations, with
//!   Postgres and in-memory adapters.
//! - [`delivery`] — signed HTTP webhook delivery with retry.
//! - [`WebhookDispatcher`] — fans a run out to its dealers.
//! - [`BatchSyncOrchestrator`] — lock, dispatch, persist, release.
//! - [`SyncScheduler`] — periodic recovery of stale and pending runs.

pub mod config;
pub mod delivery;
pub mod dispatcher;
pub mod lock;
pub mod orchestrator;
pub mod scheduler;
pub mod store;

pub use config::SyncConfig;
pub use dispatcher::WebhookDispatcher;
pub use lock::{DistributedLockService, LockError, LockHandle};
pub use orchestrator::{BatchSyncOrchestrator, StartBatchOutcome, StartBatchRequest};
pub use scheduler::{SyncScheduler, TickSummary};
pub use store::SyncStores;
