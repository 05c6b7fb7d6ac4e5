use std::sync::Arc;

use dealersync_sync::store::SyncStores;
use dealersync_sync::{BatchSyncOrchestrator, DistributedLockService};

use crate::config::ServerConfig;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// This is cheaply cloneable (inner data is behind `Arc`).
#[derive(Clone)]
pub struct AppState {
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// Runs batches and owns the stores and lock service.
    pub orchestrator: Arc<BatchSyncOrchestrator>,
}

impl AppState {
    pub fn stores(&self) -> &SyncStores {
        self.orchestrator.stores()
    }

    pub fn locks(&self) -> &Arc<DistributedLockService> {
        self.orchestrator.locks()
    }
}
