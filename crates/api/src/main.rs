use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use dealersync_api::config::ServerConfig;
use dealersync_api::router::build_app_router;
use dealersync_api::state::AppState;
use dealersync_sync::lock::RedisLockBackend;
use dealersync_sync::store::{InMemorySyncStore, SyncStores};
use dealersync_sync::{BatchSyncOrchestrator, DistributedLockService, SyncConfig, SyncScheduler};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "dealersync_api=debug,dealersync_sync=debug,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = ServerConfig::from_env();
    let sync_config = SyncConfig::from_env();
    tracing::info!(host = %config.host, port = %config.port, "Loaded server configuration");

    // --- Stores ---
    let stores = match &config.database_url {
        Some(database_url) => {
            let pool = dealersync_db::create_pool(database_url)
                .await
                .expect("Failed to connect to database");
            tracing::info!("Database connection pool created");

            dealersync_db::health_check(&pool)
                .await
                .expect("Database health check failed");
            tracing::info!("Database health check passed");

            dealersync_db::run_migrations(&pool)
                .await
                .expect("Failed to run database migrations");
            tracing::info!("Database migrations applied");

            SyncStores::postgres(pool)
        }
        None => {
            tracing::warn!("DATABASE_URL not set; sync state is kept in memory");
            SyncStores::in_memory(Arc::new(InMemorySyncStore::new()))
        }
    };

    // --- Locks ---
    let locks = match &config.redis_url {
        Some(redis_url) => {
            let backend = RedisLockBackend::connect(redis_url)
                .await
                .expect("Failed to connect to Redis");
            tracing::info!("Redis lock backend connected");
            DistributedLockService::new(Arc::new(backend))
        }
        None => {
            tracing::warn!("REDIS_URL not set; locks are process-local");
            DistributedLockService::in_memory()
        }
    };

    // --- Orchestrator ---
    let orchestrator = Arc::new(
        BatchSyncOrchestrator::new(stores, Arc::new(locks), sync_config)
            .expect("Failed to build webhook client"),
    );

    // Spawn sync scheduler (stale recovery and pending retries).
    let scheduler_cancel = CancellationToken::new();
    let scheduler = SyncScheduler::new(Arc::clone(&orchestrator));
    let scheduler_cancel_clone = scheduler_cancel.clone();
    let scheduler_handle = tokio::spawn(async move {
        scheduler.run(scheduler_cancel_clone).await;
    });

    // --- App state ---
    let state = AppState {
        config: Arc::new(config.clone()),
        orchestrator: Arc::clone(&orchestrator),
    };

    let app = build_app_router(state);

    // --- Start server ---
    let addr = SocketAddr::new(
        config.host.parse().expect("Invalid HOST address"),
        config.port,
    );
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, cleaning up");

    scheduler_cancel.cancel();
    let _ = tokio::time::timeout(Duration::from_secs(5), scheduler_handle).await;
    tracing::info!("Sync scheduler stopped");

    let drained = orchestrator
        .shutdown(Duration::from_secs(config.shutdown_timeout_secs))
        .await;
    tracing::info!(drained, "Sync runs stopped");

    tracing::info!("Graceful shutdown complete");
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
