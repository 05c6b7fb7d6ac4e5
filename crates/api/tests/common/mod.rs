#![allow(dead_code)]

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Method, Request};
use axum::response::Response;
use axum::Router;
use http_body_util::BodyExt;
use tower::ServiceExt;

use dealersync_api::config::ServerConfig;
use dealersync_api::router::build_app_router;
use dealersync_api::state::AppState;
use dealersync_sync::store::{InMemorySyncStore, SyncStores};
use dealersync_sync::{BatchSyncOrchestrator, DistributedLockService, SyncConfig};

/// Build a test `ServerConfig` with safe defaults.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
        shutdown_timeout_secs: 30,
        database_url: None,
        redis_url: None,
    }
}

/// Application under test plus handles on its in-memory state.
pub struct TestApp {
    pub router: Router,
    pub store: Arc<InMemorySyncStore>,
    pub orchestrator: Arc<BatchSyncOrchestrator>,
}

/// Build the full application router over in-memory stores and locks.
///
/// Uses the same router builder as `main.rs`, so tests exercise the
/// production middleware stack.
pub fn build_test_app() -> TestApp {
    let config = test_config();
    let store = Arc::new(InMemorySyncStore::new());
    let orchestrator = Arc::new(
        BatchSyncOrchestrator::new(
            SyncStores::in_memory(store.clone()),
            Arc::new(DistributedLockService::in_memory()),
            SyncConfig::default(),
        )
        .unwrap(),
    );

    let state = AppState {
        config: Arc::new(config),
        orchestrator: Arc::clone(&orchestrator),
    };

    TestApp {
        router: build_app_router(state),
        store,
        orchestrator,
    }
}

pub async fn get(app: Router, uri: &str) -> Response {
    app.oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap()
}

pub async fn post_json(app: Router, uri: &str, body: serde_json::Value) -> Response {
    app.oneshot(
        Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
    )
    .await
    .unwrap()
}

pub async fn body_json(response: Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}
