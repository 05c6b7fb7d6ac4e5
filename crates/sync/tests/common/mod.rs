//! Shared helpers for sync integration tests: mock dealer endpoints and
//! orchestrator wiring over in-memory stores.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use chrono::{NaiveDateTime, TimeZone, Utc};
use dealersync_core::hashing::{compute_webhook_hmac, generate_token_confirmacion};
use dealersync_db::models::dealer::CreateDealer;
use dealersync_sync::delivery::{WebhookPayload, SIGNATURE_HEADER};
use dealersync_sync::lock::DistributedLockService;
use dealersync_sync::store::{DealerStore, InMemorySyncStore};
use dealersync_sync::{BatchSyncOrchestrator, SyncConfig, SyncStores};

// ---------------------------------------------------------------------------
// Mock dealer server
// ---------------------------------------------------------------------------

/// Requests received per dealer BAC.
#[derive(Clone, Default)]
pub struct DealerHits(Arc<Mutex<HashMap<String, usize>>>);

impl DealerHits {
    pub fn count(&self, dealer_bac: &str) -> usize {
        self.0.lock().unwrap().get(dealer_bac).copied().unwrap_or(0)
    }

    fn record(&self, dealer_bac: &str) {
        *self.0.lock().unwrap().entry(dealer_bac.to_string()).or_default() += 1;
    }
}

/// Secret each mock dealer expects signatures to be keyed with.
pub fn dealer_secret(dealer_bac: &str) -> String {
    format!("secret-{dealer_bac}")
}

/// A dealer endpoint that verifies the signature, recomputes the token
/// from the payload fields and acknowledges with it.
async fn acknowledge(hits: &DealerHits, headers: &HeaderMap, body: &str) -> Response {
    let payload: WebhookPayload = match serde_json::from_str(body) {
        Ok(payload) => payload,
        Err(_) => return StatusCode::BAD_REQUEST.into_response(),
    };
    hits.record(&payload.dealer_bac);

    let expected = format!(
        "sha256={}",
        compute_webhook_hmac(&dealer_secret(&payload.dealer_bac), body)
    );
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if signature != expected {
        return StatusCode::UNAUTHORIZED.into_response();
    }

    let naive =
        NaiveDateTime::parse_from_str(&payload.fecha_sincronizacion, "%Y-%m-%dT%H:%M:%S")
            .expect("payload timestamp uses token layout");
    let token = generate_token_confirmacion(
        &payload.id_carga,
        &payload.dealer_bac,
        &payload.proceso,
        &Utc.from_utc_datetime(&naive),
        payload.registros_sincronizados,
    );

    Json(serde_json::json!({
        "success": true,
        "tokenConfirmacion": token,
        "message": "received",
    }))
    .into_response()
}

async fn ok(State(hits): State<DealerHits>, headers: HeaderMap, body: String) -> Response {
    acknowledge(&hits, &headers, &body).await
}

async fn delayed(State(hits): State<DealerHits>, headers: HeaderMap, body: String) -> Response {
    tokio::time::sleep(Duration::from_millis(300)).await;
    acknowledge(&hits, &headers, &body).await
}

async fn slow(State(hits): State<DealerHits>, headers: HeaderMap, body: String) -> Response {
    tokio::time::sleep(Duration::from_secs(2)).await;
    acknowledge(&hits, &headers, &body).await
}

async fn error(State(hits): State<DealerHits>, body: String) -> Response {
    if let Ok(payload) = serde_json::from_str::<WebhookPayload>(&body) {
        hits.record(&payload.dealer_bac);
    }
    StatusCode::INTERNAL_SERVER_ERROR.into_response()
}

async fn nack(State(hits): State<DealerHits>, body: String) -> Response {
    if let Ok(payload) = serde_json::from_str::<WebhookPayload>(&body) {
        hits.record(&payload.dealer_bac);
    }
    Json(serde_json::json!({ "success": false, "message": "rejected" })).into_response()
}

/// Mock dealer server bound to an ephemeral local port.
pub struct DealerServer {
    pub addr: SocketAddr,
    pub hits: DealerHits,
}

impl DealerServer {
    /// Routes: `/ok`, `/delayed` (300 ms), `/slow` (2 s), `/error` (500),
    /// `/nack` (`success: false`).
    pub async fn start() -> Self {
        let hits = DealerHits::default();
        let app = Router::new()
            .route("/ok", post(ok))
            .route("/delayed", post(delayed))
            .route("/slow", post(slow))
            .route("/error", post(error))
            .route("/nack", post(nack))
            .with_state(hits.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Self { addr, hits }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }
}

// ---------------------------------------------------------------------------
// Orchestrator wiring
// ---------------------------------------------------------------------------

/// Fast settings for tests: short timeout, one quick retry.
pub fn test_config() -> SyncConfig {
    SyncConfig {
        lock_ttl: Duration::from_secs(5),
        lock_renew_interval: Duration::from_secs(1),
        webhook_timeout: Duration::from_millis(200),
        retry_delays: vec![Duration::from_millis(10)],
        max_concurrent_dispatches: 4,
        verify_ack_token: true,
        scheduler_interval: Duration::from_secs(1),
        stale_run_after: Duration::from_secs(60),
        pending_batch_limit: 50,
    }
}

pub struct Harness {
    pub store: Arc<InMemorySyncStore>,
    pub locks: Arc<DistributedLockService>,
    pub orchestrator: Arc<BatchSyncOrchestrator>,
}

impl Harness {
    pub fn new(config: SyncConfig) -> Self {
        let store = Arc::new(InMemorySyncStore::new());
        Self::with_stores(store.clone(), SyncStores::in_memory(store), config)
    }

    pub fn with_stores(
        store: Arc<InMemorySyncStore>,
        stores: SyncStores,
        config: SyncConfig,
    ) -> Self {
        Self::with_locks(store, stores, Arc::new(DistributedLockService::in_memory()), config)
    }

    pub fn with_locks(
        store: Arc<InMemorySyncStore>,
        stores: SyncStores,
        locks: Arc<DistributedLockService>,
        config: SyncConfig,
    ) -> Self {
        let orchestrator =
            Arc::new(BatchSyncOrchestrator::new(stores, Arc::clone(&locks), config).unwrap());
        Self {
            store,
            locks,
            orchestrator,
        }
    }

    pub async fn register_dealer(&self, dealer_bac: &str, url: String) {
        self.store
            .register_dealer(&CreateDealer {
                dealer_bac: dealer_bac.to_string(),
                nombre_dealer: format!("Dealer {dealer_bac}"),
                url_webhook: url,
                secret_key: dealer_secret(dealer_bac),
                is_active: true,
            })
            .await
            .unwrap();
    }
}
