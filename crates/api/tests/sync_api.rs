//! Integration tests for the `/api/v1/sync` endpoints.

mod common;

use std::time::Duration;

use axum::http::StatusCode;
use common::{body_json, get, post_json, TestApp};
use dealersync_db::models::dealer::CreateDealer;
use dealersync_sync::store::DealerStore;
use serde_json::json;

async fn start(app: &TestApp, process_type: &str, id_carga: &str) -> serde_json::Value {
    let response = post_json(
        app.router.clone(),
        "/api/v1/sync/batches",
        json!({ "process_type": process_type, "id_carga": id_carga, "registros": 150 }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    body_json(response).await["data"].clone()
}

#[tokio::test]
async fn start_batch_returns_202_and_run_completes() {
    let app = common::build_test_app();

    let outcome = start(&app, "ProductList", "CARGA1").await;
    assert_eq!(outcome["lock_acquired"], true);
    let id = outcome["process_id"].as_i64().unwrap();

    app.orchestrator.wait_for_idle().await;

    let response = get(app.router.clone(), &format!("/api/v1/sync/batches/{id}")).await;
    assert_eq!(response.status(), StatusCode::OK);
    let batch = body_json(response).await["data"].clone();
    assert_eq!(batch["status_id"], 3);
    assert_eq!(batch["registros_carga"], 150);
    assert_eq!(batch["webhooks_totales"], 0);
}

#[tokio::test]
async fn start_batch_rejects_invalid_process_type() {
    let app = common::build_test_app();

    let response = post_json(
        app.router.clone(),
        "/api/v1/sync/batches",
        json!({ "process_type": "product:list", "id_carga": "CARGA1" }),
    )
    .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn unknown_batch_returns_404() {
    let app = common::build_test_app();

    let response = get(app.router.clone(), "/api/v1/sync/batches/999").await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await["code"], "NOT_FOUND");
}

#[tokio::test]
async fn busy_lock_reports_pending_and_list_filters_by_status() {
    let app = common::build_test_app();
    let held = app
        .orchestrator
        .locks()
        .try_acquire_lock("CampaignList", Duration::from_secs(30))
        .await
        .unwrap()
        .unwrap();

    let waiting = start(&app, "CampaignList", "CARGA1").await;
    assert_eq!(waiting["lock_acquired"], false);
    start(&app, "ProductList", "CARGA2").await;
    app.orchestrator.wait_for_idle().await;

    let response = get(app.router.clone(), "/api/v1/sync/batches?status=pending").await;
    assert_eq!(response.status(), StatusCode::OK);
    let pending = body_json(response).await["data"].clone();
    assert_eq!(pending.as_array().unwrap().len(), 1);
    assert_eq!(pending[0]["process_type"], "CampaignList");

    let response = get(app.router.clone(), "/api/v1/sync/batches").await;
    assert_eq!(body_json(response).await["data"].as_array().unwrap().len(), 2);

    let response = get(app.router.clone(), "/api/v1/sync/locks/CampaignList").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["data"]["active"], true);

    held.release().await.unwrap();
    let response = get(app.router.clone(), "/api/v1/sync/locks/CampaignList").await;
    assert_eq!(body_json(response).await["data"]["active"], false);
}

#[tokio::test]
async fn unknown_status_filter_returns_400() {
    let app = common::build_test_app();

    let response = get(app.router.clone(), "/api/v1/sync/batches?status=DONE").await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["code"], "BAD_REQUEST");
}

#[tokio::test]
async fn dealer_snapshot_hides_secret_keys() {
    let app = common::build_test_app();
    app.store
        .register_dealer(&CreateDealer {
            dealer_bac: "BAC001".to_string(),
            nombre_dealer: "Dealer One".to_string(),
            url_webhook: "http://127.0.0.1:1/webhook".to_string(),
            secret_key: "top-secret".to_string(),
            is_active: true,
        })
        .await
        .unwrap();
    let _held = app
        .orchestrator
        .locks()
        .try_acquire_lock("ProductList", Duration::from_secs(30))
        .await
        .unwrap()
        .unwrap();

    let outcome = start(&app, "ProductList", "CARGA1").await;
    let id = outcome["process_id"].as_i64().unwrap();

    let response = get(app.router.clone(), &format!("/api/v1/sync/batches/{id}/dealers")).await;
    assert_eq!(response.status(), StatusCode::OK);
    let dealers = body_json(response).await["data"].clone();
    assert_eq!(dealers.as_array().unwrap().len(), 1);
    assert_eq!(dealers[0]["dealer_bac"], "BAC001");
    assert_eq!(dealers[0]["estado_webhook_id"], 1);
    assert!(dealers[0].get("secret_key").is_none());
}

#[tokio::test]
async fn confirmation_is_recorded_once() {
    let app = common::build_test_app();
    let outcome = start(&app, "ProductList", "CARGA1").await;
    let id = outcome["process_id"].as_i64().unwrap();
    app.orchestrator.wait_for_idle().await;

    let batch = body_json(get(app.router.clone(), &format!("/api/v1/sync/batches/{id}")).await)
        .await["data"]
        .clone();
    let evento = batch["evento_carga_proceso_id"].as_i64().unwrap();

    let submission = json!({
        "evento_carga_proceso_id": evento,
        "dealer_bac": "BAC001",
        "proceso": "ProductList",
        "id_carga": "CARGA1",
        "fecha_sincronizacion": "2024-01-01T10:00:00.750Z",
        "registros_sincronizados": 150,
    });

    let response = post_json(
        app.router.clone(),
        "/api/v1/sync/confirmations",
        submission.clone(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let created = body_json(response).await["data"].clone();
    assert_eq!(
        created["token_confirmacion"],
        "d8f14e5672d105d1f9ee1d1fe880c76514d65d34bba116a69009229804c7ec23"
    );

    let response = post_json(app.router.clone(), "/api/v1/sync/confirmations", submission).await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(body_json(response).await["code"], "DUPLICATE");

    let response = get(
        app.router.clone(),
        &format!("/api/v1/sync/batches/{id}/confirmations"),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let confirmations = body_json(response).await["data"].clone();
    assert_eq!(confirmations.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn lock_status_rejects_invalid_process_type() {
    let app = common::build_test_app();

    let response = get(app.router.clone(), "/api/v1/sync/locks/bad%20name").await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
