//! HTTP front door through `axum-test`.

#![allow(clippy::unwrap_used)]

use axum::http::StatusCode;
use axum_test::TestServer;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use wire_saga_testing::test_clock;
use wire_transfer::mocks::{MockBank, MockLedger};
use wire_transfer::saga::{SagaPolicies, WireTransferEnvironment};
use wire_transfer::server::{AppState, build_router};
use wire_transfer::types::TransferId;
use wire_transfer::WireTransferService;

fn app() -> (TestServer, WireTransferService<MockLedger, MockBank>) {
    let service = WireTransferService::new(WireTransferEnvironment {
        ledger: Arc::new(MockLedger::default()),
        bank: Arc::new(MockBank::default()),
        clock: Arc::new(test_clock()),
        policies: SagaPolicies::default(),
    });
    let server = TestServer::new(build_router(AppState::new(service.clone(), None))).unwrap();
    (server, service)
}

fn transfer(id: &str) -> Value {
    json!({
        "id": id,
        "amount": 500,
        "currency": "USD",
        "senderAccount": "1234567890",
        "receiverAccount": "0987654321",
        "receiverName": "Ada Lovelace",
        "receiverBank": "First Analytical"
    })
}

#[tokio::test]
async fn test_submit_returns_pending() {
    let (server, _) = app();

    let response = server.post("/wire-transfers").json(&transfer("T1")).await;

    response.assert_status(StatusCode::ACCEPTED);
    response.assert_json(&json!({
        "transactionId": "T1",
        "status": "PENDING",
        "message": "Wire transfer initiation received. Processing..."
    }));
}

#[tokio::test]
async fn test_submit_without_id_generates_one() {
    let (server, _) = app();
    let mut payload = transfer("unused");
    payload.as_object_mut().unwrap().remove("id");

    let response = server.post("/wire-transfers").json(&payload).await;

    response.assert_status(StatusCode::ACCEPTED);
    let body: Value = response.json();
    assert_eq!(body["transactionId"].as_str().unwrap().len(), 36);
}

#[tokio::test]
async fn test_invalid_request_lists_field_errors() {
    let (server, _) = app();

    let response = server
        .post("/wire-transfers")
        .json(&json!({"id": "T1", "amount": -5, "currency": "JPY"}))
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
    let body: Value = response.json();
    assert!(body["formErrors"].as_array().unwrap().is_empty());
    for field in ["amount", "currency", "senderAccount", "receiverName"] {
        assert!(body["fieldErrors"][field].is_array(), "missing error for {field}");
    }
}

#[tokio::test]
async fn test_malformed_json_is_a_form_error() {
    let (server, _) = app();

    let response = server.post("/wire-transfers").text("{not json").await;

    response.assert_status(StatusCode::BAD_REQUEST);
    response.assert_json(&json!({"formErrors": ["Invalid JSON"], "fieldErrors": {}}));
}

#[tokio::test]
async fn test_duplicate_id_conflicts() {
    let (server, _) = app();
    server.post("/wire-transfers").json(&transfer("T1")).await;

    let response = server.post("/wire-transfers").json(&transfer("T1")).await;

    response.assert_status(StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_status_lookup() {
    let (server, service) = app();
    server.post("/wire-transfers").json(&transfer("T1")).await;

    server.get("/wire-transfers/missing").await.assert_status(StatusCode::NOT_FOUND);

    let response = server.get("/wire-transfers/T1").await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["id"], "T1");
    assert!(body["phase"].is_string());

    // Settle it through the webhook route and read the final status.
    server
        .post("/webhooks")
        .json(&json!({
            "status": "SUCCESS",
            "transactionId": "bank-tx-1",
            "requestId": "T1",
            "timestamp": "2025-01-01T00:05:00Z"
        }))
        .await
        .assert_status(StatusCode::ACCEPTED);
    let _ = service
        .await_outcome(&TransferId::new("T1"), Duration::from_secs(2))
        .await;
}

#[tokio::test]
async fn test_webhook_always_accepted() {
    let (server, _) = app();
    let expected = json!({
        "status": "PENDING",
        "message": "Webhook received and is being processed."
    });

    let unknown = server.post("/webhooks").json(&json!({"hello": "bank"})).await;
    unknown.assert_status(StatusCode::ACCEPTED);
    unknown.assert_json(&expected);

    let garbage = server.post("/webhooks").text("not even json").await;
    garbage.assert_status(StatusCode::ACCEPTED);
    garbage.assert_json(&expected);

    let orphan = server
        .post("/webhooks")
        .json(&json!({
            "status": "FAILURE",
            "transactionId": "bank-tx-2",
            "requestId": "nobody",
            "timestamp": "2025-01-01T00:05:00Z",
            "failureReason": "NETWORK_ERROR"
        }))
        .await;
    orphan.assert_status(StatusCode::ACCEPTED);
}

#[tokio::test]
async fn test_health_endpoints() {
    let (server, _) = app();

    server.get("/health").await.assert_text("ok");

    let ready = server.get("/health/ready").await;
    ready.assert_status_ok();
    ready.assert_json(&json!({"status": "ready", "runningInstances": 0}));

    server
        .get("/metrics")
        .await
        .assert_status(StatusCode::SERVICE_UNAVAILABLE);
}
