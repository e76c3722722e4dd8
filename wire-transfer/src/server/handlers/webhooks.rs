//! Settlement webhook handler.

use crate::activities::{BankApi, LedgerApi};
use crate::server::AppState;
use crate::types::WebhookAccepted;
use axum::{Json, body::Bytes, extract::State, http::StatusCode};
use serde_json::Value;

/// Accept a settlement notification.
///
/// Always answers 202: the body is dispatched in the background and the
/// dispatch result is never reported to the sender. A body that is not
/// JSON is dispatched as a JSON string, which classifies as unknown.
///
/// # Endpoint
///
/// ```text
/// POST /webhooks
/// ```
pub async fn receive_webhook<L: LedgerApi, B: BankApi>(
    State(state): State<AppState<L, B>>,
    body: Bytes,
) -> (StatusCode, Json<WebhookAccepted>) {
    let payload = serde_json::from_slice(&body)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&body).into_owned()));

    (StatusCode::ACCEPTED, Json(state.service.deliver_webhook(payload)))
}
