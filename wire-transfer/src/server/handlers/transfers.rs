//! Transfer submission and status handlers.

use crate::activities::{BankApi, LedgerApi};
use crate::server::{AppError, AppState};
use crate::service::TransferStatus;
use crate::types::{TransferAccepted, TransferId};
use crate::validation::ValidationErrors;
use axum::{
    Json,
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
};
use serde_json::Value;

/// Parse a request body as JSON, reporting malformed JSON as a form error.
///
/// # Errors
///
/// Returns a 400 [`AppError`] if `body` is not JSON.
pub fn parse_body(body: &[u8]) -> Result<Value, AppError> {
    serde_json::from_slice(body).map_err(|error| {
        tracing::debug!(%error, "Rejected malformed JSON body");
        AppError::validation(ValidationErrors {
            form_errors: vec!["Invalid JSON".to_string()],
            ..ValidationErrors::default()
        })
    })
}

/// Accept a wire transfer request.
///
/// # Endpoint
///
/// ```text
/// POST /wire-transfers
/// ```
///
/// # Status Codes
///
/// - 202 Accepted: saga started, `{transactionId, status: "PENDING", message}`
/// - 400 Bad Request: `{formErrors, fieldErrors}`
/// - 409 Conflict: a transfer with this id already exists
///
/// # Errors
///
/// Returns an [`AppError`] for each non-202 outcome above.
pub async fn create_transfer<L: LedgerApi, B: BankApi>(
    State(state): State<AppState<L, B>>,
    body: Bytes,
) -> Result<(StatusCode, Json<TransferAccepted>), AppError> {
    let payload = parse_body(&body)?;
    let accepted = state.service.submit(&payload).await?;
    Ok((StatusCode::ACCEPTED, Json(accepted)))
}

/// Current or final status of a transfer.
///
/// # Endpoint
///
/// ```text
/// GET /wire-transfers/:id
/// ```
///
/// # Errors
///
/// Returns 404 if no transfer has this id.
pub async fn get_transfer<L: LedgerApi, B: BankApi>(
    State(state): State<AppState<L, B>>,
    Path(id): Path<String>,
) -> Result<Json<TransferStatus>, AppError> {
    let id = TransferId::new(id);
    let status = state.service.status(&id).await.map_err(|error| {
        AppError::internal("Transfer registry unavailable").with_source(anyhow::Error::new(error))
    })?;

    status
        .map(Json)
        .ok_or_else(|| AppError::not_found("Wire transfer", id))
}
