//! Health check and metrics endpoints.

use crate::activities::{BankApi, LedgerApi};
use crate::server::{AppError, AppState};
use axum::{Json, extract::State, http::StatusCode};
use serde::Serialize;

/// Liveness.
///
/// ```text
/// GET /health
/// ```
#[allow(clippy::unused_async)]
pub async fn health_check() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}

/// Readiness body.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Readiness {
    /// Always `ready` on 200
    pub status: &'static str,
    /// Orchestrators still running
    pub running_instances: usize,
}

/// Readiness: the instance registry is usable.
///
/// ```text
/// GET /health/ready
/// ```
///
/// # Errors
///
/// Returns 503 if the registry is poisoned.
#[allow(clippy::unused_async)]
pub async fn readiness_check<L: LedgerApi, B: BankApi>(
    State(state): State<AppState<L, B>>,
) -> Result<Json<Readiness>, AppError> {
    let running = state.service.running_instances().map_err(|error| {
        AppError::unavailable("Transfer registry unavailable").with_source(anyhow::Error::new(error))
    })?;

    Ok(Json(Readiness {
        status: "ready",
        running_instances: running.len(),
    }))
}

/// Prometheus exposition.
///
/// ```text
/// GET /metrics
/// ```
///
/// # Errors
///
/// Returns 503 if no recorder is installed.
#[allow(clippy::unused_async)]
pub async fn metrics<L: LedgerApi, B: BankApi>(
    State(state): State<AppState<L, B>>,
) -> Result<String, AppError> {
    state
        .metrics
        .as_ref()
        .map(metrics_exporter_prometheus::PrometheusHandle::render)
        .ok_or_else(|| AppError::unavailable("Metrics recorder not installed"))
}
