//! Router configuration.

use super::handlers::{health, transfers, webhooks};
use super::state::AppState;
use crate::activities::{BankApi, LedgerApi};
use axum::{
    Router,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

/// Build the complete Axum router.
pub fn build_router<L: LedgerApi, B: BankApi>(state: AppState<L, B>) -> Router {
    Router::new()
        // Health checks
        .route("/health", get(health::health_check))
        .route("/health/ready", get(health::readiness_check::<L, B>))
        .route("/metrics", get(health::metrics::<L, B>))
        // Transfers
        .route("/wire-transfers", post(transfers::create_transfer::<L, B>))
        .route("/wire-transfers/:id", get(transfers::get_transfer::<L, B>))
        // Bank callbacks
        .route("/webhooks", post(webhooks::receive_webhook::<L, B>))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
