//! Prometheus metrics for saga observability.
//!
//! Covers:
//! - Store action throughput
//! - Activity retries and latency
//! - Saga transitions and settlements
//! - Webhook dispatch results
//!
//! # Example
//!
//! ```rust,no_run
//! use wire_saga_runtime::metrics::install_recorder;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let handle = install_recorder()?;
//!
//! // Serve `handle.render()` from a /metrics route
//! println!("{}", handle.render());
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use thiserror::Error;

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Latency buckets in seconds for activity calls.
const ACTIVITY_BUCKETS: &[f64] = &[0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0];

/// Install the global Prometheus recorder and describe every metric.
///
/// # Errors
///
/// Returns [`MetricsError::Install`] if a recorder is already installed.
/// Call this once, from the binary.
pub fn install_recorder() -> Result<PrometheusHandle, MetricsError> {
    let handle = PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Suffix("duration_seconds".to_string()),
            ACTIVITY_BUCKETS,
        )
        .map_err(|e| MetricsError::Build(e.to_string()))?
        .install_recorder()
        .map_err(|e| MetricsError::Install(e.to_string()))?;

    register_metrics();
    tracing::info!("Prometheus recorder installed");

    Ok(handle)
}

/// Describe all metrics emitted by the saga crates.
pub fn register_metrics() {
    // Store
    describe_counter!("store.actions.total", "Actions reduced by saga stores");
    describe_counter!(
        "store.effects.executed",
        "Effects executed by saga stores, by effect type"
    );
    describe_counter!(
        "store.shutdown.rejected_actions",
        "Actions rejected because their store was shutting down"
    );

    // Activities
    describe_counter!("activity.retry.attempt", "Activity re-attempts, by activity");
    describe_counter!(
        "activity.retry.exhausted",
        "Activities that failed after spending their retry budget"
    );
    describe_histogram!(
        "activity.duration_seconds",
        "Latency of one outbound activity call, by activity"
    );

    // Sagas
    describe_counter!("wire_saga.transitions", "Wire-transfer saga phase transitions, by target phase");
    describe_counter!("wire_saga.settled", "Wire-transfer sagas reaching a terminal phase, by outcome");
    describe_counter!("wire_saga.hold_step.retries", "Hold step re-runs after a retryable outcome");
    describe_counter!("hold.abandoned", "Abandoned hold attempts, by what happened to their hold");

    // Webhooks
    describe_counter!("webhook.dispatched", "Webhook dispatch results");
}
