//! Application state for the HTTP server.

use crate::service::WireTransferService;
use metrics_exporter_prometheus::PrometheusHandle;

/// State shared across all HTTP handlers.
///
/// Cloned per request; every field is a cheap handle.
pub struct AppState<L, B> {
    /// Transfer service
    pub service: WireTransferService<L, B>,
    /// Prometheus handle, when a recorder is installed
    pub metrics: Option<PrometheusHandle>,
}

impl<L, B> AppState<L, B> {
    /// Create a new application state.
    #[must_use]
    pub const fn new(service: WireTransferService<L, B>, metrics: Option<PrometheusHandle>) -> Self {
        Self { service, metrics }
    }
}

impl<L, B> Clone for AppState<L, B> {
    fn clone(&self) -> Self {
        Self {
            service: self.service.clone(),
            metrics: self.metrics.clone(),
        }
    }
}
