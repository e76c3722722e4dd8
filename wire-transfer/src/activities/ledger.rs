//! Hold placement and release against the ledger service.

use super::{LedgerApi, record_latency};
use crate::types::{HoldOutcome, HoldRelease, HoldRequest, LedgerStatus, ReleaseRequest};
use crate::validation::{parse_hold_response, parse_release_response};
use std::time::{Duration, Instant};
use wire_saga_core::ActivityFailure;

/// Classify a ledger response to a hold placement.
///
/// A 503 is reported as the `SERVICE_UNAVAILABLE` outcome so the hold step
/// owns that retry. Other server errors are retryable activity failures.
///
/// # Errors
///
/// Returns the classified [`ActivityFailure`] when no outcome applies.
pub fn classify_hold_response(status: u16, body: &str) -> Result<HoldOutcome, ActivityFailure> {
    match status {
        200 => parse_hold_response(body).map_err(|error| {
            tracing::error!(%error, "Ledger returned 200 with an unexpected hold body");
            ActivityFailure::non_retryable("Unexpected hold response shape")
        }),
        503 => Ok(HoldOutcome::ServiceUnavailable),
        500..=599 => Err(ActivityFailure::retryable(format!("Ledger server error: {status}"))),
        _ => Err(ActivityFailure::non_retryable(format!("Failed to place hold: {status}"))),
    }
}

/// Classify a ledger response to a release.
///
/// Only a 200 reporting `FUNDS_RELEASED` confirms the release.
///
/// # Errors
///
/// Returns the classified [`ActivityFailure`] otherwise.
pub fn classify_release_response(status: u16, body: &str) -> Result<HoldRelease, ActivityFailure> {
    match status {
        200 => {
            let release = parse_release_response(body).map_err(|error| {
                tracing::error!(%error, "Ledger returned 200 with an unexpected release body");
                ActivityFailure::non_retryable("Unexpected release response shape")
            })?;
            if release.status == LedgerStatus::FundsReleased {
                Ok(release)
            } else {
                Err(ActivityFailure::non_retryable(format!(
                    "Hold not released: {}",
                    release.message
                )))
            }
        },
        500..=599 => Err(ActivityFailure::retryable(format!("Ledger server error: {status}"))),
        _ => Err(ActivityFailure::non_retryable(format!("Failed to release hold: {status}"))),
    }
}

/// `reqwest` client for the ledger service.
#[derive(Debug, Clone)]
pub struct HttpLedgerClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpLedgerClient {
    /// Build a client for the ledger at `base_url`, bounding each call by `timeout`.
    ///
    /// # Errors
    ///
    /// Returns an error if the TLS backend cannot be initialized.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(client, base_url))
    }

    /// Use an existing `reqwest` client.
    #[must_use]
    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    async fn post<B: serde::Serialize + Sync>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<(u16, String), ActivityFailure> {
        let url = format!("{}{path}", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|error| ActivityFailure::retryable(format!("Ledger unreachable: {error}")))?;

        let status = response.status().as_u16();
        let text = response.text().await.map_err(|error| {
            ActivityFailure::retryable(format!("Ledger response interrupted: {error}"))
        })?;
        Ok((status, text))
    }
}

impl LedgerApi for HttpLedgerClient {
    async fn place_hold(&self, request: HoldRequest) -> Result<HoldOutcome, ActivityFailure> {
        let started = Instant::now();
        tracing::info!(account = %request.account_number, amount = %request.amount, "Placing hold");

        let result = self
            .post("/place-hold", &request)
            .await
            .and_then(|(status, body)| classify_hold_response(status, &body));

        record_latency("place_hold", started);
        match &result {
            Ok(outcome) => tracing::info!(outcome = outcome.label(), "Hold attempt finished"),
            Err(failure) => tracing::warn!(error = %failure, "Error placing hold"),
        }
        result
    }

    async fn release_hold(&self, transaction_id: String) -> Result<HoldRelease, ActivityFailure> {
        let started = Instant::now();
        tracing::info!(hold = %transaction_id, "Releasing hold");

        let result = self
            .post("/release-funds", &ReleaseRequest { transaction_id })
            .await
            .and_then(|(status, body)| classify_release_response(status, &body));

        record_latency("release_hold", started);
        if let Err(failure) = &result {
            tracing::warn!(error = %failure, "Error releasing hold");
        }
        result
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_hold_outcomes() {
        assert_eq!(
            classify_hold_response(200, r#"{"response":"SUCCESS","transactionId":"h-1"}"#),
            Ok(HoldOutcome::Success { transaction_id: "h-1".to_string() })
        );
        assert_eq!(
            classify_hold_response(200, r#"{"response":"INSUFFICIENT_BALANCE"}"#),
            Ok(HoldOutcome::InsufficientBalance)
        );
        assert_eq!(classify_hold_response(503, "busy"), Ok(HoldOutcome::ServiceUnavailable));
    }

    #[test]
    fn test_hold_failures() {
        assert!(!classify_hold_response(200, "{}").unwrap_err().is_retryable());
        assert!(classify_hold_response(502, "").unwrap_err().is_retryable());
        assert!(!classify_hold_response(400, "").unwrap_err().is_retryable());
        assert!(!classify_hold_response(302, "").unwrap_err().is_retryable());
    }

    #[test]
    fn test_release_requires_funds_released() {
        let released = r#"{"transactionId":"h-1","status":"FUNDS_RELEASED","message":"Released"}"#;
        assert_eq!(classify_release_response(200, released).unwrap().transaction_id, "h-1");

        let frozen = r#"{"transactionId":"h-1","status":"ACCOUNT_FROZEN","message":"Account frozen"}"#;
        assert_eq!(
            classify_release_response(200, frozen),
            Err(ActivityFailure::non_retryable("Hold not released: Account frozen"))
        );
        assert!(classify_release_response(503, "").unwrap_err().is_retryable());
        assert!(!classify_release_response(404, "").unwrap_err().is_retryable());
    }

    #[test]
    fn test_base_url_trailing_slash_is_trimmed() {
        let client = HttpLedgerClient::with_client(reqwest::Client::new(), "http://ledger:3002/");
        assert_eq!(client.base_url, "http://ledger:3002");
    }
}
