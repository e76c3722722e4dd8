//! Wire initiation against the bank API.

use super::{BankApi, record_latency};
use crate::types::{TransferRequest, WireInitiationAck};
use crate::validation::parse_wire_ack;
use reqwest::StatusCode;
use std::time::{Duration, Instant};
use wire_saga_core::ActivityFailure;

/// Classify a bank response.
///
/// Total and pure: every `(status, body)` maps to exactly one result, and
/// the same input always maps to the same result. 503 is the only
/// retryable status.
///
/// # Errors
///
/// Returns the classified [`ActivityFailure`] for anything but a 200 with a
/// well-formed acknowledgment.
pub fn classify_wire_response(status: u16, body: &str) -> Result<WireInitiationAck, ActivityFailure> {
    match status {
        200 => parse_wire_ack(body).map_err(|error| {
            tracing::error!(%error, "Bank returned 200 with an unexpected body");
            ActivityFailure::non_retryable("Unexpected response shape")
        }),
        503 => Err(ActivityFailure::retryable("Service unavailable")),
        401 => Err(ActivityFailure::non_retryable("Authentication failed")),
        400..=499 => {
            let reason = StatusCode::from_u16(status)
                .ok()
                .and_then(|code| code.canonical_reason())
                .unwrap_or("Unknown");
            Err(ActivityFailure::non_retryable(format!("Client error: {reason}")))
        },
        _ => Err(ActivityFailure::non_retryable("Unexpected error")),
    }
}

/// `reqwest` client for the bank's initiate-wire endpoint.
#[derive(Debug, Clone)]
pub struct HttpBankClient {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpBankClient {
    /// Build a client posting to `endpoint`, bounding each call by `timeout`.
    ///
    /// # Errors
    ///
    /// Returns an error if the TLS backend cannot be initialized.
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(client, endpoint))
    }

    /// Use an existing `reqwest` client.
    #[must_use]
    pub fn with_client(client: reqwest::Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }
}

impl BankApi for HttpBankClient {
    async fn initiate_wire(&self, request: TransferRequest) -> Result<WireInitiationAck, ActivityFailure> {
        let started = Instant::now();
        tracing::info!(transfer_id = %request.id, endpoint = %self.endpoint, "Initiating wire");

        let result = match self.client.post(&self.endpoint).json(&request).send().await {
            Err(error) => Err(ActivityFailure::retryable(format!("Bank unreachable: {error}"))),
            Ok(response) => {
                let status = response.status().as_u16();
                match response.text().await {
                    Ok(body) => classify_wire_response(status, &body),
                    Err(error) => Err(ActivityFailure::retryable(format!(
                        "Bank response interrupted: {error}"
                    ))),
                }
            },
        };

        record_latency("initiate_wire", started);
        if let Err(failure) = &result {
            tracing::warn!(
                transfer_id = %request.id,
                retryable = failure.is_retryable(),
                error = %failure,
                "Wire initiation failed"
            );
        }
        result
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const ACK: &str = r#"{"status":"SUCCESS","message":"Wire accepted","transactionId":"bank-1"}"#;

    #[test]
    fn test_ok_with_ack() {
        let ack = classify_wire_response(200, ACK).unwrap();
        assert_eq!(ack.transaction_id.as_deref(), Some("bank-1"));
    }

    #[test]
    fn test_ok_with_malformed_body_is_permanent() {
        let failure = classify_wire_response(200, r#"{"ok":true}"#).unwrap_err();
        assert_eq!(failure, ActivityFailure::non_retryable("Unexpected response shape"));
    }

    #[test]
    fn test_status_table() {
        assert_eq!(
            classify_wire_response(503, ""),
            Err(ActivityFailure::retryable("Service unavailable"))
        );
        assert_eq!(
            classify_wire_response(401, ACK),
            Err(ActivityFailure::non_retryable("Authentication failed"))
        );
        assert_eq!(
            classify_wire_response(404, ""),
            Err(ActivityFailure::non_retryable("Client error: Not Found"))
        );
        assert_eq!(
            classify_wire_response(422, ""),
            Err(ActivityFailure::non_retryable("Client error: Unprocessable Entity"))
        );
        assert_eq!(
            classify_wire_response(499, ""),
            Err(ActivityFailure::non_retryable("Client error: Unknown"))
        );
        assert_eq!(
            classify_wire_response(500, ""),
            Err(ActivityFailure::non_retryable("Unexpected error"))
        );
        assert_eq!(
            classify_wire_response(201, ACK),
            Err(ActivityFailure::non_retryable("Unexpected error"))
        );
    }

    proptest! {
        #[test]
        fn prop_classification_is_total_and_deterministic(status in 0_u16..1000, body in ".{0,40}") {
            let first = classify_wire_response(status, &body);
            let second = classify_wire_response(status, &body);
            prop_assert_eq!(&first, &second);

            if status != 200 {
                let failure = first.unwrap_err();
                prop_assert_eq!(failure.is_retryable(), status == 503);
            }
        }
    }
}
