//! Settlement webhook classification.
//!
//! Total over arbitrary JSON: every payload is a known SUCCESS, a known
//! FAILURE, or UNKNOWN. `failureReason` must be present exactly when the
//! status is FAILURE; anything else falls through to UNKNOWN with the raw
//! payload untouched.

use crate::types::{
    FailureReason, SettlementNotification, TransferId, UnknownNotification, WireTransferFailure,
    WireTransferSuccess,
};
use crate::validation::is_valid_id;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Value};

/// Classify an inbound webhook payload.
///
/// `arrived_at` stamps UNKNOWN notifications whose payload has no
/// `timestamp` of its own (missing or null). Any other `timestamp` value is
/// kept as sent.
#[must_use]
pub fn classify(raw: Value, arrived_at: DateTime<Utc>) -> SettlementNotification {
    if let Some(known) = raw.as_object().and_then(known) {
        return known;
    }

    let timestamp = match raw.get("timestamp") {
        None | Some(Value::Null) => {
            Value::String(arrived_at.to_rfc3339_opts(SecondsFormat::Millis, true))
        },
        Some(timestamp) => timestamp.clone(),
    };

    SettlementNotification::Unknown(UnknownNotification {
        raw_payload: raw,
        timestamp,
    })
}

fn known(object: &Map<String, Value>) -> Option<SettlementNotification> {
    let status = object.get("status")?.as_str()?;
    let transaction_id = object
        .get("transactionId")?
        .as_str()
        .filter(|id| !id.is_empty())?
        .to_string();
    let request_id = object
        .get("requestId")?
        .as_str()
        .filter(|id| is_valid_id(id))
        .map(TransferId::from)?;
    let timestamp = DateTime::parse_from_rfc3339(object.get("timestamp")?.as_str()?)
        .ok()?
        .with_timezone(&Utc);
    let comments = match object.get("comments") {
        None => None,
        Some(Value::String(comments)) => Some(comments.clone()),
        Some(_) => return None,
    };

    match status {
        "SUCCESS" if !object.contains_key("failureReason") => {
            Some(SettlementNotification::Success(WireTransferSuccess {
                transaction_id,
                request_id,
                timestamp,
                comments,
            }))
        },
        "FAILURE" => {
            let failure_reason: FailureReason =
                serde_json::from_value(object.get("failureReason")?.clone()).ok()?;
            Some(SettlementNotification::Failure(WireTransferFailure {
                transaction_id,
                request_id,
                timestamp,
                failure_reason,
                comments,
            }))
        },
        _ => None,
    }
}
