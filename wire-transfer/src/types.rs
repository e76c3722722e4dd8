//! Domain types for wire transfers.
//!
//! Field names on the wire are camelCase; enumerations are
//! `SCREAMING_SNAKE_CASE`. Construction from untrusted JSON goes through
//! [`crate::validation`] and [`crate::webhook`]; the serde derives here
//! describe the shape, not the rules.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::fmt;

/// Largest accepted transfer amount, in cents (1,000,000.00).
pub const MAX_AMOUNT_CENTS: u64 = 100_000_000;

/// A positive amount of money held as integer cents.
///
/// Serializes as a JSON number in major units (`500.25`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Money(u64);

impl Money {
    /// Create from integer cents.
    #[must_use]
    pub const fn from_cents(cents: u64) -> Self {
        Self(cents)
    }

    /// Convert a major-unit amount with at most two decimal places.
    ///
    /// Returns `None` for negative, non-finite, or sub-cent amounts.
    #[must_use]
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    pub fn from_major(amount: f64) -> Option<Self> {
        if !amount.is_finite() || amount < 0.0 {
            return None;
        }
        let scaled = amount * 100.0;
        let cents = scaled.round();
        if (scaled - cents).abs() > 1e-6 || cents > u64::MAX as f64 {
            return None;
        }
        Some(Self(cents as u64))
    }

    /// Amount in cents.
    #[must_use]
    pub const fn cents(self) -> u64 {
        self.0
    }

    /// Amount in major units.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn as_major(self) -> f64 {
        self.0 as f64 / 100.0
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.0 / 100, self.0 % 100)
    }
}

impl Serialize for Money {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(self.as_major())
    }
}

impl<'de> Deserialize<'de> for Money {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let amount = f64::deserialize(deserializer)?;
        Self::from_major(amount)
            .ok_or_else(|| serde::de::Error::custom("amount must be non-negative with at most 2 decimal places"))
    }
}

/// Supported transfer currencies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    /// US dollar
    Usd,
    /// Euro
    Eur,
    /// Pound sterling
    Gbp,
}

impl Currency {
    /// Parse an ISO code from the accepted set.
    #[must_use]
    pub fn parse(code: &str) -> Option<Self> {
        match code {
            "USD" => Some(Self::Usd),
            "EUR" => Some(Self::Eur),
            "GBP" => Some(Self::Gbp),
            _ => None,
        }
    }
}

/// Caller-chosen (or generated) transfer identifier; the correlation key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransferId(String);

impl TransferId {
    /// Wrap an identifier. Callers are expected to have validated it.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh v4 UUID identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Borrow the identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TransferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TransferId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// A validated wire-transfer request. Immutable once accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferRequest {
    /// Correlation key
    pub id: TransferId,
    /// Amount to transfer
    pub amount: Money,
    /// Currency of `amount`
    pub currency: Currency,
    /// Debited account (10-20 digits)
    pub sender_account: String,
    /// Credited account (10-20 digits)
    pub receiver_account: String,
    /// Beneficiary name
    pub receiver_name: String,
    /// Beneficiary bank
    pub receiver_bank: String,
    /// Free-text memo
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl TransferRequest {
    /// The hold this transfer needs on the sender account.
    #[must_use]
    pub fn hold_request(&self) -> HoldRequest {
        HoldRequest {
            account_number: self.sender_account.clone(),
            amount: self.amount,
        }
    }
}

/// Body of a ledger hold placement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HoldRequest {
    /// Account to reserve funds on
    pub account_number: String,
    /// Amount to reserve
    pub amount: Money,
}

/// Result of one hold attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "response", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HoldOutcome {
    /// Funds reserved
    Success {
        /// Ledger transaction of the hold
        #[serde(rename = "transactionId")]
        transaction_id: String,
    },
    /// Not enough funds; permanent
    InsufficientBalance,
    /// Ledger temporarily unavailable; the only retryable outcome
    ServiceUnavailable,
}

impl HoldOutcome {
    /// Short label for logs and metrics.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Success { .. } => "SUCCESS",
            Self::InsufficientBalance => "INSUFFICIENT_BALANCE",
            Self::ServiceUnavailable => "SERVICE_UNAVAILABLE",
        }
    }
}

/// Status literal of a bank acknowledgment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AckStatus {
    /// Accepted for processing
    Success,
}

/// The bank accepted the transfer for processing. Not a settlement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireInitiationAck {
    /// Bank-side reference, when the bank returns one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
    /// Always `SUCCESS`
    pub status: AckStatus,
    /// Bank message
    pub message: String,
}

/// Ledger status reported on a release.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LedgerStatus {
    /// Account is frozen; nothing was released
    AccountFrozen,
    /// Hold released
    FundsReleased,
    /// Funds already moved; nothing to release
    TransactionLedgered,
}

/// Ledger response to a release-funds call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HoldRelease {
    /// Ledger transaction of the hold
    pub transaction_id: String,
    /// What the ledger did
    pub status: LedgerStatus,
    /// Ledger message
    pub message: String,
}

/// Body of a release-funds call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseRequest {
    /// Ledger transaction of the hold to release
    pub transaction_id: String,
}

/// Why the bank failed a settlement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureReason {
    /// Sender balance too low at settlement
    InsufficientFunds,
    /// Receiver account closed
    AccountClosed,
    /// Receiver account unknown
    AccountNotFound,
    /// Interbank network failure
    NetworkError,
    /// Bank-side failure
    InternalError,
}

/// Settlement succeeded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireTransferSuccess {
    /// Bank transaction
    pub transaction_id: String,
    /// Correlation key
    pub request_id: TransferId,
    /// When the bank settled
    pub timestamp: DateTime<Utc>,
    /// Bank comment
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comments: Option<String>,
}

/// Settlement failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireTransferFailure {
    /// Bank transaction
    pub transaction_id: String,
    /// Correlation key
    pub request_id: TransferId,
    /// When the bank gave up
    pub timestamp: DateTime<Utc>,
    /// Why
    pub failure_reason: FailureReason,
    /// Bank comment
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comments: Option<String>,
}

/// A settlement notification that matched a known schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status")]
pub enum KnownNotification {
    /// Settled
    #[serde(rename = "SUCCESS")]
    Success(WireTransferSuccess),
    /// Not settled
    #[serde(rename = "FAILURE")]
    Failure(WireTransferFailure),
}

impl KnownNotification {
    /// Correlation key.
    #[must_use]
    pub const fn request_id(&self) -> &TransferId {
        match self {
            Self::Success(success) => &success.request_id,
            Self::Failure(failure) => &failure.request_id,
        }
    }

    /// Bank transaction.
    #[must_use]
    pub fn transaction_id(&self) -> &str {
        match self {
            Self::Success(success) => &success.transaction_id,
            Self::Failure(failure) => &failure.transaction_id,
        }
    }

    /// Whether the bank reported success.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

/// A payload that matched no known schema, kept verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnknownNotification {
    /// The payload exactly as received
    pub raw_payload: Value,
    /// The payload's own `timestamp` as sent, or the arrival time when
    /// absent or null
    pub timestamp: Value,
}

/// Every inbound webhook classifies into exactly one of these.
#[derive(Debug, Clone, PartialEq)]
pub enum SettlementNotification {
    /// Bank reported success
    Success(WireTransferSuccess),
    /// Bank reported failure
    Failure(WireTransferFailure),
    /// Unrecognized payload
    Unknown(UnknownNotification),
}

impl SettlementNotification {
    /// The known notification, if this is one.
    #[must_use]
    pub fn into_known(self) -> Option<KnownNotification> {
        match self {
            Self::Success(success) => Some(KnownNotification::Success(success)),
            Self::Failure(failure) => Some(KnownNotification::Failure(failure)),
            Self::Unknown(_) => None,
        }
    }

    /// Status label as it appears on the wire.
    #[must_use]
    pub const fn status(&self) -> &'static str {
        match self {
            Self::Success(_) => "SUCCESS",
            Self::Failure(_) => "FAILURE",
            Self::Unknown(_) => "UNKNOWN_WEBHOOK",
        }
    }
}

impl Serialize for SettlementNotification {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        #[derive(Serialize)]
        struct Tagged<'a, T> {
            status: &'static str,
            #[serde(flatten)]
            body: &'a T,
        }

        match self {
            Self::Success(body) => Tagged { status: "SUCCESS", body }.serialize(serializer),
            Self::Failure(body) => Tagged { status: "FAILURE", body }.serialize(serializer),
            Self::Unknown(body) => Tagged { status: "UNKNOWN_WEBHOOK", body }.serialize(serializer),
        }
    }
}

/// Immediate answer to an accepted transfer request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferAccepted {
    /// The transfer id (generated when the caller sent none)
    pub transaction_id: TransferId,
    /// Always `PENDING`
    pub status: String,
    /// Human-readable note
    pub message: String,
}

impl TransferAccepted {
    /// Acknowledge `id`.
    #[must_use]
    pub fn pending(id: TransferId) -> Self {
        Self {
            transaction_id: id,
            status: "PENDING".to_string(),
            message: "Wire transfer initiation received. Processing...".to_string(),
        }
    }
}

/// Immediate answer to every webhook delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookAccepted {
    /// Always `PENDING`
    pub status: String,
    /// Human-readable note
    pub message: String,
}

impl Default for WebhookAccepted {
    fn default() -> Self {
        Self {
            status: "PENDING".to_string(),
            message: "Webhook received and is being processed.".to_string(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_money_from_major() {
        assert_eq!(Money::from_major(500.0), Some(Money::from_cents(50_000)));
        assert_eq!(Money::from_major(10.25), Some(Money::from_cents(1025)));
        assert_eq!(Money::from_major(0.1 + 0.2), Some(Money::from_cents(30)));
        assert_eq!(Money::from_major(1.005), None);
        assert_eq!(Money::from_major(-1.0), None);
        assert_eq!(Money::from_major(f64::NAN), None);
    }

    #[test]
    fn test_money_serializes_in_major_units() {
        assert_eq!(serde_json::to_value(Money::from_cents(1025)).unwrap(), json!(10.25));
        assert_eq!(Money::from_cents(50_000).to_string(), "500.00");
        assert_eq!(Money::from_cents(7).to_string(), "0.07");
    }

    #[test]
    fn test_hold_outcome_shapes() {
        let success: HoldOutcome =
            serde_json::from_value(json!({"response": "SUCCESS", "transactionId": "h-1"})).unwrap();
        assert_eq!(success, HoldOutcome::Success { transaction_id: "h-1".to_string() });

        let unavailable: HoldOutcome =
            serde_json::from_value(json!({"response": "SERVICE_UNAVAILABLE"})).unwrap();
        assert_eq!(unavailable, HoldOutcome::ServiceUnavailable);
        assert_eq!(
            serde_json::to_value(HoldOutcome::InsufficientBalance).unwrap(),
            json!({"response": "INSUFFICIENT_BALANCE"})
        );
    }

    #[test]
    fn test_known_notification_is_status_tagged() {
        let notification = KnownNotification::Failure(WireTransferFailure {
            transaction_id: "tx-9".to_string(),
            request_id: TransferId::new("T1"),
            timestamp: DateTime::<Utc>::UNIX_EPOCH,
            failure_reason: FailureReason::AccountClosed,
            comments: None,
        });

        let json = serde_json::to_value(&notification).unwrap();
        assert_eq!(json["status"], "FAILURE");
        assert_eq!(json["failureReason"], "ACCOUNT_CLOSED");
        assert_eq!(json["requestId"], "T1");
        assert!(json.get("comments").is_none());
        assert_eq!(notification.request_id().as_str(), "T1");
        assert!(!notification.is_success());
    }

    #[test]
    fn test_unknown_notification_serializes_with_status() {
        let notification = SettlementNotification::Unknown(UnknownNotification {
            raw_payload: json!({"foo": 1}),
            timestamp: json!("2025-01-01T00:00:00Z"),
        });

        assert_eq!(
            serde_json::to_value(&notification).unwrap(),
            json!({
                "status": "UNKNOWN_WEBHOOK",
                "rawPayload": {"foo": 1},
                "timestamp": "2025-01-01T00:00:00Z"
            })
        );
        assert!(notification.into_known().is_none());
    }

    #[test]
    fn test_transfer_request_omits_missing_note() {
        let request = TransferRequest {
            id: TransferId::new("T1"),
            amount: Money::from_cents(50_000),
            currency: Currency::Usd,
            sender_account: "1234567890".to_string(),
            receiver_account: "0987654321".to_string(),
            receiver_name: "Ada Lovelace".to_string(),
            receiver_bank: "First Analytical".to_string(),
            note: None,
        };

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["senderAccount"], "1234567890");
        assert_eq!(json["amount"], json!(500.0));
        assert!(json.get("note").is_none());
        assert_eq!(
            request.hold_request(),
            HoldRequest { account_number: "1234567890".to_string(), amount: Money::from_cents(50_000) }
        );
    }
}
