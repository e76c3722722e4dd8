//! Activities: the outbound calls sagas make on collaborator services.
//!
//! Each activity performs exactly one network call per invocation and
//! classifies the result at this boundary. Retries are the caller's
//! business, driven by [`ActivityFailure::is_retryable`].

use crate::types::{HoldOutcome, HoldRelease, HoldRequest, TransferRequest, WireInitiationAck};
use std::future::Future;
use wire_saga_core::ActivityFailure;

pub mod bank;
pub mod ledger;

pub use bank::{HttpBankClient, classify_wire_response};
pub use ledger::{HttpLedgerClient, classify_hold_response, classify_release_response};

/// The ledger service: holds and releases funds on customer accounts.
pub trait LedgerApi: Send + Sync + 'static {
    /// Reserve `request.amount` on `request.account_number`.
    ///
    /// A `SERVICE_UNAVAILABLE` reply is an outcome, not a failure; the
    /// hold step decides what to do with it.
    fn place_hold(
        &self,
        request: HoldRequest,
    ) -> impl Future<Output = Result<HoldOutcome, ActivityFailure>> + Send;

    /// Release the hold placed as `transaction_id`.
    fn release_hold(
        &self,
        transaction_id: String,
    ) -> impl Future<Output = Result<HoldRelease, ActivityFailure>> + Send;
}

/// The bank's wire initiation endpoint.
pub trait BankApi: Send + Sync + 'static {
    /// Submit `request` for processing. Success is an acknowledgment, not a settlement.
    fn initiate_wire(
        &self,
        request: TransferRequest,
    ) -> impl Future<Output = Result<WireInitiationAck, ActivityFailure>> + Send;
}

/// Record the latency of one activity call.
pub(crate) fn record_latency(activity: &'static str, started: std::time::Instant) {
    metrics::histogram!("activity.duration_seconds", "activity" => activity)
        .record(started.elapsed().as_secs_f64());
}
