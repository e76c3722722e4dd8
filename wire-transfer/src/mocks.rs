//! Scripted in-memory collaborators for tests and local runs.
//!
//! Each mock answers from a queue of scripted results and falls back to a
//! success once the queue is empty. Calls are appended to a [`CallLog`]
//! that can be shared between mocks, so tests can check cross-service
//! ordering (hold before wire).

use crate::activities::{BankApi, LedgerApi};
use crate::types::{
    AckStatus, HoldOutcome, HoldRelease, HoldRequest, LedgerStatus, TransferId, TransferRequest,
    WireInitiationAck,
};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use wire_saga_core::ActivityFailure;

/// One recorded collaborator call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    /// `LedgerApi::place_hold`
    PlaceHold(HoldRequest),
    /// `LedgerApi::release_hold`
    ReleaseHold(String),
    /// `BankApi::initiate_wire`
    InitiateWire(TransferId),
}

/// Shared, ordered record of calls.
#[derive(Debug, Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<Call>>>);

impl CallLog {
    /// Create an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, call: Call) {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).push(call);
    }

    /// Every call so far, in order.
    #[must_use]
    pub fn entries(&self) -> Vec<Call> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

fn pop<T>(queue: &Mutex<VecDeque<T>>) -> Option<T> {
    queue.lock().unwrap_or_else(PoisonError::into_inner).pop_front()
}

fn push<T>(queue: &Mutex<VecDeque<T>>, item: T) {
    queue.lock().unwrap_or_else(PoisonError::into_inner).push_back(item);
}

/// In-memory ledger.
#[derive(Debug, Default)]
pub struct MockLedger {
    holds: Mutex<VecDeque<Result<HoldOutcome, ActivityFailure>>>,
    releases: Mutex<VecDeque<Result<HoldRelease, ActivityFailure>>>,
    hold_latency: Option<Duration>,
    log: CallLog,
}

impl MockLedger {
    /// A ledger recording into `log`.
    #[must_use]
    pub fn with_log(log: CallLog) -> Self {
        Self {
            log,
            ..Self::default()
        }
    }

    /// Delay every hold answer by `latency`.
    #[must_use]
    pub fn with_hold_latency(mut self, latency: Duration) -> Self {
        self.hold_latency = Some(latency);
        self
    }

    /// Queue the result of the next unscripted hold attempt.
    pub fn script_hold(&self, result: Result<HoldOutcome, ActivityFailure>) {
        push(&self.holds, result);
    }

    /// Queue the result of the next unscripted release.
    pub fn script_release(&self, result: Result<HoldRelease, ActivityFailure>) {
        push(&self.releases, result);
    }

    /// Hold placements received so far.
    #[must_use]
    pub fn hold_calls(&self) -> usize {
        self.log
            .entries()
            .iter()
            .filter(|call| matches!(call, Call::PlaceHold(_)))
            .count()
    }

    /// Hold transactions released so far.
    #[must_use]
    pub fn released(&self) -> Vec<String> {
        self.log
            .entries()
            .into_iter()
            .filter_map(|call| match call {
                Call::ReleaseHold(transaction_id) => Some(transaction_id),
                _ => None,
            })
            .collect()
    }
}

impl LedgerApi for MockLedger {
    async fn place_hold(&self, request: HoldRequest) -> Result<HoldOutcome, ActivityFailure> {
        self.log.push(Call::PlaceHold(request));
        let number = self.hold_calls();
        let scripted = pop(&self.holds);
        if let Some(latency) = self.hold_latency {
            tokio::time::sleep(latency).await;
        }
        scripted.unwrap_or_else(|| {
            Ok(HoldOutcome::Success {
                transaction_id: format!("hold-{number}"),
            })
        })
    }

    async fn release_hold(&self, transaction_id: String) -> Result<HoldRelease, ActivityFailure> {
        self.log.push(Call::ReleaseHold(transaction_id.clone()));
        pop(&self.releases).unwrap_or_else(|| {
            Ok(HoldRelease {
                transaction_id,
                status: LedgerStatus::FundsReleased,
                message: "Funds released".to_string(),
            })
        })
    }
}

/// In-memory bank.
#[derive(Debug, Default)]
pub struct MockBank {
    wires: Mutex<VecDeque<Result<WireInitiationAck, ActivityFailure>>>,
    latency: Option<Duration>,
    log: CallLog,
}

impl MockBank {
    /// A bank recording into `log`.
    #[must_use]
    pub fn with_log(log: CallLog) -> Self {
        Self {
            log,
            ..Self::default()
        }
    }

    /// Delay every answer by `latency`.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Queue the result of the next unscripted wire initiation.
    pub fn script_wire(&self, result: Result<WireInitiationAck, ActivityFailure>) {
        push(&self.wires, result);
    }

    /// Wire initiations received so far.
    #[must_use]
    pub fn wire_calls(&self) -> usize {
        self.log
            .entries()
            .iter()
            .filter(|call| matches!(call, Call::InitiateWire(_)))
            .count()
    }
}

impl BankApi for MockBank {
    async fn initiate_wire(&self, request: TransferRequest) -> Result<WireInitiationAck, ActivityFailure> {
        self.log.push(Call::InitiateWire(request.id.clone()));
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        pop(&self.wires).unwrap_or_else(|| {
            Ok(WireInitiationAck {
                transaction_id: Some(format!("bank-{}", request.id)),
                status: AckStatus::Success,
                message: "Wire transfer accepted for processing".to_string(),
            })
        })
    }
}
