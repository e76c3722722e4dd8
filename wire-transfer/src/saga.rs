//! Wire-Transfer Saga: the orchestrator.
//!
//! ```text
//! STARTED ─► HOLD_PENDING ─► HOLD_SECURED ─► WIRE_SENT ─► AWAITING_CONFIRMATION ─┬─► SETTLED_SUCCESS
//!                │  ▲                            │                                ├─► SETTLED_FAILURE
//!                │  └── RetryHold (backoff)      ▼                                └─► EXPIRED
//!                │                          COMPENSATING ─► ABORTED
//!                └──────────────────────────────────────► ABORTED
//! ```
//!
//! One instance per transfer id, named [`instance_name`]. Steps run
//! strictly in order: the wire is never initiated before the hold is
//! secured. The confirmation wait is single-resolution; the first matching
//! signal wins and everything after it is a no-op.

use crate::activities::{BankApi, LedgerApi};
use crate::hold::{HoldEnvironment, run_hold_saga};
use crate::types::{
    HoldOutcome, HoldRelease, KnownNotification, TransferId, TransferRequest, WireInitiationAck,
    WireTransferFailure, WireTransferSuccess,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use wire_saga_core::environment::Clock;
use wire_saga_core::{
    ActivityFailure, SmallVec, async_effect, delay, effect::Effect, emit, reducer::Reducer,
    smallvec,
};
use wire_saga_runtime::{RetryPolicy, retry_activity};

/// Deterministic instance name of the orchestrator for a transfer.
#[must_use]
pub fn instance_name(id: &TransferId) -> String {
    format!("wire-transfer-{id}")
}

/// Orchestrator phases.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SagaPhase {
    /// Created, not yet started
    #[default]
    Started,
    /// Hold sub-saga running (or waiting to be re-run)
    HoldPending,
    /// Funds reserved
    HoldSecured,
    /// Wire initiation in flight
    WireSent,
    /// Waiting for a settlement notification
    AwaitingConfirmation,
    /// Releasing the hold after a failed wire
    Compensating,
    /// Bank reported success
    SettledSuccess,
    /// Bank reported failure
    SettledFailure,
    /// Stopped by a non-retryable failure
    Aborted,
    /// No notification before the confirmation deadline
    Expired,
}

impl SagaPhase {
    /// Whether the saga has finished.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::SettledSuccess | Self::SettledFailure | Self::Aborted | Self::Expired
        )
    }

    /// Wire name of the phase.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Started => "STARTED",
            Self::HoldPending => "HOLD_PENDING",
            Self::HoldSecured => "HOLD_SECURED",
            Self::WireSent => "WIRE_SENT",
            Self::AwaitingConfirmation => "AWAITING_CONFIRMATION",
            Self::Compensating => "COMPENSATING",
            Self::SettledSuccess => "SETTLED_SUCCESS",
            Self::SettledFailure => "SETTLED_FAILURE",
            Self::Aborted => "ABORTED",
            Self::Expired => "EXPIRED",
        }
    }
}

/// Why a saga ended without settling.
///
/// Every variant is non-retryable: the instance is finished.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SagaFailure {
    /// The ledger refused the hold
    #[error("Insufficient balance to place hold.")]
    InsufficientBalance,

    /// The hold step failed for good
    #[error("hold step failed: {failure}")]
    HoldFailed {
        /// Last failure of the step
        failure: ActivityFailure,
    },

    /// The bank refused the wire after the hold was placed
    #[error("wire initiation failed: {failure}")]
    WireFailed {
        /// Classified bank failure
        failure: ActivityFailure,
        /// Whether compensation released the hold
        hold_released: bool,
    },

    /// No settlement notification arrived in time
    #[error("no settlement notification before the confirmation deadline")]
    ConfirmationExpired,
}

impl SagaFailure {
    /// The failure as surfaced to operators.
    #[must_use]
    pub fn as_activity_failure(&self) -> ActivityFailure {
        ActivityFailure::non_retryable(self.to_string())
    }
}

/// Result of a finished saga: the consumed notification, or why it stopped.
pub type SagaOutcome = Result<KnownNotification, SagaFailure>;

/// What the saga did with the last signal it reduced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalReceipt {
    /// The signal settled the saga
    Resolved,
    /// Held in the mailbox until the confirmation wait begins
    Buffered,
    /// The saga had already finished
    AlreadyResolved,
    /// Reached the instance but changed nothing
    Dropped,
}

/// Orchestrator state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WireTransferState {
    /// Current phase
    pub phase: SagaPhase,
    /// The transfer being coordinated
    pub request: Option<TransferRequest>,
    /// Ledger transaction of the hold, for audit and compensation
    pub hold_transaction_id: Option<String>,
    /// Hold step attempts so far
    pub hold_attempts: usize,
    /// Bank acknowledgment
    pub wire_ack: Option<WireInitiationAck>,
    /// A matching notification that arrived before the wait began
    pub mailbox: Option<KnownNotification>,
    /// Final result, set on entering a terminal phase
    pub outcome: Option<SagaOutcome>,
    /// When `Start` was reduced
    pub started_at: Option<DateTime<Utc>>,
    /// When the saga reached a terminal phase
    pub resolved_at: Option<DateTime<Utc>>,
    /// Receipt of the most recent signal
    pub last_signal: Option<SignalReceipt>,
    pending_failure: Option<ActivityFailure>,
}

impl WireTransferState {
    /// A fresh, unstarted instance.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Correlation key, once started.
    #[must_use]
    pub fn transfer_id(&self) -> Option<&TransferId> {
        self.request.as_ref().map(|request| &request.id)
    }

    fn id_for_logs(&self) -> &str {
        self.transfer_id().map_or("-", TransferId::as_str)
    }
}

/// Orchestrator inputs.
#[derive(Debug, Clone, PartialEq)]
pub enum SagaAction {
    /// Command: begin coordinating this transfer
    Start(TransferRequest),
    /// The hold sub-saga finished
    HoldResolved(Result<HoldOutcome, ActivityFailure>),
    /// Timer: re-run the hold step
    RetryHold,
    /// The bank accepted the wire
    WireAcknowledged(WireInitiationAck),
    /// The bank refused the wire for good
    WireRejected(ActivityFailure),
    /// Compensation released the hold
    HoldReleased(HoldRelease),
    /// Compensation could not release the hold
    HoldReleaseFailed(ActivityFailure),
    /// Signal: the bank settled the transfer
    SuccessSignal(WireTransferSuccess),
    /// Signal: the bank failed the transfer
    FailureSignal(WireTransferFailure),
    /// Timer: the confirmation deadline passed
    ConfirmationTimedOut,
    /// Announcement: the saga finished with this outcome
    Finished(SagaOutcome),
}

impl SagaAction {
    /// The signal carrying `notification`.
    #[must_use]
    pub fn from_signal(notification: KnownNotification) -> Self {
        match notification {
            KnownNotification::Success(success) => Self::SuccessSignal(success),
            KnownNotification::Failure(failure) => Self::FailureSignal(failure),
        }
    }

    /// Whether this is the termination announcement.
    #[must_use]
    pub const fn is_finished(&self) -> bool {
        matches!(self, Self::Finished(_))
    }
}

/// Independent retry and time budgets of the saga steps.
#[derive(Debug, Clone)]
pub struct SagaPolicies {
    /// Re-runs of the whole hold sub-saga
    pub hold_step: RetryPolicy,
    /// Retries of the ledger call inside one sub-saga run
    pub hold_activity: RetryPolicy,
    /// Retries of the bank call
    pub wire_activity: RetryPolicy,
    /// Retries of the compensating release
    pub release_activity: RetryPolicy,
    /// Time budget of one sub-saga run
    pub hold_step_timeout: Duration,
    /// Bound on the confirmation wait; `None` waits forever
    pub confirmation_timeout: Option<Duration>,
}

impl Default for SagaPolicies {
    fn default() -> Self {
        let activity = RetryPolicy::builder()
            .max_retries(5)
            .initial_delay(Duration::from_millis(200))
            .max_delay(Duration::from_secs(10))
            .build();

        Self {
            hold_step: RetryPolicy::builder()
                .max_retries(5)
                .initial_delay(Duration::from_millis(500))
                .max_delay(Duration::from_secs(10))
                .build(),
            hold_activity: activity.clone(),
            wire_activity: activity.clone(),
            release_activity: activity,
            hold_step_timeout: Duration::from_secs(60),
            confirmation_timeout: None,
        }
    }
}

/// Orchestrator dependencies.
pub struct WireTransferEnvironment<L, B> {
    /// Ledger client
    pub ledger: Arc<L>,
    /// Bank client
    pub bank: Arc<B>,
    /// Time source for `started_at` / `resolved_at`
    pub clock: Arc<dyn Clock>,
    /// Step budgets
    pub policies: SagaPolicies,
}

impl<L, B> Clone for WireTransferEnvironment<L, B> {
    fn clone(&self) -> Self {
        Self {
            ledger: Arc::clone(&self.ledger),
            bank: Arc::clone(&self.bank),
            clock: Arc::clone(&self.clock),
            policies: self.policies.clone(),
        }
    }
}

/// Reducer of the wire-transfer saga.
pub struct WireTransferSaga<L, B> {
    _collaborators: PhantomData<fn() -> (L, B)>,
}

impl<L, B> WireTransferSaga<L, B> {
    /// Create the reducer.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            _collaborators: PhantomData,
        }
    }
}

impl<L, B> Default for WireTransferSaga<L, B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<L, B> Clone for WireTransferSaga<L, B> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

type Effects = SmallVec<[Effect<SagaAction>; 4]>;

impl<L: LedgerApi, B: BankApi> WireTransferSaga<L, B> {
    fn transition(state: &mut WireTransferState, to: SagaPhase) {
        let from = state.phase;
        state.phase = to;
        tracing::info!(
            transfer_id = %state.id_for_logs(),
            from = from.as_str(),
            to = to.as_str(),
            "Saga transition"
        );
        metrics::counter!("wire_saga.transitions", "to" => to.as_str()).increment(1);
    }

    fn finish(
        state: &mut WireTransferState,
        env: &WireTransferEnvironment<L, B>,
        to: SagaPhase,
        outcome: SagaOutcome,
    ) -> Effects {
        Self::transition(state, to);
        state.mailbox = None;
        state.outcome = Some(outcome.clone());
        state.resolved_at = Some(env.clock.now());
        metrics::counter!("wire_saga.settled", "outcome" => to.as_str()).increment(1);

        match &outcome {
            Ok(notification) => tracing::info!(
                transfer_id = %state.id_for_logs(),
                bank_transaction = notification.transaction_id(),
                "Saga resolved by settlement notification"
            ),
            Err(failure) => tracing::warn!(
                transfer_id = %state.id_for_logs(),
                error = %failure,
                "Saga ended without settlement"
            ),
        }

        smallvec![emit!(SagaAction::Finished(outcome))]
    }

    fn resolve(
        state: &mut WireTransferState,
        env: &WireTransferEnvironment<L, B>,
        notification: KnownNotification,
    ) -> Effects {
        let to = if notification.is_success() {
            SagaPhase::SettledSuccess
        } else {
            SagaPhase::SettledFailure
        };
        Self::finish(state, env, to, Ok(notification))
    }

    fn abort(
        state: &mut WireTransferState,
        env: &WireTransferEnvironment<L, B>,
        failure: SagaFailure,
    ) -> Effects {
        Self::finish(state, env, SagaPhase::Aborted, Err(failure))
    }

    fn place_hold(state: &WireTransferState, env: &WireTransferEnvironment<L, B>) -> Effects {
        let Some(request) = state.request.as_ref() else {
            return SmallVec::new();
        };

        let hold_env = HoldEnvironment {
            ledger: Arc::clone(&env.ledger),
            retry: env.policies.hold_activity.clone(),
            release: env.policies.release_activity.clone(),
        };
        let timeout = env.policies.hold_step_timeout;
        let transfer_id = request.id.clone();
        let hold_request = request.hold_request();
        tracing::info!(
            transfer_id = %transfer_id,
            attempt = state.hold_attempts,
            account = %hold_request.account_number,
            "Launching hold sub-saga"
        );

        smallvec![async_effect! {
            let result = run_hold_saga(hold_env, &transfer_id, hold_request, timeout).await;
            Some(SagaAction::HoldResolved(result))
        }]
    }

    fn retry_hold_or_abort(
        state: &mut WireTransferState,
        env: &WireTransferEnvironment<L, B>,
        failure: ActivityFailure,
    ) -> Effects {
        let retries_so_far = state.hold_attempts.saturating_sub(1);
        let policy = &env.policies.hold_step;

        if !policy.allows_retry(retries_so_far) {
            return Self::abort(
                state,
                env,
                SagaFailure::HoldFailed {
                    failure: failure.exhausted(),
                },
            );
        }

        let backoff = policy.delay_for_attempt(retries_so_far);
        tracing::warn!(
            transfer_id = %state.id_for_logs(),
            attempt = state.hold_attempts,
            delay_ms = backoff.as_millis(),
            error = %failure,
            "Hold step failed, retrying..."
        );
        metrics::counter!("wire_saga.hold_step.retries").increment(1);

        smallvec![delay! {
            duration: backoff,
            action: SagaAction::RetryHold
        }]
    }

    fn initiate_wire(state: &WireTransferState, env: &WireTransferEnvironment<L, B>) -> Effects {
        let Some(request) = state.request.clone() else {
            return SmallVec::new();
        };

        let bank = Arc::clone(&env.bank);
        let policy = env.policies.wire_activity.clone();

        smallvec![async_effect! {
            let result = retry_activity(&policy, "initiate_wire", || {
                let bank = Arc::clone(&bank);
                let request = request.clone();
                async move { bank.initiate_wire(request).await }
            })
            .await;

            Some(match result {
                Ok(ack) => SagaAction::WireAcknowledged(ack),
                Err(failure) => SagaAction::WireRejected(failure),
            })
        }]
    }

    fn release_hold(transaction_id: String, env: &WireTransferEnvironment<L, B>) -> Effects {
        let ledger = Arc::clone(&env.ledger);
        let policy = env.policies.release_activity.clone();

        smallvec![async_effect! {
            let result = retry_activity(&policy, "release_hold", || {
                let ledger = Arc::clone(&ledger);
                let transaction_id = transaction_id.clone();
                async move { ledger.release_hold(transaction_id).await }
            })
            .await;

            Some(match result {
                Ok(release) => SagaAction::HoldReleased(release),
                Err(failure) => SagaAction::HoldReleaseFailed(failure),
            })
        }]
    }

    fn on_hold_resolved(
        state: &mut WireTransferState,
        env: &WireTransferEnvironment<L, B>,
        result: Result<HoldOutcome, ActivityFailure>,
    ) -> Effects {
        match result {
            Ok(HoldOutcome::Success { transaction_id }) => {
                tracing::info!(
                    transfer_id = %state.id_for_logs(),
                    hold = %transaction_id,
                    "Hold placed"
                );
                state.hold_transaction_id = Some(transaction_id);
                Self::transition(state, SagaPhase::HoldSecured);
                let effects = Self::initiate_wire(state, env);
                Self::transition(state, SagaPhase::WireSent);
                effects
            },
            Ok(HoldOutcome::InsufficientBalance) => {
                Self::abort(state, env, SagaFailure::InsufficientBalance)
            },
            Ok(HoldOutcome::ServiceUnavailable) => Self::retry_hold_or_abort(
                state,
                env,
                ActivityFailure::retryable("Service is currently unavailable"),
            ),
            Err(failure) if failure.is_retryable() => Self::retry_hold_or_abort(state, env, failure),
            Err(failure) => Self::abort(state, env, SagaFailure::HoldFailed { failure }),
        }
    }

    fn on_wire_acknowledged(
        state: &mut WireTransferState,
        env: &WireTransferEnvironment<L, B>,
        ack: WireInitiationAck,
    ) -> Effects {
        tracing::info!(
            transfer_id = %state.id_for_logs(),
            bank_message = %ack.message,
            "Wire accepted by bank"
        );
        state.wire_ack = Some(ack);
        Self::transition(state, SagaPhase::AwaitingConfirmation);

        if let Some(notification) = state.mailbox.take() {
            tracing::info!(transfer_id = %state.id_for_logs(), "Consuming buffered notification");
            return Self::resolve(state, env, notification);
        }

        match env.policies.confirmation_timeout {
            Some(deadline) => smallvec![delay! {
                duration: deadline,
                action: SagaAction::ConfirmationTimedOut
            }],
            None => SmallVec::new(),
        }
    }

    fn on_wire_rejected(
        state: &mut WireTransferState,
        env: &WireTransferEnvironment<L, B>,
        failure: ActivityFailure,
    ) -> Effects {
        match state.hold_transaction_id.clone() {
            Some(transaction_id) => {
                tracing::warn!(
                    transfer_id = %state.id_for_logs(),
                    hold = %transaction_id,
                    error = %failure,
                    "Wire failed after hold was placed, releasing hold"
                );
                state.pending_failure = Some(failure);
                Self::transition(state, SagaPhase::Compensating);
                Self::release_hold(transaction_id, env)
            },
            None => Self::abort(
                state,
                env,
                SagaFailure::WireFailed {
                    failure,
                    hold_released: false,
                },
            ),
        }
    }

    fn on_compensated(
        state: &mut WireTransferState,
        env: &WireTransferEnvironment<L, B>,
        hold_released: bool,
    ) -> Effects {
        let failure = state
            .pending_failure
            .take()
            .unwrap_or_else(|| ActivityFailure::non_retryable("Wire initiation failed"));
        Self::abort(
            state,
            env,
            SagaFailure::WireFailed {
                failure,
                hold_released,
            },
        )
    }

    fn on_signal(
        state: &mut WireTransferState,
        env: &WireTransferEnvironment<L, B>,
        notification: KnownNotification,
    ) -> Effects {
        let (receipt, effects) = Self::receive_signal(state, env, notification);
        state.last_signal = Some(receipt);
        effects
    }

    fn receive_signal(
        state: &mut WireTransferState,
        env: &WireTransferEnvironment<L, B>,
        notification: KnownNotification,
    ) -> (SignalReceipt, Effects) {
        // Before Start the id is unknown; Start checks the mailbox instead.
        if state
            .transfer_id()
            .is_some_and(|id| id != notification.request_id())
        {
            tracing::warn!(
                transfer_id = %state.id_for_logs(),
                request_id = %notification.request_id(),
                "Ignoring notification addressed to another transfer"
            );
            return (SignalReceipt::Dropped, SmallVec::new());
        }

        match state.phase {
            SagaPhase::AwaitingConfirmation => {
                (SignalReceipt::Resolved, Self::resolve(state, env, notification))
            },
            SagaPhase::Started
            | SagaPhase::HoldPending
            | SagaPhase::HoldSecured
            | SagaPhase::WireSent => {
                if state.mailbox.is_some() {
                    tracing::debug!(
                        transfer_id = %state.id_for_logs(),
                        "Notification already buffered, dropping duplicate"
                    );
                    return (SignalReceipt::Dropped, SmallVec::new());
                }
                tracing::info!(
                    transfer_id = %state.id_for_logs(),
                    phase = state.phase.as_str(),
                    "Buffering early notification"
                );
                state.mailbox = Some(notification);
                (SignalReceipt::Buffered, SmallVec::new())
            },
            phase if phase.is_terminal() => (SignalReceipt::AlreadyResolved, SmallVec::new()),
            phase => {
                tracing::debug!(
                    transfer_id = %state.id_for_logs(),
                    phase = phase.as_str(),
                    "Notification has no effect in this phase"
                );
                (SignalReceipt::Dropped, SmallVec::new())
            },
        }
    }
}

impl<L: LedgerApi, B: BankApi> Reducer for WireTransferSaga<L, B> {
    type State = WireTransferState;
    type Action = SagaAction;
    type Environment = WireTransferEnvironment<L, B>;

    fn reduce(
        &self,
        state: &mut WireTransferState,
        action: SagaAction,
        env: &WireTransferEnvironment<L, B>,
    ) -> Effects {
        match (state.phase, action) {
            (SagaPhase::Started, SagaAction::Start(request)) if state.request.is_none() => {
                if state
                    .mailbox
                    .as_ref()
                    .is_some_and(|early| early.request_id() != &request.id)
                {
                    tracing::warn!(
                        transfer_id = %request.id,
                        "Discarding buffered notification addressed to another transfer"
                    );
                    state.mailbox = None;
                }
                state.request = Some(request);
                state.started_at = Some(env.clock.now());
                state.hold_attempts = 1;
                Self::transition(state, SagaPhase::HoldPending);
                Self::place_hold(state, env)
            },
            (SagaPhase::HoldPending, SagaAction::HoldResolved(result)) => {
                Self::on_hold_resolved(state, env, result)
            },
            (SagaPhase::HoldPending, SagaAction::RetryHold) => {
                state.hold_attempts += 1;
                Self::place_hold(state, env)
            },
            (SagaPhase::WireSent, SagaAction::WireAcknowledged(ack)) => {
                Self::on_wire_acknowledged(state, env, ack)
            },
            (SagaPhase::WireSent, SagaAction::WireRejected(failure)) => {
                Self::on_wire_rejected(state, env, failure)
            },
            (SagaPhase::Compensating, SagaAction::HoldReleased(release)) => {
                tracing::info!(
                    transfer_id = %state.id_for_logs(),
                    hold = %release.transaction_id,
                    "Hold released"
                );
                Self::on_compensated(state, env, true)
            },
            (SagaPhase::Compensating, SagaAction::HoldReleaseFailed(failure)) => {
                tracing::error!(
                    transfer_id = %state.id_for_logs(),
                    hold = ?state.hold_transaction_id,
                    error = %failure,
                    "Hold release failed, manual reconciliation required"
                );
                Self::on_compensated(state, env, false)
            },
            (_, SagaAction::SuccessSignal(success)) => {
                Self::on_signal(state, env, KnownNotification::Success(success))
            },
            (_, SagaAction::FailureSignal(failure)) => {
                Self::on_signal(state, env, KnownNotification::Failure(failure))
            },
            (SagaPhase::AwaitingConfirmation, SagaAction::ConfirmationTimedOut) => {
                tracing::warn!(
                    transfer_id = %state.id_for_logs(),
                    hold = ?state.hold_transaction_id,
                    "Confirmation deadline passed, hold left in place"
                );
                Self::finish(
                    state,
                    env,
                    SagaPhase::Expired,
                    Err(SagaFailure::ConfirmationExpired),
                )
            },
            (_, SagaAction::Finished(_)) => SmallVec::new(),
            (phase, action) => {
                tracing::debug!(
                    transfer_id = %state.id_for_logs(),
                    phase = phase.as_str(),
                    ?action,
                    "Saga ignored action"
                );
                SmallVec::new()
            },
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::mocks::{MockBank, MockLedger};
    use crate::types::{AckStatus, Currency, FailureReason, Money};
    use wire_saga_testing::{ReducerTest, assertions, test_clock};

    type Saga = WireTransferSaga<MockLedger, MockBank>;

    fn request(id: &str) -> TransferRequest {
        TransferRequest {
            id: TransferId::new(id),
            amount: Money::from_cents(50_000),
            currency: Currency::Usd,
            sender_account: "1234567890".to_string(),
            receiver_account: "0987654321".to_string(),
            receiver_name: "Ada Lovelace".to_string(),
            receiver_bank: "First Analytical".to_string(),
            note: None,
        }
    }

    fn env(policies: SagaPolicies) -> WireTransferEnvironment<MockLedger, MockBank> {
        WireTransferEnvironment {
            ledger: Arc::new(MockLedger::default()),
            bank: Arc::new(MockBank::default()),
            clock: Arc::new(test_clock()),
            policies,
        }
    }

    fn state_in(phase: SagaPhase) -> WireTransferState {
        WireTransferState {
            phase,
            request: Some(request("T1")),
            hold_attempts: 1,
            hold_transaction_id: (phase != SagaPhase::HoldPending).then(|| "hold-1".to_string()),
            ..WireTransferState::new()
        }
    }

    fn ack() -> WireInitiationAck {
        WireInitiationAck {
            transaction_id: None,
            status: AckStatus::Success,
            message: "Accepted".to_string(),
        }
    }

    fn success(id: &str) -> WireTransferSuccess {
        WireTransferSuccess {
            transaction_id: "bank-tx-1".to_string(),
            request_id: TransferId::new(id),
            timestamp: test_clock().now(),
            comments: None,
        }
    }

    #[test]
    fn test_start_launches_hold_first() {
        ReducerTest::new(Saga::new())
            .with_env(env(SagaPolicies::default()))
            .given_state(WireTransferState::new())
            .when_action(SagaAction::Start(request("T1")))
            .then_state(|state| {
                assert_eq!(state.phase, SagaPhase::HoldPending);
                assert_eq!(state.hold_attempts, 1);
                assert_eq!(state.started_at, Some(test_clock().now()));
            })
            .then_effects(|effects| {
                assertions::assert_effects_count(effects, 1);
                assertions::assert_has_future_effect(effects);
            })
            .run();
    }

    #[test]
    fn test_second_start_is_ignored() {
        ReducerTest::new(Saga::new())
            .with_env(env(SagaPolicies::default()))
            .given_state(WireTransferState::new())
            .when_actions([SagaAction::Start(request("T1")), SagaAction::Start(request("T2"))])
            .then_state(|state| assert_eq!(state.transfer_id(), Some(&TransferId::new("T1"))))
            .then_effects(assertions::assert_no_effects)
            .run();
    }

    #[test]
    fn test_hold_success_sends_wire() {
        ReducerTest::new(Saga::new())
            .with_env(env(SagaPolicies::default()))
            .given_state(state_in(SagaPhase::HoldPending))
            .when_action(SagaAction::HoldResolved(Ok(HoldOutcome::Success {
                transaction_id: "hold-9".to_string(),
            })))
            .then_state(|state| {
                assert_eq!(state.phase, SagaPhase::WireSent);
                assert_eq!(state.hold_transaction_id.as_deref(), Some("hold-9"));
            })
            .then_effects(assertions::assert_has_future_effect)
            .run();
    }

    #[test]
    fn test_insufficient_balance_aborts_without_compensation() {
        ReducerTest::new(Saga::new())
            .with_env(env(SagaPolicies::default()))
            .given_state(state_in(SagaPhase::HoldPending))
            .when_action(SagaAction::HoldResolved(Ok(HoldOutcome::InsufficientBalance)))
            .then_state(|state| {
                assert_eq!(state.phase, SagaPhase::Aborted);
                assert_eq!(state.outcome, Some(Err(SagaFailure::InsufficientBalance)));
                assert_eq!(state.resolved_at, Some(test_clock().now()));
            })
            .then_effects(|effects| assertions::assert_effects_count(effects, 1))
            .run();
    }

    #[test]
    fn test_service_unavailable_schedules_hold_retry() {
        let mut policies = SagaPolicies::default();
        policies.hold_step = RetryPolicy::builder()
            .max_retries(3)
            .initial_delay(Duration::from_millis(250))
            .build();

        ReducerTest::new(Saga::new())
            .with_env(env(policies))
            .given_state(state_in(SagaPhase::HoldPending))
            .when_action(SagaAction::HoldResolved(Ok(HoldOutcome::ServiceUnavailable)))
            .then_state(|state| assert_eq!(state.phase, SagaPhase::HoldPending))
            .then_effects(|effects| {
                let (duration, action) = assertions::assert_has_delay_effect(effects);
                assert_eq!(duration, Duration::from_millis(250));
                assert_eq!(*action, SagaAction::RetryHold);
            })
            .run();
    }

    #[test]
    fn test_hold_step_budget_exhausts() {
        let mut policies = SagaPolicies::default();
        policies.hold_step = RetryPolicy::builder().max_retries(1).build();
        let mut state = state_in(SagaPhase::HoldPending);
        state.hold_attempts = 2;

        ReducerTest::new(Saga::new())
            .with_env(env(policies))
            .given_state(state)
            .when_action(SagaAction::HoldResolved(Err(ActivityFailure::retryable(
                "Hold step timed out",
            ))))
            .then_state(|state| {
                assert_eq!(state.phase, SagaPhase::Aborted);
                assert_eq!(
                    state.outcome,
                    Some(Err(SagaFailure::HoldFailed {
                        failure: ActivityFailure::non_retryable("retries exhausted: Hold step timed out"),
                    }))
                );
            })
            .run();
    }

    #[test]
    fn test_early_signal_is_buffered_then_consumed() {
        ReducerTest::new(Saga::new())
            .with_env(env(SagaPolicies::default()))
            .given_state(state_in(SagaPhase::WireSent))
            .when_actions([
                SagaAction::SuccessSignal(success("T1")),
                SagaAction::WireAcknowledged(ack()),
            ])
            .then_state(|state| {
                assert_eq!(state.phase, SagaPhase::SettledSuccess);
                assert!(state.mailbox.is_none());
                assert_eq!(
                    state.outcome,
                    Some(Ok(KnownNotification::Success(success("T1"))))
                );
            })
            .run();
    }

    #[test]
    fn test_signal_before_start_is_kept_for_the_run() {
        ReducerTest::new(Saga::new())
            .with_env(env(SagaPolicies::default()))
            .given_state(WireTransferState::new())
            .when_actions([
                SagaAction::SuccessSignal(success("T1")),
                SagaAction::Start(request("T1")),
                SagaAction::HoldResolved(Ok(HoldOutcome::Success {
                    transaction_id: "hold-1".to_string(),
                })),
                SagaAction::WireAcknowledged(ack()),
            ])
            .then_state(|state| {
                assert_eq!(state.phase, SagaPhase::SettledSuccess);
                assert_eq!(
                    state.outcome,
                    Some(Ok(KnownNotification::Success(success("T1"))))
                );
            })
            .run();
    }

    #[test]
    fn test_signal_before_start_for_other_transfer_is_discarded() {
        ReducerTest::new(Saga::new())
            .with_env(env(SagaPolicies::default()))
            .given_state(WireTransferState::new())
            .when_actions([
                SagaAction::SuccessSignal(success("T2")),
                SagaAction::Start(request("T1")),
            ])
            .then_state(|state| {
                assert_eq!(state.phase, SagaPhase::HoldPending);
                assert!(state.mailbox.is_none());
            })
            .run();
    }

    #[test]
    fn test_signal_receipts() {
        let cases = [
            (SagaPhase::AwaitingConfirmation, SignalReceipt::Resolved),
            (SagaPhase::HoldPending, SignalReceipt::Buffered),
            (SagaPhase::Compensating, SignalReceipt::Dropped),
            (SagaPhase::Expired, SignalReceipt::AlreadyResolved),
        ];
        for (phase, receipt) in cases {
            ReducerTest::new(Saga::new())
                .with_env(env(SagaPolicies::default()))
                .given_state(state_in(phase))
                .when_action(SagaAction::SuccessSignal(success("T1")))
                .then_state(move |state| assert_eq!(state.last_signal, Some(receipt), "{phase:?}"))
                .run();
        }
    }

    #[test]
    fn test_duplicate_early_signal_is_dropped() {
        ReducerTest::new(Saga::new())
            .with_env(env(SagaPolicies::default()))
            .given_state(state_in(SagaPhase::WireSent))
            .when_actions([
                SagaAction::SuccessSignal(success("T1")),
                SagaAction::SuccessSignal(success("T1")),
            ])
            .then_state(|state| {
                assert_eq!(state.last_signal, Some(SignalReceipt::Dropped));
                assert!(state.mailbox.is_some());
            })
            .then_effects(assertions::assert_no_effects)
            .run();
    }

    #[test]
    fn test_signal_for_other_transfer_is_ignored() {
        ReducerTest::new(Saga::new())
            .with_env(env(SagaPolicies::default()))
            .given_state(state_in(SagaPhase::AwaitingConfirmation))
            .when_action(SagaAction::SuccessSignal(success("T2")))
            .then_state(|state| {
                assert_eq!(state.phase, SagaPhase::AwaitingConfirmation);
                assert!(state.outcome.is_none());
            })
            .then_effects(assertions::assert_no_effects)
            .run();
    }

    #[test]
    fn test_failure_signal_settles_failure() {
        let failure = WireTransferFailure {
            transaction_id: "bank-tx-2".to_string(),
            request_id: TransferId::new("T1"),
            timestamp: test_clock().now(),
            failure_reason: FailureReason::InsufficientFunds,
            comments: Some("retry tomorrow".to_string()),
        };

        ReducerTest::new(Saga::new())
            .with_env(env(SagaPolicies::default()))
            .given_state(state_in(SagaPhase::AwaitingConfirmation))
            .when_actions([
                SagaAction::FailureSignal(failure.clone()),
                SagaAction::SuccessSignal(success("T1")),
            ])
            .then_state(move |state| {
                assert_eq!(state.phase, SagaPhase::SettledFailure);
                assert_eq!(state.outcome, Some(Ok(KnownNotification::Failure(failure))));
            })
            .then_effects(assertions::assert_no_effects)
            .run();
    }

    #[test]
    fn test_wire_rejection_compensates() {
        ReducerTest::new(Saga::new())
            .with_env(env(SagaPolicies::default()))
            .given_state(state_in(SagaPhase::WireSent))
            .when_action(SagaAction::WireRejected(ActivityFailure::non_retryable(
                "Authentication failed",
            )))
            .then_state(|state| assert_eq!(state.phase, SagaPhase::Compensating))
            .then_effects(assertions::assert_has_future_effect)
            .run();
    }

    #[test]
    fn test_release_failure_still_aborts() {
        ReducerTest::new(Saga::new())
            .with_env(env(SagaPolicies::default()))
            .given_state(state_in(SagaPhase::WireSent))
            .when_actions([
                SagaAction::WireRejected(ActivityFailure::non_retryable("Authentication failed")),
                SagaAction::HoldReleaseFailed(ActivityFailure::non_retryable("Ledger down")),
            ])
            .then_state(|state| {
                assert_eq!(state.phase, SagaPhase::Aborted);
                assert_eq!(
                    state.outcome,
                    Some(Err(SagaFailure::WireFailed {
                        failure: ActivityFailure::non_retryable("Authentication failed"),
                        hold_released: false,
                    }))
                );
            })
            .run();
    }

    #[test]
    fn test_confirmation_deadline() {
        let mut policies = SagaPolicies::default();
        policies.confirmation_timeout = Some(Duration::from_secs(30));

        ReducerTest::new(Saga::new())
            .with_env(env(policies.clone()))
            .given_state(state_in(SagaPhase::WireSent))
            .when_action(SagaAction::WireAcknowledged(ack()))
            .then_effects(|effects| {
                let (duration, action) = assertions::assert_has_delay_effect(effects);
                assert_eq!(duration, Duration::from_secs(30));
                assert_eq!(*action, SagaAction::ConfirmationTimedOut);
            })
            .run();

        ReducerTest::new(Saga::new())
            .with_env(env(policies))
            .given_state(state_in(SagaPhase::AwaitingConfirmation))
            .when_actions([
                SagaAction::ConfirmationTimedOut,
                SagaAction::SuccessSignal(success("T1")),
            ])
            .then_state(|state| {
                assert_eq!(state.phase, SagaPhase::Expired);
                assert_eq!(state.outcome, Some(Err(SagaFailure::ConfirmationExpired)));
            })
            .run();
    }

    #[test]
    fn test_phase_names() {
        assert_eq!(SagaPhase::AwaitingConfirmation.as_str(), "AWAITING_CONFIRMATION");
        assert!(SagaPhase::Expired.is_terminal());
        assert!(!SagaPhase::Compensating.is_terminal());
        assert_eq!(instance_name(&TransferId::new("T1")), "wire-transfer-T1");
    }
}
