//! Hold Sub-Saga: one hold attempt as its own short-lived instance.
//!
//! The parent runs it with its own time budget through
//! [`run_hold_saga`] and gets the [`HoldOutcome`] back verbatim. Transient
//! ledger failures are retried inside, under the hold *activity* policy;
//! the parent's hold *step* policy is applied on top, around the whole
//! sub-saga.
//!
//! When the budget runs out the parent abandons the instance and moves on.
//! The ledger call may still land: an abandoned sub-saga releases any hold
//! it ends up placing, so a timed-out attempt never leaves funds reserved.

use crate::activities::LedgerApi;
use crate::types::{HoldOutcome, HoldRelease, HoldRequest, TransferId};
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;
use wire_saga_core::{ActivityFailure, SmallVec, async_effect, effect::Effect, reducer::Reducer, smallvec};
use wire_saga_runtime::{RetryPolicy, Store, StoreError, retry_activity};

/// Deterministic instance name of the hold sub-saga for a transfer.
#[must_use]
pub fn instance_name(id: &TransferId) -> String {
    format!("place-hold-{id}")
}

/// Lifecycle of the sub-saga.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum HoldPhase {
    /// Not started
    #[default]
    Idle,
    /// Hold activity in flight
    Placing,
    /// Outcome known
    Completed,
    /// The parent gave up while the hold activity was in flight
    Abandoned,
    /// Releasing a hold nobody is waiting for
    Releasing,
    /// The orphaned hold was released
    Released,
    /// The orphaned hold could not be released
    Stranded,
}

/// Sub-saga state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HoldState {
    /// Where the sub-saga is
    pub phase: HoldPhase,
    /// What is being held
    pub request: Option<HoldRequest>,
    /// Final result
    pub result: Option<Result<HoldOutcome, ActivityFailure>>,
}

impl HoldState {
    fn placed_hold(&self) -> Option<String> {
        match &self.result {
            Some(Ok(HoldOutcome::Success { transaction_id })) => Some(transaction_id.clone()),
            _ => None,
        }
    }
}

/// Sub-saga inputs.
#[derive(Debug, Clone, PartialEq)]
pub enum HoldAction {
    /// Command: place the hold
    Place(HoldRequest),
    /// The ledger answered
    Completed(HoldOutcome),
    /// The ledger call failed for good
    Failed(ActivityFailure),
    /// Command: the parent stopped waiting
    Abandon,
    /// The orphaned hold was released
    Released(HoldRelease),
    /// The orphaned hold could not be released
    ReleaseFailed(ActivityFailure),
}

impl HoldAction {
    /// Whether this action ends the sub-saga.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed(_) | Self::Failed(_))
    }
}

/// Dependencies of the sub-saga.
pub struct HoldEnvironment<L> {
    /// Ledger client
    pub ledger: Arc<L>,
    /// Hold activity retry budget
    pub retry: RetryPolicy,
    /// Retry budget for releasing an orphaned hold
    pub release: RetryPolicy,
}

impl<L> Clone for HoldEnvironment<L> {
    fn clone(&self) -> Self {
        Self {
            ledger: Arc::clone(&self.ledger),
            retry: self.retry.clone(),
            release: self.release.clone(),
        }
    }
}

/// Reducer of the hold sub-saga.
pub struct HoldSaga<L> {
    _ledger: PhantomData<fn() -> L>,
}

impl<L> HoldSaga<L> {
    /// Create the reducer.
    #[must_use]
    pub const fn new() -> Self {
        Self { _ledger: PhantomData }
    }
}

impl<L> Default for HoldSaga<L> {
    fn default() -> Self {
        Self::new()
    }
}

impl<L> Clone for HoldSaga<L> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<L: LedgerApi> HoldSaga<L> {
    fn release(
        state: &mut HoldState,
        env: &HoldEnvironment<L>,
        transaction_id: String,
    ) -> SmallVec<[Effect<HoldAction>; 4]> {
        tracing::warn!(hold = %transaction_id, "Hold landed after its step was abandoned, releasing");
        state.phase = HoldPhase::Releasing;

        let ledger = Arc::clone(&env.ledger);
        let policy = env.release.clone();
        smallvec![async_effect! {
            let result = retry_activity(&policy, "release_hold", || {
                let ledger = Arc::clone(&ledger);
                let transaction_id = transaction_id.clone();
                async move { ledger.release_hold(transaction_id).await }
            })
            .await;

            Some(match result {
                Ok(release) => HoldAction::Released(release),
                Err(failure) => HoldAction::ReleaseFailed(failure),
            })
        }]
    }
}

impl<L: LedgerApi> Reducer for HoldSaga<L> {
    type State = HoldState;
    type Action = HoldAction;
    type Environment = HoldEnvironment<L>;

    fn reduce(
        &self,
        state: &mut HoldState,
        action: HoldAction,
        env: &HoldEnvironment<L>,
    ) -> SmallVec<[Effect<HoldAction>; 4]> {
        match (state.phase, action) {
            (HoldPhase::Idle, HoldAction::Place(request)) => {
                state.phase = HoldPhase::Placing;
                state.request = Some(request.clone());

                let ledger = Arc::clone(&env.ledger);
                let policy = env.retry.clone();
                smallvec![async_effect! {
                    let result = retry_activity(&policy, "place_hold", || {
                        let ledger = Arc::clone(&ledger);
                        let request = request.clone();
                        async move { ledger.place_hold(request).await }
                    })
                    .await;

                    Some(match result {
                        Ok(outcome) => HoldAction::Completed(outcome),
                        Err(failure) => HoldAction::Failed(failure),
                    })
                }]
            },
            (HoldPhase::Placing, HoldAction::Completed(outcome)) => {
                state.phase = HoldPhase::Completed;
                state.result = Some(Ok(outcome));
                SmallVec::new()
            },
            (HoldPhase::Placing | HoldPhase::Abandoned, HoldAction::Failed(failure)) => {
                state.phase = HoldPhase::Completed;
                state.result = Some(Err(failure));
                SmallVec::new()
            },
            (HoldPhase::Placing, HoldAction::Abandon) => {
                state.phase = HoldPhase::Abandoned;
                SmallVec::new()
            },
            (HoldPhase::Abandoned, HoldAction::Completed(outcome)) => {
                state.result = Some(Ok(outcome));
                match state.placed_hold() {
                    Some(transaction_id) => Self::release(state, env, transaction_id),
                    None => {
                        state.phase = HoldPhase::Completed;
                        metrics::counter!("hold.abandoned", "result" => "no_hold").increment(1);
                        SmallVec::new()
                    },
                }
            },
            // The outcome landed just as the parent stopped waiting.
            (HoldPhase::Completed, HoldAction::Abandon) => match state.placed_hold() {
                Some(transaction_id) => Self::release(state, env, transaction_id),
                None => SmallVec::new(),
            },
            (HoldPhase::Releasing, HoldAction::Released(release)) => {
                tracing::info!(hold = %release.transaction_id, "Orphaned hold released");
                metrics::counter!("hold.abandoned", "result" => "released").increment(1);
                state.phase = HoldPhase::Released;
                SmallVec::new()
            },
            (HoldPhase::Releasing, HoldAction::ReleaseFailed(failure)) => {
                tracing::error!(
                    hold = ?state.placed_hold(),
                    error = %failure,
                    "Orphaned hold could not be released, manual reconciliation required"
                );
                metrics::counter!("hold.abandoned", "result" => "stranded").increment(1);
                state.phase = HoldPhase::Stranded;
                SmallVec::new()
            },
            (phase, action) => {
                tracing::debug!(?phase, ?action, "Hold sub-saga ignored action");
                SmallVec::new()
            },
        }
    }
}

/// Run one hold sub-saga to completion within `timeout`.
///
/// On timeout the instance is abandoned rather than dropped: if its hold
/// lands later, the sub-saga releases it.
///
/// # Errors
///
/// Returns the ledger failure (non-retryable once the activity budget is
/// spent), or a retryable failure if the sub-saga did not finish in time.
pub async fn run_hold_saga<L: LedgerApi>(
    environment: HoldEnvironment<L>,
    transfer_id: &TransferId,
    request: HoldRequest,
    timeout: Duration,
) -> Result<HoldOutcome, ActivityFailure> {
    let name = instance_name(transfer_id);
    let store = Store::with_name(name.as_str(), HoldState::default(), HoldSaga::new(), environment);

    tracing::debug!(instance = %name, "Starting hold sub-saga");
    match store
        .send_and_wait_for(HoldAction::Place(request), HoldAction::is_terminal, timeout)
        .await
    {
        Ok(HoldAction::Completed(outcome)) => Ok(outcome),
        Ok(HoldAction::Failed(failure)) => Err(failure),
        Ok(_) => Err(ActivityFailure::non_retryable("hold sub-saga produced no outcome")),
        Err(StoreError::Timeout) => {
            tracing::warn!(instance = %name, ?timeout, "Hold sub-saga timed out, abandoning it");
            if let Err(error) = store.send(HoldAction::Abandon).await {
                tracing::error!(instance = %name, %error, "Failed to abandon hold sub-saga");
            }
            Err(ActivityFailure::retryable("Hold step timed out"))
        },
        Err(error) => Err(ActivityFailure::retryable(format!("Hold sub-saga interrupted: {error}"))),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::mocks::MockLedger;
    use crate::types::Money;
    use wire_saga_testing::{ReducerTest, assertions};

    fn hold_request() -> HoldRequest {
        HoldRequest {
            account_number: "1234567890".to_string(),
            amount: Money::from_cents(50_000),
        }
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy::builder()
            .max_retries(2)
            .initial_delay(Duration::from_millis(1))
            .build()
    }

    fn env(ledger: MockLedger) -> HoldEnvironment<MockLedger> {
        shared_env(Arc::new(ledger))
    }

    fn shared_env(ledger: Arc<MockLedger>) -> HoldEnvironment<MockLedger> {
        HoldEnvironment {
            ledger,
            retry: fast_retry(),
            release: fast_retry(),
        }
    }

    fn placing() -> HoldState {
        HoldState {
            phase: HoldPhase::Placing,
            request: Some(hold_request()),
            ..HoldState::default()
        }
    }

    fn placed(transaction_id: &str) -> HoldOutcome {
        HoldOutcome::Success {
            transaction_id: transaction_id.to_string(),
        }
    }

    #[test]
    fn test_place_starts_activity() {
        ReducerTest::new(HoldSaga::new())
            .with_env(env(MockLedger::default()))
            .given_state(HoldState::default())
            .when_action(HoldAction::Place(hold_request()))
            .then_state(|state| {
                assert_eq!(state.phase, HoldPhase::Placing);
                assert_eq!(state.request, Some(hold_request()));
            })
            .then_effects(assertions::assert_has_future_effect)
            .run();
    }

    #[test]
    fn test_second_place_is_ignored() {
        ReducerTest::new(HoldSaga::new())
            .with_env(env(MockLedger::default()))
            .given_state(HoldState::default())
            .when_actions([HoldAction::Place(hold_request()), HoldAction::Place(hold_request())])
            .then_effects(assertions::assert_no_effects)
            .run();
    }

    #[test]
    fn test_outcome_completes() {
        ReducerTest::new(HoldSaga::new())
            .with_env(env(MockLedger::default()))
            .given_state(HoldState {
                phase: HoldPhase::Placing,
                ..HoldState::default()
            })
            .when_action(HoldAction::Completed(HoldOutcome::InsufficientBalance))
            .then_state(|state| {
                assert_eq!(state.phase, HoldPhase::Completed);
                assert_eq!(state.result, Some(Ok(HoldOutcome::InsufficientBalance)));
            })
            .run();
    }

    #[test]
    fn test_abandoned_hold_is_released_when_it_lands() {
        ReducerTest::new(HoldSaga::new())
            .with_env(env(MockLedger::default()))
            .given_state(placing())
            .when_actions([HoldAction::Abandon, HoldAction::Completed(placed("hold-1"))])
            .then_state(|state| {
                assert_eq!(state.phase, HoldPhase::Releasing);
                assert_eq!(state.result, Some(Ok(placed("hold-1"))));
            })
            .then_effects(assertions::assert_has_future_effect)
            .run();
    }

    #[test]
    fn test_hold_landing_just_before_abandon_is_released() {
        ReducerTest::new(HoldSaga::new())
            .with_env(env(MockLedger::default()))
            .given_state(placing())
            .when_actions([HoldAction::Completed(placed("hold-1")), HoldAction::Abandon])
            .then_state(|state| assert_eq!(state.phase, HoldPhase::Releasing))
            .then_effects(assertions::assert_has_future_effect)
            .run();
    }

    #[test]
    fn test_abandoned_refusal_needs_no_release() {
        ReducerTest::new(HoldSaga::new())
            .with_env(env(MockLedger::default()))
            .given_state(placing())
            .when_actions([
                HoldAction::Abandon,
                HoldAction::Completed(HoldOutcome::InsufficientBalance),
            ])
            .then_state(|state| assert_eq!(state.phase, HoldPhase::Completed))
            .then_effects(assertions::assert_no_effects)
            .run();
    }

    #[test]
    fn test_failed_release_strands_the_hold() {
        ReducerTest::new(HoldSaga::new())
            .with_env(env(MockLedger::default()))
            .given_state(placing())
            .when_actions([
                HoldAction::Abandon,
                HoldAction::Completed(placed("hold-1")),
                HoldAction::ReleaseFailed(ActivityFailure::non_retryable("Ledger down")),
            ])
            .then_state(|state| assert_eq!(state.phase, HoldPhase::Stranded))
            .then_effects(assertions::assert_no_effects)
            .run();
    }

    #[tokio::test]
    async fn test_timed_out_attempt_releases_its_late_hold() {
        let ledger = Arc::new(MockLedger::default().with_hold_latency(Duration::from_millis(60)));

        let outcome = run_hold_saga(
            shared_env(Arc::clone(&ledger)),
            &TransferId::new("T1"),
            hold_request(),
            Duration::from_millis(20),
        )
        .await;
        assert_eq!(outcome, Err(ActivityFailure::retryable("Hold step timed out")));

        let released = tokio::time::timeout(Duration::from_secs(2), async {
            while ledger.released().is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await;
        assert!(released.is_ok(), "late hold was never released");
        assert_eq!(ledger.released(), vec!["hold-1"]);
    }

    #[tokio::test]
    async fn test_outcome_returned_verbatim() {
        let ledger = MockLedger::default();
        ledger.script_hold(Ok(HoldOutcome::ServiceUnavailable));

        let outcome = run_hold_saga(
            env(ledger),
            &TransferId::new("T1"),
            hold_request(),
            Duration::from_secs(1),
        )
        .await;

        assert_eq!(outcome, Ok(HoldOutcome::ServiceUnavailable));
    }

    #[tokio::test]
    async fn test_transient_failures_retried_inside() {
        let ledger = Arc::new(MockLedger::default());
        ledger.script_hold(Err(ActivityFailure::retryable("connection reset")));

        let outcome = run_hold_saga(
            shared_env(Arc::clone(&ledger)),
            &TransferId::new("T1"),
            hold_request(),
            Duration::from_secs(1),
        )
        .await;

        assert_eq!(outcome, Ok(HoldOutcome::Success { transaction_id: "hold-2".to_string() }));
        assert_eq!(ledger.hold_calls(), 2);
    }

    #[tokio::test]
    async fn test_exhausted_failure_is_permanent() {
        let ledger = MockLedger::default();
        for _ in 0..3 {
            ledger.script_hold(Err(ActivityFailure::retryable("Ledger server error: 502")));
        }

        let failure = run_hold_saga(
            env(ledger),
            &TransferId::new("T1"),
            hold_request(),
            Duration::from_secs(1),
        )
        .await
        .unwrap_err();

        assert!(!failure.is_retryable());
        assert_eq!(instance_name(&TransferId::new("T1")), "place-hold-T1");
    }
}
