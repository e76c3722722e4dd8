//! Webhook Dispatch Saga.
//!
//! One short-lived instance per inbound notification. It classifies the
//! payload, derives the orchestrator's instance name from the
//! notification's `requestId`, and delivers the matching signal there.
//! Unknown payloads and correlation misses end the dispatch with a
//! non-retryable failure that is logged and counted; neither is ever
//! propagated to the webhook sender.

use crate::saga;
use crate::types::{KnownNotification, SettlementNotification};
use crate::webhook::classify;
use serde_json::Value;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use wire_saga_core::environment::Clock;
use wire_saga_core::{
    ActivityFailure, SmallVec, async_effect, effect::Effect, emit, reducer::Reducer, smallvec,
};
use wire_saga_runtime::{Store, StoreError};

/// Why a signal could not be delivered.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignalError {
    /// Nothing is running under that name (resolved, never started, wrong id)
    #[error("no running instance named {0}")]
    NoSuchInstance(String),

    /// The instance exists but refused the signal
    #[error("signal delivery failed: {0}")]
    Delivery(String),

    /// The instance took the signal but nothing changed (duplicate, or wrong phase)
    #[error("signal to {0} had no effect")]
    Ignored(String),
}

/// Delivers signals to orchestrator instances by name.
pub trait SignalRouter: Send + Sync + 'static {
    /// Deliver `notification` to the instance named `instance`.
    fn signal(
        &self,
        instance: &str,
        notification: KnownNotification,
    ) -> impl Future<Output = Result<(), SignalError>> + Send;
}

/// Why a dispatch ended without delivering a signal.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DispatchError {
    /// The payload matched no known notification schema
    #[error("unknown webhook payload")]
    UnknownWebhook {
        /// The payload exactly as received
        payload: Value,
    },

    /// No orchestrator is waiting under the derived name
    #[error("no saga instance {instance} to signal")]
    CorrelationMiss {
        /// Derived instance name
        instance: String,
    },

    /// The orchestrator is running but the notification changed nothing
    #[error("saga instance {instance} ignored the notification")]
    Ignored {
        /// Derived instance name
        instance: String,
    },

    /// The orchestrator refused the signal
    #[error("signal to {instance} failed: {reason}")]
    Delivery {
        /// Derived instance name
        instance: String,
        /// Router message
        reason: String,
    },

    /// The dispatch instance did not finish
    #[error("dispatch interrupted: {0}")]
    Interrupted(String),
}

impl DispatchError {
    /// Every dispatch failure is final for this delivery attempt.
    #[must_use]
    pub fn failure(&self) -> ActivityFailure {
        ActivityFailure::non_retryable(self.to_string())
    }

    const fn label(&self) -> &'static str {
        match self {
            Self::UnknownWebhook { .. } => "unknown",
            Self::CorrelationMiss { .. } => "correlation_miss",
            Self::Ignored { .. } => "ignored",
            Self::Delivery { .. } => "delivery_failed",
            Self::Interrupted(_) => "interrupted",
        }
    }
}

/// Lifecycle of a dispatch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DispatchPhase {
    /// Nothing received yet
    #[default]
    Idle,
    /// Signal in flight
    Routing,
    /// Signal accepted by the orchestrator
    Delivered,
    /// Payload rejected or signal refused
    Rejected,
    /// No orchestrator to address
    Missed,
    /// Orchestrator found, notification had no effect
    Ignored,
}

/// Dispatch state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DispatchState {
    /// Where the dispatch is
    pub phase: DispatchPhase,
    /// Classified payload
    pub notification: Option<SettlementNotification>,
    /// Derived orchestrator name
    pub instance: Option<String>,
    /// Failure, once rejected or missed
    pub error: Option<DispatchError>,
}

/// Dispatch inputs.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchAction {
    /// Command: dispatch this raw payload
    Receive(Value),
    /// The orchestrator accepted the signal
    Delivered {
        /// Orchestrator name
        instance: String,
    },
    /// The dispatch failed
    Failed(DispatchError),
}

impl DispatchAction {
    /// Whether this action ends the dispatch.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Delivered { .. } | Self::Failed(_))
    }
}

/// Dispatch dependencies.
pub struct DispatchEnvironment<R> {
    /// Signal delivery
    pub router: Arc<R>,
    /// Arrival time for unknown payloads
    pub clock: Arc<dyn Clock>,
}

impl<R> Clone for DispatchEnvironment<R> {
    fn clone(&self) -> Self {
        Self {
            router: Arc::clone(&self.router),
            clock: Arc::clone(&self.clock),
        }
    }
}

/// Reducer of the dispatch saga.
pub struct DispatchSaga<R> {
    _router: PhantomData<fn() -> R>,
}

impl<R> DispatchSaga<R> {
    /// Create the reducer.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            _router: PhantomData,
        }
    }
}

impl<R> Default for DispatchSaga<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R> Clone for DispatchSaga<R> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<R: SignalRouter> Reducer for DispatchSaga<R> {
    type State = DispatchState;
    type Action = DispatchAction;
    type Environment = DispatchEnvironment<R>;

    fn reduce(
        &self,
        state: &mut DispatchState,
        action: DispatchAction,
        env: &DispatchEnvironment<R>,
    ) -> SmallVec<[Effect<DispatchAction>; 4]> {
        match (state.phase, action) {
            (DispatchPhase::Idle, DispatchAction::Receive(raw)) => {
                state.phase = DispatchPhase::Routing;
                let notification = classify(raw, env.clock.now());
                state.notification = Some(notification.clone());

                let Some(known) = notification.into_known() else {
                    let payload = match state.notification.as_ref() {
                        Some(SettlementNotification::Unknown(unknown)) => unknown.raw_payload.clone(),
                        _ => Value::Null,
                    };
                    return smallvec![emit!(DispatchAction::Failed(DispatchError::UnknownWebhook {
                        payload
                    }))];
                };

                let instance = saga::instance_name(known.request_id());
                state.instance = Some(instance.clone());
                tracing::info!(
                    instance = %instance,
                    status = if known.is_success() { "SUCCESS" } else { "FAILURE" },
                    bank_transaction = known.transaction_id(),
                    "Routing settlement notification"
                );

                let router = Arc::clone(&env.router);
                smallvec![async_effect! {
                    let delivery = router.signal(&instance, known).await;
                    Some(match delivery {
                        Ok(()) => DispatchAction::Delivered { instance },
                        Err(SignalError::NoSuchInstance(_)) => {
                            DispatchAction::Failed(DispatchError::CorrelationMiss { instance })
                        },
                        Err(SignalError::Ignored(_)) => {
                            DispatchAction::Failed(DispatchError::Ignored { instance })
                        },
                        Err(SignalError::Delivery(reason)) => {
                            DispatchAction::Failed(DispatchError::Delivery { instance, reason })
                        },
                    })
                }]
            },
            (DispatchPhase::Routing, DispatchAction::Delivered { instance }) => {
                state.phase = DispatchPhase::Delivered;
                tracing::info!(instance = %instance, "Signal delivered");
                metrics::counter!("webhook.dispatched", "result" => "delivered").increment(1);
                SmallVec::new()
            },
            (DispatchPhase::Routing, DispatchAction::Failed(error)) => {
                match &error {
                    DispatchError::UnknownWebhook { payload } => {
                        tracing::error!(%payload, "Unknown webhook payload");
                        state.phase = DispatchPhase::Rejected;
                    },
                    DispatchError::CorrelationMiss { instance } => {
                        tracing::warn!(
                            instance = %instance,
                            "No running saga for notification (late, duplicate, or unknown id)"
                        );
                        state.phase = DispatchPhase::Missed;
                    },
                    DispatchError::Ignored { instance } => {
                        tracing::warn!(instance = %instance, "Notification had no effect on running saga");
                        state.phase = DispatchPhase::Ignored;
                    },
                    DispatchError::Delivery { .. } | DispatchError::Interrupted(_) => {
                        tracing::error!(error = %error, "Signal delivery failed");
                        state.phase = DispatchPhase::Rejected;
                    },
                }
                metrics::counter!("webhook.dispatched", "result" => error.label()).increment(1);
                state.error = Some(error);
                SmallVec::new()
            },
            (phase, action) => {
                tracing::debug!(?phase, ?action, "Dispatch ignored action");
                SmallVec::new()
            },
        }
    }
}

/// Run one dispatch to completion within `timeout`.
///
/// Returns the orchestrator instance that received the signal.
///
/// # Errors
///
/// Returns the [`DispatchError`] that ended the dispatch.
pub async fn run_dispatch<R: SignalRouter>(
    router: Arc<R>,
    clock: Arc<dyn Clock>,
    payload: Value,
    timeout: Duration,
) -> Result<String, DispatchError> {
    let store = Store::with_name(
        "webhook-dispatch",
        DispatchState::default(),
        DispatchSaga::new(),
        DispatchEnvironment { router, clock },
    );

    match store
        .send_and_wait_for(DispatchAction::Receive(payload), DispatchAction::is_terminal, timeout)
        .await
    {
        Ok(DispatchAction::Delivered { instance }) => Ok(instance),
        Ok(DispatchAction::Failed(error)) => Err(error),
        Ok(DispatchAction::Receive(_)) => Err(DispatchError::Interrupted(
            "dispatch produced no outcome".to_string(),
        )),
        Err(StoreError::Timeout) => {
            let error = DispatchError::Interrupted(format!("no outcome within {timeout:?}"));
            metrics::counter!("webhook.dispatched", "result" => error.label()).increment(1);
            Err(error)
        },
        Err(error) => Err(DispatchError::Interrupted(error.to_string())),
    }
}
