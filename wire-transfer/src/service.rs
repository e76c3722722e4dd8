//! Service facade: the inbound operations of the system.
//!
//! Owns the instance registry (the addressable namespace of running
//! orchestrators) and a record of finished transfers. Each accepted
//! transfer gets its own [`SagaStore`] registered under
//! [`saga::instance_name`]; a watcher task records the outcome when the
//! saga announces `Finished` and removes the instance, so later signals for
//! that id become correlation misses.

use crate::activities::{BankApi, LedgerApi};
use crate::dispatch::{DispatchError, SignalError, SignalRouter, run_dispatch};
use crate::saga::{
    self, SagaAction, SagaFailure, SagaOutcome, SagaPhase, SignalReceipt, WireTransferEnvironment,
    WireTransferSaga, WireTransferState,
};
use crate::types::{KnownNotification, TransferAccepted, TransferId, TransferRequest, WebhookAccepted};
use crate::validation::{ValidationErrors, parse_transfer_request};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{RwLock, broadcast};
use wire_saga_runtime::{InstanceRegistry, RegistryError, Store, StoreError};

/// Time budget of one webhook dispatch.
pub const DISPATCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Finished transfers remembered by default.
pub const DEFAULT_COMPLETED_RETENTION: usize = 10_000;

/// Final statuses of the most recently finished transfers.
#[derive(Debug)]
struct CompletedTransfers {
    capacity: usize,
    order: VecDeque<TransferId>,
    statuses: HashMap<TransferId, TransferStatus>,
}

impl CompletedTransfers {
    fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            order: VecDeque::new(),
            statuses: HashMap::new(),
        }
    }

    fn get(&self, id: &TransferId) -> Option<&TransferStatus> {
        self.statuses.get(id)
    }

    fn contains(&self, id: &TransferId) -> bool {
        self.statuses.contains_key(id)
    }

    fn insert(&mut self, id: TransferId, status: TransferStatus) {
        if self.statuses.insert(id.clone(), status).is_some() {
            return;
        }
        self.order.push_back(id);
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                tracing::debug!(transfer_id = %oldest, "Forgetting finished transfer");
                self.statuses.remove(&oldest);
            }
        }
    }
}

/// Store of one orchestrator instance.
pub type SagaStore<L, B> =
    Store<WireTransferState, SagaAction, WireTransferEnvironment<L, B>, WireTransferSaga<L, B>>;

/// Read model of one transfer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferStatus {
    /// Correlation key
    pub id: TransferId,
    /// Current (or final) phase
    pub phase: SagaPhase,
    /// Ledger hold, once placed
    pub hold_transaction_id: Option<String>,
    /// Consumed notification, once settled
    pub settlement: Option<KnownNotification>,
    /// Why it stopped, if it did not settle
    pub failure: Option<SagaFailure>,
    /// When the saga started
    pub started_at: Option<DateTime<Utc>>,
    /// When the saga finished
    pub resolved_at: Option<DateTime<Utc>>,
}

impl TransferStatus {
    fn from_state(id: TransferId, state: &WireTransferState) -> Self {
        let (settlement, failure) = match state.outcome.clone() {
            Some(Ok(notification)) => (Some(notification), None),
            Some(Err(failure)) => (None, Some(failure)),
            None => (None, None),
        };

        Self {
            id,
            phase: state.phase,
            hold_transaction_id: state.hold_transaction_id.clone(),
            settlement,
            failure,
            started_at: state.started_at,
            resolved_at: state.resolved_at,
        }
    }

    /// The final outcome, once the transfer has finished.
    #[must_use]
    pub fn outcome(&self) -> Option<SagaOutcome> {
        match (&self.settlement, &self.failure) {
            (Some(notification), _) => Some(Ok(notification.clone())),
            (None, Some(failure)) => Some(Err(failure.clone())),
            (None, None) => None,
        }
    }
}

/// Why a transfer request was not started.
#[derive(Debug, Error)]
pub enum SubmitError {
    /// The payload failed schema validation
    #[error(transparent)]
    Validation(#[from] ValidationErrors),

    /// An instance for this id is running or has already finished
    #[error("wire transfer {0} already started")]
    AlreadyStarted(TransferId),

    /// The instance registry is unusable
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// The new instance refused the start command
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Delivers signals to orchestrators found in the instance registry.
pub struct RegistryRouter<L, B> {
    instances: InstanceRegistry<Arc<SagaStore<L, B>>>,
}

impl<L: LedgerApi, B: BankApi> SignalRouter for RegistryRouter<L, B> {
    async fn signal(&self, instance: &str, notification: KnownNotification) -> Result<(), SignalError> {
        let store = self
            .instances
            .get(instance)
            .map_err(|error| SignalError::Delivery(error.to_string()))?
            .ok_or_else(|| SignalError::NoSuchInstance(instance.to_string()))?;

        let receipt = store
            .send_and_inspect(SagaAction::from_signal(notification), |state| state.last_signal)
            .await
            .map_err(|error| SignalError::Delivery(error.to_string()))?;

        match receipt {
            Some(SignalReceipt::Resolved | SignalReceipt::Buffered) => Ok(()),
            // Resolved but not yet removed by its watcher.
            Some(SignalReceipt::AlreadyResolved) => Err(SignalError::NoSuchInstance(instance.to_string())),
            Some(SignalReceipt::Dropped) | None => Err(SignalError::Ignored(instance.to_string())),
        }
    }
}

/// Entry point for transfer requests and settlement webhooks.
pub struct WireTransferService<L, B> {
    environment: WireTransferEnvironment<L, B>,
    instances: InstanceRegistry<Arc<SagaStore<L, B>>>,
    router: Arc<RegistryRouter<L, B>>,
    completed: Arc<RwLock<CompletedTransfers>>,
    outcomes: broadcast::Sender<(TransferId, SagaOutcome)>,
}

impl<L, B> Clone for WireTransferService<L, B> {
    fn clone(&self) -> Self {
        Self {
            environment: self.environment.clone(),
            instances: self.instances.clone(),
            router: Arc::clone(&self.router),
            completed: Arc::clone(&self.completed),
            outcomes: self.outcomes.clone(),
        }
    }
}

impl<L: LedgerApi, B: BankApi> WireTransferService<L, B> {
    /// Create a service whose sagas run against `environment`.
    #[must_use]
    pub fn new(environment: WireTransferEnvironment<L, B>) -> Self {
        Self::with_retention(environment, DEFAULT_COMPLETED_RETENTION)
    }

    /// Create a service that remembers the last `retention` finished
    /// transfers.
    ///
    /// An id is rejected as a duplicate only while it is running or
    /// remembered; an evicted id can be submitted again.
    #[must_use]
    pub fn with_retention(environment: WireTransferEnvironment<L, B>, retention: usize) -> Self {
        let instances = InstanceRegistry::new();
        let (outcomes, _) = broadcast::channel(256);
        Self {
            environment,
            router: Arc::new(RegistryRouter {
                instances: instances.clone(),
            }),
            instances,
            completed: Arc::new(RwLock::new(CompletedTransfers::new(retention))),
            outcomes,
        }
    }

    /// Validate `payload` and start a saga for it.
    ///
    /// # Errors
    ///
    /// Returns [`SubmitError::Validation`] with every field error, or any
    /// error of [`Self::start`].
    pub async fn submit(&self, payload: &Value) -> Result<TransferAccepted, SubmitError> {
        let request = parse_transfer_request(payload, TransferId::generate)?;
        self.start(request).await
    }

    /// Start a saga for an already validated request.
    ///
    /// # Errors
    ///
    /// Returns [`SubmitError::AlreadyStarted`] if the id is running or
    /// recently finished, [`SubmitError::Registry`] or [`SubmitError::Store`] if the
    /// instance could not be created.
    pub async fn start(&self, request: TransferRequest) -> Result<TransferAccepted, SubmitError> {
        let id = request.id.clone();
        let name = saga::instance_name(&id);
        let store = Arc::new(Store::with_name(
            name.clone(),
            WireTransferState::new(),
            WireTransferSaga::new(),
            self.environment.clone(),
        ));
        let actions = store.subscribe_actions();

        {
            let completed = self.completed.read().await;
            if completed.contains(&id) {
                return Err(SubmitError::AlreadyStarted(id));
            }
            self.instances
                .insert(name.clone(), Arc::clone(&store))
                .map_err(|error| match error {
                    RegistryError::AlreadyExists(_) => SubmitError::AlreadyStarted(id.clone()),
                    RegistryError::Poisoned => SubmitError::Registry(error),
                })?;
        }

        tokio::spawn(self.clone().watch(id.clone(), name.clone(), Arc::clone(&store), actions));

        if let Err(error) = store.send(SagaAction::Start(request)).await {
            self.instances.remove(&name)?;
            return Err(error.into());
        }

        tracing::info!(transfer_id = %id, instance = %name, "Wire transfer accepted");
        Ok(TransferAccepted::pending(id))
    }

    async fn watch(
        self,
        id: TransferId,
        name: String,
        store: Arc<SagaStore<L, B>>,
        mut actions: broadcast::Receiver<SagaAction>,
    ) {
        let outcome = loop {
            match actions.recv().await {
                Ok(SagaAction::Finished(outcome)) => break outcome,
                Ok(_) => {},
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(instance = %name, skipped, "Saga watcher lagged");
                },
                Err(broadcast::error::RecvError::Closed) => return,
            }
        };

        let status = store
            .state(|state| TransferStatus::from_state(id.clone(), state))
            .await;
        {
            // Readers see the transfer either running or completed, never neither.
            let mut completed = self.completed.write().await;
            completed.insert(id.clone(), status);
            if let Err(error) = self.instances.remove(&name) {
                tracing::error!(instance = %name, %error, "Failed to deregister finished saga");
            }
        }
        tracing::debug!(transfer_id = %id, instance = %name, "Saga deregistered");
        let _ = self.outcomes.send((id, outcome));
    }

    /// Accept a webhook and dispatch it in the background.
    ///
    /// The answer never depends on the dispatch result.
    #[must_use]
    pub fn deliver_webhook(&self, payload: Value) -> WebhookAccepted {
        let service = self.clone();
        tokio::spawn(async move {
            // Failures are logged and counted by the dispatch saga.
            let _ = service.dispatch_webhook(payload).await;
        });
        WebhookAccepted::default()
    }

    /// Dispatch a webhook and wait for the result.
    ///
    /// Returns the instance that received the signal.
    ///
    /// # Errors
    ///
    /// Returns the [`DispatchError`] that ended the dispatch.
    pub async fn dispatch_webhook(&self, payload: Value) -> Result<String, DispatchError> {
        run_dispatch(
            Arc::clone(&self.router),
            Arc::clone(&self.environment.clock),
            payload,
            DISPATCH_TIMEOUT,
        )
        .await
    }

    /// Current or final status of a transfer.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Poisoned`] if the registry is unusable.
    pub async fn status(&self, id: &TransferId) -> Result<Option<TransferStatus>, RegistryError> {
        let store = {
            let completed = self.completed.read().await;
            if let Some(status) = completed.get(id) {
                return Ok(Some(status.clone()));
            }
            self.instances.get(&saga::instance_name(id))?
        };
        let Some(store) = store else {
            return Ok(None);
        };
        Ok(Some(
            store
                .state(|state| TransferStatus::from_state(id.clone(), state))
                .await,
        ))
    }

    /// Wait up to `timeout` for a transfer to finish.
    ///
    /// Returns `None` on timeout.
    pub async fn await_outcome(&self, id: &TransferId, timeout: Duration) -> Option<SagaOutcome> {
        let mut outcomes = self.outcomes.subscribe();
        if let Some(status) = self.completed.read().await.get(id) {
            return status.outcome();
        }

        tokio::time::timeout(timeout, async {
            loop {
                match outcomes.recv().await {
                    Ok((finished, outcome)) if &finished == id => return Some(outcome),
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {},
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        })
        .await
        .ok()
        .flatten()
    }

    /// Names of the orchestrators still running.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Poisoned`] if the registry is unusable.
    pub fn running_instances(&self) -> Result<Vec<String>, RegistryError> {
        self.instances.names()
    }
}
