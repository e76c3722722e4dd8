//! # Wire Saga Runtime
//!
//! Runtime for saga instances built on the reducer/effect core.
//!
//! ## Core Components
//!
//! - **Store**: one running instance; reduces actions one at a time and
//!   executes the effects they return, feeding resulting actions back
//! - **Retry**: exponential backoff keyed on the activity failure verdict
//! - **Registry**: the addressable namespace of running instances
//! - **Metrics**: Prometheus recorder installation
//!
//! ## Example
//!
//! ```ignore
//! use wire_saga_runtime::Store;
//!
//! let store = Store::with_name("wire-transfer-T1", state, saga, environment);
//!
//! // Start the instance
//! store.send(SagaAction::Start(request)).await?;
//!
//! // Read state
//! let phase = store.state(|s| s.phase).await;
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;
use wire_saga_core::{effect::Effect, reducer::Reducer};

/// Retry logic with exponential backoff
pub mod retry;

/// Addressable registry of running saga instances
pub mod registry;

/// Prometheus metrics for observability
pub mod metrics;

/// Error types for the Store runtime
pub mod error {
    use thiserror::Error;

    /// Errors that can occur during Store operations
    #[derive(Error, Debug, Clone, PartialEq, Eq)]
    pub enum StoreError {
        /// Store is shutting down and not accepting new actions
        #[error("Store is shutting down")]
        ShutdownInProgress,

        /// Shutdown timed out waiting for effects to complete
        #[error("Shutdown timed out with {0} effects still running")]
        ShutdownTimeout(usize),

        /// Timeout waiting for a terminal action
        ///
        /// Returned by `send_and_wait_for` when the timeout expires before
        /// a matching action is received.
        #[error("Timeout waiting for action")]
        Timeout,

        /// Action broadcast channel closed
        #[error("Action broadcast channel closed")]
        ChannelClosed,
    }
}

pub use error::StoreError;
pub use registry::{InstanceRegistry, RegistryError};
pub use retry::{RetryPolicy, retry_activity, retry_with_predicate};
pub use store::Store;

/// Decrements the pending-effect counter when an effect task ends,
/// including when it panics.
struct PendingGuard(Arc<AtomicUsize>);

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Store module - the runtime for a single saga instance
pub mod store {
    use super::{
        Arc, AtomicBool, AtomicUsize, Duration, Effect, Ordering, PendingGuard, Reducer, RwLock,
        StoreError,
    };
    use std::future::Future;
    use std::pin::Pin;
    use tokio::sync::broadcast;

    /// The Store - runtime coordinator for one reducer instance
    ///
    /// The Store manages:
    /// 1. State (behind `RwLock`; the write lock serializes reductions)
    /// 2. Reducer (the saga state machine)
    /// 3. Environment (injected dependencies)
    /// 4. Effect execution (with feedback loop)
    ///
    /// Actions produced by effects are broadcast to observers before being
    /// reduced. Actions passed to [`Store::send`] directly (signals,
    /// commands) are not broadcast.
    pub struct Store<S, A, E, R> {
        name: Arc<str>,
        state: Arc<RwLock<S>>,
        reducer: R,
        environment: E,
        shutdown: Arc<AtomicBool>,
        pending_effects: Arc<AtomicUsize>,
        action_broadcast: broadcast::Sender<A>,
    }

    impl<S, A, E, R> Clone for Store<S, A, E, R>
    where
        R: Clone,
        E: Clone,
    {
        fn clone(&self) -> Self {
            Self {
                name: Arc::clone(&self.name),
                state: Arc::clone(&self.state),
                reducer: self.reducer.clone(),
                environment: self.environment.clone(),
                shutdown: Arc::clone(&self.shutdown),
                pending_effects: Arc::clone(&self.pending_effects),
                action_broadcast: self.action_broadcast.clone(),
            }
        }
    }

    impl<S, A, E, R> Store<S, A, E, R>
    where
        R: Reducer<State = S, Action = A, Environment = E> + Clone + Send + Sync + 'static,
        A: Clone + Send + 'static,
        S: Send + Sync + 'static,
        E: Clone + Send + Sync + 'static,
    {
        /// Create a new store with initial state, reducer, and environment
        ///
        /// The action broadcast capacity defaults to 16.
        #[must_use]
        pub fn new(initial_state: S, reducer: R, environment: E) -> Self {
            Self::with_name("store", initial_state, reducer, environment)
        }

        /// Create a new store addressed by `name`
        ///
        /// The name shows up in every log line the store emits.
        #[must_use]
        pub fn with_name(
            name: impl Into<String>,
            initial_state: S,
            reducer: R,
            environment: E,
        ) -> Self {
            let (action_broadcast, _) = broadcast::channel(16);
            let name: String = name.into();

            Self {
                name: Arc::from(name),
                state: Arc::new(RwLock::new(initial_state)),
                reducer,
                environment,
                shutdown: Arc::new(AtomicBool::new(false)),
                pending_effects: Arc::new(AtomicUsize::new(0)),
                action_broadcast,
            }
        }

        /// The instance name this store was created with
        #[must_use]
        pub fn name(&self) -> &str {
            &self.name
        }

        /// Number of effects still running
        #[must_use]
        pub fn pending_effects(&self) -> usize {
            self.pending_effects.load(Ordering::SeqCst)
        }

        /// Send an action to the store
        ///
        /// The action is reduced under the write lock, then every returned
        /// effect is spawned. This returns once the reduction is done; it
        /// does not wait for effects.
        ///
        /// # Errors
        ///
        /// Returns [`StoreError::ShutdownInProgress`] if the store is shutting down.
        pub async fn send(&self, action: A) -> Result<(), StoreError> {
            self.send_and_inspect(action, |_| ()).await
        }

        /// Send an action and read the state it left behind
        ///
        /// `inspect` runs under the same write lock as the reduction, so it
        /// sees this action's result and nothing reduced after it.
        ///
        /// # Errors
        ///
        /// Returns [`StoreError::ShutdownInProgress`] if the store is shutting down.
        #[tracing::instrument(skip(self, action, inspect), fields(store = %self.name), name = "store_send")]
        pub async fn send_and_inspect<F, T>(&self, action: A, inspect: F) -> Result<T, StoreError>
        where
            F: FnOnce(&S) -> T,
        {
            if self.shutdown.load(Ordering::Acquire) {
                tracing::warn!("Rejected action: store is shutting down");
                metrics::counter!("store.shutdown.rejected_actions").increment(1);
                return Err(StoreError::ShutdownInProgress);
            }

            metrics::counter!("store.actions.total").increment(1);

            let (effects, observed) = {
                let mut state = self.state.write().await;
                let effects = self.reducer.reduce(&mut *state, action, &self.environment);
                (effects, inspect(&*state))
            };

            tracing::trace!("Reducer returned {} effects", effects.len());
            for effect in effects {
                self.execute(effect);
            }

            Ok(observed)
        }

        /// Send an action and wait for a matching action produced by effects
        ///
        /// Subscribes before sending so a fast effect cannot slip past.
        ///
        /// # Errors
        ///
        /// - [`StoreError::Timeout`]: Timeout expired before matching action received
        /// - [`StoreError::ChannelClosed`]: Action broadcast channel closed
        /// - [`StoreError::ShutdownInProgress`]: Store is shutting down
        pub async fn send_and_wait_for<F>(
            &self,
            action: A,
            predicate: F,
            timeout: Duration,
        ) -> Result<A, StoreError>
        where
            F: Fn(&A) -> bool,
        {
            let mut rx = self.action_broadcast.subscribe();

            self.send(action).await?;

            tokio::time::timeout(timeout, async {
                loop {
                    match rx.recv().await {
                        Ok(action) if predicate(&action) => return Ok(action),
                        Ok(_) => {},
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::warn!(store = %self.name, skipped, "Action observer lagged");
                        },
                        Err(broadcast::error::RecvError::Closed) => {
                            return Err(StoreError::ChannelClosed);
                        },
                    }
                }
            })
            .await
            .map_err(|_| StoreError::Timeout)?
        }

        /// Subscribe to all actions produced by effects
        #[must_use]
        pub fn subscribe_actions(&self) -> broadcast::Receiver<A> {
            self.action_broadcast.subscribe()
        }

        /// Read current state via a closure
        ///
        /// ```ignore
        /// let phase = store.state(|s| s.phase).await;
        /// ```
        pub async fn state<F, T>(&self, f: F) -> T
        where
            F: FnOnce(&S) -> T,
        {
            let state = self.state.read().await;
            f(&*state)
        }

        /// Stop accepting actions and wait for running effects to finish
        ///
        /// # Errors
        ///
        /// Returns [`StoreError::ShutdownTimeout`] with the number of effects
        /// still running when `timeout` elapses.
        pub async fn shutdown(&self, timeout: Duration) -> Result<(), StoreError> {
            self.shutdown.store(true, Ordering::Release);
            tracing::info!(store = %self.name, "Store shutting down");

            let drained = tokio::time::timeout(timeout, async {
                while self.pending_effects() > 0 {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            })
            .await;

            match drained {
                Ok(()) => Ok(()),
                Err(_) => Err(StoreError::ShutdownTimeout(self.pending_effects())),
            }
        }

        fn execute(&self, effect: Effect<A>) {
            if effect.is_none() {
                return;
            }

            self.pending_effects.fetch_add(1, Ordering::SeqCst);
            let guard = PendingGuard(Arc::clone(&self.pending_effects));
            let store = self.clone();

            tokio::spawn(async move {
                let _guard = guard;
                store.run(effect).await;
            });
        }

        fn run(self, effect: Effect<A>) -> Pin<Box<dyn Future<Output = ()> + Send>> {
            Box::pin(async move {
                match effect {
                    Effect::None => {},
                    Effect::Future(fut) => {
                        metrics::counter!("store.effects.executed", "type" => "future").increment(1);
                        if let Some(action) = fut.await {
                            self.feed(action).await;
                        }
                    },
                    Effect::Delay { duration, action } => {
                        metrics::counter!("store.effects.executed", "type" => "delay").increment(1);
                        tokio::time::sleep(duration).await;
                        self.feed(*action).await;
                    },
                    Effect::Parallel(effects) => {
                        for effect in effects {
                            self.execute(effect);
                        }
                    },
                    Effect::Sequential(effects) => {
                        for effect in effects {
                            self.clone().run(effect).await;
                        }
                    },
                }
            })
        }

        async fn feed(&self, action: A) {
            // No subscribers is the common case.
            let _ = self.action_broadcast.send(action.clone());

            if let Err(error) = self.send(action).await {
                tracing::warn!(store = %self.name, %error, "Dropped action produced by effect");
            }
        }
    }
}
