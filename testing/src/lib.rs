//! # Wire Saga Testing
//!
//! Testing utilities for wire-transfer sagas.
//!
//! This crate provides:
//! - A fixed clock for deterministic timestamps
//! - The [`ReducerTest`] Given-When-Then harness
//! - Helpers for waiting on live stores
//!
//! ## Example
//!
//! ```ignore
//! use wire_saga_testing::{test_clock, helpers::wait_for_state};
//!
//! #[tokio::test]
//! async fn test_transfer_settles() {
//!     let store = Store::new(WireTransferState::new(), saga, environment());
//!     store.send(SagaAction::Start(request)).await?;
//!
//!     assert!(wait_for_state(&store, |s| s.phase.is_terminal(), Duration::from_secs(1)).await);
//! }
//! ```

use chrono::{DateTime, Utc};
use wire_saga_core::environment::Clock;


pub use reducer_test::{ReducerTest, assertions};

/// Mock implementations of Environment traits
pub mod mocks {
    use super::{Clock, DateTime, Utc};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use wire_saga_testing::mocks::FixedClock;
    /// use wire_saga_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// assert_eq!(clock.now(), clock.now());
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    #[must_use]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(DateTime::<Utc>::UNIX_EPOCH + chrono::Duration::seconds(1_735_689_600))
    }
}

/// Helpers for tests that drive a live store
pub mod helpers {
    use std::time::Duration;
    use wire_saga_core::reducer::Reducer;
    use wire_saga_runtime::Store;

    /// Poll `store` until `predicate` holds for its state.
    ///
    /// Returns `false` if `timeout` elapses first.
    pub async fn wait_for_state<S, A, E, R, P>(
        store: &Store<S, A, E, R>,
        predicate: P,
        timeout: Duration,
    ) -> bool
    where
        R: Reducer<State = S, Action = A, Environment = E> + Clone + Send + Sync + 'static,
        A: Clone + Send + 'static,
        S: Send + Sync + 'static,
        E: Clone + Send + Sync + 'static,
        P: Fn(&S) -> bool,
    {
        tokio::time::timeout(timeout, async {
            while !store.state(&predicate).await {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .is_ok()
    }

    /// Install a test-friendly tracing subscriber.
    ///
    /// Honors `RUST_LOG`. Safe to call from every test; only the first call
    /// installs.
    pub fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .try_init();
    }
}

// Re-export commonly used items
pub use mocks::{FixedClock, test_clock};
