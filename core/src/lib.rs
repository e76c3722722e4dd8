//! # Wire Saga Core
//!
//! Core traits and types for coordinating long-running, multi-step
//! transfers as sagas.
//!
//! A saga instance is modelled as a reducer: every input (a command, an
//! activity result, an out-of-band signal) is an action, and the reducer
//! decides the next state plus the side effects to run. Effects are plain
//! values; the runtime crate executes them and feeds their resulting
//! actions back into the same instance.
//!
//! ## Core Concepts
//!
//! - **State**: where one saga instance is in its state machine
//! - **Action**: every input the instance reacts to
//! - **Reducer**: pure function `(State, Action, Environment) → (State, Effects)`
//! - **Effect**: description of an activity call, a delay, or a composition of both
//! - **Environment**: injected collaborators (clients, clock, policies)
//! - **`ActivityFailure`**: the retryable / non-retryable verdict on a failed activity
//!
//! ## Example
//!
//! ```ignore
//! use wire_saga_core::{effect::Effect, reducer::Reducer, SmallVec, smallvec};
//!
//! impl Reducer for HoldSaga {
//!     type State = HoldState;
//!     type Action = HoldAction;
//!     type Environment = HoldEnvironment;
//!
//!     fn reduce(
//!         &self,
//!         state: &mut HoldState,
//!         action: HoldAction,
//!         env: &HoldEnvironment,
//!     ) -> SmallVec<[Effect<HoldAction>; 4]> {
//!         match action {
//!             HoldAction::Place(request) => smallvec![place_hold(env, request)],
//!             _ => SmallVec::new(),
//!         }
//!     }
//! }
//! ```

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use smallvec::{SmallVec, smallvec};

/// Declarative macros for building effects
pub mod effect_macros;

/// Retry classification of failed activities
pub mod activity;

pub use activity::{ActivityFailure, FailureKind};

/// Reducer module - the core trait for saga logic
///
/// Reducers are deterministic: the same state and action always produce the
/// same next state and the same effect descriptions. All I/O lives in the
/// effects they return.
pub mod reducer {
    use super::SmallVec;
    use super::effect::Effect;

    /// The Reducer trait - core abstraction for saga logic
    ///
    /// # Type Parameters
    ///
    /// - `State`: The state machine this reducer drives
    /// - `Action`: The inputs this reducer processes
    /// - `Environment`: The injected dependencies this reducer needs
    pub trait Reducer {
        /// The state type this reducer operates on
        type State;

        /// The action type this reducer processes
        type Action;

        /// The environment type with injected dependencies
        type Environment;

        /// Reduce an action into state changes and effects
        ///
        /// Most transitions produce zero or one effect, so the return type
        /// keeps up to four effects inline without allocating.
        fn reduce(
            &self,
            state: &mut Self::State,
            action: Self::Action,
            env: &Self::Environment,
        ) -> SmallVec<[Effect<Self::Action>; 4]>;
    }
}

/// Effect module - side effect descriptions
///
/// Effects are values, not execution. The runtime decides when and where
/// they run.
pub mod effect {
    use std::future::Future;
    use std::pin::Pin;
    use std::time::Duration;

    /// Effect type - describes a side effect to be executed
    ///
    /// # Type Parameters
    ///
    /// - `Action`: The action type that effects can produce (feedback loop)
    pub enum Effect<Action> {
        /// No-op effect
        None,

        /// Run effects concurrently
        Parallel(Vec<Effect<Action>>),

        /// Run effects one after another, each to completion
        Sequential(Vec<Effect<Action>>),

        /// Dispatch an action after a delay (step retries, timeouts)
        Delay {
            /// How long to wait
            duration: Duration,
            /// Action to dispatch after delay
            action: Box<Action>,
        },

        /// Arbitrary async computation (activity calls, child sagas)
        ///
        /// Returns `Option<Action>` - if Some, the action is fed back into the reducer
        Future(Pin<Box<dyn Future<Output = Option<Action>> + Send>>),
    }

    // Manual Debug implementation since Future doesn't implement Debug
    impl<Action> std::fmt::Debug for Effect<Action>
    where
        Action: std::fmt::Debug,
    {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            match self {
                Effect::None => write!(f, "Effect::None"),
                Effect::Parallel(effects) => {
                    f.debug_tuple("Effect::Parallel").field(effects).finish()
                },
                Effect::Sequential(effects) => {
                    f.debug_tuple("Effect::Sequential").field(effects).finish()
                },
                Effect::Delay { duration, action } => f
                    .debug_struct("Effect::Delay")
                    .field("duration", duration)
                    .field("action", action)
                    .finish(),
                Effect::Future(_) => write!(f, "Effect::Future(<future>)"),
            }
        }
    }

    impl<Action> Effect<Action> {
        /// Combine effects to run in parallel
        #[must_use]
        pub const fn merge(effects: Vec<Effect<Action>>) -> Effect<Action> {
            Effect::Parallel(effects)
        }

        /// Chain effects to run sequentially
        #[must_use]
        pub const fn chain(effects: Vec<Effect<Action>>) -> Effect<Action> {
            Effect::Sequential(effects)
        }

        /// Whether this effect does nothing
        #[must_use]
        pub const fn is_none(&self) -> bool {
            matches!(self, Effect::None)
        }
    }
}

/// Environment module - dependency injection traits
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time for testability
    ///
    /// Sagas stamp `started_at` / `resolved_at` and default missing webhook
    /// timestamps through this trait, so tests can pin time.
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Wall-clock implementation used in production
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}
