//! Declarative macros for ergonomic effect construction
//!
//! Saga reducers mostly emit two kinds of effects: an async activity call
//! whose result is fed back as an action, and a delayed action for step
//! retries and timeouts.

/// Create an `Effect::Future` from an async block
///
/// # Example
///
/// ```rust,ignore
/// use wire_saga_core::async_effect;
///
/// async_effect! {
///     let ack = bank.initiate_wire(request).await;
///     Some(SagaAction::from_wire_result(ack))
/// }
/// ```
#[macro_export]
macro_rules! async_effect {
    ($($body:tt)*) => {
        $crate::effect::Effect::Future(
            ::std::boxed::Box::pin(async move { $($body)* })
        )
    };
}

/// Create an `Effect::Delay` for scheduling delayed actions
///
/// # Example
///
/// ```rust,ignore
/// use wire_saga_core::delay;
/// use std::time::Duration;
///
/// delay! {
///     duration: Duration::from_millis(500),
///     action: SagaAction::RetryHold
/// }
/// ```
#[macro_export]
macro_rules! delay {
    (
        duration: $duration:expr,
        action: $action:expr
    ) => {
        $crate::effect::Effect::Delay {
            duration: $duration,
            action: ::std::boxed::Box::new($action),
        }
    };
}

/// Create an `Effect::Future` that immediately yields an action
///
/// Used to announce a terminal action to observers of a store.
///
/// # Example
///
/// ```rust,ignore
/// use wire_saga_core::emit;
///
/// emit!(SagaAction::Finished(outcome))
/// ```
#[macro_export]
macro_rules! emit {
    ($action:expr) => {{
        let action = $action;
        $crate::effect::Effect::Future(::std::boxed::Box::pin(async move { Some(action) }))
    }};
}
