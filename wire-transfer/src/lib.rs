//! # Wire Transfer
//!
//! Durable domestic wire-transfer saga.
//!
//! A transfer runs as one orchestrator instance per request id:
//!
//! 1. A hold is placed on the sender account (Hold Sub-Saga)
//! 2. The wire is initiated with the bank
//! 3. The saga waits for the bank's settlement webhook, routed back to it
//!    by the Webhook Dispatch Saga through the request id
//!
//! If the wire fails after the hold was placed, the hold is released
//! before the saga aborts.
//!
//! ## Example
//!
//! ```ignore
//! use wire_transfer::{WireTransferService, saga::WireTransferEnvironment};
//!
//! let service = WireTransferService::new(environment);
//! let accepted = service.submit(&payload).await?;
//! let outcome = service.await_outcome(&accepted.transaction_id, timeout).await;
//! ```

pub mod activities;
pub mod config;
pub mod dispatch;
pub mod hold;
pub mod mocks;
pub mod saga;
pub mod server;
pub mod service;
pub mod types;
pub mod validation;
pub mod webhook;

pub use config::{Config, ConfigError};
pub use saga::{SagaAction, SagaFailure, SagaOutcome, SagaPhase, WireTransferSaga, WireTransferState};
pub use service::{SubmitError, TransferStatus, WireTransferService};
