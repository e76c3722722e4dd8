//! Activity failure classification.
//!
//! Every failed activity (a network call made on behalf of a saga step) is
//! classified exactly once, at the activity boundary, as either retryable or
//! non-retryable. The retry machinery in the runtime only ever looks at this
//! verdict, so two replays of the same response always take the same path.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Whether the surrounding retry policy may re-attempt a failed step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureKind {
    /// Transient; the step is re-attempted with backoff.
    Retryable,
    /// Permanent; the step fails immediately and the saga stops.
    NonRetryable,
}

/// A classified activity failure.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{message}")]
pub struct ActivityFailure {
    /// Retry verdict
    pub kind: FailureKind,
    /// Human-readable description, surfaced to operators
    pub message: String,
}

impl ActivityFailure {
    /// Create a failure the retry policy may re-attempt.
    #[must_use]
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Retryable,
            message: message.into(),
        }
    }

    /// Create a failure that must propagate immediately.
    #[must_use]
    pub fn non_retryable(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::NonRetryable,
            message: message.into(),
        }
    }

    /// Whether the retry policy may re-attempt this failure.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self.kind, FailureKind::Retryable)
    }

    /// Turn a retryable failure into a non-retryable one once its retry
    /// budget is spent, keeping the original message.
    #[must_use]
    pub fn exhausted(self) -> Self {
        if self.is_retryable() {
            Self::non_retryable(format!("retries exhausted: {}", self.message))
        } else {
            self
        }
    }
}
