//! Configuration management for the wire-transfer service.
//!
//! Loads configuration from environment variables with defaults. Unlike
//! missing variables, values that are present but unparseable are errors.

use crate::saga::SagaPolicies;
use crate::service::DEFAULT_COMPLETED_RETENTION;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use wire_saga_runtime::retry::{RetryPolicy, RetryPolicyBuilder};

/// A configuration variable held a value that could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid value {value:?} for {name}: {reason}")]
pub struct ConfigError {
    /// Variable name
    pub name: &'static str,
    /// Offending value
    pub value: String,
    /// What was expected
    pub reason: &'static str,
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// HTTP front door
    pub server: ServerConfig,
    /// Outbound collaborators
    pub services: ServicesConfig,
    /// Retry and time budgets
    pub saga: SagaConfig,
}

/// Server configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to bind to
    pub port: u16,
}

/// Outbound service endpoints
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServicesConfig {
    /// Wire initiation endpoint
    pub bank_api_url: String,
    /// Ledger base URL
    pub ledger_api_url: String,
    /// Per-request HTTP timeout in seconds
    pub activity_timeout_secs: u64,
}

/// Saga budgets
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SagaConfig {
    /// Activity retries; `None` is unbounded
    pub activity_max_retries: Option<usize>,
    /// First activity backoff in milliseconds
    pub activity_initial_delay_ms: u64,
    /// Activity backoff cap in milliseconds
    pub activity_max_delay_ms: u64,
    /// Hold step retries; `None` is unbounded
    pub hold_step_max_retries: Option<usize>,
    /// First hold step backoff in milliseconds
    pub hold_step_initial_delay_ms: u64,
    /// Time budget of one hold sub-saga run in seconds
    pub hold_step_timeout_secs: u64,
    /// Confirmation bound in seconds; `None` waits forever
    pub confirmation_timeout_secs: Option<u64>,
    /// Finished transfers remembered for status and duplicate checks
    pub completed_retention: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 3000,
            },
            services: ServicesConfig {
                bank_api_url: "http://localhost:3001/initiate-wire".to_string(),
                ledger_api_url: "http://localhost:3002".to_string(),
                activity_timeout_secs: 60,
            },
            saga: SagaConfig {
                activity_max_retries: Some(5),
                activity_initial_delay_ms: 200,
                activity_max_delay_ms: 10_000,
                hold_step_max_retries: Some(5),
                hold_step_initial_delay_ms: 500,
                hold_step_timeout_secs: 60,
                confirmation_timeout_secs: None,
                completed_retention: DEFAULT_COMPLETED_RETENTION,
            },
        }
    }
}

fn parse<T: std::str::FromStr>(
    name: &'static str,
    value: Option<String>,
    default: T,
    reason: &'static str,
) -> Result<T, ConfigError> {
    match value {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError { name, value, reason }),
    }
}

fn parse_retries(
    name: &'static str,
    value: Option<String>,
    default: Option<usize>,
) -> Result<Option<usize>, ConfigError> {
    match value {
        None => Ok(default),
        Some(value) if value.trim().eq_ignore_ascii_case("unbounded") => Ok(None),
        value => parse(name, value, 0, "a count or \"unbounded\"").map(Some),
    }
}

impl Config {
    /// Load configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a variable is set to an unparseable value.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration from an arbitrary variable source.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a variable is set to an unparseable value.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let var = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        Ok(Self {
            server: ServerConfig {
                host: var("HOST").unwrap_or(defaults.server.host),
                port: parse("PORT", var("PORT"), defaults.server.port, "a port number")?,
            },
            services: ServicesConfig {
                bank_api_url: var("BANK_API_URL").unwrap_or(defaults.services.bank_api_url),
                ledger_api_url: var("LEDGER_API_URL").unwrap_or(defaults.services.ledger_api_url),
                activity_timeout_secs: parse(
                    "ACTIVITY_TIMEOUT_SECS",
                    var("ACTIVITY_TIMEOUT_SECS"),
                    defaults.services.activity_timeout_secs,
                    "whole seconds",
                )?,
            },
            saga: SagaConfig {
                activity_max_retries: parse_retries(
                    "ACTIVITY_MAX_RETRIES",
                    var("ACTIVITY_MAX_RETRIES"),
                    defaults.saga.activity_max_retries,
                )?,
                activity_initial_delay_ms: parse(
                    "ACTIVITY_INITIAL_DELAY_MS",
                    var("ACTIVITY_INITIAL_DELAY_MS"),
                    defaults.saga.activity_initial_delay_ms,
                    "milliseconds",
                )?,
                activity_max_delay_ms: parse(
                    "ACTIVITY_MAX_DELAY_MS",
                    var("ACTIVITY_MAX_DELAY_MS"),
                    defaults.saga.activity_max_delay_ms,
                    "milliseconds",
                )?,
                hold_step_max_retries: parse_retries(
                    "HOLD_STEP_MAX_RETRIES",
                    var("HOLD_STEP_MAX_RETRIES"),
                    defaults.saga.hold_step_max_retries,
                )?,
                hold_step_initial_delay_ms: parse(
                    "HOLD_STEP_INITIAL_DELAY_MS",
                    var("HOLD_STEP_INITIAL_DELAY_MS"),
                    defaults.saga.hold_step_initial_delay_ms,
                    "milliseconds",
                )?,
                hold_step_timeout_secs: parse(
                    "HOLD_STEP_TIMEOUT_SECS",
                    var("HOLD_STEP_TIMEOUT_SECS"),
                    defaults.saga.hold_step_timeout_secs,
                    "whole seconds",
                )?,
                confirmation_timeout_secs: var("CONFIRMATION_TIMEOUT_SECS")
                    .map(|value| {
                        parse("CONFIRMATION_TIMEOUT_SECS", Some(value), 0, "whole seconds")
                    })
                    .transpose()?,
                completed_retention: parse(
                    "COMPLETED_RETENTION",
                    var("COMPLETED_RETENTION"),
                    defaults.saga.completed_retention,
                    "a count",
                )?,
            },
        })
    }

    /// Address the HTTP server binds to.
    #[must_use]
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// Per-request timeout of the outbound HTTP clients.
    #[must_use]
    pub const fn activity_timeout(&self) -> Duration {
        Duration::from_secs(self.services.activity_timeout_secs)
    }

    /// Step budgets for the orchestrator.
    #[must_use]
    pub fn policies(&self) -> SagaPolicies {
        let saga = &self.saga;
        let max_delay = Duration::from_millis(saga.activity_max_delay_ms);
        let activity = budget(saga.activity_max_retries)
            .initial_delay(Duration::from_millis(saga.activity_initial_delay_ms))
            .max_delay(max_delay)
            .build();

        SagaPolicies {
            hold_step: budget(saga.hold_step_max_retries)
                .initial_delay(Duration::from_millis(saga.hold_step_initial_delay_ms))
                .max_delay(max_delay)
                .build(),
            hold_activity: activity.clone(),
            wire_activity: activity.clone(),
            release_activity: activity,
            hold_step_timeout: Duration::from_secs(saga.hold_step_timeout_secs),
            confirmation_timeout: saga.confirmation_timeout_secs.map(Duration::from_secs),
        }
    }
}

fn budget(max_retries: Option<usize>) -> RetryPolicyBuilder {
    match max_retries {
        Some(count) => RetryPolicy::builder().max_retries(count),
        None => RetryPolicy::builder().unbounded(),
    }
}
