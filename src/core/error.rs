//! # Error Handling Module
//!
//! This module defines the typed error surface for the control plane together
//! with the error taxonomy that drives recovery decisions. Every fallible
//! operation in the crate returns [`ControlResult`], and callers can inspect
//! an error's [`ErrorCategory`] to pick a recovery strategy instead of
//! pattern-matching on individual variants.
//!
//! Recovery policy:
//! - transient / network / timeout errors retry with a capped backoff
//! - resource exhaustion and critical internal errors trip circuit breakers
//! - configuration, validation and permanent errors fail fast
//! - low-severity unclassified errors are logged and ignored

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Main result type used throughout the control plane.
pub type ControlResult<T> = Result<T, ControlPlaneError>;

/// Typed errors surfaced by the control plane.
///
/// Each variant carries enough context to name the component or target
/// involved, so a caller supervising many topologies can attribute failures
/// without string parsing.
#[derive(Debug, Error, Clone)]
pub enum ControlPlaneError {
    /// No instance of the component is ready to accept work.
    #[error("no healthy instances available for component: {component}")]
    NoHealthyInstances { component: String },

    /// A bounded inbound queue rejected a non-blocking enqueue.
    #[error("queue full for target: {target}")]
    QueueFull { target: String },

    /// Submission arrived after shutdown began.
    #[error("component is shutting down: {component}")]
    ShuttingDown { component: String },

    /// Circuit breaker rejected the call without invoking it.
    #[error("circuit breaker open for target: {target}")]
    CircuitOpen { target: String },

    /// Every eligible fallback candidate was tried and failed.
    #[error("fallback routing exhausted for primary target {primary} after {attempts} attempts")]
    FallbackExhausted { primary: String, attempts: usize },

    /// The target id has no registered queue handle.
    #[error("unknown target: {target}")]
    UnknownTarget { target: String },

    /// Invalid configuration (bad bounds, zero weights, missing nodes).
    #[error("configuration error: {message}")]
    Configuration { message: String },

    /// A sub-flow referenced itself, directly or transitively.
    #[error("decision graph cycle detected at flow: {flow}")]
    GraphCycle { flow: String },

    /// The graph names a start node that does not exist.
    #[error("decision graph {flow} is missing its start node {node}")]
    StartNodeMissing { flow: String, node: String },

    /// The terminal output sink rejected a non-blocking delivery.
    #[error("terminal output sink is full")]
    SinkFull,

    /// A bounded operation exceeded its deadline.
    #[error("operation timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// Unexpected internal failure.
    #[error("internal error: {message}")]
    Internal { message: String },
}

impl ControlPlaneError {
    /// Create a configuration error with a custom message.
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create an internal error with a custom message.
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Classify this error into the recovery taxonomy.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::NoHealthyInstances { .. } => ErrorCategory::Resource,
            Self::QueueFull { .. } => ErrorCategory::Resource,
            Self::ShuttingDown { .. } => ErrorCategory::Permanent,
            Self::CircuitOpen { .. } => ErrorCategory::Transient,
            Self::FallbackExhausted { .. } => ErrorCategory::Network,
            Self::UnknownTarget { .. } => ErrorCategory::Configuration,
            Self::Configuration { .. } => ErrorCategory::Configuration,
            Self::GraphCycle { .. } => ErrorCategory::Configuration,
            Self::StartNodeMissing { .. } => ErrorCategory::Configuration,
            Self::SinkFull => ErrorCategory::Resource,
            Self::Timeout { .. } => ErrorCategory::Timeout,
            Self::Internal { .. } => ErrorCategory::Internal,
        }
    }

    /// Whether a caller may retry this operation.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Transient | ErrorCategory::Network | ErrorCategory::Timeout
        )
    }

    /// Whether this failure should count against the target's circuit breaker.
    pub fn should_trigger_circuit_breaker(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Resource | ErrorCategory::Network | ErrorCategory::Timeout
        )
    }
}

/// Coarse error classification used to pick a recovery strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Transient,
    Permanent,
    Configuration,
    Resource,
    Network,
    Timeout,
    Validation,
    Internal,
}

/// Severity attached to an error occurrence by the reporting site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

/// What a supervisor should do about an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryStrategy {
    /// Retry with backoff, see [`backoff_delay`].
    Retry,
    /// Route subsequent calls through the target's circuit breaker.
    CircuitBreak,
    /// Surface the error to the caller immediately.
    FailFast,
    /// Log and continue.
    Ignore,
}

/// Map an error category and severity to its default recovery strategy.
///
/// Critical severity escalates to circuit breaking regardless of category.
pub fn recovery_strategy(category: ErrorCategory, severity: ErrorSeverity) -> RecoveryStrategy {
    if severity == ErrorSeverity::Critical {
        return RecoveryStrategy::CircuitBreak;
    }
    match category {
        ErrorCategory::Transient | ErrorCategory::Network | ErrorCategory::Timeout => {
            RecoveryStrategy::Retry
        }
        ErrorCategory::Resource => RecoveryStrategy::CircuitBreak,
        ErrorCategory::Configuration | ErrorCategory::Validation | ErrorCategory::Permanent => {
            RecoveryStrategy::FailFast
        }
        ErrorCategory::Internal => {
            if severity <= ErrorSeverity::Low {
                RecoveryStrategy::Ignore
            } else {
                RecoveryStrategy::CircuitBreak
            }
        }
    }
}

/// Backoff delay for the given retry attempt (0-based), capped at `cap`.
///
/// The curve is `base * 1.5 * (attempt + 1)`: linear-ish growth that spreads
/// retries out without the cliff of a true exponential.
pub fn backoff_delay(base: Duration, attempt: u32, cap: Duration) -> Duration {
    let scaled = base.mul_f64(1.5 * (attempt as f64 + 1.0));
    scaled.min(cap)
}
