//! Error types for the aqua-alerts crate.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::AlertStatus;

/// Errors that can occur in the alerting system.
#[derive(Debug, Error)]
pub enum AlertError {
    /// Alert with the given ID was not found.
    #[error("alert not found: {id}")]
    AlertNotFound {
        /// The alert ID that was not found.
        id: String,
    },

    /// Alert rule with the given ID was not found.
    #[error("rule not found: {id}")]
    RuleNotFound {
        /// The rule ID that was not found.
        id: String,
    },

    /// The backing store rejected or could not serve the call.
    #[error("store unavailable: {reason}")]
    StoreUnavailable {
        /// The reason reported by the store.
        reason: String,
    },

    /// A store call did not complete within the configured timeout.
    #[error("store call timed out after {secs}s: {operation}")]
    StoreTimeout {
        /// The store operation that timed out.
        operation: &'static str,
        /// The timeout that elapsed.
        secs: u64,
    },

    /// The input failed validation.
    #[error("validation failed: {reason}")]
    ValidationFailed {
        /// The reason the input is invalid.
        reason: String,
    },

    /// The requested status change is not an allowed edge.
    #[error("invalid status transition for alert {id}: {from} -> {to}")]
    InvalidTransition {
        /// The alert ID.
        id: String,
        /// The current status.
        from: AlertStatus,
        /// The requested status.
        to: AlertStatus,
    },

    /// A notification channel failed to deliver.
    #[error("action dispatch failed: {reason}")]
    ActionDispatchFailed {
        /// The reason the dispatch failed.
        reason: String,
    },

    /// A rule condition could not be evaluated against an alert.
    #[error("rule evaluation failed: {reason}")]
    RuleEvaluation {
        /// The reason the evaluation failed.
        reason: String,
    },

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    SerializationError(String),
}

impl AlertError {
    /// Returns the structured kind of this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::AlertNotFound { .. } | Self::RuleNotFound { .. } => ErrorKind::NotFound,
            Self::StoreUnavailable { .. } => ErrorKind::StoreUnavailable,
            Self::StoreTimeout { .. } => ErrorKind::StoreTimeout,
            Self::ValidationFailed { .. } => ErrorKind::ValidationFailed,
            Self::InvalidTransition { .. } => ErrorKind::InvalidTransition,
            Self::ActionDispatchFailed { .. } => ErrorKind::ActionDispatchFailed,
            Self::RuleEvaluation { .. } => ErrorKind::RuleEvaluation,
            Self::SerializationError(_) => ErrorKind::Serialization,
        }
    }

    /// Returns true if retrying the same call later may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self.kind(), ErrorKind::StoreUnavailable | ErrorKind::StoreTimeout)
    }
}

impl From<serde_json::Error> for AlertError {
    fn from(err: serde_json::Error) -> Self {
        Self::SerializationError(err.to_string())
    }
}

/// Coarse error taxonomy surfaced to API callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The alert or rule does not exist.
    NotFound,
    /// The store is unreachable or rejected the write.
    StoreUnavailable,
    /// The store did not answer in time.
    StoreTimeout,
    /// The request was malformed.
    ValidationFailed,
    /// The status change is not allowed.
    InvalidTransition,
    /// A notification could not be dispatched.
    ActionDispatchFailed,
    /// A rule condition could not be evaluated.
    RuleEvaluation,
    /// A payload could not be (de)serialized.
    Serialization,
}

impl ErrorKind {
    /// Returns the kind as a string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::StoreUnavailable => "store_unavailable",
            Self::StoreTimeout => "store_timeout",
            Self::ValidationFailed => "validation_failed",
            Self::InvalidTransition => "invalid_transition",
            Self::ActionDispatchFailed => "action_dispatch_failed",
            Self::RuleEvaluation => "rule_evaluation",
            Self::Serialization => "serialization",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result type for alert operations.
pub type Result<T> = std::result::Result<T, AlertError>;
