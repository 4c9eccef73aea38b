//! Error taxonomy and retry policy for the model fallback chain.
//!
//! Provider failures arrive as opaque messages (and sometimes an HTTP status).
//! They are translated exactly once, at the provider boundary, into the closed
//! [`ErrorCategory`] set. Everything downstream (retry decisions, catalog
//! probing, user-facing diagnostics) works on the category only.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::types::ModelId;

/// Synthetic message recorded when a call succeeds but yields nothing usable.
pub const NO_USABLE_PAYLOAD: &str = "model returned no usable payload";

/// Markers checked before anything else so a bad credential is never retried.
const CREDENTIAL_MARKERS: &[&str] = &[
    "api key",
    "api_key",
    "unauthenticated",
    "permission denied",
    "invalid credentials",
];

const QUOTA_MARKERS: &[&str] = &["quota", "429", "exhausted", "rate limit"];

const NOT_FOUND_MARKERS: &[&str] = &["not found", "404"];

const TIMEOUT_MARKERS: &[&str] = &["timeout", "timed out", "deadline"];

/// Closed set of failure categories a provider error can fall into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Rate limit or usage cap on the provider side.
    QuotaExceeded,

    /// The requested model id does not exist for this credential.
    ModelNotFound,

    /// The attempt did not finish before its deadline.
    Timeout,

    /// The credential was rejected. Always fatal.
    InvalidCredentials,

    /// None of the known markers matched.
    Unclassified,
}

impl ErrorCategory {
    /// Classify a raw provider error message.
    ///
    /// Matching is substring based on the lowercased message. Credential
    /// markers are checked first.
    pub fn from_message(message: &str) -> Self {
        let lower = message.to_lowercase();
        let contains_any = |markers: &[&str]| markers.iter().any(|m| lower.contains(m));

        if contains_any(CREDENTIAL_MARKERS) {
            Self::InvalidCredentials
        } else if contains_any(QUOTA_MARKERS) {
            Self::QuotaExceeded
        } else if contains_any(NOT_FOUND_MARKERS) {
            Self::ModelNotFound
        } else if contains_any(TIMEOUT_MARKERS) {
            Self::Timeout
        } else {
            Self::Unclassified
        }
    }

    /// Category implied by an HTTP status, when the status alone is conclusive.
    pub fn from_status(status: u16) -> Option<Self> {
        match status {
            429 => Some(Self::QuotaExceeded),
            404 => Some(Self::ModelNotFound),
            401 | 403 => Some(Self::InvalidCredentials),
            408 | 504 => Some(Self::Timeout),
            _ => None,
        }
    }

    /// Classify using the status first and the message as a fallback.
    pub fn from_status_and_message(status: Option<u16>, message: &str) -> Self {
        status
            .and_then(Self::from_status)
            .unwrap_or_else(|| Self::from_message(message))
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::QuotaExceeded => "quota_exceeded",
            Self::ModelNotFound => "model_not_found",
            Self::Timeout => "timeout",
            Self::InvalidCredentials => "invalid_credentials",
            Self::Unclassified => "unclassified",
        };
        f.write_str(label)
    }
}

/// What the orchestrator should do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryPolicy {
    /// Wait `backoff`, then move on to the next model.
    Retryable {
        backoff: Duration,
        /// Look up the model catalog to enrich the diagnostic.
        probe_catalog: bool,
    },

    /// Stop the chain immediately.
    Fatal,
}

impl RetryPolicy {
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal)
    }
}

/// Policy for errors that match no known category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnclassifiedAction {
    /// Advance to the next model without waiting.
    #[default]
    Retry,

    /// Abort the chain.
    Abort,
}

/// Backoff durations per category.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrySchedule {
    /// Wait after a quota / rate limit error
    pub rate_limit_backoff: Duration,

    /// Wait after a model-not-found error
    pub not_found_backoff: Duration,

    /// What to do with unclassified errors
    pub unclassified: UnclassifiedAction,
}

impl Default for RetrySchedule {
    fn default() -> Self {
        Self {
            rate_limit_backoff: Duration::from_secs(2),
            not_found_backoff: Duration::from_secs(1),
            unclassified: UnclassifiedAction::Retry,
        }
    }
}

impl RetrySchedule {
    /// Map a category onto a retry policy.
    pub fn policy_for(&self, category: ErrorCategory) -> RetryPolicy {
        match category {
            ErrorCategory::QuotaExceeded => RetryPolicy::Retryable {
                backoff: self.rate_limit_backoff,
                probe_catalog: false,
            },
            ErrorCategory::ModelNotFound => RetryPolicy::Retryable {
                backoff: self.not_found_backoff,
                probe_catalog: true,
            },
            ErrorCategory::Timeout => RetryPolicy::Retryable {
                backoff: Duration::ZERO,
                probe_catalog: false,
            },
            ErrorCategory::InvalidCredentials => RetryPolicy::Fatal,
            ErrorCategory::Unclassified => match self.unclassified {
                UnclassifiedAction::Retry => RetryPolicy::Retryable {
                    backoff: Duration::ZERO,
                    probe_catalog: false,
                },
                UnclassifiedAction::Abort => RetryPolicy::Fatal,
            },
        }
    }
}

/// Terminal failure reported by the orchestrator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GenerationError {
    #[error("quota exceeded on {model}: {message}")]
    QuotaExceeded { model: ModelId, message: String },

    #[error("model {model} not found: {message}")]
    ModelNotFound { model: ModelId, message: String },

    #[error("{model} timed out: {message}")]
    Timeout { model: ModelId, message: String },

    #[error("invalid credentials: {message}")]
    InvalidCredentials { message: String },

    #[error("{model}: model returned no usable payload")]
    NoUsablePayload { model: ModelId },

    #[error("{model} failed: {message}")]
    Unclassified { model: ModelId, message: String },

    #[error("all {attempted} models failed; last error: {last_error}")]
    ChainExhausted { attempted: usize, last_error: String },

    #[error("generation cancelled")]
    Cancelled,
}

impl GenerationError {
    /// Build the error for a failed attempt of a given category.
    pub fn from_category(category: ErrorCategory, model: &ModelId, message: &str) -> Self {
        let model = model.clone();
        let message = message.to_string();
        match category {
            ErrorCategory::QuotaExceeded => Self::QuotaExceeded { model, message },
            ErrorCategory::ModelNotFound => Self::ModelNotFound { model, message },
            ErrorCategory::Timeout => Self::Timeout { model, message },
            ErrorCategory::InvalidCredentials => Self::InvalidCredentials { message },
            ErrorCategory::Unclassified => Self::Unclassified { model, message },
        }
    }

    /// Category of this error, if it maps onto one.
    pub fn category(&self) -> Option<ErrorCategory> {
        match self {
            Self::QuotaExceeded { .. } => Some(ErrorCategory::QuotaExceeded),
            Self::ModelNotFound { .. } => Some(ErrorCategory::ModelNotFound),
            Self::Timeout { .. } => Some(ErrorCategory::Timeout),
            Self::InvalidCredentials { .. } => Some(ErrorCategory::InvalidCredentials),
            Self::Unclassified { .. } => Some(ErrorCategory::Unclassified),
            Self::NoUsablePayload { .. } | Self::ChainExhausted { .. } | Self::Cancelled => None,
        }
    }
}
