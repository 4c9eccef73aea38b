//! Generative provider abstractions for infogen-runtime.
//!
//! This module defines the trait every backend implements and includes the
//! Gemini implementation (behind the `gemini` feature).
//!
//! ## Security
//!
//! All providers use the [`secrets`] module for credential handling.
//! See [`ApiCredential`] for the recommended patterns.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

use infogen_core::{ErrorCategory, GenerationRequest, ModelId, RawResponse};

mod factory;
pub mod secrets;

#[cfg(feature = "gemini")]
mod gemini;

pub use factory::{ProviderFactory, ProviderRegistry};
pub use secrets::{ApiCredential, CredentialSource};

#[cfg(feature = "gemini")]
pub use gemini::{GeminiProvider, GeminiProviderFactory, GEMINI_API_KEY_ENV};

/// Errors from generative providers.
#[derive(Error, Debug, Clone)]
pub enum ProviderError {
    #[error("HTTP request failed: {0}")]
    HttpError(String),

    #[error("Rate limit exceeded, retry after {retry_after:?}")]
    RateLimited { retry_after: Option<Duration> },

    #[error("API error: {status} - {message}")]
    ApiError { status: u16, message: String },

    #[error("JSON parse error: {0}")]
    ParseError(String),

    #[error("Authentication failed: {0}")]
    AuthError(String),

    #[error("Request timeout after {0:?}")]
    Timeout(Duration),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),
}

impl ProviderError {
    /// Translate this error into the closed category set.
    ///
    /// Typed variants map directly; free-form messages go through the
    /// substring heuristics in [`ErrorCategory::from_message`].
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::RateLimited { .. } => ErrorCategory::QuotaExceeded,
            Self::ApiError { status, message } => {
                ErrorCategory::from_status_and_message(Some(*status), message)
            }
            Self::AuthError(_) | Self::NotConfigured(_) => ErrorCategory::InvalidCredentials,
            Self::Timeout(_) => ErrorCategory::Timeout,
            Self::HttpError(message) | Self::ParseError(message) => {
                ErrorCategory::from_message(message)
            }
        }
    }
}

/// Provider abstraction allows swapping generative backends.
///
/// Implementations must be cancel-safe: dropping the future returned by
/// [`generate`](GenerativeProvider::generate) abandons the request and
/// releases its resources.
#[async_trait]
pub trait GenerativeProvider: Send + Sync {
    /// Run one generation call against `model`.
    async fn generate(
        &self,
        model: &ModelId,
        request: &GenerationRequest,
    ) -> Result<RawResponse, ProviderError>;

    /// List the models this credential can call.
    async fn list_models(&self) -> Result<Vec<ModelId>, ProviderError>;

    /// Provider name for logs and cache keys.
    fn name(&self) -> &str;

    /// Non-secret fingerprint of the credential in use.
    fn credential_fingerprint(&self) -> u64 {
        0
    }
}
