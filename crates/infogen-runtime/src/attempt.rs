//! One timed call against one model.

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use infogen_core::{ErrorCategory, GenerationRequest, ModelId, RawResponse};

use crate::providers::{GenerativeProvider, ProviderError};
use crate::resilience::{race_deadline, RaceOutcome};

/// Why a single attempt produced no response.
#[derive(Error, Debug, Clone)]
pub enum AttemptError {
    /// The provider answered with an error before the deadline.
    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("attempt timed out after {}", human(.0))]
    TimedOut(Duration),

    #[error("attempt cancelled")]
    Cancelled,
}

fn human(duration: &Duration) -> humantime::FormattedDuration {
    humantime::format_duration(*duration)
}

impl AttemptError {
    /// Category for the retry decision. Cancellation has none.
    pub fn category(&self) -> Option<ErrorCategory> {
        match self {
            Self::Provider(e) => Some(e.category()),
            Self::TimedOut(_) => Some(ErrorCategory::Timeout),
            Self::Cancelled => None,
        }
    }
}

/// Runs provider calls under a per-attempt deadline.
#[derive(Clone)]
pub struct AttemptExecutor {
    provider: Arc<dyn GenerativeProvider>,
}

impl AttemptExecutor {
    pub fn new(provider: Arc<dyn GenerativeProvider>) -> Self {
        Self { provider }
    }

    pub fn provider(&self) -> &Arc<dyn GenerativeProvider> {
        &self.provider
    }

    /// Call `model` once, giving up after `timeout`.
    ///
    /// A provider result that arrives in time is returned as-is. On timeout or
    /// cancellation the in-flight call is dropped.
    pub async fn attempt(
        &self,
        model: &ModelId,
        request: &GenerationRequest,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<RawResponse, AttemptError> {
        tracing::debug!(model = %model, timeout_ms = timeout.as_millis() as u64, "Starting attempt");

        match race_deadline(self.provider.generate(model, request), timeout, cancel).await {
            RaceOutcome::Completed(Ok(response)) => Ok(response),
            RaceOutcome::Completed(Err(e)) => Err(e.into()),
            RaceOutcome::TimedOut(after) => {
                tracing::warn!(model = %model, timeout = ?after, "Attempt timed out");
                Err(AttemptError::TimedOut(after))
            }
            RaceOutcome::Cancelled => Err(AttemptError::Cancelled),
        }
    }
}

impl std::fmt::Debug for AttemptExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttemptExecutor")
            .field("provider", &self.provider.name())
            .finish()
    }
}
