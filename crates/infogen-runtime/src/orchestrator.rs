//! Model fallback chain.
//!
//! The orchestrator walks the request's model chain strictly in order, one
//! attempt at a time:
//! - a usable payload ends the walk immediately
//! - a response with no usable payload moves on without waiting
//! - a retryable error waits out its backoff, then moves on
//! - a fatal error (bad credentials) stops the walk
//!
//! Attempts never overlap: models share one rate-limited quota, so running
//! them concurrently would burn it on answers that get thrown away.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use infogen_core::{
    classify, AttemptOutcome, ErrorCategory, GenerationError, GenerationRequest, GenerationResult,
    ModelChain, ModelId, RetryPolicy, RetrySchedule,
};

use crate::attempt::{AttemptError, AttemptExecutor};
use crate::catalog::{describe, CatalogProber};
use crate::providers::GenerativeProvider;
use crate::resilience::{pause, race_deadline, Cancelled, RaceOutcome};

/// Default upper bound on a catalog lookup made for diagnostics.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors from assembling an orchestrator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OrchestratorError {
    #[error("no generative provider configured")]
    MissingProvider,
}

/// Runs a [`GenerationRequest`] against its model chain.
pub struct FallbackOrchestrator {
    executor: AttemptExecutor,
    schedule: RetrySchedule,
    prober: Option<Arc<CatalogProber>>,
    probe_timeout: Duration,
}

impl FallbackOrchestrator {
    pub fn builder() -> FallbackOrchestratorBuilder {
        FallbackOrchestratorBuilder::default()
    }

    /// Orchestrator with default backoffs and a private catalog cache.
    pub fn new(provider: Arc<dyn GenerativeProvider>) -> Self {
        Self {
            executor: AttemptExecutor::new(provider),
            schedule: RetrySchedule::default(),
            prober: Some(Arc::new(CatalogProber::default())),
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }

    pub fn schedule(&self) -> &RetrySchedule {
        &self.schedule
    }

    /// Run without an external cancellation source.
    pub async fn run(&self, request: &GenerationRequest) -> GenerationResult {
        self.run_with_cancel(request, &CancellationToken::new()).await
    }

    /// Run until a model succeeds, the chain is exhausted, a fatal error
    /// occurs, or `cancel` fires.
    pub async fn run_with_cancel(
        &self,
        request: &GenerationRequest,
        cancel: &CancellationToken,
    ) -> GenerationResult {
        let chain = request.model_chain();
        let timeout = request.per_attempt_timeout();
        let mut attempts: Vec<AttemptOutcome> = Vec::with_capacity(chain.len());
        let mut last_error: Option<GenerationError> = None;
        let mut catalog: Option<Vec<ModelId>> = None;

        tracing::info!(chain = %chain, timeout = ?timeout, "Starting generation");

        for (index, model) in chain.iter().enumerate() {
            let has_next = index + 1 < chain.len();
            let started_at = Utc::now();
            let clock = Instant::now();

            let result = self.executor.attempt(model, request, timeout, cancel).await;
            let elapsed = clock.elapsed();

            let error = match result {
                Ok(raw) => match classify(&raw) {
                    Some(payload) => {
                        tracing::info!(
                            model = %model,
                            kind = ?payload.kind(),
                            elapsed_ms = elapsed.as_millis() as u64,
                            "Model produced a usable payload"
                        );
                        attempts.push(AttemptOutcome::succeeded(
                            model.clone(),
                            payload.clone(),
                            started_at,
                            elapsed,
                        ));
                        return GenerationResult::Success {
                            payload,
                            used_model: model.clone(),
                            attempts,
                        };
                    }
                    None => {
                        tracing::warn!(model = %model, "Model returned no usable payload");
                        attempts.push(AttemptOutcome::no_payload(model.clone(), started_at, elapsed));
                        last_error = Some(GenerationError::NoUsablePayload {
                            model: model.clone(),
                        });
                        continue;
                    }
                },
                Err(AttemptError::Cancelled) => return Self::cancelled(attempts),
                Err(error) => error,
            };

            let category = error.category().unwrap_or(ErrorCategory::Unclassified);
            let message = error.to_string();
            attempts.push(AttemptOutcome::failed(
                model.clone(),
                message.as_str(),
                category,
                started_at,
                elapsed,
            ));
            let failure = GenerationError::from_category(category, model, &message);

            match self.schedule.policy_for(category) {
                RetryPolicy::Fatal => {
                    tracing::error!(model = %model, category = %category, error = %message, "Fatal error, aborting chain");
                    let diagnostic = annotate(failure.to_string(), chain, catalog.as_deref());
                    return GenerationResult::Failure {
                        error: failure,
                        diagnostic,
                        attempts,
                    };
                }
                RetryPolicy::Retryable {
                    backoff,
                    probe_catalog,
                } => {
                    tracing::warn!(
                        model = %model,
                        category = %category,
                        error = %message,
                        elapsed_ms = elapsed.as_millis() as u64,
                        "Attempt failed, falling back"
                    );
                    last_error = Some(failure);

                    if probe_catalog && catalog.is_none() {
                        match self.probe_catalog(cancel).await {
                            Ok(known) => catalog = known,
                            Err(Cancelled) => return Self::cancelled(attempts),
                        }
                    }

                    // No point waiting when nothing is left to try.
                    if has_next && pause(backoff, cancel).await.is_err() {
                        return Self::cancelled(attempts);
                    }
                }
            }
        }

        let last_error = last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "no models attempted".to_string());
        let error = GenerationError::ChainExhausted {
            attempted: attempts.len(),
            last_error,
        };
        let diagnostic = annotate(error.to_string(), chain, catalog.as_deref());

        tracing::error!(attempted = attempts.len(), diagnostic = %diagnostic, "Model chain exhausted");
        GenerationResult::Failure {
            error,
            diagnostic,
            attempts,
        }
    }

    /// Look up the catalog once per run. `Ok(None)` when probing is disabled.
    async fn probe_catalog(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Option<Vec<ModelId>>, Cancelled> {
        let Some(prober) = &self.prober else {
            return Ok(None);
        };
        let provider = self.executor.provider().as_ref();

        match race_deadline(prober.probe(provider), self.probe_timeout, cancel).await {
            RaceOutcome::Completed(known) => Ok(Some(known)),
            RaceOutcome::TimedOut(after) => {
                tracing::warn!(timeout = ?after, "Model catalog probe timed out");
                Ok(Some(Vec::new()))
            }
            RaceOutcome::Cancelled => Err(Cancelled),
        }
    }

    fn cancelled(attempts: Vec<AttemptOutcome>) -> GenerationResult {
        tracing::info!(attempted = attempts.len(), "Generation cancelled");
        let error = GenerationError::Cancelled;
        GenerationResult::Failure {
            diagnostic: error.to_string(),
            error,
            attempts,
        }
    }
}

/// Append the catalog findings, if a probe ran, to a failure message.
fn annotate(message: String, chain: &ModelChain, catalog: Option<&[ModelId]>) -> String {
    match catalog {
        Some(known) => format!("{}; {}", message, describe(chain, known)),
        None => message,
    }
}

impl std::fmt::Debug for FallbackOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FallbackOrchestrator")
            .field("executor", &self.executor)
            .field("schedule", &self.schedule)
            .field("catalog", &self.prober.is_some())
            .field("probe_timeout", &self.probe_timeout)
            .finish()
    }
}

/// Builder for [`FallbackOrchestrator`].
pub struct FallbackOrchestratorBuilder {
    provider: Option<Arc<dyn GenerativeProvider>>,
    schedule: RetrySchedule,
    prober: Option<Arc<CatalogProber>>,
    probe_timeout: Duration,
}

impl Default for FallbackOrchestratorBuilder {
    fn default() -> Self {
        Self {
            provider: None,
            schedule: RetrySchedule::default(),
            prober: Some(Arc::new(CatalogProber::default())),
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }
}

impl FallbackOrchestratorBuilder {
    pub fn provider(mut self, provider: Arc<dyn GenerativeProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn retry_schedule(mut self, schedule: RetrySchedule) -> Self {
        self.schedule = schedule;
        self
    }

    /// Share a catalog cache across orchestrators.
    pub fn catalog(mut self, prober: Arc<CatalogProber>) -> Self {
        self.prober = Some(prober);
        self
    }

    /// Never probe the catalog.
    pub fn without_catalog(mut self) -> Self {
        self.prober = None;
        self
    }

    pub fn probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    pub fn build(self) -> Result<FallbackOrchestrator, OrchestratorError> {
        let provider = self.provider.ok_or(OrchestratorError::MissingProvider)?;
        Ok(FallbackOrchestrator {
            executor: AttemptExecutor::new(provider),
            schedule: self.schedule,
            prober: self.prober,
            probe_timeout: self.probe_timeout,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::ProviderError;
    use crate::testing::{ScriptedProvider, Step};
    use infogen_core::{Payload, RawResponse, ResultKind, UnclassifiedAction, NO_USABLE_PAYLOAD};

    fn request(models: &[&str], timeout: Duration) -> GenerationRequest {
        GenerationRequest::builder("A blueprint of a water pump")
            .model_chain(ModelChain::new(models.iter().copied()))
            .per_attempt_timeout(timeout)
            .build()
            .unwrap()
    }

    fn quota() -> Step {
        Step::Fail(ProviderError::RateLimited { retry_after: None })
    }

    fn orchestrator(provider: Arc<ScriptedProvider>) -> FallbackOrchestrator {
        FallbackOrchestrator::builder()
            .provider(provider)
            .build()
            .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_valid_model_wins() {
        let provider = Arc::new(
            ScriptedProvider::new()
                .on("m1", Step::Respond(RawResponse::inline("image/png", vec![1, 2])))
                .on("m2", Step::Respond(RawResponse::text("unused"))),
        );

        let result = orchestrator(provider.clone())
            .run(&request(&["m1", "m2"], Duration::from_secs(5)))
            .await;

        assert_eq!(result.kind(), ResultKind::Image);
        assert_eq!(result.used_model(), Some(&ModelId::new("m1")));
        assert_eq!(provider.calls(), vec![ModelId::new("m1")]);
        assert_eq!(result.attempts().len(), 1);
        assert!(result.attempts()[0].succeeded_with_payload());
    }

    #[tokio::test(start_paused = true)]
    async fn test_quota_error_backs_off_then_falls_back() {
        let provider = Arc::new(
            ScriptedProvider::new()
                .on("m1", quota())
                .on("m2", Step::After(Duration::from_secs(1), RawResponse::text("1. Title"))),
        );
        let start = Instant::now();

        let result = orchestrator(provider.clone())
            .run(&request(&["m1", "m2"], Duration::from_secs(5)))
            .await;

        assert_eq!(result.used_model(), Some(&ModelId::new("m2")));
        assert_eq!(result.kind(), ResultKind::PlainText);
        // 2s rate-limit backoff plus the 1s answer.
        assert!(start.elapsed() >= Duration::from_secs(3));
        assert_eq!(
            result.attempts()[0].category(),
            Some(ErrorCategory::QuotaExceeded)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_retryable_failures_report_last_error() {
        let provider = Arc::new(
            ScriptedProvider::new().on("m1", quota()).on(
                "m2",
                Step::Fail(ProviderError::ApiError {
                    status: 500,
                    message: "Internal error encountered.".into(),
                }),
            ),
        );
        let start = Instant::now();

        let result = orchestrator(provider.clone())
            .run(&request(&["m1", "m2"], Duration::from_secs(5)))
            .await;

        match result.error() {
            Some(GenerationError::ChainExhausted {
                attempted,
                last_error,
            }) => {
                assert_eq!(*attempted, 2);
                assert!(last_error.contains("m2"));
                assert!(last_error.contains("Internal error encountered."));
            }
            other => panic!("expected ChainExhausted, got {:?}", other),
        }
        assert!(result.used_model().is_none());
        assert_eq!(provider.calls().len(), 2);
        // Only the backoff between m1 and m2; none after the last model.
        assert!(start.elapsed() < Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_credentials_abort_immediately() {
        let provider = Arc::new(
            ScriptedProvider::new()
                .on("m1", Step::Fail(ProviderError::AuthError("API key not valid".into())))
                .on("m2", Step::Respond(RawResponse::text("unused"))),
        );

        let result = orchestrator(provider.clone())
            .run(&request(&["m1", "m2", "m3"], Duration::from_secs(5)))
            .await;

        assert!(matches!(
            result.error(),
            Some(GenerationError::InvalidCredentials { .. })
        ));
        assert!(result.diagnostic().unwrap().contains("API key not valid"));
        assert_eq!(provider.calls(), vec![ModelId::new("m1")]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_payload_is_a_soft_failure() {
        let provider = Arc::new(
            ScriptedProvider::new()
                .on("m1", Step::Respond(RawResponse::text("   ")))
                .on("m2", Step::Respond(RawResponse::text("```svg\n<svg><rect/></svg>\n```"))),
        );
        let start = Instant::now();

        let result = orchestrator(provider)
            .run(&request(&["m1", "m2"], Duration::from_secs(5)))
            .await;

        match result.payload() {
            Some(Payload::VectorMarkup { markup }) => {
                assert_eq!(markup, "<svg xmlns=\"http://www.w3.org/2000/svg\"><rect/></svg>")
            }
            other => panic!("expected markup, got {:?}", other),
        }
        assert_eq!(result.attempts()[0].raw_error(), Some(NO_USABLE_PAYLOAD));
        assert!(result.attempts()[0].category().is_none());
        // Soft failures do not back off.
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_only_no_payload_exhausts_with_that_message() {
        let provider = Arc::new(ScriptedProvider::new().on("m1", Step::Respond(RawResponse::default())));

        let result = orchestrator(provider)
            .run(&request(&["m1"], Duration::from_secs(5)))
            .await;

        assert!(result.diagnostic().unwrap().contains(NO_USABLE_PAYLOAD));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_model_times_out_and_next_model_runs() {
        let timeout = Duration::from_secs(5);
        let provider = Arc::new(
            ScriptedProvider::new()
                .on("m1", Step::Hang)
                .on("m2", Step::Respond(RawResponse::text("done"))),
        );

        let result = orchestrator(provider.clone())
            .run(&request(&["m1", "m2"], timeout))
            .await;

        assert_eq!(result.used_model(), Some(&ModelId::new("m2")));
        let timed_out = &result.attempts()[0];
        assert_eq!(timed_out.category(), Some(ErrorCategory::Timeout));
        assert!(timed_out.elapsed() >= timeout);
        assert!(timed_out.elapsed() < timeout + Duration::from_millis(50));
        assert!(provider.hung_call_dropped());
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_found_probes_catalog_once() {
        let provider = Arc::new(ScriptedProvider::new().with_catalog(&["gemini-1.5-pro"]));

        let result = orchestrator(provider.clone())
            .run(&request(&["nano-banana", "imagen"], Duration::from_secs(5)))
            .await;

        let diagnostic = result.diagnostic().unwrap();
        assert!(diagnostic.contains("all 2 models failed"));
        assert!(diagnostic.contains("available models: gemini-1.5-pro"));
        assert!(diagnostic.contains("not in catalog: nano-banana, imagen"));
        assert_eq!(provider.catalog_calls(), 1);
        assert_eq!(
            result.attempts()[1].category(),
            Some(ErrorCategory::ModelNotFound)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_error_after_probe_keeps_catalog_findings() {
        let provider = Arc::new(
            ScriptedProvider::new()
                .with_catalog(&["gemini-1.5-pro"])
                .on("m2", Step::Fail(ProviderError::AuthError("API key not valid".into()))),
        );

        let result = orchestrator(provider.clone())
            .run(&request(&["m1", "m2", "m3"], Duration::from_secs(5)))
            .await;

        assert!(matches!(
            result.error(),
            Some(GenerationError::InvalidCredentials { .. })
        ));
        let diagnostic = result.diagnostic().unwrap();
        assert!(diagnostic.starts_with("invalid credentials: Authentication failed: API key not valid"));
        assert!(diagnostic.contains("available models: gemini-1.5-pro"));
        assert_eq!(provider.catalog_calls(), 1);
        assert_eq!(provider.calls(), vec![ModelId::new("m1"), ModelId::new("m2")]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_catalog_disabled_leaves_diagnostic_plain() {
        let provider = Arc::new(ScriptedProvider::new().with_catalog(&["gemini-1.5-pro"]));
        let orchestrator = FallbackOrchestrator::builder()
            .provider(provider.clone())
            .without_catalog()
            .build()
            .unwrap();

        let result = orchestrator
            .run(&request(&["nano-banana"], Duration::from_secs(5)))
            .await;

        assert!(!result.diagnostic().unwrap().contains("available models"));
        assert_eq!(provider.catalog_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_attempt() {
        let provider = Arc::new(ScriptedProvider::new().on("m1", Step::Hang));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let result = orchestrator(provider.clone())
            .run_with_cancel(&request(&["m1", "m2"], Duration::from_secs(30)), &cancel)
            .await;

        assert_eq!(result.error(), Some(&GenerationError::Cancelled));
        assert_eq!(provider.calls(), vec![ModelId::new("m1")]);
        assert!(provider.hung_call_dropped());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_backoff() {
        let provider = Arc::new(
            ScriptedProvider::new()
                .on("m1", quota())
                .on("m2", Step::Respond(RawResponse::text("unused"))),
        );
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let result = orchestrator(provider.clone())
            .run_with_cancel(&request(&["m1", "m2"], Duration::from_secs(30)), &cancel)
            .await;

        assert_eq!(result.kind(), ResultKind::Failure);
        assert_eq!(result.error(), Some(&GenerationError::Cancelled));
        assert_eq!(result.attempts().len(), 1);
        assert_eq!(provider.calls(), vec![ModelId::new("m1")]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unclassified_abort_policy() {
        let provider = Arc::new(
            ScriptedProvider::new()
                .on("m1", Step::Fail(ProviderError::HttpError("connection reset".into())))
                .on("m2", Step::Respond(RawResponse::text("unused"))),
        );
        let orchestrator = FallbackOrchestrator::builder()
            .provider(provider.clone())
            .retry_schedule(RetrySchedule {
                unclassified: UnclassifiedAction::Abort,
                ..Default::default()
            })
            .build()
            .unwrap();

        let result = orchestrator
            .run(&request(&["m1", "m2"], Duration::from_secs(5)))
            .await;

        assert!(matches!(
            result.error(),
            Some(GenerationError::Unclassified { .. })
        ));
        assert_eq!(provider.calls().len(), 1);
    }

    #[test]
    fn test_builder_requires_provider() {
        assert_eq!(
            FallbackOrchestrator::builder().build().unwrap_err(),
            OrchestratorError::MissingProvider
        );
    }
}
