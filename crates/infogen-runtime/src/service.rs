//! Request handling front door.
//!
//! [`GenerationService`] turns a wire request into a provider, a model chain
//! and a [`GenerationRequest`](infogen_core::GenerationRequest), runs the
//! fallback chain, and renders the wire response. It holds no per-request
//! state, so one instance serves any number of concurrent requests.

use serde_json::Value as JsonValue;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use infogen_core::{GenerationResult, ModelChain, ModelId};

use crate::catalog::CatalogProber;
use crate::config::{ChainKind, ConfigError, RuntimeConfig};
use crate::orchestrator::{FallbackOrchestrator, OrchestratorError};
use crate::providers::{ApiCredential, GenerativeProvider, ProviderError, ProviderRegistry};
use crate::wire::{GenerateRequestBody, WireError, WireResponse};

/// Errors raised before or around a generation run.
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error(transparent)]
    Wire(#[from] WireError),

    #[error("{0}")]
    MissingCredential(String),

    #[error(transparent)]
    Provider(ProviderError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),
}

impl ServiceError {
    /// Status a front end should answer with.
    pub fn status(&self) -> u16 {
        match self {
            Self::Wire(e) => e.status(),
            Self::MissingCredential(_) => 400,
            Self::Provider(ProviderError::AuthError(_)) => 401,
            Self::Provider(_) => 502,
            Self::Config(_) | Self::Orchestrator(_) => 500,
        }
    }
}

impl From<ProviderError> for ServiceError {
    fn from(error: ProviderError) -> Self {
        match error {
            ProviderError::NotConfigured(message) => Self::MissingCredential(message),
            other => Self::Provider(other),
        }
    }
}

/// Per-call overrides of the configured defaults.
#[derive(Debug, Clone, Default)]
pub struct GenerationOptions {
    /// Replace the route's default chain
    pub model_chain: Option<ModelChain>,

    /// Replace the configured per-attempt deadline
    pub per_attempt_timeout: Option<Duration>,
}

/// Configured entry point for generation requests.
pub struct GenerationService {
    config: RuntimeConfig,
    registry: ProviderRegistry,
    catalog: Option<Arc<CatalogProber>>,
}

impl GenerationService {
    /// Service backed by the built-in providers.
    pub fn new(config: RuntimeConfig) -> Result<Self, ServiceError> {
        Self::with_registry(config, ProviderRegistry::with_defaults())
    }

    pub fn with_registry(
        config: RuntimeConfig,
        registry: ProviderRegistry,
    ) -> Result<Self, ServiceError> {
        config.validate()?;
        registry
            .validate(&config.provider.kind, &config.factory_config())
            .map_err(ServiceError::Provider)?;

        let catalog = config
            .catalog
            .enabled
            .then(|| Arc::new(CatalogProber::new(config.catalog.ttl)));

        tracing::debug!(
            provider = %config.provider.kind,
            image_chain = %config.chains.image,
            text_chain = %config.chains.text,
            "Generation service ready"
        );

        Ok(Self {
            config,
            registry,
            catalog,
        })
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Provider bound to the caller's key, or the process-wide key.
    pub fn provider_for(
        &self,
        api_key: Option<&str>,
    ) -> Result<Arc<dyn GenerativeProvider>, ServiceError> {
        let credential =
            ApiCredential::from_override_or_env(api_key, &self.config.provider.api_key_env, "API key")?;

        tracing::debug!(credential = %credential, "Resolved credential");

        Ok(self.registry.create(
            &self.config.provider.kind,
            &self.config.factory_config(),
            credential,
        )?)
    }

    fn orchestrator(
        &self,
        provider: Arc<dyn GenerativeProvider>,
    ) -> Result<FallbackOrchestrator, ServiceError> {
        let builder = FallbackOrchestrator::builder()
            .provider(provider)
            .retry_schedule(self.config.retry_schedule())
            .probe_timeout(self.config.catalog.probe_timeout);

        let builder = match &self.catalog {
            Some(prober) => builder.catalog(prober.clone()),
            None => builder.without_catalog(),
        };

        Ok(builder.build()?)
    }

    /// Run one decoded request through the chain for `kind`.
    pub async fn generate(
        &self,
        kind: ChainKind,
        body: GenerateRequestBody,
        options: &GenerationOptions,
        cancel: &CancellationToken,
    ) -> Result<GenerationResult, ServiceError> {
        let provider = self.provider_for(body.api_key())?;

        let chain = options
            .model_chain
            .clone()
            .unwrap_or_else(|| self.config.chain_for(kind).clone());
        let timeout = options
            .per_attempt_timeout
            .unwrap_or(self.config.per_attempt_timeout);

        let request = body.into_request(chain, timeout)?;
        let orchestrator = self.orchestrator(provider)?;

        Ok(orchestrator.run_with_cancel(&request, cancel).await)
    }

    /// Full route: validate the raw body, generate, render the response.
    pub async fn handle(
        &self,
        kind: ChainKind,
        body: &JsonValue,
        options: &GenerationOptions,
        cancel: &CancellationToken,
    ) -> WireResponse {
        let decoded = match GenerateRequestBody::from_json(body) {
            Ok(decoded) => decoded,
            Err(e) => {
                tracing::warn!(route = %kind, error = %e, "Rejected request body");
                return WireResponse::error(e.status(), e.to_string());
            }
        };

        match self.generate(kind, decoded, options, cancel).await {
            Ok(result) => match kind {
                ChainKind::Image => WireResponse::image_route(&result),
                ChainKind::Text => WireResponse::text_route(&result),
            },
            Err(e) => {
                tracing::warn!(route = %kind, error = %e, "Generation request failed");
                WireResponse::error(e.status(), e.to_string())
            }
        }
    }

    /// Models the credential can call, straight from the provider.
    pub async fn list_models(&self, api_key: Option<&str>) -> Result<Vec<ModelId>, ServiceError> {
        let provider = self.provider_for(api_key)?;
        Ok(provider.list_models().await?)
    }
}

impl std::fmt::Debug for GenerationService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenerationService")
            .field("provider", &self.config.provider.kind)
            .field("registry", &self.registry)
            .finish()
    }
}
