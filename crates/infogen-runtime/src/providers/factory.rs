//! Provider factory pattern for dynamic backend registration.
//!
//! Providers register factories that build instances from configuration
//! plus a credential. The credential is resolved per request (a caller may
//! bring their own key), so it is passed separately from the static config.
//!
//! ## Usage
//!
//! ```ignore
//! let mut registry = ProviderRegistry::new();
//! registry.register(Arc::new(GeminiProviderFactory));
//!
//! let provider = registry.create("gemini", &config, credential)?;
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value as JsonValue;

use super::{ApiCredential, GenerativeProvider, ProviderError};

/// Factory for creating generative providers from configuration.
///
/// Each factory is responsible for:
/// 1. Validating its configuration format
/// 2. Creating provider instances
/// 3. Providing a unique type identifier
pub trait ProviderFactory: Send + Sync {
    /// Unique identifier for this provider type, e.g. "gemini".
    fn provider_type(&self) -> &'static str;

    /// Create a provider instance bound to `credential`.
    fn create(
        &self,
        config: &JsonValue,
        credential: ApiCredential,
    ) -> Result<Arc<dyn GenerativeProvider>, ProviderError>;

    /// Validate configuration without creating a provider.
    ///
    /// Use this for fast config validation during startup.
    fn validate_config(&self, config: &JsonValue) -> Result<(), ProviderError>;
}

/// Registry of available provider factories, keyed by type name.
#[derive(Default)]
pub struct ProviderRegistry {
    factories: BTreeMap<String, Arc<dyn ProviderFactory>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider factory.
    ///
    /// If a factory with the same type already exists, it will be replaced.
    pub fn register(&mut self, factory: Arc<dyn ProviderFactory>) {
        self.factories
            .insert(factory.provider_type().to_string(), factory);
    }

    /// Create a provider from type name, configuration and credential.
    pub fn create(
        &self,
        provider_type: &str,
        config: &JsonValue,
        credential: ApiCredential,
    ) -> Result<Arc<dyn GenerativeProvider>, ProviderError> {
        self.factories
            .get(provider_type)
            .ok_or_else(|| {
                ProviderError::NotConfigured(format!(
                    "Unknown provider type: '{}'. Available: {:?}",
                    provider_type,
                    self.available_types()
                ))
            })?
            .create(config, credential)
    }

    /// Validate configuration for a provider type.
    pub fn validate(&self, provider_type: &str, config: &JsonValue) -> Result<(), ProviderError> {
        self.factories
            .get(provider_type)
            .ok_or_else(|| {
                ProviderError::NotConfigured(format!("Unknown provider type: '{}'", provider_type))
            })?
            .validate_config(config)
    }

    pub fn available_types(&self) -> Vec<&str> {
        self.factories.keys().map(|s| s.as_str()).collect()
    }

    /// Create a registry with all built-in providers registered.
    #[cfg(feature = "gemini")]
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(super::GeminiProviderFactory));
        registry
    }

    /// Create a registry with all built-in providers registered.
    #[cfg(not(feature = "gemini"))]
    pub fn with_defaults() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.available_types())
            .finish()
    }
}
