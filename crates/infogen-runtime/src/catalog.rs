//! Model catalog probing for diagnostics.
//!
//! When a model id is rejected as unknown, the orchestrator asks the provider
//! which models the credential can actually reach and attaches that list to
//! the failure. Probing is best effort: a failed lookup yields an empty list
//! and never changes the outcome of a generation.

use moka::future::Cache;
use std::sync::Arc;
use std::time::Duration;

use infogen_core::{ModelChain, ModelId};

use crate::providers::GenerativeProvider;

/// How long a successful listing is reused.
pub const DEFAULT_CATALOG_TTL: Duration = Duration::from_secs(300);

/// Models named in a diagnostic before the list is cut short.
const DESCRIBE_LIMIT: usize = 20;

/// Listings are partitioned per provider and per credential.
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
struct CatalogKey {
    provider: String,
    fingerprint: u64,
}

/// Cached model catalog lookups.
pub struct CatalogProber {
    cache: Cache<CatalogKey, Arc<Vec<ModelId>>>,
}

impl CatalogProber {
    pub fn new(ttl: Duration) -> Self {
        let cache = Cache::builder()
            .max_capacity(256)
            .time_to_live(ttl)
            .build();

        Self { cache }
    }

    /// Models reachable through `provider`. Empty when the lookup fails.
    pub async fn probe(&self, provider: &dyn GenerativeProvider) -> Vec<ModelId> {
        let key = CatalogKey {
            provider: provider.name().to_string(),
            fingerprint: provider.credential_fingerprint(),
        };

        if let Some(models) = self.cache.get(&key).await {
            tracing::debug!(provider = %key.provider, count = models.len(), "Model catalog cache hit");
            return models.as_ref().clone();
        }

        match provider.list_models().await {
            Ok(models) => {
                tracing::debug!(provider = %key.provider, count = models.len(), "Fetched model catalog");
                let models = Arc::new(models);
                self.cache.insert(key, models.clone()).await;
                models.as_ref().clone()
            }
            Err(e) => {
                tracing::warn!(provider = %key.provider, error = %e, "Model catalog probe failed");
                Vec::new()
            }
        }
    }

    /// Drop every cached listing.
    pub fn invalidate_all(&self) {
        self.cache.invalidate_all();
    }
}

impl Default for CatalogProber {
    fn default() -> Self {
        Self::new(DEFAULT_CATALOG_TTL)
    }
}

impl std::fmt::Debug for CatalogProber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CatalogProber")
            .field("entries", &self.cache.entry_count())
            .finish()
    }
}

/// Render the catalog annotation appended to a failure diagnostic.
pub fn describe(chain: &ModelChain, known: &[ModelId]) -> String {
    if known.is_empty() {
        return "model catalog unavailable".to_string();
    }

    let shown: Vec<&str> = known.iter().take(DESCRIBE_LIMIT).map(ModelId::as_str).collect();
    let mut out = format!("available models: {}", shown.join(", "));
    if known.len() > DESCRIBE_LIMIT {
        out.push_str(&format!(" (+{} more)", known.len() - DESCRIBE_LIMIT));
    }

    let missing: Vec<&str> = chain
        .iter()
        .filter(|model| !known.contains(model))
        .map(ModelId::as_str)
        .collect();
    if !missing.is_empty() {
        out.push_str(&format!("; not in catalog: {}", missing.join(", ")));
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::ProviderError;
    use crate::testing::ScriptedProvider;

    #[tokio::test]
    async fn test_probe_is_cached_per_credential() {
        let prober = CatalogProber::default();
        let provider = ScriptedProvider::new().with_catalog(&["gemini-1.5-pro", "gemini-1.5-flash"]);

        let first = prober.probe(&provider).await;
        let second = prober.probe(&provider).await;
        assert_eq!(first, second);
        assert_eq!(first.len(), 2);
        assert_eq!(provider.catalog_calls(), 1);

        let other_key = ScriptedProvider::new()
            .with_catalog(&["gemini-1.5-pro"])
            .with_fingerprint(99);
        assert_eq!(prober.probe(&other_key).await.len(), 1);
        assert_eq!(other_key.catalog_calls(), 1);
    }

    #[tokio::test]
    async fn test_probe_failure_is_empty_and_not_cached() {
        let prober = CatalogProber::default();
        let provider = ScriptedProvider::new()
            .with_catalog_error(ProviderError::HttpError("connection refused".into()));

        assert!(prober.probe(&provider).await.is_empty());
        assert!(prober.probe(&provider).await.is_empty());
        assert_eq!(provider.catalog_calls(), 2);
    }

    #[tokio::test]
    async fn test_invalidate_forces_refetch() {
        let prober = CatalogProber::default();
        let provider = ScriptedProvider::new().with_catalog(&["m1"]);

        prober.probe(&provider).await;
        prober.invalidate_all();
        prober.probe(&provider).await;
        assert_eq!(provider.catalog_calls(), 2);
    }

    #[test]
    fn test_describe_marks_missing_models() {
        let chain = ModelChain::new(["nano-banana", "gemini-1.5-pro"]);
        let known = vec![ModelId::new("gemini-1.5-pro"), ModelId::new("gemini-1.5-flash")];

        assert_eq!(
            describe(&chain, &known),
            "available models: gemini-1.5-pro, gemini-1.5-flash; not in catalog: nano-banana"
        );
    }

    #[test]
    fn test_describe_empty_and_long_catalogs() {
        let chain = ModelChain::new(["m1"]);
        assert_eq!(describe(&chain, &[]), "model catalog unavailable");

        let known: Vec<ModelId> = (0..25).map(|i| ModelId::new(format!("m{}", i))).collect();
        let text = describe(&chain, &known);
        assert!(text.ends_with("(+5 more)"));
        assert!(!text.contains("not in catalog"));
    }
}
