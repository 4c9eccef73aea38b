//! Runtime configuration.
//!
//! Loaded from YAML. Every field has a default, so an empty file (or no file
//! at all) yields a working Gemini setup:
//!
//! ```yaml
//! provider:
//!   kind: gemini
//!   api_key_env: GEMINI_API_KEY
//! chains:
//!   image: [gemini-2.0-flash-exp, gemini-1.5-pro]
//!   text: [gemini-2.0-flash-exp, gemini-1.5-flash]
//! per_attempt_timeout: 60s
//! backoff:
//!   rate_limit: 2s
//!   not_found: 1s
//! unclassified: retry
//! catalog:
//!   enabled: true
//!   ttl: 5m
//!   probe_timeout: 10s
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use infogen_core::{ModelChain, RetrySchedule, UnclassifiedAction};

use crate::catalog::DEFAULT_CATALOG_TTL;
use crate::orchestrator::DEFAULT_PROBE_TIMEOUT;

/// Errors from loading or validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Which route a request came through. Each has its own default chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainKind {
    Image,
    Text,
}

impl fmt::Display for ChainKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChainKind::Image => write!(f, "image"),
            ChainKind::Text => write!(f, "text"),
        }
    }
}

/// Top-level runtime configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimeConfig {
    pub provider: ProviderSettings,

    pub chains: ChainSettings,

    /// Deadline for each individual model attempt
    #[serde(with = "duration_str")]
    pub per_attempt_timeout: Duration,

    pub backoff: BackoffSettings,

    /// What to do with errors matching no known category
    pub unclassified: UnclassifiedAction,

    pub catalog: CatalogSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProviderSettings {
    /// Registered provider type
    pub kind: String,

    /// Override the provider's API endpoint
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    /// Environment variable holding the fallback API key
    pub api_key_env: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ChainSettings {
    pub image: ModelChain,
    pub text: ModelChain,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BackoffSettings {
    #[serde(with = "duration_str")]
    pub rate_limit: Duration,

    #[serde(with = "duration_str")]
    pub not_found: Duration,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CatalogSettings {
    /// Probe the model catalog when a model is reported missing
    pub enabled: bool,

    /// How long a listing is cached
    #[serde(with = "duration_str")]
    pub ttl: Duration,

    /// Upper bound on one catalog lookup
    #[serde(with = "duration_str")]
    pub probe_timeout: Duration,
}

/// Durations as human-readable strings ("60s", "1m 30s").
mod duration_str {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(raw.trim()).map_err(serde::de::Error::custom)
    }
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            kind: "gemini".to_string(),
            base_url: None,
            api_key_env: "GEMINI_API_KEY".to_string(),
        }
    }
}

impl Default for ChainSettings {
    fn default() -> Self {
        Self {
            image: ModelChain::new(["gemini-2.0-flash-exp", "gemini-1.5-pro"]),
            text: ModelChain::new(["gemini-2.0-flash-exp", "gemini-1.5-flash"]),
        }
    }
}

impl Default for BackoffSettings {
    fn default() -> Self {
        let schedule = RetrySchedule::default();
        Self {
            rate_limit: schedule.rate_limit_backoff,
            not_found: schedule.not_found_backoff,
        }
    }
}

impl Default for CatalogSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl: DEFAULT_CATALOG_TTL,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            provider: ProviderSettings::default(),
            chains: ChainSettings::default(),
            per_attempt_timeout: Duration::from_secs(60),
            backoff: BackoffSettings::default(),
            unclassified: UnclassifiedAction::default(),
            catalog: CatalogSettings::default(),
        }
    }
}

impl RuntimeConfig {
    /// Parse and validate a YAML document. Blank input yields the defaults.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let config = if yaml.trim().is_empty() {
            Self::default()
        } else {
            serde_yaml::from_str(yaml)?
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.provider.kind.trim().is_empty() {
            return Err(ConfigError::Invalid("provider.kind must not be empty".into()));
        }
        if self.provider.api_key_env.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "provider.api_key_env must not be empty".into(),
            ));
        }
        if let Some(url) = &self.provider.base_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(ConfigError::Invalid(format!(
                    "provider.base_url must start with http:// or https://, got '{}'",
                    url
                )));
            }
        }
        for kind in [ChainKind::Image, ChainKind::Text] {
            let chain = self.chain_for(kind);
            if chain.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "chains.{} must list at least one model",
                    kind
                )));
            }
            if chain.iter().any(|m| m.as_str().is_empty()) {
                return Err(ConfigError::Invalid(format!(
                    "chains.{} contains an empty model id",
                    kind
                )));
            }
        }
        if self.per_attempt_timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "per_attempt_timeout must be greater than zero".into(),
            ));
        }
        if self.catalog.enabled && self.catalog.probe_timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "catalog.probe_timeout must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    /// Default chain for a route.
    pub fn chain_for(&self, kind: ChainKind) -> &ModelChain {
        match kind {
            ChainKind::Image => &self.chains.image,
            ChainKind::Text => &self.chains.text,
        }
    }

    pub fn retry_schedule(&self) -> RetrySchedule {
        RetrySchedule {
            rate_limit_backoff: self.backoff.rate_limit,
            not_found_backoff: self.backoff.not_found,
            unclassified: self.unclassified,
        }
    }

    /// Provider-specific settings handed to the provider factory.
    pub fn factory_config(&self) -> JsonValue {
        match &self.provider.base_url {
            Some(url) => serde_json::json!({ "base_url": url }),
            None => serde_json::json!({}),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RuntimeConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.provider.kind, "gemini");
        assert_eq!(config.per_attempt_timeout, Duration::from_secs(60));
        assert_eq!(
            config.chain_for(ChainKind::Image).to_string(),
            "[gemini-2.0-flash-exp -> gemini-1.5-pro]"
        );
        assert_eq!(
            config.chain_for(ChainKind::Text).to_string(),
            "[gemini-2.0-flash-exp -> gemini-1.5-flash]"
        );
        assert_eq!(config.retry_schedule(), RetrySchedule::default());
        assert_eq!(config.factory_config(), serde_json::json!({}));
    }

    #[test]
    fn test_blank_yaml_is_default() {
        assert_eq!(RuntimeConfig::from_yaml_str("  \n").unwrap(), RuntimeConfig::default());
    }

    #[test]
    fn test_partial_yaml_keeps_other_defaults() {
        let yaml = r#"
chains:
  image: [models/imagen-3, gemini-1.5-pro]
per_attempt_timeout: 1m 30s
backoff:
  rate_limit: 500ms
unclassified: abort
"#;
        let config = RuntimeConfig::from_yaml_str(yaml).unwrap();

        assert_eq!(config.chains.image.to_string(), "[imagen-3 -> gemini-1.5-pro]");
        assert_eq!(config.chains.text, ChainSettings::default().text);
        assert_eq!(config.per_attempt_timeout, Duration::from_secs(90));

        let schedule = config.retry_schedule();
        assert_eq!(schedule.rate_limit_backoff, Duration::from_millis(500));
        assert_eq!(schedule.not_found_backoff, Duration::from_secs(1));
        assert_eq!(schedule.unclassified, UnclassifiedAction::Abort);
    }

    #[test]
    fn test_yaml_roundtrip_through_humantime() {
        let config = RuntimeConfig::default();
        let yaml = config.to_yaml().unwrap();
        assert!(yaml.contains("per_attempt_timeout: 1m"));
        assert_eq!(RuntimeConfig::from_yaml_str(&yaml).unwrap(), config);
    }

    #[test]
    fn test_validation_failures() {
        let empty_chain = "chains:\n  text: []\n";
        match RuntimeConfig::from_yaml_str(empty_chain) {
            Err(ConfigError::Invalid(msg)) => assert!(msg.contains("chains.text")),
            other => panic!("expected Invalid, got {:?}", other),
        }

        assert!(matches!(
            RuntimeConfig::from_yaml_str("per_attempt_timeout: 0s\n"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            RuntimeConfig::from_yaml_str("provider:\n  base_url: ftp://example.com\n"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            RuntimeConfig::from_yaml_str("per_attempt_timeout: soon\n"),
            Err(ConfigError::YamlError(_))
        ));
        assert!(matches!(
            RuntimeConfig::from_yaml_str("retries: 3\n"),
            Err(ConfigError::YamlError(_))
        ));
    }

    #[test]
    fn test_factory_config_carries_base_url() {
        let config =
            RuntimeConfig::from_yaml_str("provider:\n  base_url: http://localhost:8080\n").unwrap();
        assert_eq!(
            config.factory_config(),
            serde_json::json!({ "base_url": "http://localhost:8080" })
        );
    }
}
