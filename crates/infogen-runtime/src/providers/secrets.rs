//! Credential handling for generative providers.
//!
//! Every provider keeps its API key in an [`ApiCredential`]:
//!
//! - **No accidental logging**: the key never appears in Debug/Display output
//! - **Memory hygiene**: the key is zeroed on drop via `secrecy`
//! - **Per-request keys**: a caller-supplied key wins, the process-wide
//!   environment key is the fallback
//!
//! ## Usage
//!
//! ```ignore
//! use infogen_runtime::providers::ApiCredential;
//!
//! // Request key if present, GEMINI_API_KEY otherwise
//! let cred = ApiCredential::from_override_or_env(body.api_key(), "GEMINI_API_KEY", "Gemini API key")?;
//!
//! // Expose only at the point of use
//! request.header("x-goog-api-key", cred.expose());
//! ```

use secrecy::{ExposeSecret, SecretString};
use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};

use super::ProviderError;

/// Where a credential was loaded from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialSource {
    /// Supplied with the incoming request
    Request,
    /// Loaded from environment variable
    Environment,
    /// Provided programmatically
    Programmatic,
}

impl fmt::Display for CredentialSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CredentialSource::Request => write!(f, "request"),
            CredentialSource::Environment => write!(f, "environment"),
            CredentialSource::Programmatic => write!(f, "programmatic"),
        }
    }
}

/// A securely-stored API credential.
///
/// Read-only for its whole lifetime; share it by reference.
pub struct ApiCredential {
    value: SecretString,
    source: CredentialSource,
    name: &'static str,
}

impl ApiCredential {
    /// Wrap a raw key. It cannot be logged after this point.
    pub fn new(value: impl Into<String>, source: CredentialSource, name: &'static str) -> Self {
        Self {
            value: SecretString::from(value.into()),
            source,
            name,
        }
    }

    /// Load credential from an environment variable.
    pub fn from_env(env_var: &str, name: &'static str) -> Result<Self, ProviderError> {
        match std::env::var(env_var) {
            Ok(value) if !value.trim().is_empty() => {
                Ok(Self::new(value, CredentialSource::Environment, name))
            }
            _ => Err(ProviderError::NotConfigured(format!(
                "{} is required: pass apiKey or set the '{}' environment variable",
                name, env_var
            ))),
        }
    }

    /// Use the caller's key when given, otherwise fall back to `env_var`.
    ///
    /// An empty or whitespace-only override counts as absent.
    pub fn from_override_or_env(
        override_key: Option<&str>,
        env_var: &str,
        name: &'static str,
    ) -> Result<Self, ProviderError> {
        match override_key.map(str::trim).filter(|k| !k.is_empty()) {
            Some(key) => Ok(Self::new(key, CredentialSource::Request, name)),
            None => Self::from_env(env_var, name),
        }
    }

    /// Expose the credential value for use in an API call.
    ///
    /// Call this only where the key is put on the wire. Never store the result.
    pub fn expose(&self) -> &str {
        self.value.expose_secret()
    }

    pub fn source(&self) -> CredentialSource {
        self.source
    }

    /// Stable hash of the key, used to partition caches per credential.
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.value.expose_secret().hash(&mut hasher);
        hasher.finish()
    }
}

impl fmt::Debug for ApiCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiCredential")
            .field("value", &"[REDACTED]")
            .field("source", &self.source)
            .field("name", &self.name)
            .finish()
    }
}

impl fmt::Display for ApiCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} from {} [REDACTED]", self.name, self.source)
    }
}
