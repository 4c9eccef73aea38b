//! Google Gemini provider implementation.
//!
//! Talks to the Generative Language REST API:
//! - `POST {base}/models/{model}:generateContent`
//! - `GET {base}/models?pageSize=100`
//!
//! ## Security
//!
//! The API key travels in the `x-goog-api-key` header, never in the URL, so
//! it cannot leak through request logging. See [`secrets`](super::secrets).

use super::{
    factory::ProviderFactory,
    secrets::{ApiCredential, CredentialSource},
    GenerativeProvider, ProviderError,
};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use infogen_core::{GenerationRequest, ModelId, RawCandidate, RawPart, RawResponse};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use std::time::Duration;

/// Environment variable name for the process-wide Gemini API key.
pub const GEMINI_API_KEY_ENV: &str = "GEMINI_API_KEY";

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

const GENERATE_METHOD: &str = "generateContent";

/// Gemini provider bound to one credential.
pub struct GeminiProvider {
    credential: ApiCredential,
    base_url: String,
    client: reqwest::Client,
}

impl std::fmt::Debug for GeminiProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiProvider")
            .field("credential", &self.credential)
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl GeminiProvider {
    /// Create a provider from an already-resolved credential.
    pub fn new(credential: ApiCredential) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| ProviderError::HttpError(e.to_string()))?;

        Ok(Self {
            credential,
            base_url: DEFAULT_BASE_URL.to_string(),
            client,
        })
    }

    /// Create from a raw key.
    pub fn with_key(api_key: impl Into<String>) -> Result<Self, ProviderError> {
        Self::new(ApiCredential::new(
            api_key,
            CredentialSource::Programmatic,
            "Gemini API key",
        ))
    }

    /// Create from `GEMINI_API_KEY`.
    pub fn from_env() -> Result<Self, ProviderError> {
        Self::new(ApiCredential::from_env(GEMINI_API_KEY_ENV, "Gemini API key")?)
    }

    /// Set custom base URL. A trailing slash is ignored.
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn read_error(response: reqwest::Response) -> ProviderError {
        let status = response.status().as_u16();
        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_secs);

        let body = response.text().await.unwrap_or_default();
        error_from_status(status, retry_after, &body)
    }
}

/// `generateContent` request body.
#[derive(Debug, Serialize)]
struct GenerateContentRequest {
    contents: Vec<Content>,
}

#[derive(Debug, Serialize)]
struct Content {
    role: &'static str,
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum Part {
    Text {
        text: String,
    },
    Inline {
        #[serde(rename = "inlineData")]
        inline_data: InlineData,
    },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

/// `generateContent` response body.
#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<CandidateResponse>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CandidateResponse {
    content: Option<ContentResponse>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ContentResponse {
    #[serde(default)]
    parts: Vec<PartResponse>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PartResponse {
    text: Option<String>,
    inline_data: Option<InlineDataResponse>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineDataResponse {
    mime_type: String,
    #[serde(default)]
    data: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListModelsResponse {
    #[serde(default)]
    models: Vec<ModelEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ModelEntry {
    name: String,
    #[serde(default)]
    supported_generation_methods: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiError {
    error: GeminiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorDetail {
    #[serde(default)]
    message: String,
    status: Option<String>,
}

/// Prompt first, then reference images, then the aspect ratio instruction.
fn build_request_body(request: &GenerationRequest) -> GenerateContentRequest {
    let mut parts = Vec::with_capacity(request.reference_assets().len() + 2);
    parts.push(Part::Text {
        text: request.prompt().to_string(),
    });

    for asset in request.reference_assets() {
        parts.push(Part::Inline {
            inline_data: InlineData {
                mime_type: asset.media_type.clone(),
                data: BASE64.encode(&asset.bytes),
            },
        });
    }

    parts.push(Part::Text {
        text: format!("Aspect ratio: {}", request.aspect_ratio()),
    });

    GenerateContentRequest {
        contents: vec![Content {
            role: "user",
            parts,
        }],
    }
}

/// Translate the wire response. Parts carrying neither text nor inline data
/// become empty text so the first part keeps its position.
fn parse_generate_response(body: GenerateContentResponse) -> Result<RawResponse, ProviderError> {
    let mut candidates = Vec::with_capacity(body.candidates.len());

    for candidate in body.candidates {
        let mut parts = Vec::new();
        for part in candidate.content.map(|c| c.parts).unwrap_or_default() {
            let raw = match (part.inline_data, part.text) {
                (Some(inline), _) => RawPart::InlineData {
                    mime_type: inline.mime_type,
                    data: BASE64
                        .decode(inline.data.as_bytes())
                        .map_err(|e| ProviderError::ParseError(format!("inline data: {}", e)))?,
                },
                (None, Some(text)) => RawPart::Text(text),
                (None, None) => RawPart::Text(String::new()),
            };
            parts.push(raw);
        }
        candidates.push(RawCandidate {
            parts,
            finish_reason: candidate.finish_reason,
        });
    }

    Ok(RawResponse { candidates })
}

/// Map a non-success status and its body onto a provider error.
fn error_from_status(status: u16, retry_after: Option<Duration>, body: &str) -> ProviderError {
    let message = match serde_json::from_str::<GeminiError>(body) {
        Ok(parsed) => match parsed.error.status {
            Some(code) => format!("{} [{}]", parsed.error.message, code),
            None => parsed.error.message,
        },
        Err(_) if body.trim().is_empty() => format!("HTTP {}", status),
        Err(_) => body.trim().to_string(),
    };

    match status {
        429 => ProviderError::RateLimited { retry_after },
        401 => ProviderError::AuthError(message),
        _ => ProviderError::ApiError { status, message },
    }
}

fn supports_generation(entry: &ModelEntry) -> bool {
    entry
        .supported_generation_methods
        .iter()
        .any(|m| m == GENERATE_METHOD)
}

#[async_trait]
impl GenerativeProvider for GeminiProvider {
    async fn generate(
        &self,
        model: &ModelId,
        request: &GenerationRequest,
    ) -> Result<RawResponse, ProviderError> {
        let timeout = request.per_attempt_timeout();
        let body = build_request_body(request);

        tracing::debug!(
            model = %model,
            parts = body.contents.first().map_or(0, |c| c.parts.len()),
            "Sending generateContent request"
        );

        // SECURITY: Only expose the credential here, at the point of use
        let response = self
            .client
            .post(format!(
                "{}/models/{}:{}",
                self.base_url, model, GENERATE_METHOD
            ))
            .header("x-goog-api-key", self.credential.expose())
            .timeout(timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Timeout(timeout)
                } else {
                    ProviderError::HttpError(e.to_string())
                }
            })?;

        if !response.status().is_success() {
            return Err(Self::read_error(response).await);
        }

        let body: GenerateContentResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::ParseError(e.to_string()))?;

        parse_generate_response(body)
    }

    async fn list_models(&self) -> Result<Vec<ModelId>, ProviderError> {
        let response = self
            .client
            .get(format!("{}/models", self.base_url))
            .query(&[("pageSize", "100")])
            .header("x-goog-api-key", self.credential.expose())
            .send()
            .await
            .map_err(|e| ProviderError::HttpError(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Self::read_error(response).await);
        }

        let body: ListModelsResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::ParseError(e.to_string()))?;

        Ok(body
            .models
            .iter()
            .filter(|entry| supports_generation(entry))
            .map(|entry| ModelId::new(entry.name.as_str()))
            .collect())
    }

    fn name(&self) -> &str {
        "gemini"
    }

    fn credential_fingerprint(&self) -> u64 {
        self.credential.fingerprint()
    }
}

/// Factory for creating Gemini providers from configuration.
///
/// ## Configuration Format
/// ```json
/// {
///   "base_url": "https://..."   // Optional, custom API endpoint
/// }
/// ```
pub struct GeminiProviderFactory;

impl ProviderFactory for GeminiProviderFactory {
    fn provider_type(&self) -> &'static str {
        "gemini"
    }

    fn create(
        &self,
        config: &JsonValue,
        credential: ApiCredential,
    ) -> Result<Arc<dyn GenerativeProvider>, ProviderError> {
        self.validate_config(config)?;

        let mut provider = GeminiProvider::new(credential)?;
        if let Some(url) = config["base_url"].as_str() {
            provider = provider.with_base_url(url);
        }
        Ok(Arc::new(provider))
    }

    fn validate_config(&self, config: &JsonValue) -> Result<(), ProviderError> {
        if let Some(url) = config["base_url"].as_str() {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(ProviderError::NotConfigured(
                    "base_url must start with http:// or https://".to_string(),
                ));
            }
        }
        Ok(())
    }
}
