//! Request, payload and result types shared by every infogen crate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::errors::{ErrorCategory, GenerationError};

/// Prefix the model catalog puts in front of every identifier.
const CATALOG_PREFIX: &str = "models/";

/// Errors raised while assembling a [`GenerationRequest`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RequestError {
    #[error("prompt must not be empty")]
    EmptyPrompt,

    #[error("model chain must contain at least one model")]
    EmptyModelChain,

    #[error("per-attempt timeout must be greater than zero")]
    ZeroTimeout,

    #[error("unsupported aspect ratio: {0} (expected 1:1, 16:9, 4:3, 3:4 or 9:16)")]
    InvalidAspectRatio(String),
}

/// Opaque identifier of a backend model.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct ModelId(String);

impl ModelId {
    /// Create a model id. A leading `models/` catalog prefix is dropped.
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        let trimmed = id.trim();
        let bare = trimmed.strip_prefix(CATALOG_PREFIX).unwrap_or(trimmed);
        Self(bare.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for ModelId {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<&str> for ModelId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<ModelId> for String {
    fn from(value: ModelId) -> Self {
        value.0
    }
}

/// Ordered list of models to try, most preferred first.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModelChain(Vec<ModelId>);

impl ModelChain {
    pub fn new<I, M>(models: I) -> Self
    where
        I: IntoIterator<Item = M>,
        M: Into<ModelId>,
    {
        Self(models.into_iter().map(Into::into).collect())
    }

    /// Append a model at the lowest priority.
    pub fn then(mut self, model: impl Into<ModelId>) -> Self {
        self.0.push(model.into());
        self
    }

    pub fn models(&self) -> &[ModelId] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, model: &ModelId) -> bool {
        self.0.contains(model)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ModelId> {
        self.0.iter()
    }
}

impl<M: Into<ModelId>> FromIterator<M> for ModelChain {
    fn from_iter<T: IntoIterator<Item = M>>(iter: T) -> Self {
        Self::new(iter)
    }
}

impl<'a> IntoIterator for &'a ModelChain {
    type Item = &'a ModelId;
    type IntoIter = std::slice::Iter<'a, ModelId>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl fmt::Display for ModelChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.0.iter().map(ModelId::as_str).collect();
        write!(f, "[{}]", names.join(" -> "))
    }
}

/// Output aspect ratio requested from the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum AspectRatio {
    #[serde(rename = "1:1")]
    Square,

    #[default]
    #[serde(rename = "16:9")]
    Wide,

    #[serde(rename = "4:3")]
    Standard,

    #[serde(rename = "3:4")]
    Portrait,

    #[serde(rename = "9:16")]
    Tall,
}

impl AspectRatio {
    pub const ALL: [AspectRatio; 5] = [
        AspectRatio::Square,
        AspectRatio::Wide,
        AspectRatio::Standard,
        AspectRatio::Portrait,
        AspectRatio::Tall,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Square => "1:1",
            Self::Wide => "16:9",
            Self::Standard => "4:3",
            Self::Portrait => "3:4",
            Self::Tall => "9:16",
        }
    }
}

impl fmt::Display for AspectRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AspectRatio {
    type Err = RequestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Self::ALL
            .into_iter()
            .find(|ratio| ratio.as_str() == wanted)
            .ok_or_else(|| RequestError::InvalidAspectRatio(s.to_string()))
    }
}

/// A reference image sent alongside the prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceAsset {
    pub media_type: String,
    pub bytes: Vec<u8>,
}

impl ReferenceAsset {
    pub fn new(media_type: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            media_type: media_type.into(),
            bytes: bytes.into(),
        }
    }
}

/// One generation call. Immutable once built.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    prompt: String,
    reference_assets: Vec<ReferenceAsset>,
    aspect_ratio: AspectRatio,
    model_chain: ModelChain,
    per_attempt_timeout: Duration,
}

impl GenerationRequest {
    pub fn builder(prompt: impl Into<String>) -> GenerationRequestBuilder {
        GenerationRequestBuilder::new(prompt)
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn reference_assets(&self) -> &[ReferenceAsset] {
        &self.reference_assets
    }

    pub fn aspect_ratio(&self) -> AspectRatio {
        self.aspect_ratio
    }

    pub fn model_chain(&self) -> &ModelChain {
        &self.model_chain
    }

    pub fn per_attempt_timeout(&self) -> Duration {
        self.per_attempt_timeout
    }
}

/// Builder for [`GenerationRequest`].
#[derive(Debug, Clone)]
pub struct GenerationRequestBuilder {
    prompt: String,
    reference_assets: Vec<ReferenceAsset>,
    aspect_ratio: AspectRatio,
    model_chain: ModelChain,
    per_attempt_timeout: Duration,
}

impl GenerationRequestBuilder {
    /// Default per-attempt deadline.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            reference_assets: Vec::new(),
            aspect_ratio: AspectRatio::default(),
            model_chain: ModelChain::default(),
            per_attempt_timeout: Self::DEFAULT_TIMEOUT,
        }
    }

    pub fn reference_asset(mut self, asset: ReferenceAsset) -> Self {
        self.reference_assets.push(asset);
        self
    }

    pub fn reference_assets(mut self, assets: impl IntoIterator<Item = ReferenceAsset>) -> Self {
        self.reference_assets.extend(assets);
        self
    }

    pub fn aspect_ratio(mut self, ratio: AspectRatio) -> Self {
        self.aspect_ratio = ratio;
        self
    }

    /// Replace the model chain entirely.
    pub fn model_chain(mut self, chain: ModelChain) -> Self {
        self.model_chain = chain;
        self
    }

    pub fn per_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.per_attempt_timeout = timeout;
        self
    }

    pub fn build(self) -> Result<GenerationRequest, RequestError> {
        if self.prompt.trim().is_empty() {
            return Err(RequestError::EmptyPrompt);
        }
        if self.model_chain.is_empty() {
            return Err(RequestError::EmptyModelChain);
        }
        if self.per_attempt_timeout.is_zero() {
            return Err(RequestError::ZeroTimeout);
        }

        Ok(GenerationRequest {
            prompt: self.prompt,
            reference_assets: self.reference_assets,
            aspect_ratio: self.aspect_ratio,
            model_chain: self.model_chain,
            per_attempt_timeout: self.per_attempt_timeout,
        })
    }
}

/// Classified shape of a successful response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Image { media_type: String, bytes: Vec<u8> },
    VectorMarkup { markup: String },
    PlainText { text: String },
}

impl Payload {
    pub fn kind(&self) -> ResultKind {
        match self {
            Self::Image { .. } => ResultKind::Image,
            Self::VectorMarkup { .. } => ResultKind::VectorMarkup,
            Self::PlainText { .. } => ResultKind::PlainText,
        }
    }
}

/// Kind of a [`GenerationResult`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultKind {
    Image,
    VectorMarkup,
    PlainText,
    Failure,
}

/// Record of one attempt against one model.
#[derive(Debug, Clone, PartialEq)]
pub struct AttemptOutcome {
    model_id: ModelId,
    payload: Option<Payload>,
    raw_error: Option<String>,
    category: Option<ErrorCategory>,
    started_at: DateTime<Utc>,
    elapsed: Duration,
}

impl AttemptOutcome {
    /// The call returned a usable payload.
    pub fn succeeded(
        model_id: ModelId,
        payload: Payload,
        started_at: DateTime<Utc>,
        elapsed: Duration,
    ) -> Self {
        Self {
            model_id,
            payload: Some(payload),
            raw_error: None,
            category: None,
            started_at,
            elapsed,
        }
    }

    /// The call returned, but nothing in it was usable.
    pub fn no_payload(model_id: ModelId, started_at: DateTime<Utc>, elapsed: Duration) -> Self {
        Self {
            model_id,
            payload: None,
            raw_error: Some(crate::errors::NO_USABLE_PAYLOAD.to_string()),
            category: None,
            started_at,
            elapsed,
        }
    }

    /// The call failed with a classified error.
    pub fn failed(
        model_id: ModelId,
        raw_error: impl Into<String>,
        category: ErrorCategory,
        started_at: DateTime<Utc>,
        elapsed: Duration,
    ) -> Self {
        Self {
            model_id,
            payload: None,
            raw_error: Some(raw_error.into()),
            category: Some(category),
            started_at,
            elapsed,
        }
    }

    pub fn model_id(&self) -> &ModelId {
        &self.model_id
    }

    pub fn succeeded_with_payload(&self) -> bool {
        self.payload.is_some()
    }

    pub fn payload(&self) -> Option<&Payload> {
        self.payload.as_ref()
    }

    pub fn raw_error(&self) -> Option<&str> {
        self.raw_error.as_deref()
    }

    /// Error category, absent for successes and soft no-payload failures.
    pub fn category(&self) -> Option<ErrorCategory> {
        self.category
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }
}

/// Terminal output of one orchestration call.
///
/// `used_model` only exists on `Success`, so a failure can never claim a model.
#[derive(Debug, Clone, PartialEq)]
pub enum GenerationResult {
    Success {
        payload: Payload,
        used_model: ModelId,
        attempts: Vec<AttemptOutcome>,
    },
    Failure {
        error: GenerationError,
        diagnostic: String,
        attempts: Vec<AttemptOutcome>,
    },
}

impl GenerationResult {
    pub fn kind(&self) -> ResultKind {
        match self {
            Self::Success { payload, .. } => payload.kind(),
            Self::Failure { .. } => ResultKind::Failure,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn payload(&self) -> Option<&Payload> {
        match self {
            Self::Success { payload, .. } => Some(payload),
            Self::Failure { .. } => None,
        }
    }

    pub fn used_model(&self) -> Option<&ModelId> {
        match self {
            Self::Success { used_model, .. } => Some(used_model),
            Self::Failure { .. } => None,
        }
    }

    pub fn diagnostic(&self) -> Option<&str> {
        match self {
            Self::Success { .. } => None,
            Self::Failure { diagnostic, .. } => Some(diagnostic),
        }
    }

    pub fn error(&self) -> Option<&GenerationError> {
        match self {
            Self::Success { .. } => None,
            Self::Failure { error, .. } => Some(error),
        }
    }

    /// Every attempt made, in chain order.
    pub fn attempts(&self) -> &[AttemptOutcome] {
        match self {
            Self::Success { attempts, .. } | Self::Failure { attempts, .. } => attempts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_id_strips_catalog_prefix() {
        assert_eq!(ModelId::new("models/gemini-1.5-pro").as_str(), "gemini-1.5-pro");
        assert_eq!(ModelId::new(" gemini-1.5-pro ").as_str(), "gemini-1.5-pro");
        assert_eq!(ModelId::new("gemini-1.5-pro").as_str(), "gemini-1.5-pro");
    }

    #[test]
    fn test_model_id_deserializes_through_new() {
        let id: ModelId = serde_json::from_str("\"models/gemini-2.0-flash-exp\"").unwrap();
        assert_eq!(id.as_str(), "gemini-2.0-flash-exp");
    }

    #[test]
    fn test_chain_preserves_order() {
        let chain = ModelChain::new(["b", "a"]).then("c");
        let names: Vec<&str> = chain.iter().map(ModelId::as_str).collect();
        assert_eq!(names, vec!["b", "a", "c"]);
        assert_eq!(chain.to_string(), "[b -> a -> c]");
    }

    #[test]
    fn test_aspect_ratio_parse() {
        assert_eq!("9:16".parse::<AspectRatio>().unwrap(), AspectRatio::Tall);
        assert_eq!(AspectRatio::default(), AspectRatio::Wide);
        assert!(matches!(
            "2:1".parse::<AspectRatio>(),
            Err(RequestError::InvalidAspectRatio(_))
        ));

        let json = serde_json::to_string(&AspectRatio::Standard).unwrap();
        assert_eq!(json, "\"4:3\"");
    }

    #[test]
    fn test_builder_validation() {
        let chain = ModelChain::new(["m1"]);

        assert_eq!(
            GenerationRequest::builder("  ").model_chain(chain.clone()).build().unwrap_err(),
            RequestError::EmptyPrompt
        );
        assert_eq!(
            GenerationRequest::builder("draw").build().unwrap_err(),
            RequestError::EmptyModelChain
        );
        assert_eq!(
            GenerationRequest::builder("draw")
                .model_chain(chain.clone())
                .per_attempt_timeout(Duration::ZERO)
                .build()
                .unwrap_err(),
            RequestError::ZeroTimeout
        );

        let request = GenerationRequest::builder("draw")
            .model_chain(chain)
            .reference_asset(ReferenceAsset::new("image/png", vec![1, 2, 3]))
            .aspect_ratio(AspectRatio::Square)
            .build()
            .unwrap();
        assert_eq!(request.prompt(), "draw");
        assert_eq!(request.reference_assets().len(), 1);
        assert_eq!(request.aspect_ratio(), AspectRatio::Square);
        assert_eq!(request.per_attempt_timeout(), GenerationRequestBuilder::DEFAULT_TIMEOUT);
    }

    #[test]
    fn test_result_accessors() {
        let success = GenerationResult::Success {
            payload: Payload::PlainText {
                text: "hello".to_string(),
            },
            used_model: ModelId::new("m1"),
            attempts: vec![],
        };
        assert_eq!(success.kind(), ResultKind::PlainText);
        assert_eq!(success.used_model().map(ModelId::as_str), Some("m1"));
        assert!(success.diagnostic().is_none());

        let failure = GenerationResult::Failure {
            error: GenerationError::Cancelled,
            diagnostic: "generation cancelled".to_string(),
            attempts: vec![],
        };
        assert_eq!(failure.kind(), ResultKind::Failure);
        assert!(failure.used_model().is_none());
        assert!(failure.payload().is_none());
    }

    #[test]
    fn test_no_payload_outcome_records_synthetic_error() {
        let outcome = AttemptOutcome::no_payload(ModelId::new("m1"), Utc::now(), Duration::ZERO);
        assert!(!outcome.succeeded_with_payload());
        assert_eq!(outcome.raw_error(), Some("model returned no usable payload"));
        assert!(outcome.category().is_none());
    }
}
