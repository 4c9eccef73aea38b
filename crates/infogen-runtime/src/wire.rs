//! JSON wire format of the generation routes.
//!
//! Request bodies are checked against `schema/generate-request.schema.json`
//! before they are decoded. Responses are built from a [`GenerationResult`]
//! together with the HTTP status a front end should use.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::sync::OnceLock;
use std::time::Duration;
use thiserror::Error;

use infogen_core::{
    AspectRatio, GenerationError, GenerationRequest, GenerationResult, ModelChain, Payload,
    ReferenceAsset, RequestError,
};

/// Embedded request schema (loaded at compile time).
const REQUEST_SCHEMA_JSON: &str = include_str!("../../../schema/generate-request.schema.json");

/// Compiled JSON Schema validator (initialized once, reused).
static COMPILED_SCHEMA: OnceLock<Result<jsonschema::Validator, String>> = OnceLock::new();

/// Status for a request cancelled by its client.
pub const STATUS_CLIENT_CLOSED: u16 = 499;

/// Errors from decoding a request body.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum WireError {
    #[error("invalid request body: {}", .0.join("; "))]
    Schema(Vec<String>),

    #[error("invalid request body: {0}")]
    Decode(String),

    #[error("invalid base64 in {field}: {message}")]
    Base64 { field: String, message: String },

    #[error(transparent)]
    Request(#[from] RequestError),

    #[error("request schema unavailable: {0}")]
    SchemaUnavailable(String),
}

impl WireError {
    /// Status a front end should answer with.
    pub fn status(&self) -> u16 {
        match self {
            Self::SchemaUnavailable(_) => 500,
            _ => 400,
        }
    }
}

fn get_validator() -> Result<&'static jsonschema::Validator, WireError> {
    let result = COMPILED_SCHEMA.get_or_init(|| {
        let schema_value: JsonValue = match serde_json::from_str(REQUEST_SCHEMA_JSON) {
            Ok(v) => v,
            Err(e) => return Err(format!("Invalid schema JSON: {}", e)),
        };

        jsonschema::options()
            .build(&schema_value)
            .map_err(|e| format!("Failed to compile schema: {}", e))
    });

    result
        .as_ref()
        .map_err(|e| WireError::SchemaUnavailable(e.clone()))
}

/// Validate a raw body against the request schema.
pub fn validate_request_schema(body: &JsonValue) -> Result<(), WireError> {
    let validator = get_validator()?;

    let errors: Vec<String> = validator
        .iter_errors(body)
        .map(|e| format!("{} at {}", e, e.instance_path))
        .collect();

    if errors.is_empty() {
        Ok(())
    } else {
        Err(WireError::Schema(errors))
    }
}

/// A reference image as sent by clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefImage {
    /// Base64 encoded bytes
    pub data: String,
    pub mime_type: String,
}

/// Body of the image and text routes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateRequestBody {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    pub prompt: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ref_images: Option<Vec<RefImage>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aspect_ratio: Option<AspectRatio>,

    /// Legacy text-route image, only used together with `mime_type`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

impl GenerateRequestBody {
    /// Validate against the schema, then decode.
    pub fn from_json(body: &JsonValue) -> Result<Self, WireError> {
        validate_request_schema(body)?;
        serde_json::from_value(body.clone()).map_err(|e| WireError::Decode(e.to_string()))
    }

    pub fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref()
    }

    /// Decoded reference images. Entries with no data are skipped.
    pub fn reference_assets(&self) -> Result<Vec<ReferenceAsset>, WireError> {
        let mut assets = Vec::new();

        for (index, image) in self.ref_images.iter().flatten().enumerate() {
            if let Some(bytes) = decode_base64(&image.data, || format!("refImages[{}]", index))? {
                assets.push(ReferenceAsset::new(image.mime_type.as_str(), bytes));
            }
        }

        if let Some(bytes) = self
            .image
            .as_deref()
            .map(|data| decode_base64(data, || "image".to_string()))
            .transpose()?
            .flatten()
        {
            let mime_type = self
                .mime_type
                .as_deref()
                .map(str::trim)
                .filter(|m| !m.is_empty())
                .ok_or_else(|| WireError::Decode("image requires mimeType".into()))?;
            assets.push(ReferenceAsset::new(mime_type, bytes));
        }

        Ok(assets)
    }

    /// Build a generation request with the given chain and deadline.
    pub fn into_request(
        self,
        chain: ModelChain,
        per_attempt_timeout: Duration,
    ) -> Result<GenerationRequest, WireError> {
        let assets = self.reference_assets()?;

        Ok(GenerationRequest::builder(self.prompt)
            .reference_assets(assets)
            .aspect_ratio(self.aspect_ratio.unwrap_or_default())
            .model_chain(chain)
            .per_attempt_timeout(per_attempt_timeout)
            .build()?)
    }
}

fn decode_base64(
    data: &str,
    field: impl FnOnce() -> String,
) -> Result<Option<Vec<u8>>, WireError> {
    let trimmed = data.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    BASE64
        .decode(trimmed)
        .map(Some)
        .map_err(|e| WireError::Base64 {
            field: field(),
            message: e.to_string(),
        })
}

/// Successful body of the image route.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum GenerateResponseBody {
    #[serde(rename_all = "camelCase")]
    Image {
        mime_type: String,
        /// Base64 encoded bytes
        data: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        used_model: Option<String>,
    },

    #[serde(rename_all = "camelCase")]
    Svg {
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        used_model: Option<String>,
    },

    Text { content: String },
}

/// Successful body of the text route.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextResponseBody {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub used_model: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

/// Any response body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ResponseBody {
    Generate(GenerateResponseBody),
    Text(TextResponseBody),
    Error(ErrorBody),
}

/// Response body plus HTTP status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireResponse {
    pub status: u16,
    pub body: ResponseBody,
}

impl WireResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn error(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            body: ResponseBody::Error(ErrorBody {
                error: message.into(),
            }),
        }
    }

    /// Response of the image route.
    pub fn image_route(result: &GenerationResult) -> Self {
        match result {
            GenerationResult::Success {
                payload,
                used_model,
                ..
            } => {
                let used_model = Some(used_model.to_string());
                let body = match payload {
                    Payload::Image { media_type, bytes } => GenerateResponseBody::Image {
                        mime_type: media_type.clone(),
                        data: BASE64.encode(bytes),
                        used_model,
                    },
                    Payload::VectorMarkup { markup } => GenerateResponseBody::Svg {
                        content: markup.clone(),
                        used_model,
                    },
                    Payload::PlainText { text } => GenerateResponseBody::Text {
                        content: text.clone(),
                    },
                };
                Self {
                    status: 200,
                    body: ResponseBody::Generate(body),
                }
            }
            GenerationResult::Failure {
                error, diagnostic, ..
            } => Self::error(failure_status(error), diagnostic.as_str()),
        }
    }

    /// Response of the text route. Markup is returned as text; an image is
    /// not a usable answer here.
    pub fn text_route(result: &GenerationResult) -> Self {
        match result {
            GenerationResult::Success {
                payload,
                used_model,
                ..
            } => {
                let text = match payload {
                    Payload::PlainText { text } => text.clone(),
                    Payload::VectorMarkup { markup } => markup.clone(),
                    Payload::Image { .. } => {
                        return Self::error(
                            502,
                            format!("{} returned an image where text was expected", used_model),
                        )
                    }
                };
                Self {
                    status: 200,
                    body: ResponseBody::Text(TextResponseBody {
                        text,
                        used_model: Some(used_model.to_string()),
                    }),
                }
            }
            GenerationResult::Failure {
                error, diagnostic, ..
            } => Self::error(failure_status(error), diagnostic.as_str()),
        }
    }
}

/// Status for a terminal generation failure.
pub fn failure_status(error: &GenerationError) -> u16 {
    match error {
        GenerationError::InvalidCredentials { .. } => 401,
        GenerationError::ChainExhausted { .. } => 502,
        GenerationError::Cancelled => STATUS_CLIENT_CLOSED,
        _ => 500,
    }
}
