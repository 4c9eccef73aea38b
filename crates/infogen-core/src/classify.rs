//! Response classification.
//!
//! Decides which [`Payload`] a raw provider response carries. Only the first
//! content part of the first candidate is inspected, with a fixed priority:
//! inline image, then vector markup, then plain text. Downstream consumers
//! render images and markup; plain text is only surfaced as a fallback.

use crate::markup;
use crate::response::{RawPart, RawResponse};
use crate::types::Payload;

/// Classify a raw response. `None` means the response is not usable.
///
/// Pure function of its input: classifying the same response twice yields
/// equal payloads.
pub fn classify(response: &RawResponse) -> Option<Payload> {
    let payload = match response.first_part()? {
        RawPart::InlineData { mime_type, data } if !data.is_empty() => Payload::Image {
            media_type: mime_type.clone(),
            bytes: data.clone(),
        },
        RawPart::InlineData { .. } => return None,
        RawPart::Text(text) => classify_text(text)?,
    };

    tracing::debug!(kind = ?payload.kind(), "Classified response payload");
    Some(payload)
}

fn classify_text(text: &str) -> Option<Payload> {
    if let Some(markup) = markup::extract(text) {
        return Some(Payload::VectorMarkup { markup });
    }

    if text.trim().is_empty() {
        None
    } else {
        Some(Payload::PlainText {
            text: text.to_string(),
        })
    }
}
