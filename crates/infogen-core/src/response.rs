//! Provider-neutral view of a raw generation response.
//!
//! Providers translate their wire format into these types; the classifier
//! never sees provider JSON.

/// One content part of a candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawPart {
    /// Binary asset returned inline (already decoded).
    InlineData { mime_type: String, data: Vec<u8> },

    /// Free text.
    Text(String),
}

/// One candidate answer.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RawCandidate {
    pub parts: Vec<RawPart>,
    pub finish_reason: Option<String>,
}

/// A successful (transport-level) response from a provider.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RawResponse {
    pub candidates: Vec<RawCandidate>,
}

impl RawResponse {
    /// Response with a single candidate holding `parts`.
    pub fn from_parts(parts: Vec<RawPart>) -> Self {
        Self {
            candidates: vec![RawCandidate {
                parts,
                finish_reason: None,
            }],
        }
    }

    /// Single text part.
    pub fn text(text: impl Into<String>) -> Self {
        Self::from_parts(vec![RawPart::Text(text.into())])
    }

    /// Single inline binary part.
    pub fn inline(mime_type: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self::from_parts(vec![RawPart::InlineData {
            mime_type: mime_type.into(),
            data: data.into(),
        }])
    }

    /// First content part of the first candidate.
    pub fn first_part(&self) -> Option<&RawPart> {
        self.candidates.first().and_then(|c| c.parts.first())
    }
}
