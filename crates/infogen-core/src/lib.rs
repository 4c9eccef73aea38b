//! # infogen-core
//!
//! Deterministic building blocks of the infogen generation client.
//!
//! This crate answers three questions without doing any I/O:
//! - What did the model give back? ([`classify()`])
//! - Is there an SVG document hiding in that text? ([`markup::extract`])
//! - Given a failure, should the fallback chain continue, wait, or stop?
//!   ([`ErrorCategory`], [`RetrySchedule`])
//!
//! The network side (providers, deadlines, the fallback loop itself) lives in
//! `infogen-runtime`.
//!
//! ## Example
//!
//! ```rust
//! use infogen_core::{classify, Payload, RawResponse};
//!
//! let response = RawResponse::text("Here it is: <svg><rect/></svg>");
//! match classify(&response) {
//!     Some(Payload::VectorMarkup { markup }) => assert!(markup.contains("xmlns")),
//!     other => panic!("unexpected payload: {:?}", other),
//! }
//! ```

pub mod classify;
pub mod errors;
pub mod markup;
pub mod response;
pub mod types;

// Re-export main types at crate root
pub use classify::classify;
pub use errors::{
    ErrorCategory, GenerationError, RetryPolicy, RetrySchedule, UnclassifiedAction,
    NO_USABLE_PAYLOAD,
};
pub use response::{RawCandidate, RawPart, RawResponse};
pub use types::{
    AspectRatio, AttemptOutcome, GenerationRequest, GenerationRequestBuilder, GenerationResult,
    ModelChain, ModelId, Payload, ReferenceAsset, RequestError, ResultKind,
};
