//! # infogen-runtime
//!
//! Resilient generation client: runs a prompt against an ordered chain of
//! models until one produces a usable image, SVG document or text.
//!
//! This crate owns everything that touches the network or the clock:
//! - Provider abstraction and the Gemini backend ([`providers`])
//! - Per-attempt deadlines with cancellation ([`resilience`], [`attempt`])
//! - The fallback loop itself ([`FallbackOrchestrator`])
//! - Model catalog lookups for diagnostics ([`catalog`])
//! - Configuration, wire format and the request front door
//!   ([`config`], [`wire`], [`GenerationService`])
//!
//! Classification and error taxonomy are deterministic and live in
//! `infogen-core`.
//!
//! ## Example
//!
//! ```rust,ignore
//! use infogen_core::{GenerationRequest, ModelChain};
//! use infogen_runtime::{providers::GeminiProvider, FallbackOrchestrator};
//! use std::sync::Arc;
//!
//! let provider = Arc::new(GeminiProvider::from_env()?);
//! let orchestrator = FallbackOrchestrator::new(provider);
//!
//! let request = GenerationRequest::builder("A blueprint of a centrifugal pump")
//!     .model_chain(ModelChain::new(["gemini-2.0-flash-exp", "gemini-1.5-pro"]))
//!     .build()?;
//!
//! let result = orchestrator.run(&request).await;
//! println!("{:?} from {:?}", result.kind(), result.used_model());
//! ```

pub mod attempt;
pub mod catalog;
pub mod config;
pub mod orchestrator;
pub mod providers;
pub mod resilience;
pub mod service;
pub mod wire;

#[cfg(test)]
mod testing;

pub use attempt::{AttemptError, AttemptExecutor};
pub use catalog::{describe, CatalogProber};
pub use config::{ChainKind, ConfigError, RuntimeConfig};
pub use orchestrator::{FallbackOrchestrator, FallbackOrchestratorBuilder, OrchestratorError};
pub use providers::{GenerativeProvider, ProviderError, ProviderRegistry};
pub use service::{GenerationOptions, GenerationService, ServiceError};
pub use wire::{GenerateRequestBody, WireError, WireResponse};
