//! Core traits and types for the voice router
//!
//! This crate provides foundational types used across all other crates:
//! - Utterance and route decision types
//! - Generation request/response types for pluggable model backends
//! - Core traits for pluggable backends (generation, synthesis, audio level)
//! - Cancellation tokens threaded through every long-running operation
//! - Error types

pub mod cancel;
pub mod error;
pub mod language;
pub mod llm_types;
pub mod route;
pub mod traits;
pub mod utterance;

pub use cancel::CancellationToken;
pub use error::{Error, Result};
pub use language::Language;
pub use llm_types::{
    FinishReason, GenerateRequest, GenerationResult, StreamChunk, TokenStream,
};
pub use route::{ExternalKind, ModelTier, ReasoningMode, RefusalReason, RouteDecision};
pub use traits::{AudioChunk, AudioLevelSource, LanguageModel, ModelPrewarm, SynthesisBackend};
pub use utterance::Utterance;
