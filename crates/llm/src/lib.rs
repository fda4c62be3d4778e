//! Generation backends and the model pool
//!
//! Features:
//! - `GenerationBackend` capability trait (load, unload, streaming generate)
//! - HTTP backend speaking an Ollama-style NDJSON streaming API
//! - Stub backend for tests and offline development
//! - Auto-quantization by expected output size
//! - Model pool with lazy exclusive loads, hot/warm/cold TTL eviction,
//!   context-window reuse, and per-name fallback chains

pub mod backend;
pub mod pool;
pub mod quant;

pub use backend::{
    BackendFactory, GenerationBackend, HttpBackend, HttpBackendConfig, HttpFactory, StubBackend,
    StubFactory,
};
pub use pool::{
    AcquireOptions, DegradationEvent, ModelHandle, ModelPool, PoolPrewarm, PoolStats, TtlTier,
};
pub use quant::{context_window_for, estimate_tokens, Quantization};

use thiserror::Error;

/// LLM errors
#[derive(Error, Debug)]
pub enum LlmError {
    #[error("Generation error: {0}")]
    Generation(String),

    #[error("API error: {0}")]
    Api(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Timeout")]
    Timeout,

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Load error for {name}: {message}")]
    Load { name: String, message: String },

    #[error("Every backend in the fallback chain failed")]
    Unavailable,

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Cancelled")]
    Cancelled,
}

impl LlmError {
    /// Transient errors worth retrying on the same backend
    pub fn is_retryable(&self) -> bool {
        matches!(self, LlmError::Network(_) | LlmError::Timeout)
    }
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            LlmError::Timeout
        } else {
            LlmError::Network(err.to_string())
        }
    }
}

impl From<LlmError> for voice_router_core::Error {
    fn from(err: LlmError) -> Self {
        match err {
            LlmError::Unavailable => voice_router_core::Error::GenerationUnavailable,
            LlmError::Cancelled => voice_router_core::Error::Cancelled,
            LlmError::Timeout => voice_router_core::Error::Timeout("generation"),
            other => voice_router_core::Error::Generation(other.to_string()),
        }
    }
}
