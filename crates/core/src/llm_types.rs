//! Generation request/response types
//!
//! Shared between the model pool, its backends, and the orchestrator.

use futures::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;

use crate::{ReasoningMode, Result};

/// Streaming token output from a backend
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<StreamChunk>> + Send>>;

/// A request to a generation backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateRequest {
    /// System prompt
    pub system: String,
    /// User utterance text
    pub prompt: String,
    /// Step-by-step reasoning toggle
    pub reasoning: ReasoningMode,
    /// Maximum tokens to generate
    pub max_tokens: u32,
    /// Sampling temperature
    pub temperature: f32,
    /// Expected output size in tokens, used for quantization selection
    pub expected_tokens: u32,
}

impl GenerateRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            system: String::new(),
            prompt: prompt.into(),
            reasoning: ReasoningMode::Off,
            max_tokens: 256,
            temperature: 0.7,
            expected_tokens: 256,
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = system.into();
        self
    }

    pub fn with_reasoning(mut self, reasoning: ReasoningMode) -> Self {
        self.reasoning = reasoning;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_expected_tokens(mut self, expected: u32) -> Self {
        self.expected_tokens = expected;
        self
    }
}

/// One streamed delta from a backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamChunk {
    /// Newly generated text
    pub delta: String,
    /// Set on the last chunk
    pub is_final: bool,
}

/// Why generation stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FinishReason {
    Stop,
    Length,
    Error,
    Cancelled,
}

/// Final accounting for one generation call
#[derive(Debug, Clone)]
pub struct GenerationResult {
    /// Complete generated text
    pub text: String,
    /// Tokens generated
    pub tokens: usize,
    /// Time to first token (ms)
    pub time_to_first_token_ms: u64,
    /// Total generation time (ms)
    pub total_time_ms: u64,
    /// Finish reason
    pub finish_reason: FinishReason,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_builder() {
        let req = GenerateRequest::new("hola")
            .with_system("asistente")
            .with_reasoning(ReasoningMode::On)
            .with_max_tokens(512);
        assert_eq!(req.prompt, "hola");
        assert_eq!(req.system, "asistente");
        assert_eq!(req.reasoning, ReasoningMode::On);
        assert_eq!(req.max_tokens, 512);
    }
}
