//! Seams to external collaborators and internal backends
//!
//! The speech-to-text engine, voice activity detector, synthesis engine,
//! and microphone all live outside this workspace; these traits are the
//! named interfaces the pipeline talks to.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::{CancellationToken, GenerateRequest, GenerationResult, Result, TokenStream};

/// Streaming generation interface
///
/// Implemented by concrete backends and by the model pool itself (which
/// adds tier resolution and the fallback chain on top).
#[async_trait]
pub trait LanguageModel: Send + Sync + 'static {
    /// Generate a complete response
    async fn generate(
        &self,
        request: GenerateRequest,
        cancel: CancellationToken,
    ) -> Result<GenerationResult>;

    /// Generate a response as a token stream
    async fn generate_stream(
        &self,
        request: GenerateRequest,
        cancel: CancellationToken,
    ) -> Result<TokenStream>;

    /// Model name for logging
    fn model_name(&self) -> &str;
}

/// Opaque audio produced by the external synthesis engine
///
/// The pipeline never inspects the bytes; it only paces their delivery
/// using the reported duration.
#[derive(Debug, Clone)]
pub struct AudioChunk {
    /// Encoded audio, format owned by the synthesis engine
    pub bytes: Arc<[u8]>,
    /// Playback length of this chunk
    pub duration: Duration,
    /// Sample rate, informational
    pub sample_rate: u32,
}

impl AudioChunk {
    pub fn new(bytes: Vec<u8>, duration: Duration, sample_rate: u32) -> Self {
        Self {
            bytes: bytes.into(),
            duration,
            sample_rate,
        }
    }
}

/// Named interface to the external synthesis engine
#[async_trait]
pub trait SynthesisBackend: Send + Sync + 'static {
    /// Synthesize one sentence at the given speed multiplier (0.5–2.0)
    async fn synthesize(&self, text: &str, speed: f32) -> Result<AudioChunk>;

    /// Backend name for logging
    fn backend_name(&self) -> &str;
}

/// Named interface to the microphone / ambient level meter
///
/// The active listening monitor samples this on its detection cadence.
#[async_trait]
pub trait AudioLevelSource: Send + Sync + 'static {
    /// Current input level in dBFS
    async fn level_db(&self) -> f32;
}

/// Prewarm hint sink
///
/// The eager input processor pushes likely-model hints here; the model
/// pool implements it by starting a background load.
pub trait ModelPrewarm: Send + Sync {
    /// Hint that `name` will likely be needed shortly; must not block
    fn prewarm(&self, name: &str);
}
