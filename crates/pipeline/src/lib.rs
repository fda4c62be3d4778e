//! Streaming response pipeline
//!
//! Composes the router, model pool, sentence splitter, TTS queue, and
//! anti-silence monitors behind a single `process(utterance)` contract:
//! - Sentence splitting with duration estimates
//! - EWMA latency prediction and overlap-aware synthesis scheduling
//! - Strict-ordinal playback with bounded gaps
//! - Barge-in and silence monitoring with filler playback
//! - Cancellation propagation within 50 ms of an urgent interruption

pub mod filler;
pub mod monitor;
pub mod orchestrator;
pub mod tts;

pub use filler::FillerLibrary;
pub use monitor::{
    ActiveListeningMonitor, InterruptionEvent, InterruptionKind, ListeningStats, SilenceEvent,
    SilenceGapMonitor, SilenceKind, SilenceStats,
};
pub use orchestrator::{
    LatencyBreakdown, Orchestrator, OrchestratorBuilder, PipelineEvent, PipelineStats,
    ProcessOutcome, WebSearch,
};
pub use tts::{
    EwmaPredictor, EwmaState, JobState, Priority, QueueEvent, QueueStats, Sentence,
    SentenceSplitter, StreamingSplitter, StubSynthesizer, TtsJob, TtsQueue,
};

use thiserror::Error;

/// Pipeline errors
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Speed {0} outside the 0.5–2.0 range")]
    InvalidSpeed(f32),

    #[error("Empty synthesis text")]
    EmptyText,

    #[error("Queue at capacity")]
    QueueFull,

    #[error("Queue stopped")]
    Stopped,

    #[error(transparent)]
    Core(#[from] voice_router_core::Error),
}

impl From<PipelineError> for voice_router_core::Error {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::Core(inner) => inner,
            PipelineError::InvalidSpeed(_) | PipelineError::EmptyText => {
                voice_router_core::Error::Input(err.to_string())
            }
            PipelineError::QueueFull | PipelineError::Stopped => {
                voice_router_core::Error::Synthesis(err.to_string())
            }
        }
    }
}
