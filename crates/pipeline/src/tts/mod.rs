//! Streaming TTS: sentence splitting, latency prediction, and the
//! overlap-aware synthesis queue.

pub mod predictor;
pub mod queue;
pub mod splitter;

pub use predictor::{EwmaPredictor, EwmaState};
pub use queue::{JobState, Priority, QueueEvent, QueueStats, TtsJob, TtsQueue};
pub use splitter::{Sentence, SentenceSplitter, StreamingSplitter};

use async_trait::async_trait;
use std::time::Duration;

use voice_router_core::{AudioChunk, Error, Result, SynthesisBackend};

/// Synthesis backend that produces silence; used in tests and when no
/// real engine is wired up. The audio length mirrors the splitter's
/// duration heuristic so pacing behaves like a real backend.
pub struct StubSynthesizer {
    /// Wall time each synthesis call takes
    pub latency: Duration,
    /// Speaking rate used to size the fake audio
    pub chars_per_second: f32,
    /// Fail this many calls before succeeding again
    fail_remaining: std::sync::atomic::AtomicU32,
}

impl StubSynthesizer {
    pub fn new(latency: Duration) -> Self {
        Self {
            latency,
            chars_per_second: 15.0,
            fail_remaining: std::sync::atomic::AtomicU32::new(0),
        }
    }

    /// Make the next `n` synthesize calls fail
    pub fn fail_next(&self, n: u32) {
        self.fail_remaining
            .store(n, std::sync::atomic::Ordering::SeqCst);
    }
}

#[async_trait]
impl SynthesisBackend for StubSynthesizer {
    async fn synthesize(&self, text: &str, speed: f32) -> Result<AudioChunk> {
        use std::sync::atomic::Ordering;
        if self
            .fail_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| v.checked_sub(1))
            .is_ok()
        {
            return Err(Error::Synthesis("stub synthesis failure".to_string()));
        }

        tokio::time::sleep(self.latency).await;
        let seconds =
            (text.chars().count() as f32 / self.chars_per_second / speed).max(0.5);
        let duration = Duration::from_secs_f32(seconds);
        // One byte per millisecond of silence; the pipeline never looks inside.
        let bytes = vec![0u8; duration.as_millis() as usize];
        Ok(AudioChunk::new(bytes, duration, 22_050))
    }

    fn backend_name(&self) -> &str {
        "stub"
    }
}
