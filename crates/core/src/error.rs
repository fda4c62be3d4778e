//! Error types shared across the pipeline
//!
//! Propagation policy:
//! - Synthesis and playback errors are recovered locally (retries, skip).
//! - Generation errors are recovered through the model pool's fallback chain.
//! - Integrity errors are global and sticky (safe mode).
//! - Input and configuration errors are surfaced to the caller immediately.

use thiserror::Error;

/// Crate-wide result alias
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error taxonomy
#[derive(Error, Debug)]
pub enum Error {
    /// Empty or oversize utterance; short-circuits with a clarification reply
    #[error("Input error: {0}")]
    Input(String),

    /// Classifier timeout or failure; callers degrade to a balanced route
    #[error("Classifier error: {0}")]
    Classifier(String),

    /// Model failure, OOM, or timeout; engages the pool's fallback chain
    #[error("Generation error: {0}")]
    Generation(String),

    /// Every backend in the fallback chain failed
    #[error("No generation backend available")]
    GenerationUnavailable,

    /// Synthesis backend failure after retries
    #[error("Synthesis error: {0}")]
    Synthesis(String),

    /// Audit log hash mismatch; global and sticky
    #[error("Integrity error: {0}")]
    Integrity(String),

    /// Operation cancelled; never surfaced beyond stream truncation
    #[error("Operation cancelled")]
    Cancelled,

    /// Long-running operation exceeded its deadline
    #[error("Timeout in {0}")]
    Timeout(&'static str),

    /// Invalid configuration; fails fast at startup only
    #[error("Configuration error: {0}")]
    Config(String),

    /// Anything a component could not map onto the taxonomy above
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether the fallback chain may be engaged for this error
    pub fn is_recoverable_generation(&self) -> bool {
        matches!(self, Error::Generation(_) | Error::Timeout(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generation_errors_are_recoverable() {
        assert!(Error::Generation("oom".into()).is_recoverable_generation());
        assert!(Error::Timeout("generate").is_recoverable_generation());
        assert!(!Error::Integrity("bad hash".into()).is_recoverable_generation());
    }

    #[test]
    fn test_display_messages() {
        let err = Error::Input("empty utterance".into());
        assert_eq!(err.to_string(), "Input error: empty utterance");
    }
}
