//! Utterance type
//!
//! Created by the transport; consumed by the orchestrator. Immutable once
//! constructed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::Language;

/// A single user utterance, partial or final
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Utterance {
    /// Raw transcript text
    pub text: String,
    /// Language tag
    pub language: Language,
    /// Arrival timestamp
    pub received_at: DateTime<Utc>,
    /// True while the transcript is still streaming
    pub partial: bool,
    /// Correlation id tying partials, the final text, and the response together
    pub correlation_id: Uuid,
}

impl Utterance {
    /// Create a finalized utterance with a fresh correlation id
    pub fn new(text: impl Into<String>, language: Language) -> Self {
        Self {
            text: text.into(),
            language,
            received_at: Utc::now(),
            partial: false,
            correlation_id: Uuid::new_v4(),
        }
    }

    /// Create a partial (still-streaming) utterance under an existing correlation
    pub fn partial(text: impl Into<String>, language: Language, correlation_id: Uuid) -> Self {
        Self {
            text: text.into(),
            language,
            received_at: Utc::now(),
            partial: true,
            correlation_id,
        }
    }

    /// Finalize a partial under the same correlation id
    pub fn finalize(self, text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            partial: false,
            received_at: Utc::now(),
            ..self
        }
    }

    /// Whitespace-separated word count
    pub fn word_count(&self) -> usize {
        self.text.split_whitespace().count()
    }

    /// Empty after trimming
    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finalize_keeps_correlation() {
        let id = Uuid::new_v4();
        let partial = Utterance::partial("hola que", Language::Es, id);
        let full = partial.finalize("hola que tal");
        assert_eq!(full.correlation_id, id);
        assert!(!full.partial);
        assert_eq!(full.word_count(), 3);
    }

    #[test]
    fn test_blank_detection() {
        assert!(Utterance::new("   ", Language::En).is_blank());
        assert!(!Utterance::new("hi", Language::En).is_blank());
    }
}
