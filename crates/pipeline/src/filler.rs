//! Prerecorded filler phrases
//!
//! Played through the queue at critical priority when the gap monitor
//! reports an uncomfortable silence. Rotation is deterministic so tests
//! and replays behave identically.

use std::sync::atomic::{AtomicUsize, Ordering};

use voice_router_core::Language;

const SPANISH_FILLERS: &[&str] = &[
    "Mmm, un momento...",
    "Déjame pensarlo un segundo...",
    "A ver...",
    "Un segundo, por favor...",
];

const ENGLISH_FILLERS: &[&str] = &[
    "Hmm, one moment...",
    "Let me think for a second...",
    "Let's see...",
    "One second, please...",
];

/// Rotating per-language filler phrases
#[derive(Debug, Default)]
pub struct FillerLibrary {
    cursor: AtomicUsize,
}

impl FillerLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next filler phrase for the language
    pub fn next(&self, language: &Language) -> &'static str {
        let phrases = match language {
            Language::En => ENGLISH_FILLERS,
            _ => SPANISH_FILLERS,
        };
        let idx = self.cursor.fetch_add(1, Ordering::Relaxed) % phrases.len();
        phrases[idx]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rotation_is_deterministic() {
        let library = FillerLibrary::new();
        let first = library.next(&Language::Es);
        let second = library.next(&Language::Es);
        assert_ne!(first, second);

        let fresh = FillerLibrary::new();
        assert_eq!(fresh.next(&Language::Es), first);
    }

    #[test]
    fn test_language_selection() {
        let library = FillerLibrary::new();
        assert!(ENGLISH_FILLERS.contains(&library.next(&Language::En)));
        assert!(SPANISH_FILLERS.contains(&library.next(&Language::from_tag("pt"))));
    }
}
