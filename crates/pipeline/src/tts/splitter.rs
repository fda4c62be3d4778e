//! Sentence splitter for TTS streaming
//!
//! Breaks generated text into TTS-sized sentences with duration
//! estimates. Splits only on a terminator followed by whitespace or end
//! of input, is abbreviation-aware per language, preserves opening ¿/¡,
//! and attaches the terminator to the sentence it ends. Deterministic;
//! no I/O.

use std::collections::HashSet;
use std::time::Duration;

use voice_router_core::Language;

/// A sentence with TTS metadata
#[derive(Debug, Clone, PartialEq)]
pub struct Sentence {
    /// 0-based position within the turn; defines playback order
    pub ordinal: u64,
    pub text: String,
    pub is_question: bool,
    pub is_exclamation: bool,
    /// Rough synthesis-output length estimate
    pub estimated_duration_seconds: f32,
}

impl Sentence {
    pub fn estimated_duration(&self) -> Duration {
        Duration::from_secs_f32(self.estimated_duration_seconds)
    }
}

const SPANISH_ABBREVS: &[&str] = &[
    "Sr.", "Sra.", "Dr.", "Dra.", "Prof.", "Ing.", "Lic.", "etc.", "ej.", "p.ej.", "aprox.",
    "pág.", "cap.", "art.", "núm.", "vol.", "ed.", "máx.", "mín.", "a.C.", "d.C.", "EE.UU.",
    "p.m.", "a.m.",
];

const ENGLISH_ABBREVS: &[&str] = &[
    "Mr.", "Mrs.", "Ms.", "Dr.", "Prof.", "Sr.", "Jr.", "etc.", "e.g.", "i.e.", "approx.",
    "pg.", "ch.", "art.", "no.", "vol.", "ed.", "max.", "min.", "B.C.", "A.D.", "U.S.A.",
    "p.m.", "a.m.",
];

/// Abbreviation-aware sentence splitter
#[derive(Debug, Clone)]
pub struct SentenceSplitter {
    abbreviations: HashSet<&'static str>,
    chars_per_second: f32,
}

impl SentenceSplitter {
    pub fn new(language: &Language, chars_per_second: f32) -> Self {
        let abbreviations = match language {
            Language::En => ENGLISH_ABBREVS.iter().copied().collect(),
            // Spanish list doubles as the default for unlisted languages.
            _ => SPANISH_ABBREVS.iter().copied().collect(),
        };
        Self {
            abbreviations,
            chars_per_second,
        }
    }

    /// Split a complete text into sentences, lazily
    pub fn split<'a>(&'a self, text: &str) -> SentenceIter<'a> {
        SentenceIter {
            splitter: self,
            chars: text.chars().collect(),
            pos: 0,
            ordinal: 0,
        }
    }

    /// Eager convenience over `split`
    pub fn split_all(&self, text: &str) -> Vec<Sentence> {
        self.split(text).collect()
    }

    fn make_sentence(&self, ordinal: u64, raw: &str) -> Option<Sentence> {
        let text = raw.trim();
        if text.is_empty() {
            return None;
        }
        Some(Sentence {
            ordinal,
            text: text.to_string(),
            is_question: text.contains('?') || text.contains('¿'),
            is_exclamation: text.contains('!') || text.contains('¡'),
            estimated_duration_seconds: self.estimate_duration(text),
        })
    }

    /// `max(0.5, letters / chars_per_second + tail_pause)`; the tail pause
    /// is 0.3 s for questions/exclamations, 0.2 s otherwise
    fn estimate_duration(&self, text: &str) -> f32 {
        let letters = text
            .chars()
            .filter(|c| c.is_alphanumeric() || c.is_whitespace())
            .count();
        let tail_pause = if text.ends_with('?') || text.ends_with('!') {
            0.3
        } else {
            0.2
        };
        (letters as f32 / self.chars_per_second + tail_pause).max(0.5)
    }

    /// Whether the word ending at `end` (exclusive, just past a '.') is a
    /// known abbreviation
    fn ends_with_abbreviation(&self, chars: &[char], end: usize) -> bool {
        let mut start = end;
        while start > 0 && !chars[start - 1].is_whitespace() {
            start -= 1;
        }
        let word: String = chars[start..end].iter().collect();
        self.abbreviations.contains(word.as_str())
    }

    /// Index just past the next complete sentence starting at `start`, or
    /// `None` when no terminator-plus-boundary exists in `chars`.
    ///
    /// `at_end_of_input` treats the end of `chars` as a boundary, which a
    /// streaming caller must not do until the text is finalized.
    fn next_split(&self, chars: &[char], start: usize, at_end_of_input: bool) -> Option<usize> {
        let mut i = start;
        while i < chars.len() {
            if is_terminator(chars[i]) {
                // Swallow the whole terminator run.
                let mut end = i + 1;
                while end < chars.len() && is_terminator(chars[end]) {
                    end += 1;
                }
                let at_boundary = match chars.get(end) {
                    Some(c) => c.is_whitespace(),
                    None => at_end_of_input,
                };
                if at_boundary && !(chars[i] == '.' && self.ends_with_abbreviation(chars, end)) {
                    return Some(end);
                }
                i = end;
            } else {
                i += 1;
            }
        }
        None
    }
}

fn is_terminator(ch: char) -> bool {
    matches!(ch, '.' | '!' | '?')
}

/// Lazy, non-restartable iterator over one input
pub struct SentenceIter<'a> {
    splitter: &'a SentenceSplitter,
    chars: Vec<char>,
    pos: usize,
    ordinal: u64,
}

impl Iterator for SentenceIter<'_> {
    type Item = Sentence;

    fn next(&mut self) -> Option<Sentence> {
        while self.pos < self.chars.len() {
            let end = self
                .splitter
                .next_split(&self.chars, self.pos, true)
                .unwrap_or(self.chars.len());
            let raw: String = self.chars[self.pos..end].iter().collect();
            self.pos = end;
            if let Some(sentence) = self.splitter.make_sentence(self.ordinal, &raw) {
                self.ordinal += 1;
                return Some(sentence);
            }
        }
        None
    }
}

/// Stateful splitter over streamed text chunks
///
/// Feed generator deltas with `push`, drain complete sentences as they
/// form, and call `finish` once the stream ends to flush the tail.
pub struct StreamingSplitter {
    splitter: SentenceSplitter,
    buffer: Vec<char>,
    ordinal: u64,
}

impl StreamingSplitter {
    pub fn new(splitter: SentenceSplitter) -> Self {
        Self {
            splitter,
            buffer: Vec::new(),
            ordinal: 0,
        }
    }

    /// Append a chunk and return any sentences completed by it
    pub fn push(&mut self, chunk: &str) -> Vec<Sentence> {
        self.buffer.extend(chunk.chars());
        let mut out = Vec::new();
        let mut start = 0;
        while let Some(end) = self.splitter.next_split(&self.buffer, start, false) {
            let raw: String = self.buffer[start..end].iter().collect();
            if let Some(sentence) = self.splitter.make_sentence(self.ordinal, &raw) {
                self.ordinal += 1;
                out.push(sentence);
            }
            start = end;
        }
        self.buffer.drain(..start);
        out
    }

    /// Flush whatever remains as the final sentence
    pub fn finish(&mut self) -> Option<Sentence> {
        let raw: String = self.buffer.drain(..).collect();
        let sentence = self.splitter.make_sentence(self.ordinal, &raw)?;
        self.ordinal += 1;
        Some(sentence)
    }

    /// Sentences emitted so far
    pub fn emitted(&self) -> u64 {
        self.ordinal
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn splitter() -> SentenceSplitter {
        SentenceSplitter::new(&Language::Es, 15.0)
    }

    #[test]
    fn test_basic_split_with_metadata() {
        let sentences = splitter().split_all("Hola. ¿Cómo estás? ¡Genial!");
        assert_eq!(sentences.len(), 3);
        assert_eq!(sentences[0].text, "Hola.");
        assert!(!sentences[0].is_question);
        assert_eq!(sentences[1].text, "¿Cómo estás?");
        assert!(sentences[1].is_question);
        assert_eq!(sentences[2].text, "¡Genial!");
        assert!(sentences[2].is_exclamation);
        // Ordinals define playback order.
        for (idx, s) in sentences.iter().enumerate() {
            assert_eq!(s.ordinal, idx as u64);
        }
    }

    #[test]
    fn test_abbreviations_do_not_split() {
        let sentences =
            splitter().split_all("El Dr. García dijo que todo está bien. Nos vemos a las 3 p.m. mañana.");
        assert_eq!(sentences.len(), 2);
        assert!(sentences[0].text.starts_with("El Dr. García"));
        assert!(sentences[1].text.contains("p.m. mañana"));
    }

    #[test]
    fn test_english_abbreviations() {
        let splitter = SentenceSplitter::new(&Language::En, 15.0);
        let sentences = splitter.split_all("Dr. Smith arrived. It went well.");
        assert_eq!(sentences.len(), 2);
        assert_eq!(sentences[0].text, "Dr. Smith arrived.");
    }

    #[test]
    fn test_decimal_numbers_do_not_split() {
        let sentences = splitter().split_all("El valor de pi es 3.14 aproximadamente. Sí.");
        assert_eq!(sentences.len(), 2);
        assert!(sentences[0].text.contains("3.14"));
    }

    #[test]
    fn test_terminator_run_attaches_to_sentence() {
        let sentences = splitter().split_all("¿¡En serio!? No lo sabía...");
        assert_eq!(sentences.len(), 2);
        assert_eq!(sentences[0].text, "¿¡En serio!?");
        assert_eq!(sentences[1].text, "No lo sabía...");
    }

    #[test]
    fn test_duration_estimate_floor_and_tail() {
        let sentences = splitter().split_all("Sí.");
        assert_eq!(sentences[0].estimated_duration_seconds, 0.5);

        let sentences = splitter().split_all("Una frase bastante más larga que la anterior.");
        let expected = 44.0 / 15.0 + 0.2;
        assert!((sentences[0].estimated_duration_seconds - expected).abs() < 0.2);

        let question = splitter().split_all("¿Vienes mañana por la tarde a casa?");
        let statement = splitter().split_all("Vienes mañana por la tarde a casa.");
        assert!(
            question[0].estimated_duration_seconds > statement[0].estimated_duration_seconds
        );
    }

    #[test]
    fn test_empty_and_whitespace_input() {
        assert!(splitter().split_all("").is_empty());
        assert!(splitter().split_all("   \n  ").is_empty());
    }

    #[test]
    fn test_trailing_text_without_terminator() {
        let sentences = splitter().split_all("Primera frase. Y esta cola no termina");
        assert_eq!(sentences.len(), 2);
        assert_eq!(sentences[1].text, "Y esta cola no termina");
    }

    #[test]
    fn test_streaming_splitter_emits_on_boundaries() {
        let mut streaming = StreamingSplitter::new(splitter());
        assert!(streaming.push("Hola a ").is_empty());
        // The terminator has arrived but no following whitespace yet, so
        // the sentence may still be growing ("3.14" style).
        assert!(streaming.push("todos.").is_empty());
        let out = streaming.push(" ¿Qué tal");
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].text, "Hola a todos.");
        assert!(streaming.push(" va todo?").is_empty());
        let tail = streaming.finish().unwrap();
        assert_eq!(tail.text, "¿Qué tal va todo?");
        assert_eq!(tail.ordinal, 1);
        assert_eq!(streaming.emitted(), 2);
    }

    #[test]
    fn test_streaming_matches_batch() {
        let text = "Hola. ¿Cómo estás? El Dr. García llega a las 3 p.m. hoy. ¡Genial!";
        let batch = splitter().split_all(text);

        let mut streaming = StreamingSplitter::new(splitter());
        let mut collected = Vec::new();
        for chunk in text.split_inclusive(' ') {
            collected.extend(streaming.push(chunk));
        }
        collected.extend(streaming.finish());

        assert_eq!(batch, collected);
    }
}
