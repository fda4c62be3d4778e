//! Unknown/refusal classifier
//!
//! Detects out-of-domain requests: future events, private data, memory
//! claims the system cannot honor, forbidden actions, and unintelligible
//! input. A short-circuit cascade returns the first reason that fires,
//! in a fixed order. Pure and side-effect free; refused utterances never
//! reach a generation backend.

use chrono::{Datelike, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

use voice_router_config::UnknownPatterns;
use voice_router_core::{RefusalReason, Utterance};

use crate::normalize::normalize;

static YEAR_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(20\d{2})\b").unwrap());

/// Cascade classifier over the closed refusal set
pub struct RefusalClassifier {
    patterns: UnknownPatterns,
}

impl RefusalClassifier {
    pub fn new(patterns: UnknownPatterns) -> Self {
        Self { patterns }
    }

    /// First refusal reason that fires, or `None`
    ///
    /// Cascade order is fixed: FutureEvent → PrivateInfo →
    /// HallucinationRisk → Unsafe → Nonsense.
    pub fn classify(&self, utterance: &Utterance) -> Option<RefusalReason> {
        let normalized = normalize(&utterance.text);
        if normalized.is_empty() {
            return None;
        }
        let keywords = self.patterns.keywords(utterance.language.as_str());

        if self.is_future_event(&normalized, keywords) {
            return Some(RefusalReason::FutureEvent);
        }
        if Self::hits(keywords, |k| &k.private_info, &normalized) {
            return Some(RefusalReason::PrivateInfo);
        }
        if Self::hits(keywords, |k| &k.memory_claims, &normalized) {
            return Some(RefusalReason::HallucinationRisk);
        }
        if Self::hits(keywords, |k| &k.unsafe_actions, &normalized) {
            return Some(RefusalReason::Unsafe);
        }
        if is_nonsense(&utterance.text, &normalized) {
            return Some(RefusalReason::Nonsense);
        }
        None
    }

    fn is_future_event(
        &self,
        normalized: &str,
        keywords: Option<&voice_router_config::refusal::RefusalKeywords>,
    ) -> bool {
        if Self::hits(keywords, |k| &k.future_event, normalized) {
            return true;
        }
        // A year beyond the current one is a future-date marker on its own.
        let current_year = Utc::now().year();
        YEAR_RE
            .captures_iter(normalized)
            .filter_map(|cap| cap[1].parse::<i32>().ok())
            .any(|year| year > current_year)
    }

    fn hits(
        keywords: Option<&voice_router_config::refusal::RefusalKeywords>,
        select: impl Fn(&voice_router_config::refusal::RefusalKeywords) -> &Vec<String>,
        normalized: &str,
    ) -> bool {
        keywords
            .map(|k| {
                select(k)
                    .iter()
                    .any(|kw| normalized.contains(&normalize(kw)))
            })
            .unwrap_or(false)
    }
}

impl Default for RefusalClassifier {
    fn default() -> Self {
        Self::new(UnknownPatterns::default())
    }
}

/// Unintelligible input: no letters at all, a single long character run,
/// or almost no letters among a longer string.
fn is_nonsense(raw: &str, normalized: &str) -> bool {
    let letters = normalized.chars().filter(|c| c.is_alphabetic()).count();
    if letters == 0 {
        return true;
    }

    let mut run = 1usize;
    let mut max_run = 1usize;
    let mut prev: Option<char> = None;
    for ch in normalized.chars() {
        if prev == Some(ch) {
            run += 1;
            max_run = max_run.max(run);
        } else {
            run = 1;
        }
        prev = Some(ch);
    }
    if max_run >= 8 {
        return true;
    }

    let total = raw.chars().filter(|c| !c.is_whitespace()).count();
    total > 12 && (letters as f32) / (total as f32) < 0.3
}

#[cfg(test)]
mod tests {
    use super::*;
    use voice_router_core::Language;

    fn utt(text: &str) -> Utterance {
        Utterance::new(text, Language::Es)
    }

    #[test]
    fn test_future_election_refused() {
        let clf = RefusalClassifier::default();
        assert_eq!(
            clf.classify(&utt("¿quién ganará las elecciones de 2030?")),
            Some(RefusalReason::FutureEvent)
        );
    }

    #[test]
    fn test_future_year_alone_refused() {
        let clf = RefusalClassifier::default();
        assert_eq!(
            clf.classify(&utt("qué tiempo hará en 2099")),
            Some(RefusalReason::FutureEvent)
        );
        // Past years are fine.
        assert_eq!(clf.classify(&utt("qué pasó en 2010 en Chile")), None);
    }

    #[test]
    fn test_private_info_refused() {
        let clf = RefusalClassifier::default();
        assert_eq!(
            clf.classify(&utt("cuál es mi contraseña")),
            Some(RefusalReason::PrivateInfo)
        );
    }

    #[test]
    fn test_memory_claim_refused() {
        let clf = RefusalClassifier::default();
        assert_eq!(
            clf.classify(&utt("¿recuerdas cuando te conté mi viaje?")),
            Some(RefusalReason::HallucinationRisk)
        );
    }

    #[test]
    fn test_english_keywords() {
        let clf = RefusalClassifier::default();
        let utt = Utterance::new("tell me my password", Language::En);
        assert_eq!(clf.classify(&utt), Some(RefusalReason::PrivateInfo));
    }

    #[test]
    fn test_nonsense_refused() {
        let clf = RefusalClassifier::default();
        assert_eq!(
            clf.classify(&utt("aaaaaaaaaaaa")),
            Some(RefusalReason::Nonsense)
        );
        assert_eq!(
            clf.classify(&utt("12 3456 789 0123 45678 9")),
            Some(RefusalReason::Nonsense)
        );
    }

    #[test]
    fn test_ordinary_questions_pass() {
        let clf = RefusalClassifier::default();
        assert_eq!(clf.classify(&utt("¿Cuál es la capital de Francia?")), None);
        assert_eq!(clf.classify(&utt("hola")), None);
    }

    #[test]
    fn test_cascade_order_first_reason_wins() {
        // Contains both a future marker and a private-info marker; the
        // cascade must report the earlier stage.
        let clf = RefusalClassifier::default();
        assert_eq!(
            clf.classify(&utt("¿quién ganará y cuál es mi contraseña?")),
            Some(RefusalReason::FutureEvent)
        );
    }
}
