//! Reasoning-mode classifier
//!
//! Decides whether a generation request should run with step-by-step
//! reasoning. Markers for arithmetic, code, and analysis force it on, as
//! does sheer prompt length; everything else stays fast.

use once_cell::sync::Lazy;
use regex::Regex;

use voice_router_core::ReasoningMode;

static REASONING_MARKERS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"(?i)\b(calcula|resuelve|demuestra|ecuaci[oó]n|integral|derivada|implementa|",
        r"algoritmo|depura|optimiza|refactoriza|analiza|compara|deduce|razona|paso a paso|",
        r"solve|prove|equation|implement|algorithm|debug|optimi[sz]e|refactor|analy[sz]e|",
        r"step by step|reason through)\b",
    ))
    .unwrap()
});

static ARITHMETIC: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+\s*[+\-*/^]\s*\d+").unwrap());

static CODE_FENCE: Lazy<Regex> = Lazy::new(|| Regex::new(r"```").unwrap());

/// Length-or-marker classifier for reasoning mode
#[derive(Debug, Clone, Copy)]
pub struct ReasoningClassifier {
    /// Prompts at or above this length always get reasoning
    threshold_chars: usize,
}

impl ReasoningClassifier {
    pub fn new(threshold_chars: usize) -> Self {
        Self { threshold_chars }
    }

    pub fn classify(&self, text: &str) -> ReasoningMode {
        if text.chars().count() >= self.threshold_chars {
            return ReasoningMode::On;
        }
        if REASONING_MARKERS.is_match(text)
            || ARITHMETIC.is_match(text)
            || CODE_FENCE.is_match(text)
        {
            return ReasoningMode::On;
        }
        ReasoningMode::Off
    }
}

impl Default for ReasoningClassifier {
    fn default() -> Self {
        Self::new(200)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_greeting_is_off() {
        let clf = ReasoningClassifier::default();
        assert_eq!(clf.classify("Hola, ¿cómo estás?"), ReasoningMode::Off);
    }

    #[test]
    fn test_equation_is_on() {
        let clf = ReasoningClassifier::default();
        assert_eq!(clf.classify("resuelve x^2 + 5x + 6 = 0"), ReasoningMode::On);
        assert_eq!(clf.classify("what is 12 + 34"), ReasoningMode::On);
    }

    #[test]
    fn test_code_block_is_on() {
        let clf = ReasoningClassifier::default();
        assert_eq!(clf.classify("```python\nprint(1)\n```"), ReasoningMode::On);
    }

    #[test]
    fn test_long_prompt_is_on() {
        let clf = ReasoningClassifier::default();
        let long = "palabra ".repeat(30);
        assert!(long.chars().count() >= 200);
        assert_eq!(clf.classify(&long), ReasoningMode::On);
    }

    #[test]
    fn test_factual_question_is_off() {
        let clf = ReasoningClassifier::default();
        assert_eq!(
            clf.classify("¿Cuál es la capital de Francia?"),
            ReasoningMode::Off
        );
    }
}
