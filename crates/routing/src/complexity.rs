//! Complexity scorer
//!
//! Cheap marker-regex scorer producing `hard`, `soft`, and `web_query`
//! scores plus a confidence in [0, 1]. High confidence means the utterance
//! is simple enough for the fast tier; knowledge questions land in the
//! balanced band; analytical or long prompts drop below it.

use once_cell::sync::Lazy;
use regex::Regex;

/// Scores for one utterance
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ComplexityScores {
    /// Analytical/computational demand
    pub hard: f64,
    /// Emotional/empathic register
    pub soft: f64,
    /// Freshness or lookup intent
    pub web_query: f64,
    /// Confidence that a small model suffices
    pub confidence: f64,
}

static HARD_MARKERS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"(?i)\b(calcula|resuelve|ecuaci[oó]n|integral|derivada|probabilidad|demuestra|",
        r"implementa|algoritmo|depura|optimiza|refactoriza|analiza|compara|eval[uú]a|deduce|razona|",
        r"dise[ñn]a|arquitectura|escalabilidad|paso a paso|solve|prove|equation|implement|algorithm|",
        r"debug|optimi[sz]e|refactor|analy[sz]e|compare|evaluate|design|architecture|step by step|",
        r"trade[- ]?off)\b",
    ))
    .unwrap()
});

static ARITHMETIC: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\d+\s*[+\-*/^]\s*\d+").unwrap());

static CODE_FENCE: Lazy<Regex> = Lazy::new(|| Regex::new(r"```").unwrap());

static SOFT_MARKERS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"(?i)\b(me siento|triste|feliz|preocupad[oa]|ansios[oa]|miedo|solo|sola|",
        r"consejo|an[ií]mame|i feel|sad|happy|worried|anxious|lonely|scared|advice|cheer me up)\b",
    ))
    .unwrap()
});

static WEB_MARKERS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"(?i)\b(busca|b[uú]scame|buscar|noticias|[uú]ltimas?|actualidad|hoy en|clima en|",
        r"tiempo en|precio de|cotizaci[oó]n|qui[eé]n gan[oó]|resultado de|search|look up|latest|",
        r"news|today's|weather in|price of|who won)\b",
    ))
    .unwrap()
});

static INTERROGATIVE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"(?i)\b(cu[aá]l|cu[aá]les|qu[eé]|c[oó]mo|cu[aá]ndo|d[oó]nde|qui[eé]n|por qu[eé]|",
        r"what|which|how|when|where|who|why)\b",
    ))
    .unwrap()
});

/// Marker-based complexity scorer; deterministic and allocation-light.
#[derive(Debug, Default, Clone, Copy)]
pub struct ComplexityScorer;

impl ComplexityScorer {
    pub fn new() -> Self {
        Self
    }

    pub fn score(&self, text: &str) -> ComplexityScores {
        let hard_hits = HARD_MARKERS.find_iter(text).count()
            + ARITHMETIC.find_iter(text).count()
            + CODE_FENCE.find_iter(text).count();
        let soft_hits = SOFT_MARKERS.find_iter(text).count();
        let web_hits = WEB_MARKERS.find_iter(text).count();

        let hard = saturating_score(hard_hits);
        let soft = saturating_score(soft_hits);
        let web_query = saturating_score(web_hits);

        // Confidence: start simple, subtract for knowledge questions,
        // analytical markers, and sheer length.
        let mut confidence: f64 = 0.9;
        if INTERROGATIVE.is_match(text) {
            confidence -= 0.35;
        }
        confidence -= 0.25 * hard_hits as f64;
        let chars = text.chars().count();
        confidence -= (chars as f64 / 400.0).min(0.5);

        ComplexityScores {
            hard,
            soft,
            web_query,
            confidence: confidence.clamp(0.0, 1.0),
        }
    }
}

/// 0 hits → 0.0, 1 → 0.5, 2 → 0.75, 3+ → 0.9
fn saturating_score(hits: usize) -> f64 {
    match hits {
        0 => 0.0,
        1 => 0.5,
        2 => 0.75,
        _ => 0.9,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_smalltalk_is_high_confidence() {
        let scores = ComplexityScorer::new().score("me gusta la música");
        assert!(scores.confidence >= 0.6, "got {}", scores.confidence);
        assert_eq!(scores.hard, 0.0);
    }

    #[test]
    fn test_factual_question_lands_in_balanced_band() {
        let scores = ComplexityScorer::new().score("¿Cuál es la capital de Francia?");
        assert!(
            (0.3..0.6).contains(&scores.confidence),
            "got {}",
            scores.confidence
        );
    }

    #[test]
    fn test_analytical_prompt_is_low_confidence() {
        let scores = ComplexityScorer::new()
            .score("Analiza y compara la arquitectura de ambos sistemas paso a paso");
        assert!(scores.confidence < 0.3, "got {}", scores.confidence);
        assert!(scores.hard >= 0.75);
    }

    #[test]
    fn test_arithmetic_counts_as_hard() {
        let scores = ComplexityScorer::new().score("resuelve 12 + 35 * 2");
        assert!(scores.hard >= 0.75);
    }

    #[test]
    fn test_web_markers() {
        let scores = ComplexityScorer::new().score("busca las últimas noticias de hoy");
        assert!(scores.web_query >= 0.7, "got {}", scores.web_query);
    }

    #[test]
    fn test_soft_markers() {
        let scores = ComplexityScorer::new().score("me siento muy triste hoy");
        assert!(scores.soft >= 0.5);
        assert!(scores.hard < 0.3);
    }

    #[test]
    fn test_length_reduces_confidence() {
        let long = "cuéntame sobre historia ".repeat(20);
        let scores = ComplexityScorer::new().score(&long);
        assert!(scores.confidence < 0.5);
    }
}
