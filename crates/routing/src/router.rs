//! Tripartite router
//!
//! Computes a `RouteDecision` in three stages: template catalogue first,
//! refusal cascade second, complexity-to-tier mapping last. A bounded
//! feedback buffer biases the confidence thresholds once enough confirmed
//! negatives accumulate.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use voice_router_config::RouterConfig;
use voice_router_core::{
    ExternalKind, ModelTier, ReasoningMode, RouteDecision, Utterance,
};

use crate::complexity::{ComplexityScorer, ComplexityScores};
use crate::reasoning::ReasoningClassifier;
use crate::refusal::RefusalClassifier;
use crate::template::TemplateEngine;

/// Confirmed outcome of a past route, fed back by the orchestrator
#[derive(Debug, Clone, Copy)]
pub struct RouteFeedback {
    /// Whether the user accepted the response
    pub positive: bool,
    /// Tier that served it, if a model did
    pub tier: Option<ModelTier>,
}

/// No-commit classification used by the eager input processor
#[derive(Debug, Clone)]
pub struct RoutePreview {
    pub decision: RouteDecision,
    pub confidence: f64,
}

/// Read-only counter snapshot
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RouterStats {
    pub template_hits: u64,
    pub refusals: u64,
    pub fast_routes: u64,
    pub balanced_routes: u64,
    pub deep_routes: u64,
    pub external_routes: u64,
    pub feedback_negatives: usize,
    pub bias_active: bool,
}

#[derive(Default)]
struct Counters {
    template_hits: AtomicU64,
    refusals: AtomicU64,
    fast_routes: AtomicU64,
    balanced_routes: AtomicU64,
    deep_routes: AtomicU64,
    external_routes: AtomicU64,
}

/// Three-stage router over templates, refusals, and model tiers
pub struct TripartiteRouter {
    templates: TemplateEngine,
    refusals: RefusalClassifier,
    scorer: ComplexityScorer,
    reasoning: ReasoningClassifier,
    config: RouterConfig,
    feedback: Mutex<VecDeque<bool>>,
    counters: Counters,
}

impl TripartiteRouter {
    pub fn new(
        templates: TemplateEngine,
        refusals: RefusalClassifier,
        config: RouterConfig,
    ) -> Self {
        let reasoning = ReasoningClassifier::new(config.think_mode_threshold_chars);
        Self {
            templates,
            refusals,
            scorer: ComplexityScorer::new(),
            reasoning,
            config,
            feedback: Mutex::new(VecDeque::new()),
            counters: Counters::default(),
        }
    }

    /// Route a finalized utterance
    pub fn route(&self, utterance: &Utterance) -> RouteDecision {
        let decision = self.decide(utterance);
        self.count(&decision);
        tracing::debug!(
            correlation = %utterance.correlation_id,
            route = decision.label(),
            "Routed utterance"
        );
        decision
    }

    /// Classify without committing stats; used on partial transcripts
    pub fn preview(&self, utterance: &Utterance) -> RoutePreview {
        let scores = self.scorer.score(&utterance.text);
        RoutePreview {
            decision: self.decide(utterance),
            confidence: self.preview_confidence(utterance, &scores),
        }
    }

    fn preview_confidence(&self, utterance: &Utterance, scores: &ComplexityScores) -> f64 {
        // Template and refusal stages are near-certain when they fire.
        if self.templates.lookup(utterance).is_some() {
            return 0.9;
        }
        if self.refusals.classify(utterance).is_some() {
            return 0.85;
        }
        scores.confidence
    }

    fn decide(&self, utterance: &Utterance) -> RouteDecision {
        // Stage 1: template catalogue.
        if let Some(hit) = self.templates.lookup(utterance) {
            return RouteDecision::Template {
                category: hit.category,
                reply: hit.reply,
            };
        }

        // Stage 2: refusal cascade.
        if let Some(reason) = self.refusals.classify(utterance) {
            return RouteDecision::Refuse(reason);
        }

        // Stage 3: complexity scores → tier table.
        let scores = self.scorer.score(&utterance.text);

        if scores.web_query >= self.config.web_threshold {
            return RouteDecision::External(ExternalKind::WebSearch);
        }

        let (fast_cut, deep_cut) = self.effective_thresholds();
        let tier = if scores.confidence >= fast_cut {
            ModelTier::Fast
        } else if scores.confidence >= deep_cut {
            ModelTier::Balanced
        } else {
            ModelTier::Deep
        };

        let reasoning = self.reasoning.classify(&utterance.text);
        let empathic = scores.soft >= self.config.soft_threshold
            && scores.hard < self.config.empathic_hard_ceiling;

        RouteDecision::Model {
            tier,
            reasoning,
            empathic,
        }
    }

    /// Thresholds with the feedback bias applied
    ///
    /// After enough confirmed negatives the cuts shift up, pushing
    /// borderline queries one tier deeper.
    fn effective_thresholds(&self) -> (f64, f64) {
        let negatives = self.negative_count();
        if negatives >= self.config.feedback_min_negatives {
            (
                (self.config.fast_confidence + 0.05).min(1.0),
                (self.config.deep_confidence + 0.05).min(1.0),
            )
        } else {
            (self.config.fast_confidence, self.config.deep_confidence)
        }
    }

    /// Record a confirmed outcome; the buffer is bounded, oldest first out
    pub fn record_feedback(&self, feedback: RouteFeedback) {
        let mut buf = self.feedback.lock();
        if buf.len() >= self.config.feedback_capacity {
            buf.pop_front();
        }
        buf.push_back(feedback.positive);
    }

    fn negative_count(&self) -> usize {
        self.feedback.lock().iter().filter(|p| !**p).count()
    }

    fn count(&self, decision: &RouteDecision) {
        let counter = match decision {
            RouteDecision::Template { .. } => &self.counters.template_hits,
            RouteDecision::Refuse(_) => &self.counters.refusals,
            RouteDecision::External(_) => &self.counters.external_routes,
            RouteDecision::Model { tier, .. } => match tier {
                ModelTier::Fast => &self.counters.fast_routes,
                ModelTier::Balanced => &self.counters.balanced_routes,
                ModelTier::Deep => &self.counters.deep_routes,
            },
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stats(&self) -> RouterStats {
        let negatives = self.negative_count();
        RouterStats {
            template_hits: self.counters.template_hits.load(Ordering::Relaxed),
            refusals: self.counters.refusals.load(Ordering::Relaxed),
            fast_routes: self.counters.fast_routes.load(Ordering::Relaxed),
            balanced_routes: self.counters.balanced_routes.load(Ordering::Relaxed),
            deep_routes: self.counters.deep_routes.load(Ordering::Relaxed),
            external_routes: self.counters.external_routes.load(Ordering::Relaxed),
            feedback_negatives: negatives,
            bias_active: negatives >= self.config.feedback_min_negatives,
        }
    }
}

impl Default for TripartiteRouter {
    fn default() -> Self {
        Self::new(
            TemplateEngine::new(&voice_router_config::TemplateCatalogue::default()),
            RefusalClassifier::default(),
            RouterConfig::default(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use voice_router_core::{Language, RefusalReason};

    fn utt(text: &str) -> Utterance {
        Utterance::new(text, Language::Es)
    }

    #[test]
    fn test_template_stage_wins() {
        let router = TripartiteRouter::default();
        match router.route(&utt("hola")) {
            RouteDecision::Template { category, reply } => {
                assert_eq!(category, "greetings");
                assert!(!reply.is_empty());
            }
            other => panic!("expected template, got {:?}", other),
        }
        assert_eq!(router.stats().template_hits, 1);
    }

    #[test]
    fn test_refusal_stage_bypasses_generation() {
        let router = TripartiteRouter::default();
        assert_eq!(
            router.route(&utt("cuál es mi contraseña")),
            RouteDecision::Refuse(RefusalReason::PrivateInfo)
        );
        assert_eq!(router.stats().refusals, 1);
    }

    #[test]
    fn test_factual_question_routes_balanced() {
        let router = TripartiteRouter::default();
        match router.route(&utt("¿Cuál es la capital de Francia?")) {
            RouteDecision::Model {
                tier, reasoning, ..
            } => {
                assert_eq!(tier, ModelTier::Balanced);
                assert_eq!(reasoning, ReasoningMode::Off);
            }
            other => panic!("expected model, got {:?}", other),
        }
    }

    #[test]
    fn test_analytical_prompt_routes_deep_with_reasoning() {
        let router = TripartiteRouter::default();
        match router.route(&utt(
            "Analiza y compara la arquitectura de ambos sistemas paso a paso",
        )) {
            RouteDecision::Model {
                tier, reasoning, ..
            } => {
                assert_eq!(tier, ModelTier::Deep);
                assert_eq!(reasoning, ReasoningMode::On);
            }
            other => panic!("expected model, got {:?}", other),
        }
    }

    #[test]
    fn test_web_score_overrides_tier() {
        let router = TripartiteRouter::default();
        assert_eq!(
            router.route(&utt("busca las últimas noticias de hoy")),
            RouteDecision::External(ExternalKind::WebSearch)
        );
    }

    #[test]
    fn test_empathic_flag() {
        let router = TripartiteRouter::default();
        match router.route(&utt("me siento muy triste y solo hoy")) {
            RouteDecision::Model { empathic, .. } => assert!(empathic),
            other => panic!("expected model, got {:?}", other),
        }
    }

    #[test]
    fn test_feedback_bias_requires_ten_negatives() {
        let router = TripartiteRouter::default();
        for _ in 0..9 {
            router.record_feedback(RouteFeedback {
                positive: false,
                tier: Some(ModelTier::Fast),
            });
        }
        assert!(!router.stats().bias_active);
        router.record_feedback(RouteFeedback {
            positive: false,
            tier: Some(ModelTier::Fast),
        });
        assert!(router.stats().bias_active);
    }

    #[test]
    fn test_feedback_buffer_is_bounded() {
        let router = TripartiteRouter::default();
        for _ in 0..500 {
            router.record_feedback(RouteFeedback {
                positive: true,
                tier: None,
            });
        }
        assert!(router.feedback.lock().len() <= 200);
    }

    #[test]
    fn test_preview_does_not_touch_counters() {
        let router = TripartiteRouter::default();
        let preview = router.preview(&utt("hola"));
        assert!(matches!(preview.decision, RouteDecision::Template { .. }));
        assert!(preview.confidence >= 0.6);
        assert_eq!(router.stats().template_hits, 0);
    }
}
