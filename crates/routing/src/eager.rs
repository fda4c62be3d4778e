//! Eager input processor
//!
//! Consumes partial transcripts while the user is still speaking. Once
//! three or more words have arrived it asks the router for a no-commit
//! preview; confident predictions emit an `intent_predicted` event, build
//! a context object, and hint the model pool to prewarm the likely tier.
//! On finalization the prediction is verified against the final intent
//! and accuracy counters are updated. Never commits a response.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::broadcast;

use voice_router_config::EagerConfig;
use voice_router_core::{ModelPrewarm, RouteDecision, Utterance};

use crate::router::TripartiteRouter;

/// Processing stage, idle through ready
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EagerStage {
    Idle,
    Listening,
    IntentPredicted,
    ContextReady,
    Ready,
}

/// Context prepared ahead of finalization
#[derive(Debug, Clone)]
pub struct EagerContext {
    pub intent: String,
    pub partial_text: String,
    pub word_count: usize,
    pub prepared_at: Instant,
}

/// Published when a confident prediction lands
#[derive(Debug, Clone)]
pub struct IntentPrediction {
    pub intent: String,
    pub confidence: f64,
    pub correlation_id: uuid::Uuid,
}

/// Current processor state snapshot
#[derive(Debug, Clone)]
pub struct EagerState {
    pub stage: EagerStage,
    pub partial_text: String,
    pub predicted_intent: Option<String>,
    pub confidence: f64,
    pub context: Option<EagerContext>,
}

impl EagerState {
    fn idle() -> Self {
        Self {
            stage: EagerStage::Idle,
            partial_text: String::new(),
            predicted_intent: None,
            confidence: 0.0,
            context: None,
        }
    }
}

/// Accuracy counters
#[derive(Debug, Clone, Default)]
pub struct EagerStats {
    pub total_updates: u64,
    pub predictions: u64,
    pub correct_predictions: u64,
    pub prewarms_requested: u64,
}

impl EagerStats {
    pub fn accuracy(&self) -> f64 {
        if self.predictions == 0 {
            return 0.0;
        }
        self.correct_predictions as f64 / self.predictions as f64
    }
}

/// Incremental processor over partial transcripts
pub struct EagerInputProcessor {
    router: Arc<TripartiteRouter>,
    prewarm: Option<Arc<dyn ModelPrewarm>>,
    config: EagerConfig,
    state: Mutex<EagerState>,
    stats: Mutex<EagerStats>,
    intent_tx: broadcast::Sender<IntentPrediction>,
}

impl EagerInputProcessor {
    pub fn new(router: Arc<TripartiteRouter>, config: EagerConfig) -> Self {
        let (intent_tx, _) = broadcast::channel(64);
        Self {
            router,
            prewarm: None,
            config,
            state: Mutex::new(EagerState::idle()),
            stats: Mutex::new(EagerStats::default()),
            intent_tx,
        }
    }

    /// Attach a prewarm sink (the model pool)
    pub fn with_prewarm(mut self, prewarm: Arc<dyn ModelPrewarm>) -> Self {
        self.prewarm = Some(prewarm);
        self
    }

    /// Subscribe to `intent_predicted` events
    pub fn subscribe(&self) -> broadcast::Receiver<IntentPrediction> {
        self.intent_tx.subscribe()
    }

    /// Feed a partial transcript; returns the updated state snapshot
    pub fn on_partial(&self, utterance: &Utterance) -> EagerState {
        self.stats.lock().total_updates += 1;

        {
            let mut state = self.state.lock();
            state.partial_text = utterance.text.clone();
            if state.stage == EagerStage::Idle {
                state.stage = EagerStage::Listening;
            }
        }

        if utterance.word_count() < self.config.min_words {
            return self.state.lock().clone();
        }

        let preview = self.router.preview(utterance);
        if preview.confidence < self.config.confidence_threshold {
            return self.state.lock().clone();
        }

        let intent = intent_label(&preview.decision);
        let already_predicted = {
            let state = self.state.lock();
            state.predicted_intent.as_deref() == Some(intent.as_str())
        };

        {
            let mut state = self.state.lock();
            state.predicted_intent = Some(intent.clone());
            state.confidence = preview.confidence;
            state.stage = EagerStage::IntentPredicted;
            state.context = Some(EagerContext {
                intent: intent.clone(),
                partial_text: utterance.text.clone(),
                word_count: utterance.word_count(),
                prepared_at: Instant::now(),
            });
            state.stage = EagerStage::ContextReady;
        }

        if !already_predicted {
            self.stats.lock().predictions += 1;
            tracing::info!(
                intent = %intent,
                confidence = preview.confidence,
                correlation = %utterance.correlation_id,
                "Intent predicted from partial transcript"
            );
            let _ = self.intent_tx.send(IntentPrediction {
                intent: intent.clone(),
                confidence: preview.confidence,
                correlation_id: utterance.correlation_id,
            });
            self.maybe_prewarm(&preview.decision);
        }

        self.state.lock().clone()
    }

    /// Feed the final transcript; verifies the prediction, returns the
    /// final state
    pub fn on_final(&self, utterance: &Utterance) -> EagerState {
        let preview = self.router.preview(utterance);
        let actual = intent_label(&preview.decision);

        let mut state = self.state.lock();
        state.partial_text = utterance.text.clone();

        if let Some(predicted) = state.predicted_intent.clone() {
            if predicted == actual {
                self.stats.lock().correct_predictions += 1;
            } else {
                tracing::debug!(
                    predicted = %predicted,
                    actual = %actual,
                    "Intent changed on finalization"
                );
                state.predicted_intent = Some(actual);
                state.confidence = preview.confidence;
            }
        }

        state.stage = EagerStage::Ready;
        state.clone()
    }

    /// Reset for a new turn
    pub fn reset(&self) {
        *self.state.lock() = EagerState::idle();
    }

    pub fn stats(&self) -> EagerStats {
        self.stats.lock().clone()
    }

    fn maybe_prewarm(&self, decision: &RouteDecision) {
        let Some(prewarm) = &self.prewarm else {
            return;
        };
        if let RouteDecision::Model { tier, .. } = decision {
            prewarm.prewarm(tier.model_name());
            self.stats.lock().prewarms_requested += 1;
        }
    }
}

/// Stable intent label for a preview decision
fn intent_label(decision: &RouteDecision) -> String {
    match decision {
        RouteDecision::Template { category, .. } => format!("template:{category}"),
        RouteDecision::Model { tier, .. } => format!("model:{tier}"),
        RouteDecision::Refuse(reason) => format!("refuse:{reason:?}"),
        RouteDecision::External(kind) => format!("external:{kind:?}"),
    }
}
