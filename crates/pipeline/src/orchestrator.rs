//! Pipeline orchestrator
//!
//! Single public entry `process(utterance, produce_audio)`. Threads the
//! router stages, pipes generated text through the sentence splitter into
//! the TTS queue, mediates interruption and silence events, and
//! aggregates per-turn latencies. At most one response is active per
//! correlation id; a newer utterance with the same correlation cancels
//! the older turn.

use dashmap::DashMap;
use futures::StreamExt;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;
use uuid::Uuid;

use voice_router_config::Settings;
use voice_router_core::{
    CancellationToken, ExternalKind, GenerateRequest, Language, ModelTier, ReasoningMode,
    RefusalReason, Result, RouteDecision, SynthesisBackend, Utterance,
};
use voice_router_llm::ModelPool;
use voice_router_persistence::{SafeMode, VoiceInteractionAudit, VoiceInteractionRecord};
use voice_router_routing::{
    EagerInputProcessor, EagerState, RefusalClassifier, TemplateEngine, TripartiteRouter,
};

use crate::filler::FillerLibrary;
use crate::monitor::{ActiveListeningMonitor, InterruptionEvent, SilenceGapMonitor, SilenceEvent};
use crate::tts::{
    Priority, QueueEvent, SentenceSplitter, StreamingSplitter, StubSynthesizer, TtsQueue,
};

/// Named interface to the external web-search collaborator
#[async_trait::async_trait]
pub trait WebSearch: Send + Sync + 'static {
    /// Search and summarize; the summary is spoken as the reply
    async fn search(&self, query: &str, cancel: CancellationToken) -> Result<String>;
}

/// Events published by the orchestrator
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    IntentPredicted {
        correlation_id: Uuid,
        intent: String,
        confidence: f64,
    },
    RouteDecided {
        correlation_id: Uuid,
        route: &'static str,
    },
    TextChunk {
        correlation_id: Uuid,
        delta: String,
    },
    Refusal {
        correlation_id: Uuid,
        reason: RefusalReason,
        text: String,
    },
    AudioChunk {
        ordinal: u64,
        bytes: Arc<[u8]>,
        duration: Duration,
    },
    SentenceComplete {
        ordinal: u64,
        gap_ms: Option<u64>,
    },
    SilenceDetected(SilenceEvent),
    InterruptionDetected(InterruptionEvent),
    FallbackUsed {
        requested: String,
        served_by: String,
    },
    Underrun {
        ordinal: u64,
    },
}

/// Per-turn latency accounting (milliseconds)
#[derive(Debug, Clone, Copy, Default)]
pub struct LatencyBreakdown {
    pub classify_ms: u64,
    pub route_ms: u64,
    pub generate_ms: u64,
    /// Time to first synthesized audio for this turn
    pub synth_total_ms: u64,
}

/// Result of one processed turn
#[derive(Debug, Clone)]
pub struct ProcessOutcome {
    /// `None` only for input errors (clarification replies)
    pub route: Option<RouteDecision>,
    pub text: String,
    pub latencies: LatencyBreakdown,
    pub correlation_id: Uuid,
}

/// Aggregate observability snapshot
#[derive(Debug, Clone)]
pub struct PipelineStats {
    pub router: voice_router_routing::RouterStats,
    pub queue: crate::tts::QueueStats,
    pub pool: voice_router_llm::PoolStats,
    pub silence: crate::monitor::SilenceStats,
    pub eager: voice_router_routing::EagerStats,
    pub safe_mode_active: bool,
}

/// Builder wiring the orchestrator's collaborators
pub struct OrchestratorBuilder {
    settings: Settings,
    pool: Arc<ModelPool>,
    synthesizer: Option<Arc<dyn SynthesisBackend>>,
    listening: Option<Arc<ActiveListeningMonitor>>,
    web: Option<Arc<dyn WebSearch>>,
    voice_audit: Option<Arc<VoiceInteractionAudit>>,
    safe_mode: SafeMode,
}

impl OrchestratorBuilder {
    pub fn new(settings: Settings, pool: Arc<ModelPool>) -> Self {
        Self {
            settings,
            pool,
            synthesizer: None,
            listening: None,
            web: None,
            voice_audit: None,
            safe_mode: SafeMode::new(),
        }
    }

    pub fn with_synthesizer(mut self, synthesizer: Arc<dyn SynthesisBackend>) -> Self {
        self.synthesizer = Some(synthesizer);
        self
    }

    pub fn with_listening(mut self, monitor: Arc<ActiveListeningMonitor>) -> Self {
        self.listening = Some(monitor);
        self
    }

    pub fn with_web_search(mut self, web: Arc<dyn WebSearch>) -> Self {
        self.web = Some(web);
        self
    }

    pub fn with_voice_audit(mut self, audit: Arc<VoiceInteractionAudit>) -> Self {
        self.voice_audit = Some(audit);
        self
    }

    pub fn with_safe_mode(mut self, safe_mode: SafeMode) -> Self {
        self.safe_mode = safe_mode;
        self
    }

    pub fn build(self) -> Arc<Orchestrator> {
        let router = Arc::new(TripartiteRouter::new(
            TemplateEngine::new(&self.settings.catalogue),
            RefusalClassifier::new(self.settings.unknown_patterns.clone()),
            self.settings.router.clone(),
        ));

        let eager = EagerInputProcessor::new(router.clone(), self.settings.eager.clone())
            .with_prewarm(Arc::new(voice_router_llm::PoolPrewarm(self.pool.clone())));

        let synthesizer = self
            .synthesizer
            .unwrap_or_else(|| Arc::new(StubSynthesizer::new(Duration::from_millis(50))));
        let queue = TtsQueue::new(self.settings.queue.clone(), synthesizer);

        let silence = Arc::new(SilenceGapMonitor::new(self.settings.silence.clone()));
        let (event_tx, _) = broadcast::channel(1024);

        Arc::new(Orchestrator {
            settings: self.settings,
            router,
            eager,
            pool: self.pool,
            queue,
            silence,
            listening: self.listening,
            web: self.web,
            voice_audit: self.voice_audit,
            fillers: FillerLibrary::new(),
            safe_mode: self.safe_mode,
            turns: DashMap::new(),
            event_tx,
            tasks: Mutex::new(Vec::new()),
        })
    }
}

/// Composes routing, generation, synthesis, and monitoring for one
/// conversation endpoint.
pub struct Orchestrator {
    settings: Settings,
    router: Arc<TripartiteRouter>,
    eager: EagerInputProcessor,
    pool: Arc<ModelPool>,
    queue: Arc<TtsQueue>,
    silence: Arc<SilenceGapMonitor>,
    listening: Option<Arc<ActiveListeningMonitor>>,
    web: Option<Arc<dyn WebSearch>>,
    voice_audit: Option<Arc<VoiceInteractionAudit>>,
    fillers: FillerLibrary,
    safe_mode: SafeMode,
    turns: DashMap<Uuid, CancellationToken>,
    event_tx: broadcast::Sender<PipelineEvent>,
    tasks: Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl Orchestrator {
    /// Subscribe to pipeline events
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.event_tx.subscribe()
    }

    pub fn router(&self) -> &Arc<TripartiteRouter> {
        &self.router
    }

    pub fn queue(&self) -> &Arc<TtsQueue> {
        &self.queue
    }

    pub fn silence_monitor(&self) -> &Arc<SilenceGapMonitor> {
        &self.silence
    }

    pub fn safe_mode(&self) -> &SafeMode {
        &self.safe_mode
    }

    /// Aggregate stats snapshot across all components
    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            router: self.router.stats(),
            queue: self.queue.stats(),
            pool: self.pool.stats(),
            silence: self.silence.stats(),
            eager: self.eager.stats(),
            safe_mode_active: self.safe_mode.is_active(),
        }
    }

    /// Start the queue, sweeper, monitors, and event forwarding; idempotent
    pub fn start(self: &Arc<Self>) {
        {
            let tasks = self.tasks.lock();
            if !tasks.is_empty() {
                return;
            }
        }
        self.queue.start();
        self.pool.start_sweeper();
        if let Some(listening) = &self.listening {
            listening.start();
        }

        let mut tasks = self.tasks.lock();
        tasks.push(self.spawn_queue_forwarder());
        tasks.push(self.spawn_degradation_forwarder());
        tasks.push(self.spawn_intent_forwarder());
        if self.listening.is_some() {
            tasks.push(self.spawn_interruption_forwarder());
        }
        tracing::info!("Pipeline started");
    }

    /// Stop everything; idempotent
    pub async fn stop(&self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        if let Some(listening) = &self.listening {
            listening.stop();
        }
        self.queue.stop(true).await;
        self.pool.stop_sweeper();
        for entry in self.turns.iter() {
            entry.value().cancel();
        }
        self.turns.clear();
        tracing::info!("Pipeline stopped");
    }

    /// Feed a partial transcript to the eager processor
    pub fn process_partial(&self, utterance: &Utterance) -> EagerState {
        self.eager.on_partial(utterance)
    }

    /// Process one finalized utterance
    pub async fn process(
        &self,
        utterance: Utterance,
        produce_audio: bool,
    ) -> Result<ProcessOutcome> {
        let correlation_id = utterance.correlation_id;

        // Input errors short-circuit with a clarification reply.
        if utterance.is_blank()
            || utterance.text.chars().count() > self.settings.generation.max_utterance_chars
        {
            tracing::debug!(correlation = %correlation_id, "Input error, asking for clarification");
            return Ok(ProcessOutcome {
                route: None,
                text: clarification_reply(&utterance.language).to_string(),
                latencies: LatencyBreakdown::default(),
                correlation_id,
            });
        }

        // At most one active response per correlation id.
        let token = CancellationToken::new();
        if let Some(older) = self.turns.insert(correlation_id, token.clone()) {
            tracing::debug!(correlation = %correlation_id, "Cancelling superseded turn");
            older.cancel();
        }

        self.eager.on_final(&utterance);

        let outcome = self
            .run_turn(&utterance, produce_audio, token.clone())
            .await;

        // Only remove the registry entry if it is still ours.
        self.turns
            .remove_if(&correlation_id, |_, stored| stored.same(&token));

        let outcome = outcome?;
        self.audit_turn(&utterance, &outcome);
        Ok(outcome)
    }

    async fn run_turn(
        &self,
        utterance: &Utterance,
        produce_audio: bool,
        token: CancellationToken,
    ) -> Result<ProcessOutcome> {
        let correlation_id = utterance.correlation_id;
        let classify_started = Instant::now();

        // Template and classifier stages run under the classifier budget;
        // a timeout degrades to the balanced tier instead of failing.
        let budget = Duration::from_millis(
            self.settings.generation.classifier_timeout_ms
                + self.settings.generation.template_timeout_ms,
        );
        let route = match tokio::time::timeout(budget, async {
            self.router.route(utterance)
        })
        .await
        {
            Ok(route) => route,
            Err(_) => {
                tracing::warn!(correlation = %correlation_id, "Classifier deadline exceeded");
                RouteDecision::model(ModelTier::Balanced, ReasoningMode::Off)
            }
        };
        let route_ms = classify_started.elapsed().as_millis() as u64;

        let _ = self.event_tx.send(PipelineEvent::RouteDecided {
            correlation_id,
            route: route.label(),
        });

        let mut latencies = LatencyBreakdown {
            classify_ms: route_ms,
            route_ms,
            ..Default::default()
        };

        let text = match &route {
            RouteDecision::Template { category, reply } => {
                tracing::debug!(correlation = %correlation_id, category, "Template hit");
                let reply = reply.clone();
                if produce_audio {
                    self.speak_text(&reply, &utterance.language, &mut latencies, &token)
                        .await;
                }
                reply
            }

            RouteDecision::Refuse(reason) => {
                let text = refusal_reply(*reason, &utterance.language).to_string();
                let _ = self.event_tx.send(PipelineEvent::Refusal {
                    correlation_id,
                    reason: *reason,
                    text: text.clone(),
                });
                text
            }

            RouteDecision::External(ExternalKind::WebSearch) => {
                self.run_web_search(utterance, produce_audio, &mut latencies, &token)
                    .await
            }

            RouteDecision::External(ExternalKind::ToolCall) => {
                // No tool runtime attached; answer from the balanced tier.
                self.run_generation(
                    utterance,
                    ModelTier::Balanced,
                    ReasoningMode::Off,
                    false,
                    produce_audio,
                    &mut latencies,
                    &token,
                )
                .await
            }

            RouteDecision::Model {
                tier,
                reasoning,
                empathic,
            } => {
                self.run_generation(
                    utterance,
                    *tier,
                    *reasoning,
                    *empathic,
                    produce_audio,
                    &mut latencies,
                    &token,
                )
                .await
            }
        };

        Ok(ProcessOutcome {
            route: Some(route),
            text,
            latencies,
            correlation_id,
        })
    }

    /// Degraded mode refuses web-search routes with a canned safety reply;
    /// otherwise the external collaborator answers, falling back to the
    /// balanced tier when it is absent or fails.
    async fn run_web_search(
        &self,
        utterance: &Utterance,
        produce_audio: bool,
        latencies: &mut LatencyBreakdown,
        token: &CancellationToken,
    ) -> String {
        let correlation_id = utterance.correlation_id;

        if self.safe_mode.is_active() {
            tracing::warn!(correlation = %correlation_id, "Safe mode: refusing web search");
            let text = safety_reply(&utterance.language).to_string();
            let _ = self.event_tx.send(PipelineEvent::Refusal {
                correlation_id,
                reason: RefusalReason::Unsafe,
                text: text.clone(),
            });
            return text;
        }

        if let Some(web) = &self.web {
            let deadline = Duration::from_millis(self.settings.generation.web_search_timeout_ms);
            let started = Instant::now();
            match tokio::time::timeout(deadline, web.search(&utterance.text, token.clone())).await
            {
                Ok(Ok(summary)) => {
                    latencies.generate_ms = started.elapsed().as_millis() as u64;
                    if produce_audio {
                        self.speak_text(&summary, &utterance.language, latencies, token)
                            .await;
                    }
                    return summary;
                }
                Ok(Err(e)) => {
                    tracing::warn!(correlation = %correlation_id, error = %e, "Web search failed");
                }
                Err(_) => {
                    tracing::warn!(correlation = %correlation_id, "Web search timed out");
                }
            }
        } else {
            tracing::debug!(correlation = %correlation_id, "No web collaborator; using balanced tier");
        }

        self.run_generation(
            utterance,
            ModelTier::Balanced,
            ReasoningMode::Off,
            false,
            produce_audio,
            latencies,
            token,
        )
        .await
    }

    /// Stream a generation through the splitter into the queue
    #[allow(clippy::too_many_arguments)]
    async fn run_generation(
        &self,
        utterance: &Utterance,
        tier: ModelTier,
        reasoning: ReasoningMode,
        empathic: bool,
        produce_audio: bool,
        latencies: &mut LatencyBreakdown,
        token: &CancellationToken,
    ) -> String {
        let correlation_id = utterance.correlation_id;
        let mut system = self.settings.generation.system_prompt.clone();
        if empathic {
            system.push_str(" Responde con calidez y empatía.");
        }

        let request = GenerateRequest::new(utterance.text.clone())
            .with_system(system)
            .with_reasoning(reasoning);

        // Generation gets its own token so a deadline does not cancel
        // queued audio; the turn token still cancels generation.
        let gen_token = CancellationToken::new();
        let deadline = tier.generation_timeout();
        let started = Instant::now();

        let stream = tokio::select! {
            r = tokio::time::timeout(
                deadline,
                self.pool
                    .generate_stream_with_fallback(tier.model_name(), request, gen_token.clone()),
            ) => r,
            _ = token.cancelled() => {
                gen_token.cancel();
                return String::new();
            }
        };

        let (served_by, mut stream) = match stream {
            Ok(Ok(pair)) => pair,
            Ok(Err(e)) => {
                tracing::error!(correlation = %correlation_id, error = %e, "Generation unavailable");
                return safety_reply(&utterance.language).to_string();
            }
            Err(_) => {
                gen_token.cancel();
                tracing::error!(correlation = %correlation_id, tier = %tier, "Generation timed out");
                return safety_reply(&utterance.language).to_string();
            }
        };
        tracing::debug!(correlation = %correlation_id, model = %served_by, "Generation streaming");

        let splitter = SentenceSplitter::new(
            &utterance.language,
            self.settings.splitter.chars_per_second,
        );
        let mut streaming = StreamingSplitter::new(splitter);
        let mut full_text = String::new();
        let mut audio_rx = produce_audio.then(|| self.queue.subscribe());
        let mut turn_jobs: std::collections::HashSet<Uuid> = std::collections::HashSet::new();

        loop {
            let remaining = deadline.saturating_sub(started.elapsed());
            let next = tokio::select! {
                n = tokio::time::timeout(remaining, stream.next()) => n,
                _ = token.cancelled() => {
                    gen_token.cancel();
                    break;
                }
            };
            match next {
                Ok(Some(Ok(chunk))) => {
                    full_text.push_str(&chunk.delta);
                    let _ = self.event_tx.send(PipelineEvent::TextChunk {
                        correlation_id,
                        delta: chunk.delta.clone(),
                    });
                    if produce_audio {
                        for sentence in streaming.push(&chunk.delta) {
                            if let Some(id) =
                                self.enqueue_sentence(&sentence, Priority::Normal).await
                            {
                                turn_jobs.insert(id);
                            }
                        }
                    }
                    if chunk.is_final {
                        break;
                    }
                }
                Ok(Some(Err(e))) => {
                    tracing::warn!(correlation = %correlation_id, error = %e, "Stream error; truncating");
                    break;
                }
                Ok(None) => break,
                Err(_) => {
                    gen_token.cancel();
                    tracing::warn!(correlation = %correlation_id, "Generation deadline hit mid-stream");
                    break;
                }
            }
        }

        latencies.generate_ms = started.elapsed().as_millis() as u64;

        if full_text.trim().is_empty() {
            if token.is_cancelled() {
                return String::new();
            }
            return safety_reply(&utterance.language).to_string();
        }

        // A cancelled turn must not emit any further audio.
        if produce_audio && !token.is_cancelled() {
            if let Some(tail) = streaming.finish() {
                if let Some(id) = self.enqueue_sentence(&tail, Priority::Normal).await {
                    turn_jobs.insert(id);
                }
            }
            if let Some(rx) = audio_rx.take() {
                self.wait_first_audio(rx, &turn_jobs, latencies, token).await;
            }
        }

        full_text
    }

    /// Speak one complete text (template replies, web summaries)
    async fn speak_text(
        &self,
        text: &str,
        language: &Language,
        latencies: &mut LatencyBreakdown,
        token: &CancellationToken,
    ) {
        let rx = self.queue.subscribe();
        let splitter =
            SentenceSplitter::new(language, self.settings.splitter.chars_per_second);
        let mut turn_jobs = std::collections::HashSet::new();
        for sentence in splitter.split(text) {
            if let Some(id) = self.enqueue_sentence(&sentence, Priority::High).await {
                turn_jobs.insert(id);
            }
        }
        self.wait_first_audio(rx, &turn_jobs, latencies, token).await;
    }

    async fn enqueue_sentence(
        &self,
        sentence: &crate::tts::Sentence,
        priority: Priority,
    ) -> Option<Uuid> {
        match self
            .queue
            .enqueue_sentence_wait(sentence, priority, 1.0)
            .await
        {
            Ok(id) => Some(id),
            Err(e) => {
                tracing::warn!(error = %e, ordinal = sentence.ordinal, "Failed to enqueue sentence");
                None
            }
        }
    }

    /// Block until the first audio chunk of this turn is flowing, so the
    /// caller observes `synth_total_ms` and at least one chunk.
    async fn wait_first_audio(
        &self,
        mut rx: broadcast::Receiver<QueueEvent>,
        turn_jobs: &std::collections::HashSet<Uuid>,
        latencies: &mut LatencyBreakdown,
        token: &CancellationToken,
    ) {
        if turn_jobs.is_empty() {
            return;
        }
        let deadline = Duration::from_millis(self.settings.queue.synthesis_timeout_ms);
        let started = Instant::now();
        loop {
            let event = tokio::select! {
                e = tokio::time::timeout(deadline, rx.recv()) => e,
                _ = token.cancelled() => return,
            };
            match event {
                Ok(Ok(QueueEvent::AudioChunk { job_id, .. })) if turn_jobs.contains(&job_id) => {
                    latencies.synth_total_ms = started.elapsed().as_millis() as u64;
                    return;
                }
                Ok(Ok(QueueEvent::Underrun { job_id, .. })) if turn_jobs.contains(&job_id) => {
                    return;
                }
                Ok(Ok(_)) => continue,
                Err(_) => return,
                Ok(Err(broadcast::error::RecvError::Lagged(_))) => continue,
                Ok(Err(broadcast::error::RecvError::Closed)) => return,
            }
        }
    }

    fn audit_turn(&self, utterance: &Utterance, outcome: &ProcessOutcome) {
        let Some(audit) = &self.voice_audit else {
            return;
        };
        let route = outcome
            .route
            .as_ref()
            .map(|r| r.label())
            .unwrap_or("input_error");
        let record = VoiceInteractionRecord::new(
            outcome.correlation_id.to_string(),
            route,
            &utterance.text,
            &outcome.text,
        );
        if let Err(e) = audit.log_interaction(&record) {
            tracing::error!(error = %e, "Voice audit append failed");
        }
    }

    // =========================================================================
    // Event forwarding
    // =========================================================================

    fn spawn_queue_forwarder(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let orchestrator = Arc::clone(self);
        tokio::spawn(async move {
            let mut rx = orchestrator.queue.subscribe();
            loop {
                match rx.recv().await {
                    Ok(QueueEvent::AudioChunk {
                        ordinal,
                        bytes,
                        duration,
                        ..
                    }) => {
                        let _ = orchestrator.event_tx.send(PipelineEvent::AudioChunk {
                            ordinal,
                            bytes,
                            duration,
                        });
                    }
                    Ok(QueueEvent::SentenceComplete {
                        ordinal, gap_ms, ..
                    }) => {
                        let _ = orchestrator
                            .event_tx
                            .send(PipelineEvent::SentenceComplete { ordinal, gap_ms });
                        if let Some(gap) = gap_ms {
                            orchestrator.observe_gap(ordinal, gap);
                        }
                    }
                    Ok(QueueEvent::Underrun { ordinal, .. }) => {
                        let _ = orchestrator
                            .event_tx
                            .send(PipelineEvent::Underrun { ordinal });
                        // A skipped sentence leaves a hole; cover it.
                        orchestrator.play_filler();
                    }
                    Ok(QueueEvent::Drained) => {}
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    fn observe_gap(&self, ordinal: u64, gap_ms: u64) {
        let context = format!("sentence_{} → sentence_{}", ordinal.saturating_sub(1), ordinal);
        let event = self
            .silence
            .observe_gap(Duration::from_millis(gap_ms), &context);
        let should_fill = event.should_fill;
        let _ = self.event_tx.send(PipelineEvent::SilenceDetected(event));
        if should_fill {
            self.play_filler();
        }
    }

    fn play_filler(&self) {
        let language = Language::from_tag(&self.settings.language);
        let phrase = self.fillers.next(&language);
        if let Err(e) = self.queue.enqueue(phrase, Priority::Critical, 1.0) {
            tracing::debug!(error = %e, "Filler enqueue failed");
        }
    }

    fn spawn_degradation_forwarder(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let orchestrator = Arc::clone(self);
        tokio::spawn(async move {
            let mut rx = orchestrator.pool.subscribe_degradations();
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        let _ = orchestrator.event_tx.send(PipelineEvent::FallbackUsed {
                            requested: event.requested,
                            served_by: event.served_by,
                        });
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    fn spawn_intent_forwarder(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let orchestrator = Arc::clone(self);
        tokio::spawn(async move {
            let mut rx = orchestrator.eager.subscribe();
            loop {
                match rx.recv().await {
                    Ok(prediction) => {
                        let _ = orchestrator.event_tx.send(PipelineEvent::IntentPredicted {
                            correlation_id: prediction.correlation_id,
                            intent: prediction.intent,
                            confidence: prediction.confidence,
                        });
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    /// Urgent interruptions cancel generation and all queued audio after
    /// the current sentence, within the 50 ms budget.
    fn spawn_interruption_forwarder(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let orchestrator = Arc::clone(self);
        let listening = self
            .listening
            .as_ref()
            .expect("interruption forwarder requires a listening monitor")
            .clone();
        tokio::spawn(async move {
            let mut rx = listening.subscribe();
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        let should_stop = event.should_stop;
                        let _ = orchestrator
                            .event_tx
                            .send(PipelineEvent::InterruptionDetected(event));
                        if should_stop {
                            orchestrator.interrupt_all();
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    /// Cancel every active turn's generation and all audio after the
    /// currently playing sentence
    pub fn interrupt_all(&self) {
        for entry in self.turns.iter() {
            entry.value().cancel();
        }
        let cancelled = self.queue.cancel_after_current();
        tracing::info!(cancelled, "Interruption: cancelled pending playback");
    }
}

fn clarification_reply(language: &Language) -> &'static str {
    match language {
        Language::En => "I didn't quite catch that, could you say it again?",
        _ => "No te he entendido bien, ¿puedes repetirlo?",
    }
}

fn safety_reply(language: &Language) -> &'static str {
    match language {
        Language::En => "I can't help with that right now, but I'm still here for anything else.",
        _ => "Ahora mismo no puedo ayudarte con eso, pero sigo aquí para lo demás.",
    }
}

fn refusal_reply(reason: RefusalReason, language: &Language) -> &'static str {
    match (reason, language) {
        (RefusalReason::FutureEvent, Language::En) => {
            "I can't predict future events, so I'd rather not guess."
        }
        (RefusalReason::FutureEvent, _) => {
            "No puedo predecir eventos futuros, así que prefiero no aventurar una respuesta."
        }
        (RefusalReason::PrivateInfo, Language::En) => {
            "I don't have access to private data like that, and I wouldn't share it if I did."
        }
        (RefusalReason::PrivateInfo, _) => {
            "No tengo acceso a datos privados como ese, y no podría compartirlos."
        }
        (RefusalReason::HallucinationRisk, Language::En) => {
            "I don't keep a memory of past conversations, so I can't answer that reliably."
        }
        (RefusalReason::HallucinationRisk, _) => {
            "No guardo memoria de conversaciones pasadas, así que no puedo responder eso con fiabilidad."
        }
        (RefusalReason::Unsafe, Language::En) => "I can't help with that request.",
        (RefusalReason::Unsafe, _) => "No puedo ayudarte con esa petición.",
        (RefusalReason::Nonsense, Language::En) => {
            "I couldn't make sense of that, could you rephrase it?"
        }
        (RefusalReason::Nonsense, _) => "No he podido entender eso, ¿puedes reformularlo?",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reply_catalogues_cover_both_languages() {
        for reason in [
            RefusalReason::FutureEvent,
            RefusalReason::PrivateInfo,
            RefusalReason::HallucinationRisk,
            RefusalReason::Unsafe,
            RefusalReason::Nonsense,
        ] {
            assert!(!refusal_reply(reason, &Language::Es).is_empty());
            assert!(!refusal_reply(reason, &Language::En).is_empty());
        }
        assert_ne!(
            clarification_reply(&Language::Es),
            clarification_reply(&Language::En)
        );
        assert_ne!(safety_reply(&Language::Es), safety_reply(&Language::En));
    }
}
