//! End-to-end pipeline scenarios against stub backends

use std::sync::Arc;
use std::time::Duration;

use voice_router_config::Settings;
use voice_router_core::{Language, ModelTier, ReasoningMode, RefusalReason, RouteDecision, Utterance};
use voice_router_llm::{ModelPool, StubFactory};
use voice_router_pipeline::{
    Orchestrator, OrchestratorBuilder, PipelineEvent, StubSynthesizer,
};
use voice_router_persistence::SafeMode;

struct Harness {
    orchestrator: Arc<Orchestrator>,
    factory: Arc<StubFactory>,
    safe_mode: SafeMode,
}

fn harness_with(reply: &str, generation_latency: Duration) -> Harness {
    let factory = Arc::new(StubFactory::new(generation_latency, reply));
    let pool = ModelPool::new(Settings::default().pool, factory.clone());
    let safe_mode = SafeMode::new();
    let orchestrator = OrchestratorBuilder::new(Settings::default(), pool)
        .with_synthesizer(Arc::new(StubSynthesizer::new(Duration::from_millis(100))))
        .with_safe_mode(safe_mode.clone())
        .build();
    orchestrator.start();
    Harness {
        orchestrator,
        factory,
        safe_mode,
    }
}

fn es(text: &str) -> Utterance {
    Utterance::new(text, Language::Es)
}

#[tokio::test(start_paused = true)]
async fn test_greeting_is_answered_from_the_catalogue() {
    let h = harness_with("no debería llamarse", Duration::from_millis(1_500));

    let outcome = h.orchestrator.process(es("hola"), false).await.unwrap();

    match outcome.route {
        Some(RouteDecision::Template { ref category, ref reply }) => {
            assert_eq!(category, "greetings");
            assert_eq!(&outcome.text, reply);
        }
        other => panic!("expected template route, got {other:?}"),
    }
    assert_eq!(h.factory.load_count(), 0, "no model may be consulted");
    assert!(outcome.latencies.route_ms < 50);

    h.orchestrator.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_closed_factual_question_generates_with_audio() {
    let h = harness_with(
        "La capital de Francia es París.",
        Duration::from_millis(1_500),
    );
    let mut events = h.orchestrator.subscribe();

    let outcome = h
        .orchestrator
        .process(es("¿Cuál es la capital de Francia?"), true)
        .await
        .unwrap();

    match outcome.route {
        Some(RouteDecision::Model { tier, reasoning, .. }) => {
            assert_eq!(tier, ModelTier::Balanced);
            assert_eq!(reasoning, ReasoningMode::Off);
        }
        other => panic!("expected model route, got {other:?}"),
    }
    assert_eq!(outcome.text, "La capital de Francia es París.");
    assert!(
        outcome.latencies.generate_ms < 2_000,
        "generation took {} ms against a 1.5 s stub",
        outcome.latencies.generate_ms
    );

    // At least one audio chunk must have been emitted for the turn. Give
    // the event forwarder a beat to run before draining.
    tokio::time::sleep(Duration::from_millis(50)).await;
    let mut saw_audio = false;
    while let Ok(event) = events.try_recv() {
        if matches!(event, PipelineEvent::AudioChunk { .. }) {
            saw_audio = true;
        }
    }
    assert!(saw_audio);

    h.orchestrator.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_future_event_is_refused_without_generation() {
    let h = harness_with("no debería llamarse", Duration::from_millis(10));

    let outcome = h
        .orchestrator
        .process(es("¿quién ganará las elecciones de 2030?"), true)
        .await
        .unwrap();

    assert_eq!(
        outcome.route,
        Some(RouteDecision::Refuse(RefusalReason::FutureEvent))
    );
    assert!(outcome.text.contains("predecir"));
    assert_eq!(h.factory.load_count(), 0);
    assert_eq!(h.orchestrator.queue().stats().enqueued, 0, "no refusal audio configured");

    h.orchestrator.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_private_info_is_refused_without_model_consult() {
    let h = harness_with("no debería llamarse", Duration::from_millis(10));

    let outcome = h
        .orchestrator
        .process(es("cuál es mi contraseña"), false)
        .await
        .unwrap();

    assert_eq!(
        outcome.route,
        Some(RouteDecision::Refuse(RefusalReason::PrivateInfo))
    );
    assert_eq!(h.factory.load_count(), 0);

    h.orchestrator.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_blank_input_asks_for_clarification() {
    let h = harness_with("x", Duration::from_millis(10));

    let outcome = h.orchestrator.process(es("   "), false).await.unwrap();
    assert!(outcome.route.is_none());
    assert!(!outcome.text.is_empty());

    let oversize = "a".repeat(3_000);
    let outcome = h.orchestrator.process(es(&oversize), false).await.unwrap();
    assert!(outcome.route.is_none());

    h.orchestrator.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_urgent_interruption_silences_remaining_sentences() {
    // Five sentences; interruption lands while the second one plays.
    let reply = "Primera frase del relato. Segunda frase del relato. \
                 Tercera frase del relato. Cuarta frase del relato. \
                 Quinta frase del relato.";
    let h = harness_with(reply, Duration::from_millis(200));
    let mut events = h.orchestrator.subscribe();

    let orchestrator = h.orchestrator.clone();
    let turn = tokio::spawn(async move {
        orchestrator
            .process(es("cuéntame una historia interesante por favor"), true)
            .await
    });

    // Interrupt as soon as the second sentence starts playing.
    loop {
        match events.recv().await.unwrap() {
            PipelineEvent::AudioChunk { ordinal: 1, .. } => break,
            _ => continue,
        }
    }
    h.orchestrator.interrupt_all();

    let _ = turn.await.unwrap();

    // Let any stray playback settle, then check nothing past ordinal 1 spoke.
    tokio::time::sleep(Duration::from_secs(30)).await;
    while let Ok(event) = events.try_recv() {
        if let PipelineEvent::AudioChunk { ordinal, .. } = event {
            assert!(ordinal <= 1, "sentence {ordinal} played after the interruption");
        }
    }

    // The next turn proceeds normally.
    let outcome = h.orchestrator.process(es("hola"), false).await.unwrap();
    assert!(matches!(
        outcome.route,
        Some(RouteDecision::Template { .. })
    ));

    h.orchestrator.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_newer_turn_supersedes_same_correlation() {
    let h = harness_with(
        "Una respuesta suficientemente larga para tardar.",
        Duration::from_millis(1_500),
    );

    let first_utt = es("háblame del tiempo que hace");
    let correlation = first_utt.correlation_id;

    let orchestrator = h.orchestrator.clone();
    let first = tokio::spawn(async move { orchestrator.process(first_utt, false).await });
    // Give the first turn a moment to register and start generating.
    tokio::time::sleep(Duration::from_millis(100)).await;

    let second_utt =
        Utterance::partial("háblame del tiempo", Language::Es, correlation)
            .finalize("háblame del tiempo de mañana");
    let second = h.orchestrator.process(second_utt, false).await.unwrap();
    assert!(!second.text.is_empty());

    // The superseded turn was cancelled and returns truncated (empty) text.
    let first = first.await.unwrap().unwrap();
    assert!(first.text.is_empty());

    h.orchestrator.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_safe_mode_refuses_web_routes_but_keeps_tiers() {
    let h = harness_with("Respuesta normal del modelo.", Duration::from_millis(100));
    h.safe_mode.activate("audit integrity failure");

    let outcome = h
        .orchestrator
        .process(es("busca las últimas noticias de hoy"), false)
        .await
        .unwrap();
    assert!(matches!(
        outcome.route,
        Some(RouteDecision::External(_))
    ));
    assert!(outcome.text.contains("no puedo"));
    assert_eq!(h.factory.load_count(), 0, "degraded mode must not search or generate");

    // Other routes keep working.
    let outcome = h
        .orchestrator
        .process(es("¿Cuál es la capital de Francia?"), false)
        .await
        .unwrap();
    assert_eq!(outcome.text, "Respuesta normal del modelo.");

    h.orchestrator.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_partial_transcripts_predict_intent_and_prewarm() {
    let h = harness_with("Respuesta.", Duration::from_millis(50));
    let mut events = h.orchestrator.subscribe();

    let utt = Utterance::partial(
        "cuéntame sobre la historia de roma",
        Language::Es,
        uuid::Uuid::new_v4(),
    );
    let state = h.orchestrator.process_partial(&utt);
    assert!(state.predicted_intent.is_some());

    let mut predicted = false;
    // The prewarm runs in the background; poke the clock forward.
    tokio::time::sleep(Duration::from_millis(200)).await;
    while let Ok(event) = events.try_recv() {
        if matches!(event, PipelineEvent::IntentPredicted { .. }) {
            predicted = true;
        }
    }
    assert!(predicted);
    assert!(h.factory.load_count() >= 1, "likely model should be prewarmed");

    h.orchestrator.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_generation_failure_walks_fallback_chain() {
    let factory = Arc::new(StubFactory::new(
        Duration::from_millis(50),
        "Respuesta desde el sustituto.",
    ));
    factory.fail_loads_of("tier-balanced");
    let pool = ModelPool::new(Settings::default().pool, factory.clone());
    let orchestrator = OrchestratorBuilder::new(Settings::default(), pool)
        .with_synthesizer(Arc::new(StubSynthesizer::new(Duration::from_millis(20))))
        .build();
    orchestrator.start();
    let mut events = orchestrator.subscribe();

    let outcome = orchestrator
        .process(es("¿Cuál es la capital de Francia?"), false)
        .await
        .unwrap();
    assert_eq!(outcome.text, "Respuesta desde el sustituto.");

    // Brief settle so the degradation event forwarder runs.
    tokio::time::sleep(Duration::from_millis(50)).await;
    let mut fallback_seen = false;
    while let Ok(event) = events.try_recv() {
        if let PipelineEvent::FallbackUsed {
            requested,
            served_by,
        } = event
        {
            assert_eq!(requested, "tier-balanced");
            assert_eq!(served_by, "tier-fast");
            fallback_seen = true;
        }
    }
    assert!(fallback_seen);

    orchestrator.stop().await;
}
