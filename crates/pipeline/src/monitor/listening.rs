//! Active listening monitor
//!
//! Samples the microphone level while a response is playing and
//! classifies each sample as speech, ambient noise, or silence relative
//! to a calibrated baseline. Repeated speech inside a rolling window
//! escalates to urgent; urgent events carry `should_stop`, on which the
//! orchestrator cancels playback and generation.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::time::Instant;

use voice_router_config::ListeningConfig;
use voice_router_core::AudioLevelSource;

/// Classified interruption kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InterruptionKind {
    Speech,
    Urgent,
    Ambient,
    Silence,
}

/// Interruption detection event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterruptionEvent {
    pub kind: InterruptionKind,
    pub confidence: f32,
    pub audio_level_db: f32,
    pub timestamp: DateTime<Utc>,
    pub should_stop: bool,
}

/// Monitoring counters
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListeningStats {
    pub samples: u64,
    pub speech_events: u64,
    pub urgent_events: u64,
    pub ambient_events: u64,
    pub baseline_db: f32,
}

/// Microphone-level monitor for barge-in detection
pub struct ActiveListeningMonitor {
    source: Arc<dyn AudioLevelSource>,
    config: ListeningConfig,
    baseline_db: Mutex<f32>,
    recent_speech: Mutex<VecDeque<Instant>>,
    running: AtomicBool,
    event_tx: broadcast::Sender<InterruptionEvent>,
    stats: Mutex<ListeningStats>,
    task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl ActiveListeningMonitor {
    pub fn new(source: Arc<dyn AudioLevelSource>, config: ListeningConfig) -> Arc<Self> {
        let (event_tx, _) = broadcast::channel(256);
        let baseline = config.initial_baseline_db;
        Arc::new(Self {
            source,
            config,
            baseline_db: Mutex::new(baseline),
            recent_speech: Mutex::new(VecDeque::new()),
            running: AtomicBool::new(false),
            event_tx,
            stats: Mutex::new(ListeningStats {
                baseline_db: baseline,
                ..Default::default()
            }),
            task: Mutex::new(None),
        })
    }

    /// Subscribe to interruption events
    pub fn subscribe(&self) -> broadcast::Receiver<InterruptionEvent> {
        self.event_tx.subscribe()
    }

    /// Calibrate the baseline as the median level over the configured
    /// window. Call before `start`, while the room is quiet.
    pub async fn calibrate(&self) {
        let cadence = Duration::from_millis(self.config.detection_window_ms);
        let samples_wanted =
            (self.config.calibration_ms / self.config.detection_window_ms).max(1) as usize;

        let mut samples = Vec::with_capacity(samples_wanted);
        for _ in 0..samples_wanted {
            samples.push(self.source.level_db().await);
            tokio::time::sleep(cadence).await;
        }
        samples.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let median = samples[samples.len() / 2];
        *self.baseline_db.lock() = median;
        self.stats.lock().baseline_db = median;
        tracing::info!(baseline_db = median, "Listening baseline calibrated");
    }

    /// Start the sampling loop; idempotent
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let monitor = Arc::clone(self);
        *self.task.lock() = Some(tokio::spawn(async move {
            let cadence = Duration::from_millis(monitor.config.detection_window_ms);
            let mut ticker = tokio::time::interval(cadence);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            while monitor.running.load(Ordering::SeqCst) {
                ticker.tick().await;
                let level = monitor.source.level_db().await;
                let event = monitor.classify(level);
                if event.kind != InterruptionKind::Silence {
                    let _ = monitor.event_tx.send(event);
                }
            }
        }));
        tracing::debug!("Active listening started");
    }

    /// Stop sampling; idempotent
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
        tracing::debug!("Active listening stopped");
    }

    /// Classify one sample relative to the baseline; updates urgency
    /// history and stats.
    pub fn classify(&self, audio_level_db: f32) -> InterruptionEvent {
        let baseline = *self.baseline_db.lock();
        let relative = audio_level_db - baseline;

        let mut stats = self.stats.lock();
        stats.samples += 1;

        let (kind, confidence, should_stop) = if relative > self.config.speech_offset_db {
            let confidence =
                ((relative - self.config.speech_offset_db) / 20.0).clamp(0.0, 1.0);

            // Urgency: repeated speech inside the rolling window.
            let now = Instant::now();
            let window = Duration::from_millis(self.config.urgent_window_ms);
            let mut recent = self.recent_speech.lock();
            recent.push_back(now);
            while recent
                .front()
                .map(|t| now.duration_since(*t) > window)
                .unwrap_or(false)
            {
                recent.pop_front();
            }

            if recent.len() >= self.config.urgent_repeat_count {
                stats.urgent_events += 1;
                (
                    InterruptionKind::Urgent,
                    (confidence + 0.2).min(1.0),
                    true,
                )
            } else {
                stats.speech_events += 1;
                (InterruptionKind::Speech, confidence, true)
            }
        } else if relative > self.config.ambient_offset_db {
            stats.ambient_events += 1;
            (InterruptionKind::Ambient, 0.5, false)
        } else {
            (InterruptionKind::Silence, 0.0, false)
        };

        InterruptionEvent {
            kind,
            confidence,
            audio_level_db,
            timestamp: Utc::now(),
            should_stop,
        }
    }

    pub fn stats(&self) -> ListeningStats {
        self.stats.lock().clone()
    }

    pub fn baseline_db(&self) -> f32 {
        *self.baseline_db.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct FixedLevel(Mutex<Vec<f32>>, f32);

    #[async_trait]
    impl AudioLevelSource for FixedLevel {
        async fn level_db(&self) -> f32 {
            self.0.lock().pop().unwrap_or(self.1)
        }
    }

    fn monitor() -> Arc<ActiveListeningMonitor> {
        let source = Arc::new(FixedLevel(Mutex::new(Vec::new()), -60.0));
        ActiveListeningMonitor::new(source, ListeningConfig::default())
    }

    #[tokio::test]
    async fn test_silence_and_ambient_do_not_stop() {
        let monitor = monitor();
        // Baseline defaults to -60 dB.
        let event = monitor.classify(-58.0);
        assert_eq!(event.kind, InterruptionKind::Silence);
        assert!(!event.should_stop);

        let event = monitor.classify(-45.0); // +15 dB over baseline
        assert_eq!(event.kind, InterruptionKind::Ambient);
        assert!(!event.should_stop);
    }

    #[tokio::test]
    async fn test_speech_sets_should_stop() {
        let monitor = monitor();
        let event = monitor.classify(-25.0); // +35 dB over baseline
        assert_eq!(event.kind, InterruptionKind::Speech);
        assert!(event.should_stop);
        assert!(event.confidence > 0.0);
    }

    #[tokio::test]
    async fn test_repeated_speech_escalates_to_urgent() {
        let monitor = monitor();
        let first = monitor.classify(-25.0);
        assert_eq!(first.kind, InterruptionKind::Speech);
        let second = monitor.classify(-25.0);
        assert_eq!(second.kind, InterruptionKind::Urgent);
        assert!(second.should_stop);
        assert!(second.confidence >= first.confidence);
        assert_eq!(monitor.stats().urgent_events, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_urgency_window_expires() {
        let monitor = monitor();
        assert_eq!(monitor.classify(-25.0).kind, InterruptionKind::Speech);
        // Past the 2 s window the counter starts over.
        tokio::time::advance(Duration::from_millis(2_500)).await;
        assert_eq!(monitor.classify(-25.0).kind, InterruptionKind::Speech);
    }

    #[tokio::test(start_paused = true)]
    async fn test_calibration_uses_median() {
        let source = Arc::new(FixedLevel(
            Mutex::new(vec![-50.0, -55.0, -90.0, -55.0, -54.0]),
            -55.0,
        ));
        let mut config = ListeningConfig::default();
        config.calibration_ms = 500;
        let monitor = ActiveListeningMonitor::new(source, config);
        monitor.calibrate().await;
        // Median of the sampled values, robust to the -90 outlier.
        assert!((monitor.baseline_db() - -55.0).abs() < 1.1);
    }

    #[tokio::test]
    async fn test_start_stop_idempotent() {
        let monitor = monitor();
        monitor.start();
        monitor.start();
        monitor.stop();
        monitor.stop();
    }
}
