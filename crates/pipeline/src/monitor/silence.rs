//! Silence gap monitor
//!
//! Classifies the silence between consecutive sentences. Long and
//! critical gaps carry `should_fill`, on which the orchestrator plays a
//! prerecorded filler through the queue at critical priority.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::broadcast;

use voice_router_config::SilenceConfig;

/// Gap classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SilenceKind {
    /// Acceptable
    Short,
    /// Noticeable
    Medium,
    /// Uncomfortable; fill
    Long,
    /// System issue; fill
    Critical,
}

/// Silence detection event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SilenceEvent {
    pub kind: SilenceKind,
    pub duration_ms: u64,
    pub context: String,
    pub should_fill: bool,
}

/// Gap counters
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SilenceStats {
    pub total_gaps: u64,
    pub short_gaps: u64,
    pub medium_gaps: u64,
    pub long_gaps: u64,
    pub critical_gaps: u64,
    pub avg_gap_ms: f64,
    pub max_gap_ms: u64,
}

#[derive(Default)]
struct Inner {
    total: u64,
    short: u64,
    medium: u64,
    long: u64,
    critical: u64,
    total_ms: u128,
    max_ms: u64,
}

/// Inter-sentence gap watcher
pub struct SilenceGapMonitor {
    config: SilenceConfig,
    inner: Mutex<Inner>,
    event_tx: broadcast::Sender<SilenceEvent>,
}

impl SilenceGapMonitor {
    pub fn new(config: SilenceConfig) -> Self {
        let (event_tx, _) = broadcast::channel(256);
        Self {
            config,
            inner: Mutex::new(Inner::default()),
            event_tx,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SilenceEvent> {
        self.event_tx.subscribe()
    }

    /// Record one observed gap and broadcast its classification
    pub fn observe_gap(&self, gap: Duration, context: &str) -> SilenceEvent {
        let gap_ms = gap.as_millis() as u64;

        let kind = {
            let mut inner = self.inner.lock();
            inner.total += 1;
            inner.total_ms += u128::from(gap_ms);
            inner.max_ms = inner.max_ms.max(gap_ms);

            if gap_ms < self.config.short_ms {
                inner.short += 1;
                SilenceKind::Short
            } else if gap_ms < self.config.medium_ms {
                inner.medium += 1;
                SilenceKind::Medium
            } else if gap_ms < self.config.long_ms {
                inner.long += 1;
                SilenceKind::Long
            } else {
                inner.critical += 1;
                SilenceKind::Critical
            }
        };

        let should_fill = matches!(kind, SilenceKind::Long | SilenceKind::Critical);
        match kind {
            SilenceKind::Long => {
                tracing::warn!(gap_ms, context, "Long gap detected");
            }
            SilenceKind::Critical => {
                tracing::error!(gap_ms, context, "Critical gap detected");
            }
            _ => {}
        }

        let event = SilenceEvent {
            kind,
            duration_ms: gap_ms,
            context: context.to_string(),
            should_fill,
        };
        let _ = self.event_tx.send(event.clone());
        event
    }

    pub fn stats(&self) -> SilenceStats {
        let inner = self.inner.lock();
        SilenceStats {
            total_gaps: inner.total,
            short_gaps: inner.short,
            medium_gaps: inner.medium,
            long_gaps: inner.long,
            critical_gaps: inner.critical,
            avg_gap_ms: if inner.total == 0 {
                0.0
            } else {
                inner.total_ms as f64 / inner.total as f64
            },
            max_gap_ms: inner.max_ms,
        }
    }

    pub fn reset(&self) {
        *self.inner.lock() = Inner::default();
    }
}

impl Default for SilenceGapMonitor {
    fn default() -> Self {
        Self::new(SilenceConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification_thresholds() {
        let monitor = SilenceGapMonitor::default();
        let cases = [
            (100, SilenceKind::Short, false),
            (499, SilenceKind::Short, false),
            (500, SilenceKind::Medium, false),
            (999, SilenceKind::Medium, false),
            (1_000, SilenceKind::Long, true),
            (1_999, SilenceKind::Long, true),
            (2_000, SilenceKind::Critical, true),
            (5_000, SilenceKind::Critical, true),
        ];
        for (ms, expected, fill) in cases {
            let event = monitor.observe_gap(Duration::from_millis(ms), "test");
            assert_eq!(event.kind, expected, "{ms} ms");
            assert_eq!(event.should_fill, fill, "{ms} ms");
        }
    }

    #[test]
    fn test_stats_accumulate() {
        let monitor = SilenceGapMonitor::default();
        monitor.observe_gap(Duration::from_millis(100), "a");
        monitor.observe_gap(Duration::from_millis(300), "b");
        monitor.observe_gap(Duration::from_millis(2_600), "c");

        let stats = monitor.stats();
        assert_eq!(stats.total_gaps, 3);
        assert_eq!(stats.short_gaps, 2);
        assert_eq!(stats.critical_gaps, 1);
        assert_eq!(stats.max_gap_ms, 2_600);
        assert!((stats.avg_gap_ms - 1_000.0).abs() < 1.0);

        monitor.reset();
        assert_eq!(monitor.stats().total_gaps, 0);
    }

    #[tokio::test]
    async fn test_events_are_broadcast() {
        let monitor = SilenceGapMonitor::default();
        let mut rx = monitor.subscribe();
        monitor.observe_gap(Duration::from_millis(1_500), "sentence_1 → sentence_2");
        let event = rx.try_recv().unwrap();
        assert_eq!(event.kind, SilenceKind::Long);
        assert!(event.context.contains("sentence_1"));
    }
}
