//! EWMA synthesis-latency predictor
//!
//! Forecasts per-sentence synthesis wall time. Updated by the queue
//! worker on synthesis completion; external readers see a consistent
//! snapshot. Confidence ramps with sample count and weights the queue's
//! overlap decisions.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Snapshot of the predictor state
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EwmaState {
    pub mean_seconds: f64,
    pub variance: f64,
    pub samples_seen: u32,
    /// `min(1, samples_seen / target_samples)`
    pub confidence: f64,
}

/// Exponentially-weighted moving average over observed latencies
pub struct EwmaPredictor {
    alpha: f64,
    target_samples: u32,
    state: Mutex<Inner>,
}

struct Inner {
    mean: f64,
    variance: f64,
    samples: u32,
}

/// Prior used before the first observation lands
const PRIOR_MEAN_SECONDS: f64 = 1.0;

impl EwmaPredictor {
    pub fn new(alpha: f64, target_samples: u32) -> Self {
        Self {
            alpha,
            target_samples: target_samples.max(1),
            state: Mutex::new(Inner {
                mean: PRIOR_MEAN_SECONDS,
                variance: 0.0,
                samples: 0,
            }),
        }
    }

    /// Record one observed synthesis latency
    pub fn record(&self, observed_seconds: f64) {
        if !observed_seconds.is_finite() || observed_seconds < 0.0 {
            return;
        }
        let mut state = self.state.lock();
        if state.samples == 0 {
            state.mean = observed_seconds.max(f64::EPSILON);
            state.variance = 0.0;
        } else {
            let delta = observed_seconds - state.mean;
            // Standard EWMA variance update keyed off the pre-update mean.
            state.variance = (1.0 - self.alpha) * (state.variance + self.alpha * delta * delta);
            state.mean = (self.alpha * observed_seconds + (1.0 - self.alpha) * state.mean)
                .max(f64::EPSILON);
        }
        state.samples = state.samples.saturating_add(1);
    }

    /// Forecast for the next sentence: `(mean_seconds, confidence)`
    pub fn predict(&self) -> (f64, f64) {
        let state = self.state.lock();
        (state.mean, self.confidence_of(state.samples))
    }

    pub fn snapshot(&self) -> EwmaState {
        let state = self.state.lock();
        EwmaState {
            mean_seconds: state.mean,
            variance: state.variance,
            samples_seen: state.samples,
            confidence: self.confidence_of(state.samples),
        }
    }

    fn confidence_of(&self, samples: u32) -> f64 {
        (f64::from(samples) / f64::from(self.target_samples)).min(1.0)
    }
}

impl Default for EwmaPredictor {
    fn default() -> Self {
        Self::new(0.2, 20)
    }
}
