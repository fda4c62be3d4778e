//! Main settings module

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::catalogue::TemplateCatalogue;
use crate::refusal::UnknownPatterns;
use crate::ConfigError;

/// Main application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Default language for template matching and splitting
    #[serde(default = "default_language")]
    pub language: String,

    /// Sentence splitter configuration
    #[serde(default)]
    pub splitter: SplitterConfig,

    /// TTS streaming queue configuration
    #[serde(default)]
    pub queue: QueueConfig,

    /// Model pool configuration
    #[serde(default)]
    pub pool: PoolConfig,

    /// Tripartite router configuration
    #[serde(default)]
    pub router: RouterConfig,

    /// Eager input processor configuration
    #[serde(default)]
    pub eager: EagerConfig,

    /// Active listening monitor configuration
    #[serde(default)]
    pub listening: ListeningConfig,

    /// Silence gap monitor configuration
    #[serde(default)]
    pub silence: SilenceConfig,

    /// Generation backend configuration
    #[serde(default)]
    pub generation: GenerationConfig,

    /// Audit log configuration
    #[serde(default)]
    pub audit: AuditConfig,

    /// Template catalogue (built-in es/en defaults when absent)
    #[serde(default)]
    pub catalogue: TemplateCatalogue,

    /// Refusal keyword lists (built-in es/en defaults when absent)
    #[serde(default)]
    pub unknown_patterns: UnknownPatterns,
}

fn default_language() -> String {
    "es".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            language: default_language(),
            splitter: SplitterConfig::default(),
            queue: QueueConfig::default(),
            pool: PoolConfig::default(),
            router: RouterConfig::default(),
            eager: EagerConfig::default(),
            listening: ListeningConfig::default(),
            silence: SilenceConfig::default(),
            generation: GenerationConfig::default(),
            audit: AuditConfig::default(),
            catalogue: TemplateCatalogue::default(),
            unknown_patterns: UnknownPatterns::default(),
        }
    }
}

/// Sentence splitter configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SplitterConfig {
    /// Average TTS speed used for duration estimation
    #[serde(default = "default_chars_per_second")]
    pub chars_per_second: f32,
}

fn default_chars_per_second() -> f32 {
    15.0
}

impl Default for SplitterConfig {
    fn default() -> Self {
        Self {
            chars_per_second: default_chars_per_second(),
        }
    }
}

/// TTS streaming queue configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Target inter-sentence gap (ms)
    #[serde(default = "default_gap_target_ms")]
    pub gap_target_ms: u64,
    /// Safety margin weighted by (1 - predictor confidence) (ms)
    #[serde(default = "default_overlap_margin_ms")]
    pub overlap_margin_ms: u64,
    /// Bounded queue capacity
    #[serde(default = "default_queue_capacity")]
    pub capacity: usize,
    /// Concurrent synthesis bound (1 = fully serial)
    #[serde(default = "default_parallel_synthesis")]
    pub parallel_synthesis: usize,
    /// Per-sentence synthesis deadline (ms)
    #[serde(default = "default_synthesis_timeout_ms")]
    pub synthesis_timeout_ms: u64,
    /// How long finished jobs are retained for stats (s)
    #[serde(default = "default_retention_s")]
    pub retention_s: u64,
    /// EWMA smoothing factor
    #[serde(default = "default_ewma_alpha")]
    pub ewma_alpha: f64,
    /// Samples needed for full predictor confidence
    #[serde(default = "default_ewma_target_samples")]
    pub ewma_target_samples: u32,
}

fn default_gap_target_ms() -> u64 {
    50
}
fn default_overlap_margin_ms() -> u64 {
    300
}
fn default_queue_capacity() -> usize {
    64
}
fn default_parallel_synthesis() -> usize {
    2
}
fn default_synthesis_timeout_ms() -> u64 {
    5_000
}
fn default_retention_s() -> u64 {
    300
}
fn default_ewma_alpha() -> f64 {
    0.2
}
fn default_ewma_target_samples() -> u32 {
    20
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            gap_target_ms: default_gap_target_ms(),
            overlap_margin_ms: default_overlap_margin_ms(),
            capacity: default_queue_capacity(),
            parallel_synthesis: default_parallel_synthesis(),
            synthesis_timeout_ms: default_synthesis_timeout_ms(),
            retention_s: default_retention_s(),
            ewma_alpha: default_ewma_alpha(),
            ewma_target_samples: default_ewma_target_samples(),
        }
    }
}

/// Model pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Idle TTL for hot models (s)
    #[serde(default = "default_ttl_hot_s")]
    pub ttl_hot_s: u64,
    /// Idle TTL for warm models (s)
    #[serde(default = "default_ttl_warm_s")]
    pub ttl_warm_s: u64,
    /// Idle TTL for cold models (s)
    #[serde(default = "default_ttl_cold_s")]
    pub ttl_cold_s: u64,
    /// Access-history window for tier classification (s)
    #[serde(default = "default_access_window_s")]
    pub access_window_s: u64,
    /// Accesses within the window to classify as hot
    #[serde(default = "default_hot_access_count")]
    pub hot_access_count: usize,
    /// Sweeper cadence (ms)
    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,
    /// Per-name ordered substitute lists
    #[serde(default)]
    pub fallback_chains: HashMap<String, Vec<String>>,
}

fn default_ttl_hot_s() -> u64 {
    300
}
fn default_ttl_warm_s() -> u64 {
    45
}
fn default_ttl_cold_s() -> u64 {
    15
}
fn default_access_window_s() -> u64 {
    300
}
fn default_hot_access_count() -> usize {
    3
}
fn default_sweep_interval_ms() -> u64 {
    5_000
}

impl Default for PoolConfig {
    fn default() -> Self {
        let mut fallback_chains = HashMap::new();
        fallback_chains.insert(
            "tier-deep".to_string(),
            vec!["tier-balanced".to_string(), "tier-fast".to_string()],
        );
        fallback_chains.insert("tier-balanced".to_string(), vec!["tier-fast".to_string()]);
        Self {
            ttl_hot_s: default_ttl_hot_s(),
            ttl_warm_s: default_ttl_warm_s(),
            ttl_cold_s: default_ttl_cold_s(),
            access_window_s: default_access_window_s(),
            hot_access_count: default_hot_access_count(),
            sweep_interval_ms: default_sweep_interval_ms(),
            fallback_chains,
        }
    }
}

/// Tripartite router configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Confidence at or above which the fast tier answers
    #[serde(default = "default_fast_confidence")]
    pub fast_confidence: f64,
    /// Confidence below which the deep tier answers
    #[serde(default = "default_deep_confidence")]
    pub deep_confidence: f64,
    /// Web score at or above which the route goes external
    #[serde(default = "default_web_threshold")]
    pub web_threshold: f64,
    /// Soft score at or above which the empathic flag is set
    #[serde(default = "default_soft_threshold")]
    pub soft_threshold: f64,
    /// Hard score must stay below this for the empathic flag
    #[serde(default = "default_empathic_hard_ceiling")]
    pub empathic_hard_ceiling: f64,
    /// Prompt length that forces reasoning mode on
    #[serde(default = "default_think_mode_threshold_chars")]
    pub think_mode_threshold_chars: usize,
    /// Feedback ring buffer capacity
    #[serde(default = "default_feedback_capacity")]
    pub feedback_capacity: usize,
    /// Confirmed negatives required before threshold bias applies
    #[serde(default = "default_feedback_min_negatives")]
    pub feedback_min_negatives: usize,
}

fn default_fast_confidence() -> f64 {
    0.6
}
fn default_deep_confidence() -> f64 {
    0.3
}
fn default_web_threshold() -> f64 {
    0.7
}
fn default_soft_threshold() -> f64 {
    0.5
}
fn default_empathic_hard_ceiling() -> f64 {
    0.3
}
fn default_think_mode_threshold_chars() -> usize {
    200
}
fn default_feedback_capacity() -> usize {
    200
}
fn default_feedback_min_negatives() -> usize {
    10
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            fast_confidence: default_fast_confidence(),
            deep_confidence: default_deep_confidence(),
            web_threshold: default_web_threshold(),
            soft_threshold: default_soft_threshold(),
            empathic_hard_ceiling: default_empathic_hard_ceiling(),
            think_mode_threshold_chars: default_think_mode_threshold_chars(),
            feedback_capacity: default_feedback_capacity(),
            feedback_min_negatives: default_feedback_min_negatives(),
        }
    }
}

/// Eager input processor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EagerConfig {
    /// Minimum words before intent prediction starts
    #[serde(default = "default_min_words")]
    pub min_words: usize,
    /// Confidence required to act on a prediction
    #[serde(default = "default_eager_confidence")]
    pub confidence_threshold: f64,
}

fn default_min_words() -> usize {
    3
}
fn default_eager_confidence() -> f64 {
    0.6
}

impl Default for EagerConfig {
    fn default() -> Self {
        Self {
            min_words: default_min_words(),
            confidence_threshold: default_eager_confidence(),
        }
    }
}

/// Active listening monitor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListeningConfig {
    /// Sampling cadence (ms)
    #[serde(default = "default_detection_window_ms")]
    pub detection_window_ms: u64,
    /// Level above baseline that classifies as speech (dB)
    #[serde(default = "default_speech_offset_db")]
    pub speech_offset_db: f32,
    /// Level above baseline that classifies as ambient noise (dB)
    #[serde(default = "default_ambient_offset_db")]
    pub ambient_offset_db: f32,
    /// Speech events within the window that escalate to urgent
    #[serde(default = "default_urgent_repeat_count")]
    pub urgent_repeat_count: usize,
    /// Rolling window for urgency detection (ms)
    #[serde(default = "default_urgent_window_ms")]
    pub urgent_window_ms: u64,
    /// Baseline calibration length (ms)
    #[serde(default = "default_calibration_ms")]
    pub calibration_ms: u64,
    /// Baseline used before calibration runs (dB)
    #[serde(default = "default_initial_baseline_db")]
    pub initial_baseline_db: f32,
}

fn default_detection_window_ms() -> u64 {
    100
}
fn default_speech_offset_db() -> f32 {
    30.0
}
fn default_ambient_offset_db() -> f32 {
    10.0
}
fn default_urgent_repeat_count() -> usize {
    2
}
fn default_urgent_window_ms() -> u64 {
    2_000
}
fn default_calibration_ms() -> u64 {
    2_000
}
fn default_initial_baseline_db() -> f32 {
    -60.0
}

impl Default for ListeningConfig {
    fn default() -> Self {
        Self {
            detection_window_ms: default_detection_window_ms(),
            speech_offset_db: default_speech_offset_db(),
            ambient_offset_db: default_ambient_offset_db(),
            urgent_repeat_count: default_urgent_repeat_count(),
            urgent_window_ms: default_urgent_window_ms(),
            calibration_ms: default_calibration_ms(),
            initial_baseline_db: default_initial_baseline_db(),
        }
    }
}

/// Silence gap monitor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SilenceConfig {
    /// Gaps under this are short (ms)
    #[serde(default = "default_silence_short_ms")]
    pub short_ms: u64,
    /// Gaps under this are medium (ms)
    #[serde(default = "default_silence_medium_ms")]
    pub medium_ms: u64,
    /// Gaps under this are long; at or above, critical (ms)
    #[serde(default = "default_silence_long_ms")]
    pub long_ms: u64,
}

fn default_silence_short_ms() -> u64 {
    500
}
fn default_silence_medium_ms() -> u64 {
    1_000
}
fn default_silence_long_ms() -> u64 {
    2_000
}

impl Default for SilenceConfig {
    fn default() -> Self {
        Self {
            short_ms: default_silence_short_ms(),
            medium_ms: default_silence_medium_ms(),
            long_ms: default_silence_long_ms(),
        }
    }
}

/// Generation backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// Ollama-style endpoint for HTTP backends
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// Classifier deadline (ms)
    #[serde(default = "default_classifier_timeout_ms")]
    pub classifier_timeout_ms: u64,
    /// Template lookup deadline (ms)
    #[serde(default = "default_template_timeout_ms")]
    pub template_timeout_ms: u64,
    /// Web search deadline (ms)
    #[serde(default = "default_web_search_timeout_ms")]
    pub web_search_timeout_ms: u64,
    /// Utterances longer than this are rejected as input errors
    #[serde(default = "default_max_utterance_chars")]
    pub max_utterance_chars: usize,
    /// System prompt sent with every generation
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
}

fn default_endpoint() -> String {
    "http://localhost:11434".to_string()
}
fn default_classifier_timeout_ms() -> u64 {
    50
}
fn default_template_timeout_ms() -> u64 {
    5
}
fn default_web_search_timeout_ms() -> u64 {
    10_000
}
fn default_max_utterance_chars() -> usize {
    2_000
}
fn default_system_prompt() -> String {
    "Eres un asistente de voz. Responde de forma breve y natural; \
     tus respuestas se leerán en voz alta."
        .to_string()
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            classifier_timeout_ms: default_classifier_timeout_ms(),
            template_timeout_ms: default_template_timeout_ms(),
            web_search_timeout_ms: default_web_search_timeout_ms(),
            max_utterance_chars: default_max_utterance_chars(),
            system_prompt: default_system_prompt(),
        }
    }
}

/// Audit log configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    /// Directory for append-only logs and sidecars
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    /// Consecutive web-audit errors before safe mode triggers
    #[serde(default = "default_anomaly_threshold")]
    pub anomaly_threshold: u32,
    /// HMAC key for the voice interaction sidecar (hex)
    #[serde(default)]
    pub hmac_key: Option<String>,
}

fn default_log_dir() -> String {
    "logs".to_string()
}
fn default_anomaly_threshold() -> u32 {
    5
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            log_dir: default_log_dir(),
            anomaly_threshold: default_anomaly_threshold(),
            hmac_key: None,
        }
    }
}

impl Settings {
    /// Create default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate settings; called by `load_settings`, fails fast at startup
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.splitter.chars_per_second <= 0.0 {
            return Err(ConfigError::InvalidValue {
                field: "splitter.chars_per_second".into(),
                message: "must be positive".into(),
            });
        }
        if !(0.0..1.0).contains(&(self.queue.ewma_alpha)) || self.queue.ewma_alpha == 0.0 {
            return Err(ConfigError::InvalidValue {
                field: "queue.ewma_alpha".into(),
                message: "must be in (0, 1)".into(),
            });
        }
        if self.queue.capacity == 0 {
            return Err(ConfigError::InvalidValue {
                field: "queue.capacity".into(),
                message: "must be at least 1".into(),
            });
        }
        if self.queue.parallel_synthesis == 0 {
            return Err(ConfigError::InvalidValue {
                field: "queue.parallel_synthesis".into(),
                message: "must be at least 1".into(),
            });
        }
        if self.router.deep_confidence >= self.router.fast_confidence {
            return Err(ConfigError::InvalidValue {
                field: "router.deep_confidence".into(),
                message: "must be below router.fast_confidence".into(),
            });
        }
        if !(self.silence.short_ms < self.silence.medium_ms
            && self.silence.medium_ms < self.silence.long_ms)
        {
            return Err(ConfigError::InvalidValue {
                field: "silence".into(),
                message: "thresholds must be strictly increasing".into(),
            });
        }
        self.catalogue.validate()?;
        Ok(())
    }
}

/// Load settings from `config/default.{toml,yaml}`, an optional named
/// environment file, and `VOICE_ROUTER__*` environment variables.
pub fn load_settings(env: Option<&str>) -> Result<Settings, ConfigError> {
    let mut builder = Config::builder();

    builder = builder.add_source(File::with_name("config/default").required(false));

    if let Some(env_name) = env {
        builder =
            builder.add_source(File::with_name(&format!("config/{}", env_name)).required(false));
    }

    builder = builder.add_source(
        Environment::with_prefix("VOICE_ROUTER")
            .separator("__")
            .try_parsing(true),
    );

    let config = builder.build()?;
    let settings: Settings = config.try_deserialize()?;

    settings.validate()?;

    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.language, "es");
        assert_eq!(settings.queue.gap_target_ms, 50);
        assert_eq!(settings.queue.capacity, 64);
        assert_eq!(settings.pool.ttl_hot_s, 300);
        assert_eq!(settings.router.think_mode_threshold_chars, 200);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_default_fallback_chain_never_promotes() {
        let settings = Settings::default();
        let deep = &settings.pool.fallback_chains["tier-deep"];
        assert_eq!(deep, &vec!["tier-balanced".to_string(), "tier-fast".to_string()]);
    }

    #[test]
    fn test_validation_rejects_bad_alpha() {
        let mut settings = Settings::default();
        settings.queue.ewma_alpha = 1.5;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_inverted_thresholds() {
        let mut settings = Settings::default();
        settings.router.deep_confidence = 0.9;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.silence.medium_ms = 100;
        assert!(settings.validate().is_err());
    }
}
