//! Configuration management for the voice router
//!
//! Supports loading configuration from:
//! - YAML/TOML files
//! - Environment variables (VOICE_ROUTER_ prefix)
//! - Runtime overrides
//!
//! All sections default sensibly; configuration errors fail fast at
//! startup and are never recovered at runtime.

pub mod catalogue;
pub mod refusal;
pub mod settings;

pub use catalogue::{TemplateCatalogue, TemplateEntry};
pub use refusal::UnknownPatterns;
pub use settings::{
    load_settings, AuditConfig, EagerConfig, GenerationConfig, ListeningConfig, PoolConfig,
    QueueConfig, RouterConfig, Settings, SilenceConfig, SplitterConfig,
};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    FileNotFound(String),

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("Environment error: {0}")]
    Environment(String),
}

impl From<config::ConfigError> for ConfigError {
    fn from(err: config::ConfigError) -> Self {
        ConfigError::ParseError(err.to_string())
    }
}

impl From<ConfigError> for voice_router_core::Error {
    fn from(err: ConfigError) -> Self {
        voice_router_core::Error::Config(err.to_string())
    }
}
