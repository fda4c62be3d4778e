//! Append-only audit logging with verifiable sidecars
//!
//! Features:
//! - Web query log with a SHA-256 hash per line (`.sha256` sidecar)
//! - Voice interaction log with HMAC-SHA256 signatures (`.hmac` sidecar)
//! - Line-by-line integrity verification
//! - Consecutive-error anomaly detection that trips safe mode
//!
//! Safe mode is global and sticky: once entered, web-search routes are
//! refused until an operator intervenes.

pub mod audit;
pub mod safe_mode;

pub use audit::{
    AuditStats, VoiceInteractionAudit, VoiceInteractionRecord, WebQueryAudit, WebQueryRecord,
};
pub use safe_mode::SafeMode;

use thiserror::Error;

/// Audit errors
#[derive(Error, Debug)]
pub enum AuditError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Integrity violation at line {line}: {message}")]
    Integrity { line: usize, message: String },

    #[error("Sidecar missing for {0}")]
    SidecarMissing(String),

    #[error("HMAC key not configured")]
    MissingKey,
}

impl From<AuditError> for voice_router_core::Error {
    fn from(err: AuditError) -> Self {
        voice_router_core::Error::Integrity(err.to_string())
    }
}
