//! Append-only audit logs
//!
//! Every appended line gets a sidecar entry: SHA-256 hex digests for web
//! queries, HMAC-SHA256 signatures for voice interactions. Verification
//! re-hashes the log against its sidecar line by line; any mismatch (or a
//! missing sidecar) trips safe mode. Verification is content-ordered and
//! therefore immune to clock skew.

use chrono::{DateTime, NaiveDate, Utc};
use hmac::{Hmac, Mac};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::safe_mode::SafeMode;
use crate::AuditError;

type HmacSha256 = Hmac<Sha256>;

const PREVIEW_CHARS: usize = 200;

/// One web query log entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebQueryRecord {
    pub timestamp: DateTime<Utc>,
    pub query: String,
    /// "cache" | "web" | "error"
    pub source: String,
    pub snippets_count: usize,
    pub llm_model: Option<String>,
    pub response_preview: Option<String>,
    pub error: Option<String>,
}

impl WebQueryRecord {
    pub fn new(query: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            query: query.into(),
            source: source.into(),
            snippets_count: 0,
            llm_model: None,
            response_preview: None,
            error: None,
        }
    }

    pub fn with_response(mut self, response: &str, model: impl Into<String>) -> Self {
        self.response_preview = Some(truncate(response, PREVIEW_CHARS));
        self.llm_model = Some(model.into());
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// One voice interaction log entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceInteractionRecord {
    pub timestamp: DateTime<Utc>,
    pub correlation_id: String,
    pub route: String,
    pub transcript_preview: String,
    pub response_preview: String,
}

impl VoiceInteractionRecord {
    pub fn new(
        correlation_id: impl Into<String>,
        route: impl Into<String>,
        transcript: &str,
        response: &str,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            correlation_id: correlation_id.into(),
            route: route.into(),
            transcript_preview: truncate(transcript, PREVIEW_CHARS),
            response_preview: truncate(response, PREVIEW_CHARS),
        }
    }
}

/// Counters exposed read-only
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuditStats {
    pub lines_written: u64,
    pub consecutive_errors: u32,
    pub verify_failures: u64,
}

#[derive(Default)]
struct WriterState {
    consecutive_errors: u32,
    lines_written: u64,
    verify_failures: u64,
}

/// Web query audit with SHA-256 sidecar
pub struct WebQueryAudit {
    log_dir: PathBuf,
    anomaly_threshold: u32,
    safe_mode: SafeMode,
    state: Mutex<WriterState>,
}

impl WebQueryAudit {
    pub fn new(
        log_dir: impl Into<PathBuf>,
        anomaly_threshold: u32,
        safe_mode: SafeMode,
    ) -> Result<Self, AuditError> {
        let log_dir = log_dir.into();
        fs::create_dir_all(&log_dir)?;
        Ok(Self {
            log_dir,
            anomaly_threshold,
            safe_mode,
            state: Mutex::new(WriterState::default()),
        })
    }

    fn paths_for(&self, date: NaiveDate) -> (PathBuf, PathBuf) {
        let log = self
            .log_dir
            .join(format!("web_queries_{}.jsonl", date.format("%Y-%m-%d")));
        let sidecar = log.with_extension("jsonl.sha256");
        (log, sidecar)
    }

    /// Append a query record with its hash; updates the anomaly counter
    pub fn log_query(&self, record: &WebQueryRecord) -> Result<(), AuditError> {
        let line = serde_json::to_string(record)?;
        let digest = hex(&Sha256::digest(line.as_bytes()));

        let (log_path, sidecar_path) = self.paths_for(record.timestamp.date_naive());

        let mut state = self.state.lock();
        append_line(&log_path, &line)?;
        append_line(&sidecar_path, &digest)?;
        state.lines_written += 1;

        // Anomaly detection: a failed search, or a web hit with zero
        // snippets, counts toward the consecutive-error threshold.
        let anomalous =
            record.error.is_some() || (record.source == "web" && record.snippets_count == 0);
        if anomalous {
            state.consecutive_errors += 1;
            tracing::warn!(
                consecutive = state.consecutive_errors,
                threshold = self.anomaly_threshold,
                "Anomalous web query logged"
            );
            if state.consecutive_errors >= self.anomaly_threshold {
                self.safe_mode.activate(format!(
                    "{} consecutive web audit errors",
                    state.consecutive_errors
                ));
            }
        } else {
            state.consecutive_errors = 0;
        }

        Ok(())
    }

    /// Verify one day's log against its sidecar
    ///
    /// Returns the number of verified lines. Any mismatch or a missing
    /// sidecar activates safe mode and returns the integrity error.
    pub fn verify(&self, date: NaiveDate) -> Result<usize, AuditError> {
        let (log_path, sidecar_path) = self.paths_for(date);
        let result = verify_with(&log_path, &sidecar_path, |line| {
            Ok(hex(&Sha256::digest(line.as_bytes())))
        });
        self.note_verify(&result);
        result
    }

    fn note_verify(&self, result: &Result<usize, AuditError>) {
        if let Err(err) = result {
            self.state.lock().verify_failures += 1;
            self.safe_mode.activate(err.to_string());
        }
    }

    pub fn stats(&self) -> AuditStats {
        let state = self.state.lock();
        AuditStats {
            lines_written: state.lines_written,
            consecutive_errors: state.consecutive_errors,
            verify_failures: state.verify_failures,
        }
    }
}

/// Voice interaction audit with HMAC-SHA256 sidecar
pub struct VoiceInteractionAudit {
    log_dir: PathBuf,
    key: Vec<u8>,
    safe_mode: SafeMode,
    state: Mutex<WriterState>,
}

impl VoiceInteractionAudit {
    pub fn new(
        log_dir: impl Into<PathBuf>,
        key: impl Into<Vec<u8>>,
        safe_mode: SafeMode,
    ) -> Result<Self, AuditError> {
        let key = key.into();
        if key.is_empty() {
            return Err(AuditError::MissingKey);
        }
        let log_dir = log_dir.into();
        fs::create_dir_all(&log_dir)?;
        Ok(Self {
            log_dir,
            key,
            safe_mode,
            state: Mutex::new(WriterState::default()),
        })
    }

    fn paths_for(&self, date: NaiveDate) -> (PathBuf, PathBuf) {
        let log = self
            .log_dir
            .join(format!("voice_interactions_{}.jsonl", date.format("%Y-%m-%d")));
        let sidecar = log.with_extension("jsonl.hmac");
        (log, sidecar)
    }

    fn sign(&self, line: &str) -> Result<String, AuditError> {
        let mut mac =
            HmacSha256::new_from_slice(&self.key).map_err(|_| AuditError::MissingKey)?;
        mac.update(line.as_bytes());
        Ok(hex(&mac.finalize().into_bytes()))
    }

    /// Append an interaction record with its signature
    pub fn log_interaction(&self, record: &VoiceInteractionRecord) -> Result<(), AuditError> {
        let line = serde_json::to_string(record)?;
        let signature = self.sign(&line)?;
        let (log_path, sidecar_path) = self.paths_for(record.timestamp.date_naive());

        let mut state = self.state.lock();
        append_line(&log_path, &line)?;
        append_line(&sidecar_path, &signature)?;
        state.lines_written += 1;
        Ok(())
    }

    /// Verify one day's log against its HMAC sidecar
    pub fn verify(&self, date: NaiveDate) -> Result<usize, AuditError> {
        let (log_path, sidecar_path) = self.paths_for(date);
        let result = verify_with(&log_path, &sidecar_path, |line| self.sign(line));
        if let Err(err) = &result {
            self.state.lock().verify_failures += 1;
            self.safe_mode.activate(err.to_string());
        }
        result
    }

    pub fn stats(&self) -> AuditStats {
        let state = self.state.lock();
        AuditStats {
            lines_written: state.lines_written,
            consecutive_errors: state.consecutive_errors,
            verify_failures: state.verify_failures,
        }
    }
}

fn append_line(path: &Path, line: &str) -> Result<(), AuditError> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{line}")?;
    Ok(())
}

fn verify_with(
    log_path: &Path,
    sidecar_path: &Path,
    compute: impl Fn(&str) -> Result<String, AuditError>,
) -> Result<usize, AuditError> {
    if !log_path.exists() {
        // Nothing logged that day; vacuously valid.
        return Ok(0);
    }
    if !sidecar_path.exists() {
        return Err(AuditError::SidecarMissing(
            log_path.display().to_string(),
        ));
    }

    let log = fs::read_to_string(log_path)?;
    let sidecar = fs::read_to_string(sidecar_path)?;
    let log_lines: Vec<&str> = log.lines().collect();
    let sidecar_lines: Vec<&str> = sidecar.lines().collect();

    if log_lines.len() != sidecar_lines.len() {
        return Err(AuditError::Integrity {
            line: log_lines.len().min(sidecar_lines.len()),
            message: format!(
                "line count mismatch: {} log lines, {} sidecar entries",
                log_lines.len(),
                sidecar_lines.len()
            ),
        });
    }

    for (idx, (line, expected)) in log_lines.iter().zip(sidecar_lines.iter()).enumerate() {
        let actual = compute(line)?;
        if actual != *expected {
            return Err(AuditError::Integrity {
                line: idx,
                message: "digest mismatch".to_string(),
            });
        }
    }

    Ok(log_lines.len())
}

fn hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn web_audit(dir: &TempDir, threshold: u32) -> (WebQueryAudit, SafeMode) {
        let safe_mode = SafeMode::new();
        let audit = WebQueryAudit::new(dir.path(), threshold, safe_mode.clone()).unwrap();
        (audit, safe_mode)
    }

    #[test]
    fn test_append_and_verify_roundtrip() {
        let dir = TempDir::new().unwrap();
        let (audit, safe_mode) = web_audit(&dir, 5);

        for i in 0..3 {
            audit
                .log_query(
                    &WebQueryRecord::new(format!("query {i}"), "web")
                        .with_response("según las fuentes...", "tier-balanced"),
                )
                .unwrap();
        }

        let today = Utc::now().date_naive();
        assert_eq!(audit.verify(today).unwrap(), 3);
        assert!(!safe_mode.is_active());
    }

    #[test]
    fn test_tampering_fails_verification_and_trips_safe_mode() {
        let dir = TempDir::new().unwrap();
        let (audit, safe_mode) = web_audit(&dir, 5);

        audit
            .log_query(&WebQueryRecord::new("clima en tokio", "web"))
            .unwrap();

        // Flip one byte in the log.
        let today = Utc::now().date_naive();
        let (log_path, _) = audit.paths_for(today);
        let mut content = fs::read_to_string(&log_path).unwrap();
        content = content.replacen("tokio", "tokyo", 1);
        fs::write(&log_path, content).unwrap();

        let err = audit.verify(today).unwrap_err();
        assert!(matches!(err, AuditError::Integrity { line: 0, .. }));
        assert!(safe_mode.is_active());
    }

    #[test]
    fn test_missing_sidecar_is_an_integrity_failure() {
        let dir = TempDir::new().unwrap();
        let (audit, safe_mode) = web_audit(&dir, 5);

        audit
            .log_query(&WebQueryRecord::new("hola", "cache"))
            .unwrap();
        let today = Utc::now().date_naive();
        let (_, sidecar_path) = audit.paths_for(today);
        fs::remove_file(sidecar_path).unwrap();

        assert!(matches!(
            audit.verify(today),
            Err(AuditError::SidecarMissing(_))
        ));
        assert!(safe_mode.is_active());
    }

    #[test]
    fn test_consecutive_errors_trigger_safe_mode() {
        let dir = TempDir::new().unwrap();
        let (audit, safe_mode) = web_audit(&dir, 3);

        for i in 0..2 {
            audit
                .log_query(&WebQueryRecord::new(format!("q{i}"), "web").with_error("timeout"))
                .unwrap();
        }
        assert!(!safe_mode.is_active());

        // A success resets the counter.
        audit
            .log_query(
                &WebQueryRecord::new("ok", "cache").with_response("bien", "tier-fast"),
            )
            .unwrap();
        assert_eq!(audit.stats().consecutive_errors, 0);

        for i in 0..3 {
            audit
                .log_query(&WebQueryRecord::new(format!("e{i}"), "web").with_error("down"))
                .unwrap();
        }
        assert!(safe_mode.is_active());
    }

    #[test]
    fn test_empty_day_is_vacuously_valid() {
        let dir = TempDir::new().unwrap();
        let (audit, safe_mode) = web_audit(&dir, 5);
        let date = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
        assert_eq!(audit.verify(date).unwrap(), 0);
        assert!(!safe_mode.is_active());
    }

    #[test]
    fn test_voice_audit_hmac_roundtrip() {
        let dir = TempDir::new().unwrap();
        let safe_mode = SafeMode::new();
        let audit =
            VoiceInteractionAudit::new(dir.path(), b"secret-key".to_vec(), safe_mode.clone())
                .unwrap();

        audit
            .log_interaction(&VoiceInteractionRecord::new(
                "corr-1",
                "model",
                "¿cuál es la capital de francia?",
                "La capital de Francia es París.",
            ))
            .unwrap();

        let today = Utc::now().date_naive();
        assert_eq!(audit.verify(today).unwrap(), 1);
        assert!(!safe_mode.is_active());
    }

    #[test]
    fn test_voice_audit_rejects_empty_key() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            VoiceInteractionAudit::new(dir.path(), Vec::new(), SafeMode::new()),
            Err(AuditError::MissingKey)
        ));
    }

    #[test]
    fn test_voice_audit_detects_tampered_sidecar() {
        let dir = TempDir::new().unwrap();
        let safe_mode = SafeMode::new();
        let audit =
            VoiceInteractionAudit::new(dir.path(), b"key".to_vec(), safe_mode.clone()).unwrap();

        audit
            .log_interaction(&VoiceInteractionRecord::new("c", "template", "hola", "¡Hola!"))
            .unwrap();

        let today = Utc::now().date_naive();
        let (_, sidecar) = audit.paths_for(today);
        fs::write(&sidecar, "deadbeef\n").unwrap();

        assert!(audit.verify(today).is_err());
        assert!(safe_mode.is_active());
    }
}
