//! Safe mode handle
//!
//! A process-wide sticky flag created at startup and injected where
//! needed (no global state). When active, the orchestrator refuses
//! web-search routes and answers them with a canned safety reply; other
//! tiers continue.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cloneable sticky degraded-mode flag
#[derive(Debug, Clone, Default)]
pub struct SafeMode {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    active: AtomicBool,
    reason: Mutex<Option<String>>,
}

impl SafeMode {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enter safe mode; idempotent, never exits on its own
    pub fn activate(&self, reason: impl Into<String>) {
        let reason = reason.into();
        if !self.inner.active.swap(true, Ordering::SeqCst) {
            tracing::error!(reason = %reason, "Entering safe mode");
            *self.inner.reason.lock() = Some(reason);
        }
    }

    pub fn is_active(&self) -> bool {
        self.inner.active.load(Ordering::SeqCst)
    }

    pub fn reason(&self) -> Option<String> {
        self.inner.reason.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_safe_mode_is_sticky() {
        let mode = SafeMode::new();
        assert!(!mode.is_active());
        mode.activate("hash mismatch");
        mode.activate("second reason is ignored");
        assert!(mode.is_active());
        assert_eq!(mode.reason().as_deref(), Some("hash mismatch"));
    }

    #[test]
    fn test_clones_share_state() {
        let mode = SafeMode::new();
        let clone = mode.clone();
        mode.activate("x");
        assert!(clone.is_active());
    }
}
