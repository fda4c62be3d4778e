//! Cancellation tokens
//!
//! Every long-running operation (model load, generation, synthesis,
//! playback, web search) accepts a token tied to its correlation id.
//! Cancellation strictly precedes any further audio emission for the
//! cancelled correlation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// Cloneable cancellation handle
///
/// Cancelling is idempotent and sticky: once cancelled, a token never
/// resets. Clones observe the same state.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flip the token; wakes every task parked on `cancelled()`
    pub fn cancel(&self) {
        if !self.inner.cancelled.swap(true, Ordering::SeqCst) {
            self.inner.notify.notify_waiters();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Whether two tokens share the same underlying state
    pub fn same(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Resolve when the token is cancelled
    ///
    /// Safe against the cancel-before-await race: the flag is re-checked
    /// after registering with the notifier.
    pub async fn cancelled(&self) {
        loop {
            if self.is_cancelled() {
                return;
            }
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }

    /// Run a future, aborting early if the token fires
    pub async fn run_until_cancelled<F, T>(&self, fut: F) -> Option<T>
    where
        F: std::future::Future<Output = T>,
    {
        tokio::select! {
            _ = self.cancelled() => None,
            out = fut => Some(out),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_cancel_is_sticky() {
        let token = CancellationToken::new();
        assert!(!token.is_cancelled());
        token.cancel();
        token.cancel();
        assert!(token.is_cancelled());
        // Must resolve immediately even though cancel happened before the await.
        token.cancelled().await;
    }

    #[tokio::test]
    async fn test_clones_share_state() {
        let token = CancellationToken::new();
        let clone = token.clone();
        let waiter = tokio::spawn(async move { clone.cancelled().await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        token.cancel();
        waiter.await.unwrap();
    }

    #[tokio::test]
    async fn test_run_until_cancelled() {
        let token = CancellationToken::new();
        let out = token.run_until_cancelled(async { 42 }).await;
        assert_eq!(out, Some(42));

        token.cancel();
        let out = token
            .run_until_cancelled(tokio::time::sleep(Duration::from_secs(5)))
            .await;
        assert!(out.is_none());
    }
}
