//! Cooperative cancellation shared by every long-running unit.
//!
//! A [`Shutdown`] owns the trigger; each unit holds a cloned
//! [`ShutdownToken`] and selects on [`ShutdownToken::cancelled`] at its
//! suspension points.

use tokio::sync::watch;

/// Trigger side of a shutdown signal.
#[derive(Debug, Clone)]
pub struct Shutdown {
    tx: watch::Sender<bool>,
}

/// Observer side of a shutdown signal.
#[derive(Debug, Clone)]
pub struct ShutdownToken {
    rx: watch::Receiver<bool>,
}

impl Shutdown {
    /// Creates an untriggered shutdown signal.
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    /// Returns a token observing this signal.
    #[must_use]
    pub fn token(&self) -> ShutdownToken {
        ShutdownToken {
            rx: self.tx.subscribe(),
        }
    }

    /// Signals every token. Idempotent.
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    /// True once triggered.
    #[must_use]
    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownToken {
    /// True once shutdown was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves when shutdown is requested, or when the trigger is dropped.
    pub async fn cancelled(&mut self) {
        // Err means the sender is gone, which also ends the unit
        let _ = self.rx.wait_for(|stopped| *stopped).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_trigger_wakes_all_tokens() {
        let shutdown = Shutdown::new();
        let mut a = shutdown.token();
        let mut b = shutdown.token();

        assert!(!a.is_cancelled());
        shutdown.trigger();

        tokio::time::timeout(Duration::from_secs(1), a.cancelled())
            .await
            .expect("token a not woken");
        tokio::time::timeout(Duration::from_secs(1), b.cancelled())
            .await
            .expect("token b not woken");
        assert!(shutdown.is_triggered());
    }

    #[tokio::test]
    async fn test_token_created_after_trigger_is_cancelled() {
        let shutdown = Shutdown::new();
        shutdown.trigger();

        let mut late = shutdown.token();
        assert!(late.is_cancelled());
        late.cancelled().await;
    }

    #[tokio::test]
    async fn test_dropped_trigger_releases_waiters() {
        let shutdown = Shutdown::new();
        let mut token = shutdown.token();
        drop(shutdown);

        tokio::time::timeout(Duration::from_secs(1), token.cancelled())
            .await
            .expect("waiter not released");
    }
}
