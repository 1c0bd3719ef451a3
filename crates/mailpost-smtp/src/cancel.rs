//! Cancellation signal for in-flight network operations.
//!
//! A [`Canceller`] fires once; every [`CancelToken`] cloned from the same
//! pair observes it. Clients race each read and write against their token,
//! so firing it interrupts whatever the client is waiting on.

use std::sync::Arc;

use tokio::sync::watch;

/// Creates a connected canceller/token pair.
#[must_use]
pub fn pair() -> (Canceller, CancelToken) {
    let (tx, rx) = watch::channel(false);
    (Canceller { tx: Arc::new(tx) }, CancelToken { rx })
}

/// Sending half; fires the cancellation.
#[derive(Debug, Clone)]
pub struct Canceller {
    tx: Arc<watch::Sender<bool>>,
}

impl Canceller {
    /// Signals cancellation to every token of this pair.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

/// Receiving half; observed by clients.
#[derive(Debug, Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    /// A token that is never cancelled.
    #[must_use]
    pub fn never() -> Self {
        pair().1
    }

    /// Returns true once cancellation has been signalled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves when cancellation is signalled.
    ///
    /// Pends forever if the canceller was dropped without firing.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        if rx.wait_for(|cancelled| *cancelled).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::never()
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn fires_all_clones() {
        let (canceller, token) = pair();
        let other = token.clone();
        assert!(!token.is_cancelled());

        canceller.cancel();
        assert!(token.is_cancelled());
        assert!(other.is_cancelled());
        token.cancelled().await;
    }

    #[tokio::test]
    async fn never_does_not_resolve() {
        let token = CancelToken::never();
        let waited = tokio::time::timeout(Duration::from_millis(20), token.cancelled()).await;
        assert!(waited.is_err());
    }

    #[tokio::test]
    async fn wakes_a_waiting_task() {
        let (canceller, token) = pair();
        let waiter = tokio::spawn(async move { token.cancelled().await });
        tokio::time::sleep(Duration::from_millis(5)).await;
        canceller.cancel();
        waiter.await.unwrap();
    }
}
