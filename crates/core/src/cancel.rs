//! Cooperative cancellation
//!
//! Long-running operations accept a `CancelToken` and observe it at every
//! suspension point (store I/O, embedding calls, handler invocations).
//! Cancellation never rolls back already-persisted rows; at-least-once
//! delivery covers the partially-written case.

use once_cell::sync::Lazy;
use tokio::sync::watch;

use crate::error::{Error, Result};

static NEVER: Lazy<watch::Sender<bool>> = Lazy::new(|| {
    let (tx, _rx) = watch::channel(false);
    tx
});

/// Owner side; dropping the source does NOT cancel outstanding tokens.
pub struct CancelSource {
    tx: watch::Sender<bool>,
}

impl CancelSource {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    pub fn token(&self) -> CancelToken {
        CancelToken {
            rx: self.tx.subscribe(),
        }
    }

    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

impl Default for CancelSource {
    fn default() -> Self {
        Self::new()
    }
}

/// Cheaply cloneable cancellation observer.
#[derive(Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    /// A token that never fires; the default for callers without a
    /// cancellation scope.
    pub fn never() -> Self {
        Self {
            rx: NEVER.subscribe(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Typed error when cancellation has been observed; call at every
    /// suspension point.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Resolves when the token is cancelled. Never resolves for
    /// `CancelToken::never()`.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        if *rx.borrow() {
            return;
        }
        while rx.changed().await.is_ok() {
            if *rx.borrow() {
                return;
            }
        }
        // Sender gone without cancelling; treat as never-cancelled.
        std::future::pending::<()>().await;
    }
}

impl std::fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_cancel_observed() {
        let source = CancelSource::new();
        let token = source.token();
        assert!(token.check().is_ok());

        source.cancel();
        assert!(token.is_cancelled());
        assert!(matches!(token.check(), Err(Error::Cancelled)));
        // Resolves immediately once cancelled.
        tokio::time::timeout(Duration::from_millis(50), token.cancelled())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_never_token_does_not_fire() {
        let token = CancelToken::never();
        assert!(!token.is_cancelled());
        let waited = tokio::time::timeout(Duration::from_millis(20), token.cancelled()).await;
        assert!(waited.is_err());
    }
}
