// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 stagegate contributors

//! Run cancellation

use std::sync::Arc;
use tokio::sync::watch;
use tracing::warn;

/// Cloneable handle used to cancel a run
///
/// Only the first cancellation is kept; later reasons are ignored.
#[derive(Debug, Clone)]
pub struct CancellationToken {
    tx: Arc<watch::Sender<Option<String>>>,
}

impl CancellationToken {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    /// Request cancellation
    ///
    /// Returns `true` if this call cancelled the run.
    pub fn cancel(&self, reason: impl Into<String>) -> bool {
        let reason = reason.into();
        let cancelled = self.tx.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(reason.clone());
            true
        });
        if cancelled {
            warn!(reason = %reason, "run cancelled");
        }
        cancelled
    }

    pub fn is_cancelled(&self) -> bool {
        self.tx.borrow().is_some()
    }

    /// Reason given by the first cancellation
    pub fn reason(&self) -> Option<String> {
        self.tx.borrow().clone()
    }

    /// Resolve once the token is cancelled
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        loop {
            if rx.borrow_and_update().is_some() {
                return;
            }
            if rx.changed().await.is_err() {
                // Sender lives as long as any token clone, so this cannot resolve
                std::future::pending::<()>().await;
            }
        }
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_first_reason_wins() {
        let token = CancellationToken::new();
        assert!(!token.is_cancelled());

        assert!(token.cancel("user interrupt"));
        assert!(!token.cancel("timeout"));

        assert!(token.is_cancelled());
        assert_eq!(token.reason().as_deref(), Some("user interrupt"));
    }

    #[tokio::test]
    async fn test_clones_share_state() {
        let token = CancellationToken::new();
        let waiter = token.clone();

        let handle = tokio::spawn(async move {
            waiter.cancelled().await;
            waiter.reason()
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        token.cancel("stop");

        assert_eq!(handle.await.unwrap().as_deref(), Some("stop"));
    }

    #[test]
    fn test_already_cancelled_resolves_immediately() {
        let token = CancellationToken::new();
        token.cancel("early");
        tokio_test::block_on(token.cancelled());
    }
}
