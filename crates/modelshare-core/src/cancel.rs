//! Cooperative cancellation for long-running imports and installs.

use crate::error::{ModelShareError, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared flag checked between chunks of a copy or upload.
///
/// Clones observe the same state, so a token handed to a background task can
/// be cancelled from the caller.
///
/// ```
/// use modelshare_core::cancel::CancellationToken;
///
/// let token = CancellationToken::new();
/// let worker = token.clone();
/// token.cancel();
/// assert!(worker.is_cancelled());
/// ```
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Every clone observes it.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Return [`ModelShareError::Cancelled`] once cancellation was requested.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(ModelShareError::Cancelled)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_token_not_cancelled() {
        let token = CancellationToken::new();
        assert!(!token.is_cancelled());
        assert!(token.check().is_ok());
    }

    #[test]
    fn test_clone_shares_state() {
        let token = CancellationToken::new();
        let clone = token.clone();
        clone.cancel();
        assert!(token.is_cancelled());
        assert!(matches!(token.check(), Err(ModelShareError::Cancelled)));
    }

    #[tokio::test]
    async fn test_cancel_across_tasks() {
        let token = CancellationToken::new();
        let worker = token.clone();

        let handle = tokio::spawn(async move {
            while !worker.is_cancelled() {
                tokio::task::yield_now().await;
            }
            worker.check()
        });

        token.cancel();
        assert!(handle.await.unwrap().is_err());
    }
}
