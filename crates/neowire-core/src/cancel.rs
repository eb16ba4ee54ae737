//! Cancellation token for waits on the dispatcher.
//!
//! A claim can be abandoned from another task by cancelling the token it was
//! given. Unlike a bare `Arc<AtomicBool>`, waiters are woken on cancellation
//! instead of having to poll.

use crate::error::WireError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

#[derive(Debug, Default)]
struct TokenState {
    cancelled: AtomicBool,
    notify: Notify,
}

/// A cancellation token for cooperative cancellation of waits.
///
/// This token can be cloned and shared across tasks. When `cancel()` is called
/// on any clone, all clones observe the cancellation and every task parked in
/// [`CancellationToken::cancelled`] wakes up.
///
/// # Example
///
/// ```
/// use neowire_core::cancel::CancellationToken;
///
/// let token = CancellationToken::new();
/// let token_clone = token.clone();
///
/// token_clone.cancel();
/// assert!(token.is_cancelled());
/// ```
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    state: Arc<TokenState>,
}

impl CancellationToken {
    /// Create a new cancellation token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation and wake every waiter.
    pub fn cancel(&self) {
        self.state.cancelled.store(true, Ordering::SeqCst);
        self.state.notify.notify_waiters();
    }

    /// Check if cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.state.cancelled.load(Ordering::SeqCst)
    }

    /// Return `Err(WireError::Cancelled)` once cancellation has been requested.
    pub fn check(&self) -> Result<(), WireError> {
        if self.is_cancelled() {
            Err(WireError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Wait until the token is cancelled.
    ///
    /// Returns immediately if it already is.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.state.notify.notified();
            tokio::pin!(notified);
            // Register before re-checking the flag so a concurrent cancel is not missed.
            notified.as_mut().enable();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}
