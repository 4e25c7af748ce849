//! Cancellation token for caller-driven poll loops.
//!
//! A [`CancellationToken`] is handed to [`Subscription::changes`] so a signal
//! handler (or any other task) can end the change stream, including while it
//! is parked in a long-poll or in the sleep between polls.
//!
//! Cancelling never tears down server-side state. The caller still owns the
//! subscription and must call `stop_comet()` afterwards.
//!
//! [`Subscription::changes`]: crate::comet::Subscription::changes

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// A cancellation token shared between a poll loop and whoever stops it.
///
/// # Example
///
/// ```
/// use nso_jsonrpc::CancellationToken;
///
/// let token = CancellationToken::new();
/// let handler_token = token.clone();
///
/// // e.g. from a ctrl-c handler
/// handler_token.cancel();
/// assert!(token.is_cancelled());
/// ```
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

    /// Request cancellation and wake every task waiting in [`cancelled`].
    ///
    /// [`cancelled`]: CancellationToken::cancelled
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Resolve once the token is cancelled.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}
