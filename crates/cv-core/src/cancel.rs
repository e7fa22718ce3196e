// SPDX-License-Identifier: MIT OR Apache-2.0
//! Cancellation token threaded through a job and both worker pools.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;

/// Cloneable cancellation signal shared by one job's pools and consumers.
///
/// Every clone observes the same state: once any holder calls
/// [`cancel`](Self::cancel), `is_cancelled()` reads `true` everywhere and
/// all pending [`cancelled`](Self::cancelled) futures resolve. Cancelling
/// is idempotent and cannot be undone.
#[derive(Clone, Default)]
pub struct CancellationToken {
    shared: Arc<Shared>,
}

#[derive(Default)]
struct Shared {
    flag: AtomicBool,
    notify: Notify,
}

impl CancellationToken {
    /// A fresh, un-cancelled token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal cancellation to every clone.
    pub fn cancel(&self) {
        self.shared.flag.store(true, Ordering::SeqCst);
        self.shared.notify.notify_waiters();
    }

    /// Whether cancellation has been signalled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.shared.flag.load(Ordering::SeqCst)
    }

    /// Resolves once the token is cancelled; immediately if it already is.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.shared.notify.notified();
            tokio::pin!(notified);
            // Register interest before reading the flag, otherwise a
            // cancel landing between the check and the await is lost.
            notified.as_mut().enable();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

impl std::fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
