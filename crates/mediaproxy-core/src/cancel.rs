//! Hierarchical cancellation tokens (spec.md §4.1.1).
//!
//! Grounded on `original_source/media-proxy/include/mesh/concurrency.h`'s
//! `context::Context`/`WithCancel`/`WithTimeout` trio, reimplemented as a
//! `Send + Sync` token usable from any tokio task or blocking thread. Unlike
//! `spark-core::contract::Cancellation` (whose `child()` just clones the
//! shared atomic, so cancelling a "child" also cancels the "parent"), this
//! token keeps a real parent → child edge: a parent registers a weak
//! reference to each child and cancels them first when it is cancelled or
//! dropped, but a cancelled child never reaches back up to its parent.
//!
//! Cancellation carries no failure mode of its own (spec.md §4.1.1
//! "Failure model"): a consumer that never consults the token is simply
//! never interrupted.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::Notify;

struct Inner {
    cancelled: AtomicBool,
    notify: Notify,
    children: Mutex<Vec<Weak<Inner>>>,
}

impl Inner {
    fn new() -> Self {
        Inner {
            cancelled: AtomicBool::new(false),
            notify: Notify::new(),
            children: Mutex::new(Vec::new()),
        }
    }

    /// Marks this node cancelled and propagates to every live child.
    /// Idempotent: only the first caller pays the propagation cost.
    fn mark_cancelled(&self) {
        if self
            .cancelled
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.notify.notify_waiters();
            let children = std::mem::take(&mut *self.children.lock());
            for weak in children {
                if let Some(child) = weak.upgrade() {
                    child.mark_cancelled();
                }
            }
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        // "destroying a parent before its children cancels them first".
        self.mark_cancelled();
    }
}

/// A shared, hierarchical "please stop" signal.
///
/// Clone is cheap (`Arc` bump) and every clone observes the same state.
#[derive(Clone)]
pub struct CancellationToken {
    inner: Arc<Inner>,
}

impl CancellationToken {
    /// Creates a root token in the "not cancelled" state.
    pub fn new() -> Self {
        CancellationToken {
            inner: Arc::new(Inner::new()),
        }
    }

    /// Derives a child that is cancelled whenever `parent` is cancelled
    /// (now or later); cancelling the child has no effect on `parent`.
    pub fn with_cancel(parent: &CancellationToken) -> Self {
        parent.child()
    }

    /// Like [`Self::with_cancel`], plus the child auto-cancels after `d`
    /// elapses. `d == Duration::ZERO` cancels on construction so that
    /// "cancels immediately on the first observation" holds without
    /// requiring a scheduler tick.
    pub fn with_timeout(parent: &CancellationToken, d: Duration) -> Self {
        let child = parent.child();
        if d.is_zero() {
            child.cancel();
            return child;
        }
        let timer_token = child.clone();
        tokio::spawn(async move {
            tokio::time::sleep(d).await;
            timer_token.cancel();
        });
        child
    }

    fn child(&self) -> Self {
        let child_inner = Arc::new(Inner::new());
        if self.inner.cancelled.load(Ordering::Acquire) {
            child_inner.mark_cancelled();
        } else {
            self.inner.children.lock().push(Arc::downgrade(&child_inner));
        }
        CancellationToken { inner: child_inner }
    }

    /// Marks the token cancelled. Idempotent; wakes any blocked primitive
    /// observing this token. Returns `true` the first time it is called.
    pub fn cancel(&self) -> bool {
        let was_cancelled = self.inner.cancelled.load(Ordering::Acquire);
        self.inner.mark_cancelled();
        !was_cancelled
    }

    /// Current cancellation state. Never blocks.
    pub fn cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// Waits until the token is cancelled.
    pub async fn wait_done(&self) {
        loop {
            if self.cancelled() {
                return;
            }
            let notified = self.inner.notify.notified();
            if self.cancelled() {
                return;
            }
            notified.await;
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

    #[tokio::test]
    async fn child_inherits_parent_cancellation() {
        let parent = CancellationToken::new();
        let child = CancellationToken::with_cancel(&parent);
        let grandchild = CancellationToken::with_cancel(&child);
        assert!(!child.cancelled());
        parent.cancel();
        assert!(child.cancelled());
        assert!(grandchild.cancelled());
    }

    #[tokio::test]
    async fn child_cancellation_does_not_affect_parent() {
        let parent = CancellationToken::new();
        let child = CancellationToken::with_cancel(&parent);
        child.cancel();
        assert!(child.cancelled());
        assert!(!parent.cancelled());
    }

    #[tokio::test]
    async fn dropping_parent_cancels_children() {
        let parent = CancellationToken::new();
        let child = CancellationToken::with_cancel(&parent);
        drop(parent);
        assert!(child.cancelled());
    }

    #[tokio::test]
    async fn zero_timeout_cancels_immediately() {
        let parent = CancellationToken::new();
        let child = CancellationToken::with_timeout(&parent, Duration::ZERO);
        assert!(child.cancelled());
    }

    #[tokio::test]
    async fn wait_done_unblocks_on_cancel() {
        let token = CancellationToken::new();
        let waiter = token.clone();
        let handle = tokio::spawn(async move {
            waiter.wait_done().await;
        });
        token.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("wait_done should return promptly after cancel")
            .unwrap();
    }

    #[tokio::test]
    async fn cancel_is_idempotent() {
        let token = CancellationToken::new();
        assert!(token.cancel());
        assert!(!token.cancel());
    }
}
