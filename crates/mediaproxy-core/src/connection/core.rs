//! Shared lifecycle state embedded by both [`super::ConnectionBase`] and
//! `crate::group`'s group variants: the atomic state/status pair, the link
//! lock, metrics, and the establish-context bookkeeping. Factoring this out
//! avoids re-deriving the FSM and link-lock plumbing for every `Connection`
//! implementor (spec.md §9 "Deep inheritance").

use super::{Kind, State, Status};
use crate::cancel::CancellationToken;
use crate::metrics::ConnectionMetrics;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;

use super::Connection;

pub(crate) struct ConnectionCore {
    kind: Kind,
    state: AtomicU8,
    status: AtomicU8,
    /// Non-owning: the manager that created the peer owns its lifetime.
    link: AsyncMutex<Option<Weak<dyn Connection>>>,
    metrics: ConnectionMetrics,
    establish_ctx: parking_lot::Mutex<Option<CancellationToken>>,
    establish_task: parking_lot::Mutex<Option<JoinHandle<()>>>,
    shutdown_task: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionCore {
    pub(crate) fn new(kind: Kind) -> Self {
        ConnectionCore {
            kind,
            state: AtomicU8::new(State::NotConfigured as u8),
            status: AtomicU8::new(Status::Initial as u8),
            link: AsyncMutex::new(None),
            metrics: ConnectionMetrics::default(),
            establish_ctx: parking_lot::Mutex::new(None),
            establish_task: parking_lot::Mutex::new(None),
            shutdown_task: parking_lot::Mutex::new(None),
        }
    }

    pub(crate) fn kind(&self) -> Kind {
        self.kind
    }

    pub(crate) fn state(&self) -> State {
        State::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn set_state(&self, s: State) {
        self.state.store(s as u8, Ordering::Release);
    }

    pub(crate) fn status(&self) -> Status {
        Status::from_u8(self.status.load(Ordering::Acquire))
    }

    pub(crate) fn set_status(&self, s: Status) {
        self.status.store(s as u8, Ordering::Release);
    }

    pub(crate) fn metrics(&self) -> &ConnectionMetrics {
        &self.metrics
    }

    /// Current link, upgraded from the stored weak handle. `None` both when
    /// nothing is linked and when the peer has already been destroyed.
    pub(crate) async fn link(&self) -> Option<Arc<dyn Connection>> {
        self.link.lock().await.as_ref().and_then(Weak::upgrade)
    }

    /// Non-blocking snapshot for the `Connection::link()` observer, which
    /// is documented to never block. Reports `None` under contention rather
    /// than waiting, since contention only happens around a concurrent
    /// `set_link`/`transmit` and a momentarily-stale diagnostic read is
    /// preferable to blocking an observer call.
    pub(crate) fn try_link_snapshot(&self) -> Option<Arc<dyn Connection>> {
        self.link
            .try_lock()
            .ok()
            .and_then(|guard| guard.as_ref().and_then(Weak::upgrade))
    }

    /// Replaces the link unconditionally. Returns the previous link's weak
    /// handle for the caller to compare or drop.
    pub(crate) async fn replace_link(
        &self,
        new_link: Option<Arc<dyn Connection>>,
    ) -> Option<Weak<dyn Connection>> {
        let mut guard = self.link.lock().await;
        let previous = guard.take();
        *guard = new_link.map(|l| Arc::downgrade(&l));
        previous
    }

    /// True if the currently-held link handle points at the same object as
    /// `candidate` (both `None` counts as equal).
    pub(crate) async fn link_is(&self, candidate: Option<&Arc<dyn Connection>>) -> bool {
        let guard = self.link.lock().await;
        match (guard.as_ref(), candidate) {
            (None, None) => true,
            (Some(existing), Some(candidate)) => existing.ptr_eq(&Arc::downgrade(candidate)),
            _ => false,
        }
    }

    /// Removes the link only if it currently points at `requester`. Returns
    /// whether a removal happened.
    pub(crate) async fn detach_if_linked_to(&self, requester: &Arc<dyn Connection>) -> bool {
        let mut guard = self.link.lock().await;
        let matches = guard
            .as_ref()
            .map(|existing| existing.ptr_eq(&Arc::downgrade(requester)))
            .unwrap_or(false);
        if matches {
            *guard = None;
        }
        matches
    }

    pub(crate) fn set_establish_ctx(&self, ctx: Option<CancellationToken>) {
        *self.establish_ctx.lock() = ctx;
    }

    pub(crate) fn cancel_establish_ctx(&self) {
        if let Some(ctx) = self.establish_ctx.lock().take() {
            ctx.cancel();
        }
    }

    pub(crate) fn set_establish_task(&self, handle: Option<JoinHandle<()>>) {
        *self.establish_task.lock() = handle;
    }

    pub(crate) fn take_establish_task(&self) -> Option<JoinHandle<()>> {
        self.establish_task.lock().take()
    }

    pub(crate) fn set_shutdown_task(&self, handle: Option<JoinHandle<()>>) {
        *self.shutdown_task.lock() = handle;
    }

    pub(crate) fn take_shutdown_task(&self) -> Option<JoinHandle<()>> {
        self.shutdown_task.lock().take()
    }
}
