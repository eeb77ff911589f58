//! The polymorphic `Connection` abstraction (spec.md §3 "Connection", §4.2).
//!
//! Grounded on `original_source/media-proxy/include/mesh/conn.h`'s
//! `Connection` base class, re-expressed per the REDESIGN FLAGS note on deep
//! inheritance: a single object-safe [`Connection`] trait with a small hook
//! set, plus one concrete generic lifecycle wrapper ([`ConnectionBase`])
//! that implements the state machine, link lock, metrics, and async tasks
//! exactly once. `Group` and its variants live in [`crate::group`] and embed
//! the same [`core::ConnectionCore`] rather than inheriting from this type.

mod base;
pub(crate) mod core;

pub use base::ConnectionBase;

use crate::error::{CoreError, Result};
use crate::metrics::ConnectionMetrics;
use async_trait::async_trait;
use std::sync::Arc;

/// Which side of the link a concrete `Connection` plays. Set once at
/// construction and never changes (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    Undefined,
    Transmitter,
    Receiver,
}

/// The lifecycle state machine (spec.md §4.2 "State machine"). Transitions
/// not drawn in the diagram are errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum State {
    NotConfigured = 0,
    Configured = 1,
    Establishing = 2,
    Active = 3,
    Suspended = 4,
    Closing = 5,
    Closed = 6,
    Deleting = 7,
}

impl State {
    pub fn name(self) -> &'static str {
        match self {
            State::NotConfigured => "not_configured",
            State::Configured => "configured",
            State::Establishing => "establishing",
            State::Active => "active",
            State::Suspended => "suspended",
            State::Closing => "closing",
            State::Closed => "closed",
            State::Deleting => "deleting",
        }
    }

    fn from_u8(v: u8) -> State {
        match v {
            0 => State::NotConfigured,
            1 => State::Configured,
            2 => State::Establishing,
            3 => State::Active,
            4 => State::Suspended,
            5 => State::Closing,
            6 => State::Closed,
            _ => State::Deleting,
        }
    }
}

/// Derived from [`State`] for the terminal/transient phases; reported by
/// the subtype for `active`/`suspended` (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Status {
    Initial = 0,
    Transition = 1,
    Healthy = 2,
    Failure = 3,
    Shutdown = 4,
}

impl Status {
    fn from_u8(v: u8) -> Status {
        match v {
            0 => Status::Initial,
            1 => Status::Transition,
            2 => Status::Healthy,
            3 => Status::Failure,
            _ => Status::Shutdown,
        }
    }
}

/// The small capability set a concrete subtype implements. Everything
/// state-machine-shaped (the FSM itself, the link lock, metrics,
/// establish/shutdown task plumbing) lives in [`ConnectionBase`] instead, so
/// a hook implementor only ever writes the behaviour that is actually
/// specific to it.
#[async_trait]
pub trait ConnectionHooks: Send + Sync + 'static {
    /// Called while the owning `ConnectionBase` is transitioning through
    /// `establishing`. Must honor `ctx` and release any partially-acquired
    /// resource if cancelled.
    async fn on_establish(&self, ctx: &crate::cancel::CancellationToken) -> Result<()>;

    /// Called while the owning `ConnectionBase` is transitioning through
    /// `closing`. Must be idempotent-safe to call once per lifetime.
    async fn on_shutdown(&self, ctx: &crate::cancel::CancellationToken) -> Result<()>;

    /// Hot-path delivery on the receiver side. The default rejects with
    /// `not_supported`, matching a transmitter-only subtype (spec.md §7).
    /// `metrics` is the owning `ConnectionBase`'s counters, for subtypes
    /// (e.g. a bridge wrapper) that record more than the generic
    /// inbound/success/failure accounting `ConnectionBase` already does.
    async fn on_receive(
        &self,
        _ctx: &crate::cancel::CancellationToken,
        _data: &[u8],
        _metrics: &ConnectionMetrics,
    ) -> Result<usize> {
        Err(CoreError::not_supported())
    }

    /// Called after a successful `set_link` with the newly-installed link,
    /// if any. Default no-op; a bridge wrapper uses this to initialise its
    /// gateway from the linked `ZeroCopyGroup`'s configuration (spec.md
    /// §4.6 "set_link initialises an internal gateway...").
    async fn on_link_changed(
        &self,
        _ctx: &crate::cancel::CancellationToken,
        _new_link: Option<&Arc<dyn Connection>>,
    ) -> Result<()> {
        Ok(())
    }
}

/// The object-safe base every participating entity implements: leaf
/// bridges, multipoint groups, bridge wrappers. Registries and links hold
/// `Arc<dyn Connection>` / `Weak<dyn Connection>` handles (spec.md §9
/// "Non-owning pointer graph").
#[async_trait]
pub trait Connection: Send + Sync {
    fn kind(&self) -> Kind;
    fn state(&self) -> State;
    fn status(&self) -> Status;

    /// The peer currently linked, if any. Upgrading a stale handle whose
    /// target has already been destroyed yields `None`.
    fn link(&self) -> Option<Arc<dyn Connection>>;

    async fn set_link(
        &self,
        ctx: &crate::cancel::CancellationToken,
        new_link: Option<Arc<dyn Connection>>,
        requester: Option<&Arc<dyn Connection>>,
    ) -> Result<()>;

    async fn establish(&self, ctx: &crate::cancel::CancellationToken) -> Result<()>;
    async fn establish_async(&self, ctx: &crate::cancel::CancellationToken) -> Result<()>;
    async fn suspend(&self, ctx: &crate::cancel::CancellationToken) -> Result<()>;
    async fn resume(&self, ctx: &crate::cancel::CancellationToken) -> Result<()>;
    async fn shutdown(&self, ctx: &crate::cancel::CancellationToken) -> Result<()>;
    async fn shutdown_async(&self, ctx: &crate::cancel::CancellationToken) -> Result<()>;

    /// Hot-path entry point on the receiver side.
    async fn do_receive(&self, ctx: &crate::cancel::CancellationToken, data: &[u8]) -> Result<usize>;

    /// Hot-path entry point on the transmitter side: forwards to the
    /// linked peer's `do_receive` while holding the link lock.
    async fn transmit(&self, ctx: &crate::cancel::CancellationToken, data: &[u8]) -> Result<usize>;

    fn metrics(&self) -> &ConnectionMetrics;

    /// `Some` only for a `ZeroCopyGroup`, whose finalised shared-memory
    /// descriptor a gateway peer needs (spec.md §4.5
    /// "zc_init_gateway_from_group"). Every other `Connection` keeps the
    /// default `None`.
    fn zc_config(&self) -> Option<crate::group::ZcConfig> {
        None
    }
}

pub(crate) use self::core::ConnectionCore;
