//! The one concrete lifecycle wrapper every leaf `Connection` is built from
//! (spec.md §4.2). A subtype supplies [`super::ConnectionHooks`]; this type
//! supplies the state machine, the link lock, metrics bookkeeping, and the
//! async establish/shutdown task plumbing.

use super::{Connection, ConnectionCore, ConnectionHooks, Kind, State, Status};
use crate::cancel::CancellationToken;
use crate::error::{CoreError, Result};
use crate::metrics::ConnectionMetrics;
use async_trait::async_trait;
use std::sync::{Arc, Weak};

pub struct ConnectionBase<H: ConnectionHooks> {
    core: ConnectionCore,
    hooks: H,
    /// A weak handle to its own `Arc`, populated at construction via
    /// `Arc::new_cyclic`. `establish_async`/`shutdown_async` upgrade this to
    /// spawn a task that outlives the call without ever detaching: if the
    /// owning `Arc` has already been dropped the upgrade fails and the task
    /// is a no-op, which cannot happen while the REDESIGN FLAGS contract
    /// (every spawned task is joined before its owner is destroyed) holds.
    self_handle: Weak<ConnectionBase<H>>,
}

impl<H: ConnectionHooks> ConnectionBase<H> {
    pub fn new(kind: Kind, hooks: H) -> Arc<Self> {
        Arc::new_cyclic(|weak| ConnectionBase {
            core: ConnectionCore::new(kind),
            hooks,
            self_handle: weak.clone(),
        })
    }

    pub fn hooks(&self) -> &H {
        &self.hooks
    }

    /// Moves the state machine into `configured`. Valid only from
    /// `not_configured`; the rest of the contract (establish, shutdown)
    /// applies only once a subtype has finished configuring itself.
    pub fn mark_configured(&self) -> Result<()> {
        if self.core.state() != State::NotConfigured {
            return Err(CoreError::wrong_state("configure requires not_configured"));
        }
        self.core.set_state(State::Configured);
        self.core.set_status(Status::Initial);
        Ok(())
    }
}

#[async_trait]
impl<H: ConnectionHooks> Connection for ConnectionBase<H> {
    fn kind(&self) -> Kind {
        self.core.kind()
    }

    fn state(&self) -> State {
        self.core.state()
    }

    fn status(&self) -> Status {
        self.core.status()
    }

    fn link(&self) -> Option<Arc<dyn Connection>> {
        self.core.try_link_snapshot()
    }

    async fn set_link(
        &self,
        ctx: &CancellationToken,
        new_link: Option<Arc<dyn Connection>>,
        _requester: Option<&Arc<dyn Connection>>,
    ) -> Result<()> {
        if self.core.link_is(new_link.as_ref()).await {
            return Ok(());
        }
        self.core.replace_link(new_link.clone()).await;
        self.hooks.on_link_changed(ctx, new_link.as_ref()).await
    }

    async fn establish(&self, ctx: &CancellationToken) -> Result<()> {
        match self.core.state() {
            State::Configured | State::Closed => {}
            _ => return Err(CoreError::wrong_state("establish requires configured or closed")),
        }
        self.core.set_state(State::Establishing);
        self.core.set_status(Status::Transition);
        let child = CancellationToken::with_cancel(ctx);
        self.core.set_establish_ctx(Some(child.clone()));

        let result = self.hooks.on_establish(&child).await;
        self.core.set_establish_ctx(None);
        match &result {
            Ok(()) => {
                self.core.set_state(State::Active);
                self.core.set_status(Status::Healthy);
            }
            Err(_) => {
                self.core.set_state(State::Closed);
                self.core.set_status(Status::Failure);
            }
        }
        result
    }

    async fn establish_async(&self, ctx: &CancellationToken) -> Result<()> {
        match self.core.state() {
            State::Configured | State::Closed => {}
            _ => return Err(CoreError::wrong_state("establish requires configured or closed")),
        }
        self.core.set_state(State::Establishing);
        self.core.set_status(Status::Transition);
        let child = CancellationToken::with_cancel(ctx);
        self.core.set_establish_ctx(Some(child.clone()));

        let weak = self.self_handle.clone();
        let handle = tokio::spawn(async move {
            let Some(this) = weak.upgrade() else { return };
            let result = this.hooks.on_establish(&child).await;
            this.core.set_establish_ctx(None);
            match result {
                Ok(()) => {
                    this.core.set_state(State::Active);
                    this.core.set_status(Status::Healthy);
                }
                Err(_) => {
                    this.core.set_state(State::Closed);
                    this.core.set_status(Status::Failure);
                }
            }
        });
        self.core.set_establish_task(Some(handle));
        Ok(())
    }

    async fn suspend(&self, _ctx: &CancellationToken) -> Result<()> {
        if self.core.state() != State::Active {
            return Err(CoreError::wrong_state("suspend requires active"));
        }
        self.core.set_state(State::Suspended);
        Ok(())
    }

    async fn resume(&self, _ctx: &CancellationToken) -> Result<()> {
        if self.core.state() != State::Suspended {
            return Err(CoreError::wrong_state("resume requires suspended"));
        }
        self.core.set_state(State::Active);
        Ok(())
    }

    async fn shutdown(&self, ctx: &CancellationToken) -> Result<()> {
        if self.core.state() == State::Deleting {
            return Err(CoreError::wrong_state("shutdown invalid while deleting"));
        }
        if self.core.state() == State::Closed {
            return Ok(());
        }
        self.core.cancel_establish_ctx();
        if let Some(task) = self.core.take_establish_task() {
            let _ = task.await;
        }
        self.core.set_state(State::Closing);
        self.core.set_status(Status::Transition);
        let result = self.hooks.on_shutdown(ctx).await;
        self.core.set_state(State::Closed);
        self.core.set_status(Status::Shutdown);
        result
    }

    async fn shutdown_async(&self, ctx: &CancellationToken) -> Result<()> {
        if self.core.state() == State::Deleting {
            return Err(CoreError::wrong_state("shutdown invalid while deleting"));
        }
        if self.core.state() == State::Closed {
            return Ok(());
        }
        self.core.set_state(State::Closing);
        self.core.set_status(Status::Transition);
        let ctx = ctx.clone();

        let weak = self.self_handle.clone();
        let handle = tokio::spawn(async move {
            let Some(this) = weak.upgrade() else { return };
            this.core.cancel_establish_ctx();
            if let Some(task) = this.core.take_establish_task() {
                let _ = task.await;
            }
            let _ = this.hooks.on_shutdown(&ctx).await;
            this.core.set_state(State::Closed);
            this.core.set_status(Status::Shutdown);
        });
        self.core.set_shutdown_task(Some(handle));
        Ok(())
    }

    async fn do_receive(&self, ctx: &CancellationToken, data: &[u8]) -> Result<usize> {
        if self.core.state() != State::Active {
            return Err(CoreError::wrong_state("do_receive requires active"));
        }
        self.core.metrics().record_inbound(data.len() as u64);
        match self.hooks.on_receive(ctx, data, self.core.metrics()).await {
            Ok(n) => {
                self.core.metrics().record_success();
                Ok(n)
            }
            Err(e) => {
                self.core.metrics().record_failure();
                self.core.metrics().record_error();
                Err(e)
            }
        }
    }

    async fn transmit(&self, ctx: &CancellationToken, data: &[u8]) -> Result<usize> {
        if self.core.state() != State::Active {
            return Err(CoreError::wrong_state("transmit requires active"));
        }
        let peer = match self.core.link().await {
            Some(peer) => peer,
            None => return Err(CoreError::no_link_assigned()),
        };
        match peer.do_receive(ctx, data).await {
            Ok(n) => {
                self.core.metrics().record_outbound(n as u64);
                Ok(n)
            }
            Err(e) => {
                self.core.metrics().record_failure();
                self.core.metrics().record_error();
                Err(e)
            }
        }
    }

    fn metrics(&self) -> &ConnectionMetrics {
        self.core.metrics()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancellationToken;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct Hooks {
        fail_establish: AtomicBool,
    }

    #[async_trait]
    impl ConnectionHooks for Hooks {
        async fn on_establish(&self, _ctx: &CancellationToken) -> Result<()> {
            if self.fail_establish.load(Ordering::SeqCst) {
                Err(CoreError::general_failure("forced failure"))
            } else {
                Ok(())
            }
        }

        async fn on_shutdown(&self, _ctx: &CancellationToken) -> Result<()> {
            Ok(())
        }

        async fn on_receive(
            &self,
            _ctx: &CancellationToken,
            data: &[u8],
            _metrics: &ConnectionMetrics,
        ) -> Result<usize> {
            Ok(data.len())
        }
    }

    fn new_conn(kind: Kind) -> Arc<ConnectionBase<Hooks>> {
        ConnectionBase::new(
            kind,
            Hooks {
                fail_establish: AtomicBool::new(false),
            },
        )
    }

    #[tokio::test]
    async fn configure_establish_shutdown_follows_diagram() {
        let conn = new_conn(Kind::Receiver);
        let ctx = CancellationToken::new();
        assert_eq!(conn.state(), State::NotConfigured);
        conn.mark_configured().unwrap();
        assert_eq!(conn.state(), State::Configured);
        conn.establish(&ctx).await.unwrap();
        assert_eq!(conn.state(), State::Active);
        assert_eq!(conn.status(), Status::Healthy);
        conn.shutdown(&ctx).await.unwrap();
        assert_eq!(conn.state(), State::Closed);
    }

    #[tokio::test]
    async fn establish_failure_lands_on_closed_with_failure_status() {
        let conn = new_conn(Kind::Receiver);
        conn.hooks().fail_establish.store(true, Ordering::SeqCst);
        let ctx = CancellationToken::new();
        conn.mark_configured().unwrap();
        assert!(conn.establish(&ctx).await.is_err());
        assert_eq!(conn.state(), State::Closed);
        assert_eq!(conn.status(), Status::Failure);
    }

    #[tokio::test]
    async fn shutdown_on_closed_is_idempotent_no_transition() {
        let conn = new_conn(Kind::Receiver);
        let ctx = CancellationToken::new();
        conn.mark_configured().unwrap();
        conn.establish(&ctx).await.unwrap();
        conn.shutdown(&ctx).await.unwrap();
        assert_eq!(conn.state(), State::Closed);
        conn.shutdown(&ctx).await.unwrap();
        assert_eq!(conn.state(), State::Closed);
    }

    #[tokio::test]
    async fn do_receive_rejects_when_not_active() {
        let conn = new_conn(Kind::Receiver);
        let ctx = CancellationToken::new();
        let err = conn.do_receive(&ctx, &[1, 2, 3]).await.unwrap_err();
        assert!(matches!(err, CoreError::WrongState { .. }));
    }

    #[tokio::test]
    async fn transmit_without_link_reports_no_link_assigned() {
        let conn = new_conn(Kind::Transmitter);
        let ctx = CancellationToken::new();
        conn.mark_configured().unwrap();
        conn.establish(&ctx).await.unwrap();
        let err = conn.transmit(&ctx, &[1]).await.unwrap_err();
        assert!(matches!(err, CoreError::NoLinkAssigned { .. }));
    }

    #[tokio::test]
    async fn set_link_to_same_peer_is_a_no_op() {
        let a = new_conn(Kind::Transmitter);
        let b: Arc<dyn Connection> = new_conn(Kind::Receiver);
        let ctx = CancellationToken::new();
        a.set_link(&ctx, Some(b.clone()), None).await.unwrap();
        a.set_link(&ctx, Some(b.clone()), None).await.unwrap();
        assert!(a.link().is_some());
    }

    #[tokio::test]
    async fn transmit_forwards_bytes_to_linked_peer() {
        let tx = new_conn(Kind::Transmitter);
        let rx = new_conn(Kind::Receiver);
        let ctx = CancellationToken::new();
        tx.mark_configured().unwrap();
        tx.establish(&ctx).await.unwrap();
        rx.mark_configured().unwrap();
        rx.establish(&ctx).await.unwrap();
        let rx: Arc<dyn Connection> = rx;
        tx.set_link(&ctx, Some(rx.clone()), None).await.unwrap();
        let n = tx.transmit(&ctx, &[1, 2, 3, 4]).await.unwrap();
        assert_eq!(n, 4);
        assert_eq!(tx.metrics().outbound_bytes(), 4);
    }

    #[tokio::test]
    async fn establish_async_reaches_active_without_blocking_caller() {
        let conn = new_conn(Kind::Receiver);
        let ctx = CancellationToken::new();
        conn.mark_configured().unwrap();
        conn.establish_async(&ctx).await.unwrap();
        // Give the spawned task a chance to run to completion.
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        assert_eq!(conn.state(), State::Active);
    }

    struct SlowHooks {
        shutdown_calls: AtomicUsize,
    }

    #[async_trait]
    impl ConnectionHooks for SlowHooks {
        async fn on_establish(&self, ctx: &CancellationToken) -> Result<()> {
            tokio::select! {
                _ = tokio::time::sleep(std::time::Duration::from_secs(2)) => Ok(()),
                _ = ctx.wait_done() => Err(CoreError::context_cancelled()),
            }
        }

        async fn on_shutdown(&self, _ctx: &CancellationToken) -> Result<()> {
            self.shutdown_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn on_receive(
            &self,
            _ctx: &CancellationToken,
            data: &[u8],
            _metrics: &ConnectionMetrics,
        ) -> Result<usize> {
            Ok(data.len())
        }
    }

    // spec.md §8 S3: cancel a 2s establish after 10ms, then shut down; the
    // establish task must observe cancellation and return, on_shutdown must
    // run exactly once, and the connection must land on `closed`.
    #[tokio::test]
    async fn s3_cancel_while_establishing_then_shutdown_reaches_closed() {
        let conn = ConnectionBase::new(
            Kind::Receiver,
            SlowHooks {
                shutdown_calls: AtomicUsize::new(0),
            },
        );
        let ctx = CancellationToken::new();
        conn.mark_configured().unwrap();
        conn.establish_async(&ctx).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        ctx.cancel();
        conn.shutdown_async(&ctx).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        assert_eq!(conn.state(), State::Closed);
        assert_eq!(conn.hooks().shutdown_calls.load(Ordering::SeqCst), 1);
    }
}
