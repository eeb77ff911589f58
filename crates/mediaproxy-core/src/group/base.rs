//! The one concrete `Group` lifecycle wrapper, generic over a fan-out
//! [`FanOutStrategy`] (spec.md §4.3 "Group base").

use super::FanOutStrategy;
use crate::cancel::CancellationToken;
use crate::connection::{Connection, ConnectionCore, Kind, State, Status};
use crate::error::{CoreError, Result};
use crate::metrics::ConnectionMetrics;
use async_trait::async_trait;
use std::sync::{Arc, Weak};
use tokio::sync::Mutex as AsyncMutex;

pub struct GroupBase<S: FanOutStrategy> {
    core: ConnectionCore,
    /// Authoritative membership; mutated only by the owning manager through
    /// `assign_input`/`add_output`/a detaching `set_link`.
    outputs: AsyncMutex<Vec<Arc<dyn Connection>>>,
    strategy: S,
    self_handle: Weak<GroupBase<S>>,
}

impl<S: FanOutStrategy> GroupBase<S> {
    pub fn new(strategy: S) -> Arc<Self> {
        Arc::new_cyclic(|weak| GroupBase {
            core: ConnectionCore::new(Kind::Transmitter),
            outputs: AsyncMutex::new(Vec::new()),
            strategy,
            self_handle: weak.clone(),
        })
    }

    pub fn strategy(&self) -> &S {
        &self.strategy
    }

    pub fn mark_configured(&self) -> Result<()> {
        if self.core.state() != State::NotConfigured {
            return Err(CoreError::wrong_state("configure requires not_configured"));
        }
        self.core.set_state(State::Configured);
        self.core.set_status(Status::Initial);
        Ok(())
    }

    /// Requires `input.kind() == Receiver` (spec.md §4.3).
    pub async fn assign_input(
        &self,
        _ctx: &CancellationToken,
        input: Arc<dyn Connection>,
    ) -> Result<()> {
        if input.kind() != Kind::Receiver {
            return Err(CoreError::bad_argument("assign_input requires kind == receiver"));
        }
        if self.core.link_is(Some(&input)).await {
            return Ok(());
        }
        self.core.replace_link(Some(input)).await;
        self.notify_outputs_updated().await;
        Ok(())
    }

    /// Requires `output.kind() == Transmitter` (spec.md §4.3). Idempotent
    /// if `output` is already a member (the no-duplicates invariant, §3).
    pub async fn add_output(
        &self,
        _ctx: &CancellationToken,
        output: Arc<dyn Connection>,
    ) -> Result<()> {
        if output.kind() != Kind::Transmitter {
            return Err(CoreError::bad_argument("add_output requires kind == transmitter"));
        }
        {
            let mut outputs = self.outputs.lock().await;
            if outputs.iter().any(|o| Arc::ptr_eq(o, &output)) {
                return Ok(());
            }
            outputs.push(output);
        }
        self.notify_outputs_updated().await;
        Ok(())
    }

    async fn notify_outputs_updated(&self) {
        let snapshot = self.outputs.lock().await.clone();
        self.strategy.on_outputs_updated(snapshot).await;
    }
}

#[async_trait]
impl<S: FanOutStrategy> Connection for GroupBase<S> {
    fn kind(&self) -> Kind {
        Kind::Transmitter
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

    /// Dual meaning per spec.md §4.3: detaching `requester` (from the input
    /// slot, or failing that from the outputs list) when `new_link` is
    /// `None` and a `requester` is given; otherwise a normal link replace.
    async fn set_link(
        &self,
        _ctx: &CancellationToken,
        new_link: Option<Arc<dyn Connection>>,
        requester: Option<&Arc<dyn Connection>>,
    ) -> Result<()> {
        if new_link.is_none() {
            if let Some(requester) = requester {
                if self.core.detach_if_linked_to(requester).await {
                    self.notify_outputs_updated().await;
                    return Ok(());
                }
                let removed = {
                    let mut outputs = self.outputs.lock().await;
                    let before = outputs.len();
                    outputs.retain(|o| !Arc::ptr_eq(o, requester));
                    outputs.len() != before
                };
                if removed {
                    self.notify_outputs_updated().await;
                }
                return Ok(());
            }
        }
        if self.core.link_is(new_link.as_ref()).await {
            return Ok(());
        }
        self.core.replace_link(new_link).await;
        self.notify_outputs_updated().await;
        Ok(())
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
        let result = self.strategy.on_establish(&child).await;
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
            let result = this.strategy.on_establish(&child).await;
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
        self.core.replace_link(None).await;
        self.outputs.lock().await.clear();
        self.strategy.on_outputs_updated(Vec::new()).await;
        let result = self.strategy.on_shutdown(ctx).await;
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
            this.core.replace_link(None).await;
            this.outputs.lock().await.clear();
            this.strategy.on_outputs_updated(Vec::new()).await;
            let _ = this.strategy.on_shutdown(&ctx).await;
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
        if self.core.link().await.is_none() {
            return Err(CoreError::no_link_assigned());
        }
        self.core.metrics().record_inbound(data.len() as u64);
        match self.strategy.deliver(ctx, data, self.core.metrics()).await {
            Ok(n) => {
                self.core.metrics().record_success();
                Ok(n)
            }
            Err(e) => {
                self.core.metrics().record_failure();
                Err(e)
            }
        }
    }

    async fn transmit(&self, _ctx: &CancellationToken, _data: &[u8]) -> Result<usize> {
        Err(CoreError::not_supported())
    }

    fn metrics(&self) -> &ConnectionMetrics {
        self.core.metrics()
    }

    fn zc_config(&self) -> Option<super::ZcConfig> {
        self.strategy.zc_config()
    }
}
