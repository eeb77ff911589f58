//! `WrapperRx`/`WrapperTx` (spec.md §4.6), grounded on
//! `original_source/media-proxy/src/mesh/bridge_zc_wrap_{rx,tx}.cc`.
//!
//! Both wrappers reuse [`ConnectionBase`] for the state machine, link lock
//! and metrics it already provides, and supply only the behaviour specific
//! to wrapping a leaf bridge: building the inner bridge with its engine
//! option suppressed, initialising a gateway once linked to a
//! `ZeroCopyGroup`, and translating between gateway and connection results.

use super::gateway::{core_to_gateway, gateway_to_core, RxGateway, TxGateway};
use super::{BridgeConfig, LeafBridgeFactory};
use crate::cancel::CancellationToken;
use crate::connection::{Connection, ConnectionBase, ConnectionHooks, Kind};
use crate::error::Result;
use crate::group::zc_init_gateway_from_group;
use crate::metrics::ConnectionMetrics;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};

/// The receiver-side wrapper: the inner bridge delivers network frames by
/// calling `do_receive` on this wrapper (its `link`, set in `on_establish`);
/// the wrapper forwards them through the gateway into the shared region.
pub struct WrapperRxHooks {
    inner: Arc<dyn Connection>,
    gateway: Arc<dyn RxGateway>,
    self_handle: Mutex<Option<Weak<dyn Connection>>>,
}

impl WrapperRxHooks {
    fn self_as_connection(&self) -> Option<Arc<dyn Connection>> {
        self.self_handle.lock().as_ref().and_then(Weak::upgrade)
    }
}

#[async_trait]
impl ConnectionHooks for WrapperRxHooks {
    async fn on_establish(&self, ctx: &CancellationToken) -> Result<()> {
        let this = self
            .self_as_connection()
            .ok_or_else(|| crate::error::CoreError::general_failure("wrapper self-handle not installed"))?;
        self.inner.set_link(ctx, Some(this), None).await
    }

    async fn on_shutdown(&self, ctx: &CancellationToken) -> Result<()> {
        self.gateway.shutdown(ctx).await;
        self.inner.shutdown(ctx).await
    }

    async fn on_receive(
        &self,
        ctx: &CancellationToken,
        data: &[u8],
        _metrics: &ConnectionMetrics,
    ) -> Result<usize> {
        gateway_to_core(self.gateway.transmit(ctx, data).await)
    }

    async fn on_link_changed(
        &self,
        _ctx: &CancellationToken,
        new_link: Option<&Arc<dyn Connection>>,
    ) -> Result<()> {
        if let Some(group) = new_link {
            let cfg = zc_init_gateway_from_group(group)?;
            self.gateway.init(cfg).await?;
        }
        Ok(())
    }
}

/// Builds a `WrapperRx`: allocates the inner leaf bridge (with its `engine`
/// option suppressed, per spec.md §4.6) and transitions the wrapper to
/// `configured`.
pub async fn configure_wrapper_rx(
    factory: &dyn LeafBridgeFactory,
    cfg: &BridgeConfig,
    gateway: Arc<dyn RxGateway>,
) -> Result<Arc<ConnectionBase<WrapperRxHooks>>> {
    let inner = factory.create(cfg).await?;
    let wrapper = ConnectionBase::new(
        Kind::Receiver,
        WrapperRxHooks {
            inner,
            gateway,
            self_handle: Mutex::new(None),
        },
    );
    let as_dyn: Arc<dyn Connection> = wrapper.clone();
    *wrapper.hooks().self_handle.lock() = Some(Arc::downgrade(&as_dyn));
    wrapper.mark_configured()?;
    Ok(wrapper)
}

/// The transmitter-side wrapper: a group calls `do_receive` on this wrapper
/// (it is one of the group's outputs); the wrapper hands the buffer to the
/// inner bridge and reports the outcome back to the gateway.
pub struct WrapperTxHooks {
    inner: Arc<dyn Connection>,
    gateway: Arc<dyn TxGateway>,
}

#[async_trait]
impl ConnectionHooks for WrapperTxHooks {
    async fn on_establish(&self, _ctx: &CancellationToken) -> Result<()> {
        Ok(())
    }

    async fn on_shutdown(&self, ctx: &CancellationToken) -> Result<()> {
        self.gateway.shutdown(ctx).await;
        self.inner.shutdown(ctx).await
    }

    async fn on_receive(
        &self,
        ctx: &CancellationToken,
        data: &[u8],
        metrics: &ConnectionMetrics,
    ) -> Result<usize> {
        let result = self.inner.do_receive(ctx, data).await;
        if let Ok(n) = &result {
            metrics.record_outbound(*n as u64);
        }
        self.gateway.notify_result(core_to_gateway(&result)).await;
        result
    }

    async fn on_link_changed(
        &self,
        _ctx: &CancellationToken,
        new_link: Option<&Arc<dyn Connection>>,
    ) -> Result<()> {
        if let Some(group) = new_link {
            let cfg = zc_init_gateway_from_group(group)?;
            self.gateway.init(cfg).await?;
        }
        Ok(())
    }
}

/// Builds a `WrapperTx`: allocates the inner leaf bridge (engine
/// suppressed) and transitions the wrapper to `configured`.
pub async fn configure_wrapper_tx(
    factory: &dyn LeafBridgeFactory,
    cfg: &BridgeConfig,
    gateway: Arc<dyn TxGateway>,
) -> Result<Arc<ConnectionBase<WrapperTxHooks>>> {
    let inner = factory.create(cfg).await?;
    let wrapper = ConnectionBase::new(Kind::Transmitter, WrapperTxHooks { inner, gateway });
    wrapper.mark_configured()?;
    Ok(wrapper)
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::gateway::GatewayOutcome;
    use crate::bridge::{BridgeType, ConnConfig, RdmaParams, TransportParams};
    use crate::group::ZcConfig;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Leaf;

    #[async_trait]
    impl ConnectionHooks for Leaf {
        async fn on_establish(&self, _ctx: &CancellationToken) -> Result<()> {
            Ok(())
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

    struct StubFactory;

    #[async_trait]
    impl LeafBridgeFactory for StubFactory {
        async fn create(&self, cfg: &BridgeConfig) -> Result<Arc<dyn Connection>> {
            let conn = ConnectionBase::new(cfg.kind, Leaf);
            conn.mark_configured()?;
            conn.establish(&CancellationToken::new()).await?;
            Ok(conn)
        }
    }

    fn rdma_config(kind: Kind) -> BridgeConfig {
        BridgeConfig {
            bridge_type: BridgeType::Rdma,
            kind,
            conn_config: ConnConfig::Audio {
                channels: 2,
                sample_rate: 48_000,
                format: "pcm".into(),
                packet_time_us: 1_000,
            },
            transport: TransportParams::Rdma(RdmaParams {
                remote_ip: "10.0.0.1".into(),
                port: 9000,
            }),
        }
    }

    struct NoopRxGateway {
        transmitted: AtomicUsize,
    }

    #[async_trait]
    impl RxGateway for NoopRxGateway {
        async fn init(&self, _cfg: ZcConfig) -> Result<()> {
            Ok(())
        }
        async fn transmit(
            &self,
            _ctx: &CancellationToken,
            data: &[u8],
        ) -> super::super::gateway::GatewayResult<usize> {
            self.transmitted.fetch_add(data.len(), Ordering::SeqCst);
            Ok(data.len())
        }
        async fn shutdown(&self, _ctx: &CancellationToken) {}
    }

    #[tokio::test]
    async fn wrapper_rx_forwards_inner_bridge_delivery_through_gateway() {
        let ctx = CancellationToken::new();
        let gateway = Arc::new(NoopRxGateway {
            transmitted: AtomicUsize::new(0),
        });
        let wrapper = configure_wrapper_rx(&StubFactory, &rdma_config(Kind::Receiver), gateway.clone())
            .await
            .unwrap();
        wrapper.establish(&ctx).await.unwrap();

        let n = wrapper.do_receive(&ctx, &[1, 2, 3]).await.unwrap();
        assert_eq!(n, 3);
        assert_eq!(gateway.transmitted.load(Ordering::SeqCst), 3);
    }

    struct NoopTxGateway {
        last_outcome: Mutex<Option<GatewayOutcome>>,
    }

    #[async_trait]
    impl TxGateway for NoopTxGateway {
        async fn init(&self, _cfg: ZcConfig) -> Result<()> {
            Ok(())
        }
        async fn notify_result(&self, outcome: GatewayOutcome) {
            *self.last_outcome.lock() = Some(outcome);
        }
        async fn shutdown(&self, _ctx: &CancellationToken) {}
    }

    #[tokio::test]
    async fn wrapper_tx_forwards_to_inner_bridge_and_reports_outcome() {
        let ctx = CancellationToken::new();
        let gateway = Arc::new(NoopTxGateway {
            last_outcome: Mutex::new(None),
        });
        let wrapper = configure_wrapper_tx(&StubFactory, &rdma_config(Kind::Transmitter), gateway.clone())
            .await
            .unwrap();
        wrapper.establish(&ctx).await.unwrap();

        let n = wrapper.do_receive(&ctx, &[9, 9]).await.unwrap();
        assert_eq!(n, 2);
        assert_eq!(wrapper.metrics().outbound_bytes(), 2);
        assert_eq!(*gateway.last_outcome.lock(), Some(GatewayOutcome::Success));
    }
}
