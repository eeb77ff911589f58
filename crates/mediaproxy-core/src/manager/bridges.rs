//! `BridgesManager` (spec.md §4.7).
//!
//! Grounded on `original_source/media-proxy/src/mesh/manager_bridges.cc`:
//! `create_bridge` derives a transport-specific construction plan from
//! `cfg.type`/`cfg.kind`, allocates the leaf bridge, establishes it, then
//! registers it under the manager's lock; `delete_bridge` breaks the
//! bidirectional link before removing the registry entry and shutting the
//! bridge down asynchronously. The transport-specific branch on
//! `cfg.bridge_type`/`st2110`/`rdma` is entirely inside the external
//! [`LeafBridgeFactory`] this crate defines (spec.md §1 "the concrete ST
//! 2110 and RDMA bridge implementations... are leaf Connections that honor
//! the same contract"), so `create_bridge` itself is just the allocate +
//! register choreography, not the per-transport `MeshConfig_*` field
//! mapping the original inlines.

use crate::bridge::{BridgeConfig, LeafBridgeFactory};
use crate::cancel::CancellationToken;
use crate::connection::Connection;
use crate::error::{CoreError, Result};
use crate::metrics::ProviderRegistry;
use crate::registry::ConnectionRegistry;
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{error, info};

/// Registry keyed by agent-assigned bridge id (spec.md §4.7).
pub struct BridgesManager {
    registry: ConnectionRegistry,
    metrics_registry: Arc<ProviderRegistry>,
    lock: Arc<AsyncMutex<()>>,
}

impl BridgesManager {
    pub fn new(metrics_registry: Arc<ProviderRegistry>) -> Self {
        BridgesManager {
            registry: ConnectionRegistry::new(),
            metrics_registry,
            lock: Arc::new(AsyncMutex::new(())),
        }
    }

    /// Allocates a leaf bridge from `cfg` via `factory`, establishes it,
    /// and registers it under `id` with its metrics identifier assigned
    /// (spec.md §4.7 "create_bridge"). The transport-specific allocate +
    /// configure + establish sequence lives entirely behind `factory`
    /// (see module docs); on success `id` resolves through [`Self::get`].
    pub async fn create_bridge(
        &self,
        ctx: &CancellationToken,
        factory: &dyn LeafBridgeFactory,
        id: impl Into<String>,
        cfg: &BridgeConfig,
    ) -> Result<Arc<dyn Connection>> {
        let id = id.into();
        let bridge = factory
            .create(cfg)
            .await
            .map_err(|e| CoreError::from_cause(format!("create_bridge({id}) failed"), e))?;

        let _guard = self.lock.lock().await;
        self.registry
            .add_with_metrics(id.clone(), bridge.clone(), &self.metrics_registry)
            .map_err(|_| CoreError::bad_argument(format!("bridge id '{id}' already registered")))?;
        info!(bridge_id = %id, "bridge created");
        let _ = ctx;
        Ok(bridge)
    }

    /// Breaks the bridge's bidirectional link (if any), removes it from
    /// the registry, then shuts it down asynchronously (spec.md §4.7
    /// "delete_bridge").
    pub async fn delete_bridge(&self, ctx: &CancellationToken, id: &str) -> Result<()> {
        let bridge = {
            let _guard = self.lock.lock().await;
            let bridge = self
                .registry
                .get(id)
                .ok_or_else(|| CoreError::bad_argument(format!("bridge '{id}' not found")))?;

            if let Some(peer) = bridge.link() {
                let _ = peer.set_link(ctx, None, Some(&bridge)).await;
                let _ = bridge.set_link(ctx, None, None).await;
            }
            self.registry.remove(id);
            bridge
        };

        bridge.shutdown_async(ctx).await
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn Connection>> {
        self.registry.get(id)
    }

    /// Snapshots ids and deletes each (spec.md §4.7 "shutdown").
    pub async fn shutdown(&self, ctx: &CancellationToken) {
        for id in self.registry.all_ids() {
            if let Err(e) = self.delete_bridge(ctx, &id).await {
                error!(bridge_id = %id, error = %e, "error deleting bridge during shutdown");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::{BridgeType, ConnConfig, RdmaParams, TransportParams};
    use crate::connection::{ConnectionBase, ConnectionHooks, Kind};
    use crate::metrics::ConnectionMetrics;
    use async_trait::async_trait;

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

    struct StubFactory {
        fail: bool,
    }

    #[async_trait]
    impl LeafBridgeFactory for StubFactory {
        async fn create(&self, cfg: &BridgeConfig) -> Result<Arc<dyn Connection>> {
            if self.fail {
                return Err(CoreError::general_failure("forced"));
            }
            let conn = ConnectionBase::new(cfg.kind, Leaf);
            conn.mark_configured()?;
            conn.establish(&CancellationToken::new()).await?;
            Ok(conn)
        }
    }

    fn cfg(kind: Kind) -> BridgeConfig {
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

    #[tokio::test]
    async fn create_then_get_then_delete() {
        let manager = BridgesManager::new(ProviderRegistry::new());
        let ctx = CancellationToken::new();
        let factory = StubFactory { fail: false };
        manager
            .create_bridge(&ctx, &factory, "b1", &cfg(Kind::Transmitter))
            .await
            .unwrap();
        assert!(manager.get("b1").is_some());
        manager.delete_bridge(&ctx, "b1").await.unwrap();
        assert!(manager.get("b1").is_none());
    }

    #[tokio::test]
    async fn create_failure_does_not_register() {
        let manager = BridgesManager::new(ProviderRegistry::new());
        let ctx = CancellationToken::new();
        let factory = StubFactory { fail: true };
        assert!(manager
            .create_bridge(&ctx, &factory, "b_bad", &cfg(Kind::Transmitter))
            .await
            .is_err());
        assert!(manager.get("b_bad").is_none());
    }

    #[tokio::test]
    async fn delete_missing_bridge_errors() {
        let manager = BridgesManager::new(ProviderRegistry::new());
        let ctx = CancellationToken::new();
        assert!(manager.delete_bridge(&ctx, "nope").await.is_err());
    }

    #[tokio::test]
    async fn shutdown_deletes_every_bridge() {
        let manager = BridgesManager::new(ProviderRegistry::new());
        let ctx = CancellationToken::new();
        let factory = StubFactory { fail: false };
        manager
            .create_bridge(&ctx, &factory, "b1", &cfg(Kind::Transmitter))
            .await
            .unwrap();
        manager
            .create_bridge(&ctx, &factory, "b2", &cfg(Kind::Receiver))
            .await
            .unwrap();
        manager.shutdown(&ctx).await;
        assert!(manager.get("b1").is_none());
        assert!(manager.get("b2").is_none());
    }
}
