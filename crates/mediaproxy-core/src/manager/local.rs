//! `LocalManager` (spec.md §4.8).
//!
//! Grounded on `original_source/media-proxy/src/mesh/manager_local.cc`'s
//! `create_connection_sdk`/`delete_connection_sdk`: mint a fresh id with up
//! to five collision retries, configure + establish the shared-memory
//! interface, then register. The original declares two registries
//! (`registry_sdk`, the SDK-assigned ids; `registry`, the agent-assigned
//! ids) but its `.cc` only ever populates the agent-id one; this
//! reimplementation actually fills both, since the reconciler needs to
//! resolve a `Config`'s agent-assigned `conn_ids` (spec.md §4.9) while the
//! SDK surface needs to resolve its own minted id for `ActivateConnection`/
//! `DeleteConnection` (spec.md §6.2) — recorded as a resolved Open Question
//! in `DESIGN.md`.

use crate::bridge::ConnConfig;
use crate::cancel::CancellationToken;
use crate::connection::{Connection, Kind};
use crate::error::{CoreError, Result};
use crate::ids::ConnectionId;
use crate::metrics::ProviderRegistry;
use crate::registry::ConnectionRegistry;
use crate::sdk::{LocalConnectionFactory, SdkInterfaceDescriptor};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{error, info};

const MAX_UUID_COLLISION_RETRIES: usize = 5;

pub struct LocalManager {
    registry_sdk: ConnectionRegistry,
    registry_agent: ConnectionRegistry,
    /// `sdk_id -> agent_id`, so `delete_connection_sdk` can clean up both
    /// registries from the single id the SDK surface hands back.
    sdk_to_agent: DashMap<String, String>,
    metrics_registry: Arc<ProviderRegistry>,
    lock: Arc<AsyncMutex<()>>,
}

impl LocalManager {
    pub fn new(metrics_registry: Arc<ProviderRegistry>) -> Self {
        LocalManager {
            registry_sdk: ConnectionRegistry::new(),
            registry_agent: ConnectionRegistry::new(),
            sdk_to_agent: DashMap::new(),
            metrics_registry,
            lock: Arc::new(AsyncMutex::new(())),
        }
    }

    /// Shares the manager's lock with callers (the metrics collector, per
    /// spec.md §4.10/§5 "local-manager lock, then registry lock") that must
    /// serialize against SDK-side create/delete.
    pub fn lock_handle(&self) -> Arc<AsyncMutex<()>> {
        self.lock.clone()
    }

    /// Configures and establishes a local connection via `factory`,
    /// registers it under a freshly generated id (retrying up to
    /// [`MAX_UUID_COLLISION_RETRIES`] times) and under `agent_id`, and
    /// returns the minted id plus the SDK-facing interface descriptor
    /// (spec.md §4.8 "create_connection_sdk").
    pub async fn create_connection_sdk(
        &self,
        _ctx: &CancellationToken,
        factory: &dyn LocalConnectionFactory,
        kind: Kind,
        conn_config: &ConnConfig,
        agent_id: impl Into<String>,
    ) -> Result<(ConnectionId, SdkInterfaceDescriptor)> {
        let (conn, descriptor) = factory.create(kind, conn_config).await?;
        let agent_id = agent_id.into();

        let _guard = self.lock.lock().await;
        let mut sdk_id = ConnectionId::generated();
        let mut inserted = false;
        for _ in 0..MAX_UUID_COLLISION_RETRIES {
            if self
                .registry_sdk
                .add_with_metrics(sdk_id.as_str(), conn.clone(), &self.metrics_registry)
                .is_ok()
            {
                inserted = true;
                break;
            }
            sdk_id = ConnectionId::generated();
        }
        if !inserted {
            return Err(CoreError::general_failure(
                "create_connection_sdk: exhausted UUID collision retries",
            ));
        }
        self.registry_agent.replace(agent_id.clone(), conn);
        self.sdk_to_agent.insert(sdk_id.as_str().to_string(), agent_id.clone());
        info!(sdk_id = %sdk_id, agent_id = %agent_id, "local connection created");
        Ok((sdk_id, descriptor))
    }

    /// Breaks links on both sides, removes the registry entries, shuts the
    /// connection down synchronously, and forgets it (spec.md §4.8
    /// "delete_connection_sdk").
    pub async fn delete_connection_sdk(&self, ctx: &CancellationToken, sdk_id: &str) -> Result<()> {
        let (conn, agent_id) = {
            let _guard = self.lock.lock().await;
            let conn = self
                .registry_sdk
                .get(sdk_id)
                .ok_or_else(|| CoreError::bad_argument(format!("connection '{sdk_id}' not found")))?;

            if let Some(peer) = conn.link() {
                let _ = peer.set_link(ctx, None, Some(&conn)).await;
                let _ = conn.set_link(ctx, None, None).await;
            }
            self.registry_sdk.remove(sdk_id);
            let agent_id = self.sdk_to_agent.remove(sdk_id).map(|(_, v)| v);
            if let Some(agent_id) = &agent_id {
                self.registry_agent.remove(agent_id);
            }
            (conn, agent_id)
        };

        let result = conn.shutdown(ctx).await;
        info!(sdk_id = %sdk_id, agent_id = ?agent_id, "local connection deleted");
        result
    }

    /// Resolves a connection by the agent-assigned id the reconciler's
    /// `Config` refers to (spec.md §4.9 "local_manager.get_connection").
    pub fn get_connection(&self, agent_id: &str) -> Option<Arc<dyn Connection>> {
        self.registry_agent.get(agent_id)
    }

    /// Snapshots ids and deletes each (spec.md §4.8 "shutdown").
    pub async fn shutdown(&self, ctx: &CancellationToken) {
        for sdk_id in self.registry_sdk.all_ids() {
            if let Err(e) = self.delete_connection_sdk(ctx, &sdk_id).await {
                error!(sdk_id = %sdk_id, error = %e, "error deleting local connection during shutdown");
            }
        }
    }
}
