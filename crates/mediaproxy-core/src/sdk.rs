//! The seam between [`crate::manager::LocalManager`] and a local
//! (SDK-facing) leaf connection (spec.md §3 "Connection", §4.8, §6.2,
//! §6.3).
//!
//! Grounded on `original_source/media-proxy/src/mesh/manager_local.cc`'s
//! `create_connection_sdk`: it builds a `LocalRx`/`LocalTx`, calls
//! `configure_memif`, establishes it, and extracts `memif_conn_param` for
//! the client. The concrete `memif`-backed local connection and the
//! shared-memory byte framing it speaks are both external (spec.md §6.3);
//! this crate only needs the shape of that interaction.

use crate::bridge::ConnConfig;
use crate::connection::{Connection, Kind};
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// The client-side shared-memory interface parameters handed back from
/// `CreateConnection` (spec.md §6.2), mirroring `memif_conn_param`'s
/// socket/interface naming fields. The byte framing itself stays opaque.
#[derive(Debug, Clone)]
pub struct SdkInterfaceDescriptor {
    pub socket_path: String,
    pub interface_name: String,
}

/// Builds a local connection terminating at the shared-memory interface
/// with an SDK client (spec.md §4.8 "it creates **local connections** that
/// terminate at the shared-memory interface with the SDK client"). A
/// deployment supplies the `memif`-backed implementation; this crate only
/// models the seam `LocalManager` drives.
#[async_trait]
pub trait LocalConnectionFactory: Send + Sync + 'static {
    /// Configures the shared-memory interface for a connection of the
    /// given `kind`/`conn_config`, establishes it, and returns the
    /// connection plus the descriptor the SDK client needs to attach.
    async fn create(
        &self,
        kind: Kind,
        conn_config: &ConnConfig,
    ) -> Result<(Arc<dyn Connection>, SdkInterfaceDescriptor)>;
}
