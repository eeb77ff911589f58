//! Multipoint `Group` routing (spec.md §3 "Group", §4.3–§4.5).
//!
//! Grounded on `original_source/media-proxy/include/mesh/multipoint.h`'s
//! `Group : public Connection` shape, re-expressed per the REDESIGN FLAGS
//! note: one concrete [`GroupBase`] generic over a [`FanOutStrategy`]
//! instead of a `CopyGroup`/`ZeroCopyGroup` inheritance pair.

mod base;
mod copy;
mod shm;
mod zerocopy;

pub use base::GroupBase;
pub use copy::CopyGroupStrategy;
pub use shm::{SharedRegion, SharedRegionAllocator};
pub use zerocopy::{derive_shm_key, zc_init_gateway_from_group, ZcConfig, ZeroCopyGroupStrategy};

use crate::cancel::CancellationToken;
use crate::connection::Connection;
use crate::error::Result;
use crate::metrics::ConnectionMetrics;
use async_trait::async_trait;
use std::sync::Arc;

/// The variant-specific behaviour a [`GroupBase`] delegates to: how to
/// establish/shut down transport resources, how to fan a frame out to the
/// current outputs, and how to react to a membership change.
#[async_trait]
pub trait FanOutStrategy: Send + Sync + 'static {
    async fn on_establish(&self, ctx: &CancellationToken) -> Result<()>;
    async fn on_shutdown(&self, ctx: &CancellationToken) -> Result<()>;

    /// Delivers `data` to the current outputs. Returns the total bytes
    /// accepted; errors and per-output failures are recorded on `metrics`.
    async fn deliver(
        &self,
        ctx: &CancellationToken,
        data: &[u8],
        metrics: &ConnectionMetrics,
    ) -> Result<usize>;

    /// Called after `assign_input`/`add_output`/detach mutate membership,
    /// with the outputs list as it stands after the mutation.
    async fn on_outputs_updated(&self, outputs: Vec<Arc<dyn Connection>>);

    /// `Some` only for [`ZeroCopyGroupStrategy`] once it has established a
    /// shared region.
    fn zc_config(&self) -> Option<ZcConfig> {
        None
    }
}
