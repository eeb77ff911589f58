//! The shared-memory region abstraction a [`super::zerocopy::ZeroCopyGroupStrategy`]
//! allocates through. The actual IPC byte framing with clients is out of
//! scope (spec.md §1); this crate only needs to create/destroy a region
//! under a deterministic key with exclusive-create semantics, so the
//! contract is kept to a trait an external allocator implements (grounded
//! on `original_source/media-proxy/include/mesh/multipoint_zc.h`'s
//! `shmget`/`shmctl`-backed `cfg` state, and on `crate::metrics::sink`'s
//! trait-at-the-boundary shape).

use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// A created shared-memory region.
#[async_trait]
pub trait SharedRegion: Send + Sync + 'static {
    fn key(&self) -> u32;
    fn size(&self) -> usize;
    async fn destroy(&self);
}

/// Creates regions with exclusive-create semantics: `create` must fail if a
/// region with the same key is already resident (spec.md §4.5, §8 boundary
/// behaviour).
#[async_trait]
pub trait SharedRegionAllocator: Send + Sync + 'static {
    async fn create(&self, key: u32, size: usize) -> Result<Arc<dyn SharedRegion>>;
}
