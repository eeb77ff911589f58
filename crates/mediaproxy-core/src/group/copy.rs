//! The copy-based fan-out strategy (spec.md §4.4): delivers to every output
//! synchronously on the caller's thread, publishing the live output list
//! through an atomic pointer swap so the hot path never blocks behind a
//! membership change (spec.md §5.2).
//!
//! Grounded on `original_source/media-proxy/include/mesh/multipoint.h`'s
//! `Group::on_receive`/`get_hotpath_outputs_lock` pair, reimplemented with
//! `arc_swap::ArcSwap` instead of a hand-rolled pointer + reader-count:
//! `load()` itself is the read borrow, and the guard it returns is dropped
//! (releasing the borrow) at the end of the loop.

use super::FanOutStrategy;
use crate::cancel::CancellationToken;
use crate::connection::Connection;
use crate::error::{CoreError, Result};
use crate::metrics::ConnectionMetrics;
use arc_swap::ArcSwap;
use async_trait::async_trait;
use std::sync::Arc;

pub struct CopyGroupStrategy {
    hot_outputs: ArcSwap<Vec<Arc<dyn Connection>>>,
}

impl Default for CopyGroupStrategy {
    fn default() -> Self {
        CopyGroupStrategy {
            hot_outputs: ArcSwap::from_pointee(Vec::new()),
        }
    }
}

impl CopyGroupStrategy {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FanOutStrategy for CopyGroupStrategy {
    async fn on_establish(&self, _ctx: &CancellationToken) -> Result<()> {
        Ok(())
    }

    async fn on_shutdown(&self, _ctx: &CancellationToken) -> Result<()> {
        Ok(())
    }

    async fn deliver(
        &self,
        ctx: &CancellationToken,
        data: &[u8],
        metrics: &ConnectionMetrics,
    ) -> Result<usize> {
        let snapshot = self.hot_outputs.load();
        if snapshot.is_empty() {
            return Err(CoreError::no_link_assigned());
        }
        let mut total = 0usize;
        for output in snapshot.iter() {
            match output.do_receive(ctx, data).await {
                Ok(n) => {
                    total += n;
                    metrics.record_outbound(n as u64);
                }
                Err(_) => metrics.record_error(),
            }
        }
        Ok(total)
    }

    async fn on_outputs_updated(&self, outputs: Vec<Arc<dyn Connection>>) {
        self.hot_outputs.store(Arc::new(outputs));
    }
}
