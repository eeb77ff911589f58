//! The periodic metrics collector (spec.md §4.10).
//!
//! Grounded on `original_source/media-proxy/include/mesh/metrics_collector.h`'s
//! fixed-interval collection loop and lock order (local-manager lock, then
//! the provider registry lock), reimplemented on the cancellation-aware
//! [`crate::sleep::sleep`] instead of a dedicated OS thread.

use super::provider::{MetricsProvider, ProviderRegistry, RegistrationGuard};
use super::sink::MetricsSink;
use super::MetricSample;
use crate::cancel::CancellationToken;
use crate::time::Clock;
use parking_lot::Mutex as SyncMutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;

/// Runs one collection pass every `interval`, reporting the batch of
/// non-empty samples to a [`MetricsSink`]. The collector is itself a
/// [`MetricsProvider`], reporting the cumulative row count it has
/// delivered, so its own health is visible in the same stream.
pub struct MetricsCollector {
    registry: Arc<ProviderRegistry>,
    sink: Arc<dyn MetricsSink>,
    clock: Arc<dyn Clock>,
    interval: Duration,
    /// Serializes collection against whatever external lock the caller's
    /// local-manager equivalent uses, so a reconcile pass and a collection
    /// pass never interleave. Acquired before the registry lock, never
    /// after, to avoid the inverse-order deadlock.
    local_manager_lock: Arc<AsyncMutex<()>>,
    provider_id: String,
    total_rows_delivered: AtomicU64,
    self_registration: SyncMutex<Option<RegistrationGuard>>,
}

impl MetricsCollector {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        sink: Arc<dyn MetricsSink>,
        clock: Arc<dyn Clock>,
        interval: Duration,
        local_manager_lock: Arc<AsyncMutex<()>>,
        provider_id: impl Into<String>,
    ) -> Arc<Self> {
        let collector = Arc::new(MetricsCollector {
            registry: registry.clone(),
            sink,
            clock,
            interval,
            local_manager_lock,
            provider_id: provider_id.into(),
            total_rows_delivered: AtomicU64::new(0),
            self_registration: SyncMutex::new(None),
        });
        let as_provider: Arc<dyn MetricsProvider> = collector.clone();
        let guard = registry.register(&as_provider);
        *collector.self_registration.lock() = Some(guard);
        collector
    }

    /// Spawns the periodic collection loop. The returned handle completes
    /// once `ctx` cancels.
    pub fn spawn(self: Arc<Self>, ctx: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                if !crate::sleep::sleep(&ctx, self.interval).await {
                    break;
                }
                self.run_once().await;
            }
        })
    }

    /// Runs a single collection pass: lock, snapshot, collect, unlock,
    /// then report outside the lock so a slow sink cannot hold it.
    pub async fn run_once(&self) {
        let now_ms = self.clock.now_millis();
        let rows = {
            let _local_manager_guard = self.local_manager_lock.lock().await;
            let providers = self.registry.snapshot();
            let mut rows = Vec::with_capacity(providers.len());
            for provider in providers {
                let Some(id) = provider.provider_id() else {
                    continue;
                };
                let mut sample = MetricSample::new(now_ms);
                provider.collect(&mut sample);
                if sample.is_empty() {
                    continue;
                }
                rows.push(sample.into_row(id));
            }
            rows
        };

        if rows.is_empty() {
            return;
        }
        self.total_rows_delivered
            .fetch_add(rows.len() as u64, Ordering::Relaxed);
        self.sink.report(rows).await;
    }

    pub fn total_rows_delivered(&self) -> u64 {
        self.total_rows_delivered.load(Ordering::Relaxed)
    }
}

impl MetricsProvider for MetricsCollector {
    fn provider_id(&self) -> Option<String> {
        Some(self.provider_id.clone())
    }

    fn collect(&self, sample: &mut MetricSample) {
        sample.add_u64("total_rows_delivered", self.total_rows_delivered());
    }
}
