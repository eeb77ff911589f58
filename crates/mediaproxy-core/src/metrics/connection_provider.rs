//! Adapts any [`Connection`] into a [`MetricsProvider`] (spec.md §4.10
//! "Per-Connection collect reports").
//!
//! Grounded on `original_source/media-proxy/include/mesh/metrics.h`'s
//! `Connection::collect()` override, which reports state, link presence,
//! counters and smoothed rates. A manager creates one of these when it
//! assigns an id to a newly-registered bridge/local-connection/group
//! (spec.md §4.7 "assign the id to the bridge's metrics identifier"),
//! holding the non-owning [`Weak`] reference the spec's "provider-list
//! entry" describes (spec.md §5 "Resource ownership").

use super::{MetricSample, MetricsProvider};
use crate::connection::Connection;
use parking_lot::Mutex;
use std::sync::Weak;

pub struct ConnectionMetricsProvider {
    id: Mutex<Option<String>>,
    connection: Weak<dyn Connection>,
}

impl ConnectionMetricsProvider {
    pub fn new(connection: &std::sync::Arc<dyn Connection>, id: impl Into<String>) -> Self {
        ConnectionMetricsProvider {
            id: Mutex::new(Some(id.into())),
            connection: std::sync::Arc::downgrade(connection),
        }
    }
}

impl MetricsProvider for ConnectionMetricsProvider {
    fn provider_id(&self) -> Option<String> {
        self.id.lock().clone()
    }

    fn collect(&self, sample: &mut MetricSample) {
        let Some(conn) = self.connection.upgrade() else {
            return;
        };
        conn.metrics()
            .collect_into(sample, conn.state().name(), conn.link().is_some());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancellationToken;
    use crate::connection::{ConnectionBase, ConnectionHooks, Kind};
    use crate::error::Result;
    use crate::metrics::ConnectionMetrics;
    use async_trait::async_trait;

    struct Noop;

    #[async_trait]
    impl ConnectionHooks for Noop {
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

    #[tokio::test]
    async fn collects_state_and_counters_from_the_wrapped_connection() {
        let concrete = ConnectionBase::new(Kind::Receiver, Noop);
        concrete.mark_configured().unwrap();
        let ctx = CancellationToken::new();
        concrete.establish(&ctx).await.unwrap();
        concrete.do_receive(&ctx, &[1, 2, 3]).await.unwrap();
        let conn: std::sync::Arc<dyn Connection> = concrete;

        let provider = ConnectionMetricsProvider::new(&conn, "c1");
        assert_eq!(provider.provider_id().as_deref(), Some("c1"));
        let mut sample = MetricSample::new(1000);
        provider.collect(&mut sample);
        assert!(!sample.is_empty());
    }

    #[tokio::test]
    async fn dropped_connection_yields_empty_sample() {
        let conn: std::sync::Arc<dyn Connection> = ConnectionBase::new(Kind::Receiver, Noop);
        let provider = ConnectionMetricsProvider::new(&conn, "c1");
        drop(conn);
        let mut sample = MetricSample::new(1000);
        provider.collect(&mut sample);
        assert!(sample.is_empty());
    }
}
