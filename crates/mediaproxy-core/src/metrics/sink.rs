//! The metrics sink boundary (spec.md §6.4): an external collaborator that
//! receives finished rows once per collection cycle. Grounded on
//! `original_source/media-proxy/include/mesh/metrics.h`'s `MetricField`
//! variant shape and `spark-core::observability::facade`'s trait-at-the-seam
//! style for ambient subsystems.

use async_trait::async_trait;

#[derive(Debug, Clone, PartialEq)]
pub enum MetricValue {
    String(String),
    U64(u64),
    Double(f64),
    Bool(bool),
}

/// One provider's worth of fields collected at a single instant.
#[derive(Debug, Clone)]
pub struct MetricRow {
    pub timestamp_ms: i64,
    pub provider_id: String,
    pub fields: Vec<(String, MetricValue)>,
}

impl MetricRow {
    pub fn field(&self, name: &str) -> Option<&MetricValue> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }
}

/// Receives the rows a [`super::MetricsCollector`] produces each cycle.
/// Delivery is fire-and-forget from the collector's point of view: a sink
/// failure is logged and does not interrupt the next cycle.
#[async_trait]
pub trait MetricsSink: Send + Sync {
    async fn report(&self, rows: Vec<MetricRow>);
}
