//! Metrics data model and per-`Connection` counters (spec.md §3 "metrics",
//! §4.10 "Per-Connection collect reports").

mod collector;
mod connection_provider;
mod provider;
mod sink;

pub use collector::MetricsCollector;
pub use connection_provider::ConnectionMetricsProvider;
pub use provider::{MetricsProvider, ProviderRegistry, RegistrationGuard};
pub use sink::{MetricRow, MetricValue, MetricsSink};

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// One field/value pair plus a timestamp, built incrementally by
/// [`MetricsProvider::collect`] and turned into a [`MetricRow`] by the
/// collector. Samples that end up with no fields are dropped (spec.md
/// §4.10 step 3) rather than forwarded to the sink.
#[derive(Debug, Clone, Default)]
pub struct MetricSample {
    pub timestamp_ms: i64,
    fields: Vec<(String, MetricValue)>,
}

impl MetricSample {
    pub fn new(timestamp_ms: i64) -> Self {
        MetricSample {
            timestamp_ms,
            fields: Vec::new(),
        }
    }

    pub fn add_string(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.fields.push((name.into(), MetricValue::String(value.into())));
    }

    pub fn add_u64(&mut self, name: impl Into<String>, value: u64) {
        self.fields.push((name.into(), MetricValue::U64(value)));
    }

    pub fn add_double(&mut self, name: impl Into<String>, value: f64) {
        self.fields.push((name.into(), MetricValue::Double(value)));
    }

    pub fn add_bool(&mut self, name: impl Into<String>, value: bool) {
        self.fields.push((name.into(), MetricValue::Bool(value)));
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn into_row(self, provider_id: String) -> MetricRow {
        MetricRow {
            timestamp_ms: self.timestamp_ms,
            provider_id,
            fields: self.fields,
        }
    }
}

/// The counters every `Connection` carries (spec.md §3): cumulative
/// byte/transaction/error counts, plus the previous-window snapshot needed
/// to derive rates.
#[derive(Debug, Default)]
pub struct ConnectionMetrics {
    inbound_bytes: AtomicU64,
    outbound_bytes: AtomicU64,
    transactions_succeeded: AtomicU32,
    transactions_failed: AtomicU32,
    errors: AtomicU32,
    previous: Mutex<PreviousWindow>,
}

#[derive(Debug, Default, Clone, Copy)]
struct PreviousWindow {
    timestamp_ms: i64,
    inbound_bytes: u64,
    outbound_bytes: u64,
    errors: u32,
    transactions_succeeded: u32,
}

impl ConnectionMetrics {
    pub fn record_inbound(&self, bytes: u64) {
        self.inbound_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_outbound(&self, bytes: u64) {
        self.outbound_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_success(&self) {
        self.transactions_succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.transactions_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inbound_bytes(&self) -> u64 {
        self.inbound_bytes.load(Ordering::Relaxed)
    }

    pub fn outbound_bytes(&self) -> u64 {
        self.outbound_bytes.load(Ordering::Relaxed)
    }

    pub fn transactions_succeeded(&self) -> u32 {
        self.transactions_succeeded.load(Ordering::Relaxed)
    }

    pub fn transactions_failed(&self) -> u32 {
        self.transactions_failed.load(Ordering::Relaxed)
    }

    pub fn errors(&self) -> u32 {
        self.errors.load(Ordering::Relaxed)
    }

    /// Appends `state`/`link_assigned`/counters/smoothed-rate fields to
    /// `sample`, then rolls the previous-window snapshot forward.
    pub fn collect_into(&self, sample: &mut MetricSample, state: &str, link_assigned: bool) {
        let now_ms = sample.timestamp_ms;
        let inbound = self.inbound_bytes();
        let outbound = self.outbound_bytes();
        let errors = self.errors();
        let succeeded = self.transactions_succeeded();

        let mut previous = self.previous.lock();
        let elapsed_secs = if previous.timestamp_ms == 0 {
            0.0
        } else {
            ((now_ms - previous.timestamp_ms).max(0) as f64) / 1000.0
        };

        let (inbound_mbps, outbound_mbps, tps, delta_errors) = if elapsed_secs > 0.0 {
            let d_in = inbound.saturating_sub(previous.inbound_bytes) as f64;
            let d_out = outbound.saturating_sub(previous.outbound_bytes) as f64;
            let d_ok = succeeded.saturating_sub(previous.transactions_succeeded) as f64;
            let d_err = errors.saturating_sub(previous.errors);
            (
                (d_in * 8.0) / elapsed_secs / 1_000_000.0,
                (d_out * 8.0) / elapsed_secs / 1_000_000.0,
                d_ok / elapsed_secs,
                d_err,
            )
        } else {
            (0.0, 0.0, 0.0, 0)
        };

        sample.add_string("state", state);
        sample.add_bool("link_assigned", link_assigned);
        sample.add_u64("inbound_bytes", inbound);
        sample.add_u64("outbound_bytes", outbound);
        sample.add_u64("transactions_succeeded", succeeded as u64);
        sample.add_u64("transactions_failed", self.transactions_failed() as u64);
        sample.add_u64("errors", errors as u64);
        sample.add_double("inbound_mbps", inbound_mbps);
        sample.add_double("outbound_mbps", outbound_mbps);
        sample.add_double("transactions_per_second", tps);
        sample.add_u64("delta_errors", delta_errors as u64);

        *previous = PreviousWindow {
            timestamp_ms: now_ms,
            inbound_bytes: inbound,
            outbound_bytes: outbound,
            errors,
            transactions_succeeded: succeeded,
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rates_are_zero_on_first_sample() {
        let metrics = ConnectionMetrics::default();
        metrics.record_inbound(1000);
        let mut sample = MetricSample::new(10_000);
        metrics.collect_into(&mut sample, "active", true);
        assert!(!sample.is_empty());
    }

    #[test]
    fn counters_are_monotonically_non_decreasing() {
        let metrics = ConnectionMetrics::default();
        metrics.record_inbound(10);
        metrics.record_inbound(20);
        assert_eq!(metrics.inbound_bytes(), 30);
    }

    #[test]
    fn empty_sample_reports_empty() {
        let sample = MetricSample::new(1);
        assert!(sample.is_empty());
    }
}
