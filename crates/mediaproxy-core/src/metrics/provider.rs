//! Provider self-registration (spec.md §4.10): on construction a provider
//! registers itself with the process-wide registry; on destruction it
//! deregisters. A provider with no assigned identifier is skipped by the
//! collector rather than erroring.
//!
//! Grounded on `original_source/media-proxy/include/mesh/metrics.h`'s
//! `MetricsProvider` (constructor/destructor registration against a static
//! registry) and on `spark-switch::core::session_manager`'s registry-behind-
//! a-lock idiom.

use super::MetricSample;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};

/// Anything the collector can ask to report a sample. `Connection`s,
/// `Group`s, and the collector itself all implement this.
pub trait MetricsProvider: Send + Sync {
    /// The identifier used as `MetricRow::provider_id`. `None` means this
    /// provider is skipped by the collector.
    fn provider_id(&self) -> Option<String>;

    fn collect(&self, sample: &mut MetricSample);
}

/// The process-wide set of live providers, held as weak references so
/// registration never extends a provider's lifetime.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: Mutex<Vec<Weak<dyn MetricsProvider>>>,
}

impl ProviderRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(ProviderRegistry::default())
    }

    /// Registers `provider` and returns a guard that deregisters it on
    /// drop. The guard must be held alongside the provider for as long as
    /// it should remain visible to collection passes.
    pub fn register(self: &Arc<Self>, provider: &Arc<dyn MetricsProvider>) -> RegistrationGuard {
        let weak = Arc::downgrade(provider);
        self.providers.lock().push(weak.clone());
        RegistrationGuard {
            registry: self.clone(),
            provider: weak,
        }
    }

    /// Snapshots the currently-live providers. Holds the registry lock only
    /// long enough to upgrade and prune dead entries, matching the fixed
    /// lock order documented on [`super::MetricsCollector`].
    pub fn snapshot(&self) -> Vec<Arc<dyn MetricsProvider>> {
        let mut guard = self.providers.lock();
        let mut live = Vec::with_capacity(guard.len());
        guard.retain(|weak| {
            if let Some(strong) = weak.upgrade() {
                live.push(strong);
                true
            } else {
                false
            }
        });
        live
    }

    fn deregister(&self, target: &Weak<dyn MetricsProvider>) {
        let mut guard = self.providers.lock();
        guard.retain(|weak| !Weak::ptr_eq(weak, target));
    }
}

/// Deregisters its provider from the owning [`ProviderRegistry`] on drop,
/// synchronising with any in-progress collection pass by taking the same
/// lock the collector snapshots under.
pub struct RegistrationGuard {
    registry: Arc<ProviderRegistry>,
    provider: Weak<dyn MetricsProvider>,
}

impl Drop for RegistrationGuard {
    fn drop(&mut self) {
        self.registry.deregister(&self.provider);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(Option<&'static str>);

    impl MetricsProvider for Fixed {
        fn provider_id(&self) -> Option<String> {
            self.0.map(|s| s.to_string())
        }

        fn collect(&self, sample: &mut MetricSample) {
            sample.add_bool("present", true);
        }
    }

    #[test]
    fn registered_provider_appears_in_snapshot() {
        let registry = ProviderRegistry::new();
        let provider: Arc<dyn MetricsProvider> = Arc::new(Fixed(Some("p1")));
        let _guard = registry.register(&provider);
        assert_eq!(registry.snapshot().len(), 1);
    }

    #[test]
    fn dropped_guard_removes_provider() {
        let registry = ProviderRegistry::new();
        let provider: Arc<dyn MetricsProvider> = Arc::new(Fixed(Some("p1")));
        let guard = registry.register(&provider);
        drop(guard);
        assert_eq!(registry.snapshot().len(), 0);
    }

    #[test]
    fn dead_provider_is_pruned_on_snapshot() {
        let registry = ProviderRegistry::new();
        {
            let provider: Arc<dyn MetricsProvider> = Arc::new(Fixed(Some("p1")));
            let _guard = registry.register(&provider);
        }
        // provider and guard both dropped without explicit deregistration
        // happening first; snapshot must still prune the dead weak ref.
        assert_eq!(registry.snapshot().len(), 0);
    }
}
