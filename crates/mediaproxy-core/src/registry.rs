//! The ID-indexed registry every manager owns (spec.md §3 "Registries",
//! §9 "Non-owning pointer graph").
//!
//! Grounded on `original_source/media-proxy/include/mesh/conn_registry.h`'s
//! `Registry` (an `unordered_map` behind one `shared_mutex`), reimplemented
//! over `dashmap::DashMap` the way `spark-switch::core::session_manager`
//! indexes its `CallSession`s: the map itself supplies the shared/exclusive
//! locking the original hand-rolled with `std::shared_mutex`, sharded so a
//! read on one id never blocks a write on another.
//!
//! A registry never owns the `Connection`s it indexes (spec.md §9); it
//! holds `Arc<dyn Connection>` purely so lookups can hand back a usable
//! handle, while the owning manager (or, for an async-shutdown entity, the
//! shutdown task) is the one that actually drops the last strong reference.

use crate::connection::Connection;
use crate::metrics::{ConnectionMetricsProvider, MetricsProvider, ProviderRegistry, RegistrationGuard};
use dashmap::DashMap;
use std::sync::Arc;

/// One indexed entity plus the metrics-provider registration taken out on
/// its behalf, if any (spec.md §4.10 "on construction it registers
/// itself... on destruction it removes itself" — here, construction and
/// destruction of the *registry entry*, since that is the moment a bridge/
/// local-connection/group gets the externally-visible id the collector
/// needs; see `DESIGN.md`).
struct Slot {
    connection: Arc<dyn Connection>,
    _metrics_guard: Option<RegistrationGuard>,
}

/// A thread-safe `id -> Connection` index.
#[derive(Default)]
pub struct ConnectionRegistry {
    entries: DashMap<String, Slot>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `conn` under `id`. Fails if `id` is already present
    /// (mirrors `Registry::add`'s "contains -> -1" guard).
    pub fn add(&self, id: impl Into<String>, conn: Arc<dyn Connection>) -> Result<(), ()> {
        let id = id.into();
        if self.entries.contains_key(&id) {
            return Err(());
        }
        self.entries.insert(
            id,
            Slot {
                connection: conn,
                _metrics_guard: None,
            },
        );
        Ok(())
    }

    /// Like [`Self::add`], plus registers `conn` as a [`MetricsProvider`]
    /// under `id` with `metrics_registry` for as long as the registry entry
    /// lives.
    pub fn add_with_metrics(
        &self,
        id: impl Into<String>,
        conn: Arc<dyn Connection>,
        metrics_registry: &Arc<ProviderRegistry>,
    ) -> Result<(), ()> {
        let id = id.into();
        if self.entries.contains_key(&id) {
            return Err(());
        }
        let provider: Arc<dyn MetricsProvider> = Arc::new(ConnectionMetricsProvider::new(&conn, id.clone()));
        let guard = metrics_registry.register(&provider);
        self.entries.insert(
            id,
            Slot {
                connection: conn,
                _metrics_guard: Some(guard),
            },
        );
        Ok(())
    }

    /// Inserts `conn` under `id`, overwriting any existing entry.
    pub fn replace(&self, id: impl Into<String>, conn: Arc<dyn Connection>) {
        self.entries.insert(
            id.into(),
            Slot {
                connection: conn,
                _metrics_guard: None,
            },
        );
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn Connection>> {
        self.entries.get(id).map(|entry| entry.connection.clone())
    }

    /// Removes and returns the entry for `id`, if any. Dropping the
    /// returned value's metrics-registration guard (if it had one) happens
    /// here, deregistering the entity from collection.
    pub fn remove(&self, id: &str) -> Option<Arc<dyn Connection>> {
        self.entries.remove(id).map(|(_, slot)| slot.connection)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    /// Snapshots every currently-registered id. Used by `shutdown(ctx)` on
    /// every manager to iterate a stable set while deletion mutates the map
    /// underneath it (spec.md §4.7/§4.8 "shutdown... snapshots ids").
    pub fn all_ids(&self) -> Vec<String> {
        self.entries.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
