//! Managers: components that own a registry and enact configuration
//! changes (spec.md §4.7–§4.9, GLOSSARY "Manager").
//!
//! Grounded on `original_source/media-proxy/src/mesh/manager_{bridges,
//! local,multipoint}.cc`. Each of the three original global singletons
//! (`bridges_manager`, `local_manager`, `group_manager`) becomes an owned,
//! constructible struct here instead (spec.md §9 "Global mutable state" ->
//! "Thread a context object through construction").

mod bridges;
mod group;
mod local;

pub use bridges::BridgesManager;
pub use group::GroupManager;
pub use local::LocalManager;
