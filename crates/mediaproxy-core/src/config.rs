//! The desired-state `Config` the reconciler consumes (spec.md §3, §4.9).
//!
//! Grounded on `original_source/media-proxy/include/mesh/manager_multipoint.h`'s
//! `Config`/`GroupConfig`/`GroupChangeConfig` trio. `Config`/`GroupConfig`
//! derive `serde::Deserialize` (spec.md's SPEC_FULL §2 "Configuration data
//! model") so a host binary can decode an agent `ApplyConfig` payload
//! straight into them, matching the way `spark-core::configuration::value`
//! treats configuration as plain data rather than wire bytes.

use crate::bridge::{BridgeConfig, ConnConfig};
use serde::Deserialize;
use std::collections::HashMap;

fn default_shm_payload_size() -> usize {
    DEFAULT_SHM_PAYLOAD_SIZE
}

/// Default shared-memory payload size for a zero-copy group when the agent
/// config omits `shm_payload_size` (spec.md §4.5 "shm-size"): one 4K-page
/// worth of frame payload, large enough for a compressed audio/video packet
/// without forcing every deployment to size it explicitly.
const DEFAULT_SHM_PAYLOAD_SIZE: usize = 4096;

/// One multipoint group's desired membership (spec.md §4.9 "Input").
///
/// `zero_copy`/`shm_payload_size` select which [`crate::group::FanOutStrategy`]
/// the reconciler builds for this group (spec.md §9 "the two strategies
/// (copy vs zero-copy) are variants of an enum or trait object"); the
/// original's `GroupConfig` has no such field because its reconciler never
/// actually constructs a `ZeroCopyGroup` (see `DESIGN.md`), so this is this
/// crate's own addition rather than a literal port.
#[derive(Debug, Clone, Deserialize)]
pub struct GroupConfig {
    pub conn_config: ConnConfig,
    #[serde(default)]
    pub conn_ids: Vec<String>,
    #[serde(default)]
    pub bridge_ids: Vec<String>,
    #[serde(default)]
    pub zero_copy: bool,
    #[serde(default = "default_shm_payload_size")]
    pub shm_payload_size: usize,
}

/// The complete desired state delivered by an `ApplyConfig` agent command.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub groups: HashMap<String, GroupConfig>,
    #[serde(default)]
    pub bridges: HashMap<String, BridgeConfig>,
}

/// One group's add/delete delta, computed by [`diff_config`]
/// (spec.md §4.9 "Algorithm").
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupChange {
    pub group_id: String,
    pub added_conn_ids: Vec<String>,
    pub deleted_conn_ids: Vec<String>,
    pub added_bridge_ids: Vec<String>,
    pub deleted_bridge_ids: Vec<String>,
}

/// The three disjoint change sets `apply_config` computes before calling
/// `reconcile_config` (spec.md §4.9 steps 1-2).
#[derive(Debug, Clone, Default)]
pub struct ConfigDelta {
    pub added: Vec<GroupChange>,
    pub deleted: Vec<GroupChange>,
    pub updated: Vec<GroupChange>,
}

impl ConfigDelta {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.deleted.is_empty() && self.updated.is_empty()
    }
}

fn diff_ids(current: &[String], new: &[String]) -> (Vec<String>, Vec<String>) {
    let current_set: std::collections::HashSet<&String> = current.iter().collect();
    let new_set: std::collections::HashSet<&String> = new.iter().collect();
    let added = new.iter().filter(|id| !current_set.contains(id)).cloned().collect();
    let deleted = current.iter().filter(|id| !new_set.contains(id)).cloned().collect();
    (added, deleted)
}

/// Computes `added`/`deleted`/`updated` group changes between `current` and
/// `new`, exactly mirroring `manager_multipoint.cc`'s `apply_config`: a
/// group whose `conn_ids`/`bridge_ids` diff to nothing is skipped from
/// `updated` entirely (spec.md §4.9 step 2 "Groups with empty diffs are
/// skipped").
pub fn diff_config(current: &Config, new: &Config) -> ConfigDelta {
    let mut delta = ConfigDelta::default();

    for (group_id, new_group) in &new.groups {
        if !current.groups.contains_key(group_id) {
            delta.added.push(GroupChange {
                group_id: group_id.clone(),
                added_conn_ids: new_group.conn_ids.clone(),
                deleted_conn_ids: Vec::new(),
                added_bridge_ids: new_group.bridge_ids.clone(),
                deleted_bridge_ids: Vec::new(),
            });
        }
    }

    for (group_id, current_group) in &current.groups {
        match new.groups.get(group_id) {
            None => delta.deleted.push(GroupChange {
                group_id: group_id.clone(),
                added_conn_ids: Vec::new(),
                deleted_conn_ids: current_group.conn_ids.clone(),
                added_bridge_ids: Vec::new(),
                deleted_bridge_ids: current_group.bridge_ids.clone(),
            }),
            Some(new_group) => {
                let (added_conn_ids, deleted_conn_ids) =
                    diff_ids(&current_group.conn_ids, &new_group.conn_ids);
                let (added_bridge_ids, deleted_bridge_ids) =
                    diff_ids(&current_group.bridge_ids, &new_group.bridge_ids);
                if added_conn_ids.is_empty()
                    && deleted_conn_ids.is_empty()
                    && added_bridge_ids.is_empty()
                    && deleted_bridge_ids.is_empty()
                {
                    continue;
                }
                delta.updated.push(GroupChange {
                    group_id: group_id.clone(),
                    added_conn_ids,
                    deleted_conn_ids,
                    added_bridge_ids,
                    deleted_bridge_ids,
                });
            }
        }
    }

    delta
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::{BridgeType, RdmaParams, TransportParams};
    use crate::connection::Kind;

    fn bridge_cfg() -> BridgeConfig {
        BridgeConfig {
            bridge_type: BridgeType::Rdma,
            kind: Kind::Transmitter,
            conn_config: ConnConfig::Audio {
                channels: 2,
                sample_rate: 48_000,
                format: "pcm".into(),
                packet_time_us: 1_000,
            },
            transport: TransportParams::Rdma(RdmaParams {
                remote_ip: "10.0.0.1".into(),
                port: 9000,
            }),
        }
    }

    fn group(conn_ids: &[&str], bridge_ids: &[&str]) -> GroupConfig {
        GroupConfig {
            conn_config: ConnConfig::Audio {
                channels: 2,
                sample_rate: 48_000,
                format: "pcm".into(),
                packet_time_us: 1_000,
            },
            conn_ids: conn_ids.iter().map(|s| s.to_string()).collect(),
            bridge_ids: bridge_ids.iter().map(|s| s.to_string()).collect(),
            zero_copy: false,
            shm_payload_size: DEFAULT_SHM_PAYLOAD_SIZE,
        }
    }

    #[test]
    fn brand_new_group_is_added_in_full() {
        let current = Config::default();
        let mut new = Config::default();
        new.groups.insert("g1".into(), group(&["c1"], &["b1"]));
        new.bridges.insert("b1".into(), bridge_cfg());

        let delta = diff_config(&current, &new);
        assert_eq!(delta.added.len(), 1);
        assert_eq!(delta.added[0].added_conn_ids, vec!["c1".to_string()]);
        assert!(delta.deleted.is_empty());
        assert!(delta.updated.is_empty());
    }

    #[test]
    fn removed_group_is_deleted_in_full() {
        let mut current = Config::default();
        current.groups.insert("g1".into(), group(&["c1"], &["b1"]));
        let new = Config::default();

        let delta = diff_config(&current, &new);
        assert_eq!(delta.deleted.len(), 1);
        assert_eq!(delta.deleted[0].deleted_conn_ids, vec!["c1".to_string()]);
    }

    #[test]
    fn unchanged_common_group_produces_no_update() {
        let mut current = Config::default();
        current.groups.insert("g1".into(), group(&["c1"], &["b1"]));
        let new = current.clone();

        let delta = diff_config(&current, &new);
        assert!(delta.updated.is_empty());
        assert!(delta.is_empty());
    }

    #[test]
    fn common_group_diffs_only_changed_members() {
        let mut current = Config::default();
        current.groups.insert("g1".into(), group(&["c1", "c2"], &["b1"]));
        let mut new = Config::default();
        new.groups.insert("g1".into(), group(&["c2", "c3"], &["b1"]));

        let delta = diff_config(&current, &new);
        assert_eq!(delta.updated.len(), 1);
        let change = &delta.updated[0];
        assert_eq!(change.added_conn_ids, vec!["c3".to_string()]);
        assert_eq!(change.deleted_conn_ids, vec!["c1".to_string()]);
        assert!(change.added_bridge_ids.is_empty());
        assert!(change.deleted_bridge_ids.is_empty());
    }
}
