// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Cluster-wide configuration and state snapshots.
//!
//! Snapshots are immutable once received: an inbound [`ClusterStatus`]
//! message wholly supersedes the previous one, and a node's
//! [`NodeState`] is rebuilt wholesale by each discovery pass rather than
//! patched incrementally.

use crate::dataset::{DatasetId, DesiredDataset, DiscoveredDataset, NodeId};
use crate::generation::Generation;
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// A node's realized storage, as last discovered.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct NodeState {
    pub node_id: NodeId,
    pub hostname: String,
    pub datasets: BTreeMap<DatasetId, DiscoveredDataset>,
}

impl NodeState {
    pub fn new(node_id: NodeId, hostname: String) -> Self {
        NodeState { node_id, hostname, datasets: BTreeMap::new() }
    }
}

/// The controller's last known view of every node's realized storage.
#[derive(
    Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema,
)]
pub struct ClusterState {
    pub nodes: BTreeMap<NodeId, NodeState>,
}

impl ClusterState {
    /// Replace one node's entry with a fresh snapshot.
    ///
    /// Folding a just-discovered local state into a possibly stale
    /// controller snapshot keeps locally observed facts authoritative.
    pub fn insert_node(&mut self, state: NodeState) {
        self.nodes.insert(state.node_id, state);
    }

    pub fn node(&self, node_id: NodeId) -> Option<&NodeState> {
        self.nodes.get(&node_id)
    }
}

/// The cluster-wide desired configuration published by the controller.
///
/// Placement is part of the configuration: each node's map holds the
/// datasets assigned to it, already in per-node desired form.
#[derive(
    Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema,
)]
pub struct ClusterConfiguration {
    pub generation: Generation,
    pub nodes: BTreeMap<NodeId, BTreeMap<DatasetId, DesiredDataset>>,
}

impl ClusterConfiguration {
    /// The desired dataset states from `node_id`'s perspective: its own
    /// assignments verbatim, plus a non-manifest entry for every dataset
    /// assigned to some other node, so the local planner releases volumes
    /// that belong elsewhere instead of destroying them as orphans.
    pub fn desired_for(
        &self,
        node_id: NodeId,
    ) -> BTreeMap<DatasetId, DesiredDataset> {
        let mut desired =
            self.nodes.get(&node_id).cloned().unwrap_or_default();
        for (other, datasets) in &self.nodes {
            if *other == node_id {
                continue;
            }
            for (dataset_id, config) in datasets {
                desired.entry(*dataset_id).or_insert_with(|| {
                    DesiredDataset::NonManifest {
                        dataset_id: *dataset_id,
                        metadata: config.metadata().clone(),
                    }
                });
            }
        }
        desired
    }
}

/// Inbound controller snapshot: the desired configuration plus the last
/// known cluster state.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ClusterStatus {
    pub configuration: ClusterConfiguration,
    pub cluster_state: ClusterState,
}

/// Outbound per-cycle report of a node's freshly discovered local state.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct NodeStateReport {
    pub state: NodeState,
    /// Datasets whose volumes were observed attached to other nodes;
    /// surfaced to the cluster as non-manifest, never planned locally.
    pub nonmanifest: BTreeSet<DatasetId>,
    pub time_observed: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::DesiredState;

    fn mounted(dataset_id: DatasetId) -> DesiredDataset {
        DesiredDataset::Mounted {
            dataset_id,
            metadata: BTreeMap::new(),
            maximum_size: None,
            mount_point: format!("/srv/strata/{dataset_id}").into(),
        }
    }

    #[test]
    fn desired_for_keeps_own_assignments() {
        let node = NodeId::new_v4();
        let dataset_id = DatasetId::new_v4();
        let mut config = ClusterConfiguration::default();
        config
            .nodes
            .entry(node)
            .or_default()
            .insert(dataset_id, mounted(dataset_id));

        let desired = config.desired_for(node);
        assert_eq!(desired.len(), 1);
        assert_eq!(desired[&dataset_id].state(), DesiredState::Mounted);
    }

    #[test]
    fn desired_for_localizes_other_nodes_assignments() {
        let here = NodeId::new_v4();
        let elsewhere = NodeId::new_v4();
        let dataset_id = DatasetId::new_v4();
        let mut config = ClusterConfiguration::default();
        config
            .nodes
            .entry(elsewhere)
            .or_default()
            .insert(dataset_id, mounted(dataset_id));

        let desired = config.desired_for(here);
        assert_eq!(desired[&dataset_id].state(), DesiredState::NonManifest);
    }

    #[test]
    fn insert_node_replaces_wholesale() {
        let node = NodeId::new_v4();
        let dataset_id = DatasetId::new_v4();
        let mut cluster = ClusterState::default();

        let mut stale = NodeState::new(node, "node-a".to_string());
        stale.datasets.insert(
            dataset_id,
            DiscoveredDataset::NonManifest { dataset_id },
        );
        cluster.insert_node(stale);

        let fresh = NodeState::new(node, "node-a".to_string());
        cluster.insert_node(fresh.clone());
        assert_eq!(cluster.node(node), Some(&fresh));
    }
}
