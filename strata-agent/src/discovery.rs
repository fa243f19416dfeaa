// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Local dataset state discovery.

use camino::Utf8PathBuf;
use slog::Logger;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use strata_common::cluster::NodeState;
use strata_common::dataset::{DatasetId, DiscoveredDataset, NodeId};
use strata_common::volume::Volume;
use strata_storage::{BackendError, MountError, Mounter, StorageBackend};

#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("listing volumes failed: {0}")]
    ListVolumes(#[source] BackendError),

    #[error("reading the mount table failed: {0}")]
    Mounts(#[source] MountError),
}

/// A freshly discovered snapshot of this node's datasets.
#[derive(Clone, Debug)]
pub struct Discovery {
    /// Datasets realized here plus unattached volumes; the planning input.
    pub local: NodeState,
    /// Datasets whose volumes are attached to some other node; surfaced to
    /// the controller as non-manifest, never planned locally.
    pub nonmanifest: BTreeSet<DatasetId>,
}

/// Builds a wholesale [`NodeState`] snapshot from the backend each cycle.
///
/// Snapshots are never patched incrementally, and the volume list is
/// re-read on every pass: other agents and operators mutate the backend
/// concurrently, so nothing from a previous cycle can be trusted.
pub struct Discoverer {
    backend: Arc<dyn StorageBackend>,
    mounter: Arc<dyn Mounter>,
    node_id: NodeId,
    hostname: String,
    mount_root: Utf8PathBuf,
    log: Logger,
}

impl Discoverer {
    pub fn new(
        backend: Arc<dyn StorageBackend>,
        mounter: Arc<dyn Mounter>,
        node_id: NodeId,
        hostname: String,
        mount_root: Utf8PathBuf,
        log: &Logger,
    ) -> Self {
        Discoverer {
            backend,
            mounter,
            node_id,
            hostname,
            mount_root,
            log: log.new(o!("component" => "Discoverer")),
        }
    }

    /// The canonical mount point for a dataset on this node.
    pub fn mount_point(&self, dataset_id: DatasetId) -> Utf8PathBuf {
        self.mount_root.join(dataset_id.to_string())
    }

    pub async fn discover(&self) -> Result<Discovery, DiscoveryError> {
        let volumes = self
            .backend
            .list_volumes()
            .await
            .map_err(DiscoveryError::ListVolumes)?;
        let mounts =
            self.mounter.mounts().await.map_err(DiscoveryError::Mounts)?;

        let mut local = NodeState::new(self.node_id, self.hostname.clone());
        let mut nonmanifest = BTreeSet::new();
        for volume in volumes {
            let dataset_id = volume.dataset_id;
            match volume.attached_to {
                None => {
                    local.datasets.insert(
                        dataset_id,
                        DiscoveredDataset::NonManifest { dataset_id },
                    );
                }
                Some(holder) if holder != self.node_id => {
                    nonmanifest.insert(dataset_id);
                }
                Some(_) => {
                    let discovered =
                        self.inspect_attached(&volume, &mounts).await;
                    local.datasets.insert(dataset_id, discovered);
                }
            }
        }
        Ok(Discovery { local, nonmanifest })
    }

    /// Classify a volume attached to this node.
    ///
    /// A volume whose device path cannot be resolved, or resolves to
    /// something that is not a present block device, is reported
    /// non-manifest with a diagnostic rather than crashing discovery.
    async fn inspect_attached(
        &self,
        volume: &Volume,
        mounts: &BTreeMap<Utf8PathBuf, Utf8PathBuf>,
    ) -> DiscoveredDataset {
        let dataset_id = volume.dataset_id;
        let device_path = match self
            .backend
            .get_device_path(&volume.blockdevice_id)
            .await
        {
            Ok(path) => path,
            Err(err) => {
                error!(
                    self.log,
                    "attached volume has no resolvable device path";
                    "dataset_id" => %dataset_id,
                    "blockdevice_id" => %volume.blockdevice_id,
                    "error" => %err,
                );
                return DiscoveredDataset::NonManifest { dataset_id };
            }
        };
        if !self.mounter.device_present(&device_path).await {
            error!(
                self.log,
                "device path for attached volume is not a block device";
                "dataset_id" => %dataset_id,
                "blockdevice_id" => %volume.blockdevice_id,
                "device_path" => %device_path,
            );
            return DiscoveredDataset::NonManifest { dataset_id };
        }

        let mount_point = self.mount_point(dataset_id);
        if mounts.get(&mount_point) == Some(&device_path) {
            return DiscoveredDataset::Mounted {
                dataset_id,
                blockdevice_id: volume.blockdevice_id.clone(),
                maximum_size: volume.size,
                device_path,
                mount_point,
            };
        }
        if let Some((actual, _)) =
            mounts.iter().find(|(_, device)| **device == device_path)
        {
            warn!(
                self.log,
                "dataset is mounted away from its canonical mount point";
                "dataset_id" => %dataset_id,
                "mount_point" => %actual,
                "canonical" => %mount_point,
            );
        }
        DiscoveredDataset::Attached {
            dataset_id,
            blockdevice_id: volume.blockdevice_id.clone(),
            maximum_size: volume.size,
            device_path,
        }
    }
}
