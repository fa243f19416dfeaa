// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Dataset identity and the desired/discovered state unions.
//!
//! Both unions carry one variant per state, so the attributes valid for a
//! state are exactly the fields its variant holds; a dataset in an
//! impossible state/attribute combination cannot be constructed.

use crate::volume::BlockDeviceId;
use camino::Utf8PathBuf;
use schemars::gen::SchemaGenerator;
use schemars::schema::{Schema, SchemaObject};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

fn path_schema(gen: &mut SchemaGenerator) -> Schema {
    let mut schema: SchemaObject = <String>::json_schema(gen).into();
    schema.format = Some("Utf8PathBuf".to_owned());
    schema.into()
}

/// Default volume size for a dataset whose configuration does not name one.
pub const DEFAULT_DATASET_SIZE: u64 = 100 * (1 << 30);

/// Stable identifier for a logical storage unit, independent of any
/// physical realization.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    JsonSchema,
)]
#[serde(transparent)]
pub struct DatasetId(pub Uuid);

impl DatasetId {
    pub fn new_v4() -> Self {
        DatasetId(Uuid::new_v4())
    }
}

impl fmt::Display for DatasetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier for a node participating in the cluster.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    JsonSchema,
)]
#[serde(transparent)]
pub struct NodeId(pub Uuid);

impl NodeId {
    pub fn new_v4() -> Self {
        NodeId(Uuid::new_v4())
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Free-form key/value pairs the control plane attaches to a dataset.
/// Opaque to the agent.
pub type DatasetMetadata = BTreeMap<String, String>;

/// The locally discovered realization state of a dataset.
#[derive(
    Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum DiscoveredDataset {
    /// No backing volume exists.
    NonExistent { dataset_id: DatasetId },
    /// A backing volume exists but is not usable on this node.
    NonManifest { dataset_id: DatasetId },
    /// Attached to this node with a usable device, but not mounted at the
    /// dataset's canonical mount point.
    Attached {
        dataset_id: DatasetId,
        blockdevice_id: BlockDeviceId,
        maximum_size: u64,
        #[schemars(schema_with = "path_schema")]
        device_path: Utf8PathBuf,
    },
    /// Attached and mounted at the dataset's canonical mount point.
    Mounted {
        dataset_id: DatasetId,
        blockdevice_id: BlockDeviceId,
        maximum_size: u64,
        #[schemars(schema_with = "path_schema")]
        device_path: Utf8PathBuf,
        #[schemars(schema_with = "path_schema")]
        mount_point: Utf8PathBuf,
    },
}

impl DiscoveredDataset {
    pub fn dataset_id(&self) -> DatasetId {
        match self {
            DiscoveredDataset::NonExistent { dataset_id }
            | DiscoveredDataset::NonManifest { dataset_id }
            | DiscoveredDataset::Attached { dataset_id, .. }
            | DiscoveredDataset::Mounted { dataset_id, .. } => *dataset_id,
        }
    }

    pub fn state(&self) -> DiscoveredState {
        match self {
            DiscoveredDataset::NonExistent { .. } => DiscoveredState::NonExistent,
            DiscoveredDataset::NonManifest { .. } => DiscoveredState::NonManifest,
            DiscoveredDataset::Attached { .. } => DiscoveredState::Attached,
            DiscoveredDataset::Mounted { .. } => DiscoveredState::Mounted,
        }
    }
}

/// The state tag of a [`DiscoveredDataset`].
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum DiscoveredState {
    NonExistent,
    NonManifest,
    Attached,
    Mounted,
}

impl DiscoveredState {
    pub const ALL: [DiscoveredState; 4] = [
        DiscoveredState::NonExistent,
        DiscoveredState::NonManifest,
        DiscoveredState::Attached,
        DiscoveredState::Mounted,
    ];
}

impl fmt::Display for DiscoveredState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DiscoveredState::NonExistent => "non_existent",
            DiscoveredState::NonManifest => "non_manifest",
            DiscoveredState::Attached => "attached",
            DiscoveredState::Mounted => "mounted",
        };
        write!(f, "{}", s)
    }
}

/// The state the control plane wants a dataset to reach on a node.
#[derive(
    Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum DesiredDataset {
    /// Realized as a filesystem mounted at `mount_point` on this node.
    Mounted {
        dataset_id: DatasetId,
        metadata: DatasetMetadata,
        #[serde(default)]
        maximum_size: Option<u64>,
        #[schemars(schema_with = "path_schema")]
        mount_point: Utf8PathBuf,
    },
    /// Attached to this node but left unmounted.
    NotMounted {
        dataset_id: DatasetId,
        metadata: DatasetMetadata,
        #[serde(default)]
        maximum_size: Option<u64>,
    },
    /// Gone: the backing volume should be destroyed.
    Deleted { dataset_id: DatasetId, metadata: DatasetMetadata },
    /// Exists in the cluster but must not be realized on this node.
    NonManifest { dataset_id: DatasetId, metadata: DatasetMetadata },
}

impl DesiredDataset {
    pub fn dataset_id(&self) -> DatasetId {
        match self {
            DesiredDataset::Mounted { dataset_id, .. }
            | DesiredDataset::NotMounted { dataset_id, .. }
            | DesiredDataset::Deleted { dataset_id, .. }
            | DesiredDataset::NonManifest { dataset_id, .. } => *dataset_id,
        }
    }

    pub fn metadata(&self) -> &DatasetMetadata {
        match self {
            DesiredDataset::Mounted { metadata, .. }
            | DesiredDataset::NotMounted { metadata, .. }
            | DesiredDataset::Deleted { metadata, .. }
            | DesiredDataset::NonManifest { metadata, .. } => metadata,
        }
    }

    pub fn state(&self) -> DesiredState {
        match self {
            DesiredDataset::Mounted { .. } => DesiredState::Mounted,
            DesiredDataset::NotMounted { .. } => DesiredState::NotMounted,
            DesiredDataset::Deleted { .. } => DesiredState::Deleted,
            DesiredDataset::NonManifest { .. } => DesiredState::NonManifest,
        }
    }
}

/// The state tag of a [`DesiredDataset`].
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum DesiredState {
    Mounted,
    NotMounted,
    Deleted,
    NonManifest,
}

impl DesiredState {
    pub const ALL: [DesiredState; 4] = [
        DesiredState::Mounted,
        DesiredState::NotMounted,
        DesiredState::Deleted,
        DesiredState::NonManifest,
    ];
}

impl fmt::Display for DesiredState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DesiredState::Mounted => "mounted",
            DesiredState::NotMounted => "not_mounted",
            DesiredState::Deleted => "deleted",
            DesiredState::NonManifest => "non_manifest",
        };
        write!(f, "{}", s)
    }
}
