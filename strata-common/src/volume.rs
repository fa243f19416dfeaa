// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Backend-reported block-device volume records.

use crate::dataset::{DatasetId, NodeId};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque, backend-scoped identifier for a block-device volume.
#[derive(
    Clone,
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
pub struct BlockDeviceId(pub String);

impl fmt::Display for BlockDeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for BlockDeviceId {
    fn from(s: &str) -> Self {
        BlockDeviceId(s.to_string())
    }
}

/// A volume as reported by a storage backend.
///
/// The backend is the sole authority for these fields; the agent reads them
/// during discovery and planning but never fabricates or patches them.
#[derive(
    Clone, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema,
)]
pub struct Volume {
    pub blockdevice_id: BlockDeviceId,
    pub size: u64,
    /// The node the volume is attached to, if any.
    pub attached_to: Option<NodeId>,
    /// The dataset this volume realizes.
    pub dataset_id: DatasetId,
}
