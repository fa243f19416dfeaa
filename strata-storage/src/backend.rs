// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The block-storage provider contract.

use async_trait::async_trait;
use camino::Utf8PathBuf;
use strata_common::dataset::{DatasetId, NodeId};
use strata_common::volume::{BlockDeviceId, Volume};

/// Errors a [`StorageBackend`] operation can return.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("no volume with id {blockdevice_id}")]
    UnknownVolume { blockdevice_id: BlockDeviceId },

    #[error("volume {blockdevice_id} is not attached")]
    UnattachedVolume { blockdevice_id: BlockDeviceId },

    #[error("volume {blockdevice_id} is already attached to node {attached_to}")]
    AlreadyAttached { blockdevice_id: BlockDeviceId, attached_to: NodeId },

    #[error("a volume for dataset {dataset_id} already exists")]
    AlreadyExists { dataset_id: DatasetId },

    #[error("transient backend error: {message}")]
    Transient { message: String },
}

/// The contract a block-storage provider implements.
///
/// Convergence safety rests on re-planning against fresh discovery rather
/// than on retries, so the contract is strict about duplicates: a second
/// create for the same dataset or a second attach of the same volume must
/// be rejected, never silently repeated. Callers treat those rejections as
/// non-fatal and let the next discovery pass resolve the truth.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Create a new, unattached volume realizing `dataset_id`.
    ///
    /// Fails with [`BackendError::AlreadyExists`] if a volume for the
    /// dataset already exists.
    async fn create_volume(
        &self,
        dataset_id: DatasetId,
        size: u64,
    ) -> Result<Volume, BackendError>;

    /// Attach an existing, unattached volume to `attach_to`.
    async fn attach_volume(
        &self,
        blockdevice_id: &BlockDeviceId,
        attach_to: NodeId,
    ) -> Result<Volume, BackendError>;

    /// Detach an attached volume from whichever node holds it.
    async fn detach_volume(
        &self,
        blockdevice_id: &BlockDeviceId,
    ) -> Result<(), BackendError>;

    /// Destroy a volume. Fails with [`BackendError::UnknownVolume`] if it
    /// is already gone, which callers treat as success.
    async fn destroy_volume(
        &self,
        blockdevice_id: &BlockDeviceId,
    ) -> Result<(), BackendError>;

    /// List every volume the backend knows about.
    ///
    /// Must reflect prior mutations made through this contract; eventual
    /// consistency is permitted and callers tolerate transient staleness.
    async fn list_volumes(&self) -> Result<Vec<Volume>, BackendError>;

    /// The OS device path of an attached volume.
    ///
    /// Fails with [`BackendError::UnattachedVolume`] if the volume is not
    /// attached; once attached, the returned path names a real, stat-able
    /// block device.
    async fn get_device_path(
        &self,
        blockdevice_id: &BlockDeviceId,
    ) -> Result<Utf8PathBuf, BackendError>;
}
