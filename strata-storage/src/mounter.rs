// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Filesystem mount primitives.

use async_trait::async_trait;
use camino::{Utf8Path, Utf8PathBuf};
use std::collections::BTreeMap;

/// Errors a [`Mounter`] operation can return.
#[derive(Debug, thiserror::Error)]
pub enum MountError {
    #[error("nothing is mounted at {mount_point}")]
    NotMounted { mount_point: Utf8PathBuf },

    #[error("a filesystem is already mounted at {mount_point}")]
    AlreadyMounted { mount_point: Utf8PathBuf },

    #[error("device {device} does not exist")]
    DeviceMissing { device: Utf8PathBuf },

    #[error("filesystem operation failed: {0}")]
    Io(#[source] std::io::Error),
}

/// Mount-table access and mount/unmount primitives.
///
/// Filesystem mechanics (including formatting a device on first use) are
/// the implementation's concern; the agent only asks for a device to be
/// mounted at a path or removed from one.
#[async_trait]
pub trait Mounter: Send + Sync {
    /// Mount `device` at `mount_point`, creating the filesystem if the
    /// device has none.
    async fn mount(
        &self,
        device: &Utf8Path,
        mount_point: &Utf8Path,
    ) -> Result<(), MountError>;

    /// Unmount whatever is mounted at `mount_point`.
    async fn unmount(&self, mount_point: &Utf8Path) -> Result<(), MountError>;

    /// The current mount table, mount point to backing device.
    async fn mounts(
        &self,
    ) -> Result<BTreeMap<Utf8PathBuf, Utf8PathBuf>, MountError>;

    /// Whether `path` names a present, stat-able block device.
    async fn device_present(&self, path: &Utf8Path) -> bool;
}
