// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Simulated storage provider.
//!
//! An in-memory backend/mounter pair over shared state, used by tests and
//! development deployments. It enforces every error case of the contract
//! (duplicate create, double attach, detach of an unattached volume) and
//! offers failure-injection toggles for exercising recovery paths.

use crate::backend::{BackendError, StorageBackend};
use crate::mounter::{MountError, Mounter};
use async_trait::async_trait;
use camino::{Utf8Path, Utf8PathBuf};
use futures::lock::Mutex;
use slog::{info, o, Logger};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use strata_common::dataset::{DatasetId, NodeId};
use strata_common::volume::{BlockDeviceId, Volume};

struct SimState {
    log: Logger,
    volumes: BTreeMap<BlockDeviceId, Volume>,
    /// Device nodes that currently exist (stat-able paths).
    devices: BTreeSet<Utf8PathBuf>,
    /// Mount point to backing device.
    mounts: BTreeMap<Utf8PathBuf, Utf8PathBuf>,
    next_volume: u32,
    create_error: bool,
    attach_error: bool,
    /// When set, attach succeeds but the device node never materializes,
    /// so `get_device_path` hands out a path that cannot be stat-ed.
    broken_device_paths: bool,
}

impl SimState {
    fn new(log: Logger) -> Self {
        Self {
            log,
            volumes: BTreeMap::new(),
            devices: BTreeSet::new(),
            mounts: BTreeMap::new(),
            next_volume: 0,
            create_error: false,
            attach_error: false,
            broken_device_paths: false,
        }
    }

    fn device_path(blockdevice_id: &BlockDeviceId) -> Utf8PathBuf {
        Utf8PathBuf::from(format!("/dev/sim/{blockdevice_id}"))
    }

    fn volume(
        &self,
        blockdevice_id: &BlockDeviceId,
    ) -> Result<&Volume, BackendError> {
        self.volumes.get(blockdevice_id).ok_or_else(|| {
            BackendError::UnknownVolume {
                blockdevice_id: blockdevice_id.clone(),
            }
        })
    }
}

/// The simulated [`StorageBackend`].
#[derive(Clone)]
pub struct SimBackend {
    inner: Arc<Mutex<SimState>>,
}

/// The simulated [`Mounter`], sharing state with its [`SimBackend`].
#[derive(Clone)]
pub struct SimMounter {
    inner: Arc<Mutex<SimState>>,
}

/// Build a backend/mounter pair over shared in-memory state.
pub fn new_sim_storage(log: &Logger) -> (SimBackend, SimMounter) {
    let inner = Arc::new(Mutex::new(SimState::new(
        log.new(o!("component" => "SimStorage")),
    )));
    (SimBackend { inner: inner.clone() }, SimMounter { inner })
}

impl SimBackend {
    pub async fn set_create_error(&self, value: bool) {
        self.inner.lock().await.create_error = value;
    }

    pub async fn set_attach_error(&self, value: bool) {
        self.inner.lock().await.attach_error = value;
    }

    pub async fn set_broken_device_paths(&self, value: bool) {
        self.inner.lock().await.broken_device_paths = value;
    }

    pub async fn volume_count(&self) -> usize {
        self.inner.lock().await.volumes.len()
    }

    /// True when no volumes, device nodes, or mounts remain.
    pub async fn is_empty(&self) -> bool {
        let inner = self.inner.lock().await;
        inner.volumes.is_empty()
            && inner.devices.is_empty()
            && inner.mounts.is_empty()
    }
}

#[async_trait]
impl StorageBackend for SimBackend {
    async fn create_volume(
        &self,
        dataset_id: DatasetId,
        size: u64,
    ) -> Result<Volume, BackendError> {
        let mut inner = self.inner.lock().await;
        if inner.create_error {
            return Err(BackendError::Transient {
                message: "injected create error".to_string(),
            });
        }
        if inner.volumes.values().any(|v| v.dataset_id == dataset_id) {
            return Err(BackendError::AlreadyExists { dataset_id });
        }
        let blockdevice_id = BlockDeviceId(format!("sim-{}", inner.next_volume));
        inner.next_volume += 1;
        let volume = Volume {
            blockdevice_id: blockdevice_id.clone(),
            size,
            attached_to: None,
            dataset_id,
        };
        info!(
            inner.log,
            "created volume";
            "blockdevice_id" => %blockdevice_id,
            "dataset_id" => %dataset_id,
        );
        inner.volumes.insert(blockdevice_id, volume.clone());
        Ok(volume)
    }

    async fn attach_volume(
        &self,
        blockdevice_id: &BlockDeviceId,
        attach_to: NodeId,
    ) -> Result<Volume, BackendError> {
        let mut inner = self.inner.lock().await;
        if inner.attach_error {
            return Err(BackendError::Transient {
                message: "injected attach error".to_string(),
            });
        }
        let volume = inner.volume(blockdevice_id)?;
        if let Some(holder) = volume.attached_to {
            return Err(BackendError::AlreadyAttached {
                blockdevice_id: blockdevice_id.clone(),
                attached_to: holder,
            });
        }
        let broken = inner.broken_device_paths;
        let volume = inner
            .volumes
            .get_mut(blockdevice_id)
            .expect("volume existence checked above");
        volume.attached_to = Some(attach_to);
        let volume = volume.clone();
        if !broken {
            inner.devices.insert(SimState::device_path(blockdevice_id));
        }
        info!(
            inner.log,
            "attached volume";
            "blockdevice_id" => %blockdevice_id,
            "node_id" => %attach_to,
        );
        Ok(volume)
    }

    async fn detach_volume(
        &self,
        blockdevice_id: &BlockDeviceId,
    ) -> Result<(), BackendError> {
        let mut inner = self.inner.lock().await;
        let volume = inner.volume(blockdevice_id)?;
        if volume.attached_to.is_none() {
            return Err(BackendError::UnattachedVolume {
                blockdevice_id: blockdevice_id.clone(),
            });
        }
        let volume = inner
            .volumes
            .get_mut(blockdevice_id)
            .expect("volume existence checked above");
        volume.attached_to = None;
        inner.devices.remove(&SimState::device_path(blockdevice_id));
        info!(inner.log, "detached volume"; "blockdevice_id" => %blockdevice_id);
        Ok(())
    }

    async fn destroy_volume(
        &self,
        blockdevice_id: &BlockDeviceId,
    ) -> Result<(), BackendError> {
        let mut inner = self.inner.lock().await;
        if inner.volumes.remove(blockdevice_id).is_none() {
            return Err(BackendError::UnknownVolume {
                blockdevice_id: blockdevice_id.clone(),
            });
        }
        inner.devices.remove(&SimState::device_path(blockdevice_id));
        info!(inner.log, "destroyed volume"; "blockdevice_id" => %blockdevice_id);
        Ok(())
    }

    async fn list_volumes(&self) -> Result<Vec<Volume>, BackendError> {
        Ok(self.inner.lock().await.volumes.values().cloned().collect())
    }

    async fn get_device_path(
        &self,
        blockdevice_id: &BlockDeviceId,
    ) -> Result<Utf8PathBuf, BackendError> {
        let inner = self.inner.lock().await;
        let volume = inner.volume(blockdevice_id)?;
        if volume.attached_to.is_none() {
            return Err(BackendError::UnattachedVolume {
                blockdevice_id: blockdevice_id.clone(),
            });
        }
        Ok(SimState::device_path(blockdevice_id))
    }
}

#[async_trait]
impl Mounter for SimMounter {
    async fn mount(
        &self,
        device: &Utf8Path,
        mount_point: &Utf8Path,
    ) -> Result<(), MountError> {
        let mut inner = self.inner.lock().await;
        if !inner.devices.contains(device) {
            return Err(MountError::DeviceMissing { device: device.into() });
        }
        if inner.mounts.contains_key(mount_point) {
            return Err(MountError::AlreadyMounted {
                mount_point: mount_point.into(),
            });
        }
        inner.mounts.insert(mount_point.into(), device.into());
        info!(
            inner.log,
            "mounted device";
            "device" => %device,
            "mount_point" => %mount_point,
        );
        Ok(())
    }

    async fn unmount(&self, mount_point: &Utf8Path) -> Result<(), MountError> {
        let mut inner = self.inner.lock().await;
        if inner.mounts.remove(mount_point).is_none() {
            return Err(MountError::NotMounted {
                mount_point: mount_point.into(),
            });
        }
        info!(inner.log, "unmounted filesystem"; "mount_point" => %mount_point);
        Ok(())
    }

    async fn mounts(
        &self,
    ) -> Result<BTreeMap<Utf8PathBuf, Utf8PathBuf>, MountError> {
        Ok(self.inner.lock().await.mounts.clone())
    }

    async fn device_present(&self, path: &Utf8Path) -> bool {
        self.inner.lock().await.devices.contains(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_log() -> Logger {
        Logger::root(slog::Discard, o!())
    }

    #[tokio::test]
    async fn duplicate_create_is_rejected() {
        let (backend, _mounter) = new_sim_storage(&test_log());
        let dataset_id = DatasetId::new_v4();
        backend.create_volume(dataset_id, 1024).await.unwrap();
        let err = backend.create_volume(dataset_id, 1024).await.unwrap_err();
        assert!(matches!(err, BackendError::AlreadyExists { .. }));
        assert_eq!(backend.volume_count().await, 1);
    }

    #[tokio::test]
    async fn double_attach_is_rejected() {
        let (backend, _mounter) = new_sim_storage(&test_log());
        let node_a = NodeId::new_v4();
        let node_b = NodeId::new_v4();
        let volume = backend
            .create_volume(DatasetId::new_v4(), 1024)
            .await
            .unwrap();
        backend.attach_volume(&volume.blockdevice_id, node_a).await.unwrap();
        let err = backend
            .attach_volume(&volume.blockdevice_id, node_b)
            .await
            .unwrap_err();
        match err {
            BackendError::AlreadyAttached { attached_to, .. } => {
                assert_eq!(attached_to, node_a);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn detach_of_unattached_volume_fails() {
        let (backend, _mounter) = new_sim_storage(&test_log());
        let volume = backend
            .create_volume(DatasetId::new_v4(), 1024)
            .await
            .unwrap();
        let err =
            backend.detach_volume(&volume.blockdevice_id).await.unwrap_err();
        assert!(matches!(err, BackendError::UnattachedVolume { .. }));
    }

    #[tokio::test]
    async fn destroy_of_unknown_volume_fails() {
        let (backend, _mounter) = new_sim_storage(&test_log());
        let err = backend
            .destroy_volume(&BlockDeviceId::from("sim-nope"))
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::UnknownVolume { .. }));
    }

    #[tokio::test]
    async fn device_path_requires_attachment() {
        let (backend, mounter) = new_sim_storage(&test_log());
        let node = NodeId::new_v4();
        let volume = backend
            .create_volume(DatasetId::new_v4(), 1024)
            .await
            .unwrap();
        let err = backend
            .get_device_path(&volume.blockdevice_id)
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::UnattachedVolume { .. }));

        backend.attach_volume(&volume.blockdevice_id, node).await.unwrap();
        let path =
            backend.get_device_path(&volume.blockdevice_id).await.unwrap();
        assert!(mounter.device_present(&path).await);
    }

    #[tokio::test]
    async fn broken_device_paths_leave_no_device_node() {
        let (backend, mounter) = new_sim_storage(&test_log());
        backend.set_broken_device_paths(true).await;
        let node = NodeId::new_v4();
        let volume = backend
            .create_volume(DatasetId::new_v4(), 1024)
            .await
            .unwrap();
        backend.attach_volume(&volume.blockdevice_id, node).await.unwrap();
        let path =
            backend.get_device_path(&volume.blockdevice_id).await.unwrap();
        assert!(!mounter.device_present(&path).await);
    }

    #[tokio::test]
    async fn mount_and_unmount_round_trip() {
        let (backend, mounter) = new_sim_storage(&test_log());
        let node = NodeId::new_v4();
        let volume = backend
            .create_volume(DatasetId::new_v4(), 1024)
            .await
            .unwrap();
        backend.attach_volume(&volume.blockdevice_id, node).await.unwrap();
        let device =
            backend.get_device_path(&volume.blockdevice_id).await.unwrap();

        let mount_point = Utf8PathBuf::from("/srv/strata/test");
        mounter.mount(&device, &mount_point).await.unwrap();
        let err = mounter.mount(&device, &mount_point).await.unwrap_err();
        assert!(matches!(err, MountError::AlreadyMounted { .. }));

        mounter.unmount(&mount_point).await.unwrap();
        let err = mounter.unmount(&mount_point).await.unwrap_err();
        assert!(matches!(err, MountError::NotMounted { .. }));
    }
}
