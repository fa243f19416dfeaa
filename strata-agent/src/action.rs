// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Self-contained units of convergence work.
//!
//! Each action carries only the fields it needs and performs one backend
//! call, or a short fixed sequence of them. Actions carry no retry logic:
//! safety comes from re-planning against fresh discovery on the next
//! cycle, which the backend contract's duplicate rejection makes sound.

use crate::plan::PlanError;
use camino::Utf8PathBuf;
use slog::Logger;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use strata_common::dataset::{
    DatasetId, DesiredDataset, DiscoveredDataset, NodeId,
    DEFAULT_DATASET_SIZE,
};
use strata_common::volume::{BlockDeviceId, Volume};
use strata_storage::{BackendError, MountError, Mounter, StorageBackend};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// The kinds of corrective action the planner can choose.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ActionKind {
    Create,
    Attach,
    Mount,
    Unmount,
    Detach,
    Destroy,
    Nothing,
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ActionKind::Create => "create",
            ActionKind::Attach => "attach",
            ActionKind::Mount => "mount",
            ActionKind::Unmount => "unmount",
            ActionKind::Detach => "detach",
            ActionKind::Destroy => "destroy",
            ActionKind::Nothing => "nothing",
        };
        write!(f, "{}", s)
    }
}

/// Errors surfaced while running one action.
///
/// All of them are per-dataset recoverable: the action is abandoned for
/// this cycle and the next discovery re-evaluates the dataset from
/// scratch.
#[derive(Debug, thiserror::Error)]
pub enum ActionError {
    #[error("backend operation failed: {0}")]
    Backend(#[from] BackendError),

    #[error("filesystem operation failed: {0}")]
    Mount(#[from] MountError),

    #[error("dataset {dataset_id} has no unattached backing volume")]
    NoVolume { dataset_id: DatasetId },
}

/// Everything an action needs at run time.
#[derive(Clone)]
pub struct ActionEnv {
    pub backend: Arc<dyn StorageBackend>,
    pub mounter: Arc<dyn Mounter>,
    pub node_id: NodeId,
    pub log: Logger,
}

/// One corrective step for one dataset.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Action {
    /// Create the dataset's backing volume; later cycles attach and mount.
    Create { dataset_id: DatasetId, size: u64 },
    /// Attach the dataset's unattached volume to this node.
    Attach { dataset_id: DatasetId },
    /// Mount the attached volume's device at the desired mount point.
    Mount {
        dataset_id: DatasetId,
        blockdevice_id: BlockDeviceId,
        mount_point: Utf8PathBuf,
    },
    /// Unmount the dataset's filesystem.
    Unmount { dataset_id: DatasetId, mount_point: Utf8PathBuf },
    /// Release the volume so another node can attach it.
    Detach { dataset_id: DatasetId, blockdevice_id: BlockDeviceId },
    /// Destroy the backing volume, detaching it first when it was
    /// discovered attached here.
    Destroy {
        dataset_id: DatasetId,
        blockdevice_id: Option<BlockDeviceId>,
    },
    /// The dataset is already converged.
    Nothing { dataset_id: DatasetId },
}

impl Action {
    /// Build the action of the given kind from the dataset's discovered
    /// and desired states, taking exactly the fields it needs.
    ///
    /// A missing required field means the transition table handed us a
    /// state pair the action cannot be built from, which is a planning
    /// defect.
    pub fn from_state_and_config(
        kind: ActionKind,
        dataset_id: DatasetId,
        discovered: Option<&DiscoveredDataset>,
        desired: Option<&DesiredDataset>,
    ) -> Result<Action, PlanError> {
        let missing = |field: &'static str| PlanError::MissingField {
            dataset_id,
            kind,
            field,
        };
        match kind {
            ActionKind::Create => {
                let size = match desired {
                    Some(DesiredDataset::Mounted { maximum_size, .. })
                    | Some(DesiredDataset::NotMounted {
                        maximum_size, ..
                    }) => maximum_size.unwrap_or(DEFAULT_DATASET_SIZE),
                    _ => return Err(missing("desired size")),
                };
                Ok(Action::Create { dataset_id, size })
            }
            ActionKind::Attach => Ok(Action::Attach { dataset_id }),
            ActionKind::Mount => {
                let blockdevice_id = match discovered {
                    Some(DiscoveredDataset::Attached {
                        blockdevice_id,
                        ..
                    }) => blockdevice_id.clone(),
                    _ => return Err(missing("blockdevice_id")),
                };
                let mount_point = match desired {
                    Some(DesiredDataset::Mounted { mount_point, .. }) => {
                        mount_point.clone()
                    }
                    _ => return Err(missing("mount_point")),
                };
                Ok(Action::Mount { dataset_id, blockdevice_id, mount_point })
            }
            ActionKind::Unmount => {
                let mount_point = match discovered {
                    Some(DiscoveredDataset::Mounted {
                        mount_point, ..
                    }) => mount_point.clone(),
                    _ => return Err(missing("mount_point")),
                };
                Ok(Action::Unmount { dataset_id, mount_point })
            }
            ActionKind::Detach => {
                let blockdevice_id = match discovered {
                    Some(DiscoveredDataset::Attached {
                        blockdevice_id,
                        ..
                    }) => blockdevice_id.clone(),
                    _ => return Err(missing("blockdevice_id")),
                };
                Ok(Action::Detach { dataset_id, blockdevice_id })
            }
            ActionKind::Destroy => {
                // An attached discovery names the volume; a non-manifest
                // one cannot, so the volume is resolved at run time.
                let blockdevice_id = match discovered {
                    Some(DiscoveredDataset::Attached {
                        blockdevice_id,
                        ..
                    }) => Some(blockdevice_id.clone()),
                    _ => None,
                };
                Ok(Action::Destroy { dataset_id, blockdevice_id })
            }
            ActionKind::Nothing => Ok(Action::Nothing { dataset_id }),
        }
    }

    pub fn dataset_id(&self) -> DatasetId {
        match self {
            Action::Create { dataset_id, .. }
            | Action::Attach { dataset_id }
            | Action::Mount { dataset_id, .. }
            | Action::Unmount { dataset_id, .. }
            | Action::Detach { dataset_id, .. }
            | Action::Destroy { dataset_id, .. }
            | Action::Nothing { dataset_id } => *dataset_id,
        }
    }

    pub fn kind(&self) -> ActionKind {
        match self {
            Action::Create { .. } => ActionKind::Create,
            Action::Attach { .. } => ActionKind::Attach,
            Action::Mount { .. } => ActionKind::Mount,
            Action::Unmount { .. } => ActionKind::Unmount,
            Action::Detach { .. } => ActionKind::Detach,
            Action::Destroy { .. } => ActionKind::Destroy,
            Action::Nothing { .. } => ActionKind::Nothing,
        }
    }

    /// Execute the action against the backend and mounter.
    pub async fn run(&self, env: &ActionEnv) -> Result<(), ActionError> {
        match self {
            Action::Create { dataset_id, size } => {
                env.backend.create_volume(*dataset_id, *size).await?;
                Ok(())
            }
            Action::Attach { dataset_id } => {
                let volume = find_unattached(env, *dataset_id).await?;
                env.backend
                    .attach_volume(&volume.blockdevice_id, env.node_id)
                    .await?;
                Ok(())
            }
            Action::Mount { blockdevice_id, mount_point, .. } => {
                let device =
                    env.backend.get_device_path(blockdevice_id).await?;
                env.mounter.mount(&device, mount_point).await?;
                Ok(())
            }
            Action::Unmount { mount_point, .. } => {
                env.mounter.unmount(mount_point).await?;
                Ok(())
            }
            Action::Detach { blockdevice_id, .. } => {
                env.backend.detach_volume(blockdevice_id).await?;
                Ok(())
            }
            Action::Destroy { dataset_id, blockdevice_id } => {
                let blockdevice_id = match blockdevice_id {
                    Some(id) => {
                        env.backend.detach_volume(id).await?;
                        id.clone()
                    }
                    None => {
                        find_unattached(env, *dataset_id)
                            .await?
                            .blockdevice_id
                    }
                };
                env.backend.destroy_volume(&blockdevice_id).await?;
                Ok(())
            }
            Action::Nothing { .. } => Ok(()),
        }
    }
}

async fn find_unattached(
    env: &ActionEnv,
    dataset_id: DatasetId,
) -> Result<Volume, ActionError> {
    env.backend
        .list_volumes()
        .await?
        .into_iter()
        .find(|v| v.dataset_id == dataset_id && v.attached_to.is_none())
        .ok_or(ActionError::NoVolume { dataset_id })
}

/// Run every planned action, one task per dataset, with bounded
/// parallelism.
///
/// A failing action is logged with its dataset id, kind, and reason, and
/// never blocks or aborts its siblings; the next discovery pass
/// re-evaluates the dataset from scratch. Returns the number of failures.
pub async fn run_actions(
    env: &ActionEnv,
    actions: BTreeSet<Action>,
    parallelism: usize,
) -> usize {
    let semaphore = Arc::new(Semaphore::new(parallelism));
    let mut set = JoinSet::new();
    for action in actions {
        if matches!(action, Action::Nothing { .. }) {
            debug!(
                env.log,
                "dataset already converged";
                "dataset_id" => %action.dataset_id(),
            );
            continue;
        }
        let semaphore = Arc::clone(&semaphore);
        let env = env.clone();
        set.spawn(async move {
            let _permit = semaphore
                .acquire_owned()
                .await
                .expect("semaphore is never closed");
            let result = action.run(&env).await;
            (action, result)
        });
    }

    let mut failures = 0;
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((action, Ok(()))) => {
                info!(
                    env.log,
                    "action complete";
                    "dataset_id" => %action.dataset_id(),
                    "action" => %action.kind(),
                );
            }
            Ok((action, Err(err))) => {
                failures += 1;
                error!(
                    env.log,
                    "action failed; dataset will be re-planned next cycle";
                    "dataset_id" => %action.dataset_id(),
                    "action" => %action.kind(),
                    "error" => %err,
                );
            }
            Err(err) => {
                failures += 1;
                error!(env.log, "action task failed"; "error" => %err);
            }
        }
    }
    failures
}
