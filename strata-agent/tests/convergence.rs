// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! End-to-end convergence against the simulated storage provider.

use async_trait::async_trait;
use slog::{o, Discard, Logger};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use strata_agent::action::ActionEnv;
use strata_agent::cluster_status::{ClusterStatusTask, StatusInput};
use strata_agent::controller::{ControllerClient, ControllerError};
use strata_agent::convergence::{
    converge_once, ConvergenceTask, IterationContext, LoopState, StatusInfo,
};
use strata_agent::discovery::Discoverer;
use strata_agent::plan::Planner;
use strata_common::cluster::{
    ClusterConfiguration, ClusterState, ClusterStatus, NodeStateReport,
};
use strata_common::dataset::{
    DatasetId, DesiredDataset, DiscoveredState, NodeId,
};
use strata_storage::sim::{new_sim_storage, SimBackend};
use strata_storage::StorageBackend;
use tokio::sync::mpsc;
use tokio::time::timeout;

const MOUNT_ROOT: &str = "/srv/strata";

/// A controller that accepts reports and serves an empty status.
#[derive(Default)]
struct RecordingController {
    reports: Mutex<Vec<NodeStateReport>>,
}

#[async_trait]
impl ControllerClient for RecordingController {
    async fn cluster_status(&self) -> Result<ClusterStatus, ControllerError> {
        Ok(ClusterStatus {
            configuration: ClusterConfiguration::default(),
            cluster_state: ClusterState::default(),
        })
    }

    async fn report_node_state(
        &self,
        report: &NodeStateReport,
    ) -> Result<(), ControllerError> {
        self.reports.lock().unwrap().push(report.clone());
        Ok(())
    }
}

struct Harness {
    node_id: NodeId,
    backend: SimBackend,
    ctx: IterationContext,
    controller: Arc<RecordingController>,
}

fn harness() -> Harness {
    let log = Logger::root(Discard, o!());
    let (backend, mounter) = new_sim_storage(&log);
    let node_id = NodeId::new_v4();
    let discoverer = Arc::new(Discoverer::new(
        Arc::new(backend.clone()),
        Arc::new(mounter.clone()),
        node_id,
        "node-a".to_string(),
        MOUNT_ROOT.into(),
        &log,
    ));
    let env = ActionEnv {
        backend: Arc::new(backend.clone()),
        mounter: Arc::new(mounter),
        node_id,
        log: log.clone(),
    };
    let ctx = IterationContext {
        node_id,
        discoverer,
        planner: Arc::new(Planner::new()),
        env,
        parallelism: 4,
        log,
    };
    Harness {
        node_id,
        backend,
        ctx,
        controller: Arc::new(RecordingController::default()),
    }
}

impl Harness {
    fn status_info(&self, configuration: ClusterConfiguration) -> StatusInfo {
        StatusInfo {
            client: self.controller.clone(),
            configuration,
            cluster_state: ClusterState::default(),
        }
    }

    /// A configuration asking for each dataset to be mounted on this node
    /// at its canonical mount point.
    fn mounted_config(&self, datasets: &[DatasetId]) -> ClusterConfiguration {
        let mut config = ClusterConfiguration::default();
        let node = config.nodes.entry(self.node_id).or_default();
        for dataset_id in datasets {
            node.insert(
                *dataset_id,
                DesiredDataset::Mounted {
                    dataset_id: *dataset_id,
                    metadata: BTreeMap::new(),
                    maximum_size: Some(1 << 20),
                    mount_point: format!("{MOUNT_ROOT}/{dataset_id}").into(),
                },
            );
        }
        config
    }

    async fn converge_to_fixed_point(
        &self,
        config: &ClusterConfiguration,
        max_rounds: usize,
    ) -> usize {
        let mut rounds = 0;
        loop {
            let summary =
                converge_once(&self.ctx, self.status_info(config.clone()))
                    .await
                    .unwrap();
            rounds += 1;
            if summary.converged() {
                return rounds;
            }
            assert!(
                rounds < max_rounds,
                "no fixed point after {rounds} rounds"
            );
        }
    }
}

#[tokio::test]
async fn convergence_reaches_a_fixed_point() {
    let h = harness();
    let id1 = DatasetId::new_v4();
    let id2 = DatasetId::new_v4();
    let config = h.mounted_config(&[id1, id2]);

    // Empty to mounted is create, attach, mount, then the converged round.
    let rounds = h.converge_to_fixed_point(&config, 8).await;
    assert_eq!(rounds, 4);

    let discovery = h.ctx.discoverer.discover().await.unwrap();
    for dataset_id in [id1, id2] {
        assert_eq!(
            discovery.local.datasets[&dataset_id].state(),
            DiscoveredState::Mounted
        );
    }

    // Every round reported the freshly discovered local state.
    assert_eq!(h.controller.reports.lock().unwrap().len(), rounds);
}

#[tokio::test]
async fn deleted_datasets_drain_and_disappear() {
    let h = harness();
    let dataset_id = DatasetId::new_v4();
    let config = h.mounted_config(&[dataset_id]);
    h.converge_to_fixed_point(&config, 8).await;

    let mut deleted = ClusterConfiguration::default();
    deleted.nodes.entry(h.node_id).or_default().insert(
        dataset_id,
        DesiredDataset::Deleted { dataset_id, metadata: BTreeMap::new() },
    );

    // Mounted datasets drain: unmount first, destroy on the next pass.
    let summary =
        converge_once(&h.ctx, h.status_info(deleted.clone())).await.unwrap();
    assert_eq!(summary.planned, 1);
    let rounds = h.converge_to_fixed_point(&deleted, 4).await;
    assert!(rounds <= 3);
    assert!(h.backend.is_empty().await);
}

#[tokio::test]
async fn orphaned_volumes_are_destroyed() {
    let h = harness();
    let dataset_id = DatasetId::new_v4();
    h.backend.create_volume(dataset_id, 1024).await.unwrap();

    // Nothing desired: the unattached volume converges to destruction.
    let summary = converge_once(
        &h.ctx,
        h.status_info(ClusterConfiguration::default()),
    )
    .await
    .unwrap();
    assert_eq!(summary.planned, 1);
    assert_eq!(summary.failures, 0);
    assert_eq!(h.backend.volume_count().await, 0);
}

#[tokio::test]
async fn datasets_assigned_elsewhere_are_released_not_destroyed() {
    let h = harness();
    let dataset_id = DatasetId::new_v4();
    let volume =
        h.backend.create_volume(dataset_id, 1024).await.unwrap();
    h.backend
        .attach_volume(&volume.blockdevice_id, h.node_id)
        .await
        .unwrap();

    // The dataset belongs to another node; this node detaches and then
    // leaves the volume alone.
    let elsewhere = NodeId::new_v4();
    let mut config = ClusterConfiguration::default();
    config.nodes.entry(elsewhere).or_default().insert(
        dataset_id,
        DesiredDataset::Mounted {
            dataset_id,
            metadata: BTreeMap::new(),
            maximum_size: Some(1 << 20),
            mount_point: format!("{MOUNT_ROOT}/{dataset_id}").into(),
        },
    );

    let rounds = h.converge_to_fixed_point(&config, 4).await;
    assert!(rounds <= 2);
    assert_eq!(h.backend.volume_count().await, 1);
    let volumes = h.ctx.env.backend.list_volumes().await.unwrap();
    assert_eq!(volumes[0].attached_to, None);
}

#[tokio::test]
async fn one_dataset_failure_does_not_block_another() {
    let h = harness();
    let failing = DatasetId::new_v4();
    let succeeding = DatasetId::new_v4();
    let config = h.mounted_config(&[failing, succeeding]);

    // The failing dataset already has a volume, so its first action is an
    // attach, which is set up to fail; the other dataset's create is
    // unaffected.
    h.backend.create_volume(failing, 1024).await.unwrap();
    h.backend.set_attach_error(true).await;

    let summary =
        converge_once(&h.ctx, h.status_info(config.clone())).await.unwrap();
    assert_eq!(summary.planned, 2);
    assert_eq!(summary.failures, 1);
    assert_eq!(h.backend.volume_count().await, 2);

    // Once the fault clears, re-planning finishes the job.
    h.backend.set_attach_error(false).await;
    h.converge_to_fixed_point(&config, 8).await;
    let discovery = h.ctx.discoverer.discover().await.unwrap();
    assert_eq!(
        discovery.local.datasets[&failing].state(),
        DiscoveredState::Mounted
    );
    assert_eq!(
        discovery.local.datasets[&succeeding].state(),
        DiscoveredState::Mounted
    );
}

#[tokio::test]
async fn disconnect_stops_the_loop_and_reconnect_resumes() {
    let h = harness();
    let log = Logger::root(Discard, o!());
    let (loop_task, loop_tx, mut loop_state) =
        ConvergenceTask::new(h.ctx.clone(), Duration::from_millis(10), &log);
    tokio::spawn(loop_task.run());
    let (status_tx, status_rx) = mpsc::channel(16);
    tokio::spawn(ClusterStatusTask::new(status_rx, loop_tx, &log).run());

    let dataset_id = DatasetId::new_v4();
    let status = ClusterStatus {
        configuration: h.mounted_config(&[dataset_id]),
        cluster_state: ClusterState::default(),
    };

    let client: Arc<dyn ControllerClient> = h.controller.clone();
    status_tx
        .send(StatusInput::Connected(client.clone()))
        .await
        .unwrap();
    status_tx
        .send(StatusInput::StatusUpdate(status.clone()))
        .await
        .unwrap();
    timeout(
        Duration::from_secs(5),
        loop_state.wait_for(|state| *state == LoopState::Converging),
    )
    .await
    .unwrap()
    .unwrap();

    // Let the loop drive the dataset all the way to mounted.
    timeout(Duration::from_secs(5), async {
        loop {
            let discovery = h.ctx.discoverer.discover().await.unwrap();
            let state = discovery
                .local
                .datasets
                .get(&dataset_id)
                .map(|dataset| dataset.state());
            if state == Some(DiscoveredState::Mounted) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    // Losing the controller stops the loop once the iteration in flight
    // finishes.
    status_tx.send(StatusInput::Disconnected).await.unwrap();
    timeout(
        Duration::from_secs(5),
        loop_state.wait_for(|state| *state == LoopState::Stopped),
    )
    .await
    .unwrap()
    .unwrap();

    // Reconnecting with a fresh status resumes convergence.
    status_tx.send(StatusInput::Connected(client)).await.unwrap();
    status_tx.send(StatusInput::StatusUpdate(status)).await.unwrap();
    timeout(
        Duration::from_secs(5),
        loop_state.wait_for(|state| *state == LoopState::Converging),
    )
    .await
    .unwrap()
    .unwrap();
}
