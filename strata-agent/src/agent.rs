// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The agent composition root.

use crate::action::ActionEnv;
use crate::cluster_status::{ClusterStatusTask, StatusInput};
use crate::config::Config;
use crate::controller::{ConnectionSupervisor, ControllerClient};
use crate::convergence::{
    ConvergenceTask, IterationContext, LoopState, QUEUE_SIZE,
};
use crate::discovery::Discoverer;
use crate::plan::Planner;
use slog::Logger;
use std::sync::Arc;
use std::time::Duration;
use strata_common::dataset::NodeId;
use strata_storage::{Mounter, StorageBackend};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// A running node agent.
///
/// Wires the controller channel, the connection-status machine, and the
/// convergence loop together, and owns their shutdown.
pub struct Agent {
    node_id: NodeId,
    status_tx: mpsc::Sender<StatusInput>,
    supervisor_shutdown: watch::Sender<bool>,
    status_task: JoinHandle<()>,
    loop_state: watch::Receiver<LoopState>,
    log: Logger,
}

impl Agent {
    /// Spawn every agent task against the given storage pair and
    /// controller client.
    pub fn start(
        config: &Config,
        node_id: NodeId,
        backend: Arc<dyn StorageBackend>,
        mounter: Arc<dyn Mounter>,
        client: Arc<dyn ControllerClient>,
        log: &Logger,
    ) -> Agent {
        let discoverer = Arc::new(Discoverer::new(
            backend.clone(),
            mounter.clone(),
            node_id,
            config.hostname.clone(),
            config.mount_root.clone(),
            log,
        ));
        let env = ActionEnv {
            backend,
            mounter,
            node_id,
            log: log.new(o!("component" => "actions")),
        };
        let ctx = IterationContext {
            node_id,
            discoverer,
            planner: Arc::new(Planner::new()),
            env,
            parallelism: config.convergence.action_parallelism,
            log: log.new(o!("component" => "iteration")),
        };

        let (loop_task, loop_tx, loop_state) = ConvergenceTask::new(
            ctx,
            Duration::from_millis(config.convergence.interval_ms),
            log,
        );
        tokio::spawn(loop_task.run());

        let (status_tx, status_rx) = mpsc::channel(QUEUE_SIZE);
        let status_task =
            tokio::spawn(ClusterStatusTask::new(status_rx, loop_tx, log).run());

        let (supervisor_shutdown, shutdown_rx) = watch::channel(false);
        let supervisor = ConnectionSupervisor::new(
            client,
            status_tx.clone(),
            Duration::from_millis(config.controller.poll_interval_ms),
            shutdown_rx,
            log,
        );
        tokio::spawn(supervisor.run());

        info!(log, "agent started"; "node_id" => %node_id);
        Agent {
            node_id,
            status_tx,
            supervisor_shutdown,
            status_task,
            loop_state,
            log: log.clone(),
        }
    }

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    /// Shut the agent down: stop reconnecting, run the connection machine
    /// to its terminal state, and wait for the loop to go quiet. The
    /// iteration in flight, if any, is never cancelled.
    pub async fn shutdown(self) {
        let _ = self.supervisor_shutdown.send(true);
        let _ = self.status_tx.send(StatusInput::Shutdown).await;
        let _ = self.status_task.await;
        let mut loop_state = self.loop_state;
        let _ = loop_state
            .wait_for(|state| *state == LoopState::Stopped)
            .await;
        info!(self.log, "agent shut down"; "node_id" => %self.node_id);
    }
}
