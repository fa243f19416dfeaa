// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The convergence loop.
//!
//! A small state machine schedules repeated discover → plan → apply
//! iterations. Status updates arriving mid-iteration are buffered (latest
//! wins) and picked up by the next pass; a stop request never cancels the
//! in-flight iteration, it only suppresses the next one.

use crate::action::{run_actions, Action, ActionEnv};
use crate::controller::ControllerClient;
use crate::discovery::{Discoverer, DiscoveryError};
use crate::plan::{PlanError, Planner};
use chrono::Utc;
use slog::Logger;
use std::sync::Arc;
use std::time::Duration;
use strata_common::cluster::{
    ClusterConfiguration, ClusterState, NodeStateReport,
};
use strata_common::dataset::NodeId;
use tokio::sync::{mpsc, watch};
use tokio::time::sleep;

// Bound on buffered inputs; far beyond anything the drivers produce.
pub(crate) const QUEUE_SIZE: usize = 256;

/// Everything an iteration needs: the client to report through, plus the
/// latest configuration and cluster-state snapshot.
#[derive(Clone)]
pub struct StatusInfo {
    pub client: Arc<dyn ControllerClient>,
    pub configuration: ClusterConfiguration,
    pub cluster_state: ClusterState,
}

/// States of the convergence loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoopState {
    /// Not converging. The initial state.
    Stopped,
    /// An iteration is in flight or scheduled.
    Converging,
    /// An iteration is in flight but the next one is suppressed.
    ConvergingStopping,
}

/// Inputs driving the loop.
pub enum LoopInput {
    StatusUpdate(StatusInfo),
    Stop,
    IterationDone,
}

impl LoopInput {
    pub fn kind(&self) -> LoopInputKind {
        match self {
            LoopInput::StatusUpdate(_) => LoopInputKind::StatusUpdate,
            LoopInput::Stop => LoopInputKind::Stop,
            LoopInput::IterationDone => LoopInputKind::IterationDone,
        }
    }
}

/// The tag of a [`LoopInput`], used by the transition function.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoopInputKind {
    StatusUpdate,
    Stop,
    IterationDone,
}

/// Effects the driver carries out after a transition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoopEffect {
    /// Start an iteration against the buffered status info.
    RunIteration,
}

/// One transition of the loop machine. Pure; inputs outside the table are
/// absorbed without effect.
pub fn step(
    state: LoopState,
    input: LoopInputKind,
) -> (LoopState, Option<LoopEffect>) {
    use LoopInputKind as In;
    use LoopState as St;

    match (state, input) {
        (St::Stopped, In::StatusUpdate) => {
            (St::Converging, Some(LoopEffect::RunIteration))
        }
        (St::Converging, In::StatusUpdate) => (St::Converging, None),
        (St::Converging, In::Stop) => (St::ConvergingStopping, None),
        (St::Converging, In::IterationDone) => {
            (St::Converging, Some(LoopEffect::RunIteration))
        }
        (St::ConvergingStopping, In::StatusUpdate) => (St::Converging, None),
        (St::ConvergingStopping, In::IterationDone) => (St::Stopped, None),
        (state, _) => (state, None),
    }
}

/// Long-lived collaborators an iteration runs against.
#[derive(Clone)]
pub struct IterationContext {
    pub node_id: NodeId,
    pub discoverer: Arc<Discoverer>,
    pub planner: Arc<Planner>,
    pub env: ActionEnv,
    pub parallelism: usize,
    pub log: Logger,
}

/// Errors that abort one iteration.
///
/// Neither is fatal to the agent: the driver logs the error and the loop
/// schedules the next cycle as usual.
#[derive(Debug, thiserror::Error)]
pub enum IterationError {
    #[error("local state discovery failed: {0}")]
    Discovery(#[from] DiscoveryError),

    #[error("planning failed: {0}")]
    Plan(#[from] PlanError),
}

/// Outcome of one iteration.
#[derive(Clone, Copy, Debug)]
pub struct IterationSummary {
    /// Non-trivial actions planned this cycle.
    pub planned: usize,
    /// Of those, how many failed.
    pub failures: usize,
}

impl IterationSummary {
    /// True when the node's realized state matched the configuration.
    pub fn converged(&self) -> bool {
        self.planned == 0
    }
}

/// One discover → report → plan → apply pass.
pub async fn converge_once(
    ctx: &IterationContext,
    mut info: StatusInfo,
) -> Result<IterationSummary, IterationError> {
    let discovery = ctx.discoverer.discover().await?;

    // Fold the fresh snapshot into the cached cluster view so a stale
    // controller snapshot cannot mask a just-observed local fact.
    info.cluster_state.insert_node(discovery.local.clone());

    // Fire-and-forget: a failed report is superseded by the next cycle's.
    let report = NodeStateReport {
        state: discovery.local.clone(),
        nonmanifest: discovery.nonmanifest.clone(),
        time_observed: Utc::now(),
    };
    if let Err(err) = info.client.report_node_state(&report).await {
        warn!(ctx.log, "failed to report local state"; "error" => %err);
    }

    let desired = info.configuration.desired_for(ctx.node_id);
    let actions = ctx.planner.plan(&discovery.local.datasets, &desired)?;
    let planned = actions
        .iter()
        .filter(|action| !matches!(action, Action::Nothing { .. }))
        .count();
    let failures = run_actions(&ctx.env, actions, ctx.parallelism).await;
    Ok(IterationSummary { planned, failures })
}

/// Driver task for the convergence loop.
///
/// Owns the machine state and the buffered-latest status info; at most one
/// iteration is in flight at a time, and the machine itself is never
/// re-entered concurrently.
pub struct ConvergenceTask {
    ctx: IterationContext,
    interval: Duration,
    rx: mpsc::Receiver<LoopInput>,
    tx: mpsc::Sender<LoopInput>,
    state_tx: watch::Sender<LoopState>,
    state: LoopState,
    info: Option<StatusInfo>,
    log: Logger,
}

impl ConvergenceTask {
    /// Returns the task, its input sender, and a watch over the loop
    /// state.
    pub fn new(
        ctx: IterationContext,
        interval: Duration,
        log: &Logger,
    ) -> (Self, mpsc::Sender<LoopInput>, watch::Receiver<LoopState>) {
        let (tx, rx) = mpsc::channel(QUEUE_SIZE);
        let (state_tx, state_rx) = watch::channel(LoopState::Stopped);
        let task = ConvergenceTask {
            ctx,
            interval,
            rx,
            tx: tx.clone(),
            state_tx,
            state: LoopState::Stopped,
            info: None,
            log: log.new(o!("component" => "ConvergenceTask")),
        };
        (task, tx, state_rx)
    }

    /// Run the loop driver. This should be spawned into a tokio task.
    pub async fn run(mut self) {
        while let Some(input) = self.rx.recv().await {
            if let LoopInput::StatusUpdate(info) = &input {
                self.info = Some(info.clone());
            }
            let (next, effect) = step(self.state, input.kind());
            if next != self.state {
                debug!(
                    self.log,
                    "loop state change";
                    "from" => ?self.state,
                    "to" => ?next,
                );
            }
            self.state = next;
            self.state_tx.send_replace(next);
            if let Some(LoopEffect::RunIteration) = effect {
                // The table only requests an iteration once a status
                // update has been stored.
                let Some(info) = self.info.clone() else {
                    error!(self.log, "iteration requested with no status");
                    continue;
                };
                self.spawn_iteration(info);
            }
        }
    }

    fn spawn_iteration(&self, info: StatusInfo) {
        let ctx = self.ctx.clone();
        let interval = self.interval;
        let tx = self.tx.clone();
        let log = self.log.clone();
        tokio::spawn(async move {
            match converge_once(&ctx, info).await {
                Ok(summary) if !summary.converged() => {
                    info!(
                        log,
                        "convergence cycle ran actions";
                        "actions" => summary.planned,
                        "failures" => summary.failures,
                    );
                }
                Ok(_) => {
                    debug!(log, "node state matches configuration");
                }
                Err(err) => {
                    error!(
                        log,
                        "convergence cycle made no progress";
                        "error" => %err,
                    );
                }
            }
            sleep(interval).await;
            let _ = tx.send(LoopInput::IterationDone).await;
        });
    }
}
