// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The controller-connection state machine.
//!
//! Flaky connectivity never touches the convergence loop directly: this
//! machine absorbs the connection lifecycle and only ever tells the loop
//! "run with this status" or "stop".

use crate::controller::ControllerClient;
use crate::convergence::{LoopInput, StatusInfo};
use slog::Logger;
use std::sync::Arc;
use strata_common::cluster::ClusterStatus;
use tokio::sync::mpsc;

/// States of the connection machine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StatusState {
    /// No controller channel. The initial state.
    Disconnected,
    /// Connected, but no status received yet.
    Ignorant,
    /// Connected with a known status.
    Knowledgeable,
    /// Terminal; absorbs all further inputs.
    Shutdown,
}

/// Inputs to the connection machine.
pub enum StatusInput {
    Connected(Arc<dyn ControllerClient>),
    StatusUpdate(ClusterStatus),
    Disconnected,
    Shutdown,
}

impl StatusInput {
    pub fn kind(&self) -> StatusInputKind {
        match self {
            StatusInput::Connected(_) => StatusInputKind::Connected,
            StatusInput::StatusUpdate(_) => StatusInputKind::StatusUpdate,
            StatusInput::Disconnected => StatusInputKind::Disconnected,
            StatusInput::Shutdown => StatusInputKind::Shutdown,
        }
    }
}

/// The tag of a [`StatusInput`], used by the transition function.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StatusInputKind {
    Connected,
    StatusUpdate,
    Disconnected,
    Shutdown,
}

/// Effects the driver carries out after a transition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StatusEffect {
    /// Forward the received status to the convergence loop.
    ForwardStatus,
    /// Tell the convergence loop to stop scheduling iterations.
    StopLoop,
    /// Drop the stored client, severing the controller channel.
    Disconnect,
}

/// One transition of the connection machine. Pure; inputs outside the
/// table are absorbed without effect.
pub fn step(
    state: StatusState,
    input: StatusInputKind,
) -> (StatusState, Vec<StatusEffect>) {
    use StatusEffect::*;
    use StatusInputKind as In;
    use StatusState as St;

    match (state, input) {
        (St::Disconnected, In::Connected) => (St::Ignorant, vec![]),
        (St::Disconnected, In::Shutdown) => (St::Shutdown, vec![]),
        (St::Ignorant, In::Disconnected) => (St::Disconnected, vec![]),
        (St::Ignorant, In::StatusUpdate) => {
            (St::Knowledgeable, vec![ForwardStatus])
        }
        (St::Ignorant, In::Shutdown) => (St::Shutdown, vec![Disconnect]),
        (St::Knowledgeable, In::StatusUpdate) => {
            (St::Knowledgeable, vec![ForwardStatus])
        }
        (St::Knowledgeable, In::Disconnected) => {
            (St::Disconnected, vec![StopLoop])
        }
        (St::Knowledgeable, In::Shutdown) => {
            (St::Shutdown, vec![StopLoop, Disconnect])
        }
        (state, _) => (state, vec![]),
    }
}

/// Driver task for the connection machine.
pub struct ClusterStatusTask {
    rx: mpsc::Receiver<StatusInput>,
    loop_tx: mpsc::Sender<LoopInput>,
    state: StatusState,
    client: Option<Arc<dyn ControllerClient>>,
    log: Logger,
}

impl ClusterStatusTask {
    pub fn new(
        rx: mpsc::Receiver<StatusInput>,
        loop_tx: mpsc::Sender<LoopInput>,
        log: &Logger,
    ) -> Self {
        ClusterStatusTask {
            rx,
            loop_tx,
            state: StatusState::Disconnected,
            client: None,
            log: log.new(o!("component" => "ClusterStatusTask")),
        }
    }

    /// Run until shutdown. This should be spawned into a tokio task; it
    /// completes once the machine reaches its terminal state.
    pub async fn run(mut self) {
        while let Some(input) = self.rx.recv().await {
            self.handle(input).await;
            if self.state == StatusState::Shutdown {
                break;
            }
        }
        debug!(self.log, "cluster status task exiting");
    }

    async fn handle(&mut self, input: StatusInput) {
        let kind = input.kind();
        let (next, effects) = step(self.state, kind);
        if next != self.state {
            info!(
                self.log,
                "connection state change";
                "from" => ?self.state,
                "to" => ?next,
                "input" => ?kind,
            );
        }
        match &input {
            StatusInput::Connected(client) => {
                self.client = Some(client.clone());
            }
            StatusInput::Disconnected => {
                self.client = None;
            }
            _ => {}
        }
        for effect in effects {
            match effect {
                StatusEffect::ForwardStatus => {
                    let StatusInput::StatusUpdate(status) = &input else {
                        error!(
                            self.log,
                            "status forward requested for a non-status input",
                        );
                        continue;
                    };
                    let Some(client) = self.client.clone() else {
                        error!(
                            self.log,
                            "status update received with no stored client",
                        );
                        continue;
                    };
                    let info = StatusInfo {
                        client,
                        configuration: status.configuration.clone(),
                        cluster_state: status.cluster_state.clone(),
                    };
                    if self
                        .loop_tx
                        .send(LoopInput::StatusUpdate(info))
                        .await
                        .is_err()
                    {
                        warn!(self.log, "convergence loop input channel closed");
                    }
                }
                StatusEffect::StopLoop => {
                    if self.loop_tx.send(LoopInput::Stop).await.is_err() {
                        warn!(self.log, "convergence loop input channel closed");
                    }
                }
                StatusEffect::Disconnect => {
                    self.client = None;
                }
            }
        }
        self.state = next;
    }
}
