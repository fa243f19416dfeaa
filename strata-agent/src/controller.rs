// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The channel to the controller.
//!
//! Connection lifecycle lives entirely in this module: the rest of the
//! agent only ever sees `Connected`, `StatusUpdate`, and `Disconnected`
//! inputs on the cluster-status machine.

use crate::cluster_status::StatusInput;
use async_trait::async_trait;
use backoff::backoff::Backoff;
use slog::Logger;
use std::sync::Arc;
use std::time::Duration;
use strata_common::cluster::{ClusterStatus, NodeStateReport};
use strata_common::dataset::NodeId;
use tokio::sync::{mpsc, watch};
use tokio::time::sleep;

#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    #[error("controller request failed: {0}")]
    Request(#[from] reqwest::Error),
}

/// The slice of the controller API the agent consumes.
///
/// Two messages matter: the inbound cluster status (desired configuration
/// plus last known cluster state) and the outbound node state report.
#[async_trait]
pub trait ControllerClient: Send + Sync {
    async fn cluster_status(&self) -> Result<ClusterStatus, ControllerError>;

    async fn report_node_state(
        &self,
        report: &NodeStateReport,
    ) -> Result<(), ControllerError>;
}

/// `reqwest`-backed [`ControllerClient`].
pub struct HttpControllerClient {
    client: reqwest::Client,
    base_url: String,
    node_id: NodeId,
}

impl HttpControllerClient {
    pub fn new(base_url: &str, node_id: NodeId) -> Self {
        let client = reqwest::ClientBuilder::new()
            .timeout(Duration::from_secs(15))
            .build()
            .expect("failed to build HTTP client");
        HttpControllerClient {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            node_id,
        }
    }
}

#[async_trait]
impl ControllerClient for HttpControllerClient {
    async fn cluster_status(&self) -> Result<ClusterStatus, ControllerError> {
        let url = format!("{}/v1/cluster-status", self.base_url);
        let response =
            self.client.get(&url).send().await?.error_for_status()?;
        Ok(response.json().await?)
    }

    async fn report_node_state(
        &self,
        report: &NodeStateReport,
    ) -> Result<(), ControllerError> {
        let url =
            format!("{}/v1/nodes/{}/state", self.base_url, self.node_id);
        self.client
            .post(&url)
            .json(report)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

/// Backoff policy for (re)establishing the controller channel.
fn reconnect_policy() -> backoff::ExponentialBackoff {
    backoff::ExponentialBackoff {
        initial_interval: Duration::from_millis(250),
        max_interval: Duration::from_secs(30),
        max_elapsed_time: None,
        ..Default::default()
    }
}

/// Owns the controller connection lifecycle.
///
/// Establishes the channel with exponential backoff, then polls for
/// cluster status on a fixed interval. The first successful fetch after a
/// gap emits `Connected` followed by `StatusUpdate`; the first failure
/// emits `Disconnected` and re-enters backoff.
pub struct ConnectionSupervisor {
    client: Arc<dyn ControllerClient>,
    status_tx: mpsc::Sender<StatusInput>,
    poll_interval: Duration,
    shutdown: watch::Receiver<bool>,
    log: Logger,
}

impl ConnectionSupervisor {
    pub fn new(
        client: Arc<dyn ControllerClient>,
        status_tx: mpsc::Sender<StatusInput>,
        poll_interval: Duration,
        shutdown: watch::Receiver<bool>,
        log: &Logger,
    ) -> Self {
        ConnectionSupervisor {
            client,
            status_tx,
            poll_interval,
            shutdown,
            log: log.new(o!("component" => "ConnectionSupervisor")),
        }
    }

    /// Run until shutdown. This should be spawned into a tokio task.
    pub async fn run(mut self) {
        loop {
            let Some(status) = self.establish().await else {
                return;
            };
            info!(self.log, "controller channel established");
            if self
                .send(StatusInput::Connected(self.client.clone()))
                .await
                .is_err()
            {
                return;
            }
            if self.send(StatusInput::StatusUpdate(status)).await.is_err() {
                return;
            }
            if !self.poll().await {
                return;
            }
            // Fell out of the poll loop on a failure: the machine has been
            // told, reconnect from scratch.
        }
    }

    /// Retry the initial status fetch until it succeeds or shutdown.
    async fn establish(&mut self) -> Option<ClusterStatus> {
        let mut policy = reconnect_policy();
        loop {
            if *self.shutdown.borrow() {
                return None;
            }
            match self.client.cluster_status().await {
                Ok(status) => return Some(status),
                Err(err) => {
                    let delay = policy
                        .next_backoff()
                        .unwrap_or(self.poll_interval);
                    warn!(
                        self.log,
                        "cannot reach controller; retrying";
                        "retry_after" => ?delay,
                        "error" => %err,
                    );
                    tokio::select! {
                        _ = sleep(delay) => {}
                        result = self.shutdown.changed() => {
                            if result.is_err() {
                                return None;
                            }
                        }
                    }
                }
            }
        }
    }

    /// Poll for status updates until failure (true) or shutdown (false).
    async fn poll(&mut self) -> bool {
        loop {
            tokio::select! {
                result = self.shutdown.changed() => {
                    if result.is_err() || *self.shutdown.borrow() {
                        return false;
                    }
                }
                _ = sleep(self.poll_interval) => {
                    match self.client.cluster_status().await {
                        Ok(status) => {
                            if self
                                .send(StatusInput::StatusUpdate(status))
                                .await
                                .is_err()
                            {
                                return false;
                            }
                        }
                        Err(err) => {
                            warn!(
                                self.log,
                                "controller channel lost";
                                "error" => %err,
                            );
                            return self
                                .send(StatusInput::Disconnected)
                                .await
                                .is_ok();
                        }
                    }
                }
            }
        }
    }

    async fn send(
        &self,
        input: StatusInput,
    ) -> Result<(), mpsc::error::SendError<StatusInput>> {
        self.status_tx.send(input).await
    }
}
