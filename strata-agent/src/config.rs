// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Interfaces for working with node agent configuration.

use camino::{Utf8Path, Utf8PathBuf};
use serde::Deserialize;
use strata_common::dataset::NodeId;

/// Configuration for a node agent.
#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    /// Stable identity of this node. Generated at startup when absent.
    pub node_id: Option<NodeId>,
    /// Hostname reported to the controller.
    pub hostname: String,
    /// Base URL of the controller API.
    pub controller_url: String,
    /// Root under which dataset filesystems are mounted.
    #[serde(default = "default_mount_root")]
    pub mount_root: Utf8PathBuf,
    #[serde(default)]
    pub convergence: ConvergenceConfig,
    #[serde(default)]
    pub controller: ControllerConfig,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ConvergenceConfig {
    /// Delay between the end of one iteration and the start of the next,
    /// in milliseconds. Also the pacing that lets eventually-consistent
    /// backends catch up between cycles; tune it per backend.
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    /// Upper bound on concurrently running dataset actions.
    #[serde(default = "default_action_parallelism")]
    pub action_parallelism: usize,
}

impl Default for ConvergenceConfig {
    fn default() -> Self {
        ConvergenceConfig {
            interval_ms: default_interval_ms(),
            action_parallelism: default_action_parallelism(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct ControllerConfig {
    /// Interval between cluster status polls, in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        ControllerConfig { poll_interval_ms: default_poll_interval_ms() }
    }
}

fn default_mount_root() -> Utf8PathBuf {
    Utf8PathBuf::from("/var/lib/strata/mounts")
}

fn default_interval_ms() -> u64 {
    3000
}

fn default_action_parallelism() -> usize {
    16
}

fn default_poll_interval_ms() -> u64 {
    5000
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config from {path}: {err}")]
    Io {
        path: Utf8PathBuf,
        #[source]
        err: std::io::Error,
    },
    #[error("failed to parse config from {path}: {err}")]
    Parse {
        path: Utf8PathBuf,
        #[source]
        err: toml::de::Error,
    },
}

impl Config {
    pub fn from_file(path: &Utf8Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|err| ConfigError::Io { path: path.into(), err })?;
        let config = toml::from_str(&contents)
            .map_err(|err| ConfigError::Parse { path: path.into(), err })?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            hostname = "node-a"
            controller_url = "http://controller.internal:8600"
            "#,
        )
        .unwrap();
        assert!(config.node_id.is_none());
        assert_eq!(config.mount_root, default_mount_root());
        assert_eq!(config.convergence.interval_ms, default_interval_ms());
        assert_eq!(
            config.convergence.action_parallelism,
            default_action_parallelism()
        );
        assert_eq!(
            config.controller.poll_interval_ms,
            default_poll_interval_ms()
        );
    }

    #[test]
    fn full_config_parses() {
        let config: Config = toml::from_str(
            r#"
            node_id = "5c9f5ab0-8b3c-4a93-8c78-cb74280b8f67"
            hostname = "node-a"
            controller_url = "https://controller.internal:8600"
            mount_root = "/srv/strata"

            [convergence]
            interval_ms = 500
            action_parallelism = 4

            [controller]
            poll_interval_ms = 1000
            "#,
        )
        .unwrap();
        assert!(config.node_id.is_some());
        assert_eq!(config.convergence.action_parallelism, 4);
        assert_eq!(config.controller.poll_interval_ms, 1000);
    }
}
