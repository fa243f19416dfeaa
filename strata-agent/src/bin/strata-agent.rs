// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Executable program to run the strata node agent.

use anyhow::{anyhow, Context};
use camino::Utf8PathBuf;
use clap::Parser;
use slog::Drain;
use slog::Level;
use slog::LevelFilter;
use slog::Logger;
use slog_term::FullFormat;
use slog_term::TermDecorator;
use std::sync::Arc;
use strata_agent::agent::Agent;
use strata_agent::config::Config;
use strata_agent::controller::HttpControllerClient;
use strata_common::dataset::NodeId;
use strata_storage::sim::new_sim_storage;

fn parse_log_level(s: &str) -> anyhow::Result<Level> {
    s.parse().map_err(|_| anyhow!("invalid log level"))
}

/// Runs the strata node storage agent.
#[derive(Debug, Parser)]
#[command(name = "strata-agent")]
struct Cli {
    /// Path to the agent configuration file.
    config_path: Utf8PathBuf,

    /// The minimum level for log messages.
    #[arg(long, value_parser = parse_log_level, default_value_t = Level::Info)]
    log_level: Level,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Cli::parse();
    let config = Config::from_file(&args.config_path)
        .context("loading configuration")?;

    let decorator = TermDecorator::new().build();
    let drain = FullFormat::new(decorator).build().fuse();
    let drain = slog_async::Async::new(drain).build().fuse();
    let drain = LevelFilter::new(drain, args.log_level).fuse();
    let log = Logger::root(drain, slog::o!("unit" => "strata-agent"));

    let node_id = match config.node_id {
        Some(node_id) => node_id,
        None => {
            let node_id = NodeId::new_v4();
            slog::info!(log, "generated node identity"; "node_id" => %node_id);
            node_id
        }
    };

    let (backend, mounter) = new_sim_storage(&log);
    let client = Arc::new(HttpControllerClient::new(
        &config.controller_url,
        node_id,
    ));
    let agent = Agent::start(
        &config,
        node_id,
        Arc::new(backend),
        Arc::new(mounter),
        client,
        &log,
    );

    tokio::signal::ctrl_c().await.context("waiting for interrupt")?;
    slog::info!(log, "interrupt received; shutting down");
    agent.shutdown().await;
    Ok(())
}
