//! fleetd: the FleetGrid group controller daemon.
//!
//! # Usage
//!
//! ```text
//! fleetd --config fleetd.toml check specs/workers.json
//! fleetd simulate specs/workers.json --then specs/workers-v2.json --resize 5
//! ```

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use fleet_core::config::LogConfig;
use fleet_core::{DaemonConfig, HumanDuration};

mod commands;

#[derive(Parser)]
#[command(name = "fleetd", about = "FleetGrid group controller", version)]
struct Cli {
    /// Daemon configuration file (TOML).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log output format: text or json. Overrides the config file.
    #[arg(long, global = true)]
    log_format: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Validate a group document and print the plan for committing it.
    Check {
        /// Group document (JSON).
        spec: PathBuf,
    },
    /// Run the controller against in-memory plugins.
    Simulate {
        /// Group document (JSON).
        spec: PathBuf,

        /// Updated document to commit after the first one converges.
        #[arg(long)]
        then: Option<PathBuf>,

        /// Resize the group once it has converged.
        #[arg(long)]
        resize: Option<u32>,

        /// Give up if a step does not converge within this long.
        #[arg(long, default_value = "30s")]
        timeout: HumanDuration,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => DaemonConfig::from_file(path)?,
        None => DaemonConfig::default(),
    };
    init_tracing(&config.log, cli.log_format.as_deref());
    let options = &config.controller;

    match cli.command {
        Command::Check { spec } => {
            println!("{}", commands::check(&spec, options).await?);
        }
        Command::Simulate {
            spec,
            then,
            resize,
            timeout,
        } => {
            let run = commands::Simulation {
                spec: &spec,
                then: then.as_deref(),
                resize,
                timeout: timeout.as_duration(),
            };
            let described = commands::simulate(run, options).await?;
            println!("{}", serde_json::to_string_pretty(&described)?);
        }
    }
    Ok(())
}

/// Logs go to stderr; stdout carries plans and descriptions.
fn init_tracing(log: &LogConfig, format: Option<&str>) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log.filter));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    match format.unwrap_or(log.format.as_str()) {
        "json" => builder.json().init(),
        _ => builder.init(),
    }
}
