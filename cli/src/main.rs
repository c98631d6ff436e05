// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # Nextcloud Upgrade CLI
//!
//! The `nc-upgrade` binary triggers and inspects upgrade runs of a
//! Nextcloud AIO stack.
//!
//! ## Commands
//!
//! - `nc-upgrade run` - Drain, snapshot, back up, redeploy and health-check
//! - `nc-upgrade describe` - Print the workflow state graph
//! - `nc-upgrade history` - List runs or show one run's history
//! - `nc-upgrade services` - Desired/running counts of inventory services
//! - `nc-upgrade config show|validate|generate` - Inventory management
//! - `nc-upgrade cache-config` - Render the cache backend configuration

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing::info;

use nextcloud_upgrade::commands::{self, ConfigCommand, DescribeArgs, HistoryArgs, RunArgs};

/// Nextcloud Upgrade - zero-surprise upgrades for Nextcloud AIO stacks
#[derive(Parser)]
#[command(name = "nc-upgrade")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to inventory file (overrides discovery)
    #[arg(
        short,
        long,
        global = true,
        env = "NC_UPGRADE_CONFIG",
        value_name = "FILE"
    )]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "NC_UPGRADE_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Directory holding execution history (default: ~/.nc-upgrade/history)
    #[arg(long, global = true, env = "NC_UPGRADE_STATE_DIR", value_name = "DIR")]
    state_dir: Option<PathBuf>,

    /// Expose Prometheus metrics on this port
    #[arg(long, global = true, env = "NC_UPGRADE_METRICS_PORT", value_name = "PORT")]
    metrics_port: Option<u16>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start an upgrade run
    #[command(name = "run")]
    Run(RunArgs),

    /// Print the workflow state graph
    #[command(name = "describe")]
    Describe(DescribeArgs),

    /// Show execution history
    #[command(name = "history")]
    History(HistoryArgs),

    /// Show desired and running counts of inventory services
    #[command(name = "services")]
    Services,

    /// Inventory management
    #[command(name = "config")]
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },

    /// Render the cache backend configuration from the environment
    #[command(name = "cache-config")]
    CacheConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env is fine
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    init_logging(&cli.log_level)?;

    if let Some(port) = cli.metrics_port {
        init_metrics(port)?;
    }

    let state_dir = commands::resolve_state_dir(cli.state_dir);

    match cli.command {
        Some(Commands::Run(args)) => {
            let code = commands::run::execute(args, cli.config, state_dir).await?;
            if code != 0 {
                std::process::exit(code);
            }
            Ok(())
        }
        Some(Commands::Describe(args)) => commands::describe::execute(args),
        Some(Commands::History(args)) => commands::history::execute(args, state_dir).await,
        Some(Commands::Services) => commands::services::execute(cli.config).await,
        Some(Commands::Config { command }) => {
            commands::config::handle_command(command, cli.config).await
        }
        Some(Commands::CacheConfig) => commands::cache::execute(),
        None => {
            // No command provided - show help
            eprintln!("{}", "No command specified. Use --help for usage.".yellow());
            std::process::exit(1);
        }
    }
}

/// Initialize tracing subscriber for logging
fn init_logging(level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .context("Failed to create log filter")?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .init();

    Ok(())
}

/// Install the Prometheus recorder with its HTTP listener
fn init_metrics(port: u16) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("Failed to install Prometheus exporter")?;
    info!(%addr, "Metrics exporter listening");
    Ok(())
}
