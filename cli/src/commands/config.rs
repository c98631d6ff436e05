// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Inventory management commands
//!
//! Commands: show, validate, generate

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::PathBuf;

use upgrade_core::domain::inventory::StackManifest;

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Show current inventory
    Show {
        /// Show config file paths checked
        #[arg(long)]
        paths: bool,

        /// Print the resolved inventory as YAML
        #[arg(long)]
        yaml: bool,
    },

    /// Validate inventory file
    Validate {
        /// Path to inventory file (default: discover)
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,
    },

    /// Generate the default inventory
    Generate {
        /// Output path (default: ./nc-upgrade.yaml)
        #[arg(short, long, default_value = "./nc-upgrade.yaml")]
        output: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

pub async fn handle_command(
    command: ConfigCommand,
    config_override: Option<PathBuf>,
) -> Result<()> {
    match command {
        ConfigCommand::Show { paths, yaml } => show(config_override, paths, yaml),
        ConfigCommand::Validate { file } => validate(file.or(config_override)),
        ConfigCommand::Generate { output, force } => generate(output, force),
    }
}

fn show(config_override: Option<PathBuf>, show_paths: bool, as_yaml: bool) -> Result<()> {
    let config = StackManifest::load_or_default(config_override.clone())
        .context("Failed to load configuration")?;

    if show_paths {
        println!("{}", "Configuration discovery paths:".bold());
        if let Some(path) = &config_override {
            println!("  1. --config flag: {}", path.display());
        } else {
            println!("  1. --config flag: {}", "(not set)".dimmed());
        }
        println!(
            "  2. NC_UPGRADE_CONFIG: {}",
            std::env::var("NC_UPGRADE_CONFIG")
                .unwrap_or_else(|_| "(not set)".to_string())
                .dimmed()
        );
        println!("  3. ./nc-upgrade.yaml");
        println!("  4. ~/.nc-upgrade/config.yaml");
        println!("  5. /etc/nc-upgrade/config.yaml");
        println!();
    }

    if as_yaml {
        print!("{}", serde_yaml::to_string(&config)?);
        return Ok(());
    }

    let spec = &config.spec;
    println!("{}", "Current inventory:".bold());
    println!();

    println!("{}", "Stack:".bold());
    println!("  Name: {}", config.metadata.name);
    println!("  Cluster: {}", spec.cluster.name);
    if let Some(network) = &spec.network.docker_network {
        println!("  Network: {}", network);
    }
    println!();

    println!("{}", "Services:".bold());
    for service in &spec.services {
        println!("  {} ({})", service.name.to_string().bold(), service.role);
        println!("    Image: {}", service.image);
        println!("    Container: {}", service.container);
        let bounds = match (service.min_capacity, service.max_capacity) {
            (Some(min), Some(max)) => format!(" [{}..{}]", min, max),
            _ => String::new(),
        };
        println!("    Nominal count: {}{}", service.nominal_count, bounds);
    }
    println!();

    println!("{}", "Data:".bold());
    println!(
        "  Database: {} ({})",
        spec.database.cluster_identifier, spec.database.engine
    );
    println!("  Bucket: {}", spec.storage.bucket);
    println!("  Cache: {}", spec.cache.mode);
    println!();

    let timings = &spec.timings;
    println!("{}", "Timings:".bold());
    println!("  Drain: {:?}", timings.drain);
    println!("  Scale down: {:?}", timings.scale_down);
    println!("  Upgrade: {:?}", timings.upgrade);
    println!("  Health retry: {:?}", timings.health_retry);
    println!("  Overall timeout: {:?}", timings.overall_timeout);
    match timings.max_health_checks {
        Some(max) => println!("  Max health checks: {}", max),
        None => println!("  Max health checks: {}", "(unbounded)".dimmed()),
    }
    println!();

    Ok(())
}

fn validate(config_path: Option<PathBuf>) -> Result<()> {
    println!("Validating configuration...");

    let config = StackManifest::load_or_default(config_path)
        .context("Failed to load configuration")?;

    config
        .validate()
        .context("Configuration validation failed")?;

    println!("{}", "✓ Configuration is valid".green());

    Ok(())
}

fn generate(output: PathBuf, force: bool) -> Result<()> {
    if output.exists() && !force {
        anyhow::bail!("{} already exists (use --force to overwrite)", output.display());
    }

    StackManifest::default()
        .to_yaml_file(&output)
        .with_context(|| format!("Failed to write config to {:?}", output))?;

    println!(
        "{}",
        format!("✓ Configuration generated: {}", output.display()).green()
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_then_validate() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nc-upgrade.yaml");

        generate(path.clone(), false).unwrap();
        validate(Some(path.clone())).unwrap();

        let loaded = StackManifest::from_yaml_file(&path).unwrap();
        assert_eq!(loaded.spec.services.len(), 3);
    }

    #[test]
    fn test_generate_refuses_to_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nc-upgrade.yaml");
        std::fs::write(&path, "keep me").unwrap();

        assert!(generate(path.clone(), false).is_err());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "keep me");
    }
}
