// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! `nc-upgrade services` - desired and running counts per inventory service

use anyhow::{Context, Result};
use colored::Colorize;
use std::path::PathBuf;

use upgrade_core::{
    domain::{inventory::StackManifest, service::ServiceControl},
    infrastructure::docker::{connect_docker, DockerServiceControl},
};

pub async fn execute(config: Option<PathBuf>) -> Result<()> {
    let manifest = StackManifest::load_or_default(config).context("Failed to load inventory")?;
    let docker = connect_docker(manifest.spec.network.docker_socket.as_deref())
        .context("Failed to connect to Docker")?;
    let control = DockerServiceControl::new(docker, &manifest);

    println!(
        "{:<28} {:<8} {:>7} {:>8} {:>7}",
        "SERVICE", "ROLE", "NOMINAL", "DESIRED", "RUNNING"
    );
    for service in &manifest.spec.services {
        let desired = control
            .desired_count(&service.name)
            .await
            .with_context(|| format!("Failed to describe {}", service.name))?
            .map(|n| n.to_string())
            .unwrap_or_else(|| "-".to_string());
        let running = control
            .running_count(&service.name)
            .await
            .with_context(|| format!("Failed to describe {}", service.name))?;

        let running_label = format!("{:>7}", running);
        let running_label = if running >= service.nominal_count {
            running_label.green()
        } else if running > 0 {
            running_label.yellow()
        } else {
            running_label.red()
        };
        println!(
            "{:<28} {:<8} {:>7} {:>8} {}",
            service.name.to_string(),
            service.role.to_string(),
            service.nominal_count,
            desired,
            running_label
        );
    }
    Ok(())
}
