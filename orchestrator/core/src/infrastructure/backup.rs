// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Snapshot/backup adapter that shells out through the command runner.
//!
//! The snapshot and copy command templates come from the inventory
//! (`spec.commands.snapshot` / `spec.commands.backup_copy`) and run inside a
//! one-off container of the primary service, which carries the storage and
//! database credentials.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

use crate::domain::backup::{BackupError, BackupProvider, SnapshotRecord};
use crate::domain::command::{render_argv, run_checked, CommandError, CommandSpec, CommandRunner};
use crate::domain::inventory::{StackManifest, UpgradePlan};

pub struct ContainerBackupProvider {
    runner: Arc<dyn CommandRunner>,
    container: String,
    snapshot_template: Vec<String>,
    copy_template: Vec<String>,
}

impl ContainerBackupProvider {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        container: impl Into<String>,
        snapshot_template: Vec<String>,
        copy_template: Vec<String>,
    ) -> Self {
        Self {
            runner,
            container: container.into(),
            snapshot_template,
            copy_template,
        }
    }

    /// Commands run in the primary service's container
    pub fn from_manifest(runner: Arc<dyn CommandRunner>, manifest: &StackManifest, plan: &UpgradePlan) -> Self {
        Self::new(
            runner,
            plan.maintenance_on.container.clone(),
            manifest.spec.commands.snapshot.clone(),
            manifest.spec.commands.backup_copy.clone(),
        )
    }
}

/// Classify a failed cloud CLI call by the error code in its output
fn classify(error: CommandError, subject: &str) -> BackupError {
    let output = match &error {
        CommandError::NonZeroExit { output, .. } => output.as_str(),
        _ => return BackupError::Command(error),
    };
    if output.contains("AccessDenied") || output.contains("UnauthorizedOperation") {
        BackupError::PermissionDenied(subject.to_string())
    } else if output.contains("NotFound") || output.contains("NoSuchBucket") {
        BackupError::NotFound(subject.to_string())
    } else if output.contains("AlreadyExists") {
        BackupError::AlreadyExists(subject.to_string())
    } else if output.contains("Throttling") || output.contains("SlowDown") {
        BackupError::Throttled(subject.to_string())
    } else {
        BackupError::Command(error)
    }
}

#[async_trait]
impl BackupProvider for ContainerBackupProvider {
    async fn create_snapshot(&self, resource_id: &str, snapshot_name: &str) -> Result<SnapshotRecord, BackupError> {
        let argv = render_argv(
            &self.snapshot_template,
            &[("resource", resource_id), ("snapshot", snapshot_name)],
        );
        let spec = CommandSpec::new(self.container.clone(), argv);
        run_checked(self.runner.as_ref(), &spec)
            .await
            .map_err(|e| classify(e, snapshot_name))?;

        info!(resource = %resource_id, snapshot = %snapshot_name, "Snapshot requested");
        Ok(SnapshotRecord::new(resource_id, snapshot_name))
    }

    async fn copy_file(&self, source_path: &str, destination_uri: &str) -> Result<(), BackupError> {
        let argv = render_argv(
            &self.copy_template,
            &[("source", source_path), ("destination", destination_uri)],
        );
        let spec = CommandSpec::new(self.container.clone(), argv);
        run_checked(self.runner.as_ref(), &spec)
            .await
            .map_err(|e| classify(e, destination_uri))?;

        info!(source = %source_path, destination = %destination_uri, "File copied");
        Ok(())
    }
}
