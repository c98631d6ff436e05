// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! In-process wiring of the upgrade use case
//!
//! Builds the orchestrator against either the Docker adapters or the
//! simulated stack used by `--dry-run`.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use upgrade_core::{
    application::{
        repository_factory::create_execution_repository, StandardStartUpgradeUseCase,
        UpgradeOrchestrator,
    },
    domain::{
        backup::BackupProvider,
        command::CommandRunner,
        inventory::{StackManifest, UpgradePlan},
        repository::StorageBackend,
        service::ServiceControl,
    },
    infrastructure::{
        backup::ContainerBackupProvider,
        docker::{connect_docker, DockerCommandRunner, DockerServiceControl},
        event_bus::EventBus,
        SimulatedStack,
    },
};

/// Which facades the orchestrator drives
pub enum Backend {
    Docker,
    /// Simulated facades with the drain, scale-down and upgrade waits
    /// zeroed; simulated instances are healthy on the first poll
    DryRun,
}

pub struct UpgradeRuntime {
    pub use_case: StandardStartUpgradeUseCase,
    pub event_bus: Arc<EventBus>,
    /// Present for dry runs so the caller can print what would have happened
    pub simulation: Option<SimulatedStack>,
}

impl UpgradeRuntime {
    pub fn build(mut manifest: StackManifest, backend: Backend, state_dir: PathBuf) -> Result<Self> {
        if matches!(backend, Backend::DryRun) {
            zero_waits(&mut manifest);
        }

        let plan = UpgradePlan::from_manifest(&manifest).context("Invalid inventory")?;
        let event_bus = Arc::new(EventBus::with_default_capacity());
        // Simulated runs never enter the real history
        let storage = match backend {
            Backend::Docker => StorageBackend::Filesystem(state_dir),
            Backend::DryRun => StorageBackend::InMemory,
        };
        let repository = create_execution_repository(&storage);

        let (services, backups, commands, simulation): (
            Arc<dyn ServiceControl>,
            Arc<dyn BackupProvider>,
            Arc<dyn CommandRunner>,
            Option<SimulatedStack>,
        ) = match backend {
            Backend::Docker => {
                let docker = connect_docker(manifest.spec.network.docker_socket.as_deref())
                    .context("Failed to connect to Docker")?;
                let runner: Arc<dyn CommandRunner> =
                    Arc::new(DockerCommandRunner::new(docker.clone(), &manifest));
                let backups = Arc::new(ContainerBackupProvider::from_manifest(
                    runner.clone(),
                    &manifest,
                    &plan,
                ));
                let services = Arc::new(DockerServiceControl::new(docker, &manifest));
                (services, backups, runner, None)
            }
            Backend::DryRun => {
                let stack = SimulatedStack::new(&plan);
                (
                    stack.services.clone(),
                    stack.backups.clone(),
                    stack.commands.clone(),
                    Some(stack),
                )
            }
        };

        let orchestrator = Arc::new(UpgradeOrchestrator::new(
            plan,
            services,
            backups,
            commands,
            event_bus.clone(),
        ));
        let use_case = StandardStartUpgradeUseCase::new(orchestrator, repository, event_bus.clone());

        Ok(Self {
            use_case,
            event_bus,
            simulation,
        })
    }
}

fn zero_waits(manifest: &mut StackManifest) {
    let timings = &mut manifest.spec.timings;
    timings.drain = Duration::ZERO;
    timings.scale_down = Duration::ZERO;
    timings.upgrade = Duration::ZERO;
}

#[cfg(test)]
mod tests {
    use super::*;
    use upgrade_core::application::{StartUpgradeRequest, StartUpgradeUseCase};
    use upgrade_core::domain::execution::ExecutionStatus;
    use upgrade_core::domain::repository::ExecutionRepository;
    use upgrade_core::infrastructure::repositories::FileExecutionRepository;

    #[tokio::test]
    async fn test_dry_run_completes_without_touching_history() {
        let dir = tempfile::tempdir().unwrap();
        let runtime =
            UpgradeRuntime::build(StackManifest::default(), Backend::DryRun, dir.path().to_path_buf())
                .unwrap();

        let completed = runtime
            .use_case
            .start_upgrade(StartUpgradeRequest {
                run_name: Some("dry-1".to_string()),
            })
            .await
            .unwrap();

        assert_eq!(completed.status, ExecutionStatus::Succeeded);
        assert_eq!(completed.snapshot_name.as_deref(), Some("pre-upgrade-dry-1"));
        assert!(!dir.path().join("dry-1.json").exists());

        let stack = runtime.simulation.unwrap();
        assert_eq!(stack.journal.snapshots(), vec!["pre-upgrade-dry-1".to_string()]);
    }

    #[test]
    fn test_dry_run_keeps_health_retry_valid() {
        let mut manifest = StackManifest::default();
        zero_waits(&mut manifest);
        assert!(manifest.validate().is_ok());
        assert_eq!(manifest.spec.timings.upgrade, Duration::ZERO);
    }

    #[tokio::test]
    async fn test_same_run_name_usable_after_dry_run() {
        let dir = tempfile::tempdir().unwrap();
        let request = || StartUpgradeRequest {
            run_name: Some("release-7".to_string()),
        };

        let dry =
            UpgradeRuntime::build(StackManifest::default(), Backend::DryRun, dir.path().to_path_buf())
                .unwrap();
        dry.use_case.start_upgrade(request()).await.unwrap();

        // A second dry run with the same name is a fresh run too
        let again =
            UpgradeRuntime::build(StackManifest::default(), Backend::DryRun, dir.path().to_path_buf())
                .unwrap();
        let completed = again.use_case.start_upgrade(request()).await.unwrap();
        assert_eq!(completed.status, ExecutionStatus::Succeeded);

        let history = FileExecutionRepository::new(dir.path());
        assert!(history.list_recent(10).await.unwrap().is_empty());
    }
}
