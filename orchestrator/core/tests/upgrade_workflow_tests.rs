// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! End-to-end tests of the upgrade workflow against the in-memory facades.
//!
//! Runs use a paused tokio clock, so the fixed waits (30 s drain, 60 s
//! scale-down, 180 s upgrade, 60 s health retry) elapse instantly and the
//! virtual elapsed time can be asserted exactly.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use upgrade_core::application::{
    StandardStartUpgradeUseCase, StartUpgradeRequest, StartUpgradeUseCase, UpgradeOrchestrator,
};
use upgrade_core::domain::backup::BackupError;
use upgrade_core::domain::command::CommandError;
use upgrade_core::domain::events::UpgradeEvent;
use upgrade_core::domain::execution::{ExecutionStatus, HistoryEventKind, RunId, UpgradeExecution};
use upgrade_core::domain::inventory::{StackManifest, UpgradePlan};
use upgrade_core::domain::repository::ExecutionRepository;
use upgrade_core::domain::service::{ServiceControlError, ServiceName};
use upgrade_core::domain::workflow::{UpgradeState, FAILURE_CAUSE};
use upgrade_core::infrastructure::event_bus::EventBus;
use upgrade_core::infrastructure::repositories::InMemoryExecutionRepository;
use upgrade_core::infrastructure::{JournalEntry, SimulatedStack};

const PRIMARY: &str = "nextcloud-aio-nextcloud";
const WEB: &str = "nextcloud-aio-apache";
const NOTIFY: &str = "nextcloud-aio-notify-push";

struct Harness {
    stack: SimulatedStack,
    repository: Arc<InMemoryExecutionRepository>,
    event_bus: Arc<EventBus>,
    use_case: StandardStartUpgradeUseCase,
}

impl Harness {
    fn new() -> Self {
        Self::with_manifest(StackManifest::default())
    }

    fn with_manifest(manifest: StackManifest) -> Self {
        let plan = UpgradePlan::from_manifest(&manifest).unwrap();
        let stack = SimulatedStack::new(&plan);
        let event_bus = Arc::new(EventBus::new(1024));
        let repository = Arc::new(InMemoryExecutionRepository::new());
        let orchestrator = Arc::new(UpgradeOrchestrator::new(
            plan,
            stack.services.clone(),
            stack.backups.clone(),
            stack.commands.clone(),
            event_bus.clone(),
        ));
        let use_case =
            StandardStartUpgradeUseCase::new(orchestrator, repository.clone(), event_bus.clone());
        Self {
            stack,
            repository,
            event_bus,
            use_case,
        }
    }

    async fn run(&self, name: &str) -> upgrade_core::application::CompletedUpgrade {
        self.use_case
            .start_upgrade(StartUpgradeRequest {
                run_name: Some(name.to_string()),
            })
            .await
            .unwrap()
    }

    async fn execution(&self, name: &str) -> UpgradeExecution {
        self.repository
            .find_by_run_id(&RunId::new(name).unwrap())
            .await
            .unwrap()
            .unwrap()
    }

    fn final_counts(&self) -> HashMap<&'static str, u32> {
        [PRIMARY, WEB, NOTIFY]
            .into_iter()
            .map(|s| (s, self.stack.services.desired(&service(s)).unwrap_or(0)))
            .collect()
    }

    fn maintenance_commands(&self) -> Vec<String> {
        self.stack
            .journal
            .commands()
            .iter()
            .map(|c| c.argv.last().cloned().unwrap_or_default())
            .collect()
    }

    /// Rollback ordering: maintenance-off strictly after the last count change
    fn assert_restored_then_maintenance_off(&self) {
        assert_eq!(self.final_counts(), nominal());
        let last_scale = self
            .stack
            .journal
            .last_position(|e| matches!(e, JournalEntry::DesiredCount { .. }))
            .unwrap();
        let off = self
            .stack
            .journal
            .position(|e| matches!(e, JournalEntry::Command(c) if c.argv.last().map(String::as_str) == Some("--off")))
            .expect("maintenance off was not run");
        assert!(off > last_scale, "maintenance off ran before services were restored");
    }
}

fn service(name: &str) -> ServiceName {
    ServiceName::new(name).unwrap()
}

fn nominal() -> HashMap<&'static str, u32> {
    HashMap::from([(PRIMARY, 2), (WEB, 2), (NOTIFY, 1)])
}

fn has_event<F>(execution: &UpgradeExecution, predicate: F) -> bool
where
    F: Fn(&HistoryEventKind) -> bool,
{
    execution.history().iter().any(|e| predicate(&e.kind))
}

#[tokio::test(start_paused = true)]
async fn test_run_42_succeeds_after_one_failed_health_check() {
    let harness = Harness::new();
    harness.stack.services.script_running(&service(PRIMARY), [0, 1]);

    let started = tokio::time::Instant::now();
    let result = harness.run("run-42").await;

    assert_eq!(result.status, ExecutionStatus::Succeeded);
    assert!(result.cause.is_none());
    assert_eq!(result.snapshot_name.as_deref(), Some("pre-upgrade-run-42"));
    // 30 s drain + 60 s scale-down + 180 s upgrade + one 60 s retry
    assert_eq!(started.elapsed(), Duration::from_secs(330));

    let execution = harness.execution("run-42").await;
    use UpgradeState::*;
    assert_eq!(
        execution.visited_states(),
        vec![
            ExtractRunId,
            MaintenanceOn,
            WaitDrain,
            ScaleDownAll,
            WaitScaleDown,
            CreateSnapshot,
            BackupConfig,
            ScaleUpPrimaryOne,
            WaitUpgrade,
            CheckHealth,
            HealthDecision,
            WaitRetryHealth,
            CheckHealth,
            HealthDecision,
            ScaleUpAll,
            Success,
        ]
    );

    let counts = harness.stack.journal.desired_counts();
    let mut scale_down: Vec<_> = counts[..3].to_vec();
    scale_down.sort();
    assert_eq!(
        scale_down,
        vec![
            (WEB.to_string(), 0),
            (PRIMARY.to_string(), 0),
            (NOTIFY.to_string(), 0)
        ]
    );
    assert_eq!(counts[3], (PRIMARY.to_string(), 1));
    assert_eq!(counts.len(), 7);
    assert_eq!(harness.final_counts(), nominal());

    // Maintenance mode is only turned off by the rollback branch
    assert_eq!(harness.maintenance_commands(), vec!["--on"]);
    assert_eq!(harness.stack.journal.snapshots(), vec!["pre-upgrade-run-42"]);

    let copy = harness
        .stack
        .journal
        .entries()
        .into_iter()
        .find_map(|e| match e {
            JournalEntry::Copy { source, destination } => Some((source, destination)),
            _ => None,
        })
        .unwrap();
    assert_eq!(copy.0, "/var/www/html/config/config.php");
    let suffix = copy
        .1
        .strip_prefix("s3://nextcloud-aio-data/backups/config.php.")
        .unwrap();
    assert_eq!(suffix.len(), 14);
    assert!(suffix.chars().all(|c| c.is_ascii_digit()));
}

#[tokio::test(start_paused = true)]
async fn test_healthy_first_check_proceeds_without_retry_wait() {
    let harness = Harness::new();

    let started = tokio::time::Instant::now();
    let result = harness.run("run-1").await;

    assert!(result.is_success());
    assert_eq!(started.elapsed(), Duration::from_secs(270));
    let execution = harness.execution("run-1").await;
    assert!(!execution.visited_states().contains(&UpgradeState::WaitRetryHealth));
}

#[tokio::test(start_paused = true)]
async fn test_scale_fan_outs_run_concurrently() {
    let harness = Harness::new();
    harness.stack.services.set_scale_delay(Duration::from_secs(10));

    let started = tokio::time::Instant::now();
    let result = harness.run("run-fan-out").await;

    assert!(result.is_success());
    // 270 s of waits + one 10 s delay each for ScaleDownAll,
    // ScaleUpPrimaryOne and ScaleUpAll; one call at a time would take 340 s
    assert_eq!(started.elapsed(), Duration::from_secs(300));
    assert_eq!(harness.final_counts(), nominal());
}

#[tokio::test(start_paused = true)]
async fn test_rollback_restore_runs_concurrently() {
    let harness = Harness::new();
    harness.stack.services.set_scale_delay(Duration::from_secs(10));
    harness
        .stack
        .backups
        .fail_snapshot(BackupError::PermissionDenied("CreateDBClusterSnapshot".to_string()));

    let started = tokio::time::Instant::now();
    let result = harness.run("run-restore").await;

    assert_eq!(result.failed_state, Some(UpgradeState::CreateSnapshot));
    // 30 s drain + 10 s scale-down + 60 s wait + 10 s restore
    assert_eq!(started.elapsed(), Duration::from_secs(110));
    harness.assert_restored_then_maintenance_off();
}

#[tokio::test(start_paused = true)]
async fn test_execution_is_stored_at_each_state_entry() {
    let harness = Arc::new(Harness::new());
    let runner = harness.clone();
    let handle = tokio::spawn(async move { runner.run("run-progress").await });

    // Drain ends at 30 s, the scale-down wait at 90 s
    tokio::time::sleep(Duration::from_secs(60)).await;
    let stored = harness.execution("run-progress").await;
    assert_eq!(stored.status, ExecutionStatus::Running);
    assert_eq!(stored.current_state, UpgradeState::WaitScaleDown);
    assert!(has_event(&stored, |k| matches!(
        k,
        HistoryEventKind::StepSucceeded { state: UpgradeState::ScaleDownAll }
    )));

    let result = handle.await.unwrap();
    assert!(result.is_success());
    let stored = harness.execution("run-progress").await;
    assert_eq!(stored.status, ExecutionStatus::Succeeded);
}

#[tokio::test(start_paused = true)]
async fn test_rollback_is_stored_before_restore_completes() {
    let harness = Arc::new(Harness::new());
    harness.stack.services.set_scale_delay(Duration::from_secs(10));
    harness
        .stack
        .backups
        .fail_snapshot(BackupError::PermissionDenied("CreateDBClusterSnapshot".to_string()));
    let runner = harness.clone();
    let handle = tokio::spawn(async move { runner.run("run-midway").await });

    // The snapshot fails at 100 s; the restore finishes at 110 s
    tokio::time::sleep(Duration::from_secs(105)).await;
    let stored = harness.execution("run-midway").await;
    assert_eq!(stored.status, ExecutionStatus::Running);
    assert_eq!(stored.current_state, UpgradeState::Failed);
    assert_eq!(
        stored.failure.as_ref().map(|f| f.state),
        Some(UpgradeState::CreateSnapshot)
    );
    assert!(!has_event(&stored, |k| matches!(k, HistoryEventKind::RollbackCompleted)));

    let result = handle.await.unwrap();
    assert_eq!(result.status, ExecutionStatus::Failed);
    let stored = harness.execution("run-midway").await;
    assert!(has_event(&stored, |k| matches!(k, HistoryEventKind::RollbackCompleted)));
}

#[tokio::test(start_paused = true)]
async fn test_run_42_snapshot_permission_error_rolls_back() {
    let harness = Harness::new();
    harness
        .stack
        .backups
        .fail_snapshot(BackupError::PermissionDenied("CreateDBClusterSnapshot".to_string()));

    let result = harness.run("run-42").await;

    assert_eq!(result.status, ExecutionStatus::Failed);
    assert_eq!(
        result.cause.as_deref(),
        Some("Upgrade failed. Services rolled back to previous state.")
    );
    assert_eq!(result.failed_state, Some(UpgradeState::CreateSnapshot));
    assert!(result.snapshot_name.is_none());
    harness.assert_restored_then_maintenance_off();
    assert_eq!(harness.maintenance_commands(), vec!["--on", "--off"]);

    let execution = harness.execution("run-42").await;
    assert!(has_event(&execution, |k| matches!(
        k,
        HistoryEventKind::StepFailed { state: UpgradeState::CreateSnapshot, error } if error.contains("Permission denied")
    )));
    assert!(has_event(&execution, |k| matches!(k, HistoryEventKind::RollbackCompleted)));
    // No backup after the failed snapshot
    assert!(!execution.visited_states().contains(&UpgradeState::BackupConfig));
}

#[tokio::test(start_paused = true)]
async fn test_injected_failures_restore_nominal_counts_before_maintenance_off() {
    type Inject = fn(&SimulatedStack);
    let scenarios: [(UpgradeState, Inject); 9] = [
        (UpgradeState::MaintenanceOn, |s: &SimulatedStack| {
            s.commands.fail_matching(
                "--on",
                CommandError::NonZeroExit {
                    code: 1,
                    output: "Nextcloud is not installed".to_string(),
                },
            )
        }),
        (UpgradeState::ScaleDownAll, |s: &SimulatedStack| {
            s.services
                .fail_scale(&service(PRIMARY), Some(0), ServiceControlError::Throttled("rate exceeded".to_string()))
        }),
        (UpgradeState::ScaleDownAll, |s: &SimulatedStack| {
            s.services
                .fail_scale(&service(WEB), Some(0), ServiceControlError::NotFound(WEB.to_string()))
        }),
        (UpgradeState::ScaleDownAll, |s: &SimulatedStack| {
            s.services.fail_scale(
                &service(NOTIFY),
                Some(0),
                ServiceControlError::PermissionDenied("UpdateService".to_string()),
            )
        }),
        (UpgradeState::CreateSnapshot, |s: &SimulatedStack| {
            s.backups.fail_snapshot(BackupError::NotFound("nextcloud-aio-db".to_string()))
        }),
        (UpgradeState::BackupConfig, |s: &SimulatedStack| {
            s.backups.fail_copy(BackupError::Command(CommandError::NonZeroExit {
                code: 1,
                output: "upload failed".to_string(),
            }))
        }),
        (UpgradeState::ScaleUpPrimaryOne, |s: &SimulatedStack| {
            s.services
                .fail_scale(&service(PRIMARY), Some(1), ServiceControlError::Engine("capacity".to_string()))
        }),
        (UpgradeState::CheckHealth, |s: &SimulatedStack| {
            s.services
                .fail_running_count(&service(PRIMARY), ServiceControlError::Throttled("rate exceeded".to_string()))
        }),
        (UpgradeState::ScaleUpAll, |s: &SimulatedStack| {
            s.services
                .fail_scale_once(&service(WEB), Some(2), ServiceControlError::Engine("conflict".to_string()))
        }),
    ];

    for (expected_state, inject) in scenarios {
        let harness = Harness::new();
        inject(&harness.stack);

        let result = harness.run("run-9").await;

        assert_eq!(result.status, ExecutionStatus::Failed, "{}", expected_state);
        assert_eq!(result.cause.as_deref(), Some(FAILURE_CAUSE), "{}", expected_state);
        assert_eq!(result.failed_state, Some(expected_state));
        harness.assert_restored_then_maintenance_off();

        let execution = harness.execution("run-9").await;
        assert!(has_event(&execution, |k| matches!(k, HistoryEventKind::RollbackCompleted)));
        assert_eq!(execution.visited_states().last(), Some(&UpgradeState::Failed));
    }
}

#[tokio::test(start_paused = true)]
async fn test_failed_restore_leaves_maintenance_on() {
    let harness = Harness::new();
    harness
        .stack
        .services
        .fail_scale(&service(WEB), Some(2), ServiceControlError::Throttled("rate exceeded".to_string()));

    let result = harness.run("run-3").await;

    assert_eq!(result.status, ExecutionStatus::Failed);
    assert_eq!(result.cause.as_deref(), Some(FAILURE_CAUSE));
    assert_eq!(result.failed_state, Some(UpgradeState::ScaleUpAll));
    assert_eq!(harness.maintenance_commands(), vec!["--on"]);

    let execution = harness.execution("run-3").await;
    assert!(has_event(&execution, |k| matches!(
        k,
        HistoryEventKind::RollbackStepFailed { step, .. } if step == "RollbackScaleUp"
    )));
    assert!(!has_event(&execution, |k| matches!(k, HistoryEventKind::RollbackCompleted)));
}

#[tokio::test(start_paused = true)]
async fn test_maintenance_off_failure_still_reports_fixed_cause() {
    let harness = Harness::new();
    harness
        .stack
        .backups
        .fail_copy(BackupError::Throttled("SlowDown".to_string()));
    harness.stack.commands.fail_matching(
        "--off",
        CommandError::NonZeroExit {
            code: 1,
            output: "maintenance off failed".to_string(),
        },
    );

    let result = harness.run("run-4").await;

    assert_eq!(result.status, ExecutionStatus::Failed);
    assert_eq!(result.cause.as_deref(), Some(FAILURE_CAUSE));
    assert_eq!(harness.final_counts(), nominal());
    let execution = harness.execution("run-4").await;
    assert!(has_event(&execution, |k| matches!(
        k,
        HistoryEventKind::RollbackStepFailed { step, .. } if step == "MaintenanceOff"
    )));
}

#[tokio::test(start_paused = true)]
async fn test_overall_timeout_abandons_run_without_rollback() {
    let mut manifest = StackManifest::default();
    manifest.spec.timings.overall_timeout = Duration::from_secs(600);
    let harness = Harness::with_manifest(manifest);
    harness
        .stack
        .services
        .script_running(&service(PRIMARY), std::iter::repeat(0).take(100));
    let mut events = harness.event_bus.subscribe_run(RunId::new("run-5").unwrap());

    let started = tokio::time::Instant::now();
    let result = harness.run("run-5").await;

    assert_eq!(result.status, ExecutionStatus::TimedOut);
    assert!(result.cause.is_none());
    assert_eq!(started.elapsed(), Duration::from_secs(600));
    // No compensating actions: primary stays at 1, maintenance stays on
    assert_eq!(harness.stack.services.desired(&service(PRIMARY)), Some(1));
    assert_eq!(harness.maintenance_commands(), vec!["--on"]);

    let execution = harness.execution("run-5").await;
    assert!(matches!(
        execution.history().last().map(|e| &e.kind),
        Some(HistoryEventKind::Terminated { status: ExecutionStatus::TimedOut })
    ));

    let mut last = None;
    while let Ok(event) = events.recv().await {
        let terminal = event.is_terminal();
        last = Some(event);
        if terminal {
            break;
        }
    }
    assert!(matches!(last, Some(UpgradeEvent::UpgradeTimedOut { .. })));
}

#[tokio::test(start_paused = true)]
async fn test_max_health_checks_exhaustion_takes_rollback_path() {
    let mut manifest = StackManifest::default();
    manifest.spec.timings.max_health_checks = Some(3);
    let harness = Harness::with_manifest(manifest);
    harness
        .stack
        .services
        .script_running(&service(PRIMARY), std::iter::repeat(0).take(10));

    let started = tokio::time::Instant::now();
    let result = harness.run("run-6").await;

    assert_eq!(result.status, ExecutionStatus::Failed);
    assert_eq!(result.failed_state, Some(UpgradeState::HealthDecision));
    // Three polls, two retry waits between them
    assert_eq!(started.elapsed(), Duration::from_secs(270 + 2 * 60));
    let polls = harness
        .stack
        .journal
        .entries()
        .iter()
        .filter(|e| matches!(e, JournalEntry::RunningCount { .. }))
        .count();
    assert_eq!(polls, 3);
    harness.assert_restored_then_maintenance_off();
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_run_id_is_rejected() {
    let harness = Harness::new();
    harness.run("run-7").await;

    let err = harness
        .use_case
        .start_upgrade(StartUpgradeRequest {
            run_name: Some("run-7".to_string()),
        })
        .await
        .unwrap_err();

    assert!(err.to_string().contains("already exists"));
    assert_eq!(harness.stack.journal.snapshots(), vec!["pre-upgrade-run-7"]);
}

#[tokio::test(start_paused = true)]
async fn test_invalid_run_name_is_rejected_before_any_step() {
    let harness = Harness::new();
    let err = harness
        .use_case
        .start_upgrade(StartUpgradeRequest {
            run_name: Some("run 42".to_string()),
        })
        .await
        .unwrap_err();

    assert!(err.to_string().contains("Invalid run name"));
    assert!(harness.stack.journal.entries().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_generated_run_id_names_the_snapshot() {
    let harness = Harness::new();
    let result = harness
        .use_case
        .start_upgrade(StartUpgradeRequest::default())
        .await
        .unwrap();

    let expected = format!("pre-upgrade-{}", result.run_id);
    assert_eq!(result.snapshot_name, Some(expected.clone()));
    assert_eq!(harness.stack.journal.snapshots(), vec![expected]);
}

#[tokio::test(start_paused = true)]
async fn test_event_stream_for_successful_run() {
    let harness = Harness::new();
    let mut events = harness.event_bus.subscribe_run(RunId::new("run-8").unwrap());

    harness.run("run-8").await;

    let mut received = Vec::new();
    loop {
        let event = events.recv().await.unwrap();
        let terminal = event.is_terminal();
        received.push(event);
        if terminal {
            break;
        }
    }

    assert!(matches!(received.first(), Some(UpgradeEvent::UpgradeStarted { .. })));
    assert!(matches!(received.last(), Some(UpgradeEvent::UpgradeSucceeded { .. })));
    assert!(received.iter().any(|e| matches!(
        e,
        UpgradeEvent::SnapshotCreated { snapshot_name, .. } if snapshot_name == "pre-upgrade-run-8"
    )));
    let scaled: Vec<_> = received
        .iter()
        .filter_map(|e| match e {
            UpgradeEvent::ServicesScaled { state, .. } => Some(*state),
            _ => None,
        })
        .collect();
    assert_eq!(
        scaled,
        vec![
            UpgradeState::ScaleDownAll,
            UpgradeState::ScaleUpPrimaryOne,
            UpgradeState::ScaleUpAll
        ]
    );
}
