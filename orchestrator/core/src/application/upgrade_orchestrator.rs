// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Upgrade Orchestrator
//!
//! Drives one [`UpgradeExecution`] through the upgrade state machine.
//!
//! # DDD Pattern: Application Service
//!
//! - **Layer:** Application
//! - **Responsibility:** Run the fixed step sequence, the health retry loop
//!   and the single compensating branch
//! - **Collaborators:**
//!   - Domain: `UpgradeState`, `UpgradeExecution`, `UpgradePlan`
//!   - Facades: `ServiceControl`, `BackupProvider`, `CommandRunner`
//!   - Infrastructure: `EventBus`
//!
//! Every step error is erased into a [`StepFailure`] and handed to
//! [`UpgradeOrchestrator::rollback`]; no step recovers locally. The overall
//! timeout is applied by the caller around [`UpgradeOrchestrator::run`].
//!
//! The execution is checkpointed to the repository on every state entry and
//! after the rollback restore, so an interrupted process leaves the last
//! state reached in history.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::future::try_join_all;
use tracing::{debug, error, info, warn};

use crate::domain::backup::{backup_destination, BackupProvider, SnapshotRecord};
use crate::domain::command::{run_checked, CommandRunner};
use crate::domain::events::UpgradeEvent;
use crate::domain::execution::{HistoryEventKind, RunId, UpgradeExecution};
use crate::domain::inventory::UpgradePlan;
use crate::domain::repository::ExecutionRepository;
use crate::domain::service::{HealthObservation, ServiceControl, ServiceControlError, ServiceRef};
use crate::domain::workflow::{HealthVerdict, StepFailure, UpgradeOutcome, UpgradeState};
use crate::infrastructure::event_bus::EventBus;

const ROLLBACK_SCALE_UP: &str = "RollbackScaleUp";
const MAINTENANCE_OFF: &str = "MaintenanceOff";

/// Health poll bookkeeping carried across CheckHealth/HealthDecision.
#[derive(Debug, Default)]
struct HealthPoll {
    last: Option<HealthObservation>,
    checks: u32,
}

pub struct UpgradeOrchestrator {
    plan: UpgradePlan,
    services: Arc<dyn ServiceControl>,
    backups: Arc<dyn BackupProvider>,
    commands: Arc<dyn CommandRunner>,
    event_bus: Arc<EventBus>,
}

impl UpgradeOrchestrator {
    pub fn new(
        plan: UpgradePlan,
        services: Arc<dyn ServiceControl>,
        backups: Arc<dyn BackupProvider>,
        commands: Arc<dyn CommandRunner>,
        event_bus: Arc<EventBus>,
    ) -> Self {
        Self {
            plan,
            services,
            backups,
            commands,
            event_bus,
        }
    }

    pub fn plan(&self) -> &UpgradePlan {
        &self.plan
    }

    /// Run the state machine to a terminal state.
    ///
    /// `execution` is borrowed mutably so that a caller-side timeout which
    /// drops this future still keeps the history recorded so far.
    pub async fn run(
        &self,
        execution: &mut UpgradeExecution,
        checkpoints: &dyn ExecutionRepository,
    ) -> UpgradeOutcome {
        let run_id = execution.run_id.clone();
        let mut state = UpgradeState::ExtractRunId;
        let mut poll = HealthPoll::default();

        info!(run_id = %run_id, "Starting upgrade workflow");

        while !state.is_terminal() {
            self.enter(execution, state);
            checkpoint(execution, checkpoints).await;
            let started = Instant::now();

            match self.step(execution, state, &mut poll).await {
                Ok(next) => {
                    let elapsed = started.elapsed();
                    debug!(
                        run_id = %run_id,
                        state = %state,
                        next = %next,
                        elapsed_ms = elapsed.as_millis() as u64,
                        "Step completed"
                    );
                    if !state.is_wait() {
                        execution.record(HistoryEventKind::StepSucceeded { state });
                    }
                    metrics::counter!("nc_upgrade_steps_total", "state" => state.as_str(), "result" => "success")
                        .increment(1);
                    metrics::histogram!("nc_upgrade_step_duration_seconds", "state" => state.as_str())
                        .record(elapsed.as_secs_f64());
                    state = next;
                }
                Err(failure) => {
                    metrics::counter!("nc_upgrade_steps_total", "state" => state.as_str(), "result" => "failure")
                        .increment(1);
                    return self.rollback(execution, failure, checkpoints).await;
                }
            }
        }

        self.enter(execution, UpgradeState::Success);
        info!(run_id = %run_id, "Upgrade completed successfully");
        UpgradeOutcome::Succeeded
    }

    fn enter(&self, execution: &mut UpgradeExecution, state: UpgradeState) {
        info!(run_id = %execution.run_id, state = %state, "Entering state: {}", state.description());
        execution.enter(state);
        self.event_bus.publish(UpgradeEvent::StateEntered {
            run_id: execution.run_id.clone(),
            state,
            entered_at: Utc::now(),
        });
    }

    async fn step(
        &self,
        execution: &mut UpgradeExecution,
        state: UpgradeState,
        poll: &mut HealthPoll,
    ) -> Result<UpgradeState, StepFailure> {
        let timings = &self.plan.timings;
        let fail = |e: &dyn std::fmt::Display| StepFailure::new(state, e);

        match state {
            UpgradeState::ExtractRunId => {
                // The run id was fixed when the execution was created; every
                // later step reads it from there.
                debug!(run_id = %execution.run_id, "Execution context id stored");
                Ok(UpgradeState::MaintenanceOn)
            }
            UpgradeState::MaintenanceOn => {
                run_checked(self.commands.as_ref(), &self.plan.maintenance_on)
                    .await
                    .map_err(|e| fail(&e))?;
                Ok(UpgradeState::WaitDrain)
            }
            UpgradeState::WaitDrain => {
                self.pause(&execution.run_id, state, timings.drain).await;
                Ok(UpgradeState::ScaleDownAll)
            }
            UpgradeState::ScaleDownAll => {
                let targets = self.plan.scale_down_targets();
                self.scale_all(&targets).await.map_err(|e| fail(&e))?;
                self.publish_scaled(&execution.run_id, state, &targets);
                Ok(UpgradeState::WaitScaleDown)
            }
            UpgradeState::WaitScaleDown => {
                self.pause(&execution.run_id, state, timings.scale_down).await;
                Ok(UpgradeState::CreateSnapshot)
            }
            UpgradeState::CreateSnapshot => {
                let snapshot_name = SnapshotRecord::name_for(&execution.run_id);
                let record = self
                    .backups
                    .create_snapshot(&self.plan.database_id, &snapshot_name)
                    .await
                    .map_err(|e| fail(&e))?;
                execution.record_snapshot(record).map_err(|e| fail(&e))?;
                info!(
                    run_id = %execution.run_id,
                    database = %self.plan.database_id,
                    snapshot = %snapshot_name,
                    "Database snapshot created"
                );
                self.event_bus.publish(UpgradeEvent::SnapshotCreated {
                    run_id: execution.run_id.clone(),
                    snapshot_name,
                    created_at: Utc::now(),
                });
                Ok(UpgradeState::BackupConfig)
            }
            UpgradeState::BackupConfig => {
                let destination =
                    backup_destination(&self.plan.bucket, &self.plan.backup_key_prefix, Utc::now());
                self.backups
                    .copy_file(&self.plan.config_path, &destination)
                    .await
                    .map_err(|e| fail(&e))?;
                info!(run_id = %execution.run_id, destination = %destination, "Configuration backed up");
                execution.record(HistoryEventKind::ConfigBackedUp { destination });
                Ok(UpgradeState::ScaleUpPrimaryOne)
            }
            UpgradeState::ScaleUpPrimaryOne => {
                let target = self.plan.primary.with_count(1);
                self.services
                    .set_desired_count(&target.name, target.desired_count)
                    .await
                    .map_err(|e| fail(&e))?;
                self.publish_scaled(&execution.run_id, state, std::slice::from_ref(&target));
                Ok(UpgradeState::WaitUpgrade)
            }
            UpgradeState::WaitUpgrade => {
                self.pause(&execution.run_id, state, timings.upgrade).await;
                Ok(UpgradeState::CheckHealth)
            }
            UpgradeState::CheckHealth => {
                let service = &self.plan.primary.name;
                let running = self
                    .services
                    .running_count(service)
                    .await
                    .map_err(|e| fail(&e))?;
                let observation = HealthObservation::new(service.clone(), running);
                poll.checks += 1;
                info!(
                    run_id = %execution.run_id,
                    service = %service,
                    running_count = running,
                    check = poll.checks,
                    "Health observed"
                );
                execution.record(HistoryEventKind::HealthObserved {
                    service: service.to_string(),
                    running_count: running,
                });
                self.event_bus.publish(UpgradeEvent::HealthObserved {
                    run_id: execution.run_id.clone(),
                    service: service.to_string(),
                    running_count: running,
                    observed_at: observation.observed_at,
                });
                poll.last = Some(observation);
                Ok(UpgradeState::HealthDecision)
            }
            UpgradeState::HealthDecision => {
                let observation = poll
                    .last
                    .take()
                    .ok_or_else(|| fail(&"no health observation to decide on"))?;
                let verdict = HealthVerdict::decide(&observation);
                if verdict == HealthVerdict::Retry {
                    if let Some(max) = timings.max_health_checks {
                        if poll.checks >= max {
                            return Err(fail(&format!(
                                "{} not running after {} health checks",
                                observation.service, poll.checks
                            )));
                        }
                    }
                    warn!(
                        run_id = %execution.run_id,
                        service = %observation.service,
                        "No running instances yet, retrying health check"
                    );
                }
                Ok(verdict.next_state())
            }
            UpgradeState::WaitRetryHealth => {
                self.pause(&execution.run_id, state, timings.health_retry).await;
                Ok(UpgradeState::CheckHealth)
            }
            UpgradeState::ScaleUpAll => {
                let targets = self.plan.nominal_targets();
                self.scale_all(&targets).await.map_err(|e| fail(&e))?;
                self.publish_scaled(&execution.run_id, state, &targets);
                Ok(UpgradeState::Success)
            }
            UpgradeState::Success | UpgradeState::Failed => Ok(state),
        }
    }

    /// Compensating branch for every caught failure: restore nominal counts,
    /// then turn maintenance mode off, then fail with the fixed cause.
    ///
    /// Maintenance stays on when the restore fails.
    async fn rollback(
        &self,
        execution: &mut UpgradeExecution,
        failure: StepFailure,
        checkpoints: &dyn ExecutionRepository,
    ) -> UpgradeOutcome {
        let run_id = execution.run_id.clone();
        error!(
            run_id = %run_id,
            state = %failure.state,
            error = %failure.message,
            "Upgrade step failed, rolling back"
        );

        let envelope = execution.catch_failure(failure).clone();
        self.event_bus.publish(UpgradeEvent::RollbackStarted {
            run_id: run_id.clone(),
            failed_state: envelope.state,
            error: envelope.error,
            started_at: Utc::now(),
        });
        self.enter(execution, UpgradeState::Failed);
        checkpoint(execution, checkpoints).await;
        metrics::counter!("nc_upgrade_rollbacks_total", "state" => envelope.state.as_str()).increment(1);

        let targets = self.plan.nominal_targets();
        let restored = self.scale_all(&targets).await;
        if let Err(e) = &restored {
            self.rollback_step_failed(execution, ROLLBACK_SCALE_UP, e);
        }
        checkpoint(execution, checkpoints).await;
        if restored.is_err() {
            error!(run_id = %run_id, "Services not restored; maintenance mode left on");
            return UpgradeOutcome::failed();
        }
        self.publish_scaled(&run_id, UpgradeState::Failed, &targets);

        match run_checked(self.commands.as_ref(), &self.plan.maintenance_off).await {
            Ok(_) => {
                info!(run_id = %run_id, "Rollback completed, maintenance mode off");
                execution.record(HistoryEventKind::RollbackCompleted);
            }
            Err(e) => self.rollback_step_failed(execution, MAINTENANCE_OFF, &e),
        }

        UpgradeOutcome::failed()
    }

    fn rollback_step_failed(&self, execution: &mut UpgradeExecution, step: &'static str, e: &dyn std::fmt::Display) {
        error!(run_id = %execution.run_id, step = step, error = %e, "Rollback step failed");
        metrics::counter!("nc_upgrade_rollback_failures_total", "step" => step).increment(1);
        execution.record(HistoryEventKind::RollbackStepFailed {
            step: step.to_string(),
            error: e.to_string(),
        });
    }

    /// Parallel fan-out; the first failing branch fails the whole join and
    /// the remaining branches are dropped.
    async fn scale_all(&self, targets: &[ServiceRef]) -> Result<(), ServiceControlError> {
        let services = &self.services;
        try_join_all(targets.iter().map(|target| async move {
            debug!(service = %target.name, count = target.desired_count, "Setting desired count");
            services.set_desired_count(&target.name, target.desired_count).await
        }))
        .await?;
        Ok(())
    }

    fn publish_scaled(&self, run_id: &RunId, state: UpgradeState, targets: &[ServiceRef]) {
        self.event_bus.publish(UpgradeEvent::ServicesScaled {
            run_id: run_id.clone(),
            state,
            targets: targets
                .iter()
                .map(|t| (t.name.to_string(), t.desired_count))
                .collect(),
            scaled_at: Utc::now(),
        });
    }

    async fn pause(&self, run_id: &RunId, state: UpgradeState, duration: Duration) {
        debug!(run_id = %run_id, state = %state, seconds = duration.as_secs(), "Waiting");
        tokio::time::sleep(duration).await;
    }
}

/// Mid-run saves are best effort; the caller's terminal save is the one that
/// reports storage errors.
async fn checkpoint(execution: &UpgradeExecution, checkpoints: &dyn ExecutionRepository) {
    if let Err(e) = checkpoints.save(execution).await {
        warn!(
            run_id = %execution.run_id,
            state = %execution.current_state,
            error = %e,
            "Failed to checkpoint execution"
        );
    }
}
