// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Start Upgrade Use Case
//!
//! Application service for starting one upgrade run.
//!
//! # DDD Pattern: Application Service
//!
//! - **Layer:** Application
//! - **Responsibility:** Create the execution context, apply the overall
//!   timeout, persist history and publish lifecycle events
//! - **Collaborators:**
//!   - Domain: `UpgradeExecution` aggregate, `RunId`
//!   - Application: `UpgradeOrchestrator`
//!   - Infrastructure: `ExecutionRepository`, `EventBus`

use crate::application::upgrade_orchestrator::UpgradeOrchestrator;
use crate::domain::events::UpgradeEvent;
use crate::domain::execution::{ExecutionStatus, RunId, UpgradeExecution};
use crate::domain::repository::ExecutionRepository;
use crate::domain::workflow::{UpgradeOutcome, UpgradeState};
use crate::infrastructure::event_bus::EventBus;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{error, info};

/// Upgrade start request
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct StartUpgradeRequest {
    /// Run name supplied by the trigger; a UUID is generated when absent
    pub run_name: Option<String>,
}

/// Terminal summary of one run
#[derive(Debug, Clone, serde::Serialize)]
pub struct CompletedUpgrade {
    pub run_id: RunId,
    pub status: ExecutionStatus,
    pub cause: Option<String>,
    pub snapshot_name: Option<String>,
    /// Step whose failure triggered the rollback
    pub failed_state: Option<UpgradeState>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl CompletedUpgrade {
    fn from_execution(execution: &UpgradeExecution) -> Self {
        Self {
            run_id: execution.run_id.clone(),
            status: execution.status,
            cause: execution.cause.clone(),
            snapshot_name: execution.snapshot.as_ref().map(|s| s.snapshot_name.clone()),
            failed_state: execution.failure.as_ref().map(|f| f.state),
            started_at: execution.started_at,
            ended_at: execution.ended_at,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ExecutionStatus::Succeeded
    }
}

/// Start Upgrade Use Case
#[async_trait]
pub trait StartUpgradeUseCase: Send + Sync {
    /// Run one upgrade to completion
    ///
    /// # Errors
    ///
    /// - Invalid run name
    /// - A run with the same id already exists
    /// - Execution history could not be persisted
    ///
    /// A failed or timed out upgrade is not an error: it is reported through
    /// [`CompletedUpgrade::status`].
    async fn start_upgrade(&self, request: StartUpgradeRequest) -> Result<CompletedUpgrade>;
}

/// Standard implementation of StartUpgradeUseCase
pub struct StandardStartUpgradeUseCase {
    orchestrator: Arc<UpgradeOrchestrator>,
    repository: Arc<dyn ExecutionRepository>,
    event_bus: Arc<EventBus>,
}

impl StandardStartUpgradeUseCase {
    pub fn new(
        orchestrator: Arc<UpgradeOrchestrator>,
        repository: Arc<dyn ExecutionRepository>,
        event_bus: Arc<EventBus>,
    ) -> Self {
        Self {
            orchestrator,
            repository,
            event_bus,
        }
    }
}

#[async_trait]
impl StartUpgradeUseCase for StandardStartUpgradeUseCase {
    async fn start_upgrade(&self, request: StartUpgradeRequest) -> Result<CompletedUpgrade> {
        // Step 1: Derive the execution context id
        let run_id = match request.run_name {
            Some(name) => RunId::new(name).context("Invalid run name")?,
            None => RunId::generate(),
        };

        // Step 2: One run per id (the snapshot name is derived from it)
        if self
            .repository
            .find_by_run_id(&run_id)
            .await
            .context("Failed to query execution repository")?
            .is_some()
        {
            anyhow::bail!("Upgrade run '{}' already exists", run_id);
        }

        // Step 3: Persist the new execution
        let mut execution = UpgradeExecution::new(run_id.clone());
        self.repository
            .save(&execution)
            .await
            .context("Failed to persist upgrade execution")?;

        self.event_bus.publish(UpgradeEvent::UpgradeStarted {
            run_id: run_id.clone(),
            started_at: execution.started_at,
        });
        metrics::counter!("nc_upgrade_runs_started_total").increment(1);

        // Step 4: Run the state machine under the overall timeout
        let overall_timeout = self.orchestrator.plan().timings.overall_timeout;
        let result = tokio::time::timeout(
            overall_timeout,
            self.orchestrator.run(&mut execution, self.repository.as_ref()),
        )
        .await;

        match result {
            Ok(outcome) => {
                execution.finish(&outcome);
                let event = match outcome {
                    UpgradeOutcome::Succeeded => UpgradeEvent::UpgradeSucceeded {
                        run_id: run_id.clone(),
                        completed_at: Utc::now(),
                    },
                    UpgradeOutcome::Failed { cause } => UpgradeEvent::UpgradeFailed {
                        run_id: run_id.clone(),
                        cause,
                        failed_at: Utc::now(),
                    },
                };
                self.event_bus.publish(event);
            }
            Err(_) => {
                let last_state = execution.current_state;
                error!(
                    run_id = %run_id,
                    state = %last_state,
                    timeout_secs = overall_timeout.as_secs(),
                    "Upgrade exceeded overall timeout; abandoned without rollback"
                );
                execution.time_out();
                self.event_bus.publish(UpgradeEvent::UpgradeTimedOut {
                    run_id: run_id.clone(),
                    last_state,
                    timed_out_at: Utc::now(),
                });
            }
        }

        // Step 5: Persist the terminal execution
        self.repository
            .save(&execution)
            .await
            .context("Failed to persist upgrade execution result")?;

        let status = execution.status.to_string();
        metrics::counter!("nc_upgrade_runs_total", "status" => status.clone()).increment(1);
        if let Some(ended_at) = execution.ended_at {
            let seconds = (ended_at - execution.started_at).num_milliseconds() as f64 / 1000.0;
            metrics::histogram!("nc_upgrade_run_duration_seconds").record(seconds);
        }

        info!(run_id = %run_id, status = %status, "Upgrade run finished");

        Ok(CompletedUpgrade::from_execution(&execution))
    }
}
