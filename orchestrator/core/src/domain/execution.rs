// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Upgrade Execution Aggregate
//!
//! One `UpgradeExecution` per workflow run. It carries the execution context
//! id (`RunId`), the terminal status and an append-only history that lets
//! operators find the true failure point after a `Failed` outcome, since the
//! outcome itself only carries the fixed cause string.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::backup::SnapshotRecord;
use crate::domain::workflow::{StepFailure, UpgradeOutcome, UpgradeState};

const MAX_RUN_ID_LEN: usize = 80;

/// Execution context id of one run, derived from the run name.
/// Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RunId(String);

impl RunId {
    /// Validate a run name supplied by the trigger
    ///
    /// # Validation Rules
    /// - 1-80 characters
    /// - ASCII alphanumerics, `-` and `_` only (it ends up in a snapshot name)
    pub fn new(name: impl Into<String>) -> Result<Self, ExecutionError> {
        let name = name.into();
        if name.is_empty() || name.len() > MAX_RUN_ID_LEN {
            return Err(ExecutionError::InvalidRunId(format!(
                "Run name must be 1-{} characters",
                MAX_RUN_ID_LEN
            )));
        }
        if !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(ExecutionError::InvalidRunId(format!(
                "Run name '{}' may only contain ASCII letters, digits, '-' and '_'",
                name
            )));
        }
        Ok(Self(name))
    }

    /// Run id for triggers that supply no name
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for RunId {
    type Error = ExecutionError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<RunId> for String {
    fn from(value: RunId) -> Self {
        value.0
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Running,
    Succeeded,
    Failed,
    /// Terminated by the overall timeout; no rollback was performed
    TimedOut,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ExecutionStatus::Running)
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ExecutionStatus::Running => "running",
            ExecutionStatus::Succeeded => "succeeded",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::TimedOut => "timed_out",
        };
        f.write_str(label)
    }
}

/// Error payload captured from the failing step. Consumed by the
/// compensating branch only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureEnvelope {
    pub state: UpgradeState,
    pub error: String,
    pub caught_at: DateTime<Utc>,
}

impl From<StepFailure> for FailureEnvelope {
    fn from(failure: StepFailure) -> Self {
        Self {
            state: failure.state,
            error: failure.message,
            caught_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEvent {
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: HistoryEventKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum HistoryEventKind {
    StateEntered { state: UpgradeState },
    StepSucceeded { state: UpgradeState },
    StepFailed { state: UpgradeState, error: String },
    HealthObserved { service: String, running_count: u32 },
    SnapshotCreated { snapshot_name: String },
    ConfigBackedUp { destination: String },
    RollbackStarted { failed_state: UpgradeState },
    RollbackStepFailed { step: String, error: String },
    RollbackCompleted,
    Terminated { status: ExecutionStatus },
}

/// Execution instance of the upgrade workflow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpgradeExecution {
    pub run_id: RunId,
    pub status: ExecutionStatus,
    pub current_state: UpgradeState,
    pub snapshot: Option<SnapshotRecord>,
    pub failure: Option<FailureEnvelope>,
    pub cause: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    history: Vec<HistoryEvent>,
}

impl UpgradeExecution {
    pub fn new(run_id: RunId) -> Self {
        Self {
            run_id,
            status: ExecutionStatus::Running,
            current_state: UpgradeState::ExtractRunId,
            snapshot: None,
            failure: None,
            cause: None,
            started_at: Utc::now(),
            ended_at: None,
            history: Vec::new(),
        }
    }

    pub fn history(&self) -> &[HistoryEvent] {
        &self.history
    }

    pub fn record(&mut self, kind: HistoryEventKind) {
        self.history.push(HistoryEvent { at: Utc::now(), kind });
    }

    pub fn enter(&mut self, state: UpgradeState) {
        self.current_state = state;
        self.record(HistoryEventKind::StateEntered { state });
    }

    /// Store the snapshot of this run. Only the first record is kept.
    pub fn record_snapshot(&mut self, snapshot: SnapshotRecord) -> Result<(), ExecutionError> {
        if let Some(existing) = &self.snapshot {
            return Err(ExecutionError::SnapshotAlreadyRecorded(existing.snapshot_name.clone()));
        }
        self.record(HistoryEventKind::SnapshotCreated {
            snapshot_name: snapshot.snapshot_name.clone(),
        });
        self.snapshot = Some(snapshot);
        Ok(())
    }

    pub fn catch_failure(&mut self, failure: StepFailure) -> &FailureEnvelope {
        self.record(HistoryEventKind::StepFailed {
            state: failure.state,
            error: failure.message.clone(),
        });
        self.record(HistoryEventKind::RollbackStarted {
            failed_state: failure.state,
        });
        self.current_state = UpgradeState::Failed;
        self.failure.insert(FailureEnvelope::from(failure))
    }

    /// Apply the terminal outcome of the state machine
    pub fn finish(&mut self, outcome: &UpgradeOutcome) {
        let status = match outcome {
            UpgradeOutcome::Succeeded => {
                self.current_state = UpgradeState::Success;
                ExecutionStatus::Succeeded
            }
            UpgradeOutcome::Failed { cause } => {
                self.current_state = UpgradeState::Failed;
                self.cause = Some(cause.clone());
                ExecutionStatus::Failed
            }
        };
        self.terminate(status);
    }

    /// Overall timeout expired; the run is abandoned where it stands.
    pub fn time_out(&mut self) {
        self.terminate(ExecutionStatus::TimedOut);
    }

    fn terminate(&mut self, status: ExecutionStatus) {
        self.status = status;
        self.ended_at = Some(Utc::now());
        self.record(HistoryEventKind::Terminated { status });
    }

    /// States entered, in order
    pub fn visited_states(&self) -> Vec<UpgradeState> {
        self.history
            .iter()
            .filter_map(|event| match event.kind {
                HistoryEventKind::StateEntered { state } => Some(state),
                _ => None,
            })
            .collect()
    }
}

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("Invalid run id: {0}")]
    InvalidRunId(String),
    #[error("Snapshot '{0}' already recorded for this run")]
    SnapshotAlreadyRecorded(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_id_validation() {
        assert!(RunId::new("run-42").is_ok());
        assert!(RunId::new("build_2026_02_18").is_ok());
        assert!(RunId::new("").is_err());
        assert!(RunId::new("run 42").is_err());
        assert!(RunId::new("run/42").is_err());
        assert!(RunId::new("x".repeat(81)).is_err());
    }

    #[test]
    fn test_generated_run_id_is_valid() {
        let id = RunId::generate();
        assert!(RunId::new(id.as_str()).is_ok());
        assert_ne!(RunId::generate(), id);
    }

    #[test]
    fn test_snapshot_recorded_once() {
        let mut execution = UpgradeExecution::new(RunId::new("run-1").unwrap());
        execution
            .record_snapshot(SnapshotRecord::new("db", "pre-upgrade-run-1"))
            .unwrap();
        assert!(execution
            .record_snapshot(SnapshotRecord::new("db", "pre-upgrade-run-1"))
            .is_err());
    }

    #[test]
    fn test_failure_then_finish() {
        let mut execution = UpgradeExecution::new(RunId::new("run-2").unwrap());
        execution.enter(UpgradeState::CreateSnapshot);
        let envelope = execution.catch_failure(StepFailure::new(UpgradeState::CreateSnapshot, "denied"));
        assert_eq!(envelope.state, UpgradeState::CreateSnapshot);
        execution.finish(&UpgradeOutcome::failed());

        assert_eq!(execution.status, ExecutionStatus::Failed);
        assert_eq!(
            execution.cause.as_deref(),
            Some("Upgrade failed. Services rolled back to previous state.")
        );
        assert!(execution.ended_at.is_some());
        assert!(matches!(
            execution.history().last().map(|e| &e.kind),
            Some(HistoryEventKind::Terminated { status: ExecutionStatus::Failed })
        ));
    }

    #[test]
    fn test_history_serializes_with_event_tag() {
        let mut execution = UpgradeExecution::new(RunId::new("run-3").unwrap());
        execution.enter(UpgradeState::MaintenanceOn);
        let json = serde_json::to_value(&execution).unwrap();
        assert_eq!(json["history"][0]["event"], "state_entered");
        assert_eq!(json["history"][0]["state"], "MaintenanceOn");
        assert_eq!(json["run_id"], "run-3");

        let parsed: UpgradeExecution = serde_json::from_value(json).unwrap();
        assert_eq!(parsed.visited_states(), vec![UpgradeState::MaintenanceOn]);
    }
}
