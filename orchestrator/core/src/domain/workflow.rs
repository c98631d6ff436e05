// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Upgrade Workflow Domain Model
//!
//! The upgrade is a fixed finite state machine: a linear chain of steps with
//! one conditional retry loop (the health poll) and one global failure
//! handler. Every failure raised by a step is erased into a [`StepFailure`]
//! and consumed by exactly one compensating branch, regardless of which step
//! raised it.
//!
//! ```text
//! ExtractRunId -> MaintenanceOn -> WaitDrain -> ScaleDownAll -> WaitScaleDown
//!   -> CreateSnapshot -> BackupConfig -> ScaleUpPrimaryOne -> WaitUpgrade
//!   -> CheckHealth -> HealthDecision --(running >= 1)--> ScaleUpAll -> Success
//!                          |
//!                          +--(running == 0)--> WaitRetryHealth -> CheckHealth
//!
//! any failure in MaintenanceOn..ScaleUpAll -> Failed
//!   (RollbackScaleUp -> MaintenanceOff -> terminal failure)
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::service::HealthObservation;

/// Fixed cause reported by every failed run.
pub const FAILURE_CAUSE: &str = "Upgrade failed. Services rolled back to previous state.";

/// States of the upgrade state machine, in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum UpgradeState {
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
    ScaleUpAll,
    Success,
    Failed,
}

impl UpgradeState {
    pub const ALL: [UpgradeState; 15] = [
        UpgradeState::ExtractRunId,
        UpgradeState::MaintenanceOn,
        UpgradeState::WaitDrain,
        UpgradeState::ScaleDownAll,
        UpgradeState::WaitScaleDown,
        UpgradeState::CreateSnapshot,
        UpgradeState::BackupConfig,
        UpgradeState::ScaleUpPrimaryOne,
        UpgradeState::WaitUpgrade,
        UpgradeState::CheckHealth,
        UpgradeState::HealthDecision,
        UpgradeState::WaitRetryHealth,
        UpgradeState::ScaleUpAll,
        UpgradeState::Success,
        UpgradeState::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            UpgradeState::ExtractRunId => "ExtractRunId",
            UpgradeState::MaintenanceOn => "MaintenanceOn",
            UpgradeState::WaitDrain => "WaitDrain",
            UpgradeState::ScaleDownAll => "ScaleDownAll",
            UpgradeState::WaitScaleDown => "WaitScaleDown",
            UpgradeState::CreateSnapshot => "CreateSnapshot",
            UpgradeState::BackupConfig => "BackupConfig",
            UpgradeState::ScaleUpPrimaryOne => "ScaleUpPrimaryOne",
            UpgradeState::WaitUpgrade => "WaitUpgrade",
            UpgradeState::CheckHealth => "CheckHealth",
            UpgradeState::HealthDecision => "HealthDecision",
            UpgradeState::WaitRetryHealth => "WaitRetryHealth",
            UpgradeState::ScaleUpAll => "ScaleUpAll",
            UpgradeState::Success => "Success",
            UpgradeState::Failed => "Failed",
        }
    }

    /// One-line description used by `describe`.
    pub fn description(&self) -> &'static str {
        match self {
            UpgradeState::ExtractRunId => "Store the execution context id for this run",
            UpgradeState::MaintenanceOn => "Turn maintenance mode on in the primary application",
            UpgradeState::WaitDrain => "Let in-flight requests finish",
            UpgradeState::ScaleDownAll => "Scale every service to zero (parallel)",
            UpgradeState::WaitScaleDown => "Wait for tasks to stop",
            UpgradeState::CreateSnapshot => "Snapshot the database cluster as pre-upgrade-<runId>",
            UpgradeState::BackupConfig => "Copy config.php to durable storage with a timestamped key",
            UpgradeState::ScaleUpPrimaryOne => "Start one primary task on the new image",
            UpgradeState::WaitUpgrade => "Let the new version run its internal upgrade",
            UpgradeState::CheckHealth => "Read the running count of the primary service",
            UpgradeState::HealthDecision => "Proceed when at least one primary task is running",
            UpgradeState::WaitRetryHealth => "Pause before polling health again",
            UpgradeState::ScaleUpAll => "Restore every service to its nominal count (parallel)",
            UpgradeState::Success => "Upgrade completed",
            UpgradeState::Failed => "Restore nominal counts, turn maintenance off, fail",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, UpgradeState::Success | UpgradeState::Failed)
    }

    /// Plain waits never fail and always advance.
    pub fn is_wait(&self) -> bool {
        matches!(
            self,
            UpgradeState::WaitDrain
                | UpgradeState::WaitScaleDown
                | UpgradeState::WaitUpgrade
                | UpgradeState::WaitRetryHealth
        )
    }

    /// States whose failures are caught by the global rollback handler.
    pub fn is_caught(&self) -> bool {
        !matches!(
            self,
            UpgradeState::ExtractRunId | UpgradeState::Success | UpgradeState::Failed
        ) && !self.is_wait()
    }

    /// Outgoing edges of the graph.
    pub fn transitions(&self) -> Vec<Transition> {
        use UpgradeState::*;
        let next = |target| Transition { guard: Guard::Next, target };
        let mut edges = match self {
            ExtractRunId => vec![next(MaintenanceOn)],
            MaintenanceOn => vec![next(WaitDrain)],
            WaitDrain => vec![next(ScaleDownAll)],
            ScaleDownAll => vec![next(WaitScaleDown)],
            WaitScaleDown => vec![next(CreateSnapshot)],
            CreateSnapshot => vec![next(BackupConfig)],
            BackupConfig => vec![next(ScaleUpPrimaryOne)],
            ScaleUpPrimaryOne => vec![next(WaitUpgrade)],
            WaitUpgrade => vec![next(CheckHealth)],
            CheckHealth => vec![next(HealthDecision)],
            HealthDecision => vec![
                Transition { guard: Guard::Healthy, target: ScaleUpAll },
                Transition { guard: Guard::Unhealthy, target: WaitRetryHealth },
            ],
            WaitRetryHealth => vec![next(CheckHealth)],
            ScaleUpAll => vec![next(Success)],
            Success | Failed => vec![],
        };
        if self.is_caught() {
            edges.push(Transition { guard: Guard::OnError, target: Failed });
        }
        edges
    }
}

impl fmt::Display for UpgradeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Edge of the state graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    pub guard: Guard,
    pub target: UpgradeState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Guard {
    /// Step completed
    Next,
    /// Running count >= 1
    Healthy,
    /// Running count == 0
    Unhealthy,
    /// Any failure raised by the step
    OnError,
}

impl fmt::Display for Guard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Guard::Next => "next",
            Guard::Healthy => "running >= 1",
            Guard::Unhealthy => "running == 0",
            Guard::OnError => "on error",
        };
        f.write_str(label)
    }
}

/// Choice made by `HealthDecision`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthVerdict {
    Healthy,
    Retry,
}

impl HealthVerdict {
    pub fn decide(observation: &HealthObservation) -> Self {
        if observation.is_healthy() {
            HealthVerdict::Healthy
        } else {
            HealthVerdict::Retry
        }
    }

    pub fn next_state(&self) -> UpgradeState {
        match self {
            HealthVerdict::Healthy => UpgradeState::ScaleUpAll,
            HealthVerdict::Retry => UpgradeState::WaitRetryHealth,
        }
    }
}

/// Error-kind-erasing failure of one step.
///
/// Command, service-control and snapshot errors all collapse into this type
/// before they reach the rollback handler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{state} failed: {message}")]
pub struct StepFailure {
    pub state: UpgradeState,
    pub message: String,
}

impl StepFailure {
    pub fn new(state: UpgradeState, error: impl fmt::Display) -> Self {
        Self {
            state,
            message: error.to_string(),
        }
    }
}

/// Terminal result of one workflow run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum UpgradeOutcome {
    Succeeded,
    Failed { cause: String },
}

impl UpgradeOutcome {
    pub fn failed() -> Self {
        UpgradeOutcome::Failed {
            cause: FAILURE_CAUSE.to_string(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, UpgradeOutcome::Succeeded)
    }
}
