// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::execution::RunId;
use crate::domain::workflow::UpgradeState;

/// Domain events published while an upgrade runs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UpgradeEvent {
    UpgradeStarted {
        run_id: RunId,
        started_at: DateTime<Utc>,
    },
    StateEntered {
        run_id: RunId,
        state: UpgradeState,
        entered_at: DateTime<Utc>,
    },
    ServicesScaled {
        run_id: RunId,
        state: UpgradeState,
        targets: Vec<(String, u32)>,
        scaled_at: DateTime<Utc>,
    },
    HealthObserved {
        run_id: RunId,
        service: String,
        running_count: u32,
        observed_at: DateTime<Utc>,
    },
    SnapshotCreated {
        run_id: RunId,
        snapshot_name: String,
        created_at: DateTime<Utc>,
    },
    RollbackStarted {
        run_id: RunId,
        failed_state: UpgradeState,
        error: String,
        started_at: DateTime<Utc>,
    },
    UpgradeSucceeded {
        run_id: RunId,
        completed_at: DateTime<Utc>,
    },
    UpgradeFailed {
        run_id: RunId,
        cause: String,
        failed_at: DateTime<Utc>,
    },
    UpgradeTimedOut {
        run_id: RunId,
        last_state: UpgradeState,
        timed_out_at: DateTime<Utc>,
    },
}

impl UpgradeEvent {
    pub fn run_id(&self) -> &RunId {
        match self {
            UpgradeEvent::UpgradeStarted { run_id, .. }
            | UpgradeEvent::StateEntered { run_id, .. }
            | UpgradeEvent::ServicesScaled { run_id, .. }
            | UpgradeEvent::HealthObserved { run_id, .. }
            | UpgradeEvent::SnapshotCreated { run_id, .. }
            | UpgradeEvent::RollbackStarted { run_id, .. }
            | UpgradeEvent::UpgradeSucceeded { run_id, .. }
            | UpgradeEvent::UpgradeFailed { run_id, .. }
            | UpgradeEvent::UpgradeTimedOut { run_id, .. } => run_id,
        }
    }

    /// Terminal events end a run's event stream
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            UpgradeEvent::UpgradeSucceeded { .. }
                | UpgradeEvent::UpgradeFailed { .. }
                | UpgradeEvent::UpgradeTimedOut { .. }
        )
    }
}
