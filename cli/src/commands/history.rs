// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! `nc-upgrade history` - list recent runs or show one run step by step

use anyhow::{Context, Result};
use clap::Args;
use colored::{ColoredString, Colorize};
use std::path::PathBuf;

use upgrade_core::{
    domain::{
        execution::{ExecutionStatus, HistoryEventKind, RunId, UpgradeExecution},
        repository::ExecutionRepository,
    },
    infrastructure::repositories::FileExecutionRepository,
};

#[derive(Args, Debug, Clone)]
pub struct HistoryArgs {
    /// Show the full history of this run
    #[arg(value_name = "RUN_ID")]
    pub run_id: Option<String>,

    /// Maximum number of runs to list
    #[arg(long, default_value = "20")]
    pub limit: usize,

    /// Print raw JSON
    #[arg(long)]
    pub json: bool,
}

pub async fn execute(args: HistoryArgs, state_dir: PathBuf) -> Result<()> {
    let repository = FileExecutionRepository::new(state_dir);

    match args.run_id {
        Some(id) => {
            let run_id = RunId::new(id).context("Invalid run id")?;
            let execution = repository
                .find_by_run_id(&run_id)
                .await
                .context("Failed to read execution history")?
                .ok_or_else(|| anyhow::anyhow!("No run '{}' in {:?}", run_id, repository.dir()))?;

            if args.json {
                println!("{}", serde_json::to_string_pretty(&execution)?);
            } else {
                print_execution(&execution);
            }
        }
        None => {
            let executions = repository
                .list_recent(args.limit)
                .await
                .context("Failed to read execution history")?;

            if args.json {
                println!("{}", serde_json::to_string_pretty(&executions)?);
            } else if executions.is_empty() {
                println!("{}", "No upgrade runs recorded".dimmed());
            } else {
                println!("{:<40} {:<10} {:<20} STARTED", "RUN", "STATUS", "STATE");
                for execution in &executions {
                    println!(
                        "{:<40} {:<10} {:<20} {}",
                        execution.run_id.to_string(),
                        status_label(execution.status),
                        execution.current_state.to_string(),
                        execution.started_at.format("%Y-%m-%d %H:%M:%S")
                    );
                }
            }
        }
    }

    Ok(())
}

fn status_label(status: ExecutionStatus) -> ColoredString {
    let label = format!("{:<10}", status.to_string());
    match status {
        ExecutionStatus::Succeeded => label.green(),
        ExecutionStatus::Running => label.yellow(),
        ExecutionStatus::Failed | ExecutionStatus::TimedOut => label.red(),
    }
}

fn print_execution(execution: &UpgradeExecution) {
    println!("{} {}", "Run:".bold(), execution.run_id);
    println!("{} {}", "Status:".bold(), status_label(execution.status));
    if let Some(snapshot) = &execution.snapshot {
        println!("{} {}", "Snapshot:".bold(), snapshot.snapshot_name);
    }
    if let Some(failure) = &execution.failure {
        println!(
            "{} {} - {}",
            "Failed at:".bold(),
            failure.state.to_string().red(),
            failure.error
        );
    }
    println!();

    for event in execution.history() {
        let at = event.at.format("%H:%M:%S%.3f");
        println!("  {}  {}", at.to_string().dimmed(), describe_event(&event.kind));
    }
}

pub fn describe_event(kind: &HistoryEventKind) -> String {
    match kind {
        HistoryEventKind::StateEntered { state } => format!("entered {}", state),
        HistoryEventKind::StepSucceeded { state } => format!("{} ok", state),
        HistoryEventKind::StepFailed { state, error } => format!("{} failed: {}", state, error),
        HistoryEventKind::HealthObserved {
            service,
            running_count,
        } => format!("{} running={}", service, running_count),
        HistoryEventKind::SnapshotCreated { snapshot_name } => format!("snapshot {}", snapshot_name),
        HistoryEventKind::ConfigBackedUp { destination } => format!("config copied to {}", destination),
        HistoryEventKind::RollbackStarted { failed_state } => {
            format!("rollback started after {}", failed_state)
        }
        HistoryEventKind::RollbackStepFailed { step, error } => {
            format!("rollback step {} failed: {}", step, error)
        }
        HistoryEventKind::RollbackCompleted => "rollback completed".to_string(),
        HistoryEventKind::Terminated { status } => format!("terminated: {}", status),
    }
}
