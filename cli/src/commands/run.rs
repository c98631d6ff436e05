// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! `nc-upgrade run` - start one upgrade and wait for its outcome

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use std::path::PathBuf;

use upgrade_core::{
    application::{CompletedUpgrade, StartUpgradeRequest, StartUpgradeUseCase},
    domain::{events::UpgradeEvent, execution::ExecutionStatus, inventory::StackManifest},
    infrastructure::JournalEntry,
};

use crate::wiring::{Backend, UpgradeRuntime};

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Run name; becomes the execution id and the snapshot suffix
    #[arg(long, value_name = "NAME")]
    pub run_name: Option<String>,

    /// Drive simulated services instead of Docker and record nothing in history
    #[arg(long)]
    pub dry_run: bool,

    /// Print workflow events as they happen
    #[arg(long)]
    pub follow: bool,
}

/// Returns the process exit code: 0 on success, 1 on failure, 2 on timeout
pub async fn execute(args: RunArgs, config: Option<PathBuf>, state_dir: PathBuf) -> Result<i32> {
    let manifest = StackManifest::load_or_default(config).context("Failed to load inventory")?;
    let backend = if args.dry_run {
        println!("{}", "Dry run: no service will be touched".yellow());
        Backend::DryRun
    } else {
        Backend::Docker
    };
    let runtime = UpgradeRuntime::build(manifest, backend, state_dir)?;

    let printer = args.follow.then(|| {
        let mut receiver = runtime.event_bus.subscribe();
        tokio::spawn(async move {
            while let Ok(event) = receiver.recv().await {
                print_event(&event);
                if event.is_terminal() {
                    break;
                }
            }
        })
    });

    let result = runtime
        .use_case
        .start_upgrade(StartUpgradeRequest {
            run_name: args.run_name,
        })
        .await;

    if let Some(printer) = printer {
        if result.is_ok() {
            let _ = printer.await;
        } else {
            printer.abort();
        }
    }
    let completed = result?;

    if let Some(stack) = &runtime.simulation {
        print_journal(&stack.journal.entries());
    }
    print_summary(&completed);

    Ok(exit_code(completed.status))
}

pub fn exit_code(status: ExecutionStatus) -> i32 {
    match status {
        ExecutionStatus::Succeeded => 0,
        ExecutionStatus::Failed | ExecutionStatus::Running => 1,
        ExecutionStatus::TimedOut => 2,
    }
}

fn print_summary(completed: &CompletedUpgrade) {
    println!();
    println!("{} {}", "Run:".bold(), completed.run_id);
    if let Some(snapshot) = &completed.snapshot_name {
        println!("{} {}", "Snapshot:".bold(), snapshot);
    }
    match completed.status {
        ExecutionStatus::Succeeded => println!("{}", "✓ Upgrade succeeded".green()),
        ExecutionStatus::TimedOut => {
            println!("{}", "✗ Upgrade timed out; services were left as they were".red());
            println!("  Inspect with: nc-upgrade history {}", completed.run_id);
        }
        _ => {
            println!(
                "{}",
                format!("✗ {}", completed.cause.as_deref().unwrap_or("Upgrade failed")).red()
            );
            if let Some(state) = completed.failed_state {
                println!("  Failed at: {}", state.to_string().bold());
            }
        }
    }
}

fn print_event(event: &UpgradeEvent) {
    match event {
        UpgradeEvent::UpgradeStarted { run_id, .. } => {
            println!("{} {}", "Upgrade started".bold(), run_id);
        }
        UpgradeEvent::StateEntered { state, .. } => {
            println!("{} {}", "→".cyan(), state);
        }
        UpgradeEvent::ServicesScaled { targets, .. } => {
            let targets: Vec<String> = targets.iter().map(|(s, n)| format!("{}={}", s, n)).collect();
            println!("  {} {}", "scaled".dimmed(), targets.join(" "));
        }
        UpgradeEvent::HealthObserved {
            service,
            running_count,
            ..
        } => {
            let count = if *running_count > 0 {
                running_count.to_string().green()
            } else {
                running_count.to_string().yellow()
            };
            println!("  {} {} running={}", "health".dimmed(), service, count);
        }
        UpgradeEvent::SnapshotCreated { snapshot_name, .. } => {
            println!("  {} {}", "snapshot".dimmed(), snapshot_name);
        }
        UpgradeEvent::RollbackStarted {
            failed_state,
            error,
            ..
        } => {
            println!(
                "{} {} - {}",
                "Rolling back after".red(),
                failed_state,
                error
            );
        }
        UpgradeEvent::UpgradeSucceeded { .. } => println!("{}", "Upgrade succeeded".green()),
        UpgradeEvent::UpgradeFailed { cause, .. } => println!("{}", cause.red()),
        UpgradeEvent::UpgradeTimedOut { last_state, .. } => {
            println!("{} in {}", "Timed out".red(), last_state);
        }
    }
}

fn print_journal(entries: &[JournalEntry]) {
    println!();
    println!("{}", "Simulated calls:".bold());
    for entry in entries {
        match entry {
            JournalEntry::DesiredCount { service, count } => {
                println!("  set_desired_count {} {}", service, count);
            }
            JournalEntry::RunningCount { service, running } => {
                println!("  running_count {} -> {}", service, running);
            }
            JournalEntry::Command(spec) => {
                println!("  run_command {}: {}", spec.container, spec.display_argv());
            }
            JournalEntry::Snapshot {
                resource_id,
                snapshot_name,
            } => println!("  create_snapshot {} {}", resource_id, snapshot_name),
            JournalEntry::Copy {
                source,
                destination,
            } => println!("  copy_file {} {}", source, destination),
        }
    }
}
