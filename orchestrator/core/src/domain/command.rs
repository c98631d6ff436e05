// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! One-off Command Runner
//!
//! Runs a single command inside an application container and waits for it
//! to finish. A non-zero exit status is a failure of the calling step.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Command to run in a named application container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    pub container: String,
    pub argv: Vec<String>,
}

impl CommandSpec {
    pub fn new(container: impl Into<String>, argv: Vec<String>) -> Self {
        Self {
            container: container.into(),
            argv,
        }
    }

    /// Space-joined argv for logs
    pub fn display_argv(&self) -> String {
        self.argv.join(" ")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutput {
    pub exit_code: i64,
    pub logs: Vec<String>,
}

impl CommandOutput {
    pub fn success() -> Self {
        Self {
            exit_code: 0,
            logs: Vec::new(),
        }
    }

    /// Turn a non-zero exit into an error
    pub fn into_success(self) -> Result<Self, CommandError> {
        if self.exit_code == 0 {
            Ok(self)
        } else {
            Err(CommandError::NonZeroExit {
                code: self.exit_code,
                output: self.logs.join("").trim().to_string(),
            })
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("Command exited with status {code}: {output}")]
    NonZeroExit { code: i64, output: String },
    #[error("Unknown container: {0}")]
    UnknownContainer(String),
    #[error("Empty command")]
    EmptyCommand,
    #[error("Failed to start command: {0}")]
    SpawnFailed(String),
    #[error("Container engine error: {0}")]
    Engine(String),
}

#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `argv` in a one-off instance of `container` and wait for exit.
    async fn run_command(&self, container: &str, argv: &[String]) -> Result<CommandOutput, CommandError>;
}

/// Run a command and require exit status 0.
pub async fn run_checked(runner: &dyn CommandRunner, spec: &CommandSpec) -> Result<CommandOutput, CommandError> {
    if spec.argv.is_empty() {
        return Err(CommandError::EmptyCommand);
    }
    runner
        .run_command(&spec.container, &spec.argv)
        .await?
        .into_success()
}

/// Substitute `{key}` placeholders in every argv element.
pub fn render_argv(template: &[String], vars: &[(&str, &str)]) -> Vec<String> {
    template
        .iter()
        .map(|arg| {
            vars.iter().fold(arg.clone(), |acc, (key, value)| {
                acc.replace(&format!("{{{}}}", key), value)
            })
        })
        .collect()
}
