// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! `nc-upgrade describe` - print the workflow state graph

use anyhow::Result;
use clap::{Args, ValueEnum};
use colored::Colorize;
use serde::Serialize;

use upgrade_core::domain::workflow::{Transition, UpgradeState};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Args, Debug, Clone)]
pub struct DescribeArgs {
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub output: OutputFormat,
}

#[derive(Debug, Serialize)]
pub struct StateDescription {
    pub state: UpgradeState,
    pub description: &'static str,
    pub terminal: bool,
    pub transitions: Vec<Transition>,
}

pub fn state_graph() -> Vec<StateDescription> {
    UpgradeState::ALL
        .iter()
        .map(|state| StateDescription {
            state: *state,
            description: state.description(),
            terminal: state.is_terminal(),
            transitions: state.transitions(),
        })
        .collect()
}

pub fn execute(args: DescribeArgs) -> Result<()> {
    let graph = state_graph();
    match args.output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&graph)?),
        OutputFormat::Text => {
            for node in &graph {
                let name = if node.terminal {
                    node.state.to_string().bold()
                } else {
                    node.state.to_string().cyan()
                };
                println!("{}  {}", name, node.description.dimmed());
                for edge in &node.transitions {
                    println!("    --[{}]--> {}", edge.guard, edge.target);
                }
            }
        }
    }
    Ok(())
}
