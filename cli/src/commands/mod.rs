// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Command implementations for the nc-upgrade CLI

pub mod cache;
pub mod config;
pub mod describe;
pub mod history;
pub mod run;
pub mod services;

use std::path::PathBuf;

pub use self::config::ConfigCommand;
pub use self::describe::DescribeArgs;
pub use self::history::HistoryArgs;
pub use self::run::RunArgs;

/// `--state-dir`, else `~/.nc-upgrade/history`, else `./.nc-upgrade/history`
pub fn resolve_state_dir(flag: Option<PathBuf>) -> PathBuf {
    flag.unwrap_or_else(|| {
        dirs_next::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".nc-upgrade")
            .join("history")
    })
}
