// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! `nc-upgrade cache-config` - cache backend configuration derived from env

use anyhow::Result;

use upgrade_core::domain::cache::CacheBackendConfig;

pub fn execute() -> Result<()> {
    let config = CacheBackendConfig::from_env();
    tracing::debug!(mode = %config.mode(), "Derived cache backend configuration");
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}
