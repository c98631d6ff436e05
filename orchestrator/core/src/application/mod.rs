// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod repository_factory;
pub mod start_upgrade;
pub mod upgrade_orchestrator;

// Re-export use cases for convenience
pub use start_upgrade::{CompletedUpgrade, StandardStartUpgradeUseCase, StartUpgradeRequest, StartUpgradeUseCase};
pub use upgrade_orchestrator::UpgradeOrchestrator;
