// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Domain Repository Interfaces
//!
//! Persistence contract for the `UpgradeExecution` aggregate. The interface
//! lives in the domain layer and is implemented in
//! `crate::infrastructure::repositories`.
//!
//! | Trait | Aggregate | Implementations |
//! |-------|-----------|----------------|
//! | `ExecutionRepository` | `UpgradeExecution` | `InMemoryExecutionRepository`, `FileExecutionRepository` |

use async_trait::async_trait;
use crate::domain::execution::{RunId, UpgradeExecution};

/// Storage backend for execution history
#[derive(Debug, Clone)]
pub enum StorageBackend {
    InMemory,
    /// One JSON document per run under this directory
    Filesystem(std::path::PathBuf),
}

#[async_trait]
pub trait ExecutionRepository: Send + Sync {
    /// Save execution (create or update)
    async fn save(&self, execution: &UpgradeExecution) -> Result<(), RepositoryError>;

    /// Find execution by run id
    async fn find_by_run_id(&self, run_id: &RunId) -> Result<Option<UpgradeExecution>, RepositoryError>;

    /// Most recent executions first
    async fn list_recent(&self, limit: usize) -> Result<Vec<UpgradeExecution>, RepositoryError>;
}

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
