// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Repository Factory - Application Layer
//!
//! Creates the concrete execution repository for the configured backend,
//! keeping the domain layer free of infrastructure types.

use std::sync::Arc;

use crate::domain::repository::{ExecutionRepository, StorageBackend};
use crate::infrastructure::repositories::{FileExecutionRepository, InMemoryExecutionRepository};

/// Creates an ExecutionRepository implementation based on the configured backend
pub fn create_execution_repository(backend: &StorageBackend) -> Arc<dyn ExecutionRepository> {
    match backend {
        StorageBackend::InMemory => Arc::new(InMemoryExecutionRepository::new()),
        StorageBackend::Filesystem(dir) => Arc::new(FileExecutionRepository::new(dir.clone())),
    }
}
