// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use crate::domain::execution::{RunId, UpgradeExecution};
use crate::domain::repository::{ExecutionRepository, RepositoryError};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

fn newest_first(mut executions: Vec<UpgradeExecution>, limit: usize) -> Vec<UpgradeExecution> {
    executions.sort_by(|a, b| {
        b.started_at
            .cmp(&a.started_at)
            .then_with(|| b.run_id.cmp(&a.run_id))
    });
    executions.truncate(limit);
    executions
}

#[derive(Clone, Default)]
pub struct InMemoryExecutionRepository {
    executions: Arc<RwLock<HashMap<RunId, UpgradeExecution>>>,
}

impl InMemoryExecutionRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ExecutionRepository for InMemoryExecutionRepository {
    async fn save(&self, execution: &UpgradeExecution) -> Result<(), RepositoryError> {
        self.executions
            .write()
            .insert(execution.run_id.clone(), execution.clone());
        Ok(())
    }

    async fn find_by_run_id(&self, run_id: &RunId) -> Result<Option<UpgradeExecution>, RepositoryError> {
        Ok(self.executions.read().get(run_id).cloned())
    }

    async fn list_recent(&self, limit: usize) -> Result<Vec<UpgradeExecution>, RepositoryError> {
        let all = self.executions.read().values().cloned().collect();
        Ok(newest_first(all, limit))
    }
}

/// One pretty-printed JSON document per run: `<dir>/<run_id>.json`
#[derive(Clone)]
pub struct FileExecutionRepository {
    dir: PathBuf,
}

impl FileExecutionRepository {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, run_id: &RunId) -> PathBuf {
        self.dir.join(format!("{}.json", run_id))
    }
}

#[async_trait]
impl ExecutionRepository for FileExecutionRepository {
    async fn save(&self, execution: &UpgradeExecution) -> Result<(), RepositoryError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let json = serde_json::to_vec_pretty(execution)?;

        // Write-then-rename so a crash never leaves a truncated document
        let path = self.path_for(&execution.run_id);
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn find_by_run_id(&self, run_id: &RunId) -> Result<Option<UpgradeExecution>, RepositoryError> {
        match tokio::fs::read(self.path_for(run_id)).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_recent(&self, limit: usize) -> Result<Vec<UpgradeExecution>, RepositoryError> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut executions = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let bytes = tokio::fs::read(&path).await?;
            match serde_json::from_slice::<UpgradeExecution>(&bytes) {
                Ok(execution) => executions.push(execution),
                Err(e) => tracing::warn!("Skipping unreadable history file {:?}: {}", path, e),
            }
        }
        Ok(newest_first(executions, limit))
    }
}
