// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Snapshot/Backup Facade
//!
//! "Create a point-in-time snapshot of the database" and "copy a
//! configuration file to durable storage". Snapshot lifecycle after creation
//! is external: this crate never mutates or deletes a snapshot.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::command::CommandError;
use crate::domain::execution::RunId;

/// Prefix of every snapshot created by the upgrade workflow
pub const SNAPSHOT_PREFIX: &str = "pre-upgrade-";

/// Snapshot created once per run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotRecord {
    pub resource_id: String,
    pub snapshot_name: String,
    pub created_at: DateTime<Utc>,
}

impl SnapshotRecord {
    pub fn new(resource_id: impl Into<String>, snapshot_name: impl Into<String>) -> Self {
        Self {
            resource_id: resource_id.into(),
            snapshot_name: snapshot_name.into(),
            created_at: Utc::now(),
        }
    }

    /// `pre-upgrade-<runId>`, with the run id taken verbatim.
    pub fn name_for(run_id: &RunId) -> String {
        format!("{}{}", SNAPSHOT_PREFIX, run_id.as_str())
    }
}

/// Destination URI for the configuration backup:
/// `s3://<bucket>/<key_prefix>.<YYYYmmddHHMMSS>` (UTC).
pub fn backup_destination(bucket: &str, key_prefix: &str, at: DateTime<Utc>) -> String {
    format!(
        "s3://{}/{}.{}",
        bucket,
        key_prefix.trim_start_matches('/'),
        at.format("%Y%m%d%H%M%S")
    )
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackupError {
    #[error("Permission denied: {0}")]
    PermissionDenied(String),
    #[error("Resource not found: {0}")]
    NotFound(String),
    #[error("Snapshot already exists: {0}")]
    AlreadyExists(String),
    #[error("Request throttled: {0}")]
    Throttled(String),
    #[error("Backup command failed: {0}")]
    Command(#[from] CommandError),
}

#[async_trait]
pub trait BackupProvider: Send + Sync {
    /// Create a point-in-time snapshot of `resource_id` named `snapshot_name`.
    async fn create_snapshot(&self, resource_id: &str, snapshot_name: &str) -> Result<SnapshotRecord, BackupError>;

    /// Copy `source_path` to `destination_uri` in durable storage.
    async fn copy_file(&self, source_path: &str, destination_uri: &str) -> Result<(), BackupError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_snapshot_name_uses_run_id_verbatim() {
        let run_id = RunId::new("run-42").unwrap();
        assert_eq!(SnapshotRecord::name_for(&run_id), "pre-upgrade-run-42");
    }

    #[test]
    fn test_backup_destination_timestamp() {
        let at = Utc.with_ymd_and_hms(2026, 2, 18, 12, 38, 4).unwrap();
        assert_eq!(
            backup_destination("nextcloud-data", "backups/config.php", at),
            "s3://nextcloud-data/backups/config.php.20260218123804"
        );
        assert_eq!(
            backup_destination("nextcloud-data", "/backups/config.php", at),
            "s3://nextcloud-data/backups/config.php.20260218123804"
        );
    }
}
