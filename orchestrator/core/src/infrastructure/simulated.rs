// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! In-memory facades
//!
//! Stand-ins for the service control, command runner and backup facades.
//! Used by `nc-upgrade run --dry-run` and by tests. Every call is appended to
//! a shared [`Journal`] so the relative order of side effects across facades
//! can be checked; failures can be injected per call pattern.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use crate::domain::backup::{BackupError, BackupProvider, SnapshotRecord};
use crate::domain::command::{CommandError, CommandOutput, CommandRunner, CommandSpec};
use crate::domain::inventory::UpgradePlan;
use crate::domain::service::{ServiceControl, ServiceControlError, ServiceName};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JournalEntry {
    DesiredCount { service: String, count: u32 },
    RunningCount { service: String, running: u32 },
    Command(CommandSpec),
    Snapshot { resource_id: String, snapshot_name: String },
    Copy { source: String, destination: String },
}

/// Ordered record of facade calls, shared by all simulated adapters
#[derive(Debug, Clone, Default)]
pub struct Journal {
    entries: Arc<Mutex<Vec<JournalEntry>>>,
}

impl Journal {
    pub fn push(&self, entry: JournalEntry) {
        self.entries.lock().push(entry);
    }

    pub fn entries(&self) -> Vec<JournalEntry> {
        self.entries.lock().clone()
    }

    pub fn commands(&self) -> Vec<CommandSpec> {
        self.entries
            .lock()
            .iter()
            .filter_map(|e| match e {
                JournalEntry::Command(spec) => Some(spec.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn desired_counts(&self) -> Vec<(String, u32)> {
        self.entries
            .lock()
            .iter()
            .filter_map(|e| match e {
                JournalEntry::DesiredCount { service, count } => Some((service.clone(), *count)),
                _ => None,
            })
            .collect()
    }

    pub fn snapshots(&self) -> Vec<String> {
        self.entries
            .lock()
            .iter()
            .filter_map(|e| match e {
                JournalEntry::Snapshot { snapshot_name, .. } => Some(snapshot_name.clone()),
                _ => None,
            })
            .collect()
    }

    /// Index of the first entry matching `predicate`
    pub fn position<P>(&self, predicate: P) -> Option<usize>
    where
        P: Fn(&JournalEntry) -> bool,
    {
        self.entries.lock().iter().position(predicate)
    }

    /// Index of the last entry matching `predicate`
    pub fn last_position<P>(&self, predicate: P) -> Option<usize>
    where
        P: Fn(&JournalEntry) -> bool,
    {
        self.entries.lock().iter().rposition(predicate)
    }
}

struct ScaleFailure {
    service: ServiceName,
    count: Option<u32>,
    error: ServiceControlError,
    /// None fails forever
    remaining: Option<u32>,
}

/// Control plane whose instances come up as soon as they are requested,
/// unless a running-count script says otherwise.
pub struct SimulatedServiceControl {
    journal: Journal,
    desired: Mutex<HashMap<ServiceName, u32>>,
    running_script: Mutex<HashMap<ServiceName, VecDeque<u32>>>,
    scale_failures: Mutex<Vec<ScaleFailure>>,
    read_failures: Mutex<HashMap<ServiceName, ServiceControlError>>,
    scale_delay: Mutex<Duration>,
}

impl SimulatedServiceControl {
    pub fn new(journal: Journal) -> Self {
        Self {
            journal,
            desired: Mutex::new(HashMap::new()),
            running_script: Mutex::new(HashMap::new()),
            scale_failures: Mutex::new(Vec::new()),
            read_failures: Mutex::new(HashMap::new()),
            scale_delay: Mutex::new(Duration::ZERO),
        }
    }

    /// Services start at their nominal counts
    pub fn from_plan(journal: Journal, plan: &UpgradePlan) -> Self {
        let control = Self::new(journal);
        {
            let mut desired = control.desired.lock();
            for target in plan.nominal_targets() {
                desired.insert(target.name, target.desired_count);
            }
        }
        control
    }

    /// Successive `running_count` reads for `service`; once exhausted the
    /// desired count is reported.
    pub fn script_running<I>(&self, service: &ServiceName, counts: I)
    where
        I: IntoIterator<Item = u32>,
    {
        self.running_script
            .lock()
            .entry(service.clone())
            .or_default()
            .extend(counts);
    }

    /// Fail every `set_desired_count` on `service` (only for `count` when given)
    pub fn fail_scale(&self, service: &ServiceName, count: Option<u32>, error: ServiceControlError) {
        self.scale_failures.lock().push(ScaleFailure {
            service: service.clone(),
            count,
            error,
            remaining: None,
        });
    }

    /// Like [`Self::fail_scale`], for the next matching call only
    pub fn fail_scale_once(&self, service: &ServiceName, count: Option<u32>, error: ServiceControlError) {
        self.scale_failures.lock().push(ScaleFailure {
            service: service.clone(),
            count,
            error,
            remaining: Some(1),
        });
    }

    /// Every `set_desired_count` call takes `delay` before it applies,
    /// like a control plane round trip
    pub fn set_scale_delay(&self, delay: Duration) {
        *self.scale_delay.lock() = delay;
    }

    pub fn fail_running_count(&self, service: &ServiceName, error: ServiceControlError) {
        self.read_failures.lock().insert(service.clone(), error);
    }

    /// Stop injecting failures
    pub fn clear_failures(&self) {
        self.scale_failures.lock().clear();
        self.read_failures.lock().clear();
    }

    pub fn desired(&self, service: &ServiceName) -> Option<u32> {
        self.desired.lock().get(service).copied()
    }
}

#[async_trait]
impl ServiceControl for SimulatedServiceControl {
    async fn set_desired_count(&self, service: &ServiceName, count: u32) -> Result<(), ServiceControlError> {
        let delay = *self.scale_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        {
            let mut failures = self.scale_failures.lock();
            let matching = failures.iter_mut().find(|f| {
                &f.service == service
                    && f.count.map_or(true, |c| c == count)
                    && f.remaining != Some(0)
            });
            if let Some(failure) = matching {
                if let Some(remaining) = failure.remaining.as_mut() {
                    *remaining -= 1;
                }
                return Err(failure.error.clone());
            }
        }

        self.desired.lock().insert(service.clone(), count);
        self.journal.push(JournalEntry::DesiredCount {
            service: service.to_string(),
            count,
        });
        Ok(())
    }

    async fn running_count(&self, service: &ServiceName) -> Result<u32, ServiceControlError> {
        if let Some(error) = self.read_failures.lock().get(service) {
            return Err(error.clone());
        }

        let scripted = self
            .running_script
            .lock()
            .get_mut(service)
            .and_then(|queue| queue.pop_front());
        let running = match scripted {
            Some(running) => running,
            None => self.desired(service).unwrap_or(0),
        };

        self.journal.push(JournalEntry::RunningCount {
            service: service.to_string(),
            running,
        });
        Ok(running)
    }

    async fn desired_count(&self, service: &ServiceName) -> Result<Option<u32>, ServiceControlError> {
        Ok(self.desired(service))
    }
}

/// Command runner that records commands and exits 0 unless told otherwise
pub struct SimulatedCommandRunner {
    journal: Journal,
    failures: Mutex<Vec<(String, CommandError)>>,
}

impl SimulatedCommandRunner {
    pub fn new(journal: Journal) -> Self {
        Self {
            journal,
            failures: Mutex::new(Vec::new()),
        }
    }

    /// Fail commands whose space-joined argv contains `pattern`.
    /// `NonZeroExit` is reported as a completed command with that status.
    pub fn fail_matching(&self, pattern: impl Into<String>, error: CommandError) {
        self.failures.lock().push((pattern.into(), error));
    }

    pub fn clear_failures(&self) {
        self.failures.lock().clear();
    }
}

#[async_trait]
impl CommandRunner for SimulatedCommandRunner {
    async fn run_command(&self, container: &str, argv: &[String]) -> Result<CommandOutput, CommandError> {
        let spec = CommandSpec::new(container, argv.to_vec());
        let line = spec.display_argv();
        self.journal.push(JournalEntry::Command(spec));

        let failure = self
            .failures
            .lock()
            .iter()
            .find(|(pattern, _)| line.contains(pattern.as_str()))
            .map(|(_, error)| error.clone());

        match failure {
            None => Ok(CommandOutput::success()),
            Some(CommandError::NonZeroExit { code, output }) => Ok(CommandOutput {
                exit_code: code,
                logs: vec![output],
            }),
            Some(error) => Err(error),
        }
    }
}

#[derive(Default)]
struct BackupFailures {
    snapshot: Option<BackupError>,
    copy: Option<BackupError>,
}

pub struct SimulatedBackupProvider {
    journal: Journal,
    failures: Mutex<BackupFailures>,
}

impl SimulatedBackupProvider {
    pub fn new(journal: Journal) -> Self {
        Self {
            journal,
            failures: Mutex::new(BackupFailures::default()),
        }
    }

    pub fn fail_snapshot(&self, error: BackupError) {
        self.failures.lock().snapshot = Some(error);
    }

    pub fn fail_copy(&self, error: BackupError) {
        self.failures.lock().copy = Some(error);
    }
}

#[async_trait]
impl BackupProvider for SimulatedBackupProvider {
    async fn create_snapshot(&self, resource_id: &str, snapshot_name: &str) -> Result<SnapshotRecord, BackupError> {
        if let Some(error) = self.failures.lock().snapshot.clone() {
            return Err(error);
        }
        self.journal.push(JournalEntry::Snapshot {
            resource_id: resource_id.to_string(),
            snapshot_name: snapshot_name.to_string(),
        });
        Ok(SnapshotRecord::new(resource_id, snapshot_name))
    }

    async fn copy_file(&self, source_path: &str, destination_uri: &str) -> Result<(), BackupError> {
        if let Some(error) = self.failures.lock().copy.clone() {
            return Err(error);
        }
        self.journal.push(JournalEntry::Copy {
            source: source_path.to_string(),
            destination: destination_uri.to_string(),
        });
        Ok(())
    }
}

/// Shared journal plus one of each simulated facade
pub struct SimulatedStack {
    pub journal: Journal,
    pub services: Arc<SimulatedServiceControl>,
    pub commands: Arc<SimulatedCommandRunner>,
    pub backups: Arc<SimulatedBackupProvider>,
}

impl SimulatedStack {
    pub fn new(plan: &UpgradePlan) -> Self {
        let journal = Journal::default();
        Self {
            services: Arc::new(SimulatedServiceControl::from_plan(journal.clone(), plan)),
            commands: Arc::new(SimulatedCommandRunner::new(journal.clone())),
            backups: Arc::new(SimulatedBackupProvider::new(journal.clone())),
            journal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(s: &str) -> ServiceName {
        ServiceName::new(s).unwrap()
    }

    #[tokio::test]
    async fn test_running_count_follows_script_then_desired() {
        let control = SimulatedServiceControl::new(Journal::default());
        let primary = name("nextcloud-aio-nextcloud");
        control.set_desired_count(&primary, 1).await.unwrap();
        control.script_running(&primary, [0, 0]);

        assert_eq!(control.running_count(&primary).await.unwrap(), 0);
        assert_eq!(control.running_count(&primary).await.unwrap(), 0);
        assert_eq!(control.running_count(&primary).await.unwrap(), 1);
        assert_eq!(control.desired_count(&primary).await.unwrap(), Some(1));
    }

    #[tokio::test]
    async fn test_scale_failure_only_for_matching_count() {
        let control = SimulatedServiceControl::new(Journal::default());
        let web = name("nextcloud-aio-apache");
        control.fail_scale(&web, Some(0), ServiceControlError::Throttled("rate".to_string()));

        assert!(control.set_desired_count(&web, 0).await.is_err());
        assert!(control.set_desired_count(&web, 2).await.is_ok());
        assert_eq!(control.desired(&web), Some(2));
    }

    #[tokio::test]
    async fn test_scale_failure_once() {
        let control = SimulatedServiceControl::new(Journal::default());
        let notify = name("nextcloud-aio-notify-push");
        control.fail_scale_once(&notify, None, ServiceControlError::Engine("boom".to_string()));

        assert!(control.set_desired_count(&notify, 1).await.is_err());
        assert!(control.set_desired_count(&notify, 1).await.is_ok());
    }

    #[tokio::test]
    async fn test_command_failure_reports_exit_status() {
        let journal = Journal::default();
        let runner = SimulatedCommandRunner::new(journal.clone());
        runner.fail_matching(
            "--on",
            CommandError::NonZeroExit {
                code: 1,
                output: "occ failed".to_string(),
            },
        );

        let argv = vec!["php".to_string(), "occ".to_string(), "--on".to_string()];
        let output = runner.run_command("nextcloud", &argv).await.unwrap();
        assert_eq!(output.exit_code, 1);
        assert_eq!(journal.commands().len(), 1);
    }
}
