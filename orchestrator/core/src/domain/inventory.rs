// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Resource Inventory - static description of the upgraded stack
//
// Defines the configuration schema consumed by the upgrade orchestrator:
// - Kubernetes-style manifest format (apiVersion/kind/metadata/spec)
// - Compute services with nominal counts and scaling bounds
// - Database cluster, storage bucket, cache and network placement
// - Commands run inside the primary application container
// - Workflow timings (drain, scale-down, upgrade, health retry, overall timeout)
//
// Everything here is consumed by the orchestrator as opaque identifiers.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::domain::cache::CacheMode;
use crate::domain::command::CommandSpec;
use crate::domain::service::{ServiceName, ServiceRef, ServiceRole};

pub const API_VERSION: &str = "nextcloud-upgrade/v1";
pub const KIND: &str = "UpgradeStack";

const DEFAULT_IMAGE_TAG: &str = "20260218_123804";

/// Top-level Kubernetes-style stack manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackManifest {
    /// API version (must be "nextcloud-upgrade/v1")
    #[serde(rename = "apiVersion")]
    pub api_version: String,

    /// Resource kind (must be "UpgradeStack")
    pub kind: String,

    pub metadata: ManifestMetadata,

    pub spec: StackSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestMetadata {
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackSpec {
    #[serde(default)]
    pub cluster: ClusterConfig,

    /// Long-running services (exactly one per role)
    #[serde(default = "default_services")]
    pub services: Vec<ServiceDefinition>,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub network: NetworkConfig,

    #[serde(default)]
    pub commands: CommandsConfig,

    #[serde(default)]
    pub timings: WorkflowTimings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceDefinition {
    pub name: ServiceName,

    pub role: ServiceRole,

    /// Container name inside the task (target of one-off commands)
    pub container: String,

    pub image: String,

    /// Desired count restored after an upgrade or a rollback
    pub nominal_count: u32,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_capacity: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_capacity: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Environment passed to new instances
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Docker bind/volume specs (`source:target[:ro]`) mounted into new
    /// instances and into one-off command containers
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Identifier of the snapshotted database cluster
    pub cluster_identifier: String,

    #[serde(default = "default_db_engine")]
    pub engine: String,

    #[serde(default = "default_db_name")]
    pub database_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Durable storage bucket receiving configuration backups
    pub bucket: String,

    /// Key of the backup object; a `.<YYYYmmddHHMMSS>` suffix is appended
    #[serde(default = "default_backup_key_prefix")]
    pub backup_key_prefix: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default)]
    pub mode: CacheMode,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Docker network the instances and one-off tasks join
    #[serde(skip_serializing_if = "Option::is_none")]
    pub docker_network: Option<String>,

    /// Docker socket path (None = auto-detect)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub docker_socket: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandsConfig {
    #[serde(default = "default_maintenance_on")]
    pub maintenance_on: Vec<String>,

    #[serde(default = "default_maintenance_off")]
    pub maintenance_off: Vec<String>,

    /// Configuration file copied by BackupConfig
    #[serde(default = "default_config_path")]
    pub config_path: String,

    /// Copy template; `{source}` and `{destination}` are substituted
    #[serde(default = "default_backup_copy")]
    pub backup_copy: Vec<String>,

    /// Snapshot template; `{resource}` and `{snapshot}` are substituted
    #[serde(default = "default_snapshot")]
    pub snapshot: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowTimings {
    #[serde(default = "default_drain", with = "humantime_serde")]
    pub drain: Duration,

    #[serde(default = "default_scale_down", with = "humantime_serde")]
    pub scale_down: Duration,

    #[serde(default = "default_upgrade", with = "humantime_serde")]
    pub upgrade: Duration,

    #[serde(default = "default_health_retry", with = "humantime_serde")]
    pub health_retry: Duration,

    #[serde(default = "default_overall_timeout", with = "humantime_serde")]
    pub overall_timeout: Duration,

    /// Optional cap on health polls. None polls until the overall timeout.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_health_checks: Option<u32>,
}

/// Shared Nextcloud webroot; occ and config.php live here
const HTML_VOLUME: &str = "nextcloud_aio_nextcloud";
const WEBROOT: &str = "/var/www/html";

fn default_services() -> Vec<ServiceDefinition> {
    vec![
        ServiceDefinition {
            name: ServiceName::from_static("nextcloud-aio-nextcloud"),
            role: ServiceRole::Primary,
            container: "nextcloud".to_string(),
            image: format!("ghcr.io/nextcloud-releases/aio-nextcloud:{}", DEFAULT_IMAGE_TAG),
            nominal_count: 2,
            min_capacity: Some(2),
            max_capacity: Some(10),
            port: Some(9000),
            env: HashMap::new(),
            volumes: vec![format!("{}:{}", HTML_VOLUME, WEBROOT)],
        },
        ServiceDefinition {
            name: ServiceName::from_static("nextcloud-aio-apache"),
            role: ServiceRole::Web,
            container: "apache".to_string(),
            image: format!("ghcr.io/nextcloud-releases/aio-apache:{}", DEFAULT_IMAGE_TAG),
            nominal_count: 2,
            min_capacity: Some(2),
            max_capacity: Some(5),
            port: Some(11000),
            env: HashMap::new(),
            volumes: vec![
                format!("{}:{}:ro", HTML_VOLUME, WEBROOT),
                "nextcloud_aio_apache:/mnt/data".to_string(),
            ],
        },
        ServiceDefinition {
            name: ServiceName::from_static("nextcloud-aio-notify-push"),
            role: ServiceRole::Notify,
            container: "notify-push".to_string(),
            image: format!("ghcr.io/nextcloud-releases/aio-notify-push:{}", DEFAULT_IMAGE_TAG),
            nominal_count: 1,
            min_capacity: None,
            max_capacity: None,
            port: Some(7867),
            env: HashMap::new(),
            volumes: vec![format!("{}:{}:ro", HTML_VOLUME, WEBROOT)],
        },
    ]
}

fn default_db_engine() -> String {
    "aurora-postgresql".to_string()
}

fn default_db_name() -> String {
    "nextcloud_database".to_string()
}

fn default_backup_key_prefix() -> String {
    "backups/config.php".to_string()
}

fn default_maintenance_on() -> Vec<String> {
    occ(&["maintenance:mode", "--on"])
}

fn default_maintenance_off() -> Vec<String> {
    occ(&["maintenance:mode", "--off"])
}

fn occ(args: &[&str]) -> Vec<String> {
    ["php", "/var/www/html/occ"]
        .iter()
        .chain(args.iter())
        .map(|s| s.to_string())
        .collect()
}

fn default_config_path() -> String {
    "/var/www/html/config/config.php".to_string()
}

fn default_backup_copy() -> Vec<String> {
    vec![
        "sh".to_string(),
        "-c".to_string(),
        "aws s3 cp {source} {destination}".to_string(),
    ]
}

fn default_snapshot() -> Vec<String> {
    [
        "aws",
        "rds",
        "create-db-cluster-snapshot",
        "--db-cluster-identifier",
        "{resource}",
        "--db-cluster-snapshot-identifier",
        "{snapshot}",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_drain() -> Duration {
    Duration::from_secs(30)
}

fn default_scale_down() -> Duration {
    Duration::from_secs(60)
}

fn default_upgrade() -> Duration {
    Duration::from_secs(180)
}

fn default_health_retry() -> Duration {
    Duration::from_secs(60)
}

fn default_overall_timeout() -> Duration {
    Duration::from_secs(2 * 60 * 60)
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            name: "nextcloud-aio".to_string(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            cluster_identifier: "nextcloud-aio-db".to_string(),
            engine: default_db_engine(),
            database_name: default_db_name(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            bucket: "nextcloud-aio-data".to_string(),
            backup_key_prefix: default_backup_key_prefix(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            mode: CacheMode::Standalone,
            endpoint: None,
        }
    }
}

impl Default for CommandsConfig {
    fn default() -> Self {
        Self {
            maintenance_on: default_maintenance_on(),
            maintenance_off: default_maintenance_off(),
            config_path: default_config_path(),
            backup_copy: default_backup_copy(),
            snapshot: default_snapshot(),
        }
    }
}

impl Default for WorkflowTimings {
    fn default() -> Self {
        Self {
            drain: default_drain(),
            scale_down: default_scale_down(),
            upgrade: default_upgrade(),
            health_retry: default_health_retry(),
            overall_timeout: default_overall_timeout(),
            max_health_checks: None,
        }
    }
}

impl Default for StackSpec {
    fn default() -> Self {
        Self {
            cluster: ClusterConfig::default(),
            services: default_services(),
            database: DatabaseConfig::default(),
            storage: StorageConfig::default(),
            cache: CacheConfig::default(),
            network: NetworkConfig::default(),
            commands: CommandsConfig::default(),
            timings: WorkflowTimings::default(),
        }
    }
}

impl Default for StackManifest {
    fn default() -> Self {
        Self {
            api_version: API_VERSION.to_string(),
            kind: KIND.to_string(),
            metadata: ManifestMetadata {
                name: "nextcloud-aio".to_string(),
                labels: None,
            },
            spec: StackSpec::default(),
        }
    }
}

impl StackManifest {
    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml_str(&content)
    }

    pub fn to_yaml_file(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        let manifest: Self = serde_yaml::from_str(yaml)?;
        Ok(manifest)
    }

    /// Discover a configuration file
    ///
    /// Order: `NC_UPGRADE_CONFIG` → `./nc-upgrade.yaml` →
    /// `~/.nc-upgrade/config.yaml` → `/etc/nc-upgrade/config.yaml`
    pub fn discover_config() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("NC_UPGRADE_CONFIG") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        let cwd_config = PathBuf::from("./nc-upgrade.yaml");
        if cwd_config.exists() {
            return Some(cwd_config);
        }

        if let Some(home) = dirs::home_dir() {
            let home_config = home.join(".nc-upgrade").join("config.yaml");
            if home_config.exists() {
                return Some(home_config);
            }
        }

        let system_config = PathBuf::from("/etc/nc-upgrade/config.yaml");
        if system_config.exists() {
            return Some(system_config);
        }

        None
    }

    /// Load configuration with discovery, fallback to default
    pub fn load_or_default(cli_path: Option<PathBuf>) -> anyhow::Result<Self> {
        // 1. Explicit CLI path (fail if missing/invalid)
        if let Some(path) = cli_path {
            tracing::info!("Loading configuration from explicit path: {:?}", path);
            let mut config = Self::from_yaml_file(&path).map_err(|e| {
                anyhow::anyhow!("Failed to load config at {:?}: {}", path, e)
            })?;
            config.apply_env_overrides();
            return Ok(config);
        }

        // 2. Discovery (Env -> Cwd -> Home -> System)
        if let Some(config_path) = Self::discover_config() {
            tracing::info!("Loading configuration from discovered path: {:?}", config_path);
            let mut config = Self::from_yaml_file(config_path)?;
            config.apply_env_overrides();
            Ok(config)
        } else {
            tracing::warn!("No configuration file found in standard locations. Using built-in defaults.");
            let mut config = Self::default();
            config.apply_env_overrides();
            Ok(config)
        }
    }

    /// Apply environment variable overrides to configuration
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(bucket) = lookup("NC_UPGRADE_BUCKET").filter(|v| !v.is_empty()) {
            tracing::info!("Environment override: NC_UPGRADE_BUCKET={}", bucket);
            self.spec.storage.bucket = bucket;
        }
        if let Some(db) = lookup("NC_UPGRADE_DB_CLUSTER").filter(|v| !v.is_empty()) {
            tracing::info!("Environment override: NC_UPGRADE_DB_CLUSTER={}", db);
            self.spec.database.cluster_identifier = db;
        }
        if let Some(network) = lookup("NC_UPGRADE_DOCKER_NETWORK").filter(|v| !v.is_empty()) {
            tracing::info!("Environment override: NC_UPGRADE_DOCKER_NETWORK={}", network);
            self.spec.network.docker_network = Some(network);
        }
    }

    pub fn service(&self, role: ServiceRole) -> Option<&ServiceDefinition> {
        self.spec.services.iter().find(|s| s.role == role)
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.api_version != API_VERSION {
            anyhow::bail!(
                "Invalid apiVersion: '{}'. Must be '{}'",
                self.api_version,
                API_VERSION
            );
        }

        if self.kind != KIND {
            anyhow::bail!("Invalid kind: '{}'. Must be '{}'", self.kind, KIND);
        }

        if self.metadata.name.is_empty() {
            anyhow::bail!("metadata.name cannot be empty");
        }

        if self.spec.cluster.name.is_empty() {
            anyhow::bail!("spec.cluster.name cannot be empty");
        }

        for role in [ServiceRole::Primary, ServiceRole::Web, ServiceRole::Notify] {
            let count = self.spec.services.iter().filter(|s| s.role == role).count();
            if count != 1 {
                anyhow::bail!("Exactly one {} service is required, found {}", role, count);
            }
        }

        let mut seen = std::collections::HashSet::new();
        for service in &self.spec.services {
            if !seen.insert(service.name.as_str()) {
                anyhow::bail!("Duplicate service name: {}", service.name);
            }
            if service.container.is_empty() {
                anyhow::bail!("Container name cannot be empty for service: {}", service.name);
            }
            if service.image.is_empty() {
                anyhow::bail!("Image cannot be empty for service: {}", service.name);
            }
            if service.nominal_count == 0 {
                anyhow::bail!("Nominal count must be at least 1 for service: {}", service.name);
            }
            if let (Some(min), Some(max)) = (service.min_capacity, service.max_capacity) {
                if min > max {
                    anyhow::bail!(
                        "min_capacity {} exceeds max_capacity {} for service: {}",
                        min, max, service.name
                    );
                }
            }
            if let Some(min) = service.min_capacity {
                if service.nominal_count < min {
                    anyhow::bail!(
                        "Nominal count {} is below min_capacity {} for service: {}",
                        service.nominal_count, min, service.name
                    );
                }
            }
            if let Some(max) = service.max_capacity {
                if service.nominal_count > max {
                    anyhow::bail!(
                        "Nominal count {} exceeds max_capacity {} for service: {}",
                        service.nominal_count, max, service.name
                    );
                }
            }
            for volume in &service.volumes {
                let mut parts = volume.split(':');
                let source = parts.next().unwrap_or_default();
                let target = parts.next().unwrap_or_default();
                if source.is_empty() || !target.starts_with('/') {
                    anyhow::bail!(
                        "Invalid volume '{}' for service {}: expected source:/path[:ro]",
                        volume, service.name
                    );
                }
            }
        }

        if self.spec.database.cluster_identifier.is_empty() {
            anyhow::bail!("spec.database.cluster_identifier cannot be empty");
        }

        if self.spec.storage.bucket.is_empty() {
            anyhow::bail!("spec.storage.bucket cannot be empty");
        }

        let commands = &self.spec.commands;
        if commands.maintenance_on.is_empty() || commands.maintenance_off.is_empty() {
            anyhow::bail!("Maintenance commands cannot be empty");
        }
        if commands.backup_copy.is_empty() || commands.snapshot.is_empty() {
            anyhow::bail!("Backup and snapshot command templates cannot be empty");
        }
        if commands.config_path.is_empty() {
            anyhow::bail!("spec.commands.config_path cannot be empty");
        }

        let timings = &self.spec.timings;
        if timings.health_retry.is_zero() {
            anyhow::bail!("spec.timings.health_retry must be greater than zero");
        }
        if timings.overall_timeout.is_zero() {
            anyhow::bail!("spec.timings.overall_timeout must be greater than zero");
        }
        if timings.max_health_checks == Some(0) {
            anyhow::bail!("spec.timings.max_health_checks must be at least 1 when set");
        }

        Ok(())
    }
}

/// Everything the orchestrator needs from the inventory, resolved once.
#[derive(Debug, Clone)]
pub struct UpgradePlan {
    pub primary: ServiceRef,
    pub web: ServiceRef,
    pub notify: ServiceRef,
    pub maintenance_on: CommandSpec,
    pub maintenance_off: CommandSpec,
    pub database_id: String,
    pub config_path: String,
    pub bucket: String,
    pub backup_key_prefix: String,
    pub timings: WorkflowTimings,
}

impl UpgradePlan {
    pub fn from_manifest(manifest: &StackManifest) -> anyhow::Result<Self> {
        manifest.validate()?;

        let service_ref = |role: ServiceRole| -> anyhow::Result<(ServiceRef, String)> {
            let service = manifest
                .service(role)
                .ok_or_else(|| anyhow::anyhow!("No {} service in inventory", role))?;
            Ok((
                ServiceRef::new(service.name.clone(), service.nominal_count),
                service.container.clone(),
            ))
        };

        let (primary, primary_container) = service_ref(ServiceRole::Primary)?;
        let (web, _) = service_ref(ServiceRole::Web)?;
        let (notify, _) = service_ref(ServiceRole::Notify)?;
        let commands = &manifest.spec.commands;

        Ok(Self {
            primary,
            web,
            notify,
            maintenance_on: CommandSpec::new(primary_container.clone(), commands.maintenance_on.clone()),
            maintenance_off: CommandSpec::new(primary_container, commands.maintenance_off.clone()),
            database_id: manifest.spec.database.cluster_identifier.clone(),
            config_path: commands.config_path.clone(),
            bucket: manifest.spec.storage.bucket.clone(),
            backup_key_prefix: manifest.spec.storage.backup_key_prefix.clone(),
            timings: manifest.spec.timings.clone(),
        })
    }

    /// Nominal counts restored by ScaleUpAll and by the rollback branch
    pub fn nominal_targets(&self) -> Vec<ServiceRef> {
        vec![self.primary.clone(), self.web.clone(), self.notify.clone()]
    }

    pub fn scale_down_targets(&self) -> Vec<ServiceRef> {
        self.nominal_targets()
            .iter()
            .map(|svc| svc.with_count(0))
            .collect()
    }
}
