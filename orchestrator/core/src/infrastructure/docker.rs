// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Docker adapters for the service control and command runner facades.
//!
//! A service is the set of containers labelled
//! `nextcloud-upgrade.service=<name>`; its desired count is reconciled by
//! creating or removing labelled containers. One-off commands run in a fresh
//! container of the service image with a command override, mirroring a
//! run-task-with-override on a managed container platform. Both mount the
//! service's volumes, so occ and config.php see the shared webroot.

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, ListContainersOptions, LogOutput, LogsOptions,
    RemoveContainerOptions, StartContainerOptions, WaitContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::models::ContainerSummary;
use bollard::Docker;
use futures::StreamExt;
use std::collections::HashMap;
use tracing::{debug, info, warn};

use crate::domain::command::{CommandError, CommandOutput, CommandRunner};
use crate::domain::inventory::{ServiceDefinition, StackManifest};
use crate::domain::service::{ServiceControl, ServiceControlError, ServiceName};

pub const SERVICE_LABEL: &str = "nextcloud-upgrade.service";
pub const ONE_OFF_LABEL: &str = "nextcloud-upgrade.one-off";

/// Connect to the Docker daemon (custom socket or auto-detect)
pub fn connect_docker(socket_path: Option<&str>) -> Result<Docker, bollard::errors::Error> {
    match socket_path {
        Some(path) => {
            #[cfg(unix)]
            let result = Docker::connect_with_unix(path, 120, bollard::API_DEFAULT_VERSION);

            #[cfg(windows)]
            let result = Docker::connect_with_named_pipe(path, 120, bollard::API_DEFAULT_VERSION);

            result
        }
        None => Docker::connect_with_local_defaults(),
    }
}

fn short_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..8].to_string()
}

fn env_list(env: &HashMap<String, String>) -> Vec<String> {
    let mut vars: Vec<String> = env.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
    vars.sort();
    vars
}

fn map_service_error(e: bollard::errors::Error) -> ServiceControlError {
    match e {
        bollard::errors::Error::DockerResponseServerError { status_code, message } => match status_code {
            403 => ServiceControlError::PermissionDenied(message),
            404 => ServiceControlError::NotFound(message),
            429 => ServiceControlError::Throttled(message),
            _ => ServiceControlError::Engine(format!("{} (status {})", message, status_code)),
        },
        other => ServiceControlError::Engine(other.to_string()),
    }
}

/// Network placement and volume mounts shared by instances and one-off tasks
fn host_config(definition: &ServiceDefinition, network_mode: Option<String>) -> bollard::service::HostConfig {
    bollard::service::HostConfig {
        network_mode,
        binds: (!definition.volumes.is_empty()).then(|| definition.volumes.clone()),
        ..Default::default()
    }
}

/// Pull `image` unless it is already present locally
async fn ensure_image(docker: &Docker, image: &str) -> Result<(), bollard::errors::Error> {
    if docker.inspect_image(image).await.is_ok() {
        return Ok(());
    }

    info!("Pulling image: {}", image);
    let options = Some(CreateImageOptions {
        from_image: image.to_string(),
        ..Default::default()
    });
    let mut stream = docker.create_image(options, None, None);
    while let Some(result) = stream.next().await {
        result?;
    }
    info!("Successfully pulled image: {}", image);
    Ok(())
}

pub struct DockerServiceControl {
    docker: Docker,
    services: HashMap<ServiceName, ServiceDefinition>,
    network_mode: Option<String>,
}

impl DockerServiceControl {
    pub fn new(docker: Docker, manifest: &StackManifest) -> Self {
        let services = manifest
            .spec
            .services
            .iter()
            .map(|s| (s.name.clone(), s.clone()))
            .collect();
        Self {
            docker,
            services,
            network_mode: manifest.spec.network.docker_network.clone(),
        }
    }

    fn definition(&self, service: &ServiceName) -> Result<&ServiceDefinition, ServiceControlError> {
        self.services
            .get(service)
            .ok_or_else(|| ServiceControlError::NotFound(service.to_string()))
    }

    async fn instances(&self, service: &ServiceName) -> Result<Vec<ContainerSummary>, ServiceControlError> {
        let mut filters = HashMap::new();
        filters.insert(
            "label".to_string(),
            vec![format!("{}={}", SERVICE_LABEL, service)],
        );
        let options = ListContainersOptions {
            all: true,
            filters,
            ..Default::default()
        };
        self.docker
            .list_containers(Some(options))
            .await
            .map_err(map_service_error)
    }

    async fn remove(&self, id: &str) -> Result<(), ServiceControlError> {
        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        self.docker
            .remove_container(id, Some(options))
            .await
            .map_err(map_service_error)
    }

    async fn start_instance(&self, definition: &ServiceDefinition) -> Result<String, ServiceControlError> {
        ensure_image(&self.docker, &definition.image)
            .await
            .map_err(map_service_error)?;

        let name = format!("{}-{}", definition.name, short_id());
        let mut labels = HashMap::new();
        labels.insert(SERVICE_LABEL.to_string(), definition.name.to_string());

        let config = Config {
            image: Some(definition.image.clone()),
            env: Some(env_list(&definition.env)),
            labels: Some(labels),
            host_config: Some(host_config(definition, self.network_mode.clone())),
            ..Default::default()
        };
        let options = CreateContainerOptions {
            name: name.clone(),
            platform: None,
        };

        let created = self
            .docker
            .create_container(Some(options), config)
            .await
            .map_err(map_service_error)?;
        self.docker
            .start_container(&created.id, None::<StartContainerOptions<String>>)
            .await
            .map_err(map_service_error)?;

        info!(service = %definition.name, container = %name, "Started service instance");
        Ok(created.id)
    }
}

fn is_running(summary: &ContainerSummary) -> bool {
    summary.state.as_deref() == Some("running")
}

/// Instances the engine is still keeping: running, or on the way there.
/// Exited and dead containers never come back on their own.
fn is_live(summary: &ContainerSummary) -> bool {
    matches!(
        summary.state.as_deref(),
        Some("created") | Some("restarting") | Some("running") | Some("paused")
    )
}

#[async_trait]
impl ServiceControl for DockerServiceControl {
    async fn set_desired_count(&self, service: &ServiceName, count: u32) -> Result<(), ServiceControlError> {
        let definition = self.definition(service)?;
        let instances = self.instances(service).await?;

        let (live, stopped): (Vec<_>, Vec<_>) = instances.into_iter().partition(is_live);
        for summary in stopped {
            if let Some(id) = summary.id.as_deref() {
                self.remove(id).await?;
            }
        }

        let current = live.len() as u32;
        debug!(service = %service, current, desired = count, "Reconciling desired count");

        if current > count {
            for summary in live.iter().skip(count as usize) {
                if let Some(id) = summary.id.as_deref() {
                    self.remove(id).await?;
                    info!(service = %service, container = %id, "Removed service instance");
                }
            }
        } else {
            for _ in current..count {
                self.start_instance(definition).await?;
            }
        }
        Ok(())
    }

    async fn running_count(&self, service: &ServiceName) -> Result<u32, ServiceControlError> {
        self.definition(service)?;
        let instances = self.instances(service).await?;
        Ok(instances.iter().filter(|s| is_running(s)).count() as u32)
    }

    /// Live labelled instances; reconciliation keeps this equal to the last
    /// requested count until an instance exits.
    async fn desired_count(&self, service: &ServiceName) -> Result<Option<u32>, ServiceControlError> {
        self.definition(service)?;
        let instances = self.instances(service).await?;
        Ok(Some(instances.iter().filter(|s| is_live(s)).count() as u32))
    }
}

/// Runs one-off commands in a new container of the target service's image
pub struct DockerCommandRunner {
    docker: Docker,
    /// Container name -> definition of the service it belongs to
    containers: HashMap<String, ServiceDefinition>,
    network_mode: Option<String>,
}

impl DockerCommandRunner {
    pub fn new(docker: Docker, manifest: &StackManifest) -> Self {
        let containers = manifest
            .spec
            .services
            .iter()
            .map(|s| (s.container.clone(), s.clone()))
            .collect();
        Self {
            docker,
            containers,
            network_mode: manifest.spec.network.docker_network.clone(),
        }
    }

    async fn collect_logs(&self, id: &str) -> Vec<String> {
        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            tail: "all".to_string(),
            ..Default::default()
        };
        let mut logs = Vec::new();
        let mut stream = Box::pin(self.docker.logs(id, Some(options)));
        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(LogOutput::StdOut { message }) | Ok(LogOutput::StdErr { message }) => {
                    logs.push(String::from_utf8_lossy(&message).to_string());
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(container = %id, "Failed to read command logs: {}", e);
                    break;
                }
            }
        }
        logs
    }

    async fn wait_exit_code(&self, id: &str) -> Result<i64, CommandError> {
        let mut stream = Box::pin(self.docker.wait_container(id, None::<WaitContainerOptions<String>>));
        match stream.next().await {
            Some(Ok(response)) => Ok(response.status_code),
            Some(Err(bollard::errors::Error::DockerContainerWaitError { code, .. })) => Ok(code),
            Some(Err(e)) => Err(CommandError::Engine(e.to_string())),
            None => Err(CommandError::Engine(format!("No exit status reported for {}", id))),
        }
    }
}

#[async_trait]
impl CommandRunner for DockerCommandRunner {
    async fn run_command(&self, container: &str, argv: &[String]) -> Result<CommandOutput, CommandError> {
        if argv.is_empty() {
            return Err(CommandError::EmptyCommand);
        }
        let definition = self
            .containers
            .get(container)
            .ok_or_else(|| CommandError::UnknownContainer(container.to_string()))?;

        ensure_image(&self.docker, &definition.image)
            .await
            .map_err(|e| CommandError::SpawnFailed(format!("Failed to pull {}: {}", definition.image, e)))?;

        let mut labels = HashMap::new();
        labels.insert(ONE_OFF_LABEL.to_string(), container.to_string());

        let config = Config {
            image: Some(definition.image.clone()),
            cmd: Some(argv.to_vec()),
            env: Some(env_list(&definition.env)),
            labels: Some(labels),
            host_config: Some(host_config(definition, self.network_mode.clone())),
            ..Default::default()
        };
        let options = CreateContainerOptions {
            name: format!("{}-oneoff-{}", container, short_id()),
            platform: None,
        };

        let created = self
            .docker
            .create_container(Some(options), config)
            .await
            .map_err(|e| CommandError::SpawnFailed(e.to_string()))?;
        let id = created.id;

        info!(container = %container, command = %argv.join(" "), "Running one-off command");

        let result = match self
            .docker
            .start_container(&id, None::<StartContainerOptions<String>>)
            .await
        {
            Ok(()) => self.wait_exit_code(&id).await,
            Err(e) => Err(CommandError::SpawnFailed(e.to_string())),
        };
        let logs = self.collect_logs(&id).await;

        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        if let Err(e) = self.docker.remove_container(&id, Some(options)).await {
            warn!(container = %id, "Failed to remove one-off container: {}", e);
        }

        let exit_code = result?;
        debug!(container = %container, exit_code, "One-off command finished");
        Ok(CommandOutput { exit_code, logs })
    }
}
