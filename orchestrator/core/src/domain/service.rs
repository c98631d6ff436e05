// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Service Control Facade
//!
//! Abstraction over "scale a named service to N running instances" and
//! "describe its current running count". Adapters live in
//! `crate::infrastructure` (Docker engine, in-memory simulation).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Name of a long-running service (e.g. `nextcloud-aio-nextcloud`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ServiceName(String);

impl ServiceName {
    pub fn new(name: impl Into<String>) -> Result<Self, ServiceControlError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(ServiceControlError::InvalidServiceName(
                "Service name cannot be empty".to_string(),
            ));
        }
        if name.chars().any(char::is_whitespace) {
            return Err(ServiceControlError::InvalidServiceName(format!(
                "Service name '{}' must not contain whitespace",
                name
            )));
        }
        Ok(Self(name))
    }

    /// Built-in inventory names, known to be valid
    pub(crate) fn from_static(name: &'static str) -> Self {
        Self(name.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ServiceName {
    type Error = ServiceControlError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ServiceName> for String {
    fn from(value: ServiceName) -> Self {
        value.0
    }
}

impl fmt::Display for ServiceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Role a service plays in the upgrade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceRole {
    /// Application service that runs the upgrade and one-off commands
    Primary,
    /// Web tier in front of the primary service
    Web,
    /// Push notification service
    Notify,
}

impl fmt::Display for ServiceRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ServiceRole::Primary => "primary",
            ServiceRole::Web => "web",
            ServiceRole::Notify => "notify",
        };
        f.write_str(label)
    }
}

/// Name + desired-count pair used to command the facade.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRef {
    pub name: ServiceName,
    pub desired_count: u32,
}

impl ServiceRef {
    pub fn new(name: ServiceName, desired_count: u32) -> Self {
        Self { name, desired_count }
    }

    /// Same service, different target count
    pub fn with_count(&self, desired_count: u32) -> Self {
        Self {
            name: self.name.clone(),
            desired_count,
        }
    }
}

/// Transient read of a service's running-instance count. Never persisted
/// beyond the run history; re-fetched on every poll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthObservation {
    pub service: ServiceName,
    pub running_count: u32,
    pub observed_at: DateTime<Utc>,
}

impl HealthObservation {
    pub fn new(service: ServiceName, running_count: u32) -> Self {
        Self {
            service,
            running_count,
            observed_at: Utc::now(),
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.running_count >= 1
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServiceControlError {
    #[error("Invalid service name: {0}")]
    InvalidServiceName(String),
    #[error("Service not found: {0}")]
    NotFound(String),
    #[error("Permission denied: {0}")]
    PermissionDenied(String),
    #[error("Request throttled: {0}")]
    Throttled(String),
    #[error("Orchestration engine error: {0}")]
    Engine(String),
}

#[async_trait]
pub trait ServiceControl: Send + Sync {
    /// Set the number of instances the control plane should keep running.
    async fn set_desired_count(&self, service: &ServiceName, count: u32) -> Result<(), ServiceControlError>;

    /// Number of instances currently running.
    async fn running_count(&self, service: &ServiceName) -> Result<u32, ServiceControlError>;

    /// Desired count as known to the control plane, if it tracks one.
    async fn desired_count(&self, service: &ServiceName) -> Result<Option<u32>, ServiceControlError>;
}
