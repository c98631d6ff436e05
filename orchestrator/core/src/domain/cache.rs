// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Cache Backend Selector
//!
//! Derives the distributed/locking cache configuration the application reads
//! at boot from `REDIS_*` environment variables. `REDIS_MODE=rediscluster`
//! selects a cluster with up to nine seeds; anything else selects a single
//! standalone endpoint.
//!
//! Values follow the application's truthiness rules: an unset variable, an
//! empty string and `"0"` all count as absent, and integer fields take the
//! leading digits of the value (`0` when there are none).

use serde::{Deserialize, Serialize};
use std::fmt;

pub const REDIS_BACKEND: &str = "\\OC\\Memcache\\Redis";

const CLUSTER_MODE: &str = "rediscluster";
const AUTH_SEPARATOR: &str = "&auth[]=";
const MAX_SEEDS: u32 = 9;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheMode {
    #[default]
    Standalone,
    Cluster,
}

impl fmt::Display for CacheMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheMode::Standalone => f.write_str("standalone"),
            CacheMode::Cluster => f.write_str("cluster"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsOptions {
    pub verify_peer: bool,
    pub verify_peer_name: bool,
}

impl TlsOptions {
    fn verified() -> Self {
        Self {
            verify_peer: true,
            verify_peer_name: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StandaloneCache {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dbindex: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ssl: Option<TlsOptions>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailoverMode {
    /// Only the primary of a shard serves reads
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterCache {
    pub timeout: f64,
    pub read_timeout: f64,
    pub failover_mode: FailoverMode,
    pub seeds: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ssl: Option<TlsOptions>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
}

/// Boot-time cache configuration, keyed the way the application expects it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheBackendConfig {
    #[serde(rename = "memcache.distributed")]
    pub distributed: String,
    #[serde(rename = "memcache.locking")]
    pub locking: String,
    #[serde(rename = "redis", skip_serializing_if = "Option::is_none")]
    pub standalone: Option<StandaloneCache>,
    #[serde(rename = "redis.cluster", skip_serializing_if = "Option::is_none")]
    pub cluster: Option<ClusterCache>,
}

impl CacheBackendConfig {
    /// Select the backend from the process environment
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        // Unlike the other variables, the mode compares against the raw value
        let mode = match lookup("REDIS_MODE").as_deref() {
            Some(CLUSTER_MODE) => CacheMode::Cluster,
            _ => CacheMode::Standalone,
        };
        let env = |key: &str| lookup(key).filter(|v| is_truthy(v));
        let tls = lookup("REDIS_TLS_ENABLED").as_deref() == Some("true");
        let password = env("REDIS_HOST_PASSWORD");
        let user = env("REDIS_USER_AUTH").map(|u| u.replace(AUTH_SEPARATOR, ""));

        let (standalone, cluster) = match mode {
            CacheMode::Standalone => {
                let mut host = env("REDIS_HOST");
                if tls {
                    host = Some(format!("tls://{}", host.unwrap_or_default()));
                }
                let config = StandaloneCache {
                    host,
                    password,
                    port: env("REDIS_PORT").map(|p| parse_int(&p)),
                    dbindex: env("REDIS_DB_INDEX").map(|i| parse_int(&i)),
                    user,
                    ssl: tls.then(TlsOptions::verified),
                };
                (Some(config), None)
            }
            CacheMode::Cluster => {
                let seeds = (1..=MAX_SEEDS)
                    .filter_map(|n| {
                        let suffix = if n == 1 { String::new() } else { format!("_{}", n) };
                        let host = env(&format!("REDIS_HOST{}", suffix))?;
                        let port = env(&format!("REDIS_PORT{}", suffix))?;
                        Some(format!("{}:{}", host, port))
                    })
                    .map(|seed| if tls { format!("tls://{}", seed) } else { seed })
                    .collect();
                let config = ClusterCache {
                    timeout: 0.0,
                    read_timeout: 0.0,
                    failover_mode: FailoverMode::Error,
                    seeds,
                    ssl: tls.then(TlsOptions::verified),
                    password,
                    user,
                };
                (None, Some(config))
            }
        };

        Self {
            distributed: REDIS_BACKEND.to_string(),
            locking: REDIS_BACKEND.to_string(),
            standalone,
            cluster,
        }
    }

    pub fn mode(&self) -> CacheMode {
        if self.cluster.is_some() {
            CacheMode::Cluster
        } else {
            CacheMode::Standalone
        }
    }
}

fn is_truthy(value: &str) -> bool {
    !value.is_empty() && value != "0"
}

/// Leading-digit integer parse; `0` when the value has no numeric prefix.
fn parse_int(value: &str) -> i64 {
    let trimmed = value.trim_start();
    let (sign, digits) = match trimmed.strip_prefix('-') {
        Some(rest) => (-1, rest),
        None => (1, trimmed.strip_prefix('+').unwrap_or(trimmed)),
    };
    let end = digits
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(digits.len());
    digits[..end].parse::<i64>().map(|n| sign * n).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_standalone_defaults_when_mode_unset() {
        let config = CacheBackendConfig::from_lookup(lookup(&[
            ("REDIS_HOST", "valkey.internal"),
            ("REDIS_PORT", "6379"),
            ("REDIS_DB_INDEX", "2"),
            ("REDIS_HOST_PASSWORD", "secret"),
        ]));
        assert_eq!(config.mode(), CacheMode::Standalone);
        assert_eq!(config.distributed, "\\OC\\Memcache\\Redis");
        let redis = config.standalone.unwrap();
        assert_eq!(redis.host.as_deref(), Some("valkey.internal"));
        assert_eq!(redis.port, Some(6379));
        assert_eq!(redis.dbindex, Some(2));
        assert_eq!(redis.password.as_deref(), Some("secret"));
        assert!(redis.ssl.is_none());
        assert!(config.cluster.is_none());
    }

    #[test]
    fn test_standalone_tls_and_user_auth() {
        let config = CacheBackendConfig::from_lookup(lookup(&[
            ("REDIS_MODE", "standalone"),
            ("REDIS_HOST", "valkey.internal"),
            ("REDIS_USER_AUTH", "&auth[]=nextcloud"),
            ("REDIS_TLS_ENABLED", "true"),
        ]));
        let redis = config.standalone.unwrap();
        assert_eq!(redis.host.as_deref(), Some("tls://valkey.internal"));
        assert_eq!(redis.user.as_deref(), Some("nextcloud"));
        assert_eq!(
            redis.ssl,
            Some(TlsOptions {
                verify_peer: true,
                verify_peer_name: true
            })
        );
    }

    #[test]
    fn test_empty_and_zero_values_count_as_unset() {
        let config = CacheBackendConfig::from_lookup(lookup(&[
            ("REDIS_HOST", ""),
            ("REDIS_DB_INDEX", "0"),
            ("REDIS_PORT", "abc"),
        ]));
        let redis = config.standalone.unwrap();
        assert!(redis.host.is_none());
        assert!(redis.dbindex.is_none());
        assert_eq!(redis.port, Some(0));
    }

    #[test]
    fn test_cluster_seeds_require_host_and_port() {
        let config = CacheBackendConfig::from_lookup(lookup(&[
            ("REDIS_MODE", "rediscluster"),
            ("REDIS_HOST", "node-1"),
            ("REDIS_PORT", "6379"),
            ("REDIS_HOST_2", "node-2"),
            ("REDIS_HOST_3", "node-3"),
            ("REDIS_PORT_3", "6380"),
            ("REDIS_HOST_9", "node-9"),
            ("REDIS_PORT_9", "6381"),
            ("REDIS_USER_AUTH", "&auth[]=nc&auth[]=pw"),
        ]));
        assert_eq!(config.mode(), CacheMode::Cluster);
        let cluster = config.cluster.unwrap();
        assert_eq!(cluster.seeds, vec!["node-1:6379", "node-3:6380", "node-9:6381"]);
        assert_eq!(cluster.timeout, 0.0);
        assert_eq!(cluster.read_timeout, 0.0);
        assert_eq!(cluster.failover_mode, FailoverMode::Error);
        assert_eq!(cluster.user.as_deref(), Some("ncpw"));
        assert!(cluster.ssl.is_none());
        assert!(config.standalone.is_none());
    }

    #[test]
    fn test_cluster_tls_prefixes_every_seed() {
        let config = CacheBackendConfig::from_lookup(lookup(&[
            ("REDIS_MODE", "rediscluster"),
            ("REDIS_HOST", "node-1"),
            ("REDIS_PORT", "6379"),
            ("REDIS_HOST_2", "node-2"),
            ("REDIS_PORT_2", "6379"),
            ("REDIS_TLS_ENABLED", "true"),
        ]));
        let cluster = config.cluster.unwrap();
        assert_eq!(cluster.seeds, vec!["tls://node-1:6379", "tls://node-2:6379"]);
        assert!(cluster.ssl.is_some());
    }

    #[test]
    fn test_json_keys() {
        let config = CacheBackendConfig::from_lookup(lookup(&[
            ("REDIS_MODE", "rediscluster"),
            ("REDIS_HOST", "node-1"),
            ("REDIS_PORT", "6379"),
        ]));
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["memcache.locking"], "\\OC\\Memcache\\Redis");
        assert_eq!(json["redis.cluster"]["failover_mode"], "error");
        assert!(json.get("redis").is_none());
    }

    #[test]
    fn test_parse_int_takes_leading_digits() {
        assert_eq!(parse_int("6379"), 6379);
        assert_eq!(parse_int("6379abc"), 6379);
        assert_eq!(parse_int("-3"), -3);
        assert_eq!(parse_int("abc"), 0);
    }
}
