// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Output configuration.
//!
//! Values are layered with figment: built-in defaults, then an optional YAML
//! file, then `COLLECTOR_`-prefixed environment variables where `__` descends
//! into nested sections (`COLLECTOR_OUTPUT__WORKERS=8`).
//!
//! ```yaml
//! host: http://collector.default.svc:7076
//! compress_level: 6
//! encoder: protobuf
//! auth:
//!   type: hmac
//!   property:
//!     access_key_id: ak
//!     secret_key: sk
//! output:
//!   workers: 4
//! ```

use figment::providers::{Env, Format, Yaml};
use figment::Figment;
use serde::{Deserialize, Deserializer};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::errors::ConfigError;

pub const ENV_PREFIX: &str = "COLLECTOR_";

pub const DEFAULT_JOB_PATH: &str = "/collect/logs/job";
pub const DEFAULT_CONTAINER_PATH: &str = "/collect/logs/container";
pub const DEFAULT_BULK_MAX_SIZE_BYTES: usize = 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Collector base URL, e.g. `http://collector:7076`.
    pub host: String,
    pub job_path: String,
    pub container_path: String,
    pub method: String,
    /// Static query parameters added to every request.
    pub params: HashMap<String, String>,
    /// Static headers added to every request.
    pub headers: HashMap<String, String>,
    #[serde(deserialize_with = "deserialize_duration_from_seconds")]
    pub timeout: Duration,
    #[serde(deserialize_with = "deserialize_duration_from_seconds")]
    pub keep_alive: Duration,
    pub tls: TlsConfig,
    /// Gzip level 1-9, 0 disables compression.
    pub compress_level: u32,
    pub auth: AuthConfig,
    /// Upper bound of summed message bytes per request.
    pub bulk_max_size_bytes: usize,
    /// `json` or `protobuf`.
    pub encoder: String,
    /// Redelivery attempts the host pipeline makes before dropping events.
    pub max_retries: u32,
    pub backoff: BackoffConfig,
    /// Secondary fan-out output.
    pub output: OutputConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: String::new(),
            job_path: DEFAULT_JOB_PATH.to_string(),
            container_path: DEFAULT_CONTAINER_PATH.to_string(),
            method: "POST".to_string(),
            params: HashMap::new(),
            headers: HashMap::new(),
            timeout: Duration::from_secs(60),
            keep_alive: Duration::from_secs(30),
            tls: TlsConfig::default(),
            compress_level: 6,
            auth: AuthConfig::default(),
            bulk_max_size_bytes: DEFAULT_BULK_MAX_SIZE_BYTES,
            encoder: "json".to_string(),
            max_retries: 3,
            backoff: BackoffConfig::default(),
            output: OutputConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct TlsConfig {
    /// PEM bundle of extra trusted roots.
    pub ca_cert_path: Option<PathBuf>,
    /// PEM client certificate, used together with `key_path`.
    pub certificate_path: Option<PathBuf>,
    pub key_path: Option<PathBuf>,
    pub insecure_skip_verify: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// `basic`, `hmac` or empty.
    #[serde(rename = "type")]
    pub auth_type: String,
    pub property: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    #[serde(deserialize_with = "deserialize_duration_from_seconds")]
    pub init: Duration,
    #[serde(deserialize_with = "deserialize_duration_from_seconds")]
    pub max: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            init: Duration::from_secs(1),
            max: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub enabled: bool,
    pub method: String,
    pub params: HashMap<String, String>,
    pub headers: HashMap<String, String>,
    #[serde(deserialize_with = "deserialize_duration_from_seconds")]
    pub timeout: Duration,
    #[serde(deserialize_with = "deserialize_duration_from_seconds")]
    pub keep_alive: Duration,
    pub tls: TlsConfig,
    /// Gzip level 0-9 of fan-out bodies; 0 stores without compressing.
    pub compress_level: u32,
    /// Concurrent fan-out requests.
    pub workers: usize,
    /// Pending fan-out groups; further groups are dropped while full.
    pub queue_size: usize,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            method: "POST".to_string(),
            params: HashMap::new(),
            headers: HashMap::new(),
            timeout: Duration::from_secs(60),
            keep_alive: Duration::from_secs(30),
            tls: TlsConfig::default(),
            compress_level: 6,
            workers: 4,
            queue_size: 64,
        }
    }
}

impl Config {
    /// Loads defaults, then `path` (if any), then the environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut figment = Figment::new();
        if let Some(path) = path {
            figment = figment.merge(Yaml::file(path));
        }
        let config: Config = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .map_err(|e| ConfigError::Load(Box::new(e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::Invalid("host cannot be empty".to_string()));
        }
        if self.compress_level > 9 {
            return Err(ConfigError::Invalid(format!(
                "compress_level {} is out of range 0..=9",
                self.compress_level
            )));
        }
        if self.output.compress_level > 9 {
            return Err(ConfigError::Invalid(format!(
                "output.compress_level {} is out of range 0..=9",
                self.output.compress_level
            )));
        }
        if self.bulk_max_size_bytes == 0 {
            return Err(ConfigError::Invalid(
                "bulk_max_size_bytes must be greater than 0".to_string(),
            ));
        }
        if self.output.enabled && (self.output.workers == 0 || self.output.queue_size == 0) {
            return Err(ConfigError::Invalid(
                "output.workers and output.queue_size must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

fn deserialize_duration_from_seconds<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Seconds {
        Whole(u64),
        Fractional(f64),
    }

    match Seconds::deserialize(deserializer)? {
        Seconds::Whole(secs) => Ok(Duration::from_secs(secs)),
        Seconds::Fractional(secs) if secs.is_finite() && secs >= 0.0 => {
            Ok(Duration::from_secs_f64(secs))
        }
        Seconds::Fractional(secs) => Err(serde::de::Error::custom(format!(
            "invalid duration {secs}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_needs_host() {
        let config = Config::default();
        assert!(config.validate().is_err());
        let config = Config {
            host: "http://localhost:7076".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_compress_level() {
        let config = Config {
            host: "http://localhost".to_string(),
            compress_level: 10,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_bulk_size() {
        let config = Config {
            host: "http://localhost".to_string(),
            bulk_max_size_bytes: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_output_workers_only_when_enabled() {
        let mut config = Config {
            host: "http://localhost".to_string(),
            ..Default::default()
        };
        config.output.workers = 0;
        assert!(config.validate().is_err());
        config.output.enabled = false;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_yaml() {
        figment::Jail::expect_with(|jail| {
            jail.clear_env();
            jail.create_file(
                "collector.yaml",
                r#"
host: http://collector:7076
job_path: /jobs
params:
  cluster: dev
timeout: 5
keep_alive: 1.5
compress_level: 9
encoder: protobuf
auth:
  type: basic
  property:
    auth_username: xxx
    auth_password: yyy
output:
  workers: 2
  tls:
    insecure_skip_verify: true
"#,
            )?;
            let config = Config::load(Some(Path::new("collector.yaml"))).expect("failed to load");
            assert_eq!(config.host, "http://collector:7076");
            assert_eq!(config.job_path, "/jobs");
            assert_eq!(config.container_path, DEFAULT_CONTAINER_PATH);
            assert_eq!(config.params.get("cluster").map(String::as_str), Some("dev"));
            assert_eq!(config.timeout, Duration::from_secs(5));
            assert_eq!(config.keep_alive, Duration::from_millis(1500));
            assert_eq!(config.compress_level, 9);
            assert_eq!(config.encoder, "protobuf");
            assert_eq!(config.auth.auth_type, "basic");
            assert_eq!(config.auth.property.len(), 2);
            assert_eq!(config.output.workers, 2);
            assert!(config.output.tls.insecure_skip_verify);
            assert_eq!(config.output.queue_size, 64);
            Ok(())
        });
    }

    #[test]
    fn test_env_overrides_yaml() {
        figment::Jail::expect_with(|jail| {
            jail.clear_env();
            jail.create_file("collector.yaml", "host: http://from-yaml\nencoder: json\n")?;
            jail.set_env("COLLECTOR_HOST", "http://from-env");
            jail.set_env("COLLECTOR_OUTPUT__QUEUE_SIZE", "8");
            jail.set_env("COLLECTOR_AUTH__TYPE", "hmac");
            let config = Config::load(Some(Path::new("collector.yaml"))).expect("failed to load");
            assert_eq!(config.host, "http://from-env");
            assert_eq!(config.output.queue_size, 8);
            assert_eq!(config.auth.auth_type, "hmac");
            Ok(())
        });
    }

    #[test]
    fn test_load_without_file() {
        figment::Jail::expect_with(|jail| {
            jail.clear_env();
            jail.set_env("COLLECTOR_HOST", "http://collector");
            let config = Config::load(None).expect("failed to load");
            assert_eq!(config.method, "POST");
            assert_eq!(config.bulk_max_size_bytes, DEFAULT_BULK_MAX_SIZE_BYTES);
            Ok(())
        });
    }

    #[test]
    fn test_load_rejects_invalid() {
        figment::Jail::expect_with(|jail| {
            jail.clear_env();
            jail.set_env("COLLECTOR_HOST", "http://collector");
            jail.set_env("COLLECTOR_COMPRESS_LEVEL", "12");
            assert!(matches!(Config::load(None), Err(ConfigError::Invalid(_))));
            Ok(())
        });
    }
}
