// src/config.rs

//! Manages bridge configuration: loading from TOML, defaults, and validation.

use crate::core::event_loop::MAX_PERIODIC_INTERVAL;
use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fs;
use std::time::Duration;
use tracing::warn;

/// Upper bound for connect and request timeouts.
pub const MAX_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);

/// What happens to the backend connection after a request/reply exchange.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionPolicy {
    /// One long-lived connection; replies are correlated to commands in order.
    #[default]
    Persistent,
    /// The first completed exchange closes the connection. Later commands
    /// complete with no reply.
    SingleUse,
}

/// Where the backend lives and how the connection behaves.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct BackendConfig {
    #[serde(default = "default_backend_host")]
    pub host: String,
    #[serde(default = "default_backend_port")]
    pub port: u16,
    #[serde(with = "humantime_serde", default = "default_connect_timeout")]
    pub connect_timeout: Duration,
    #[serde(default)]
    pub policy: ConnectionPolicy,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            host: default_backend_host(),
            port: default_backend_port(),
            connect_timeout: default_connect_timeout(),
            policy: ConnectionPolicy::default(),
        }
    }
}

fn default_backend_host() -> String {
    "127.0.0.1".to_string()
}
fn default_backend_port() -> u16 {
    6379
}
fn default_connect_timeout() -> Duration {
    Duration::from_secs(2)
}

/// Settings for the dedicated event-loop thread.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct EventLoopConfig {
    #[serde(default = "default_thread_name")]
    pub thread_name: String,
    /// Interval of the heartbeat periodic timer. `0s` disables it.
    #[serde(with = "humantime_serde", default = "default_heartbeat_interval")]
    pub heartbeat_interval: Duration,
}

impl Default for EventLoopConfig {
    fn default() -> Self {
        Self {
            thread_name: default_thread_name(),
            heartbeat_interval: default_heartbeat_interval(),
        }
    }
}

fn default_thread_name() -> String {
    "spinelbridge-loop".to_string()
}
fn default_heartbeat_interval() -> Duration {
    Duration::from_secs(1000)
}

/// Per-request settings used by the handlers.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RequestConfig {
    /// Upper bound on how long a suspended request waits for its completion.
    #[serde(with = "humantime_serde", default = "default_request_timeout")]
    pub timeout: Duration,
    /// Prefix of the per-request backend key.
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            timeout: default_request_timeout(),
            key_prefix: default_key_prefix(),
        }
    }
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(5)
}
fn default_key_prefix() -> String {
    "spinelbridge:req:".to_string()
}

/// Configuration for the Prometheus metrics exporter.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_metrics_port(),
        }
    }
}

fn default_metrics_port() -> u16 {
    8879
}

fn default_log_level() -> String {
    "info".to_string()
}

/// The complete, validated configuration.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Config {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub event_loop: EventLoopConfig,
    #[serde(default)]
    pub request: RequestConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            backend: BackendConfig::default(),
            event_loop: EventLoopConfig::default(),
            request: RequestConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Config {
    /// Loads and validates the configuration from a TOML file.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file at '{path}'"))?;
        Self::from_toml_str(&contents).with_context(|| format!("Invalid config in '{path}'"))
    }

    /// Parses and validates a configuration from TOML text.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents).context("Failed to parse TOML")?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration for logical consistency.
    pub fn validate(&self) -> Result<()> {
        if self.backend.port == 0 {
            return Err(anyhow!("backend.port cannot be 0"));
        }
        if self.backend.host.trim().is_empty() {
            return Err(anyhow!("backend.host cannot be empty"));
        }
        if self.backend.connect_timeout.is_zero() {
            return Err(anyhow!("backend.connect_timeout must be greater than 0"));
        }
        if self.backend.connect_timeout > MAX_TIMEOUT {
            return Err(anyhow!(
                "backend.connect_timeout cannot exceed {:?}",
                MAX_TIMEOUT
            ));
        }
        if self.request.timeout.is_zero() {
            return Err(anyhow!("request.timeout must be greater than 0"));
        }
        if self.request.timeout > MAX_TIMEOUT {
            return Err(anyhow!(
                "request.timeout cannot exceed {:?}",
                MAX_TIMEOUT
            ));
        }
        if self.event_loop.heartbeat_interval > MAX_PERIODIC_INTERVAL {
            return Err(anyhow!(
                "event_loop.heartbeat_interval cannot exceed {:?}",
                MAX_PERIODIC_INTERVAL
            ));
        }
        if self.event_loop.thread_name.trim().is_empty() {
            return Err(anyhow!("event_loop.thread_name cannot be empty"));
        }
        if self.metrics.enabled && self.metrics.port == 0 {
            return Err(anyhow!("metrics.port cannot be 0 when metrics are enabled"));
        }
        if self.backend.policy == ConnectionPolicy::SingleUse {
            warn!(
                "backend.policy is 'single_use': the connection closes after the first exchange and is not re-established."
            );
        }
        Ok(())
    }
}
