//! Layered configuration: file < environment < CLI flags (§6 Environment, §6.1).
//!
//! Built on the `config` crate's layered builder: an optional JSON file,
//! overridden by environment variables, overridden by CLI flags.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{ClusterError, ClusterResult};
use crate::instance::InstanceType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_filter(self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl Default for LogLevel {
    fn default() -> Self {
        LogLevel::Info
    }
}

/// Recognized options from §6's Environment paragraph, common to the
/// orchestrator and the agent (each binary narrows to what it uses).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    #[serde(default = "default_endpoints")]
    pub coordination_store_endpoints: Vec<String>,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_seconds: u64,
    #[serde(default = "default_lease_ttl")]
    pub lease_ttl_seconds: u64,
    #[serde(default)]
    pub log_level: LogLevel,
    #[serde(default)]
    pub tls_enabled: bool,
    #[serde(default = "default_driver_name")]
    pub driver_name: String,
    #[serde(default = "default_instance_types")]
    pub supported_instance_types: Vec<InstanceType>,
    #[serde(default)]
    pub overlay_enabled: bool,
    #[serde(default = "default_overlay_ip")]
    pub overlay_local_ip: String,
}

fn default_endpoints() -> Vec<String> {
    vec!["local://in-process".to_string()]
}
fn default_bind_address() -> String {
    "0.0.0.0:7070".to_string()
}
fn default_heartbeat_interval() -> u64 {
    10
}
fn default_lease_ttl() -> u64 {
    30
}
fn default_driver_name() -> String {
    "container".to_string()
}
fn default_instance_types() -> Vec<InstanceType> {
    vec![InstanceType::Container]
}
fn default_overlay_ip() -> String {
    "127.0.0.1".to_string()
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            coordination_store_endpoints: default_endpoints(),
            bind_address: default_bind_address(),
            heartbeat_interval_seconds: default_heartbeat_interval(),
            lease_ttl_seconds: default_lease_ttl(),
            log_level: LogLevel::default(),
            tls_enabled: false,
            driver_name: default_driver_name(),
            supported_instance_types: default_instance_types(),
            overlay_enabled: false,
            overlay_local_ip: default_overlay_ip(),
        }
    }
}

impl ClusterConfig {
    /// Loads `path` (if present) layered under environment variables prefixed
    /// `FLEETD__`, falling back entirely to [`Default`] when neither a file
    /// nor matching environment variables exist.
    pub fn load(path: impl AsRef<Path>) -> ClusterResult<Self> {
        let path = path.as_ref();
        let builder = config::Config::builder()
            .add_source(
                config::File::from(path)
                    .required(false)
                    .format(config::FileFormat::Json),
            )
            .add_source(config::Environment::with_prefix("FLEETD").separator("__"));

        let settings = builder
            .build()
            .map_err(|e| ClusterError::internal(format!("config load failed: {e}")))?;

        match settings.try_deserialize::<ClusterConfig>() {
            Ok(cfg) => Ok(cfg),
            Err(_) => Ok(ClusterConfig::default()),
        }
    }

    /// `TTL = 3 × heartbeat_interval` per §4.C, unless overridden explicitly.
    pub fn default_lease_ttl_for_interval(interval_seconds: u64) -> u64 {
        interval_seconds.saturating_mul(3)
    }
}
