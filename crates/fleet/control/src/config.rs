//! Fleet configuration
//!
//! Every section deserializes from a partial document; missing fields take
//! their defaults.

use fleet_health::MonitorConfig;
use fleet_proxy::PoolConfig;
use fleet_runtime::RuntimePoolConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Aggregate configuration for the orchestration core
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FleetConfig {
    #[serde(default)]
    pub pool: PoolConfig,

    #[serde(default)]
    pub monitor: MonitorConfig,

    #[serde(default)]
    pub lifecycle: LifecycleConfig,

    #[serde(default)]
    pub recovery: RecoveryConfig,

    #[serde(default)]
    pub rotation: RotationConfig,

    #[serde(default)]
    pub persistence: PersistenceConfig,
}

/// Container creation and runtime call bounds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LifecycleConfig {
    /// Worker image
    #[serde(default = "default_image")]
    pub image: String,

    /// Containers are named `<prefix>-<instance uuid>`
    #[serde(default = "default_container_prefix")]
    pub container_prefix: String,

    #[serde(default = "default_max_concurrent_operations")]
    pub max_concurrent_operations: usize,

    #[serde(default = "default_create_timeout_secs")]
    pub create_timeout_secs: u64,

    #[serde(default = "default_stop_timeout_secs")]
    pub stop_timeout_secs: u64,

    #[serde(default = "default_remove_timeout_secs")]
    pub remove_timeout_secs: u64,

    /// Grace period the runtime gives a container before killing it
    #[serde(default = "default_stop_grace_secs")]
    pub stop_grace_secs: u64,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            image: default_image(),
            container_prefix: default_container_prefix(),
            max_concurrent_operations: default_max_concurrent_operations(),
            create_timeout_secs: default_create_timeout_secs(),
            stop_timeout_secs: default_stop_timeout_secs(),
            remove_timeout_secs: default_remove_timeout_secs(),
            stop_grace_secs: default_stop_grace_secs(),
        }
    }
}

impl LifecycleConfig {
    pub fn stop_grace(&self) -> Duration {
        Duration::from_secs(self.stop_grace_secs)
    }

    pub fn runtime_pool_config(&self) -> RuntimePoolConfig {
        RuntimePoolConfig {
            max_concurrent_operations: self.max_concurrent_operations,
            create_timeout: Duration::from_secs(self.create_timeout_secs),
            stop_timeout: Duration::from_secs(self.stop_timeout_secs),
            remove_timeout: Duration::from_secs(self.remove_timeout_secs),
            ..RuntimePoolConfig::default()
        }
    }
}

/// Auto-recovery behaviour
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryConfig {
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    #[serde(default = "default_backoff_cap_ms")]
    pub backoff_cap_ms: u64,

    /// Restarts allowed before an instance is failed for good
    #[serde(default = "default_max_restarts")]
    pub max_restarts: u32,

    /// Proxy failure count at which a replaced proxy is banned
    #[serde(default = "default_ban_threshold")]
    pub ban_threshold: u32,

    /// Replace an unreachable proxy instead of restarting the container
    #[serde(default = "default_true")]
    pub reassign_on_failure: bool,

    /// Capacity of the monitor to coordinator channel
    #[serde(default = "default_report_capacity")]
    pub report_capacity: usize,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            backoff_base_ms: default_backoff_base_ms(),
            backoff_cap_ms: default_backoff_cap_ms(),
            max_restarts: default_max_restarts(),
            ban_threshold: default_ban_threshold(),
            reassign_on_failure: true,
            report_capacity: default_report_capacity(),
        }
    }
}

impl RecoveryConfig {
    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn backoff_cap(&self) -> Duration {
        Duration::from_millis(self.backoff_cap_ms)
    }
}

/// Timer-driven proxy rotation. Off unless `interval_secs` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RotationConfig {
    /// Rotate a proxy once it has been held this long
    #[serde(default)]
    pub interval_secs: Option<u64>,

    /// How often held proxies are checked against the interval
    #[serde(default = "default_sweep_secs")]
    pub sweep_secs: u64,
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self {
            interval_secs: None,
            sweep_secs: default_sweep_secs(),
        }
    }
}

impl RotationConfig {
    /// Rotation at the source system's hourly cadence
    pub fn hourly() -> Self {
        Self {
            interval_secs: Some(3600),
            ..Self::default()
        }
    }

    pub fn interval(&self) -> Option<Duration> {
        self.interval_secs.map(Duration::from_secs)
    }

    pub fn sweep(&self) -> Duration {
        Duration::from_secs(self.sweep_secs.max(1))
    }
}

/// Where fleet state is persisted between runs
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// JSON state file; no persistence when unset
    #[serde(default)]
    pub state_file: Option<PathBuf>,
}

// Default value helpers
fn default_true() -> bool {
    true
}

fn default_image() -> String {
    "fleet-worker:latest".to_string()
}

fn default_container_prefix() -> String {
    "fleet".to_string()
}

fn default_max_concurrent_operations() -> usize {
    4
}

fn default_create_timeout_secs() -> u64 {
    120
}

fn default_stop_timeout_secs() -> u64 {
    30
}

fn default_remove_timeout_secs() -> u64 {
    30
}

fn default_stop_grace_secs() -> u64 {
    10
}

fn default_backoff_base_ms() -> u64 {
    5_000
}

fn default_backoff_cap_ms() -> u64 {
    300_000
}

fn default_max_restarts() -> u32 {
    3
}

fn default_ban_threshold() -> u32 {
    5
}

fn default_report_capacity() -> usize {
    1024
}

fn default_sweep_secs() -> u64 {
    60
}
