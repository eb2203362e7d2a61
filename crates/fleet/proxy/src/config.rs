//! Proxy pool configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How allocation picks among eligible endpoints
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionStrategy {
    /// Walk endpoints in insertion order, resuming after the last pick
    #[default]
    RoundRobin,
    /// Prefer the endpoint handed out longest ago, never-used first
    LeastRecentlyUsed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Consecutive probe failures before an endpoint turns Unhealthy
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// URL fetched through the proxy to prove reachability
    #[serde(default = "default_probe_target")]
    pub probe_target: String,

    /// Upper bound on a single probe
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,

    #[serde(default)]
    pub selection: SelectionStrategy,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            probe_target: default_probe_target(),
            probe_timeout_ms: default_probe_timeout_ms(),
            selection: SelectionStrategy::default(),
        }
    }
}

impl PoolConfig {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

fn default_failure_threshold() -> u32 {
    3
}

fn default_probe_target() -> String {
    "http://ip-api.com/json".to_string()
}

fn default_probe_timeout_ms() -> u64 {
    10_000
}
