//! Health monitoring configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the health monitor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Polling interval override. When unset the policy's
    /// `monitoring_interval_secs` applies.
    #[serde(default)]
    pub interval_secs: Option<u64>,

    /// Deadline for one proxy reachability probe.
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,

    /// Deadline for one stats sample.
    #[serde(default = "default_stats_timeout_ms")]
    pub stats_timeout_ms: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_secs: None,
            probe_timeout_ms: default_probe_timeout_ms(),
            stats_timeout_ms: default_stats_timeout_ms(),
        }
    }
}

impl MonitorConfig {
    /// Interval to use given the policy's interval in seconds
    pub fn interval(&self, policy_interval_secs: u64) -> Duration {
        Duration::from_secs(self.interval_secs.unwrap_or(policy_interval_secs).max(1))
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn stats_timeout(&self) -> Duration {
        Duration::from_millis(self.stats_timeout_ms)
    }
}

fn default_probe_timeout_ms() -> u64 {
    10_000
}

fn default_stats_timeout_ms() -> u64 {
    5_000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interval_falls_back_to_policy() {
        let config = MonitorConfig::default();
        assert_eq!(config.interval(60), Duration::from_secs(60));

        let config = MonitorConfig {
            interval_secs: Some(5),
            ..Default::default()
        };
        assert_eq!(config.interval(60), Duration::from_secs(5));
        assert_eq!(config.probe_timeout(), Duration::from_secs(10));
    }
}
