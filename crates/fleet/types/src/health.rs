//! Health observation types
//!
//! The monitor produces these; the recovery coordinator consumes them.

use crate::{InstanceId, InstanceState};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Resource usage derived from one runtime stats sample
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceStats {
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub rx_bytes: u64,
    pub tx_bytes: u64,
}

/// Container status as reported by the runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContainerStatus {
    Created,
    Running,
    Exited(Option<i64>),
    Missing,
}

impl ContainerStatus {
    pub fn is_running(&self) -> bool {
        matches!(self, ContainerStatus::Running)
    }
}

impl fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContainerStatus::Created => f.write_str("created"),
            ContainerStatus::Running => f.write_str("running"),
            ContainerStatus::Exited(Some(code)) => write!(f, "exited ({})", code),
            ContainerStatus::Exited(None) => f.write_str("exited"),
            ContainerStatus::Missing => f.write_str("missing"),
        }
    }
}

/// Kind of health observation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SignalKind {
    /// Cpu or memory above the alert thresholds. Advisory only.
    ResourceThresholdExceeded,
    /// The instance's proxy failed its reachability probe
    ProxyUnreachable,
    /// The container is no longer running
    ContainerExited,
}

impl SignalKind {
    /// Kinds that can drive an instance into Degraded
    pub fn is_actionable(&self) -> bool {
        !matches!(self, SignalKind::ResourceThresholdExceeded)
    }
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SignalKind::ResourceThresholdExceeded => "resource_threshold_exceeded",
            SignalKind::ProxyUnreachable => "proxy_unreachable",
            SignalKind::ContainerExited => "container_exited",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SignalSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

/// A single observation emitted by the health monitor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSignal {
    pub instance_id: InstanceId,
    pub kind: SignalKind,
    pub severity: SignalSeverity,

    /// Length of the current streak for this kind
    pub consecutive: u32,

    pub detail: String,
    pub observed_at: DateTime<Utc>,
}

impl HealthSignal {
    pub fn new(
        instance_id: InstanceId,
        kind: SignalKind,
        consecutive: u32,
        detail: impl Into<String>,
    ) -> Self {
        let severity = match kind {
            SignalKind::ResourceThresholdExceeded => SignalSeverity::Warning,
            SignalKind::ProxyUnreachable => SignalSeverity::Error,
            SignalKind::ContainerExited => SignalSeverity::Critical,
        };
        Self {
            instance_id,
            kind,
            severity,
            consecutive,
            detail: detail.into(),
            observed_at: Utc::now(),
        }
    }
}

/// Per-kind streak counters kept by the monitor for one instance
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalStreaks {
    pub resource: u32,
    pub proxy: u32,
    pub exited: u32,
}

impl SignalStreaks {
    /// Count one more observation of `kind` and return the new streak
    pub fn observe(&mut self, kind: SignalKind) -> u32 {
        let slot = self.slot_mut(kind);
        *slot = slot.saturating_add(1);
        *slot
    }

    /// Overwrite the streak for `kind`, used when another component owns the count
    pub fn set(&mut self, kind: SignalKind, value: u32) {
        *self.slot_mut(kind) = value;
    }

    pub fn clear(&mut self, kind: SignalKind) {
        *self.slot_mut(kind) = 0;
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn get(&self, kind: SignalKind) -> u32 {
        match kind {
            SignalKind::ResourceThresholdExceeded => self.resource,
            SignalKind::ProxyUnreachable => self.proxy,
            SignalKind::ContainerExited => self.exited,
        }
    }

    pub fn is_clean(&self) -> bool {
        self.resource == 0 && self.proxy == 0 && self.exited == 0
    }

    fn slot_mut(&mut self, kind: SignalKind) -> &mut u32 {
        match kind {
            SignalKind::ResourceThresholdExceeded => &mut self.resource,
            SignalKind::ProxyUnreachable => &mut self.proxy,
            SignalKind::ContainerExited => &mut self.exited,
        }
    }
}

/// Latest health picture of one instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSnapshot {
    pub instance_id: InstanceId,
    pub state: InstanceState,
    pub stats: Option<ResourceStats>,
    pub proxy_reachable: Option<bool>,
    pub proxy_latency_ms: Option<u64>,
    pub container_status: Option<ContainerStatus>,
    pub streaks: SignalStreaks,
    pub checked_at: Option<DateTime<Utc>>,
}

impl HealthSnapshot {
    /// Snapshot for an instance that has not been checked yet
    pub fn unchecked(instance_id: InstanceId, state: InstanceState) -> Self {
        Self {
            instance_id,
            state,
            stats: None,
            proxy_reachable: None,
            proxy_latency_ms: None,
            container_status: None,
            streaks: SignalStreaks::default(),
            checked_at: None,
        }
    }
}

/// Message sent from the monitor to the recovery coordinator
#[derive(Debug, Clone)]
pub enum MonitorReport {
    /// An observation
    Signal(HealthSignal),
    /// A clean cycle for an instance that was observed failing before
    Recovered { instance_id: InstanceId },
}

impl MonitorReport {
    pub fn instance_id(&self) -> &InstanceId {
        match self {
            MonitorReport::Signal(signal) => &signal.instance_id,
            MonitorReport::Recovered { instance_id } => instance_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_streaks_count_per_kind() {
        let mut streaks = SignalStreaks::default();
        assert_eq!(streaks.observe(SignalKind::ContainerExited), 1);
        assert_eq!(streaks.observe(SignalKind::ContainerExited), 2);
        assert_eq!(streaks.observe(SignalKind::ProxyUnreachable), 1);
        assert_eq!(streaks.get(SignalKind::ContainerExited), 2);

        streaks.clear(SignalKind::ContainerExited);
        assert_eq!(streaks.get(SignalKind::ContainerExited), 0);
        assert!(!streaks.is_clean());

        streaks.reset();
        assert!(streaks.is_clean());
    }

    #[test]
    fn test_signal_severity_follows_kind() {
        let id = InstanceId::generate();
        let signal = HealthSignal::new(id.clone(), SignalKind::ContainerExited, 1, "exited");
        assert_eq!(signal.severity, SignalSeverity::Critical);
        assert!(signal.kind.is_actionable());

        let advisory = HealthSignal::new(id, SignalKind::ResourceThresholdExceeded, 1, "cpu");
        assert!(!advisory.kind.is_actionable());
    }
}
