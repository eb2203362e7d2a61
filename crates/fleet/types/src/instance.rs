//! Instance types and the lifecycle state machine
//!
//! An Instance is one isolated worker container bound to exactly one proxy.
//! Its state only moves along the edges of [`InstanceState::can_transition_to`].

use crate::{ContainerRef, InstanceId, ProxyId, ResourceLimits};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Instance lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InstanceState {
    /// Record created, proxy reserved, container not started
    Pending,
    /// Container being created and started
    Creating,
    /// Container running and healthy
    Running,
    /// Health signals crossed the failure threshold
    Degraded,
    /// Recovery or operator restart in flight
    Restarting,
    /// Container being stopped
    Stopping,
    /// Container stopped, proxy still held
    Stopped,
    /// Terminal: resources reclaimed
    Removed,
    /// Terminal for automation: requires operator action
    Failed,
}

impl InstanceState {
    pub const ALL: [InstanceState; 9] = [
        InstanceState::Pending,
        InstanceState::Creating,
        InstanceState::Running,
        InstanceState::Degraded,
        InstanceState::Restarting,
        InstanceState::Stopping,
        InstanceState::Stopped,
        InstanceState::Removed,
        InstanceState::Failed,
    ];

    /// The complete transition table
    pub fn can_transition_to(&self, target: InstanceState) -> bool {
        use InstanceState::*;
        matches!(
            (self, target),
            (Pending, Creating)
                | (Pending, Failed)
                | (Creating, Running)
                | (Creating, Failed)
                | (Running, Degraded)
                | (Running, Stopping)
                | (Running, Restarting)
                | (Degraded, Running)
                | (Degraded, Stopping)
                | (Degraded, Restarting)
                | (Restarting, Running)
                | (Restarting, Failed)
                | (Stopping, Stopped)
                | (Stopping, Failed)
                | (Stopped, Removed)
                | (Stopped, Creating)
                | (Stopped, Failed)
                | (Failed, Removed)
        )
    }

    /// Counts against `max_instances` and holds a proxy
    pub fn is_active(&self) -> bool {
        !matches!(self, InstanceState::Removed | InstanceState::Failed)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, InstanceState::Removed | InstanceState::Failed)
    }

    /// States the health monitor polls
    pub fn is_monitored(&self) -> bool {
        matches!(self, InstanceState::Running | InstanceState::Degraded)
    }

    /// States that only exist while an operation is in flight
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            InstanceState::Pending
                | InstanceState::Creating
                | InstanceState::Stopping
                | InstanceState::Restarting
        )
    }
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            InstanceState::Pending => "pending",
            InstanceState::Creating => "creating",
            InstanceState::Running => "running",
            InstanceState::Degraded => "degraded",
            InstanceState::Restarting => "restarting",
            InstanceState::Stopping => "stopping",
            InstanceState::Stopped => "stopped",
            InstanceState::Removed => "removed",
            InstanceState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Why an instance ended up in `Failed`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureReason {
    /// Runtime refused to create or start the container
    ContainerCreateError(String),
    /// Runtime reported the image or resource spec as unsatisfiable
    Fatal(String),
    /// Stop or remove did not finish before its deadline
    ForcedStopTimeout,
    /// Restart count exceeded the configured ceiling
    RestartCeilingExceeded { restarts: u32 },
    /// Safeguards rejected the instance after its proxy was reserved
    PolicyRejected(String),
    /// No replacement proxy could be allocated during recovery
    NoProxyAvailable,
    /// Container vanished while the process was down
    ContainerLost,
    /// Process stopped while an operation was in flight
    Interrupted,
    /// Recovery restart failed at the runtime
    RestartFailed(String),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::ContainerCreateError(e) => write!(f, "container create error: {}", e),
            FailureReason::Fatal(e) => write!(f, "fatal: {}", e),
            FailureReason::ForcedStopTimeout => f.write_str("forced stop timeout"),
            FailureReason::RestartCeilingExceeded { restarts } => {
                write!(f, "restart ceiling exceeded after {} restarts", restarts)
            }
            FailureReason::PolicyRejected(r) => write!(f, "policy rejected: {}", r),
            FailureReason::NoProxyAvailable => f.write_str("no proxy available"),
            FailureReason::ContainerLost => f.write_str("container lost"),
            FailureReason::Interrupted => f.write_str("interrupted"),
            FailureReason::RestartFailed(e) => write!(f, "restart failed: {}", e),
        }
    }
}

/// What caused a state transition, carried on events and logs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransitionReason {
    Operator,
    Admission,
    ContainerStarted,
    HealthDegraded(String),
    HealthRecovered,
    Recovery { attempt: u32 },
    ProxyReassigned,
    ProxyRotated,
    Failure(FailureReason),
    Reattached,
}

impl fmt::Display for TransitionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransitionReason::Operator => f.write_str("operator"),
            TransitionReason::Admission => f.write_str("admission"),
            TransitionReason::ContainerStarted => f.write_str("container started"),
            TransitionReason::HealthDegraded(why) => write!(f, "health degraded: {}", why),
            TransitionReason::HealthRecovered => f.write_str("health recovered"),
            TransitionReason::Recovery { attempt } => write!(f, "recovery attempt {}", attempt),
            TransitionReason::ProxyReassigned => f.write_str("proxy reassigned"),
            TransitionReason::ProxyRotated => f.write_str("proxy rotated"),
            TransitionReason::Failure(reason) => write!(f, "failure: {}", reason),
            TransitionReason::Reattached => f.write_str("reattached"),
        }
    }
}

/// A managed worker instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instance {
    pub id: InstanceId,
    pub name: String,

    /// Proxy held for the instance's lifetime
    pub proxy_id: ProxyId,

    /// Container owned exclusively by this instance
    pub container_ref: Option<ContainerRef>,

    /// Worker identity injected into the container, never reused
    pub device_identity: String,

    pub resource_limits: ResourceLimits,
    pub state: InstanceState,
    pub restart_count: u32,
    pub failure: Option<FailureReason>,
    pub created_at: DateTime<Utc>,
    pub last_transition_at: DateTime<Utc>,
}

impl Instance {
    /// New `Pending` instance bound to a reserved proxy
    pub fn pending(name: impl Into<String>, proxy_id: ProxyId, limits: ResourceLimits) -> Self {
        Self::pending_with_id(InstanceId::generate(), name, proxy_id, limits)
    }

    /// As [`Instance::pending`], for callers that reserved the proxy under
    /// an id generated up front
    pub fn pending_with_id(
        id: InstanceId,
        name: impl Into<String>,
        proxy_id: ProxyId,
        limits: ResourceLimits,
    ) -> Self {
        let now = Utc::now();
        Self {
            device_identity: id.as_uuid().simple().to_string(),
            id,
            name: name.into(),
            proxy_id,
            container_ref: None,
            resource_limits: limits,
            state: InstanceState::Pending,
            restart_count: 0,
            failure: None,
            created_at: now,
            last_transition_at: now,
        }
    }

    pub fn summary(&self) -> InstanceSummary {
        InstanceSummary {
            id: self.id.clone(),
            name: self.name.clone(),
            state: self.state,
            proxy_id: self.proxy_id,
            container_ref: self.container_ref.clone(),
            restart_count: self.restart_count,
            failure: self.failure.as_ref().map(|f| f.to_string()),
            created_at: self.created_at,
            last_transition_at: self.last_transition_at,
        }
    }

    pub fn to_record(&self) -> InstanceRecord {
        InstanceRecord {
            id: self.id.clone(),
            name: self.name.clone(),
            proxy_id: self.proxy_id,
            container_ref: self.container_ref.clone(),
            state: self.state,
            resource_limits: self.resource_limits.clone(),
            restart_count: self.restart_count,
            created_at: self.created_at,
            device_identity: self.device_identity.clone(),
            failure: self.failure.clone(),
        }
    }
}

/// List projection returned to the operator surface
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceSummary {
    pub id: InstanceId,
    pub name: String,
    pub state: InstanceState,
    pub proxy_id: ProxyId,
    pub container_ref: Option<ContainerRef>,
    pub restart_count: u32,
    pub failure: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_transition_at: DateTime<Utc>,
}

/// Persisted projection, keyed by stable identifiers so a restarted
/// process can reattach to running containers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceRecord {
    pub id: InstanceId,
    pub name: String,
    pub proxy_id: ProxyId,
    pub container_ref: Option<ContainerRef>,
    pub state: InstanceState,
    pub resource_limits: ResourceLimits,
    pub restart_count: u32,
    pub created_at: DateTime<Utc>,
    pub device_identity: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureReason>,
}

impl InstanceRecord {
    pub fn into_instance(self) -> Instance {
        Instance {
            id: self.id,
            name: self.name,
            proxy_id: self.proxy_id,
            container_ref: self.container_ref,
            device_identity: self.device_identity,
            resource_limits: self.resource_limits,
            state: self.state,
            restart_count: self.restart_count,
            failure: self.failure,
            created_at: self.created_at,
            last_transition_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_documented_paths_are_legal() {
        use InstanceState::*;
        let paths: &[&[InstanceState]] = &[
            &[Pending, Creating, Running, Degraded, Running],
            &[Pending, Creating, Failed],
            &[Running, Stopping, Stopped, Removed],
            &[Degraded, Stopping, Stopped, Removed],
            &[Degraded, Restarting, Running],
            &[Degraded, Restarting, Failed],
            &[Stopped, Failed, Removed],
        ];
        for path in paths {
            for pair in path.windows(2) {
                assert!(
                    pair[0].can_transition_to(pair[1]),
                    "{} -> {} should be legal",
                    pair[0],
                    pair[1]
                );
            }
        }
    }

    #[test]
    fn test_live_states_fail_only_through_restarting() {
        use InstanceState::*;
        assert!(!Running.can_transition_to(Failed));
        assert!(!Degraded.can_transition_to(Failed));
        assert!(Restarting.can_transition_to(Failed));
    }

    #[test]
    fn test_removed_is_a_sink() {
        for target in InstanceState::ALL {
            assert!(!InstanceState::Removed.can_transition_to(target));
        }
    }

    #[test]
    fn test_device_identity_is_unique() {
        let limits = ResourceLimits::new(512 * 1024 * 1024, 0.5);
        let a = Instance::pending("a", ProxyId::generate(), limits.clone());
        let b = Instance::pending("a", ProxyId::generate(), limits);
        assert_ne!(a.device_identity, b.device_identity);
        assert_eq!(a.state, InstanceState::Pending);
    }

    fn any_state() -> impl Strategy<Value = InstanceState> {
        (0usize..InstanceState::ALL.len()).prop_map(|i| InstanceState::ALL[i])
    }

    proptest! {
        #[test]
        fn prop_no_self_transitions(state in any_state()) {
            prop_assert!(!state.can_transition_to(state));
        }

        #[test]
        fn prop_terminal_states_only_lead_to_removed(from in any_state(), to in any_state()) {
            if from.is_terminal() && from.can_transition_to(to) {
                prop_assert_eq!(to, InstanceState::Removed);
            }
        }

        #[test]
        fn prop_only_pending_creating_or_stopped_reach_creating(from in any_state()) {
            if from.can_transition_to(InstanceState::Creating) {
                prop_assert!(matches!(from, InstanceState::Pending | InstanceState::Stopped));
            }
        }
    }
}
