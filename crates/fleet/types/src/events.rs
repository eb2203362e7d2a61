//! Event types for fleet observability
//!
//! Every subsystem publishes into one stream so operators can follow proxy
//! assignment, lifecycle transitions and recovery decisions in order.

use crate::{InstanceId, InstanceState, ProxyId, RejectReason, SignalKind};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Envelope wrapping all fleet events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetEventEnvelope {
    /// Unique event ID
    pub id: Uuid,

    /// Event timestamp
    pub timestamp: chrono::DateTime<chrono::Utc>,

    pub source: EventSource,
    pub severity: EventSeverity,

    /// Correlation ID for tracing
    pub correlation_id: Option<String>,

    /// The actual event
    pub event: FleetEvent,
}

/// Event sources
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventSource {
    /// Proxy pool
    Pool,
    /// Safeguard engine
    Policy,
    /// Instance registry
    Registry,
    /// Lifecycle controller
    Lifecycle,
    /// Health monitor
    Health,
    /// Auto-recovery coordinator
    Recovery,
    /// Timer rotation
    Rotation,
    /// Control plane facade
    ControlPlane,
}

/// Event severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

/// Fleet events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum FleetEvent {
    // ═══════════════════════════════════════════════════════════════════
    // INSTANCE EVENTS
    // ═══════════════════════════════════════════════════════════════════
    /// Instance admitted and recorded as Pending
    InstanceCreated {
        instance_id: InstanceId,
        name: String,
        proxy_id: ProxyId,
    },

    /// Instance moved between states
    InstanceTransitioned {
        instance_id: InstanceId,
        from: InstanceState,
        to: InstanceState,
        reason: String,
    },

    /// Instance reached Removed and its resources were reclaimed
    InstanceRemoved { instance_id: InstanceId },

    // ═══════════════════════════════════════════════════════════════════
    // PROXY EVENTS
    // ═══════════════════════════════════════════════════════════════════
    ProxyAssigned {
        proxy_id: ProxyId,
        instance_id: InstanceId,
    },

    ProxyReleased {
        proxy_id: ProxyId,
        instance_id: InstanceId,
    },

    ProxyBanned {
        proxy_id: ProxyId,
        reason: String,
    },

    /// A running instance was rebound to another proxy
    ProxyReassigned {
        instance_id: InstanceId,
        from: ProxyId,
        to: ProxyId,
    },

    // ═══════════════════════════════════════════════════════════════════
    // POLICY EVENTS
    // ═══════════════════════════════════════════════════════════════════
    PolicyRejected {
        name: String,
        reason: RejectReason,
    },

    SafeguardsReloaded { max_instances: usize },

    // ═══════════════════════════════════════════════════════════════════
    // HEALTH AND RECOVERY EVENTS
    // ═══════════════════════════════════════════════════════════════════
    HealthSignalRaised {
        instance_id: InstanceId,
        kind: SignalKind,
        consecutive: u32,
        detail: String,
    },

    RecoveryScheduled {
        instance_id: InstanceId,
        attempt: u32,
        delay_ms: u64,
    },

    /// Advisory resource threshold crossing
    ResourceAlert {
        instance_id: InstanceId,
        cpu_percent: f64,
        memory_percent: f64,
    },
}

impl FleetEventEnvelope {
    /// Create a new event envelope
    pub fn new(event: FleetEvent, source: EventSource) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: chrono::Utc::now(),
            source,
            severity: Self::infer_severity(&event),
            correlation_id: None,
            event,
        }
    }

    /// Create with correlation ID
    pub fn with_correlation(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// Infer severity from event type
    fn infer_severity(event: &FleetEvent) -> EventSeverity {
        match event {
            FleetEvent::InstanceTransitioned {
                to: InstanceState::Failed,
                ..
            } => EventSeverity::Error,

            FleetEvent::InstanceTransitioned {
                to: InstanceState::Degraded,
                ..
            }
            | FleetEvent::ProxyBanned { .. }
            | FleetEvent::PolicyRejected { .. }
            | FleetEvent::HealthSignalRaised { .. }
            | FleetEvent::ResourceAlert { .. } => EventSeverity::Warning,

            _ => EventSeverity::Info,
        }
    }
}
