//! Fleet Types - Core types for proxy-bound worker fleet orchestration
//!
//! The fleet core manages isolated worker containers, each bound to exactly
//! one network proxy, under operator-defined safeguards.
//!
//! ## Architectural Boundaries
//!
//! - **Fleet core** owns: proxy assignment, instance lifecycle, health polling,
//!   recovery decisions
//! - **Container runtime** owns: actually running containers (collaborator)
//! - **Proxy probe / geo lookup** own: reachability and classification (collaborators)
//!
//! ## Key Concepts
//!
//! - **ProxyEndpoint**: A proxy with its validation, health and assignment state
//! - **Instance**: A worker container bound to one proxy, driven by a state machine
//! - **SafeguardPolicy**: Process-wide limits and verification rules
//! - **HealthSignal**: An observation emitted by polling, consumed by recovery
//! - **Events**: Unified observability stream

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod error;
pub mod events;
pub mod health;
pub mod ids;
pub mod instance;
pub mod limits;
pub mod policy;
pub mod proxy;

// Re-export main types
pub use error::ValidationError;
pub use events::{EventSeverity, EventSource, FleetEvent, FleetEventEnvelope};
pub use health::{
    ContainerStatus, HealthSignal, HealthSnapshot, MonitorReport, ResourceStats, SignalKind,
    SignalSeverity, SignalStreaks,
};
pub use ids::{ContainerRef, InstanceId, ProxyId};
pub use instance::{
    FailureReason, Instance, InstanceRecord, InstanceState, InstanceSummary, TransitionReason,
};
pub use limits::{parse_memory, ResourceLimits};
pub use policy::{AlertThresholds, RejectReason, SafeguardPolicy, SecurityChecks};
pub use proxy::{
    ProxyCredentials, ProxyEndpoint, ProxyIdentity, ProxyRecord, ProxyScheme, ProxyStatus,
};
