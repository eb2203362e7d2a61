//! Instance registry trait
//!
//! The InstanceRegistry stores instance records and applies state changes as
//! compare-and-swap operations.

use crate::error::RegistryResult;
use async_trait::async_trait;
use fleet_types::{
    ContainerRef, FailureReason, Instance, InstanceId, InstanceState, ProxyId, TransitionReason,
};

/// A requested state change plus the side updates applied in the same step
#[derive(Debug, Clone)]
pub struct Transition {
    pub from: InstanceState,
    pub to: InstanceState,
    pub reason: TransitionReason,
    pub container_ref: Option<ContainerRef>,
    pub proxy_id: Option<ProxyId>,
    pub bump_restart: bool,
    pub failure: Option<FailureReason>,
}

impl Transition {
    pub fn new(from: InstanceState, to: InstanceState, reason: TransitionReason) -> Self {
        Self {
            from,
            to,
            reason,
            container_ref: None,
            proxy_id: None,
            bump_restart: false,
            failure: None,
        }
    }

    /// Move to `Failed`, recording why
    pub fn fail(from: InstanceState, failure: FailureReason) -> Self {
        Self::new(
            from,
            InstanceState::Failed,
            TransitionReason::Failure(failure.clone()),
        )
        .with_failure(failure)
    }

    pub fn with_container(mut self, container_ref: ContainerRef) -> Self {
        self.container_ref = Some(container_ref);
        self
    }

    pub fn with_proxy(mut self, proxy_id: ProxyId) -> Self {
        self.proxy_id = Some(proxy_id);
        self
    }

    pub fn bump_restart(mut self) -> Self {
        self.bump_restart = true;
        self
    }

    pub fn with_failure(mut self, failure: FailureReason) -> Self {
        self.failure = Some(failure);
        self
    }
}

/// Registry for fleet instances
#[async_trait]
pub trait InstanceRegistry: Send + Sync {
    /// Insert a new record
    async fn insert(&self, instance: Instance) -> RegistryResult<()>;

    /// Get an instance by ID
    async fn get(&self, id: &InstanceId) -> RegistryResult<Option<Instance>>;

    /// All instances ordered by creation time, then id
    async fn list_all(&self) -> RegistryResult<Vec<Instance>>;

    /// Instances that are neither Removed nor Failed
    async fn list_active(&self) -> RegistryResult<Vec<Instance>>;

    async fn count_active(&self) -> RegistryResult<usize>;

    /// Apply `transition` only if the stored state equals `transition.from`
    /// and the edge is legal. Returns the updated record.
    async fn transition(&self, id: &InstanceId, transition: Transition)
        -> RegistryResult<Instance>;

    /// Write a record without any state check. Only used when rebuilding the
    /// registry from a persisted snapshot.
    async fn restore(&self, instance: Instance) -> RegistryResult<()>;
}
