//! Lifecycle controller
//!
//! Owns every operator-initiated transition: create, stop, restart, remove,
//! and the startup reattach pass. Each step is a registry CAS, so a recovery
//! that raced an operator simply loses and backs off.

use crate::context::FleetContext;
use crate::error::{FleetError, FleetResult};
use fleet_policy::{AdmissionRequest, SafeguardDecision};
use fleet_registry::{FleetSnapshot, Transition};
use fleet_runtime::spec::{ENV_PROXY_URL, ENV_WORKER_DEVICE_NAME, ENV_WORKER_UUID};
use fleet_runtime::{ContainerSpec, RuntimeError};
use fleet_types::{
    ContainerRef, ContainerStatus, EventSource, FailureReason, FleetEvent, Instance, InstanceId,
    InstanceRecord, InstanceState, ProxyId, ProxyIdentity, RejectReason, ResourceLimits,
    SafeguardPolicy, TransitionReason, ValidationError,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

/// Longest accepted instance name
pub const MAX_NAME_LEN: usize = 63;

/// Which proxy a new instance should be bound to
#[derive(Debug, Clone, PartialEq)]
pub enum ProxySelection {
    /// Next allocatable proxy from the pool
    Any,
    /// A proxy URL supplied by the operator; added to the pool if new
    Spec(String),
    /// A proxy already in the pool
    Existing(ProxyId),
}

/// Parameters for creating an instance
#[derive(Debug, Clone)]
pub struct CreateRequest {
    pub name: String,
    pub proxy: ProxySelection,
    /// Defaults to the policy ceilings when absent
    pub limits: Option<ResourceLimits>,
}

impl CreateRequest {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            proxy: ProxySelection::Any,
            limits: None,
        }
    }

    pub fn with_proxy_spec(mut self, raw: impl Into<String>) -> Self {
        self.proxy = ProxySelection::Spec(raw.into());
        self
    }

    pub fn with_proxy(mut self, id: ProxyId) -> Self {
        self.proxy = ProxySelection::Existing(id);
        self
    }

    pub fn with_limits(mut self, limits: ResourceLimits) -> Self {
        self.limits = Some(limits);
        self
    }
}

/// Outcome of [`LifecycleController::reattach`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReattachReport {
    /// Records loaded into the registry
    pub restored: usize,
    /// Running instances handed back to the monitor
    pub resumed: usize,
    /// Running instances whose container was gone
    pub lost: usize,
    /// Instances caught mid-operation
    pub interrupted: usize,
}

/// What happens to the proxy an instance gives up during reassignment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Retire {
    Release,
    /// Ban when the proxy's own failure count reached the threshold
    BanAt(u32),
}

pub fn validate_name(name: &str) -> Result<(), ValidationError> {
    if name.is_empty() {
        return Err(ValidationError::InvalidName("name must not be empty".into()));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(ValidationError::InvalidName(format!(
            "name longer than {} characters",
            MAX_NAME_LEN
        )));
    }
    if let Some(c) = name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-')))
    {
        return Err(ValidationError::InvalidName(format!(
            "invalid character {:?} in {}",
            c, name
        )));
    }
    Ok(())
}

/// Per-instance limits derived from the policy ceilings
pub fn default_limits(policy: &SafeguardPolicy) -> FleetResult<ResourceLimits> {
    let limits = ResourceLimits::new(policy.memory_ceiling_bytes()?, policy.cpu_limit);
    Ok(match policy.bandwidth_limit_kbps {
        Some(kbps) => limits.with_bandwidth(kbps),
        None => limits,
    })
}

pub struct LifecycleController {
    ctx: Arc<FleetContext>,

    /// Serializes capacity accounting across concurrent creates
    admission: Mutex<()>,
}

impl LifecycleController {
    pub fn new(ctx: Arc<FleetContext>) -> Self {
        Self {
            ctx,
            admission: Mutex::new(()),
        }
    }

    pub fn context(&self) -> &Arc<FleetContext> {
        &self.ctx
    }

    /// Admit, provision and start a new instance
    #[instrument(skip_all, fields(name = %request.name))]
    pub async fn create(&self, request: CreateRequest) -> FleetResult<Instance> {
        validate_name(&request.name)?;
        let identity = match &request.proxy {
            ProxySelection::Spec(raw) => Some(fleet_proxy::validate(raw)?),
            _ => None,
        };

        let policy = self.ctx.policy.current().await;
        let limits = match request.limits {
            Some(limits) => {
                limits.validate()?;
                limits
            }
            None => default_limits(&policy)?,
        };
        let id = InstanceId::generate();

        let (endpoint, active) = {
            let _admission = self.admission.lock().await;
            let active = self.ctx.registry.count_active().await?;
            if let SafeguardDecision::Reject(reason) =
                self.ctx.engine.evaluate_capacity(active, &limits, &policy)
            {
                return Err(self.rejected(&request.name, reason));
            }

            let endpoint = match (identity, &request.proxy) {
                (Some(identity), _) => {
                    let proxy_id = self.ctx.pool.add_identity(identity);
                    self.ctx.pool.reserve(&proxy_id, &id)?
                }
                (None, ProxySelection::Existing(proxy_id)) => {
                    self.ctx.pool.reserve(proxy_id, &id)?
                }
                (None, _) => self.ctx.pool.allocate(&id)?,
            };

            let pending =
                Instance::pending_with_id(id.clone(), request.name.clone(), endpoint.id, limits.clone());
            if let Err(e) = self.ctx.registry.insert(pending).await {
                self.ctx.release_proxy(&endpoint.id, &id, EventSource::Lifecycle);
                return Err(e.into());
            }
            (endpoint, active)
        };

        info!(instance_id = %id, proxy_id = %endpoint.id, "Instance admitted");
        self.ctx.events.emit(
            FleetEvent::InstanceCreated {
                instance_id: id.clone(),
                name: request.name.clone(),
                proxy_id: endpoint.id,
            },
            EventSource::Lifecycle,
        );
        self.ctx.events.emit(
            FleetEvent::ProxyAssigned {
                proxy_id: endpoint.id,
                instance_id: id.clone(),
            },
            EventSource::Pool,
        );

        let mut admission =
            AdmissionRequest::new(active, limits).with_proxy(endpoint.identity.clone());
        if policy.proxy_verification {
            let classification = self
                .ctx
                .classifier
                .classify(&endpoint.identity)
                .await
                .map_err(|e| e.to_string());
            admission = admission.with_classification(classification);
        }
        if let SafeguardDecision::Reject(reason) = self.ctx.engine.evaluate(&admission, &policy) {
            if reason.blames_proxy() {
                self.ctx
                    .ban_proxy(&endpoint.id, &reason.to_string(), EventSource::Policy);
            } else {
                self.ctx
                    .release_proxy(&endpoint.id, &id, EventSource::Lifecycle);
            }
            self.ctx
                .transition(
                    &id,
                    Transition::fail(
                        InstanceState::Pending,
                        FailureReason::PolicyRejected(reason.to_string()),
                    ),
                    EventSource::Lifecycle,
                )
                .await?;
            return Err(self.rejected(&request.name, reason));
        }

        let creating = self
            .ctx
            .transition(
                &id,
                Transition::new(
                    InstanceState::Pending,
                    InstanceState::Creating,
                    TransitionReason::Admission,
                ),
                EventSource::Lifecycle,
            )
            .await?;

        let spec = self.container_spec(&creating, &endpoint.identity);
        match self.ctx.runtime.create_and_start(&spec).await {
            Ok(container) => {
                let running = self
                    .ctx
                    .transition(
                        &id,
                        Transition::new(
                            InstanceState::Creating,
                            InstanceState::Running,
                            TransitionReason::ContainerStarted,
                        )
                        .with_container(container),
                        EventSource::Lifecycle,
                    )
                    .await?;
                self.watch(&id).await;
                Ok(running)
            }
            Err(e) => {
                warn!(instance_id = %id, error = %e, "Container create failed");
                self.ctx
                    .release_proxy(&endpoint.id, &id, EventSource::Lifecycle);
                let (failure, err) = if e.is_fatal() {
                    (FailureReason::Fatal(e.to_string()), FleetError::Fatal(e.to_string()))
                } else {
                    (
                        FailureReason::ContainerCreateError(e.to_string()),
                        FleetError::ContainerCreate(e.to_string()),
                    )
                };
                self.ctx
                    .transition(
                        &id,
                        Transition::fail(InstanceState::Creating, failure),
                        EventSource::Lifecycle,
                    )
                    .await?;
                Err(err)
            }
        }
    }

    /// Stop the container; the proxy stays assigned
    #[instrument(skip_all, fields(instance_id = %id))]
    pub async fn stop(&self, id: &InstanceId) -> FleetResult<Instance> {
        let instance = self.ctx.instance(id).await?;
        if !instance.state.is_monitored() {
            return Err(invalid_transition(
                id,
                InstanceState::Running,
                instance.state,
                InstanceState::Stopping,
            ));
        }

        let stopping = self
            .ctx
            .transition(
                id,
                Transition::new(
                    instance.state,
                    InstanceState::Stopping,
                    TransitionReason::Operator,
                ),
                EventSource::Lifecycle,
            )
            .await?;
        self.ctx.monitor.unwatch(id);

        if let Some(container) = &stopping.container_ref {
            match self
                .ctx
                .runtime
                .stop(container, self.ctx.lifecycle.stop_grace())
                .await
            {
                Ok(()) | Err(RuntimeError::NotFound(_)) => {}
                Err(e) => {
                    let failure = if e.is_timeout() {
                        FailureReason::ForcedStopTimeout
                    } else {
                        FailureReason::Fatal(e.to_string())
                    };
                    warn!(instance_id = %id, error = %e, "Stop failed, forcing instance to failed");
                    self.ctx
                        .release_proxy(&stopping.proxy_id, id, EventSource::Lifecycle);
                    self.ctx
                        .transition(
                            id,
                            Transition::fail(InstanceState::Stopping, failure),
                            EventSource::Lifecycle,
                        )
                        .await?;
                    return Err(e.into());
                }
            }
        }

        self.ctx
            .transition(
                id,
                Transition::new(
                    InstanceState::Stopping,
                    InstanceState::Stopped,
                    TransitionReason::Operator,
                ),
                EventSource::Lifecycle,
            )
            .await
    }

    /// Operator restart. Does not count against the recovery ceiling.
    #[instrument(skip_all, fields(instance_id = %id))]
    pub async fn restart(&self, id: &InstanceId) -> FleetResult<Instance> {
        let instance = self.ctx.instance(id).await?;
        match instance.state {
            InstanceState::Running | InstanceState::Degraded => {
                let restarting = self
                    .ctx
                    .transition(
                        id,
                        Transition::new(
                            instance.state,
                            InstanceState::Restarting,
                            TransitionReason::Operator,
                        ),
                        EventSource::Lifecycle,
                    )
                    .await?;
                self.ctx.monitor.unwatch(id);

                match self.cycle_container(&restarting).await {
                    Ok(container) => self.resume(id, InstanceState::Restarting, container).await,
                    Err(CycleError { failure, error }) => {
                        self.ctx
                            .release_proxy(&restarting.proxy_id, id, EventSource::Lifecycle);
                        self.ctx
                            .transition(
                                id,
                                Transition::fail(InstanceState::Restarting, failure),
                                EventSource::Lifecycle,
                            )
                            .await?;
                        Err(error)
                    }
                }
            }
            InstanceState::Stopped => {
                let creating = self
                    .ctx
                    .transition(
                        id,
                        Transition::new(
                            InstanceState::Stopped,
                            InstanceState::Creating,
                            TransitionReason::Operator,
                        ),
                        EventSource::Lifecycle,
                    )
                    .await?;

                match self.start_or_recreate(&creating).await {
                    Ok(container) => self.resume(id, InstanceState::Creating, container).await,
                    Err(e) => {
                        self.ctx
                            .release_proxy(&creating.proxy_id, id, EventSource::Lifecycle);
                        let failure = match &e {
                            FleetError::Fatal(msg) => FailureReason::Fatal(msg.clone()),
                            other => FailureReason::ContainerCreateError(other.to_string()),
                        };
                        self.ctx
                            .transition(
                                id,
                                Transition::fail(InstanceState::Creating, failure),
                                EventSource::Lifecycle,
                            )
                            .await?;
                        Err(e)
                    }
                }
            }
            actual => Err(invalid_transition(
                id,
                InstanceState::Running,
                actual,
                InstanceState::Restarting,
            )),
        }
    }

    /// Tear down the container and reclaim the proxy
    #[instrument(skip_all, fields(instance_id = %id))]
    pub async fn remove(&self, id: &InstanceId) -> FleetResult<Instance> {
        let mut instance = self.ctx.instance(id).await?;
        if instance.state.is_monitored() {
            instance = self.stop(id).await?;
        }

        match instance.state {
            InstanceState::Stopped | InstanceState::Failed => {
                if let Some(container) = &instance.container_ref {
                    match self.ctx.runtime.remove(container, true).await {
                        Ok(()) | Err(RuntimeError::NotFound(_)) => {}
                        Err(e) if e.is_timeout() && instance.state == InstanceState::Stopped => {
                            warn!(instance_id = %id, error = %e, "Remove timed out, forcing instance to failed");
                            self.ctx
                                .release_proxy(&instance.proxy_id, id, EventSource::Lifecycle);
                            self.ctx
                                .transition(
                                    id,
                                    Transition::fail(
                                        InstanceState::Stopped,
                                        FailureReason::ForcedStopTimeout,
                                    ),
                                    EventSource::Lifecycle,
                                )
                                .await?;
                            return Err(e.into());
                        }
                        Err(e) => {
                            warn!(instance_id = %id, error = %e, "Container remove failed");
                            return Err(e.into());
                        }
                    }
                }

                let removed = self
                    .ctx
                    .transition(
                        id,
                        Transition::new(
                            instance.state,
                            InstanceState::Removed,
                            TransitionReason::Operator,
                        ),
                        EventSource::Lifecycle,
                    )
                    .await?;
                self.ctx
                    .release_proxy(&removed.proxy_id, id, EventSource::Lifecycle);
                self.ctx.monitor.forget(id);

                info!(instance_id = %id, "Instance removed");
                self.ctx.events.emit(
                    FleetEvent::InstanceRemoved {
                        instance_id: id.clone(),
                    },
                    EventSource::Lifecycle,
                );
                Ok(removed)
            }
            actual => Err(invalid_transition(
                id,
                InstanceState::Stopped,
                actual,
                InstanceState::Removed,
            )),
        }
    }

    /// Rebuild fleet state from a persisted snapshot after a process restart
    #[instrument(skip_all)]
    pub async fn reattach(&self, snapshot: FleetSnapshot) -> FleetResult<ReattachReport> {
        let mut report = ReattachReport::default();
        self.ctx.pool.restore(snapshot.proxies);

        let instances: Vec<Instance> = snapshot
            .instances
            .into_iter()
            .map(InstanceRecord::into_instance)
            .collect();

        for instance in &instances {
            self.ctx.registry.restore(instance.clone()).await?;
            if instance.state.is_active() {
                if let Err(e) = self
                    .ctx
                    .pool
                    .restore_assignment(&instance.proxy_id, &instance.id)
                {
                    warn!(instance_id = %instance.id, error = %e, "Proxy could not be re-bound");
                }
            }
            report.restored += 1;
        }

        for instance in instances {
            match instance.state {
                InstanceState::Running | InstanceState::Degraded => {
                    let status = match &instance.container_ref {
                        Some(container) => match self.ctx.runtime.inspect(container).await {
                            Ok(status) => status,
                            Err(e) => {
                                warn!(instance_id = %instance.id, error = %e, "Inspect failed during reattach");
                                ContainerStatus::Running
                            }
                        },
                        None => ContainerStatus::Missing,
                    };
                    if status == ContainerStatus::Missing {
                        self.mark_lost(instance).await?;
                        report.lost += 1;
                    } else {
                        self.watch(&instance.id).await;
                        report.resumed += 1;
                    }
                }
                state if state.is_transient() => {
                    self.ctx
                        .release_proxy(&instance.proxy_id, &instance.id, EventSource::Lifecycle);
                    self.ctx
                        .transition(
                            &instance.id,
                            Transition::fail(state, FailureReason::Interrupted),
                            EventSource::Lifecycle,
                        )
                        .await?;
                    report.interrupted += 1;
                }
                _ => {}
            }
        }

        info!(
            restored = report.restored,
            resumed = report.resumed,
            lost = report.lost,
            interrupted = report.interrupted,
            "Fleet state reattached"
        );
        Ok(report)
    }

    /// Container spec for an instance bound to `proxy`
    pub fn container_spec(&self, instance: &Instance, proxy: &ProxyIdentity) -> ContainerSpec {
        let lifecycle = &self.ctx.lifecycle;
        ContainerSpec::new(
            format!("{}-{}", lifecycle.container_prefix, instance.id.as_uuid()),
            lifecycle.image.clone(),
            instance.resource_limits.clone(),
        )
        .env(ENV_WORKER_UUID, instance.device_identity.clone())
        .env(ENV_WORKER_DEVICE_NAME, instance.name.clone())
        .env(ENV_PROXY_URL, proxy.to_url())
        .label("fleet.instance", instance.id.to_string())
        .label("fleet.name", instance.name.clone())
    }

    /// Move a running instance onto a freshly allocated proxy.
    ///
    /// The replacement is allocated before the old proxy is given up, so the
    /// pool never hands the same endpoint back. `NoProxyAvailable` leaves the
    /// instance untouched.
    pub(crate) async fn reassign_proxy(
        &self,
        instance: &Instance,
        reason: TransitionReason,
        retire: Retire,
        source: EventSource,
    ) -> FleetResult<Instance> {
        let id = &instance.id;
        let previous = instance.proxy_id;
        let replacement = self.ctx.pool.allocate(id)?;

        let restarting = match self
            .ctx
            .transition(
                id,
                Transition::new(instance.state, InstanceState::Restarting, reason.clone())
                    .with_proxy(replacement.id),
                source,
            )
            .await
        {
            Ok(restarting) => restarting,
            Err(e) => {
                self.ctx.release_proxy(&replacement.id, id, source);
                return Err(e);
            }
        };

        match retire {
            Retire::Release => self.ctx.release_proxy(&previous, id, source),
            Retire::BanAt(threshold) => self.ctx.retire_proxy(&previous, id, threshold, source),
        }
        self.ctx.events.emit(
            FleetEvent::ProxyAssigned {
                proxy_id: replacement.id,
                instance_id: id.clone(),
            },
            source,
        );

        let rebound = match &restarting.container_ref {
            Some(container) if self.ctx.runtime.supports_hot_reconfigure() => self
                .ctx
                .runtime
                .reconfigure_proxy(container, &replacement.identity.to_url())
                .await
                .map(|_| container.clone())
                .map_err(FleetError::from),
            _ => self.recreate(&restarting, &replacement.identity).await,
        };

        match rebound {
            Ok(container) => {
                let running = self
                    .ctx
                    .transition(
                        id,
                        Transition::new(InstanceState::Restarting, InstanceState::Running, reason)
                            .with_container(container),
                        source,
                    )
                    .await?;
                self.ctx.monitor.reset_streaks(id);
                info!(instance_id = %id, from = %previous, to = %replacement.id, "Proxy reassigned");
                self.ctx.events.emit(
                    FleetEvent::ProxyReassigned {
                        instance_id: id.clone(),
                        from: previous,
                        to: replacement.id,
                    },
                    source,
                );
                Ok(running)
            }
            Err(e) => {
                warn!(instance_id = %id, error = %e, "Rebinding to new proxy failed");
                self.ctx.release_proxy(&replacement.id, id, source);
                self.ctx
                    .transition(
                        id,
                        Transition::fail(
                            InstanceState::Restarting,
                            FailureReason::RestartFailed(e.to_string()),
                        ),
                        source,
                    )
                    .await?;
                Err(e)
            }
        }
    }

    /// Stop then start the instance's container, recreating it if it vanished
    pub(crate) async fn cycle_container(
        &self,
        instance: &Instance,
    ) -> Result<ContainerRef, CycleError> {
        if let Some(container) = &instance.container_ref {
            match self
                .ctx
                .runtime
                .stop(container, self.ctx.lifecycle.stop_grace())
                .await
            {
                Ok(()) | Err(RuntimeError::NotFound(_)) => {}
                Err(e) if e.is_timeout() => {
                    return Err(CycleError {
                        failure: FailureReason::ForcedStopTimeout,
                        error: e.into(),
                    })
                }
                Err(e) => return Err(FleetError::from(e).into()),
            }
        }
        Ok(self.start_or_recreate(instance).await?)
    }

    pub(crate) async fn watch(&self, id: &InstanceId) {
        if let Err(e) = self.ctx.monitor.watch(id.clone()).await {
            warn!(instance_id = %id, error = %e, "Instance not handed to monitor");
        }
    }

    async fn start_or_recreate(&self, instance: &Instance) -> FleetResult<ContainerRef> {
        if let Some(container) = &instance.container_ref {
            match self.ctx.runtime.start(container).await {
                Ok(()) => return Ok(container.clone()),
                Err(RuntimeError::NotFound(_)) => {
                    debug!(instance_id = %instance.id, "Container gone, recreating");
                }
                Err(e) => return Err(e.into()),
            }
        }
        let identity = self.proxy_identity(&instance.proxy_id)?;
        self.recreate(instance, &identity).await
    }

    /// Replace the instance's container with one built against `proxy`
    async fn recreate(&self, instance: &Instance, proxy: &ProxyIdentity) -> FleetResult<ContainerRef> {
        if let Some(container) = &instance.container_ref {
            match self.ctx.runtime.remove(container, true).await {
                Ok(()) | Err(RuntimeError::NotFound(_)) => {}
                Err(e) => return Err(e.into()),
            }
        }
        let spec = self.container_spec(instance, proxy);
        Ok(self.ctx.runtime.create_and_start(&spec).await?)
    }

    async fn resume(
        &self,
        id: &InstanceId,
        from: InstanceState,
        container: ContainerRef,
    ) -> FleetResult<Instance> {
        let running = self
            .ctx
            .transition(
                id,
                Transition::new(from, InstanceState::Running, TransitionReason::Operator)
                    .with_container(container),
                EventSource::Lifecycle,
            )
            .await?;
        self.watch(id).await;
        Ok(running)
    }

    /// A running instance whose container disappeared is failed through
    /// Restarting, the only way from Running or Degraded into Failed.
    async fn mark_lost(&self, instance: Instance) -> FleetResult<()> {
        let id = &instance.id;
        warn!(instance_id = %id, "Container lost while the process was down");
        self.ctx
            .transition(
                id,
                Transition::new(
                    instance.state,
                    InstanceState::Restarting,
                    TransitionReason::Failure(FailureReason::ContainerLost),
                ),
                EventSource::Lifecycle,
            )
            .await?;
        self.ctx
            .release_proxy(&instance.proxy_id, id, EventSource::Lifecycle);
        self.ctx
            .transition(
                id,
                Transition::fail(InstanceState::Restarting, FailureReason::ContainerLost),
                EventSource::Lifecycle,
            )
            .await?;
        Ok(())
    }

    fn proxy_identity(&self, proxy_id: &ProxyId) -> FleetResult<ProxyIdentity> {
        self.ctx
            .pool
            .get(proxy_id)
            .map(|endpoint| endpoint.identity)
            .ok_or_else(|| FleetError::Internal(format!("proxy {} missing from pool", proxy_id)))
    }

    fn rejected(&self, name: &str, reason: RejectReason) -> FleetError {
        warn!(name, reason = %reason, "Instance rejected by safeguards");
        self.ctx.events.emit(
            FleetEvent::PolicyRejected {
                name: name.to_string(),
                reason,
            },
            EventSource::Policy,
        );
        FleetError::PolicyRejected(reason)
    }
}

/// A failed stop-then-start cycle and the failure to record for it
#[derive(Debug)]
pub(crate) struct CycleError {
    pub failure: FailureReason,
    pub error: FleetError,
}

impl From<FleetError> for CycleError {
    fn from(error: FleetError) -> Self {
        Self {
            failure: FailureReason::RestartFailed(error.to_string()),
            error,
        }
    }
}

fn invalid_transition(
    id: &InstanceId,
    expected: InstanceState,
    actual: InstanceState,
    target: InstanceState,
) -> FleetError {
    FleetError::InvalidStateTransition {
        id: id.clone(),
        expected,
        actual,
        target,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::fixture;
    use fleet_policy::ProxyClassification;
    use fleet_registry::InMemorySnapshotStore;
    use fleet_runtime::SimulatedRuntime;
    use fleet_types::ProxyStatus;
    use std::time::Duration;

    #[test]
    fn test_name_validation() {
        assert!(validate_name("worker-01").is_ok());
        assert!(validate_name("a.b_c").is_ok());
        assert!(validate_name("").is_err());
        assert!(validate_name("has space").is_err());
        assert!(validate_name("slash/name").is_err());
        assert!(validate_name(&"x".repeat(MAX_NAME_LEN)).is_ok());
        assert!(validate_name(&"x".repeat(MAX_NAME_LEN + 1)).is_err());
    }

    #[tokio::test]
    async fn test_create_binds_proxy_and_starts_container() {
        let fx = fixture().proxies(2).build().await;
        let lifecycle = fx.plane.lifecycle();

        let instance = lifecycle.create(CreateRequest::new("worker-1")).await.unwrap();
        assert_eq!(instance.state, InstanceState::Running);

        let endpoint = fx.plane.pool().get(&instance.proxy_id).unwrap();
        assert_eq!(endpoint.assigned_instance.as_ref(), Some(&instance.id));

        let container = fx
            .sim
            .container(instance.container_ref.as_ref().unwrap())
            .unwrap();
        assert_eq!(container.status, ContainerStatus::Running);
        assert_eq!(
            container.spec.name,
            format!("fleet-{}", instance.id.as_uuid())
        );
        assert_eq!(
            container.spec.env.get("WORKER_UUID"),
            Some(&instance.device_identity)
        );
        assert_eq!(
            container.spec.env.get("WORKER_DEVICE_NAME").map(String::as_str),
            Some("worker-1")
        );
        assert_eq!(
            container.spec.proxy_url(),
            Some(endpoint.identity.to_url().as_str())
        );
        assert!(fx.plane.monitor().is_watching(&instance.id));
    }

    #[tokio::test]
    async fn test_invalid_input_has_no_side_effects() {
        let fx = fixture().proxies(1).build().await;
        let lifecycle = fx.plane.lifecycle();

        let err = lifecycle.create(CreateRequest::new("bad name")).await.unwrap_err();
        assert!(matches!(err, FleetError::Validation(_)));

        let err = lifecycle
            .create(CreateRequest::new("ok").with_proxy_spec("socks5://host"))
            .await
            .unwrap_err();
        assert!(matches!(err, FleetError::Validation(_)));

        assert_eq!(fx.plane.pool().len(), 1);
        assert_eq!(fx.plane.pool().stats().assigned, 0);
        assert!(fx.sim.is_empty());
    }

    #[tokio::test]
    async fn test_operator_supplied_proxy_is_added_and_reserved() {
        let fx = fixture().proxies(0).build().await;
        let instance = fx
            .plane
            .lifecycle()
            .create(CreateRequest::new("named").with_proxy_spec("http://user:pw@198.51.100.4:3128"))
            .await
            .unwrap();

        assert_eq!(fx.plane.pool().len(), 1);
        let endpoint = fx.plane.pool().get(&instance.proxy_id).unwrap();
        assert_eq!(endpoint.identity.host, "198.51.100.4");
        assert_eq!(endpoint.assigned_instance, Some(instance.id));
    }

    #[tokio::test]
    async fn test_capacity_rejection_consumes_nothing() {
        let policy = SafeguardPolicy {
            max_instances: 2,
            ..SafeguardPolicy::permissive()
        };
        let fx = fixture().policy(policy).proxies(3).build().await;
        let lifecycle = fx.plane.lifecycle();

        lifecycle.create(CreateRequest::new("a")).await.unwrap();
        lifecycle.create(CreateRequest::new("b")).await.unwrap();
        let err = lifecycle.create(CreateRequest::new("c")).await.unwrap_err();

        assert!(matches!(
            err,
            FleetError::PolicyRejected(RejectReason::MaxInstancesExceeded)
        ));
        assert_eq!(fx.plane.pool().stats().assigned, 2);
        assert_eq!(fx.sim.len(), 2);
        assert_eq!(fx.plane.list_instances().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_creates_respect_max_instances() {
        let policy = SafeguardPolicy {
            max_instances: 3,
            ..SafeguardPolicy::permissive()
        };
        let fx = fixture().policy(policy).proxies(6).build().await;
        let lifecycle = fx.plane.lifecycle().clone();

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let lifecycle = lifecycle.clone();
                tokio::spawn(async move {
                    lifecycle
                        .create(CreateRequest::new(format!("w{}", i)))
                        .await
                })
            })
            .collect();

        let mut admitted = 0;
        let mut rejected = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => admitted += 1,
                Err(FleetError::PolicyRejected(RejectReason::MaxInstancesExceeded)) => {
                    rejected += 1
                }
                Err(e) => panic!("unexpected error: {}", e),
            }
        }

        assert_eq!(admitted, 3);
        assert_eq!(rejected, 5);
        assert_eq!(fx.plane.pool().stats().assigned, 3);
    }

    #[tokio::test]
    async fn test_disallowed_country_bans_proxy() {
        let fx = fixture().proxies(1).build().await;
        let proxy = fx.plane.pool().list()[0].clone();
        fx.classifier.set(
            &proxy.identity.host,
            ProxyClassification {
                country: "KP".into(),
                anonymous: true,
                ssl_ok: true,
                exit_ip: None,
            },
        );

        let err = fx
            .plane
            .lifecycle()
            .create(CreateRequest::new("geo"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "POLICY_REJECTED:COUNTRY_NOT_ALLOWED");

        let endpoint = fx.plane.pool().get(&proxy.id).unwrap();
        assert_eq!(endpoint.status, ProxyStatus::Banned);
        assert!(endpoint.assigned_instance.is_none());

        let instances = fx.plane.list_instances().await.unwrap();
        assert_eq!(instances.len(), 1);
        assert_eq!(instances[0].state, InstanceState::Failed);
        assert!(fx.sim.is_empty());
    }

    #[tokio::test]
    async fn test_failed_tls_check_releases_without_ban() {
        let fx = fixture().proxies(1).build().await;
        let proxy = fx.plane.pool().list()[0].clone();
        fx.classifier.set(
            &proxy.identity.host,
            ProxyClassification {
                country: "US".into(),
                anonymous: true,
                ssl_ok: false,
                exit_ip: None,
            },
        );

        let err = fx
            .plane
            .lifecycle()
            .create(CreateRequest::new("tls"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            FleetError::PolicyRejected(RejectReason::SslVerificationFailed)
        ));

        let endpoint = fx.plane.pool().get(&proxy.id).unwrap();
        assert_eq!(endpoint.status, ProxyStatus::Healthy);
        assert!(endpoint.assigned_instance.is_none());
    }

    #[tokio::test]
    async fn test_runtime_failures_fail_the_instance() {
        let fx = fixture().proxies(2).build().await;
        let lifecycle = fx.plane.lifecycle();

        fx.sim
            .fail_next_create(RuntimeError::Unsatisfiable("no such image".into()));
        let err = lifecycle.create(CreateRequest::new("fatal")).await.unwrap_err();
        assert!(matches!(err, FleetError::Fatal(_)));

        fx.sim.fail_next_create(RuntimeError::Api("daemon busy".into()));
        let err = lifecycle.create(CreateRequest::new("busy")).await.unwrap_err();
        assert_eq!(err.code(), "CONTAINER_CREATE_ERROR");

        let instances = fx.plane.list_instances().await.unwrap();
        assert!(instances.iter().all(|i| i.state == InstanceState::Failed));
        assert_eq!(fx.plane.pool().stats().assigned, 0);
    }

    #[tokio::test]
    async fn test_stop_keeps_proxy_and_remove_releases_once() {
        let fx = fixture().proxies(1).build().await;
        let lifecycle = fx.plane.lifecycle();
        let mut events = fx.plane.subscribe_events();

        let instance = lifecycle.create(CreateRequest::new("w")).await.unwrap();
        let stopped = lifecycle.stop(&instance.id).await.unwrap();
        assert_eq!(stopped.state, InstanceState::Stopped);
        assert_eq!(
            fx.plane.pool().get(&instance.proxy_id).unwrap().assigned_instance,
            Some(instance.id.clone())
        );
        assert!(!fx.plane.monitor().is_watching(&instance.id));

        let removed = lifecycle.remove(&instance.id).await.unwrap();
        assert_eq!(removed.state, InstanceState::Removed);
        assert!(fx.sim.is_empty());

        let err = lifecycle.remove(&instance.id).await.unwrap_err();
        assert!(err.is_state_race());

        let mut releases = 0;
        while let Ok(envelope) = events.try_recv() {
            if matches!(envelope.event, FleetEvent::ProxyReleased { .. }) {
                releases += 1;
            }
        }
        assert_eq!(releases, 1);
        assert_eq!(
            fx.plane.pool().get(&instance.proxy_id).unwrap().status,
            ProxyStatus::Healthy
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_timeout_forces_failure_and_releases_proxy() {
        let fx = fixture().proxies(1).build().await;
        let lifecycle = fx.plane.lifecycle();
        let instance = lifecycle.create(CreateRequest::new("slow")).await.unwrap();

        fx.sim.set_stop_delay(Duration::from_secs(600));
        let err = lifecycle.stop(&instance.id).await.unwrap_err();
        assert!(err.is_retryable());

        let failed = fx.plane.get_instance(&instance.id).await.unwrap();
        assert_eq!(failed.state, InstanceState::Failed);
        assert_eq!(failed.failure, Some(FailureReason::ForcedStopTimeout));
        assert!(fx
            .plane
            .pool()
            .get(&instance.proxy_id)
            .unwrap()
            .assigned_instance
            .is_none());

        fx.sim.set_stop_delay(Duration::ZERO);
        let removed = lifecycle.remove(&instance.id).await.unwrap();
        assert_eq!(removed.state, InstanceState::Removed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_remove_timeout_forces_failure_and_releases_proxy() {
        let fx = fixture().proxies(1).build().await;
        let lifecycle = fx.plane.lifecycle();
        let instance = lifecycle.create(CreateRequest::new("stuck")).await.unwrap();

        fx.sim.set_remove_delay(Duration::from_secs(600));
        let err = lifecycle.remove(&instance.id).await.unwrap_err();
        assert!(err.is_retryable());

        let failed = fx.plane.get_instance(&instance.id).await.unwrap();
        assert_eq!(failed.state, InstanceState::Failed);
        assert_eq!(failed.failure, Some(FailureReason::ForcedStopTimeout));
        assert!(fx
            .plane
            .pool()
            .get(&instance.proxy_id)
            .unwrap()
            .assigned_instance
            .is_none());
        assert_eq!(fx.plane.context().registry.count_active().await.unwrap(), 0);

        fx.sim.set_remove_delay(Duration::ZERO);
        let removed = lifecycle.remove(&instance.id).await.unwrap();
        assert_eq!(removed.state, InstanceState::Removed);
        assert!(fx.sim.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_stop_timeout_records_forced_stop() {
        let fx = fixture().proxies(1).build().await;
        let lifecycle = fx.plane.lifecycle();
        let instance = lifecycle.create(CreateRequest::new("hung")).await.unwrap();

        fx.sim.set_stop_delay(Duration::from_secs(600));
        assert!(lifecycle.restart(&instance.id).await.is_err());

        let failed = fx.plane.get_instance(&instance.id).await.unwrap();
        assert_eq!(failed.state, InstanceState::Failed);
        assert_eq!(failed.failure, Some(FailureReason::ForcedStopTimeout));
        assert!(fx
            .plane
            .pool()
            .get(&instance.proxy_id)
            .unwrap()
            .assigned_instance
            .is_none());
    }

    #[tokio::test]
    async fn test_restart_paths() {
        let fx = fixture().proxies(1).build().await;
        let lifecycle = fx.plane.lifecycle();
        let instance = lifecycle.create(CreateRequest::new("r")).await.unwrap();

        let restarted = lifecycle.restart(&instance.id).await.unwrap();
        assert_eq!(restarted.state, InstanceState::Running);
        assert_eq!(restarted.restart_count, 0);
        assert_eq!(restarted.container_ref, instance.container_ref);

        lifecycle.stop(&instance.id).await.unwrap();
        let container = instance.container_ref.clone().unwrap();
        fx.sim.forget(&container);

        let revived = lifecycle.restart(&instance.id).await.unwrap();
        assert_eq!(revived.state, InstanceState::Running);
        assert_ne!(revived.container_ref, Some(container));
        assert_eq!(fx.sim.running_count(), 1);
    }

    #[tokio::test]
    async fn test_restart_of_failed_instance_is_refused() {
        let fx = fixture().proxies(1).build().await;
        fx.sim.fail_next_create(RuntimeError::Api("boom".into()));
        let _ = fx.plane.lifecycle().create(CreateRequest::new("f")).await;
        let failed = fx.plane.list_instances().await.unwrap().remove(0);

        let err = fx.plane.lifecycle().restart(&failed.id).await.unwrap_err();
        assert!(matches!(
            err,
            FleetError::InvalidStateTransition {
                actual: InstanceState::Failed,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_reattach_resumes_marks_lost_and_interrupted() {
        let sim = Arc::new(SimulatedRuntime::new());
        let first = fixture().runtime(sim.clone()).proxies(3).build().await;
        let kept = first
            .plane
            .lifecycle()
            .create(CreateRequest::new("kept"))
            .await
            .unwrap();
        let lost = first
            .plane
            .lifecycle()
            .create(CreateRequest::new("lost"))
            .await
            .unwrap();
        sim.forget(lost.container_ref.as_ref().unwrap());

        let mut snapshot = first.plane.context().snapshot().await.unwrap();
        let third_proxy = first
            .plane
            .pool()
            .list()
            .into_iter()
            .find(|p| p.assigned_instance.is_none())
            .unwrap();
        let mut interrupted = Instance::pending("mid-create", third_proxy.id, kept.resource_limits.clone());
        interrupted.state = InstanceState::Creating;
        snapshot.instances.push(interrupted.to_record());
        drop(first);

        let second = fixture()
            .runtime(sim.clone())
            .store(Arc::new(InMemorySnapshotStore::with_snapshot(snapshot.clone())))
            .proxies(0)
            .build()
            .await;
        let mut events = second.plane.subscribe_events();
        let report = second.plane.lifecycle().reattach(snapshot).await.unwrap();
        assert_eq!(
            report,
            ReattachReport {
                restored: 3,
                resumed: 1,
                lost: 1,
                interrupted: 1,
            }
        );

        let pool = second.plane.pool();
        assert_eq!(
            pool.get(&kept.proxy_id).unwrap().assigned_instance,
            Some(kept.id.clone())
        );
        assert!(pool.get(&lost.proxy_id).unwrap().assigned_instance.is_none());
        assert!(pool.get(&third_proxy.id).unwrap().assigned_instance.is_none());

        let lost_now = second.plane.get_instance(&lost.id).await.unwrap();
        assert_eq!(lost_now.failure, Some(FailureReason::ContainerLost));
        let interrupted_now = second.plane.get_instance(&interrupted.id).await.unwrap();
        assert_eq!(interrupted_now.failure, Some(FailureReason::Interrupted));
        assert!(second.plane.monitor().is_watching(&kept.id));

        let mut transitions = 0;
        while let Ok(envelope) = events.try_recv() {
            if let FleetEvent::InstanceTransitioned { from, to, .. } = envelope.event {
                assert!(from.can_transition_to(to), "{} -> {} is not a legal edge", from, to);
                transitions += 1;
            }
        }
        assert_eq!(transitions, 3);
    }
}
