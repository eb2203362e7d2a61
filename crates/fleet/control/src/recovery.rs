//! Auto-recovery coordinator
//!
//! Consumes monitor reports and decides what to do with an unhealthy
//! instance: reassign its proxy when the proxy is the cause, otherwise
//! restart it with exponential backoff. All state changes are CAS
//! transitions; losing a race against an operator drops the recovery.

use crate::config::RecoveryConfig;
use crate::context::FleetContext;
use crate::error::{FleetError, FleetResult};
use crate::lifecycle::{CycleError, LifecycleController, Retire};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use fleet_registry::Transition;
use fleet_types::{
    ContainerStatus, EventSource, FailureReason, FleetEvent, HealthSignal, Instance, InstanceId,
    InstanceState, MonitorReport, ProxyId, SignalKind, TransitionReason,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, instrument, warn};

/// `min(base * 2^attempt, cap)` with saturating arithmetic
pub fn backoff_delay(base: Duration, cap: Duration, attempt: u32) -> Duration {
    let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
    base.saturating_mul(factor).min(cap)
}

/// What the coordinator did with one report
#[derive(Debug, Clone, PartialEq)]
pub enum RecoveryAction {
    /// Nothing to do
    None,
    /// Advisory resource alert emitted
    Alerted,
    /// Degraded instance returned to Running
    Recovered,
    Restarted { attempt: u32, delay: Duration },
    Reassigned { from: ProxyId, to: ProxyId },
    Failed(FailureReason),
    /// An operator moved the instance first
    LostRace,
}

/// Per-instance recovery bookkeeping
#[derive(Debug, Clone, Default)]
pub struct RecoveryContext {
    pub attempts: u32,
    pub last_action: Option<RecoveryAction>,
    pub last_attempt_at: Option<DateTime<Utc>>,
}

pub struct RecoveryCoordinator {
    ctx: Arc<FleetContext>,
    lifecycle: Arc<LifecycleController>,
    config: RecoveryConfig,
    contexts: DashMap<InstanceId, RecoveryContext>,
    in_flight: DashMap<InstanceId, ()>,
}

/// Marks an instance as under recovery until dropped
struct InFlight<'a> {
    map: &'a DashMap<InstanceId, ()>,
    id: InstanceId,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.map.remove(&self.id);
    }
}

impl RecoveryCoordinator {
    pub fn new(
        ctx: Arc<FleetContext>,
        lifecycle: Arc<LifecycleController>,
        config: RecoveryConfig,
    ) -> Self {
        Self {
            ctx,
            lifecycle,
            config,
            contexts: DashMap::new(),
            in_flight: DashMap::new(),
        }
    }

    pub fn config(&self) -> &RecoveryConfig {
        &self.config
    }

    pub fn context(&self, id: &InstanceId) -> Option<RecoveryContext> {
        self.contexts.get(id).map(|c| c.clone())
    }

    pub fn is_recovering(&self, id: &InstanceId) -> bool {
        self.in_flight.contains_key(id)
    }

    /// Process one monitor report
    #[instrument(skip_all, fields(instance_id = %report.instance_id()))]
    pub async fn handle(&self, report: MonitorReport) -> FleetResult<RecoveryAction> {
        let id = report.instance_id().clone();
        let outcome = match report {
            MonitorReport::Recovered { instance_id } => self.on_recovered(&instance_id).await,
            MonitorReport::Signal(signal) => self.on_signal(signal).await,
        };

        match outcome {
            Ok(RecoveryAction::None) => Ok(RecoveryAction::None),
            Ok(action) => {
                self.record(&id, &action);
                self.ctx.persist().await;
                Ok(action)
            }
            Err(e) if e.is_state_race() => {
                warn!(instance_id = %id, error = %e, "Recovery lost a state race, dropping");
                Ok(RecoveryAction::LostRace)
            }
            Err(e) => Err(e),
        }
    }

    /// Run the coordinator until the report channel closes or shutdown is signalled
    pub fn spawn(
        self: Arc<Self>,
        mut reports: mpsc::Receiver<MonitorReport>,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut tasks = JoinSet::new();
            info!("Recovery coordinator started");
            loop {
                tokio::select! {
                    report = reports.recv() => {
                        let Some(report) = report else { break };
                        let coordinator = self.clone();
                        tasks.spawn(async move {
                            let id = report.instance_id().clone();
                            if let Err(e) = coordinator.handle(report).await {
                                warn!(instance_id = %id, error = %e, "Recovery failed");
                            }
                        });
                    }
                    Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            tasks.shutdown().await;
            info!("Recovery coordinator stopped");
        })
    }

    async fn on_recovered(&self, id: &InstanceId) -> FleetResult<RecoveryAction> {
        if self.is_recovering(id) {
            return Ok(RecoveryAction::None);
        }
        let instance = self.ctx.instance(id).await?;
        if instance.state != InstanceState::Degraded {
            return Ok(RecoveryAction::None);
        }
        self.ctx
            .transition(
                id,
                Transition::new(
                    InstanceState::Degraded,
                    InstanceState::Running,
                    TransitionReason::HealthRecovered,
                ),
                EventSource::Recovery,
            )
            .await?;
        Ok(RecoveryAction::Recovered)
    }

    async fn on_signal(&self, signal: HealthSignal) -> FleetResult<RecoveryAction> {
        let id = signal.instance_id.clone();
        if !signal.kind.is_actionable() {
            let stats = self
                .ctx
                .monitor
                .snapshot(&id)
                .and_then(|s| s.stats)
                .unwrap_or_default();
            info!(
                instance_id = %id,
                cpu_percent = stats.cpu_percent,
                memory_percent = stats.memory_percent,
                "Resource threshold exceeded"
            );
            self.ctx.events.emit(
                FleetEvent::ResourceAlert {
                    instance_id: id,
                    cpu_percent: stats.cpu_percent,
                    memory_percent: stats.memory_percent,
                },
                EventSource::Recovery,
            );
            return Ok(RecoveryAction::Alerted);
        }

        let policy = self.ctx.policy.current().await;
        if signal.consecutive < policy.error_threshold {
            debug!(
                instance_id = %id,
                kind = %signal.kind,
                consecutive = signal.consecutive,
                "Below error threshold"
            );
            return Ok(RecoveryAction::None);
        }

        let Some(_guard) = self.begin(&id) else {
            debug!(instance_id = %id, "Recovery already in flight");
            return Ok(RecoveryAction::None);
        };

        let instance = self.ctx.instance(&id).await?;
        let degraded = match instance.state {
            InstanceState::Running => {
                self.ctx
                    .transition(
                        &id,
                        Transition::new(
                            InstanceState::Running,
                            InstanceState::Degraded,
                            TransitionReason::HealthDegraded(signal.kind.to_string()),
                        ),
                        EventSource::Recovery,
                    )
                    .await?
            }
            InstanceState::Degraded => instance,
            state => {
                debug!(instance_id = %id, state = %state, "Signal for instance outside running states");
                return Ok(RecoveryAction::None);
            }
        };

        self.recover(degraded, signal.kind).await
    }

    async fn recover(&self, instance: Instance, kind: SignalKind) -> FleetResult<RecoveryAction> {
        let proxy_is_cause = kind == SignalKind::ProxyUnreachable
            && match &instance.container_ref {
                Some(container) => matches!(
                    self.ctx.runtime.inspect(container).await,
                    Ok(ContainerStatus::Running)
                ),
                None => false,
            };

        if proxy_is_cause && self.config.reassign_on_failure {
            self.reassign(instance).await
        } else {
            self.restart_with_backoff(instance).await
        }
    }

    async fn reassign(&self, instance: Instance) -> FleetResult<RecoveryAction> {
        let from = instance.proxy_id;
        match self
            .lifecycle
            .reassign_proxy(
                &instance,
                TransitionReason::ProxyReassigned,
                Retire::BanAt(self.config.ban_threshold),
                EventSource::Recovery,
            )
            .await
        {
            Ok(updated) => Ok(RecoveryAction::Reassigned {
                from,
                to: updated.proxy_id,
            }),
            Err(FleetError::NoProxyAvailable) => {
                warn!(instance_id = %instance.id, "No replacement proxy available");
                self.fail(&instance, FailureReason::NoProxyAvailable).await
            }
            Err(e) if e.is_state_race() => Err(e),
            Err(e) => Ok(RecoveryAction::Failed(FailureReason::RestartFailed(
                e.to_string(),
            ))),
        }
    }

    async fn restart_with_backoff(&self, instance: Instance) -> FleetResult<RecoveryAction> {
        let id = instance.id.clone();
        if instance.restart_count >= self.config.max_restarts {
            warn!(
                instance_id = %id,
                restarts = instance.restart_count,
                "Restart ceiling reached"
            );
            return self
                .fail(
                    &instance,
                    FailureReason::RestartCeilingExceeded {
                        restarts: instance.restart_count,
                    },
                )
                .await;
        }

        let attempt = instance.restart_count + 1;
        let delay = backoff_delay(
            self.config.backoff_base(),
            self.config.backoff_cap(),
            instance.restart_count,
        );
        info!(instance_id = %id, attempt, delay_ms = delay.as_millis() as u64, "Restart scheduled");
        self.ctx.events.emit(
            FleetEvent::RecoveryScheduled {
                instance_id: id.clone(),
                attempt,
                delay_ms: delay.as_millis() as u64,
            },
            EventSource::Recovery,
        );
        tokio::time::sleep(delay).await;

        let restarting = self
            .ctx
            .transition(
                &id,
                Transition::new(
                    InstanceState::Degraded,
                    InstanceState::Restarting,
                    TransitionReason::Recovery { attempt },
                )
                .bump_restart(),
                EventSource::Recovery,
            )
            .await?;

        match self.lifecycle.cycle_container(&restarting).await {
            Ok(container) => {
                self.ctx
                    .transition(
                        &id,
                        Transition::new(
                            InstanceState::Restarting,
                            InstanceState::Running,
                            TransitionReason::Recovery { attempt },
                        )
                        .with_container(container),
                        EventSource::Recovery,
                    )
                    .await?;
                self.ctx.monitor.reset_streaks(&id);
                Ok(RecoveryAction::Restarted { attempt, delay })
            }
            Err(CycleError { failure, error }) => {
                warn!(instance_id = %id, error = %error, "Recovery restart failed");
                self.ctx.retire_proxy(
                    &restarting.proxy_id,
                    &id,
                    self.config.ban_threshold,
                    EventSource::Recovery,
                );
                self.ctx
                    .transition(
                        &id,
                        Transition::fail(InstanceState::Restarting, failure.clone()),
                        EventSource::Recovery,
                    )
                    .await?;
                Ok(RecoveryAction::Failed(failure))
            }
        }
    }

    /// Degraded has no direct edge to Failed; go through Restarting
    async fn fail(&self, instance: &Instance, failure: FailureReason) -> FleetResult<RecoveryAction> {
        let id = &instance.id;
        self.ctx
            .transition(
                id,
                Transition::new(
                    instance.state,
                    InstanceState::Restarting,
                    TransitionReason::Failure(failure.clone()),
                ),
                EventSource::Recovery,
            )
            .await?;
        self.ctx.retire_proxy(
            &instance.proxy_id,
            id,
            self.config.ban_threshold,
            EventSource::Recovery,
        );
        self.ctx
            .transition(
                id,
                Transition::fail(InstanceState::Restarting, failure.clone()),
                EventSource::Recovery,
            )
            .await?;
        self.ctx.monitor.unwatch(id);
        Ok(RecoveryAction::Failed(failure))
    }

    fn begin(&self, id: &InstanceId) -> Option<InFlight<'_>> {
        match self.in_flight.entry(id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => None,
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(());
                Some(InFlight {
                    map: &self.in_flight,
                    id: id.clone(),
                })
            }
        }
    }

    fn record(&self, id: &InstanceId, action: &RecoveryAction) {
        let mut context = self.contexts.entry(id.clone()).or_default();
        match action {
            RecoveryAction::Recovered => context.attempts = 0,
            RecoveryAction::Restarted { .. }
            | RecoveryAction::Reassigned { .. }
            | RecoveryAction::Failed(_) => {
                context.attempts = context.attempts.saturating_add(1);
                context.last_attempt_at = Some(Utc::now());
            }
            _ => {}
        }
        context.last_action = Some(action.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FleetConfig;
    use crate::testing::fixture;
    use crate::CreateRequest;
    use fleet_types::ProxyStatus;

    fn signal(id: &InstanceId, kind: SignalKind, consecutive: u32) -> MonitorReport {
        MonitorReport::Signal(HealthSignal::new(id.clone(), kind, consecutive, "test"))
    }

    #[test]
    fn test_backoff_is_deterministic_and_capped() {
        let base = Duration::from_secs(5);
        let cap = Duration::from_secs(300);
        let delays: Vec<u64> = (0..8)
            .map(|attempt| backoff_delay(base, cap, attempt).as_secs())
            .collect();
        assert_eq!(delays, vec![5, 10, 20, 40, 80, 160, 300, 300]);

        assert_eq!(backoff_delay(base, cap, 64), cap);
        assert_eq!(
            backoff_delay(Duration::from_millis(1), Duration::MAX, 40),
            Duration::from_millis(u32::MAX as u64)
        );
    }

    #[tokio::test]
    async fn test_degrades_on_exactly_the_threshold_signal() {
        let fx = fixture().proxies(2).build().await;
        let instance = fx
            .plane
            .lifecycle()
            .create(CreateRequest::new("w"))
            .await
            .unwrap();
        let coordinator = fx.plane.coordinator();
        fx.sim
            .set_status(instance.container_ref.as_ref().unwrap(), ContainerStatus::Running);

        for consecutive in 1..3 {
            let action = coordinator
                .handle(signal(&instance.id, SignalKind::ProxyUnreachable, consecutive))
                .await
                .unwrap();
            assert_eq!(action, RecoveryAction::None);
            let current = fx.plane.get_instance(&instance.id).await.unwrap();
            assert_eq!(current.state, InstanceState::Running);
        }

        let action = coordinator
            .handle(signal(&instance.id, SignalKind::ProxyUnreachable, 3))
            .await
            .unwrap();
        assert!(matches!(action, RecoveryAction::Reassigned { .. }));
    }

    #[tokio::test]
    async fn test_unreachable_proxy_is_reassigned() {
        let fx = fixture().proxies(2).build().await;
        let mut events = fx.plane.subscribe_events();
        let instance = fx
            .plane
            .lifecycle()
            .create(CreateRequest::new("w"))
            .await
            .unwrap();
        let old_proxy = instance.proxy_id;

        let action = fx
            .plane
            .coordinator()
            .handle(signal(&instance.id, SignalKind::ProxyUnreachable, 3))
            .await
            .unwrap();
        let RecoveryAction::Reassigned { from, to } = action else {
            panic!("expected reassignment, got {:?}", action);
        };
        assert_eq!(from, old_proxy);
        assert_ne!(to, old_proxy);

        let current = fx.plane.get_instance(&instance.id).await.unwrap();
        assert_eq!(current.state, InstanceState::Running);
        assert_eq!(current.proxy_id, to);

        let container = fx.sim.container(current.container_ref.as_ref().unwrap()).unwrap();
        let new_url = fx.plane.pool().get(&to).unwrap().identity.to_url();
        assert_eq!(container.spec.proxy_url(), Some(new_url.as_str()));
        assert!(fx.plane.pool().get(&old_proxy).unwrap().assigned_instance.is_none());

        let mut path = Vec::new();
        while let Ok(envelope) = events.try_recv() {
            if let FleetEvent::InstanceTransitioned { to, .. } = envelope.event {
                path.push(to);
            }
        }
        assert_eq!(
            path,
            vec![
                InstanceState::Creating,
                InstanceState::Running,
                InstanceState::Degraded,
                InstanceState::Restarting,
                InstanceState::Running,
            ]
        );
    }

    #[tokio::test]
    async fn test_hot_reconfigure_keeps_container() {
        let sim = Arc::new(fleet_runtime::SimulatedRuntime::new().with_hot_reconfigure(true));
        let fx = fixture().runtime(sim).proxies(2).build().await;
        let instance = fx
            .plane
            .lifecycle()
            .create(CreateRequest::new("hot"))
            .await
            .unwrap();

        fx.plane
            .coordinator()
            .handle(signal(&instance.id, SignalKind::ProxyUnreachable, 3))
            .await
            .unwrap();

        let current = fx.plane.get_instance(&instance.id).await.unwrap();
        assert_eq!(current.container_ref, instance.container_ref);
        assert_eq!(fx.sim.op_count("reconfigure_proxy"), 1);
        assert_eq!(fx.sim.op_count("create"), 1);
    }

    #[tokio::test]
    async fn test_worn_out_proxy_is_banned_on_reassignment() {
        let mut config = FleetConfig::default();
        config.recovery.ban_threshold = 2;
        let fx = fixture().config(config).proxies(2).build().await;
        let instance = fx
            .plane
            .lifecycle()
            .create(CreateRequest::new("w"))
            .await
            .unwrap();

        let identity = fx.plane.pool().get(&instance.proxy_id).unwrap().identity;
        fx.prober.set_reachable(&identity, false);
        for _ in 0..2 {
            let _ = fx.plane.pool().health_check(&instance.proxy_id, Duration::from_secs(1)).await;
        }

        fx.plane
            .coordinator()
            .handle(signal(&instance.id, SignalKind::ProxyUnreachable, 3))
            .await
            .unwrap();
        assert_eq!(
            fx.plane.pool().get(&instance.proxy_id).unwrap().status,
            ProxyStatus::Banned
        );
    }

    #[tokio::test]
    async fn test_no_replacement_fails_instance() {
        let fx = fixture().proxies(1).build().await;
        let instance = fx
            .plane
            .lifecycle()
            .create(CreateRequest::new("alone"))
            .await
            .unwrap();

        let action = fx
            .plane
            .coordinator()
            .handle(signal(&instance.id, SignalKind::ProxyUnreachable, 3))
            .await
            .unwrap();
        assert_eq!(action, RecoveryAction::Failed(FailureReason::NoProxyAvailable));

        let current = fx.plane.get_instance(&instance.id).await.unwrap();
        assert_eq!(current.state, InstanceState::Failed);
        assert!(fx.plane.pool().get(&instance.proxy_id).unwrap().assigned_instance.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_exited_container_restarts_with_backoff() {
        let fx = fixture().proxies(1).build().await;
        let instance = fx
            .plane
            .lifecycle()
            .create(CreateRequest::new("crashy"))
            .await
            .unwrap();
        let container = instance.container_ref.clone().unwrap();
        let coordinator = fx.plane.coordinator();

        let mut delays = Vec::new();
        for round in 0..3 {
            fx.sim.set_status(&container, ContainerStatus::Exited(Some(1)));
            let action = coordinator
                .handle(signal(&instance.id, SignalKind::ContainerExited, 3))
                .await
                .unwrap();
            let RecoveryAction::Restarted { attempt, delay } = action else {
                panic!("expected restart, got {:?}", action);
            };
            assert_eq!(attempt, round + 1);
            delays.push(delay.as_secs());
        }
        assert_eq!(delays, vec![5, 10, 20]);

        let current = fx.plane.get_instance(&instance.id).await.unwrap();
        assert_eq!(current.restart_count, 3);
        assert_eq!(current.state, InstanceState::Running);

        let action = coordinator
            .handle(signal(&instance.id, SignalKind::ContainerExited, 3))
            .await
            .unwrap();
        assert_eq!(
            action,
            RecoveryAction::Failed(FailureReason::RestartCeilingExceeded { restarts: 3 })
        );
        let failed = fx.plane.get_instance(&instance.id).await.unwrap();
        assert_eq!(failed.state, InstanceState::Failed);
        assert_eq!(
            fx.plane.pool().get(&instance.proxy_id).unwrap().status,
            ProxyStatus::Healthy
        );
        assert_eq!(coordinator.context(&instance.id).unwrap().attempts, 4);
    }

    #[tokio::test]
    async fn test_reassignment_disabled_falls_back_to_restart() {
        let mut config = FleetConfig::default();
        config.recovery.reassign_on_failure = false;
        config.recovery.backoff_base_ms = 1;
        let fx = fixture().config(config).proxies(2).build().await;
        let instance = fx
            .plane
            .lifecycle()
            .create(CreateRequest::new("w"))
            .await
            .unwrap();

        let action = fx
            .plane
            .coordinator()
            .handle(signal(&instance.id, SignalKind::ProxyUnreachable, 3))
            .await
            .unwrap();
        assert!(matches!(action, RecoveryAction::Restarted { attempt: 1, .. }));
        let current = fx.plane.get_instance(&instance.id).await.unwrap();
        assert_eq!(current.proxy_id, instance.proxy_id);
    }

    #[tokio::test]
    async fn test_operator_stop_wins_race() {
        let fx = fixture().proxies(2).build().await;
        let instance = fx
            .plane
            .lifecycle()
            .create(CreateRequest::new("w"))
            .await
            .unwrap();
        fx.plane.lifecycle().stop(&instance.id).await.unwrap();

        let action = fx
            .plane
            .coordinator()
            .handle(signal(&instance.id, SignalKind::ContainerExited, 3))
            .await
            .unwrap();
        assert_eq!(action, RecoveryAction::None);
        let current = fx.plane.get_instance(&instance.id).await.unwrap();
        assert_eq!(current.state, InstanceState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_operator_stop_during_backoff_drops_recovery() {
        let fx = fixture().proxies(1).build().await;
        let instance = fx
            .plane
            .lifecycle()
            .create(CreateRequest::new("w"))
            .await
            .unwrap();
        let coordinator = fx.plane.coordinator().clone();
        let id = instance.id.clone();

        let recovery = tokio::spawn(async move {
            coordinator
                .handle(signal(&id, SignalKind::ContainerExited, 3))
                .await
        });
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(
            fx.plane.get_instance(&instance.id).await.unwrap().state,
            InstanceState::Degraded
        );
        fx.plane.lifecycle().stop(&instance.id).await.unwrap();

        let action = recovery.await.unwrap().unwrap();
        assert_eq!(action, RecoveryAction::LostRace);
        assert_eq!(
            fx.plane.get_instance(&instance.id).await.unwrap().state,
            InstanceState::Stopped
        );
    }

    #[tokio::test]
    async fn test_recovered_notice_returns_instance_to_running() {
        let fx = fixture().proxies(1).build().await;
        let instance = fx
            .plane
            .lifecycle()
            .create(CreateRequest::new("w"))
            .await
            .unwrap();
        fx.plane
            .context()
            .transition(
                &instance.id,
                Transition::new(
                    InstanceState::Running,
                    InstanceState::Degraded,
                    TransitionReason::HealthDegraded("test".into()),
                ),
                EventSource::Recovery,
            )
            .await
            .unwrap();

        let action = fx
            .plane
            .coordinator()
            .handle(MonitorReport::Recovered {
                instance_id: instance.id.clone(),
            })
            .await
            .unwrap();
        assert_eq!(action, RecoveryAction::Recovered);
        assert_eq!(
            fx.plane.get_instance(&instance.id).await.unwrap().state,
            InstanceState::Running
        );
    }

    #[tokio::test]
    async fn test_resource_signal_is_advisory() {
        let fx = fixture().proxies(1).build().await;
        let mut events = fx.plane.subscribe_events();
        let instance = fx
            .plane
            .lifecycle()
            .create(CreateRequest::new("hot"))
            .await
            .unwrap();

        let action = fx
            .plane
            .coordinator()
            .handle(signal(&instance.id, SignalKind::ResourceThresholdExceeded, 10))
            .await
            .unwrap();
        assert_eq!(action, RecoveryAction::Alerted);
        assert_eq!(
            fx.plane.get_instance(&instance.id).await.unwrap().state,
            InstanceState::Running
        );

        let mut alerts = 0;
        while let Ok(envelope) = events.try_recv() {
            if matches!(envelope.event, FleetEvent::ResourceAlert { .. }) {
                alerts += 1;
            }
        }
        assert_eq!(alerts, 1);
    }
}
