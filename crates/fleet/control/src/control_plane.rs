//! Fleet control plane facade
//!
//! Single entry point for operators. Composes the lifecycle controller,
//! recovery coordinator, rotation task and proxy pool, and persists fleet
//! state after every mutating call.

use crate::config::FleetConfig;
use crate::context::FleetContext;
use crate::error::{FleetError, FleetResult};
use crate::lifecycle::{CreateRequest, LifecycleController, ReattachReport};
use crate::recovery::RecoveryCoordinator;
use crate::rotation::ProxyRotator;
use fleet_health::HealthMonitor;
use fleet_proxy::{PoolStats, ProbeOutcome, ProxyPool};
use fleet_registry::InstanceRegistry;
use fleet_types::{
    EventSource, FleetEvent, FleetEventEnvelope, HealthSnapshot, Instance, InstanceId,
    InstanceSummary, MonitorReport, ProxyEndpoint, ProxyId, ResourceLimits, SafeguardPolicy,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{info, instrument, warn};

/// Facade over the fleet subsystems
pub struct FleetControlPlane {
    ctx: Arc<FleetContext>,
    lifecycle: Arc<LifecycleController>,
    coordinator: Arc<RecoveryCoordinator>,
    rotator: Arc<ProxyRotator>,
    config: FleetConfig,

    /// Handed to the coordinator on `start`
    reports: Mutex<Option<mpsc::Receiver<MonitorReport>>>,
    background: Mutex<Vec<JoinHandle<()>>>,
    shutdown_tx: watch::Sender<bool>,
}

impl FleetControlPlane {
    pub(crate) fn from_parts(
        ctx: Arc<FleetContext>,
        config: FleetConfig,
        reports: mpsc::Receiver<MonitorReport>,
    ) -> Self {
        let lifecycle = Arc::new(LifecycleController::new(ctx.clone()));
        let coordinator = Arc::new(RecoveryCoordinator::new(
            ctx.clone(),
            lifecycle.clone(),
            config.recovery.clone(),
        ));
        let rotator = Arc::new(ProxyRotator::new(
            ctx.clone(),
            lifecycle.clone(),
            config.rotation.clone(),
        ));
        let (shutdown_tx, _) = watch::channel(false);

        Self {
            ctx,
            lifecycle,
            coordinator,
            rotator,
            config,
            reports: Mutex::new(Some(reports)),
            background: Mutex::new(Vec::new()),
            shutdown_tx,
        }
    }

    pub fn config(&self) -> &FleetConfig {
        &self.config
    }

    pub fn context(&self) -> &Arc<FleetContext> {
        &self.ctx
    }

    pub fn lifecycle(&self) -> &Arc<LifecycleController> {
        &self.lifecycle
    }

    pub fn coordinator(&self) -> &Arc<RecoveryCoordinator> {
        &self.coordinator
    }

    pub fn rotator(&self) -> &Arc<ProxyRotator> {
        &self.rotator
    }

    pub fn pool(&self) -> &Arc<ProxyPool> {
        &self.ctx.pool
    }

    pub fn monitor(&self) -> &Arc<HealthMonitor> {
        &self.ctx.monitor
    }

    pub fn registry(&self) -> &Arc<dyn InstanceRegistry> {
        &self.ctx.registry
    }

    // ========== Lifecycle ==========

    /// Reattach persisted state and start the background tasks.
    /// Can only be called once.
    #[instrument(skip(self))]
    pub async fn start(&self) -> FleetResult<ReattachReport> {
        let reports = self
            .reports
            .lock()
            .ok()
            .and_then(|mut slot| slot.take())
            .ok_or_else(|| FleetError::Internal("control plane already started".into()))?;

        let report = match &self.ctx.store {
            Some(store) => {
                let snapshot = store.load().await?;
                if snapshot.is_empty() {
                    ReattachReport::default()
                } else {
                    self.lifecycle.reattach(snapshot).await?
                }
            }
            None => ReattachReport::default(),
        };

        let mut handles = vec![self
            .coordinator
            .clone()
            .spawn(reports, self.shutdown_tx.subscribe())];
        if let Some(handle) = self.rotator.clone().spawn(self.shutdown_tx.subscribe()) {
            handles.push(handle);
        }
        if let Ok(mut background) = self.background.lock() {
            background.extend(handles);
        }

        self.ctx.persist().await;
        info!(
            runtime = self.ctx.runtime.runtime_name(),
            instances = report.restored,
            "Fleet control plane started"
        );
        Ok(report)
    }

    /// Stop background work, draining in-flight health checks for at most
    /// `drain`, then persist a final snapshot
    #[instrument(skip(self))]
    pub async fn shutdown(&self, drain: Duration) {
        self.shutdown_tx.send_replace(true);
        let aborted = self.ctx.monitor.shutdown(drain).await;

        let handles = self
            .background
            .lock()
            .map(|mut background| std::mem::take(&mut *background))
            .unwrap_or_default();
        for mut handle in handles {
            if tokio::time::timeout(drain, &mut handle).await.is_err() {
                warn!("Background task did not stop in time, aborting");
                handle.abort();
            }
        }

        self.ctx.persist().await;
        info!(aborted_checks = aborted, "Fleet control plane shut down");
    }

    // ========== Instance Operations ==========

    /// Create an instance and return its id
    #[instrument(skip(self, proxy_spec, limits), fields(name = %name))]
    pub async fn create_instance(
        &self,
        name: &str,
        proxy_spec: Option<String>,
        limits: Option<ResourceLimits>,
    ) -> FleetResult<InstanceId> {
        let mut request = CreateRequest::new(name);
        if let Some(raw) = proxy_spec {
            request = request.with_proxy_spec(raw);
        }
        if let Some(limits) = limits {
            request = request.with_limits(limits);
        }
        Ok(self.create(request).await?.id)
    }

    pub async fn create(&self, request: CreateRequest) -> FleetResult<Instance> {
        let result = self.lifecycle.create(request).await;
        self.persisted(result).await
    }

    pub async fn stop_instance(&self, id: &InstanceId) -> FleetResult<InstanceSummary> {
        let result = self.lifecycle.stop(id).await;
        self.persisted(result).await.map(|i| i.summary())
    }

    pub async fn restart_instance(&self, id: &InstanceId) -> FleetResult<InstanceSummary> {
        let result = self.lifecycle.restart(id).await;
        self.persisted(result).await.map(|i| i.summary())
    }

    pub async fn remove_instance(&self, id: &InstanceId) -> FleetResult<InstanceSummary> {
        let result = self.lifecycle.remove(id).await;
        self.persisted(result).await.map(|i| i.summary())
    }

    /// Every known instance, including Removed and Failed records
    pub async fn list_instances(&self) -> FleetResult<Vec<InstanceSummary>> {
        Ok(self
            .ctx
            .registry
            .list_all()
            .await?
            .iter()
            .map(Instance::summary)
            .collect())
    }

    pub async fn get_instance(&self, id: &InstanceId) -> FleetResult<Instance> {
        self.ctx.instance(id).await
    }

    // ========== Health Operations ==========

    /// Latest health snapshot. Instances not checked yet get an empty one.
    pub async fn get_instance_health(&self, id: &InstanceId) -> FleetResult<HealthSnapshot> {
        let instance = self.ctx.instance(id).await?;
        Ok(match self.ctx.monitor.snapshot(id) {
            Some(mut snapshot) => {
                snapshot.state = instance.state;
                snapshot
            }
            None => HealthSnapshot::unchecked(id.clone(), instance.state),
        })
    }

    /// Run one health cycle now
    pub async fn check_instance_health(&self, id: &InstanceId) -> FleetResult<HealthSnapshot> {
        Ok(self.ctx.monitor.probe_once(id).await?)
    }

    // ========== Safeguards ==========

    pub async fn safeguards(&self) -> Arc<SafeguardPolicy> {
        self.ctx.policy.current().await
    }

    /// Swap the whole policy. An invalid policy leaves the current one in force.
    #[instrument(skip(self, policy))]
    pub async fn reload_safeguards(&self, policy: SafeguardPolicy) -> FleetResult<()> {
        let max_instances = policy.max_instances;
        self.ctx.policy.reload(policy).await?;
        info!(max_instances, "Safeguards reloaded");
        self.ctx.events.emit(
            FleetEvent::SafeguardsReloaded { max_instances },
            EventSource::ControlPlane,
        );
        Ok(())
    }

    // ========== Proxy Operations ==========

    /// Add a proxy and probe it once so it becomes allocatable
    #[instrument(skip(self, raw))]
    pub async fn add_proxy(&self, raw: &str) -> FleetResult<ProxyEndpoint> {
        let pool = &self.ctx.pool;
        let id = pool.add(raw)?;
        let outcome = pool.health_check(&id, pool.config().probe_timeout()).await?;
        if !outcome.success {
            warn!(proxy_id = %id, error = ?outcome.error, "New proxy failed its first probe");
        }
        self.ctx.persist().await;
        pool.get(&id)
            .ok_or_else(|| FleetError::Internal(format!("proxy {} vanished after add", id)))
    }

    pub fn list_proxies(&self) -> Vec<ProxyEndpoint> {
        self.ctx.pool.list()
    }

    pub fn proxy_stats(&self) -> PoolStats {
        self.ctx.pool.stats()
    }

    /// Probe every proxy in the pool
    pub async fn check_proxies(&self) -> Vec<(ProxyId, ProbeOutcome)> {
        let pool = &self.ctx.pool;
        let outcomes = pool.check_all(pool.config().probe_timeout()).await;
        self.ctx.persist().await;
        outcomes
    }

    /// Drop unassigned unhealthy proxies
    pub async fn prune_proxies(&self) -> Vec<ProxyId> {
        let pruned = self.ctx.pool.prune_unhealthy();
        if !pruned.is_empty() {
            info!(count = pruned.len(), "Proxies pruned");
            self.ctx.persist().await;
        }
        pruned
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<FleetEventEnvelope> {
        self.ctx.events.subscribe()
    }

    // ========== Internal ==========

    async fn persisted<T>(&self, result: FleetResult<T>) -> FleetResult<T> {
        self.ctx.persist().await;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::fixture;
    use fleet_registry::{FleetSnapshot, SnapshotStore};
    use fleet_types::{ContainerStatus, InstanceState, ProxyStatus, RejectReason};

    #[tokio::test]
    async fn test_scenario_a_create_with_free_slots() {
        let fx = fixture().proxies(3).build().await;

        let id = fx.plane.create_instance("worker-a", None, None).await.unwrap();
        let instance = fx.plane.get_instance(&id).await.unwrap();
        assert_eq!(instance.state, InstanceState::Running);

        let endpoint = fx.plane.pool().get(&instance.proxy_id).unwrap();
        assert_eq!(endpoint.status, ProxyStatus::Healthy);
        assert_eq!(endpoint.assigned_instance, Some(id));
        assert_eq!(fx.plane.proxy_stats().assigned, 1);
        assert!(fx.store.save_count() > 0);
    }

    #[tokio::test]
    async fn test_scenario_b_eleventh_instance_is_rejected() {
        let fx = fixture().proxies(12).build().await;
        for i in 0..10 {
            fx.plane
                .create_instance(&format!("w{}", i), None, None)
                .await
                .unwrap();
        }
        let containers = fx.sim.len();
        let assigned = fx.plane.proxy_stats().assigned;

        let err = fx
            .plane
            .create_instance("w10", None, None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            FleetError::PolicyRejected(RejectReason::MaxInstancesExceeded)
        ));
        assert_eq!(fx.sim.len(), containers);
        assert_eq!(fx.plane.proxy_stats().assigned, assigned);
        assert_eq!(fx.sim.op_count("create"), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scenario_c_unreachable_proxy_is_replaced() {
        let fx = fixture().proxies(2).build().await;
        fx.plane.start().await.unwrap();
        let mut events = fx.plane.subscribe_events();

        let id = fx.plane.create_instance("worker-c", None, None).await.unwrap();
        let original = fx.plane.get_instance(&id).await.unwrap();
        let identity = fx.plane.pool().get(&original.proxy_id).unwrap().identity;
        fx.prober.set_reachable(&identity, false);

        // three monitoring intervals
        tokio::time::sleep(Duration::from_secs(185)).await;

        let current = fx.plane.get_instance(&id).await.unwrap();
        assert_eq!(current.state, InstanceState::Running);
        assert_ne!(current.proxy_id, original.proxy_id);

        let mut states = Vec::new();
        while let Ok(envelope) = events.try_recv() {
            if let FleetEvent::InstanceTransitioned { to, .. } = envelope.event {
                states.push(to);
            }
        }
        let degraded = states
            .iter()
            .position(|s| *s == InstanceState::Degraded)
            .expect("instance degraded");
        assert_eq!(states[degraded + 1], InstanceState::Restarting);

        fx.plane.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn test_scenario_d_remove_running_instance() {
        let fx = fixture().proxies(1).build().await;
        let id = fx.plane.create_instance("worker-d", None, None).await.unwrap();
        let instance = fx.plane.get_instance(&id).await.unwrap();
        let container = instance.container_ref.clone().unwrap();

        let removed = fx.plane.remove_instance(&id).await.unwrap();
        assert_eq!(removed.state, InstanceState::Removed);
        assert_eq!(fx.sim.op_count("stop"), 1);
        assert!(fx.sim.container(&container).is_none());

        let endpoint = fx.plane.pool().get(&instance.proxy_id).unwrap();
        assert_eq!(endpoint.status, ProxyStatus::Healthy);
        assert!(endpoint.assigned_instance.is_none());

        let err = fx.plane.remove_instance(&id).await.unwrap_err();
        assert_eq!(err.code(), "INVALID_STATE_TRANSITION");
    }

    #[tokio::test]
    async fn test_health_falls_back_to_unchecked_snapshot() {
        let fx = fixture().proxies(1).build().await;
        let id = fx.plane.create_instance("w", None, None).await.unwrap();

        let health = fx.plane.get_instance_health(&id).await.unwrap();
        assert_eq!(health.state, InstanceState::Running);
        assert!(health.checked_at.is_none());

        let checked = fx.plane.check_instance_health(&id).await.unwrap();
        assert_eq!(checked.container_status, Some(ContainerStatus::Running));
        let health = fx.plane.get_instance_health(&id).await.unwrap();
        assert!(health.checked_at.is_some());

        let missing = fx
            .plane
            .get_instance_health(&InstanceId::generate())
            .await
            .unwrap_err();
        assert!(matches!(missing, FleetError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_reload_swaps_policy_and_announces_it() {
        let fx = fixture().proxies(3).build().await;
        let mut events = fx.plane.subscribe_events();
        let before = fx.plane.safeguards().await;

        let tighter = SafeguardPolicy {
            max_instances: 1,
            ..SafeguardPolicy::permissive()
        };
        fx.plane.reload_safeguards(tighter).await.unwrap();
        assert_eq!(before.max_instances, 10);
        assert_eq!(fx.plane.safeguards().await.max_instances, 1);

        fx.plane.create_instance("one", None, None).await.unwrap();
        let err = fx.plane.create_instance("two", None, None).await.unwrap_err();
        assert!(matches!(
            err,
            FleetError::PolicyRejected(RejectReason::MaxInstancesExceeded)
        ));

        let invalid = SafeguardPolicy {
            max_instances: 0,
            ..SafeguardPolicy::default()
        };
        assert!(fx.plane.reload_safeguards(invalid).await.is_err());
        assert_eq!(fx.plane.safeguards().await.max_instances, 1);

        let first = events.try_recv().unwrap();
        assert!(matches!(
            first.event,
            FleetEvent::SafeguardsReloaded { max_instances: 1 }
        ));
    }

    #[tokio::test]
    async fn test_start_reattaches_persisted_state() {
        let fx = fixture().proxies(2).build().await;
        let id = fx.plane.create_instance("survivor", None, None).await.unwrap();
        let snapshot = fx.store.load().await.unwrap();
        assert_eq!(snapshot.instances.len(), 1);

        let restarted = fixture()
            .runtime(fx.sim.clone())
            .store(Arc::new(fleet_registry::InMemorySnapshotStore::with_snapshot(snapshot)))
            .proxies(0)
            .build()
            .await;
        let report = restarted.plane.start().await.unwrap();
        assert_eq!(report.resumed, 1);
        assert_eq!(
            restarted.plane.get_instance(&id).await.unwrap().state,
            InstanceState::Running
        );
        assert_eq!(restarted.plane.proxy_stats().total, 2);
        assert_eq!(restarted.plane.proxy_stats().assigned, 1);

        assert!(restarted.plane.start().await.is_err());
        restarted.plane.shutdown(Duration::from_millis(100)).await;
    }

    #[tokio::test]
    async fn test_shutdown_persists_final_snapshot() {
        let fx = fixture().proxies(1).build().await;
        fx.plane.start().await.unwrap();
        fx.plane.create_instance("w", None, None).await.unwrap();
        let saves = fx.store.save_count();

        fx.plane.shutdown(Duration::from_millis(100)).await;
        assert!(fx.store.save_count() > saves);
        assert!(fx.plane.monitor().watched().is_empty());

        let snapshot: FleetSnapshot = fx.store.load().await.unwrap();
        assert_eq!(snapshot.proxies.len(), 1);
    }

    #[tokio::test]
    async fn test_proxy_management() {
        let fx = fixture().proxies(0).build().await;
        let good = fx.plane.add_proxy("socks5://192.0.2.10:1080").await.unwrap();
        assert_eq!(good.status, ProxyStatus::Healthy);

        let bad_identity = fleet_proxy::validate("http://192.0.2.11:8080").unwrap();
        fx.prober.set_reachable(&bad_identity, false);
        let bad = fx.plane.add_proxy("http://192.0.2.11:8080").await.unwrap();
        assert_ne!(bad.status, ProxyStatus::Healthy);

        assert!(fx.plane.add_proxy("ftp://nope").await.is_err());
        assert_eq!(fx.plane.list_proxies().len(), 2);

        let outcomes = fx.plane.check_proxies().await;
        assert_eq!(outcomes.len(), 2);
        fx.plane.check_proxies().await;
        assert_eq!(
            fx.plane.pool().get(&bad.id).unwrap().status,
            ProxyStatus::Unhealthy
        );

        let pruned = fx.plane.prune_proxies().await;
        assert_eq!(pruned, vec![bad.id]);
        assert_eq!(fx.plane.proxy_stats().total, 1);
    }
}
