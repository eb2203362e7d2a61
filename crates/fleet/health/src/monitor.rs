//! Health monitor for running instances.
//!
//! Each watched instance gets its own polling task on an independent
//! interval. A cycle never changes instance state; it records a
//! [`HealthSnapshot`] and reports what it observed.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use fleet_policy::PolicyStore;
use fleet_proxy::ProxyPool;
use fleet_registry::InstanceRegistry;
use fleet_runtime::RuntimePool;
use fleet_types::{
    EventSource, FleetEvent, FleetEventEnvelope, HealthSignal, HealthSnapshot, InstanceId,
    InstanceState, MonitorReport, SignalKind,
};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, instrument, warn};

use crate::config::MonitorConfig;
use crate::error::{HealthError, HealthResult};

const KINDS: [SignalKind; 3] = [
    SignalKind::ResourceThresholdExceeded,
    SignalKind::ProxyUnreachable,
    SignalKind::ContainerExited,
];

/// Collaborators the monitor reads from and reports to.
pub struct MonitorDeps {
    pub registry: Arc<dyn InstanceRegistry>,
    pub pool: Arc<ProxyPool>,
    pub runtime: Arc<RuntimePool>,
    pub policy: Arc<PolicyStore>,

    /// Signals and recovery notices for the recovery coordinator
    pub reports: mpsc::Sender<MonitorReport>,

    /// Fleet event stream
    pub events: broadcast::Sender<FleetEventEnvelope>,
}

/// Health monitor for continuous instance polling.
pub struct HealthMonitor {
    inner: Arc<MonitorInner>,

    /// Polling task per watched instance.
    handles: DashMap<InstanceId, JoinHandle<()>>,

    shutdown_tx: watch::Sender<bool>,
}

struct MonitorInner {
    config: MonitorConfig,
    deps: MonitorDeps,
    snapshots: DashMap<InstanceId, HealthSnapshot>,
}

impl HealthMonitor {
    pub fn new(config: MonitorConfig, deps: MonitorDeps) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            inner: Arc::new(MonitorInner {
                config,
                deps,
                snapshots: DashMap::new(),
            }),
            handles: DashMap::new(),
            shutdown_tx,
        }
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.inner.config
    }

    /// Start polling an instance. Watching an instance that is already
    /// watched restarts its task with clean streaks.
    #[instrument(skip(self), fields(instance_id = %id))]
    pub async fn watch(&self, id: InstanceId) -> HealthResult<()> {
        if *self.shutdown_tx.borrow() {
            return Err(HealthError::ShutDown);
        }

        let instance = self
            .inner
            .deps
            .registry
            .get(&id)
            .await?
            .ok_or_else(|| HealthError::InstanceNotFound(id.clone()))?;
        if !instance.state.is_monitored() {
            return Err(HealthError::NotMonitorable {
                id,
                state: instance.state,
            });
        }

        let policy = self.inner.deps.policy.current().await;
        let period = self.inner.config.interval(policy.monitoring_interval_secs);

        self.inner
            .snapshots
            .entry(id.clone())
            .and_modify(|s| {
                s.state = instance.state;
                s.streaks.reset();
            })
            .or_insert_with(|| HealthSnapshot::unchecked(id.clone(), instance.state));

        let handle = spawn_poll_loop(
            self.inner.clone(),
            id.clone(),
            period,
            self.shutdown_tx.subscribe(),
        );
        if let Some(previous) = self.handles.insert(id.clone(), handle) {
            previous.abort();
        }

        info!(
            instance_id = %id,
            interval_ms = period.as_millis() as u64,
            "Instance registered for health monitoring"
        );
        Ok(())
    }

    /// Stop polling an instance. The last snapshot is kept.
    pub fn unwatch(&self, id: &InstanceId) -> bool {
        match self.handles.remove(id) {
            Some((_, handle)) => {
                handle.abort();
                debug!(instance_id = %id, "Instance unregistered from health monitoring");
                true
            }
            None => false,
        }
    }

    /// Stop polling and drop the snapshot
    pub fn forget(&self, id: &InstanceId) {
        self.unwatch(id);
        self.inner.snapshots.remove(id);
    }

    pub fn is_watching(&self, id: &InstanceId) -> bool {
        self.handles
            .get(id)
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    pub fn watched(&self) -> Vec<InstanceId> {
        self.handles.iter().map(|r| r.key().clone()).collect()
    }

    /// Latest snapshot, if the instance was ever watched
    pub fn snapshot(&self, id: &InstanceId) -> Option<HealthSnapshot> {
        self.inner.snapshots.get(id).map(|s| s.clone())
    }

    /// Clear the streak counters, e.g. after a successful restart
    pub fn reset_streaks(&self, id: &InstanceId) {
        if let Some(mut snapshot) = self.inner.snapshots.get_mut(id) {
            snapshot.streaks.reset();
        }
    }

    /// Run one health cycle now, outside the polling schedule
    pub async fn probe_once(&self, id: &InstanceId) -> HealthResult<HealthSnapshot> {
        self.inner.run_cycle(id).await
    }

    /// Signal every polling loop to stop. Cycles already in flight may finish
    /// within `drain`; loops still running after it are aborted. Returns the
    /// number of loops that had to be aborted.
    pub async fn shutdown(&self, drain: Duration) -> usize {
        self.shutdown_tx.send_replace(true);

        let ids: Vec<InstanceId> = self.handles.iter().map(|r| r.key().clone()).collect();
        let handles: Vec<JoinHandle<()>> = ids
            .iter()
            .filter_map(|id| self.handles.remove(id).map(|(_, h)| h))
            .collect();
        if handles.is_empty() {
            return 0;
        }

        let aborts: Vec<_> = handles.iter().map(|h| h.abort_handle()).collect();
        let count = handles.len();
        match tokio::time::timeout(drain, futures::future::join_all(handles)).await {
            Ok(_) => {
                info!(loops = count, "Health monitor drained");
                0
            }
            Err(_) => {
                let stuck = aborts.iter().filter(|a| !a.is_finished()).count();
                for abort in aborts {
                    abort.abort();
                }
                warn!(
                    loops = count,
                    aborted = stuck,
                    drain_ms = drain.as_millis() as u64,
                    "Health monitor drain deadline passed, aborting"
                );
                stuck
            }
        }
    }
}

impl Drop for HealthMonitor {
    fn drop(&mut self) {
        for item in self.handles.iter() {
            item.value().abort();
        }
    }
}

fn spawn_poll_loop(
    inner: Arc<MonitorInner>,
    id: InstanceId,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match inner.run_cycle(&id).await {
                        Ok(_) => {}
                        Err(HealthError::InstanceNotFound(_)) => break,
                        Err(HealthError::NotMonitorable { state, .. }) if state.is_terminal() => {
                            debug!(instance_id = %id, state = %state, "Polling loop exiting");
                            break;
                        }
                        Err(e) => debug!(instance_id = %id, reason = %e, "Health cycle skipped"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    })
}

impl MonitorInner {
    async fn run_cycle(&self, id: &InstanceId) -> HealthResult<HealthSnapshot> {
        let instance = self
            .deps
            .registry
            .get(id)
            .await?
            .ok_or_else(|| HealthError::InstanceNotFound(id.clone()))?;
        if !instance.state.is_monitored() {
            return Err(HealthError::NotMonitorable {
                id: id.clone(),
                state: instance.state,
            });
        }
        let container = instance
            .container_ref
            .clone()
            .ok_or_else(|| HealthError::NoContainer(id.clone()))?;
        let policy = self.deps.policy.current().await;

        let stats = match self
            .deps
            .runtime
            .stats(&container, self.config.stats_timeout())
            .await
        {
            Ok(raw) => Some(raw.to_resource_stats()),
            Err(e) => {
                debug!(instance_id = %id, error = %e, "Stats sample unavailable");
                None
            }
        };

        let status = match self.deps.runtime.inspect(&container).await {
            Ok(status) => Some(status),
            Err(e) => {
                warn!(instance_id = %id, error = %e, "Container inspect failed");
                None
            }
        };

        let probe = match self
            .deps
            .pool
            .health_check(&instance.proxy_id, self.config.probe_timeout())
            .await
        {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                warn!(instance_id = %id, proxy_id = %instance.proxy_id, error = %e, "Proxy probe skipped");
                None
            }
        };

        let mut observed: Vec<(SignalKind, String)> = Vec::new();
        if let Some(status) = status {
            if !status.is_running() {
                observed.push((SignalKind::ContainerExited, format!("container {}", status)));
            }
        }
        if let Some(outcome) = &probe {
            if !outcome.success {
                let detail = outcome
                    .error
                    .clone()
                    .unwrap_or_else(|| "probe failed".to_string());
                observed.push((SignalKind::ProxyUnreachable, detail));
            }
        }
        if let Some(s) = &stats {
            let limits = &policy.alert_thresholds;
            if s.cpu_percent > limits.cpu_percent || s.memory_percent > limits.memory_percent {
                observed.push((
                    SignalKind::ResourceThresholdExceeded,
                    format!("cpu {:.1}% memory {:.1}%", s.cpu_percent, s.memory_percent),
                ));
            }
        }

        let (previous, snapshot) = {
            let mut entry = self
                .snapshots
                .entry(id.clone())
                .or_insert_with(|| HealthSnapshot::unchecked(id.clone(), instance.state));
            let previous = entry.streaks;

            for kind in KINDS {
                if !observed.iter().any(|(k, _)| *k == kind) {
                    entry.streaks.clear(kind);
                } else if kind == SignalKind::ProxyUnreachable {
                    // The pool owns the proxy's failure count
                    let count = self
                        .deps
                        .pool
                        .failure_count(&instance.proxy_id)
                        .unwrap_or_else(|| previous.proxy.saturating_add(1));
                    entry.streaks.set(kind, count);
                } else {
                    entry.streaks.observe(kind);
                }
            }

            entry.state = instance.state;
            entry.stats = stats;
            entry.container_status = status;
            entry.proxy_reachable = probe.as_ref().map(|p| p.success);
            entry.proxy_latency_ms = probe.as_ref().and_then(|p| p.latency_ms());
            entry.checked_at = Some(Utc::now());
            (previous, entry.clone())
        };

        for (kind, detail) in &observed {
            let consecutive = snapshot.streaks.get(*kind);
            debug!(
                instance_id = %id,
                kind = %kind,
                consecutive,
                detail = %detail,
                "Health observation"
            );

            self.emit(FleetEvent::HealthSignalRaised {
                instance_id: id.clone(),
                kind: *kind,
                consecutive,
                detail: detail.clone(),
            });
            self.report(MonitorReport::Signal(HealthSignal::new(
                id.clone(),
                *kind,
                consecutive,
                detail.clone(),
            )))
            .await;
        }

        let actionable = observed.iter().any(|(k, _)| k.is_actionable());
        let was_failing = previous.proxy > 0 || previous.exited > 0;
        if !actionable && (instance.state == InstanceState::Degraded || was_failing) {
            debug!(instance_id = %id, state = %instance.state, "Clean cycle after failures");
            self.report(MonitorReport::Recovered {
                instance_id: id.clone(),
            })
            .await;
        }

        Ok(snapshot)
    }

    fn emit(&self, event: FleetEvent) {
        let _ = self
            .deps
            .events
            .send(FleetEventEnvelope::new(event, EventSource::Health));
    }

    async fn report(&self, report: MonitorReport) {
        if self.deps.reports.send(report).await.is_err() {
            debug!("Report channel closed, dropping report");
        }
    }
}
