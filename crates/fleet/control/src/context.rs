//! Shared handles for the lifecycle controller, recovery coordinator and
//! rotation task

use crate::config::LifecycleConfig;
use crate::error::{FleetError, FleetResult};
use crate::events::EventAggregator;
use fleet_health::HealthMonitor;
use fleet_policy::{GeoClassifier, PolicyStore, SafeguardEngine};
use fleet_proxy::ProxyPool;
use fleet_registry::{FleetSnapshot, InstanceRegistry, SnapshotStore, Transition};
use fleet_runtime::RuntimePool;
use fleet_types::{EventSource, FleetEvent, Instance, InstanceId, ProxyId};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Everything the fleet actors share
pub struct FleetContext {
    pub registry: Arc<dyn InstanceRegistry>,
    pub pool: Arc<ProxyPool>,
    pub runtime: Arc<RuntimePool>,
    pub policy: Arc<PolicyStore>,
    pub engine: SafeguardEngine,
    pub classifier: Arc<dyn GeoClassifier>,
    pub monitor: Arc<HealthMonitor>,
    pub events: EventAggregator,
    pub store: Option<Arc<dyn SnapshotStore>>,
    pub lifecycle: LifecycleConfig,
    /// Held from snapshot to save so the newest state is written last
    pub(crate) persist_lock: tokio::sync::Mutex<()>,
}

impl FleetContext {
    pub async fn instance(&self, id: &InstanceId) -> FleetResult<Instance> {
        self.registry
            .get(id)
            .await?
            .ok_or_else(|| FleetError::NotFound(id.clone()))
    }

    /// Apply a CAS transition and publish it
    pub async fn transition(
        &self,
        id: &InstanceId,
        transition: Transition,
        source: EventSource,
    ) -> FleetResult<Instance> {
        let from = transition.from;
        let to = transition.to;
        let reason = transition.reason.to_string();

        let instance = self.registry.transition(id, transition).await?;

        info!(
            instance_id = %id,
            from = %from,
            to = %to,
            reason = %reason,
            "Instance transitioned"
        );
        self.events.emit(
            FleetEvent::InstanceTransitioned {
                instance_id: id.clone(),
                from,
                to,
                reason,
            },
            source,
        );
        Ok(instance)
    }

    /// Return a proxy to the pool. A proxy the instance no longer holds is
    /// left alone, so repeated releases are harmless.
    pub fn release_proxy(&self, proxy_id: &ProxyId, instance_id: &InstanceId, source: EventSource) {
        if self.pool.release(proxy_id, instance_id) {
            debug!(proxy_id = %proxy_id, instance_id = %instance_id, "Proxy released");
            self.events.emit(
                FleetEvent::ProxyReleased {
                    proxy_id: *proxy_id,
                    instance_id: instance_id.clone(),
                },
                source,
            );
        }
    }

    pub fn ban_proxy(&self, proxy_id: &ProxyId, reason: &str, source: EventSource) {
        match self.pool.ban(proxy_id) {
            Ok(holder) => {
                warn!(proxy_id = %proxy_id, reason, "Proxy banned");
                if let Some(instance_id) = holder {
                    self.events.emit(
                        FleetEvent::ProxyReleased {
                            proxy_id: *proxy_id,
                            instance_id,
                        },
                        source,
                    );
                }
                self.events.emit(
                    FleetEvent::ProxyBanned {
                        proxy_id: *proxy_id,
                        reason: reason.to_string(),
                    },
                    source,
                );
            }
            Err(e) => warn!(proxy_id = %proxy_id, error = %e, "Proxy ban failed"),
        }
    }

    /// Release, or ban when the proxy's own failure count reached `ban_threshold`
    pub fn retire_proxy(
        &self,
        proxy_id: &ProxyId,
        instance_id: &InstanceId,
        ban_threshold: u32,
        source: EventSource,
    ) {
        let failures = self.pool.failure_count(proxy_id).unwrap_or(0);
        if failures >= ban_threshold {
            self.ban_proxy(
                proxy_id,
                &format!("{} consecutive probe failures", failures),
                source,
            );
        } else {
            self.release_proxy(proxy_id, instance_id, source);
        }
    }

    /// Current registry and pool contents in persisted form
    pub async fn snapshot(&self) -> FleetResult<FleetSnapshot> {
        let instances = self.registry.list_all().await?;
        Ok(FleetSnapshot {
            instances: instances.iter().map(Instance::to_record).collect(),
            proxies: self.pool.snapshot(),
        })
    }

    /// Write the current fleet state to the snapshot store, if one is
    /// configured. Failures are logged; the in-memory state stays authoritative.
    pub async fn persist(&self) {
        let Some(store) = &self.store else {
            return;
        };
        let _guard = self.persist_lock.lock().await;
        let snapshot = match self.snapshot().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(error = %e, "Could not read registry for persistence");
                return;
            }
        };
        if let Err(e) = store.save(&snapshot).await {
            warn!(error = %e, "Persisting fleet state failed");
        }
    }
}
