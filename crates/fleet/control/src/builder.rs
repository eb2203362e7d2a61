//! Builder for FleetControlPlane
//!
//! Only the container runtime is mandatory. Every other collaborator has a
//! production default: the HTTP prober, the ip-api classifier, the in-memory
//! registry, and a JSON state file when `persistence.state_file` is set.

use crate::config::FleetConfig;
use crate::context::FleetContext;
use crate::control_plane::FleetControlPlane;
use crate::error::{FleetError, FleetResult};
use crate::events::EventAggregator;
use fleet_health::{HealthMonitor, MonitorDeps};
use fleet_policy::{GeoClassifier, IpApiClassifier, PolicyStore, SafeguardEngine};
use fleet_proxy::{HttpProxyProber, ProxyPool, ProxyProber};
use fleet_registry::{InMemoryInstanceRegistry, InstanceRegistry, JsonFileStore, SnapshotStore};
use fleet_runtime::{ContainerRuntime, RuntimePool};
use fleet_types::SafeguardPolicy;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Builder for constructing a FleetControlPlane with all dependencies
pub struct FleetControlPlaneBuilder {
    config: FleetConfig,
    policy: SafeguardPolicy,
    runtime: Option<Arc<dyn ContainerRuntime>>,
    prober: Option<Arc<dyn ProxyProber>>,
    classifier: Option<Arc<dyn GeoClassifier>>,
    registry: Option<Arc<dyn InstanceRegistry>>,
    store: Option<Arc<dyn SnapshotStore>>,
}

impl FleetControlPlaneBuilder {
    pub fn new(config: FleetConfig) -> Self {
        Self {
            config,
            policy: SafeguardPolicy::default(),
            runtime: None,
            prober: None,
            classifier: None,
            registry: None,
            store: None,
        }
    }

    /// Set the initial safeguard policy
    pub fn with_policy(mut self, policy: SafeguardPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Set the container runtime
    pub fn with_runtime(mut self, runtime: Arc<dyn ContainerRuntime>) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn with_prober(mut self, prober: Arc<dyn ProxyProber>) -> Self {
        self.prober = Some(prober);
        self
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn GeoClassifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    pub fn with_registry(mut self, registry: Arc<dyn InstanceRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Overrides `persistence.state_file`
    pub fn with_snapshot_store(mut self, store: Arc<dyn SnapshotStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Wire every component together. Background tasks start with
    /// [`FleetControlPlane::start`].
    pub fn build(self) -> FleetResult<FleetControlPlane> {
        let runtime = self
            .runtime
            .ok_or_else(|| FleetError::Validation("container runtime required".into()))?;
        let config = self.config;

        let prober: Arc<dyn ProxyProber> = match self.prober {
            Some(prober) => prober,
            None => Arc::new(HttpProxyProber::new(config.pool.probe_target.clone())),
        };
        let classifier: Arc<dyn GeoClassifier> = match self.classifier {
            Some(classifier) => classifier,
            None => Arc::new(IpApiClassifier::new(config.pool.probe_timeout())),
        };
        let registry: Arc<dyn InstanceRegistry> = match self.registry {
            Some(registry) => registry,
            None => Arc::new(InMemoryInstanceRegistry::new()),
        };
        let store = self.store.or_else(|| {
            config
                .persistence
                .state_file
                .as_ref()
                .map(|path| Arc::new(JsonFileStore::new(path.clone())) as Arc<dyn SnapshotStore>)
        });

        let policy = Arc::new(PolicyStore::new(self.policy)?);
        let events = EventAggregator::new();
        let pool = Arc::new(ProxyPool::new(config.pool.clone(), prober));
        let runtime = Arc::new(RuntimePool::new(
            runtime,
            config.lifecycle.runtime_pool_config(),
        ));

        let (reports_tx, reports_rx) = mpsc::channel(config.recovery.report_capacity.max(1));
        let monitor = Arc::new(HealthMonitor::new(
            config.monitor.clone(),
            MonitorDeps {
                registry: registry.clone(),
                pool: pool.clone(),
                runtime: runtime.clone(),
                policy: policy.clone(),
                reports: reports_tx,
                events: events.sender(),
            },
        ));

        let ctx = Arc::new(FleetContext {
            registry,
            pool,
            runtime,
            policy,
            engine: SafeguardEngine::new(),
            classifier,
            monitor,
            events,
            store,
            lifecycle: config.lifecycle.clone(),
            persist_lock: tokio::sync::Mutex::new(()),
        });

        Ok(FleetControlPlane::from_parts(ctx, config, reports_rx))
    }
}

impl Default for FleetControlPlaneBuilder {
    fn default() -> Self {
        Self::new(FleetConfig::default())
    }
}
