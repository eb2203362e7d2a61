//! Shared fixture for the control plane tests

use crate::builder::FleetControlPlaneBuilder;
use crate::config::FleetConfig;
use crate::control_plane::FleetControlPlane;
use fleet_policy::StaticClassifier;
use fleet_proxy::ScriptedProber;
use fleet_registry::InMemorySnapshotStore;
use fleet_runtime::SimulatedRuntime;
use fleet_types::SafeguardPolicy;
use std::sync::Arc;

pub(crate) struct Fixture {
    pub plane: FleetControlPlane,
    pub sim: Arc<SimulatedRuntime>,
    pub prober: Arc<ScriptedProber>,
    pub classifier: Arc<StaticClassifier>,
    pub store: Arc<InMemorySnapshotStore>,
}

pub(crate) struct FixtureBuilder {
    config: FleetConfig,
    policy: SafeguardPolicy,
    proxies: usize,
    sim: Option<Arc<SimulatedRuntime>>,
    store: Option<Arc<InMemorySnapshotStore>>,
}

pub(crate) fn fixture() -> FixtureBuilder {
    FixtureBuilder {
        config: FleetConfig::default(),
        policy: SafeguardPolicy::default(),
        proxies: 2,
        sim: None,
        store: None,
    }
}

fn proxy_url(index: usize) -> String {
    format!("socks5://10.0.{}.{}:1080", index / 250, index % 250 + 1)
}

impl FixtureBuilder {
    pub fn config(mut self, config: FleetConfig) -> Self {
        self.config = config;
        self
    }

    pub fn policy(mut self, policy: SafeguardPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Healthy proxies added before the fixture is returned
    pub fn proxies(mut self, count: usize) -> Self {
        self.proxies = count;
        self
    }

    pub fn runtime(mut self, sim: Arc<SimulatedRuntime>) -> Self {
        self.sim = Some(sim);
        self
    }

    pub fn store(mut self, store: Arc<InMemorySnapshotStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub async fn build(self) -> Fixture {
        let sim = self.sim.unwrap_or_else(|| Arc::new(SimulatedRuntime::new()));
        let prober = Arc::new(ScriptedProber::reachable());
        let classifier = Arc::new(StaticClassifier::clean("US"));
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(InMemorySnapshotStore::new()));

        let plane = FleetControlPlaneBuilder::new(self.config)
            .with_policy(self.policy)
            .with_runtime(sim.clone())
            .with_prober(prober.clone())
            .with_classifier(classifier.clone())
            .with_snapshot_store(store.clone())
            .build()
            .expect("fixture control plane");

        for index in 0..self.proxies {
            plane
                .add_proxy(&proxy_url(index))
                .await
                .expect("fixture proxy");
        }

        Fixture {
            plane,
            sim,
            prober,
            classifier,
            store,
        }
    }
}
