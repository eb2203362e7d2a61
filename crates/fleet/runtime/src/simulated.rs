//! In-memory runtime
//!
//! Containers are plain records. Tests script failures, exits, stats and slow
//! stops; the daemon uses it for dry runs without a container engine.

use crate::error::{RuntimeError, RuntimeResult};
use crate::runtime::ContainerRuntime;
use crate::spec::{ContainerSpec, ENV_PROXY_URL};
use crate::stats::RawStats;
use async_trait::async_trait;
use dashmap::DashMap;
use fleet_types::{ContainerRef, ContainerStatus};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::debug;

/// One simulated container
#[derive(Debug, Clone)]
pub struct SimulatedContainer {
    pub spec: ContainerSpec,
    pub status: ContainerStatus,
    pub stats: RawStats,
}

#[derive(Debug, Default)]
struct Script {
    next_create_failures: VecDeque<RuntimeError>,
    create_failure: Option<RuntimeError>,
    start_failure: Option<RuntimeError>,
    stop_delay: Duration,
    remove_delay: Duration,
}

pub struct SimulatedRuntime {
    containers: DashMap<String, SimulatedContainer>,
    next_id: AtomicU64,
    hot_reconfigure: AtomicBool,
    script: Mutex<Script>,
    ops: DashMap<&'static str, usize>,
}

impl SimulatedRuntime {
    pub fn new() -> Self {
        Self {
            containers: DashMap::new(),
            next_id: AtomicU64::new(1),
            hot_reconfigure: AtomicBool::new(false),
            script: Mutex::new(Script::default()),
            ops: DashMap::new(),
        }
    }

    pub fn with_hot_reconfigure(self, enabled: bool) -> Self {
        self.hot_reconfigure.store(enabled, Ordering::SeqCst);
        self
    }

    fn script(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn count(&self, op: &'static str) {
        *self.ops.entry(op).or_insert(0) += 1;
    }

    /// Fail the next create with `err`, then behave normally again
    pub fn fail_next_create(&self, err: RuntimeError) {
        self.script().next_create_failures.push_back(err);
    }

    /// Fail every create until cleared with `None`
    pub fn fail_creates(&self, err: Option<RuntimeError>) {
        self.script().create_failure = err;
    }

    pub fn fail_starts(&self, err: Option<RuntimeError>) {
        self.script().start_failure = err;
    }

    pub fn set_stop_delay(&self, delay: Duration) {
        self.script().stop_delay = delay;
    }

    pub fn set_remove_delay(&self, delay: Duration) {
        self.script().remove_delay = delay;
    }

    /// Force a container's reported status, e.g. to simulate a crash
    pub fn set_status(&self, container: &ContainerRef, status: ContainerStatus) {
        if let Some(mut c) = self.containers.get_mut(container.as_str()) {
            c.status = status;
        }
    }

    pub fn set_stats(&self, container: &ContainerRef, stats: RawStats) {
        if let Some(mut c) = self.containers.get_mut(container.as_str()) {
            c.stats = stats;
        }
    }

    /// Drop a container without the core's knowledge
    pub fn forget(&self, container: &ContainerRef) {
        self.containers.remove(container.as_str());
    }

    pub fn container(&self, container: &ContainerRef) -> Option<SimulatedContainer> {
        self.containers.get(container.as_str()).map(|c| c.clone())
    }

    pub fn len(&self) -> usize {
        self.containers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.containers.is_empty()
    }

    pub fn running_count(&self) -> usize {
        self.containers
            .iter()
            .filter(|c| c.status.is_running())
            .count()
    }

    /// How many times `op` was called
    pub fn op_count(&self, op: &str) -> usize {
        self.ops.get(op).map(|n| *n).unwrap_or(0)
    }
}

impl Default for SimulatedRuntime {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContainerRuntime for SimulatedRuntime {
    fn name(&self) -> &'static str {
        "simulated"
    }

    async fn create(&self, spec: &ContainerSpec) -> RuntimeResult<ContainerRef> {
        self.count("create");
        {
            let mut script = self.script();
            if let Some(err) = script.next_create_failures.pop_front() {
                return Err(err);
            }
            if let Some(err) = &script.create_failure {
                return Err(err.clone());
            }
        }
        if self.containers.iter().any(|c| c.spec.name == spec.name) {
            return Err(RuntimeError::Api(format!(
                "container name {} already in use",
                spec.name
            )));
        }

        let id = format!("sim-{:012}", self.next_id.fetch_add(1, Ordering::SeqCst));
        self.containers.insert(
            id.clone(),
            SimulatedContainer {
                spec: spec.clone(),
                status: ContainerStatus::Created,
                stats: RawStats::default(),
            },
        );
        debug!(container = %id, name = %spec.name, "Simulated container created");
        Ok(ContainerRef::new(id))
    }

    async fn start(&self, container: &ContainerRef) -> RuntimeResult<()> {
        self.count("start");
        let failure = self.script().start_failure.clone();
        if let Some(err) = failure {
            return Err(err);
        }
        let mut c = self
            .containers
            .get_mut(container.as_str())
            .ok_or_else(|| RuntimeError::NotFound(container.to_string()))?;
        c.status = ContainerStatus::Running;
        Ok(())
    }

    async fn stop(&self, container: &ContainerRef, _grace: Duration) -> RuntimeResult<()> {
        self.count("stop");
        let delay = self.script().stop_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let mut c = self
            .containers
            .get_mut(container.as_str())
            .ok_or_else(|| RuntimeError::NotFound(container.to_string()))?;
        if c.status.is_running() {
            c.status = ContainerStatus::Exited(Some(0));
        }
        Ok(())
    }

    async fn remove(&self, container: &ContainerRef, force: bool) -> RuntimeResult<()> {
        self.count("remove");
        let delay = self.script().remove_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let running = self
            .containers
            .get(container.as_str())
            .map(|c| c.status.is_running())
            .unwrap_or(false);
        if running && !force {
            return Err(RuntimeError::Api(format!(
                "container {} is running",
                container
            )));
        }
        self.containers.remove(container.as_str());
        Ok(())
    }

    async fn stats(&self, container: &ContainerRef) -> RuntimeResult<RawStats> {
        self.count("stats");
        self.containers
            .get(container.as_str())
            .map(|c| c.stats.clone())
            .ok_or_else(|| RuntimeError::NotFound(container.to_string()))
    }

    async fn inspect(&self, container: &ContainerRef) -> RuntimeResult<ContainerStatus> {
        self.count("inspect");
        Ok(self
            .containers
            .get(container.as_str())
            .map(|c| c.status)
            .unwrap_or(ContainerStatus::Missing))
    }

    fn supports_hot_reconfigure(&self) -> bool {
        self.hot_reconfigure.load(Ordering::SeqCst)
    }

    async fn reconfigure_proxy(&self, container: &ContainerRef, proxy_url: &str) -> RuntimeResult<()> {
        self.count("reconfigure_proxy");
        if !self.supports_hot_reconfigure() {
            return Err(RuntimeError::Unsupported("reconfigure_proxy"));
        }
        let mut c = self
            .containers
            .get_mut(container.as_str())
            .ok_or_else(|| RuntimeError::NotFound(container.to_string()))?;
        c.spec.env.insert(ENV_PROXY_URL.to_string(), proxy_url.to_string());
        Ok(())
    }
}
