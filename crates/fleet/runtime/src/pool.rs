//! Bounded runtime worker pool
//!
//! Every mutating runtime call takes a semaphore permit, so at most
//! `max_concurrent_operations` creates, starts, stops or removes hit the
//! engine at once. Every call, mutating or not, runs under a deadline.

use crate::error::{RuntimeError, RuntimeResult};
use crate::runtime::ContainerRuntime;
use crate::spec::ContainerSpec;
use crate::stats::RawStats;
use fleet_types::{ContainerRef, ContainerStatus};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

/// Pool sizing and per-call deadlines
#[derive(Debug, Clone)]
pub struct RuntimePoolConfig {
    pub max_concurrent_operations: usize,
    /// Covers create plus start
    pub create_timeout: Duration,
    pub stop_timeout: Duration,
    pub remove_timeout: Duration,
    /// Stats, inspect and proxy reconfiguration
    pub query_timeout: Duration,
}

impl Default for RuntimePoolConfig {
    fn default() -> Self {
        Self {
            max_concurrent_operations: 4,
            create_timeout: Duration::from_secs(60),
            stop_timeout: Duration::from_secs(30),
            remove_timeout: Duration::from_secs(30),
            query_timeout: Duration::from_secs(10),
        }
    }
}

pub struct RuntimePool {
    runtime: Arc<dyn ContainerRuntime>,
    permits: Semaphore,
    config: RuntimePoolConfig,
}

impl RuntimePool {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, config: RuntimePoolConfig) -> Self {
        let permits = Semaphore::new(config.max_concurrent_operations.max(1));
        Self {
            runtime,
            permits,
            config,
        }
    }

    pub fn config(&self) -> &RuntimePoolConfig {
        &self.config
    }

    pub fn runtime_name(&self) -> &'static str {
        self.runtime.name()
    }

    pub fn supports_hot_reconfigure(&self) -> bool {
        self.runtime.supports_hot_reconfigure()
    }

    /// Mutating operations currently holding a permit
    pub fn in_flight(&self) -> usize {
        self.config.max_concurrent_operations.max(1) - self.permits.available_permits()
    }

    /// Create and start a container. A container that was created but failed
    /// to start is removed before the error is returned.
    pub async fn create_and_start(&self, spec: &ContainerSpec) -> RuntimeResult<ContainerRef> {
        let _permit = self.acquire().await?;
        let timeout = self.config.create_timeout;

        let container = timed("create", timeout, self.runtime.create(spec)).await?;
        if let Err(e) = timed("start", timeout, self.runtime.start(&container)).await {
            warn!(container = %container, error = %e, "Start failed, removing container");
            if let Err(cleanup) = timed(
                "remove",
                self.config.remove_timeout,
                self.runtime.remove(&container, true),
            )
            .await
            {
                warn!(container = %container, error = %cleanup, "Cleanup of half-created container failed");
            }
            return Err(e);
        }

        debug!(container = %container, name = %spec.name, "Container created and started");
        Ok(container)
    }

    pub async fn start(&self, container: &ContainerRef) -> RuntimeResult<()> {
        let _permit = self.acquire().await?;
        timed("start", self.config.create_timeout, self.runtime.start(container)).await
    }

    pub async fn stop(&self, container: &ContainerRef, grace: Duration) -> RuntimeResult<()> {
        let _permit = self.acquire().await?;
        timed(
            "stop",
            self.config.stop_timeout,
            self.runtime.stop(container, grace),
        )
        .await
    }

    pub async fn remove(&self, container: &ContainerRef, force: bool) -> RuntimeResult<()> {
        let _permit = self.acquire().await?;
        timed(
            "remove",
            self.config.remove_timeout,
            self.runtime.remove(container, force),
        )
        .await
    }

    pub async fn reconfigure_proxy(&self, container: &ContainerRef, proxy_url: &str) -> RuntimeResult<()> {
        let _permit = self.acquire().await?;
        timed(
            "reconfigure_proxy",
            self.config.query_timeout,
            self.runtime.reconfigure_proxy(container, proxy_url),
        )
        .await
    }

    /// Read-only; does not take a permit
    pub async fn stats(&self, container: &ContainerRef, timeout: Duration) -> RuntimeResult<RawStats> {
        timed("stats", timeout, self.runtime.stats(container)).await
    }

    /// Read-only; does not take a permit
    pub async fn inspect(&self, container: &ContainerRef) -> RuntimeResult<ContainerStatus> {
        timed("inspect", self.config.query_timeout, self.runtime.inspect(container)).await
    }

    async fn acquire(&self) -> RuntimeResult<tokio::sync::SemaphorePermit<'_>> {
        self.permits
            .acquire()
            .await
            .map_err(|_| RuntimeError::Api("runtime pool closed".into()))
    }
}

async fn timed<T, F>(operation: &'static str, timeout: Duration, fut: F) -> RuntimeResult<T>
where
    F: Future<Output = RuntimeResult<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => {
            warn!(operation, timeout_ms = timeout.as_millis() as u64, "Runtime call timed out");
            Err(RuntimeError::Timeout {
                operation,
                timeout_ms: timeout.as_millis() as u64,
            })
        }
    }
}
