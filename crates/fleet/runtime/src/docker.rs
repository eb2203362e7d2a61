//! Docker runtime backed by bollard

use crate::error::{RuntimeError, RuntimeResult};
use crate::runtime::ContainerRuntime;
use crate::spec::ContainerSpec;
use crate::stats::RawStats;
use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, RemoveContainerOptions,
    StatsOptions, StopContainerOptions,
};
use bollard::models::{ContainerStateStatusEnum, HostConfig};
use bollard::Docker;
use fleet_types::{ContainerRef, ContainerStatus};
use futures::StreamExt;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Scheduling period the cpu quota is expressed against, in microseconds
pub const CPU_PERIOD_MICROS: i64 = 100_000;

/// Runtime talking to the local Docker engine
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Connect using the platform defaults (unix socket or named pipe)
    pub fn connect() -> RuntimeResult<Self> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| RuntimeError::Api(format!("failed to connect to Docker: {}", e)))?;
        Ok(Self { docker })
    }

    pub fn with_client(docker: Docker) -> Self {
        Self { docker }
    }

    fn host_config(spec: &ContainerSpec) -> HostConfig {
        HostConfig {
            memory: i64::try_from(spec.limits.memory_bytes).ok(),
            cpu_shares: i64::try_from(spec.limits.cpu_shares).ok(),
            cpu_period: Some(CPU_PERIOD_MICROS),
            cpu_quota: Some(spec.limits.cpu_quota_micros(CPU_PERIOD_MICROS)),
            security_opt: Some(vec!["no-new-privileges:true".to_string()]),
            ..Default::default()
        }
    }
}

fn status_code(err: &bollard::errors::Error) -> Option<u16> {
    match err {
        bollard::errors::Error::DockerResponseServerError { status_code, .. } => Some(*status_code),
        _ => None,
    }
}

fn map_error(container: &str, err: bollard::errors::Error) -> RuntimeError {
    match status_code(&err) {
        Some(404) => RuntimeError::NotFound(container.to_string()),
        _ => RuntimeError::Api(err.to_string()),
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    fn name(&self) -> &'static str {
        "docker"
    }

    async fn create(&self, spec: &ContainerSpec) -> RuntimeResult<ContainerRef> {
        let config = Config {
            image: Some(spec.image.clone()),
            env: Some(spec.env_pairs()),
            labels: Some(spec.labels.clone().into_iter().collect()),
            host_config: Some(Self::host_config(spec)),
            ..Default::default()
        };
        let options = CreateContainerOptions {
            name: spec.name.clone(),
            ..Default::default()
        };

        let response = self
            .docker
            .create_container(Some(options), config)
            .await
            .map_err(|e| match status_code(&e) {
                // Unknown image or rejected host config
                Some(400) | Some(404) => RuntimeError::Unsatisfiable(e.to_string()),
                _ => RuntimeError::Api(e.to_string()),
            })?;

        for warning in &response.warnings {
            warn!(container = %spec.name, warning = %warning, "Docker create warning");
        }
        info!(container = %spec.name, id = %response.id, "Container created");
        Ok(ContainerRef::new(response.id))
    }

    async fn start(&self, container: &ContainerRef) -> RuntimeResult<()> {
        self.docker
            .start_container::<String>(container.as_str(), None)
            .await
            .map_err(|e| map_error(container.as_str(), e))
    }

    async fn stop(&self, container: &ContainerRef, grace: Duration) -> RuntimeResult<()> {
        let options = StopContainerOptions {
            t: grace.as_secs() as i64,
        };
        match self
            .docker
            .stop_container(container.as_str(), Some(options))
            .await
        {
            Ok(()) => Ok(()),
            // Already stopped
            Err(e) if status_code(&e) == Some(304) => Ok(()),
            Err(e) => Err(map_error(container.as_str(), e)),
        }
    }

    async fn remove(&self, container: &ContainerRef, force: bool) -> RuntimeResult<()> {
        let options = RemoveContainerOptions {
            force,
            ..Default::default()
        };
        match self
            .docker
            .remove_container(container.as_str(), Some(options))
            .await
        {
            Ok(()) => Ok(()),
            Err(e) if status_code(&e) == Some(404) => {
                debug!(container = %container, "Container already gone");
                Ok(())
            }
            Err(e) => Err(map_error(container.as_str(), e)),
        }
    }

    async fn stats(&self, container: &ContainerRef) -> RuntimeResult<RawStats> {
        let options = StatsOptions {
            stream: false,
            one_shot: false,
        };
        let mut samples = Box::pin(self.docker.stats(container.as_str(), Some(options)));
        let sample = samples
            .next()
            .await
            .ok_or_else(|| RuntimeError::Api("stats stream ended without a sample".into()))?
            .map_err(|e| map_error(container.as_str(), e))?;

        Ok(RawStats {
            cpu_total_usage: sample.cpu_stats.cpu_usage.total_usage,
            precpu_total_usage: sample.precpu_stats.cpu_usage.total_usage,
            system_cpu_usage: sample.cpu_stats.system_cpu_usage.unwrap_or(0),
            presystem_cpu_usage: sample.precpu_stats.system_cpu_usage.unwrap_or(0),
            memory_usage: sample.memory_stats.usage.unwrap_or(0),
            memory_limit: sample.memory_stats.limit.unwrap_or(0),
            networks: sample
                .networks
                .map(|nets| nets.values().map(|n| (n.rx_bytes, n.tx_bytes)).collect())
                .unwrap_or_default(),
        })
    }

    async fn inspect(&self, container: &ContainerRef) -> RuntimeResult<ContainerStatus> {
        let response = match self
            .docker
            .inspect_container(container.as_str(), None::<InspectContainerOptions>)
            .await
        {
            Ok(response) => response,
            Err(e) if status_code(&e) == Some(404) => return Ok(ContainerStatus::Missing),
            Err(e) => return Err(RuntimeError::Api(e.to_string())),
        };

        let Some(state) = response.state else {
            return Ok(ContainerStatus::Missing);
        };
        let status = match (state.status, state.running) {
            (_, Some(true)) | (Some(ContainerStateStatusEnum::RUNNING), _) => {
                ContainerStatus::Running
            }
            (Some(ContainerStateStatusEnum::CREATED), _) => ContainerStatus::Created,
            _ => ContainerStatus::Exited(state.exit_code),
        };
        Ok(status)
    }

    async fn reconfigure_proxy(
        &self,
        _container: &ContainerRef,
        _proxy_url: &str,
    ) -> RuntimeResult<()> {
        // Container env is fixed at creation; the caller recreates instead.
        Err(RuntimeError::Unsupported("reconfigure_proxy"))
    }
}
