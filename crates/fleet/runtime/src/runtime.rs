//! The container runtime collaborator

use crate::error::RuntimeResult;
use crate::spec::ContainerSpec;
use crate::stats::RawStats;
use async_trait::async_trait;
use fleet_types::{ContainerRef, ContainerStatus};
use std::time::Duration;

/// Operations the fleet core needs from a container runtime
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    async fn create(&self, spec: &ContainerSpec) -> RuntimeResult<ContainerRef>;

    async fn start(&self, container: &ContainerRef) -> RuntimeResult<()>;

    /// Stop, waiting up to `grace` before the runtime kills the container
    async fn stop(&self, container: &ContainerRef, grace: Duration) -> RuntimeResult<()>;

    async fn remove(&self, container: &ContainerRef, force: bool) -> RuntimeResult<()>;

    async fn stats(&self, container: &ContainerRef) -> RuntimeResult<RawStats>;

    /// A container the runtime does not know reports `Missing`, not an error
    async fn inspect(&self, container: &ContainerRef) -> RuntimeResult<ContainerStatus>;

    /// Whether `reconfigure_proxy` can swap the proxy of a live container
    fn supports_hot_reconfigure(&self) -> bool {
        false
    }

    async fn reconfigure_proxy(&self, container: &ContainerRef, proxy_url: &str)
        -> RuntimeResult<()>;
}
