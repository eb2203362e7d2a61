//! Timer-based proxy rotation
//!
//! Independent of failure-triggered reassignment: every sweep rebinds each
//! `Running` instance whose proxy has been held longer than the rotation
//! interval. Old proxies are released, never banned.

use crate::config::RotationConfig;
use crate::context::FleetContext;
use crate::error::FleetError;
use crate::lifecycle::{LifecycleController, Retire};
use chrono::Utc;
use fleet_types::{EventSource, InstanceId, InstanceState, TransitionReason};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

pub struct ProxyRotator {
    ctx: Arc<FleetContext>,
    lifecycle: Arc<LifecycleController>,
    config: RotationConfig,
}

impl ProxyRotator {
    pub fn new(
        ctx: Arc<FleetContext>,
        lifecycle: Arc<LifecycleController>,
        config: RotationConfig,
    ) -> Self {
        Self {
            ctx,
            lifecycle,
            config,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.interval().is_some()
    }

    /// Rotate every instance due for a new proxy; returns the rotated ids
    pub async fn sweep(&self) -> Vec<InstanceId> {
        let Some(interval) = self.config.interval() else {
            return Vec::new();
        };
        let instances = match self.ctx.registry.list_active().await {
            Ok(instances) => instances,
            Err(e) => {
                warn!(error = %e, "Rotation sweep could not list instances");
                return Vec::new();
            }
        };

        let now = Utc::now();
        let mut rotated = Vec::new();
        for instance in instances {
            if instance.state != InstanceState::Running {
                continue;
            }
            let due = self
                .ctx
                .pool
                .get(&instance.proxy_id)
                .and_then(|endpoint| endpoint.assigned_at)
                .and_then(|since| (now - since).to_std().ok())
                .map(|held| held >= interval)
                .unwrap_or(false);
            if !due {
                continue;
            }

            match self
                .lifecycle
                .reassign_proxy(
                    &instance,
                    TransitionReason::ProxyRotated,
                    Retire::Release,
                    EventSource::Rotation,
                )
                .await
            {
                Ok(_) => rotated.push(instance.id),
                Err(FleetError::NoProxyAvailable) => {
                    debug!(instance_id = %instance.id, "No free proxy, rotation skipped");
                }
                Err(e) => warn!(instance_id = %instance.id, error = %e, "Rotation failed"),
            }
        }

        if !rotated.is_empty() {
            info!(count = rotated.len(), "Proxies rotated");
            self.ctx.persist().await;
        }
        rotated
    }

    /// Sweep on the configured cadence until shutdown. `None` when rotation is off.
    pub fn spawn(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> Option<JoinHandle<()>> {
        if !self.is_enabled() {
            return None;
        }
        let period = self.config.sweep();
        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.sweep().await;
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!("Rotation task stopped");
        }))
    }
}
