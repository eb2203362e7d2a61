//! Proxy pool
//!
//! Endpoints live in a `DashMap` so health probes can update one endpoint's
//! counters without blocking anything else. Assignment is different: the
//! insertion order, the round-robin cursor and every write to
//! `assigned_instance` happen under one mutex, which is what makes
//! allocation exclusive.

use crate::config::{PoolConfig, SelectionStrategy};
use crate::error::{PoolError, PoolResult};
use crate::parse::validate;
use crate::prober::{ProbeOutcome, ProxyProber};
use chrono::Utc;
use dashmap::DashMap;
use fleet_types::{InstanceId, ProxyEndpoint, ProxyId, ProxyIdentity, ProxyRecord, ProxyStatus};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Aggregate pool counters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PoolStats {
    pub total: usize,
    pub healthy: usize,
    pub unhealthy: usize,
    pub banned: usize,
    pub untested: usize,
    pub assigned: usize,
    pub health_percentage: f64,
}

#[derive(Debug, Default)]
struct AssignmentState {
    order: Vec<ProxyId>,
    cursor: usize,
}

/// The set of known proxies with their health and assignment state
pub struct ProxyPool {
    config: PoolConfig,
    prober: Arc<dyn ProxyProber>,
    endpoints: DashMap<ProxyId, ProxyEndpoint>,
    assignment: Mutex<AssignmentState>,
}

impl ProxyPool {
    pub fn new(config: PoolConfig, prober: Arc<dyn ProxyProber>) -> Self {
        Self {
            config,
            prober,
            endpoints: DashMap::new(),
            assignment: Mutex::new(AssignmentState::default()),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn failure_threshold(&self) -> u32 {
        self.config.failure_threshold
    }

    fn lock_state(&self) -> MutexGuard<'_, AssignmentState> {
        self.assignment
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Validate a raw proxy URL and add it as `Untested`.
    ///
    /// Adding an identity that is already known returns the existing id.
    pub fn add(&self, raw: &str) -> PoolResult<ProxyId> {
        let identity = validate(raw)?;
        Ok(self.add_identity(identity))
    }

    pub fn add_identity(&self, identity: ProxyIdentity) -> ProxyId {
        let mut state = self.lock_state();
        if let Some(existing) = state
            .order
            .iter()
            .find(|id| {
                self.endpoints
                    .get(*id)
                    .map(|e| e.identity == identity)
                    .unwrap_or(false)
            })
            .copied()
        {
            debug!(proxy_id = %existing, "Proxy already known");
            return existing;
        }

        let endpoint = ProxyEndpoint::new(identity);
        let id = endpoint.id;
        info!(proxy_id = %id, proxy = %endpoint.identity, "Proxy added");
        self.endpoints.insert(id, endpoint);
        state.order.push(id);
        id
    }

    /// Probe one endpoint and update its own counters.
    ///
    /// Timeouts and non-2xx responses count as failures. This never takes the
    /// assignment lock.
    #[instrument(skip(self), fields(proxy_id = %id))]
    pub async fn health_check(&self, id: &ProxyId, timeout: Duration) -> PoolResult<ProbeOutcome> {
        let identity = self
            .endpoints
            .get(id)
            .map(|e| e.identity.clone())
            .ok_or(PoolError::ProxyNotFound(*id))?;

        let outcome = match tokio::time::timeout(timeout, self.prober.probe(&identity, timeout)).await
        {
            Ok(outcome) => outcome,
            Err(_) => ProbeOutcome::timed_out(timeout),
        };
        self.record_probe(id, &outcome);
        Ok(outcome)
    }

    fn record_probe(&self, id: &ProxyId, outcome: &ProbeOutcome) {
        // The endpoint may have been pruned while the probe was in flight.
        let Some(mut endpoint) = self.endpoints.get_mut(id) else {
            return;
        };
        endpoint.last_checked_at = Some(Utc::now());

        if outcome.success {
            endpoint.consecutive_failures = 0;
            endpoint.last_latency_ms = outcome.latency_ms();
            if endpoint.status != ProxyStatus::Banned {
                endpoint.status = ProxyStatus::Healthy;
            }
            debug!(proxy_id = %id, latency_ms = ?endpoint.last_latency_ms, "Proxy probe succeeded");
        } else {
            endpoint.consecutive_failures = endpoint.consecutive_failures.saturating_add(1);
            endpoint.last_latency_ms = None;
            if endpoint.consecutive_failures >= self.config.failure_threshold
                && endpoint.status != ProxyStatus::Banned
            {
                endpoint.status = ProxyStatus::Unhealthy;
            }
            warn!(
                proxy_id = %id,
                consecutive_failures = endpoint.consecutive_failures,
                error = ?outcome.error,
                "Proxy probe failed"
            );
        }
    }

    /// Probe every endpoint that is not banned, concurrently
    pub async fn check_all(&self, timeout: Duration) -> Vec<(ProxyId, ProbeOutcome)> {
        let ids: Vec<ProxyId> = {
            let state = self.lock_state();
            state
                .order
                .iter()
                .filter(|id| {
                    self.endpoints
                        .get(*id)
                        .map(|e| !e.is_banned())
                        .unwrap_or(false)
                })
                .copied()
                .collect()
        };

        let checks = ids.into_iter().map(|id| async move {
            let outcome = self.health_check(&id, timeout).await;
            (id, outcome)
        });
        futures::future::join_all(checks)
            .await
            .into_iter()
            .filter_map(|(id, outcome)| outcome.ok().map(|o| (id, o)))
            .collect()
    }

    /// Hand out one healthy, unassigned endpoint and mark it assigned
    #[instrument(skip(self), fields(instance_id = %instance))]
    pub fn allocate(&self, instance: &InstanceId) -> PoolResult<ProxyEndpoint> {
        let mut state = self.lock_state();
        let len = state.order.len();
        if len == 0 {
            return Err(PoolError::NoProxyAvailable);
        }

        let chosen = match self.config.selection {
            SelectionStrategy::RoundRobin => (0..len)
                .map(|offset| (state.cursor + offset) % len)
                .find(|&idx| self.is_allocatable(&state.order[idx])),
            SelectionStrategy::LeastRecentlyUsed => state
                .order
                .iter()
                .enumerate()
                .filter(|(_, id)| self.is_allocatable(id))
                .min_by_key(|(idx, id)| {
                    let last = self.endpoints.get(*id).and_then(|e| e.last_assigned_at);
                    (last, *idx)
                })
                .map(|(idx, _)| idx),
        };

        let idx = chosen.ok_or(PoolError::NoProxyAvailable)?;
        let id = state.order[idx];
        state.cursor = (idx + 1) % len;

        let endpoint = self.assign_locked(&id, instance)?;
        info!(proxy_id = %id, instance_id = %instance, "Proxy allocated");
        Ok(endpoint)
    }

    /// Assign a specific endpoint, used when the operator names a proxy
    #[instrument(skip(self), fields(proxy_id = %id, instance_id = %instance))]
    pub fn reserve(&self, id: &ProxyId, instance: &InstanceId) -> PoolResult<ProxyEndpoint> {
        let _state = self.lock_state();
        {
            let endpoint = self.endpoints.get(id).ok_or(PoolError::ProxyNotFound(*id))?;
            let reason = match (endpoint.status, &endpoint.assigned_instance) {
                (ProxyStatus::Banned, _) => Some("banned".to_string()),
                (ProxyStatus::Unhealthy, _) => Some("unhealthy".to_string()),
                (_, Some(holder)) => Some(format!("held by {}", holder)),
                _ => None,
            };
            if let Some(reason) = reason {
                return Err(PoolError::ProxyUnavailable { id: *id, reason });
            }
        }

        let endpoint = self.assign_locked(id, instance)?;
        info!("Proxy reserved");
        Ok(endpoint)
    }

    /// Re-bind an endpoint to an instance restored from a snapshot
    pub fn restore_assignment(&self, id: &ProxyId, instance: &InstanceId) -> PoolResult<()> {
        let _state = self.lock_state();
        {
            let endpoint = self.endpoints.get(id).ok_or(PoolError::ProxyNotFound(*id))?;
            if let Some(holder) = &endpoint.assigned_instance {
                if holder != instance {
                    return Err(PoolError::AlreadyAssigned {
                        id: *id,
                        holder: holder.clone(),
                    });
                }
            }
        }
        self.assign_locked(id, instance)?;
        Ok(())
    }

    // Caller holds the assignment lock.
    fn assign_locked(&self, id: &ProxyId, instance: &InstanceId) -> PoolResult<ProxyEndpoint> {
        let mut endpoint = self
            .endpoints
            .get_mut(id)
            .ok_or(PoolError::ProxyNotFound(*id))?;
        let now = Utc::now();
        endpoint.assigned_instance = Some(instance.clone());
        endpoint.assigned_at = Some(now);
        endpoint.last_assigned_at = Some(now);
        Ok(endpoint.clone())
    }

    fn is_allocatable(&self, id: &ProxyId) -> bool {
        self.endpoints
            .get(id)
            .map(|e| e.is_allocatable())
            .unwrap_or(false)
    }

    /// Clear an assignment held by `instance`.
    ///
    /// Returns false, and changes nothing, when the endpoint is not held by
    /// that instance. A second release is therefore a no-op.
    #[instrument(skip(self), fields(proxy_id = %id, instance_id = %instance))]
    pub fn release(&self, id: &ProxyId, instance: &InstanceId) -> bool {
        let _state = self.lock_state();
        let Some(mut endpoint) = self.endpoints.get_mut(id) else {
            return false;
        };
        if endpoint.assigned_instance.as_ref() != Some(instance) {
            debug!("Release ignored, proxy not held by instance");
            return false;
        }

        endpoint.assigned_instance = None;
        endpoint.assigned_at = None;
        if endpoint.status != ProxyStatus::Banned
            && endpoint.consecutive_failures < self.config.failure_threshold
        {
            endpoint.status = ProxyStatus::Healthy;
        }
        info!(status = %endpoint.status, "Proxy released");
        true
    }

    /// Permanently exclude an endpoint. Returns the instance that held it.
    #[instrument(skip(self), fields(proxy_id = %id))]
    pub fn ban(&self, id: &ProxyId) -> PoolResult<Option<InstanceId>> {
        let _state = self.lock_state();
        let mut endpoint = self
            .endpoints
            .get_mut(id)
            .ok_or(PoolError::ProxyNotFound(*id))?;
        endpoint.status = ProxyStatus::Banned;
        endpoint.assigned_at = None;
        let holder = endpoint.assigned_instance.take();
        warn!(holder = ?holder, "Proxy banned");
        Ok(holder)
    }

    /// Remove unassigned `Unhealthy` endpoints
    pub fn prune_unhealthy(&self) -> Vec<ProxyId> {
        let mut state = self.lock_state();
        let pruned: Vec<ProxyId> = state
            .order
            .iter()
            .filter(|id| {
                self.endpoints
                    .get(*id)
                    .map(|e| e.status == ProxyStatus::Unhealthy && !e.is_assigned())
                    .unwrap_or(false)
            })
            .copied()
            .collect();

        for id in &pruned {
            self.endpoints.remove(id);
        }
        state.order.retain(|id| !pruned.contains(id));
        if state.cursor >= state.order.len() {
            state.cursor = 0;
        }
        if !pruned.is_empty() {
            info!(count = pruned.len(), "Pruned unhealthy proxies");
        }
        pruned
    }

    pub fn get(&self, id: &ProxyId) -> Option<ProxyEndpoint> {
        self.endpoints.get(id).map(|e| e.clone())
    }

    /// Current failure streak of an endpoint
    pub fn failure_count(&self, id: &ProxyId) -> Option<u32> {
        self.endpoints.get(id).map(|e| e.consecutive_failures)
    }

    /// All endpoints in insertion order
    pub fn list(&self) -> Vec<ProxyEndpoint> {
        let state = self.lock_state();
        state
            .order
            .iter()
            .filter_map(|id| self.endpoints.get(id).map(|e| e.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    pub fn stats(&self) -> PoolStats {
        let mut stats = PoolStats::default();
        for endpoint in self.endpoints.iter() {
            stats.total += 1;
            match endpoint.status {
                ProxyStatus::Healthy => stats.healthy += 1,
                ProxyStatus::Unhealthy => stats.unhealthy += 1,
                ProxyStatus::Banned => stats.banned += 1,
                ProxyStatus::Untested => stats.untested += 1,
            }
            if endpoint.is_assigned() {
                stats.assigned += 1;
            }
        }
        if stats.total > 0 {
            stats.health_percentage = stats.healthy as f64 / stats.total as f64 * 100.0;
        }
        stats
    }

    /// Persisted projection in insertion order
    pub fn snapshot(&self) -> Vec<ProxyRecord> {
        self.list().iter().map(ProxyEndpoint::to_record).collect()
    }

    /// Replace the pool contents with persisted records. Assignments are
    /// cleared; callers re-bind them with [`ProxyPool::restore_assignment`].
    pub fn restore(&self, records: Vec<ProxyRecord>) {
        let mut state = self.lock_state();
        self.endpoints.clear();
        state.order.clear();
        state.cursor = 0;
        for record in records {
            let endpoint = record.into_endpoint();
            state.order.push(endpoint.id);
            self.endpoints.insert(endpoint.id, endpoint);
        }
        info!(count = state.order.len(), "Proxy pool restored");
    }
}
