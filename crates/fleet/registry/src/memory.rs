//! In-memory instance registry
//!
//! Each record sits in a `DashMap` entry. A transition runs entirely under
//! that entry's shard lock, so the state check and the write are one step.

use crate::error::{RegistryError, RegistryResult};
use crate::instance::{InstanceRegistry, Transition};
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use fleet_types::{Instance, InstanceId};
use tracing::debug;

/// In-memory instance registry
pub struct InMemoryInstanceRegistry {
    instances: DashMap<InstanceId, Instance>,
}

impl InMemoryInstanceRegistry {
    pub fn new() -> Self {
        Self {
            instances: DashMap::new(),
        }
    }

    fn sorted(mut instances: Vec<Instance>) -> Vec<Instance> {
        instances.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        instances
    }
}

impl Default for InMemoryInstanceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl InstanceRegistry for InMemoryInstanceRegistry {
    async fn insert(&self, instance: Instance) -> RegistryResult<()> {
        use dashmap::mapref::entry::Entry;
        match self.instances.entry(instance.id.clone()) {
            Entry::Occupied(_) => Err(RegistryError::AlreadyExists(instance.id)),
            Entry::Vacant(slot) => {
                debug!(instance_id = %instance.id, state = %instance.state, "Instance inserted");
                slot.insert(instance);
                Ok(())
            }
        }
    }

    async fn get(&self, id: &InstanceId) -> RegistryResult<Option<Instance>> {
        Ok(self.instances.get(id).map(|i| i.clone()))
    }

    async fn list_all(&self) -> RegistryResult<Vec<Instance>> {
        Ok(Self::sorted(
            self.instances.iter().map(|i| i.clone()).collect(),
        ))
    }

    async fn list_active(&self) -> RegistryResult<Vec<Instance>> {
        Ok(Self::sorted(
            self.instances
                .iter()
                .filter(|i| i.state.is_active())
                .map(|i| i.clone())
                .collect(),
        ))
    }

    async fn count_active(&self) -> RegistryResult<usize> {
        Ok(self
            .instances
            .iter()
            .filter(|i| i.state.is_active())
            .count())
    }

    async fn transition(
        &self,
        id: &InstanceId,
        transition: Transition,
    ) -> RegistryResult<Instance> {
        let mut entry = self
            .instances
            .get_mut(id)
            .ok_or_else(|| RegistryError::NotFound(id.clone()))?;

        if entry.state != transition.from || !transition.from.can_transition_to(transition.to) {
            return Err(RegistryError::InvalidStateTransition {
                id: id.clone(),
                expected: transition.from,
                actual: entry.state,
                target: transition.to,
            });
        }

        entry.state = transition.to;
        entry.last_transition_at = Utc::now();
        if let Some(container_ref) = transition.container_ref {
            entry.container_ref = Some(container_ref);
        }
        if let Some(proxy_id) = transition.proxy_id {
            entry.proxy_id = proxy_id;
        }
        if transition.bump_restart {
            entry.restart_count = entry.restart_count.saturating_add(1);
        }
        if let Some(failure) = transition.failure {
            entry.failure = Some(failure);
        }

        debug!(
            instance_id = %id,
            from = %transition.from,
            to = %transition.to,
            "Registry state swapped"
        );
        Ok(entry.clone())
    }

    async fn restore(&self, instance: Instance) -> RegistryResult<()> {
        self.instances.insert(instance.id.clone(), instance);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_types::{FailureReason, InstanceState, ProxyId, ResourceLimits, TransitionReason};
    use std::sync::Arc;

    fn pending() -> Instance {
        Instance::pending(
            "worker",
            ProxyId::generate(),
            ResourceLimits::new(64 * 1024 * 1024, 0.25),
        )
    }

    #[tokio::test]
    async fn test_insert_and_duplicate() {
        let registry = InMemoryInstanceRegistry::new();
        let instance = pending();
        registry.insert(instance.clone()).await.unwrap();
        assert!(matches!(
            registry.insert(instance.clone()).await,
            Err(RegistryError::AlreadyExists(_))
        ));
        assert_eq!(registry.count_active().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_cas_rejects_stale_expectation() {
        let registry = InMemoryInstanceRegistry::new();
        let instance = pending();
        let id = instance.id.clone();
        registry.insert(instance).await.unwrap();

        let err = registry
            .transition(
                &id,
                Transition::new(
                    InstanceState::Running,
                    InstanceState::Degraded,
                    TransitionReason::Operator,
                ),
            )
            .await
            .unwrap_err();
        match err {
            RegistryError::InvalidStateTransition {
                expected, actual, ..
            } => {
                assert_eq!(expected, InstanceState::Running);
                assert_eq!(actual, InstanceState::Pending);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        let stored = registry.get(&id).await.unwrap().unwrap();
        assert_eq!(stored.state, InstanceState::Pending);
    }

    #[tokio::test]
    async fn test_illegal_edge_is_refused() {
        let registry = InMemoryInstanceRegistry::new();
        let instance = pending();
        let id = instance.id.clone();
        registry.insert(instance).await.unwrap();

        let result = registry
            .transition(
                &id,
                Transition::new(
                    InstanceState::Pending,
                    InstanceState::Running,
                    TransitionReason::Operator,
                ),
            )
            .await;
        assert!(matches!(
            result,
            Err(RegistryError::InvalidStateTransition { .. })
        ));
    }

    #[tokio::test]
    async fn test_side_updates_apply_atomically() {
        let registry = InMemoryInstanceRegistry::new();
        let instance = pending();
        let id = instance.id.clone();
        registry.insert(instance).await.unwrap();

        let failed = registry
            .transition(
                &id,
                Transition::fail(InstanceState::Pending, FailureReason::NoProxyAvailable)
                    .bump_restart(),
            )
            .await
            .unwrap();
        assert_eq!(failed.state, InstanceState::Failed);
        assert_eq!(failed.failure, Some(FailureReason::NoProxyAvailable));
        assert_eq!(failed.restart_count, 1);
        assert_eq!(registry.count_active().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_racing_transitions_have_one_winner() {
        let registry = Arc::new(InMemoryInstanceRegistry::new());
        let instance = pending();
        let id = instance.id.clone();
        registry.insert(instance).await.unwrap();

        let targets = [InstanceState::Creating, InstanceState::Failed];
        let handles: Vec<_> = (0..16)
            .map(|i| {
                let registry = registry.clone();
                let id = id.clone();
                let to = targets[i % 2];
                tokio::spawn(async move {
                    registry
                        .transition(
                            &id,
                            Transition::new(InstanceState::Pending, to, TransitionReason::Operator),
                        )
                        .await
                        .is_ok()
                })
            })
            .collect();

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn test_list_all_is_ordered() {
        let registry = InMemoryInstanceRegistry::new();
        let mut ids = Vec::new();
        for _ in 0..5 {
            let instance = pending();
            ids.push((instance.created_at, instance.id.clone()));
            registry.insert(instance).await.unwrap();
        }
        ids.sort();
        let listed: Vec<_> = registry
            .list_all()
            .await
            .unwrap()
            .into_iter()
            .map(|i| (i.created_at, i.id))
            .collect();
        assert_eq!(listed, ids);
    }
}
