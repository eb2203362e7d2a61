//! Atomic policy publication

use crate::error::PolicyResult;
use fleet_types::SafeguardPolicy;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

/// Holds the current safeguard policy as an immutable snapshot.
///
/// A reload validates the replacement and swaps the whole `Arc`. Snapshots
/// handed out earlier keep the values they were taken with.
#[derive(Debug)]
pub struct PolicyStore {
    current: RwLock<Arc<SafeguardPolicy>>,
}

impl PolicyStore {
    pub fn new(policy: SafeguardPolicy) -> PolicyResult<Self> {
        policy.validate()?;
        Ok(Self {
            current: RwLock::new(Arc::new(policy)),
        })
    }

    pub async fn current(&self) -> Arc<SafeguardPolicy> {
        self.current.read().await.clone()
    }

    /// Validate and publish a new policy, returning the one it replaced
    pub async fn reload(&self, policy: SafeguardPolicy) -> PolicyResult<Arc<SafeguardPolicy>> {
        policy.validate()?;
        let next = Arc::new(policy);
        let mut guard = self.current.write().await;
        let previous = std::mem::replace(&mut *guard, next);
        info!(
            max_instances = guard.max_instances,
            error_threshold = guard.error_threshold,
            "Safeguard policy reloaded"
        );
        Ok(previous)
    }
}

impl Default for PolicyStore {
    fn default() -> Self {
        Self {
            current: RwLock::new(Arc::new(SafeguardPolicy::default())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PolicyError;

    #[tokio::test]
    async fn test_reload_swaps_whole_policy() {
        let store = PolicyStore::default();
        let before = store.current().await;

        let mut next = SafeguardPolicy::default();
        next.max_instances = 3;
        next.allowed_countries = vec!["NL".into()];
        store.reload(next).await.unwrap();

        // The earlier snapshot is untouched.
        assert_eq!(before.max_instances, 10);
        assert_eq!(before.allowed_countries.len(), 10);

        let after = store.current().await;
        assert_eq!(after.max_instances, 3);
        assert_eq!(after.allowed_countries, vec!["NL".to_string()]);
    }

    #[tokio::test]
    async fn test_invalid_reload_keeps_previous() {
        let store = PolicyStore::default();
        let mut bad = SafeguardPolicy::default();
        bad.memory_limit = "a lot".into();

        assert!(matches!(
            store.reload(bad).await,
            Err(PolicyError::InvalidPolicy(_))
        ));
        assert_eq!(store.current().await.memory_limit, "512m");
    }

    #[tokio::test]
    async fn test_concurrent_readers_see_whole_policies() {
        let store = Arc::new(PolicyStore::default());
        let writer = {
            let store = store.clone();
            tokio::spawn(async move {
                for i in 1..50usize {
                    let mut p = SafeguardPolicy::default();
                    p.max_instances = i;
                    p.error_threshold = i as u32;
                    store.reload(p).await.unwrap();
                }
            })
        };
        for _ in 0..200 {
            let snapshot = store.current().await;
            if snapshot.max_instances != 10 {
                assert_eq!(snapshot.max_instances as u32, snapshot.error_threshold);
            }
            tokio::task::yield_now().await;
        }
        writer.await.unwrap();
    }
}
