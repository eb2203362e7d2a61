//! Fleet snapshot persistence
//!
//! A snapshot holds every instance record and every proxy record. It is
//! written after each mutating operation and read once at startup to
//! reattach to containers that outlived the process.

use crate::error::{RegistryError, RegistryResult};
use async_trait::async_trait;
use fleet_types::{InstanceRecord, ProxyRecord};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::debug;

/// Persisted fleet state
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FleetSnapshot {
    #[serde(default)]
    pub instances: Vec<InstanceRecord>,
    #[serde(default)]
    pub proxies: Vec<ProxyRecord>,
}

impl FleetSnapshot {
    pub fn is_empty(&self) -> bool {
        self.instances.is_empty() && self.proxies.is_empty()
    }
}

/// Storage backend for fleet snapshots
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn save(&self, snapshot: &FleetSnapshot) -> RegistryResult<()>;

    /// Returns an empty snapshot if nothing was persisted yet
    async fn load(&self) -> RegistryResult<FleetSnapshot>;
}

/// JSON-file snapshot store.
///
/// Writes go to a uniquely named `.tmp` sibling that is then renamed over
/// the target, so a crash mid-write leaves the previous snapshot intact.
/// Saves are serialized; the last caller to acquire the lock writes last.
pub struct JsonFileStore {
    path: PathBuf,
    /// Held across write and rename; counts writes for temp file names
    writes: tokio::sync::Mutex<u64>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            writes: tokio::sync::Mutex::new(0),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn tmp_path(&self, seq: u64) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(format!(".{}.{}.tmp", std::process::id(), seq));
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl SnapshotStore for JsonFileStore {
    async fn save(&self, snapshot: &FleetSnapshot) -> RegistryResult<()> {
        let json = serde_json::to_string_pretty(snapshot)
            .map_err(|e| RegistryError::Storage(format!("serialization failed: {}", e)))?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| RegistryError::Storage(e.to_string()))?;
            }
        }

        let mut writes = self.writes.lock().await;
        *writes += 1;
        let tmp_path = self.tmp_path(*writes);
        tokio::fs::write(&tmp_path, json)
            .await
            .map_err(|e| RegistryError::Storage(e.to_string()))?;
        if let Err(e) = tokio::fs::rename(&tmp_path, &self.path).await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(RegistryError::Storage(e.to_string()));
        }
        drop(writes);

        debug!(
            path = %self.path.display(),
            instances = snapshot.instances.len(),
            proxies = snapshot.proxies.len(),
            "Snapshot saved"
        );
        Ok(())
    }

    async fn load(&self) -> RegistryResult<FleetSnapshot> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(FleetSnapshot::default())
            }
            Err(e) => return Err(RegistryError::Storage(e.to_string())),
        };
        serde_json::from_str(&contents)
            .map_err(|e| RegistryError::Storage(format!("deserialization failed: {}", e)))
    }
}

/// In-memory snapshot store (for testing)
#[derive(Default)]
pub struct InMemorySnapshotStore {
    data: Mutex<FleetSnapshot>,
    saves: Mutex<usize>,
}

impl InMemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_snapshot(snapshot: FleetSnapshot) -> Self {
        Self {
            data: Mutex::new(snapshot),
            saves: Mutex::new(0),
        }
    }

    /// Number of saves performed
    pub fn save_count(&self) -> usize {
        self.saves.lock().map(|n| *n).unwrap_or(0)
    }
}

#[async_trait]
impl SnapshotStore for InMemorySnapshotStore {
    async fn save(&self, snapshot: &FleetSnapshot) -> RegistryResult<()> {
        let mut data = self
            .data
            .lock()
            .map_err(|_| RegistryError::Storage("snapshot lock poisoned".into()))?;
        *data = snapshot.clone();
        if let Ok(mut saves) = self.saves.lock() {
            *saves += 1;
        }
        Ok(())
    }

    async fn load(&self) -> RegistryResult<FleetSnapshot> {
        let data = self
            .data
            .lock()
            .map_err(|_| RegistryError::Storage("snapshot lock poisoned".into()))?;
        Ok(data.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_types::{
        Instance, InstanceState, ProxyEndpoint, ProxyIdentity, ProxyScheme,
        ResourceLimits,
    };

    fn sample() -> FleetSnapshot {
        let proxy = ProxyEndpoint::new(
            ProxyIdentity::new(ProxyScheme::Socks5, "10.0.0.1", 1080).with_credentials("u", "p"),
        );
        let mut instance = Instance::pending(
            "worker-1",
            proxy.id,
            ResourceLimits::new(128 * 1024 * 1024, 0.5),
        );
        instance.state = InstanceState::Running;
        FleetSnapshot {
            instances: vec![instance.to_record()],
            proxies: vec![proxy.to_record()],
        }
    }

    #[tokio::test]
    async fn test_json_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("state").join("fleet.json"));

        assert!(store.load().await.unwrap().is_empty());

        let snapshot = sample();
        store.save(&snapshot).await.unwrap();
        assert_eq!(store.load().await.unwrap(), snapshot);

        let leftovers: Vec<_> = std::fs::read_dir(store.path().parent().unwrap())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_concurrent_saves_all_succeed() {
        let dir = tempfile::tempdir().unwrap();
        let store = std::sync::Arc::new(JsonFileStore::new(dir.path().join("fleet.json")));
        let snapshot = sample();

        let mut handles = Vec::new();
        for _ in 0..64 {
            let store = store.clone();
            let snapshot = snapshot.clone();
            handles.push(tokio::spawn(async move { store.save(&snapshot).await }));
        }

        let mut failed = 0;
        for handle in handles {
            if handle.await.unwrap().is_err() {
                failed += 1;
            }
        }
        assert_eq!(failed, 0);
        assert_eq!(store.load().await.unwrap(), snapshot);

        let files: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name())
            .collect();
        assert_eq!(files.len(), 1);
    }

    #[tokio::test]
    async fn test_json_layout_uses_stable_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("fleet.json"));
        store.save(&sample()).await.unwrap();

        let raw = std::fs::read_to_string(store.path()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert!(value["instances"][0]["device_identity"].is_string());
        assert_eq!(value["proxies"][0]["endpoint"]["host"], "10.0.0.1");
        assert_eq!(value["instances"][0]["state"], "Running");
    }

    #[tokio::test]
    async fn test_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fleet.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(JsonFileStore::new(path).load().await.is_err());
    }

    #[tokio::test]
    async fn test_in_memory_store() {
        let store = InMemorySnapshotStore::new();
        assert!(store.load().await.unwrap().is_empty());

        let snapshot = sample();
        store.save(&snapshot).await.unwrap();
        assert_eq!(store.save_count(), 1);

        let loaded = store.load().await.unwrap();
        assert_eq!(loaded.instances[0].name, "worker-1");
        assert_eq!(loaded.proxies[0].id, snapshot.proxies[0].id);
        assert_eq!(loaded.instances[0].proxy_id, loaded.proxies[0].id);
    }
}
