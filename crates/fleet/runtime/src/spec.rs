//! Container creation request

use fleet_types::ResourceLimits;
use std::collections::BTreeMap;

/// Environment variable carrying the worker's device identity
pub const ENV_WORKER_UUID: &str = "WORKER_UUID";
/// Environment variable carrying the instance name
pub const ENV_WORKER_DEVICE_NAME: &str = "WORKER_DEVICE_NAME";
/// Environment variable carrying the full proxy URL
pub const ENV_PROXY_URL: &str = "PROXY_URL";

/// Everything a runtime needs to create one worker container
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub env: BTreeMap<String, String>,
    pub labels: BTreeMap<String, String>,
    pub limits: ResourceLimits,
}

impl ContainerSpec {
    pub fn new(name: impl Into<String>, image: impl Into<String>, limits: ResourceLimits) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            env: BTreeMap::new(),
            labels: BTreeMap::new(),
            limits,
        }
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// `KEY=value` pairs in the form container engines expect
    pub fn env_pairs(&self) -> Vec<String> {
        self.env.iter().map(|(k, v)| format!("{}={}", k, v)).collect()
    }

    pub fn proxy_url(&self) -> Option<&str> {
        self.env.get(ENV_PROXY_URL).map(String::as_str)
    }
}
