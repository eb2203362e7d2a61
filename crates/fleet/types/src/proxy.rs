//! Proxy endpoint types
//!
//! A proxy's identity is immutable once created. Its status, counters and
//! assignment are owned by the proxy pool.

use crate::{InstanceId, ProxyId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Supported proxy protocols
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyScheme {
    Socks5,
    Http,
    Https,
}

impl ProxyScheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProxyScheme::Socks5 => "socks5",
            ProxyScheme::Http => "http",
            ProxyScheme::Https => "https",
        }
    }

    /// Parse a scheme name, case-insensitively
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.to_ascii_lowercase().as_str() {
            "socks5" => Some(ProxyScheme::Socks5),
            "http" => Some(ProxyScheme::Http),
            "https" => Some(ProxyScheme::Https),
            _ => None,
        }
    }
}

impl fmt::Display for ProxyScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Proxy credentials. The password never appears in Debug or Display output.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProxyCredentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for ProxyCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Immutable identity of a proxy endpoint
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProxyIdentity {
    pub scheme: ProxyScheme,
    pub host: String,
    pub port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<ProxyCredentials>,
}

impl ProxyIdentity {
    pub fn new(scheme: ProxyScheme, host: impl Into<String>, port: u16) -> Self {
        Self {
            scheme,
            host: host.into(),
            port,
            credentials: None,
        }
    }

    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.credentials = Some(ProxyCredentials {
            username: username.into(),
            password: password.into(),
        });
        self
    }

    /// Full URL including credentials, as handed to the worker container
    pub fn to_url(&self) -> String {
        match &self.credentials {
            Some(c) => format!(
                "{}://{}:{}@{}:{}",
                self.scheme, c.username, c.password, self.host, self.port
            ),
            None => format!("{}://{}:{}", self.scheme, self.host, self.port),
        }
    }
}

impl fmt::Display for ProxyIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.credentials {
            Some(c) => write!(
                f,
                "{}://{}:***@{}:{}",
                self.scheme, c.username, self.host, self.port
            ),
            None => write!(f, "{}://{}:{}", self.scheme, self.host, self.port),
        }
    }
}

/// Validation and health status of a proxy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProxyStatus {
    /// Not probed yet
    Untested,
    /// Last probes succeeded
    Healthy,
    /// Failure counter crossed the threshold
    Unhealthy,
    /// Permanently excluded from allocation
    Banned,
}

impl fmt::Display for ProxyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProxyStatus::Untested => "untested",
            ProxyStatus::Healthy => "healthy",
            ProxyStatus::Unhealthy => "unhealthy",
            ProxyStatus::Banned => "banned",
        };
        f.write_str(s)
    }
}

/// A proxy endpoint as tracked by the pool
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyEndpoint {
    pub id: ProxyId,
    pub identity: ProxyIdentity,
    pub status: ProxyStatus,
    pub consecutive_failures: u32,
    pub last_checked_at: Option<DateTime<Utc>>,
    pub last_latency_ms: Option<u64>,

    /// Holder of this proxy. A weak reference, never ownership.
    pub assigned_instance: Option<InstanceId>,
    pub assigned_at: Option<DateTime<Utc>>,

    /// When this endpoint was last handed out, for LRU selection
    pub last_assigned_at: Option<DateTime<Utc>>,
    pub added_at: DateTime<Utc>,
}

impl ProxyEndpoint {
    pub fn new(identity: ProxyIdentity) -> Self {
        Self {
            id: ProxyId::generate(),
            identity,
            status: ProxyStatus::Untested,
            consecutive_failures: 0,
            last_checked_at: None,
            last_latency_ms: None,
            assigned_instance: None,
            assigned_at: None,
            last_assigned_at: None,
            added_at: Utc::now(),
        }
    }

    pub fn is_assigned(&self) -> bool {
        self.assigned_instance.is_some()
    }

    pub fn is_banned(&self) -> bool {
        self.status == ProxyStatus::Banned
    }

    /// Whether allocation may hand this endpoint out
    pub fn is_allocatable(&self) -> bool {
        self.status == ProxyStatus::Healthy && !self.is_assigned()
    }

    pub fn to_record(&self) -> ProxyRecord {
        ProxyRecord {
            id: self.id,
            endpoint: self.identity.clone(),
            status: self.status,
            consecutive_failures: self.consecutive_failures,
        }
    }
}

/// Persisted projection of a proxy endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyRecord {
    pub id: ProxyId,
    pub endpoint: ProxyIdentity,
    pub status: ProxyStatus,
    pub consecutive_failures: u32,
}

impl ProxyRecord {
    /// Rebuild an unassigned endpoint from its persisted record
    pub fn into_endpoint(self) -> ProxyEndpoint {
        ProxyEndpoint {
            id: self.id,
            identity: self.endpoint,
            status: self.status,
            consecutive_failures: self.consecutive_failures,
            last_checked_at: None,
            last_latency_ms: None,
            assigned_instance: None,
            assigned_at: None,
            last_assigned_at: None,
            added_at: Utc::now(),
        }
    }
}
