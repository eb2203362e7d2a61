//! Safeguard policy types
//!
//! The policy is loaded once and swapped whole on reload. Nothing mutates
//! individual fields of a published policy.

use crate::error::ValidationError;
use crate::limits::parse_memory;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Process-wide safeguard configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafeguardPolicy {
    /// Maximum number of active instances
    #[serde(default = "default_max_instances")]
    pub max_instances: usize,

    /// Per-instance memory ceiling, e.g. `"512m"`
    #[serde(default = "default_memory_limit")]
    pub memory_limit: String,

    /// Per-instance cpu ceiling as a fraction of one core
    #[serde(default = "default_cpu_limit")]
    pub cpu_limit: f64,

    /// ISO country codes a proxy may exit from
    #[serde(default = "default_allowed_countries")]
    pub allowed_countries: Vec<String>,

    /// Proxy hosts or exit IPs that are never accepted
    #[serde(default)]
    pub blocked_ips: BTreeSet<String>,

    /// Master switch for proxy classification checks
    #[serde(default = "default_true")]
    pub proxy_verification: bool,

    #[serde(default)]
    pub security_checks: SecurityChecks,

    /// Consecutive failures before an instance degrades
    #[serde(default = "default_error_threshold")]
    pub error_threshold: u32,

    /// Optional per-instance bandwidth ceiling
    #[serde(default)]
    pub bandwidth_limit_kbps: Option<u64>,

    #[serde(default)]
    pub alert_thresholds: AlertThresholds,

    /// Health polling interval
    #[serde(default = "default_monitoring_interval")]
    pub monitoring_interval_secs: u64,
}

/// Individual proxy verification toggles
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityChecks {
    #[serde(default = "default_true")]
    pub verify_proxy_ssl: bool,

    #[serde(default = "default_true")]
    pub verify_proxy_anonymity: bool,

    #[serde(default = "default_true")]
    pub check_proxy_location: bool,
}

impl Default for SecurityChecks {
    fn default() -> Self {
        Self {
            verify_proxy_ssl: true,
            verify_proxy_anonymity: true,
            check_proxy_location: true,
        }
    }
}

/// Resource usage percentages that raise advisory alerts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertThresholds {
    #[serde(default = "default_cpu_alert")]
    pub cpu_percent: f64,

    #[serde(default = "default_memory_alert")]
    pub memory_percent: f64,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            cpu_percent: default_cpu_alert(),
            memory_percent: default_memory_alert(),
        }
    }
}

impl Default for SafeguardPolicy {
    fn default() -> Self {
        Self {
            max_instances: default_max_instances(),
            memory_limit: default_memory_limit(),
            cpu_limit: default_cpu_limit(),
            allowed_countries: default_allowed_countries(),
            blocked_ips: BTreeSet::new(),
            proxy_verification: true,
            security_checks: SecurityChecks::default(),
            error_threshold: default_error_threshold(),
            bandwidth_limit_kbps: None,
            alert_thresholds: AlertThresholds::default(),
            monitoring_interval_secs: default_monitoring_interval(),
        }
    }
}

impl SafeguardPolicy {
    /// Policy with every proxy verification switched off
    pub fn permissive() -> Self {
        Self {
            proxy_verification: false,
            ..Default::default()
        }
    }

    pub fn is_country_allowed(&self, country_code: &str) -> bool {
        let code = country_code.trim().to_ascii_uppercase();
        self.allowed_countries
            .iter()
            .any(|c| c.eq_ignore_ascii_case(&code))
    }

    pub fn is_ip_blocked(&self, ip: &str) -> bool {
        self.blocked_ips.contains(ip.trim())
    }

    /// Memory ceiling in bytes
    pub fn memory_ceiling_bytes(&self) -> Result<u64, ValidationError> {
        parse_memory(&self.memory_limit)
    }

    /// Reject policies that could never admit an instance
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.max_instances == 0 {
            return Err(ValidationError::InvalidPolicy(
                "max_instances must be at least 1".into(),
            ));
        }
        self.memory_ceiling_bytes()
            .map_err(|e| ValidationError::InvalidPolicy(e.to_string()))?;
        if !self.cpu_limit.is_finite() || self.cpu_limit <= 0.0 {
            return Err(ValidationError::InvalidPolicy(
                "cpu_limit must be a positive number".into(),
            ));
        }
        if self.error_threshold == 0 {
            return Err(ValidationError::InvalidPolicy(
                "error_threshold must be at least 1".into(),
            ));
        }
        if self.monitoring_interval_secs == 0 {
            return Err(ValidationError::InvalidPolicy(
                "monitoring_interval_secs must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Reason a safeguard check refused an instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RejectReason {
    MaxInstancesExceeded,
    ResourceLimitExceeded,
    CountryNotAllowed,
    ProxyBlocked,
    #[serde(rename = "SSLVerificationFailed")]
    SslVerificationFailed,
}

impl RejectReason {
    /// Stable code rendered to callers
    pub fn code(&self) -> &'static str {
        match self {
            RejectReason::MaxInstancesExceeded => "MAX_INSTANCES_EXCEEDED",
            RejectReason::ResourceLimitExceeded => "RESOURCE_LIMIT_EXCEEDED",
            RejectReason::CountryNotAllowed => "COUNTRY_NOT_ALLOWED",
            RejectReason::ProxyBlocked => "PROXY_BLOCKED",
            RejectReason::SslVerificationFailed => "SSL_VERIFICATION_FAILED",
        }
    }

    /// Reasons that describe the proxy itself rather than the request
    pub fn blames_proxy(&self) -> bool {
        matches!(
            self,
            RejectReason::CountryNotAllowed | RejectReason::ProxyBlocked
        )
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RejectReason::MaxInstancesExceeded => "MaxInstancesExceeded",
            RejectReason::ResourceLimitExceeded => "ResourceLimitExceeded",
            RejectReason::CountryNotAllowed => "CountryNotAllowed",
            RejectReason::ProxyBlocked => "ProxyBlocked",
            RejectReason::SslVerificationFailed => "SSLVerificationFailed",
        };
        f.write_str(s)
    }
}

// Default value helpers
fn default_true() -> bool {
    true
}

fn default_max_instances() -> usize {
    10
}

fn default_memory_limit() -> String {
    "512m".to_string()
}

fn default_cpu_limit() -> f64 {
    0.5
}

fn default_allowed_countries() -> Vec<String> {
    ["US", "CA", "GB", "DE", "FR", "IT", "ES", "NL", "SE", "AU"]
        .iter()
        .map(|c| c.to_string())
        .collect()
}

fn default_error_threshold() -> u32 {
    3
}

fn default_cpu_alert() -> f64 {
    80.0
}

fn default_memory_alert() -> f64 {
    90.0
}

fn default_monitoring_interval() -> u64 {
    60
}
