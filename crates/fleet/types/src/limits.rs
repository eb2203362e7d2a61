//! Per-instance resource limits

use crate::error::ValidationError;
use serde::{Deserialize, Serialize};

/// Default cpu shares handed to the runtime
pub const DEFAULT_CPU_SHARES: u64 = 512;

/// Resource limits fixed at instance creation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// Hard memory limit in bytes
    pub memory_bytes: u64,

    /// Relative cpu weight
    pub cpu_shares: u64,

    /// Cpu quota as a fraction of one core (0.5 = half a core)
    pub cpu_quota: f64,

    /// Optional egress ceiling in kilobits per second
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bandwidth_limit_kbps: Option<u64>,
}

impl ResourceLimits {
    pub fn new(memory_bytes: u64, cpu_quota: f64) -> Self {
        Self {
            memory_bytes,
            cpu_shares: DEFAULT_CPU_SHARES,
            cpu_quota,
            bandwidth_limit_kbps: None,
        }
    }

    /// Build limits from human-readable strings such as `"512m"` and `"0.5"`
    pub fn parse(memory: &str, cpu: &str) -> Result<Self, ValidationError> {
        let memory_bytes = parse_memory(memory)?;
        let cpu_quota: f64 = cpu
            .trim()
            .parse()
            .map_err(|_| ValidationError::malformed_resource(cpu, "cpu limit is not a number"))?;
        let limits = Self::new(memory_bytes, cpu_quota);
        limits.validate()?;
        Ok(limits)
    }

    pub fn with_bandwidth(mut self, kbps: u64) -> Self {
        self.bandwidth_limit_kbps = Some(kbps);
        self
    }

    pub fn with_cpu_shares(mut self, shares: u64) -> Self {
        self.cpu_shares = shares;
        self
    }

    /// Reject limits no runtime could honour
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.memory_bytes == 0 {
            return Err(ValidationError::malformed_resource(
                "memory",
                "memory limit must be positive",
            ));
        }
        if !self.cpu_quota.is_finite() || self.cpu_quota <= 0.0 {
            return Err(ValidationError::malformed_resource(
                &self.cpu_quota.to_string(),
                "cpu limit must be a positive number",
            ));
        }
        if self.cpu_shares == 0 {
            return Err(ValidationError::malformed_resource(
                "cpu_shares",
                "cpu shares must be positive",
            ));
        }
        Ok(())
    }

    /// Quota in microseconds per 100ms scheduling period
    pub fn cpu_quota_micros(&self, period_micros: i64) -> i64 {
        (self.cpu_quota * period_micros as f64).round() as i64
    }
}

/// Parse a memory size like `512m`, `1G`, `2048k` or a bare byte count
pub fn parse_memory(raw: &str) -> Result<u64, ValidationError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::malformed_resource(raw, "empty memory spec"));
    }

    let (digits, multiplier) = match trimmed.chars().last() {
        Some(c) if c.is_ascii_digit() => (trimmed, 1u64),
        Some(c) => {
            let multiplier = match c.to_ascii_lowercase() {
                'k' => 1024,
                'm' => 1024 * 1024,
                'g' => 1024 * 1024 * 1024,
                _ => {
                    return Err(ValidationError::malformed_resource(
                        raw,
                        "unknown size suffix (expected k, m or g)",
                    ))
                }
            };
            (&trimmed[..trimmed.len() - c.len_utf8()], multiplier)
        }
        None => return Err(ValidationError::malformed_resource(raw, "empty memory spec")),
    };

    let value: u64 = digits
        .trim()
        .parse()
        .map_err(|_| ValidationError::malformed_resource(raw, "size is not an integer"))?;
    if value == 0 {
        return Err(ValidationError::malformed_resource(raw, "size must be positive"));
    }

    value
        .checked_mul(multiplier)
        .ok_or_else(|| ValidationError::malformed_resource(raw, "size overflows"))
}
