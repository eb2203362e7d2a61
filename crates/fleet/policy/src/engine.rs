//! Safeguard engine
//!
//! Checks run in a fixed order and the first failing check decides:
//!
//! 1. capacity
//! 2. resource ceilings
//! 3. blocked proxy host or exit address
//! 4. classification (only with `proxy_verification` on)

use crate::decision::{AdmissionRequest, SafeguardDecision};
use fleet_types::{RejectReason, ResourceLimits, SafeguardPolicy};
use tracing::debug;

/// Pure admission decisions. Holds no state and mutates nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct SafeguardEngine;

impl SafeguardEngine {
    pub fn new() -> Self {
        Self
    }

    /// Full evaluation
    pub fn evaluate(
        &self,
        request: &AdmissionRequest,
        policy: &SafeguardPolicy,
    ) -> SafeguardDecision {
        let decision = self
            .check_capacity(request.active_instances, policy)
            .or_else(|| self.check_resources(&request.limits, policy))
            .or_else(|| self.check_blocked(request, policy))
            .or_else(|| self.check_classification(request, policy))
            .map(SafeguardDecision::Reject)
            .unwrap_or(SafeguardDecision::Accept);

        debug!(active = request.active_instances, decision = ?decision, "Safeguards evaluated");
        decision
    }

    /// Capacity and resource checks only, run before any proxy is touched
    pub fn evaluate_capacity(
        &self,
        active_instances: usize,
        limits: &ResourceLimits,
        policy: &SafeguardPolicy,
    ) -> SafeguardDecision {
        self.check_capacity(active_instances, policy)
            .or_else(|| self.check_resources(limits, policy))
            .map(SafeguardDecision::Reject)
            .unwrap_or(SafeguardDecision::Accept)
    }

    fn check_capacity(&self, active: usize, policy: &SafeguardPolicy) -> Option<RejectReason> {
        (active >= policy.max_instances).then_some(RejectReason::MaxInstancesExceeded)
    }

    fn check_resources(
        &self,
        limits: &ResourceLimits,
        policy: &SafeguardPolicy,
    ) -> Option<RejectReason> {
        // An unparsable ceiling admits nothing.
        let memory_ok = policy
            .memory_ceiling_bytes()
            .map(|ceiling| limits.memory_bytes <= ceiling)
            .unwrap_or(false);
        let cpu_ok = limits.cpu_quota <= policy.cpu_limit;
        let bandwidth_ok = match (policy.bandwidth_limit_kbps, limits.bandwidth_limit_kbps) {
            (Some(max), Some(requested)) => requested <= max,
            _ => true,
        };

        (!(memory_ok && cpu_ok && bandwidth_ok)).then_some(RejectReason::ResourceLimitExceeded)
    }

    fn check_blocked(
        &self,
        request: &AdmissionRequest,
        policy: &SafeguardPolicy,
    ) -> Option<RejectReason> {
        let host_blocked = request
            .proxy
            .as_ref()
            .map(|p| policy.is_ip_blocked(&p.host))
            .unwrap_or(false);
        let exit_blocked = match &request.classification {
            Some(Ok(c)) => c
                .exit_ip
                .as_deref()
                .map(|ip| policy.is_ip_blocked(ip))
                .unwrap_or(false),
            _ => false,
        };

        (host_blocked || exit_blocked).then_some(RejectReason::ProxyBlocked)
    }

    fn check_classification(
        &self,
        request: &AdmissionRequest,
        policy: &SafeguardPolicy,
    ) -> Option<RejectReason> {
        if !policy.proxy_verification {
            return None;
        }
        let checks = &policy.security_checks;

        let classification = match &request.classification {
            Some(Ok(c)) => c,
            _ => return Some(RejectReason::SslVerificationFailed),
        };

        if checks.check_proxy_location && !policy.is_country_allowed(&classification.country) {
            return Some(RejectReason::CountryNotAllowed);
        }
        if checks.verify_proxy_anonymity && !classification.anonymous {
            return Some(RejectReason::ProxyBlocked);
        }
        if checks.verify_proxy_ssl && !classification.ssl_ok {
            return Some(RejectReason::SslVerificationFailed);
        }
        None
    }
}
