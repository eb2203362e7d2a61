//! Admission requests and safeguard decisions

use crate::classifier::ProxyClassification;
use fleet_types::{ProxyIdentity, RejectReason, ResourceLimits};
use serde::{Deserialize, Serialize};

/// Everything the engine needs to decide on one instance
#[derive(Debug, Clone)]
pub struct AdmissionRequest {
    /// Instances currently counted against `max_instances`, excluding this one
    pub active_instances: usize,

    pub limits: ResourceLimits,

    /// Proxy the instance would use, if one is already known
    pub proxy: Option<ProxyIdentity>,

    /// Lookup result for the proxy. `None` means no lookup was made.
    pub classification: Option<Result<ProxyClassification, String>>,
}

impl AdmissionRequest {
    pub fn new(active_instances: usize, limits: ResourceLimits) -> Self {
        Self {
            active_instances,
            limits,
            proxy: None,
            classification: None,
        }
    }

    pub fn with_proxy(mut self, proxy: ProxyIdentity) -> Self {
        self.proxy = Some(proxy);
        self
    }

    pub fn with_classification(mut self, result: Result<ProxyClassification, String>) -> Self {
        self.classification = Some(result);
        self
    }
}

/// Outcome of a safeguard evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SafeguardDecision {
    Accept,
    Reject(RejectReason),
}

impl SafeguardDecision {
    pub fn is_accepted(&self) -> bool {
        matches!(self, SafeguardDecision::Accept)
    }

    pub fn reject_reason(&self) -> Option<RejectReason> {
        match self {
            SafeguardDecision::Accept => None,
            SafeguardDecision::Reject(reason) => Some(*reason),
        }
    }
}
