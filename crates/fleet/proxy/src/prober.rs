//! Proxy reachability probing
//!
//! The pool never talks to the network itself. It asks a [`ProxyProber`] to
//! fetch a fixed target through the proxy and records the outcome.

use async_trait::async_trait;
use dashmap::DashMap;
use fleet_types::ProxyIdentity;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tracing::debug;

/// Result of one reachability probe
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeOutcome {
    pub success: bool,
    pub latency: Option<Duration>,
    pub error: Option<String>,
}

impl ProbeOutcome {
    pub fn ok(latency: Duration) -> Self {
        Self {
            success: true,
            latency: Some(latency),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            latency: None,
            error: Some(error.into()),
        }
    }

    pub fn timed_out(timeout: Duration) -> Self {
        Self::failed(format!("probe timed out after {}ms", timeout.as_millis()))
    }

    pub fn latency_ms(&self) -> Option<u64> {
        self.latency.map(|l| l.as_millis() as u64)
    }
}

/// Collaborator that checks whether a proxy forwards traffic
#[async_trait]
pub trait ProxyProber: Send + Sync {
    async fn probe(&self, identity: &ProxyIdentity, timeout: Duration) -> ProbeOutcome;
}

/// Prober that fetches a reachability target through the proxy with reqwest
pub struct HttpProxyProber {
    target: String,
}

impl HttpProxyProber {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
        }
    }
}

#[async_trait]
impl ProxyProber for HttpProxyProber {
    async fn probe(&self, identity: &ProxyIdentity, timeout: Duration) -> ProbeOutcome {
        let proxy = match reqwest::Proxy::all(identity.to_url()) {
            Ok(proxy) => proxy,
            Err(e) => return ProbeOutcome::failed(format!("invalid proxy: {}", e)),
        };
        let client = match reqwest::Client::builder()
            .proxy(proxy)
            .timeout(timeout)
            .build()
        {
            Ok(client) => client,
            Err(e) => return ProbeOutcome::failed(format!("client build failed: {}", e)),
        };

        let started = Instant::now();
        match client.get(&self.target).send().await {
            Ok(resp) if resp.status().is_success() => ProbeOutcome::ok(started.elapsed()),
            Ok(resp) => ProbeOutcome::failed(format!("unexpected status {}", resp.status())),
            Err(e) if e.is_timeout() => ProbeOutcome::timed_out(timeout),
            Err(e) => {
                debug!(proxy = %identity, error = %e, "Probe request failed");
                ProbeOutcome::failed(e.to_string())
            }
        }
    }
}

/// Deterministic prober for tests
///
/// Every endpoint is reachable unless overridden. A configured latency is
/// slept before answering, so a latency above the probe timeout simulates a
/// hanging proxy.
pub struct ScriptedProber {
    default_reachable: AtomicBool,
    overrides: DashMap<String, bool>,
    latency: Duration,
    calls: AtomicUsize,
}

impl ScriptedProber {
    pub fn reachable() -> Self {
        Self::with_default(true)
    }

    pub fn unreachable() -> Self {
        Self::with_default(false)
    }

    fn with_default(reachable: bool) -> Self {
        Self {
            default_reachable: AtomicBool::new(reachable),
            overrides: DashMap::new(),
            latency: Duration::from_millis(5),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn set_reachable(&self, identity: &ProxyIdentity, reachable: bool) {
        self.overrides.insert(Self::key(identity), reachable);
    }

    pub fn set_default(&self, reachable: bool) {
        self.default_reachable.store(reachable, Ordering::SeqCst);
    }

    /// Number of probes served so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn key(identity: &ProxyIdentity) -> String {
        format!("{}:{}", identity.host, identity.port)
    }
}

#[async_trait]
impl ProxyProber for ScriptedProber {
    async fn probe(&self, identity: &ProxyIdentity, _timeout: Duration) -> ProbeOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let reachable = self
            .overrides
            .get(&Self::key(identity))
            .map(|r| *r)
            .unwrap_or_else(|| self.default_reachable.load(Ordering::SeqCst));
        if reachable {
            ProbeOutcome::ok(self.latency)
        } else {
            ProbeOutcome::failed("connection refused")
        }
    }
}
