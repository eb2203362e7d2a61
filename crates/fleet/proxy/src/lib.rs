//! Fleet Proxy - Proxy pool for proxy-bound worker fleets
//!
//! The pool is the single owner of proxy assignment. It guarantees that at
//! most one instance holds a given endpoint and that allocation never hands
//! out a banned or already assigned proxy.
//!
//! Health probing goes through the [`ProxyProber`] collaborator and only ever
//! touches the probed endpoint's own counters.

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod config;
pub mod error;
pub mod parse;
pub mod pool;
pub mod prober;

pub use config::{PoolConfig, SelectionStrategy};
pub use error::{PoolError, PoolResult};
pub use parse::validate;
pub use pool::{PoolStats, ProxyPool};
pub use prober::{HttpProxyProber, ProbeOutcome, ProxyProber, ScriptedProber};
