//! # Fleet Health - Health polling for running worker instances
//!
//! The [`HealthMonitor`] runs one polling task per `Running` or `Degraded`
//! instance. Each cycle samples container stats, inspects the container and
//! probes the instance's proxy, then turns what it saw into
//! [`HealthSignal`](fleet_types::HealthSignal)s.
//!
//! The monitor only observes. Signals go out on an `mpsc` channel to whoever
//! owns recovery, and as events on the fleet broadcast stream. Nothing in
//! this crate changes instance state.
//!
//! ## Signal kinds
//!
//! - `ResourceThresholdExceeded`: cpu or memory above the policy alert
//!   thresholds. Advisory.
//! - `ProxyUnreachable`: the proxy failed its probe. The streak is the
//!   proxy's own failure counter.
//! - `ContainerExited`: the runtime no longer reports the container running.
//!
//! A clean cycle for an instance that was failing produces a
//! [`MonitorReport::Recovered`](fleet_types::MonitorReport) notice instead.

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod config;
pub mod error;
pub mod monitor;

pub use config::MonitorConfig;
pub use error::{HealthError, HealthResult};
pub use monitor::{HealthMonitor, MonitorDeps};
