//! Fleet Runtime - The container runtime seen from the fleet core
//!
//! The core never runs containers itself. It calls a [`ContainerRuntime`]
//! through a [`RuntimePool`], which bounds how many runtime operations run at
//! once and how long each may take.
//!
//! Two runtimes ship here: [`DockerRuntime`] talks to a local Docker engine,
//! and [`SimulatedRuntime`] keeps containers in memory for tests and dry runs.

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod docker;
pub mod error;
pub mod pool;
pub mod runtime;
pub mod simulated;
pub mod spec;
pub mod stats;

pub use docker::DockerRuntime;
pub use error::{RuntimeError, RuntimeResult};
pub use pool::{RuntimePool, RuntimePoolConfig};
pub use runtime::ContainerRuntime;
pub use simulated::SimulatedRuntime;
pub use spec::ContainerSpec;
pub use stats::RawStats;
