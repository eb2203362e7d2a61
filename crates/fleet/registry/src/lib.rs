//! Fleet Registry - Instance records and their persistence
//!
//! The registry is the only place instance state changes. Every change is a
//! compare-and-swap against the state the caller believes is current, so two
//! racing actors (an operator and the recovery coordinator, say) can never
//! both win.

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod error;
pub mod instance;
pub mod memory;
pub mod persist;

pub use error::{RegistryError, RegistryResult};
pub use instance::{InstanceRegistry, Transition};
pub use memory::InMemoryInstanceRegistry;
pub use persist::{FleetSnapshot, InMemorySnapshotStore, JsonFileStore, SnapshotStore};
