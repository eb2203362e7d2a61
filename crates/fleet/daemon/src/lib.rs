//! Fleet daemon library
//!
//! This module provides the components behind `fleetd`:
//! - REST API handlers over the fleet control plane
//! - Layered configuration
//! - Server lifecycle management

#![deny(unsafe_code)]

pub mod api;
pub mod config;
pub mod error;
pub mod server;

pub use config::{DaemonConfig, RuntimeKind};
pub use error::{ApiError, DaemonError};
pub use server::Server;
