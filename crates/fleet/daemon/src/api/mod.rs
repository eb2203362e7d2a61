//! API layer for fleetd

pub mod rest;

pub use rest::create_router;
