//! Fleet Policy - Safeguards gating instance admission
//!
//! [`SafeguardEngine`] is a pure decision function over an admission request
//! and a policy snapshot. [`PolicyStore`] publishes policy snapshots and swaps
//! them whole on reload, so a reader sees either the old or the new policy
//! and never a mix.
//!
//! Classification of a proxy (exit country, anonymity, TLS) comes from the
//! [`GeoClassifier`] collaborator.

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod classifier;
pub mod decision;
pub mod engine;
pub mod error;
pub mod store;

pub use classifier::{GeoClassifier, IpApiClassifier, ProxyClassification, StaticClassifier};
pub use decision::{AdmissionRequest, SafeguardDecision};
pub use engine::SafeguardEngine;
pub use error::{PolicyError, PolicyResult};
pub use store::PolicyStore;
