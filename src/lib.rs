//! Guided troubleshooting for Kubernetes workloads that cannot be reached.
//!
//! A run walks the operator through a fixed script: connect, pick a
//! namespace, inspect pod health, follow a service to its pods, then probe
//! each pod over a port-forward.

pub mod cluster;
pub mod config;
pub mod console;
pub mod diagnostics;
pub mod error;
pub mod fsm;
pub mod models;
pub mod resolve;
pub mod session;
pub mod tunnel;

pub use error::{Error, Result};
