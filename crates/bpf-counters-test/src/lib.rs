//! Test infrastructure for bpf-counters
//!
//! Provides:
//! - A simulated dataplane that drives the in-memory counter store
//! - Policy and flow fixtures
//! - Polling helpers for counters that converge asynchronously

mod dataplane;
pub mod fixtures;
mod verification;

pub use dataplane::{Delivery, SimulatedDataplane};
pub use fixtures::*;
pub use verification::*;
