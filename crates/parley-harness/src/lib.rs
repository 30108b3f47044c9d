//! Deterministic simulation harness for Parley.
//!
//! [`SimEnv`] implements the core `Environment` with a virtual clock and a
//! seeded ChaCha RNG. [`SimCluster`] wires one `ServerDriver` to any number
//! of Sans-IO clients through in-memory byte delivery, so whole scenarios
//! (timeouts, address conflicts, dead peers) replay exactly from a seed.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod cluster;
pub mod sim_env;

pub use cluster::{PeerId, SimCluster};
pub use sim_env::{SimEnv, SimInstant};
