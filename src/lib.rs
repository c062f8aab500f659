//! Exact stochastic simulation of spatially-discretised
//! reaction-diffusion networks.
//!
//! A [`model::Model`] describes chemical species, reactions, and a
//! decomposition of space into well-mixed cells with diffusive
//! couplings. The [`engine::Simulator`] expands it into a flat set of
//! kinetic processes (in-cell reactions and directed diffusion jumps)
//! and generates exact trajectories of the resulting continuous-time
//! Markov chain with the direct Gillespie method, for any number of
//! independent replicate instances sharing the read-only tables.

pub mod categorical;
pub mod distribute;
pub mod engine;
pub mod error;
pub mod loader;
pub mod model;
pub mod process;
pub mod qmc;
pub mod samplers;
pub mod selector;
pub mod stats;

#[cfg(test)]
mod tests;

pub use distribute::{distribute, SamplerKind};
pub use engine::{Instance, Simulator};
pub use error::{RdError, Result};
pub use loader::{load_model, read_model};
pub use model::{Model, MAX_ORDER};
pub use selector::{Event, Selector};

/// A default seed for seeded RNGs.
pub const DEFAULT_SEED: u64 = 0x123456789abcdef;
