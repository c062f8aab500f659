//! Weighted random sampling algorithms.
//!
//! Every sampler draws a set of population indices according to its
//! weighting scheme and writes them through a caller-owned vector. The
//! population itself is purely positional: a sampler constructed over
//! `k` parameters samples from the positions `0..population`, and the
//! caller maps positions back to whatever it is sampling from.
//!
//! The sample size may be fixed (`min_size() == max_size()`, the draw
//! and reservoir samplers) or variable by one (ordered systematic);
//! `sample` reports the number of indices actually written.

mod cps;
mod multinomial;
mod reservoir;
mod systematic;

pub use cps::{CpsConfig, CpsRejective};
pub use multinomial::MultinomialDraw;
pub use reservoir::{AdjustedPareto, EfraimidisSpirakis};
pub use systematic::OrderedSystematic;

use rand::Rng;

use crate::error::Result;

/// The capability set shared by all weighted samplers.
pub trait Sampler {
    /// The smallest sample this sampler can produce.
    fn min_size(&self) -> usize;
    /// The largest sample this sampler can produce.
    fn max_size(&self) -> usize;
    /// The minimum population size the caller must supply.
    fn population_size(&self) -> usize;

    /// Draws a sample from the positions `0..population`, clearing
    /// `out` and writing the sampled indices into it.
    /// Returns the number of indices written.
    fn sample<R: Rng + ?Sized>(
        &self,
        population: usize,
        out: &mut Vec<usize>,
        rng: &mut R,
    ) -> Result<usize>;
}
