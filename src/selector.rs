use rand::Rng;
use rand_distr::{Distribution, Exp1};

use crate::error::{RdError, Result};

/// A process index paired with the waiting time until it fires.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Event {
    pub k: usize,
    pub dt: f64,
}

/// Direct-method event selector.
///
/// Maintains one propensity per process and their running total;
/// `next` samples the firing process by inverse CDF over the
/// propensities and the waiting time as Exp(1)/total.
///
/// `update` is O(1); the incremental total can therefore drift from the
/// exact sum by accumulated rounding. If the inverse-CDF walk falls off
/// the end of the propensity ladder, the call fails and the total is
/// recomputed from scratch on the next call.
#[derive(Clone, Debug, Default)]
pub struct Selector {
    propensities: Vec<f64>,
    total: f64,
    rebuild: bool,
}

impl Selector {
    pub fn new(n: usize) -> Selector {
        Selector {
            propensities: vec![0.0; n],
            total: 0.0,
            rebuild: false,
        }
    }

    /// Resizes to `n` processes with all propensities zero.
    pub fn reset(&mut self, n: usize) {
        self.propensities.clear();
        self.propensities.resize(n, 0.0);
        self.total = 0.0;
        self.rebuild = false;
    }

    pub fn len(&self) -> usize {
        self.propensities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.propensities.is_empty()
    }

    /// Sets the propensity of process `k`, adjusting the total by the
    /// difference.
    pub fn update(&mut self, k: usize, r: f64) {
        debug_assert!(r >= 0.0, "a propensity cannot be negative: {r}");
        let p = &mut self.propensities[k];
        self.total += r - *p;
        *p = r;
    }

    pub fn propensity(&self, k: usize) -> f64 {
        self.propensities[k]
    }

    pub fn total(&self) -> f64 {
        self.total
    }

    /// Maps a uniform variate `u ∈ [0,1)` to the process whose
    /// propensity interval contains `u·total`.
    ///
    /// Fails when rounding pushes the walk past the last process; the
    /// next call then starts from a freshly summed total.
    pub fn inverse_cdf(&mut self, u: f64) -> Result<usize> {
        if self.rebuild {
            self.total = self.propensities.iter().sum();
            self.rebuild = false;
        }

        let mut x = u * self.total;
        for (k, &p) in self.propensities.iter().enumerate() {
            x -= p;
            if x < 0.0 {
                return Ok(k);
            }
        }

        self.rebuild = true;
        Err(RdError::SamplingFailure(
            "fell off the propensity ladder (rounding?)".into(),
        ))
    }

    /// Samples the next event: which process fires, and after how long.
    pub fn next<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Result<Event> {
        let k = self.inverse_cdf(rng.random::<f64>())?;
        let e: f64 = Exp1.sample(rng);
        Ok(Event {
            k,
            dt: e / self.total,
        })
    }
}
