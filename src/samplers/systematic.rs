use rand::Rng;

use crate::error::{RdError, Result};
use crate::samplers::Sampler;

/// Ordered systematic sampler.
///
/// Parameterised by per-position inclusion probabilities in `[0,1]`.
/// One uniform draw `u ∈ [0,1)` is walked along the prefix sums of the
/// probabilities; every time the walk crosses `u`, the position is
/// emitted and `u` advances by one. The total sample size is the sum of
/// the probabilities, rounded either way; positions past the end of the
/// parameter sequence have probability zero.
#[derive(Clone, Debug, Default)]
pub struct OrderedSystematic {
    psum: Vec<f64>,
}

impl OrderedSystematic {
    pub fn new(pi: &[f64]) -> Result<OrderedSystematic> {
        let mut psum = Vec::with_capacity(pi.len());
        let mut sum = 0.0;
        for &p in pi {
            if !(0.0..=1.0).contains(&p) {
                return Err(RdError::InvalidParam(format!(
                    "inclusion probability {p} outside [0,1]"
                )));
            }
            sum += p;
            psum.push(sum);
        }
        Ok(OrderedSystematic { psum })
    }

    /// Rescales the prefix sums so their total is exactly `total`.
    /// Used by the allocation helper, where the residual probabilities
    /// are known to sum to an integer and rounding noise would
    /// otherwise occasionally lose a unit.
    pub fn with_total(pi: &[f64], total: f64) -> Result<OrderedSystematic> {
        let mut sampler = OrderedSystematic::new(pi)?;
        let last = sampler.psum.last().copied().unwrap_or(0.0);
        if last > 0.0 {
            let scale = total / last;
            for s in &mut sampler.psum {
                *s *= scale;
            }
        }
        Ok(sampler)
    }
}

impl Sampler for OrderedSystematic {
    fn min_size(&self) -> usize {
        match self.psum.last() {
            Some(&s) => s.floor() as usize,
            None => 0,
        }
    }

    fn max_size(&self) -> usize {
        match self.psum.last() {
            Some(&s) => s.ceil() as usize,
            None => 0,
        }
    }

    fn population_size(&self) -> usize {
        0
    }

    fn sample<R: Rng + ?Sized>(
        &self,
        population: usize,
        out: &mut Vec<usize>,
        rng: &mut R,
    ) -> Result<usize> {
        out.clear();
        let n_max = self.max_size();
        let mut u = rng.random::<f64>();

        for (i, &s) in self.psum.iter().enumerate() {
            if i >= population || out.len() == n_max {
                break;
            }
            // a probability above one can emit the same position twice
            while u < s {
                out.push(i);
                u += 1.0;
            }
        }
        Ok(out.len())
    }
}
