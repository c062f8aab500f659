use rand::Rng;
use rand_distr::Distribution;

use crate::categorical::Categorical;
use crate::error::{RdError, Result};
use crate::samplers::Sampler;

/// Multinomial draw sampler: `n` independent draws with replacement,
/// with probabilities proportional to the construction weights.
///
/// Performs well while `n` is small against the population size; for
/// `n` far above it, a sequential binomial scheme would be preferable.
#[derive(Clone, Debug)]
pub struct MultinomialDraw {
    n: usize,
    cat: Categorical,
}

impl MultinomialDraw {
    pub fn new(n: usize, weights: &[f64]) -> Result<MultinomialDraw> {
        Ok(MultinomialDraw {
            n,
            cat: Categorical::new(weights)?,
        })
    }
}

impl Sampler for MultinomialDraw {
    fn min_size(&self) -> usize {
        self.n
    }

    fn max_size(&self) -> usize {
        self.n
    }

    fn population_size(&self) -> usize {
        self.cat.len()
    }

    fn sample<R: Rng + ?Sized>(
        &self,
        population: usize,
        out: &mut Vec<usize>,
        rng: &mut R,
    ) -> Result<usize> {
        out.clear();
        if self.n == 0 {
            return Ok(0);
        }
        if population < self.population_size() {
            return Err(RdError::InvalidParam(
                "population smaller than the sampler's weight sequence".into(),
            ));
        }

        for _ in 0..self.n {
            out.push(self.cat.sample(rng));
        }
        Ok(self.n)
    }
}
