use rand::Rng;
use rand_distr::Distribution;

use crate::error::{RdError, Result};

/// A categorical distribution over `0..n`, implemented with the alias
/// method: O(n) construction, O(1) draws.
///
/// Each bin `i` stores a threshold `q_i ∈ [0,1]` and an alias index.
/// A draw splits one uniform on `[0,n)` into an integer bin and a
/// fractional part `u`, and returns the bin when `u < q_i`, its alias
/// otherwise.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Categorical {
    // tbl[i] = (probability that bin i yields i rather than its alias, alias of i)
    tbl: Vec<(f64, usize)>,
}

impl Categorical {
    /// Builds the alias table from a sequence of non-negative weights.
    ///
    /// Construction is deterministic: the table is filled by walking
    /// ascending "small" (`q ≤ 1`) and "big" (`q > 1`) indices, with
    /// the small cursor jumping back only when a big bin is exhausted
    /// behind the small scan front.
    pub fn new(weights: &[f64]) -> Result<Categorical> {
        let n = weights.len();
        if weights.iter().any(|&w| w < 0.0 || !w.is_finite()) {
            return Err(RdError::InvalidParam(
                "categorical weights must be non-negative and finite".into(),
            ));
        }
        let sum: f64 = weights.iter().sum();
        if n > 0 && sum <= 0.0 {
            return Err(RdError::InvalidParam(
                "categorical weights must have a positive sum".into(),
            ));
        }

        // normalise so the weights sum to n
        let scale = n as f64 / sum;
        let mut tbl: Vec<(f64, usize)> = weights.iter().map(|&w| (w * scale, 0)).collect();

        let small = |q: f64| q <= 1.0;

        let mut i_small = 0;
        while i_small < n && !small(tbl[i_small].0) {
            i_small += 1;
        }
        let mut i_big = 0;
        while i_big < n && small(tbl[i_big].0) {
            i_big += 1;
        }
        let mut i_small_top = i_small;

        while i_small < n && i_big < n {
            tbl[i_small].1 = i_big;
            tbl[i_big].0 = (tbl[i_big].0 + tbl[i_small].0) - 1.0;

            // advance i_small from i_small_top unless we have just made
            // a new small behind i_small_top
            let new_small = small(tbl[i_big].0);
            if new_small && i_big < i_small_top {
                i_small = i_big;
            } else {
                i_small = i_small_top + 1;
                while i_small < n && !small(tbl[i_small].0) {
                    i_small += 1;
                }
                i_small_top = i_small;
            }

            // advance i_big if we have made a new small
            if new_small {
                while i_big < n && small(tbl[i_big].0) {
                    i_big += 1;
                }
            }
        }

        // anything left over is given probability 1
        if i_small < n {
            tbl[i_small].0 = 1.0;
            let mut i = i_small_top + 1;
            while i < n {
                tbl[i].0 = 1.0;
                i += 1;
            }
        }
        while i_big < n {
            tbl[i_big].0 = 1.0;
            i_big += 1;
        }

        Ok(Categorical { tbl })
    }

    pub fn len(&self) -> usize {
        self.tbl.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tbl.is_empty()
    }

    /// The threshold probability of bin `i`.
    pub fn threshold(&self, i: usize) -> f64 {
        self.tbl[i].0
    }

    /// The alias index of bin `i`.
    pub fn alias(&self, i: usize) -> usize {
        self.tbl[i].1
    }

    /// The marginal probability of drawing `i`.
    pub fn probability(&self, i: usize) -> f64 {
        let n = self.tbl.len() as f64;
        let mut p = self.tbl[i].0;
        for &(q, alias) in &self.tbl {
            if alias == i && q < 1.0 {
                p += 1.0 - q;
            }
        }
        p / n
    }
}

impl Distribution<usize> for Categorical {
    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> usize {
        let n = self.tbl.len();
        if n == 0 {
            return 0;
        }

        let d = rng.random::<f64>() * n as f64;
        let bin = d as usize;
        let u = d - bin as f64;

        if u < self.tbl[bin].0 {
            bin
        } else {
            self.tbl[bin].1
        }
    }
}
