use dary_heap::OctonaryHeap;
use rand::Rng;
use rand_distr::{Distribution, Exp1};

use crate::error::{RdError, Result};
use crate::samplers::Sampler;

/// A ranking key ordered by `f64::total_cmp`, so reservoir heaps can
/// hold infinite sentinels without falling over.
#[derive(Clone, Copy, Debug, PartialEq)]
struct OrderKey(f64);

impl Eq for OrderKey {}

impl PartialOrd for OrderKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OrderKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.total_cmp(&other.0)
    }
}

/// Order reservoir sampling: keeps the `n` population positions with
/// the smallest ranking keys, using a bounded max-heap keyed on the
/// largest key currently retained.
///
/// `next_key` is called once per population position, in order.
/// Returns the number of reservoir slots filled (short only when the
/// population itself is smaller than `n`).
fn order_reservoir_sample(
    n: usize,
    population: usize,
    out: &mut Vec<usize>,
    mut next_key: impl FnMut() -> f64,
) -> usize {
    out.clear();
    if n == 0 {
        return 0;
    }

    // (key, reservoir slot) pairs; the heap top carries the largest key
    let mut heap: OctonaryHeap<(OrderKey, usize)> = OctonaryHeap::with_capacity(n);

    let mut i = 0;
    while i < n && i < population {
        heap.push((OrderKey(next_key()), i));
        out.push(i);
        i += 1;
    }
    if out.len() < n {
        return out.len();
    }

    for idx in n..population {
        let key = OrderKey(next_key());
        if key < heap.peek().map(|&(top, _)| top).unwrap_or(OrderKey(f64::INFINITY)) {
            let (_, slot) = heap.pop().expect("reservoir heap is non-empty");
            out[slot] = idx;
            heap.push((key, slot));
        }
    }

    n
}

/// Adjusted Pareto sampler: `n` positions without replacement via an
/// order method with ranking keys `U/(1−U) · (1−p_i)/p_i · a_i`, where
/// the `p_i` are the target inclusion probabilities (summing to `n`)
/// and `a_i = exp(p_i(1−p_i)(p_i−½)/d²)` with `d = Σ p_i(1−p_i)`.
///
/// The realised inclusion probabilities approach `p_i` asymptotically
/// as `d` grows (Lundqvist 2007, doi:10.1007/s10440-007-9134-x).
#[derive(Clone, Debug)]
pub struct AdjustedPareto {
    n: usize,
    qcoef: Vec<f64>,
}

impl AdjustedPareto {
    pub fn new(n: usize, pi: &[f64]) -> Result<AdjustedPareto> {
        if pi.iter().any(|&p| !(0.0..=1.0).contains(&p)) {
            return Err(RdError::InvalidParam(
                "inclusion probabilities must lie in [0,1]".into(),
            ));
        }

        let d: f64 = pi.iter().map(|&p| p * (1.0 - p)).sum();
        let ood2 = if d > 0.0 { 1.0 / (d * d) } else { 0.0 };

        let qcoef = pi
            .iter()
            .map(|&p| {
                let loga = p * (1.0 - p) * (p - 0.5) * ood2;
                // approximates exp(loga), as loga is small
                let a = 1.0 + loga + 0.5 * loga * loga;
                (1.0 - p) / p * a
            })
            .collect();

        Ok(AdjustedPareto { n, qcoef })
    }
}

impl Sampler for AdjustedPareto {
    fn min_size(&self) -> usize {
        self.n
    }

    fn max_size(&self) -> usize {
        self.n
    }

    fn population_size(&self) -> usize {
        self.n
    }

    fn sample<R: Rng + ?Sized>(
        &self,
        population: usize,
        out: &mut Vec<usize>,
        rng: &mut R,
    ) -> Result<usize> {
        let mut i = 0;
        let written = order_reservoir_sample(self.n, population, out, || {
            if i >= self.qcoef.len() {
                return f64::MAX;
            }
            let r = self.qcoef[i];
            i += 1;
            let u = rng.random::<f64>();
            u * r / (1.0 - u)
        });
        Ok(written)
    }
}

/// Efraimidis–Spirakis sampler: `n` positions without replacement with
/// ranking keys `E_i/λ_i`, `E_i` standard exponential
/// (doi:10.1016/j.ipl.2005.11.003).
///
/// The `λ_i` are per-round drawing weights, not inclusion
/// probabilities; for weights close to `n/N` the two approximately
/// coincide.
#[derive(Clone, Debug)]
pub struct EfraimidisSpirakis {
    n: usize,
    oolambda: Vec<f64>,
}

impl EfraimidisSpirakis {
    pub fn new(n: usize, lambda: &[f64]) -> Result<EfraimidisSpirakis> {
        if lambda.iter().any(|&l| l < 0.0 || !l.is_finite()) {
            return Err(RdError::InvalidParam(
                "sampling weights must be non-negative and finite".into(),
            ));
        }
        // a zero weight maps to an infinite key: present, never drawn
        Ok(EfraimidisSpirakis {
            n,
            oolambda: lambda.iter().map(|&l| 1.0 / l).collect(),
        })
    }
}

impl Sampler for EfraimidisSpirakis {
    fn min_size(&self) -> usize {
        self.n
    }

    fn max_size(&self) -> usize {
        self.n
    }

    fn population_size(&self) -> usize {
        self.n
    }

    fn sample<R: Rng + ?Sized>(
        &self,
        population: usize,
        out: &mut Vec<usize>,
        rng: &mut R,
    ) -> Result<usize> {
        let mut i = 0;
        let written = order_reservoir_sample(self.n, population, out, || {
            if i >= self.oolambda.len() {
                return f64::MAX;
            }
            let q = self.oolambda[i];
            i += 1;
            let e: f64 = Exp1.sample(rng);
            e * q
        });
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn reservoir_keeps_smallest_keys() {
        let keys = [0.9, 0.1, 0.5, 0.3, 0.7, 0.05];
        let mut i = 0;
        let mut out = Vec::new();
        let written = order_reservoir_sample(3, keys.len(), &mut out, || {
            let k = keys[i];
            i += 1;
            k
        });
        assert_eq!(written, 3);
        let mut sorted = out.clone();
        sorted.sort();
        assert_eq!(sorted, vec![1, 3, 5]);
    }

    #[test]
    fn reservoir_short_population() {
        let mut out = Vec::new();
        let written = order_reservoir_sample(5, 2, &mut out, || 0.5);
        assert_eq!(written, 2);
        assert_eq!(out, vec![0, 1]);
    }

    #[test]
    fn samples_are_distinct() {
        let pi = [0.5; 8]; // sums to 4
        let sampler = AdjustedPareto::new(4, &pi).unwrap();
        let rng = &mut StdRng::seed_from_u64(3);

        let mut out = Vec::new();
        for _ in 0..200 {
            assert_eq!(sampler.sample(8, &mut out, rng).unwrap(), 4);
            let mut sorted = out.clone();
            sorted.sort();
            sorted.dedup();
            assert_eq!(sorted.len(), 4, "reservoir produced a duplicate");
        }
    }

    #[test]
    fn degenerate_probabilities_are_deterministic() {
        // p=1 positions must always be taken, p=0 never
        let pi = [1.0, 0.0, 1.0, 0.0];
        let sampler = AdjustedPareto::new(2, &pi).unwrap();
        let rng = &mut StdRng::seed_from_u64(9);

        let mut out = Vec::new();
        for _ in 0..50 {
            sampler.sample(4, &mut out, rng).unwrap();
            let mut sorted = out.clone();
            sorted.sort();
            assert_eq!(sorted, vec![0, 2]);
        }
    }

    #[test]
    fn efraimidis_rejects_negative_weights() {
        assert!(EfraimidisSpirakis::new(2, &[1.0, -2.0]).is_err());
        assert!(EfraimidisSpirakis::new(2, &[1.0, 0.0]).is_ok());
    }

    #[test]
    fn efraimidis_never_draws_zero_weights() {
        let sampler = EfraimidisSpirakis::new(2, &[1.0, 0.0, 1.0, 0.0, 1.0]).unwrap();
        let rng = &mut StdRng::seed_from_u64(21);
        let mut out = Vec::new();
        for _ in 0..100 {
            sampler.sample(5, &mut out, rng).unwrap();
            assert!(out.iter().all(|&i| i % 2 == 0), "drew a zero-weight item");
        }
    }
}
