use num_traits::Zero;
use rand::Rng;

use crate::error::{RdError, Result};
use crate::samplers::{
    AdjustedPareto, CpsConfig, CpsRejective, EfraimidisSpirakis, MultinomialDraw,
    OrderedSystematic, Sampler,
};

/// The weighted sampling methods the allocation helper can distribute
/// its residual units with. They share the allocation's first-order
/// behaviour and trade bias, inter-bin correlation, and cost.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum SamplerKind {
    /// Multinomial with-replacement sampling.
    #[default]
    Multinomial,
    /// Ordered systematic sampling without replacement.
    Systematic,
    /// Adjusted Pareto reservoir sampling without replacement.
    AdjustedPareto,
    /// Efraimidis–Spirakis reservoir sampling without replacement.
    Efraimidis,
    /// Conditional Poisson sampling, multinomial-rejective scheme.
    CpsRejective,
}

/// Allocates the integer total `c` across bins proportionally to
/// `weights`, so that `Σ bins = c` exactly and `E[bins[i]] = c·wᵢ/Σw`.
///
/// Each bin first receives the rounded-down share `⌊c·wᵢ/Σw⌋`; the
/// leftover units are then distributed by drawing bins with the chosen
/// sampler, weighted by the fractional parts.
pub fn distribute<R: Rng + ?Sized>(
    c: u64,
    weights: &[f64],
    method: SamplerKind,
    rng: &mut R,
) -> Result<Vec<u64>> {
    if weights.iter().any(|&w| w < 0.0 || !w.is_finite()) {
        return Err(RdError::InvalidParam(
            "bin weights must be non-negative and finite".into(),
        ));
    }
    let total: f64 = weights.iter().sum();
    if total <= 0.0 {
        return Err(RdError::InvalidParam(
            "bin weights must have a positive sum".into(),
        ));
    }

    let n = weights.len();
    let mut bins = vec![0u64; n];
    let mut residuals = vec![0.0; n];

    let oo_total = 1.0 / total;
    let mut assigned = 0;
    for i in 0..n {
        let q = weights[i] * oo_total * c as f64;
        let a = q.floor();
        bins[i] = a as u64;
        residuals[i] = q - a;
        assigned += a as u64;
    }

    let deficit = c - assigned;
    if deficit.is_zero() {
        return Ok(bins);
    }
    let deficit = deficit as usize;

    let mut drawn = Vec::with_capacity(deficit);
    match method {
        SamplerKind::Multinomial => {
            MultinomialDraw::new(deficit, &residuals)?.sample(n, &mut drawn, rng)?;
        }
        SamplerKind::Systematic => {
            // pin the probability total to the deficit, so rounding in
            // the prefix sums cannot lose the last unit
            OrderedSystematic::with_total(&residuals, deficit as f64)?
                .sample(n, &mut drawn, rng)?;
        }
        SamplerKind::AdjustedPareto => {
            AdjustedPareto::new(deficit, &residuals)?.sample(n, &mut drawn, rng)?;
        }
        SamplerKind::Efraimidis => {
            EfraimidisSpirakis::new(deficit, &residuals)?.sample(n, &mut drawn, rng)?;
        }
        SamplerKind::CpsRejective => {
            // the residuals are rounding leftovers, so the recurrence's
            // own noise can sit at the machine-tight default tolerance;
            // calibrate a few digits short of it
            let cfg = CpsConfig {
                abs_tol: 1e-12,
                ..CpsConfig::default()
            };
            CpsRejective::with_config(deficit, &residuals, &cfg)?.sample(n, &mut drawn, rng)?;
        }
    }

    for i in drawn {
        bins[i] += 1;
    }
    Ok(bins)
}
