use rand::Rng;
use rand_distr::Distribution;

use crate::categorical::Categorical;
use crate::error::{RdError, Result};
use crate::samplers::Sampler;

/// Tuning knobs for the conditional Poisson calibration.
#[derive(Clone, Copy, Debug)]
pub struct CpsConfig {
    /// Convergence threshold on the worst-case deviation from the
    /// target inclusion probabilities.
    pub abs_tol: f64,
    /// How fast the step scale relaxes back towards one after an
    /// accepted step.
    pub alpha_relax: f64,
    /// How hard the step scale shrinks after a rejected step.
    pub alpha_shrink: f64,
    /// Initial step scale.
    pub alpha_init: f64,
}

impl Default for CpsConfig {
    fn default() -> CpsConfig {
        CpsConfig {
            abs_tol: 4.0 * f64::EPSILON,
            alpha_relax: 0.8,
            alpha_shrink: 0.1,
            alpha_init: 1.0,
        }
    }
}

/// Computes the conditional-on-size-`n` inclusion probabilities of a
/// Poisson design with per-item parameters `rho`, by the recurrence
/// `ψ⁰ = 0; ψʲᵢ = ρᵢ/(1−ρᵢ)·(1−ψʲ⁻¹ᵢ)`, rescaled to sum `j`, for
/// `j = 1..n`.
fn conditional_psi(n: usize, rho: &[f64], psi: &mut Vec<f64>) -> Result<()> {
    psi.clear();
    psi.resize(rho.len(), 0.0);

    for j in 1..=n {
        let mut denom = 0.0;
        for (x, &r) in psi.iter_mut().zip(rho) {
            *x = r / (1.0 - r) * (1.0 - *x);
            denom += *x;
        }

        let scale = j as f64 / denom;
        for x in psi.iter_mut() {
            *x *= scale;
            if *x > 1.0 {
                return Err(RdError::SamplingFailure(
                    "conditional inclusion probability recurrence diverged".into(),
                ));
            }
        }
    }
    Ok(())
}

/// Finds Poisson parameters whose conditional-on-size design has the
/// given marginal inclusion probabilities, by a damped quasi-Newton
/// iteration on `ρ ← ρ + α(π − ψ(ρ;n))`.
///
/// The step scale `α` relaxes towards one while steps are accepted and
/// shrinks on rejection (candidate outside `(0,1)`, or the deviation
/// not decreasing); the iteration fails once `α` underflows the
/// tolerance.
fn invert_inclusion_probabilities(n: usize, pi: &[f64], cfg: &CpsConfig) -> Result<Vec<f64>> {
    let len = pi.len();
    let mut pibar = pi.to_vec();
    let mut pix = vec![0.0; len];
    let mut psi = Vec::with_capacity(len);
    let mut delta = vec![0.0; len];

    let mut alpha = cfg.alpha_init;

    conditional_psi(n, &pibar, &mut psi)?;
    let mut dmax = 0.0f64;
    for i in 0..len {
        delta[i] = pi[i] - psi[i];
        dmax = dmax.max(delta[i].abs());
    }

    while dmax > cfg.abs_tol {
        let mut admissible = true;

        for i in 0..len {
            pix[i] = pibar[i] + alpha * delta[i];
            if pix[i] <= 0.0 || pix[i] >= 1.0 {
                admissible = false;
                break;
            }
        }

        if admissible {
            conditional_psi(n, &pix, &mut psi)?;

            let mut v = 0.0f64;
            for i in 0..len {
                v = v.max((pi[i] - psi[i]).abs());
            }

            if v < dmax {
                pibar.copy_from_slice(&pix);

                dmax = 0.0;
                for i in 0..len {
                    delta[i] = pi[i] - psi[i];
                    dmax = dmax.max(delta[i].abs());
                }

                alpha = 1.0 - cfg.alpha_relax * (1.0 - alpha);
                continue;
            }
        }

        // reduce the step scale and try again
        alpha *= cfg.alpha_shrink;
        if alpha < cfg.abs_tol {
            return Err(RdError::SamplingFailure(format!(
                "inclusion probability inversion failed to converge, with deviation {dmax}"
            )));
        }
    }

    Ok(pibar)
}

/// Conditional Poisson sampler, multinomial-rejective scheme.
///
/// Construction calibrates Poisson parameters so the size-conditioned
/// design matches the target inclusion probabilities, then prepares a
/// categorical over the implied multinomial weights. A draw takes `n`
/// positions with replacement and starts over whenever a position
/// repeats; the expected number of restarts grows mildly with `n`
/// relative to the population size.
#[derive(Clone, Debug)]
pub struct CpsRejective {
    n: usize,
    cat: Categorical,
}

impl CpsRejective {
    pub fn new(n: usize, pi: &[f64]) -> Result<CpsRejective> {
        CpsRejective::with_config(n, pi, &CpsConfig::default())
    }

    pub fn with_config(n: usize, pi: &[f64], cfg: &CpsConfig) -> Result<CpsRejective> {
        if pi.iter().any(|&p| !(0.0..1.0).contains(&p)) {
            return Err(RdError::InvalidParam(
                "target inclusion probabilities must lie in [0,1)".into(),
            ));
        }

        let rho = invert_inclusion_probabilities(n, pi, cfg)?;

        // convert the Poisson parameters to multinomial weights on n
        let mut mu: Vec<f64> = rho.iter().map(|&r| r / (1.0 - r)).collect();
        let sum: f64 = mu.iter().sum();
        let scale = n as f64 / sum;
        for x in &mut mu {
            *x *= scale;
        }

        Ok(CpsRejective {
            n,
            cat: Categorical::new(&mu)?,
        })
    }
}

impl Sampler for CpsRejective {
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
                "population smaller than the sampler's parameter sequence".into(),
            ));
        }

        let mut drawn = vec![false; self.cat.len()];
        while out.len() < self.n {
            let k = self.cat.sample(rng);
            if drawn[k] {
                // a repeat rejects the whole draw
                drawn.fill(false);
                out.clear();
            } else {
                drawn[k] = true;
                out.push(k);
            }
        }
        Ok(self.n)
    }
}
