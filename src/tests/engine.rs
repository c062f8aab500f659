use std::fs;
use std::path::Path;

use kdam::tqdm;
use rand::{rngs::StdRng, SeedableRng};
use rustc_hash::FxHashMap;

use crate::loader::load_model;
use crate::model::Model;
use crate::tests::chisq::{fits_distribution, same_categorical_dist};
use crate::Simulator;

/// The system `A -> Ø` starting from 100 molecules.
const DECAY_PATH: &str = "data/test_models/decay.yml";
/// The system `A + A -> Ø` starting from 4 molecules.
const DIMER_PATH: &str = "data/test_models/dimer.yml";
/// Two unit cells coupled by diffusion, no reactions.
const DIFFUSION_PATH: &str = "data/test_models/diffusion.yml";
/// The reversible isomerisation `A <-> B` with 10 molecules.
const EQUILIBRIUM_PATH: &str = "data/test_models/equilibrium.yml";

fn model_from(path: &str) -> Model {
    let input = fs::read_to_string(Path::new(path))
        .unwrap_or_else(|err| panic!("cannot read {path}: {err}"));
    load_model(&input, None).unwrap_or_else(|err| panic!("cannot load {path}: {err}"))
}

/// Streams holding several models need an explicit selection, and the
/// selected model simulates like any other.
#[test]
fn multi_model_stream_selects_by_name() {
    let input = fs::read_to_string("data/test_models/multi.yml").unwrap();
    assert!(load_model(&input, None).is_err());

    let model = load_model(&input, Some("birth")).unwrap();
    assert_eq!(model.name, "birth");
    assert!(model.reactions[0].left.is_empty());

    // the zeroth-order process fires at the bare rate constant
    let mut sim = Simulator::new(&model, 1, 0.0).unwrap();
    assert_eq!(sim.instance(0).total_propensity(), 5.0);
    let rng = &mut StdRng::seed_from_u64(2);
    sim.advance(0, rng).unwrap();
    assert_eq!(sim.count(0, 0, 0), 1);
}

/// Exponential decay: after t=5 the mean survivor count over many
/// seeded trials must sit near 100·e⁻⁵ ≈ 0.674.
#[test]
fn decay_mean_matches_analytic_value() {
    let model = model_from(DECAY_PATH);
    let mut sim = Simulator::new(&model, 1, 0.0).unwrap();

    let trials = 10_000;
    let mut total = 0i64;
    for i in tqdm!(0..trials, desc = "decay") {
        let rng = &mut StdRng::seed_from_u64(42 + i);
        sim.reset(0);
        sim.advance_until(0, 5.0, rng).unwrap();
        let survivors = sim.count(0, 0, 0);
        assert!(survivors >= 0);
        total += survivors;
    }

    let mean = total as f64 / trials as f64;
    assert!(
        (0.47..=0.89).contains(&mean),
        "decay mean {mean} outside [0.47, 0.89]"
    );
}

/// Dimerisation from 4 molecules: the first event always removes two,
/// and its waiting time is Exp(rate·4·3) with mean 1/12.
#[test]
fn dimer_first_event() {
    let model = model_from(DIMER_PATH);
    let mut sim = Simulator::new(&model, 1, 0.0).unwrap();

    let trials = 10_000;
    let mut dt_sum = 0.0;
    for i in 0..trials {
        let rng = &mut StdRng::seed_from_u64(i);
        sim.reset(0);
        assert_eq!(sim.count(0, 0, 0), 4);

        let t = sim.advance(0, rng).unwrap();
        assert_eq!(sim.count(0, 0, 0), 2);
        dt_sum += t;
    }

    let mean = dt_sum / trials as f64;
    let expected = 1.0 / 12.0;
    assert!(
        (mean - expected).abs() < expected * 0.1,
        "mean waiting time {mean}, expected {expected}"
    );
}

/// Two coupled cells starting at (10, 0): at long times the counts
/// equilibrate to 5 each, and molecules are conserved throughout.
#[test]
fn two_cell_diffusion_equilibrates() {
    let model = model_from(DIFFUSION_PATH);
    let mut sim = Simulator::new(&model, 1, 0.0).unwrap();

    let trials = 2_000;
    let mut left_total = 0i64;
    for i in tqdm!(0..trials, desc = "diffusion") {
        let rng = &mut StdRng::seed_from_u64(1000 + i);
        sim.reset(0);
        sim.set_count(0, 0, 0, 10);
        sim.set_count(0, 0, 1, 0);

        sim.advance_until(0, 50.0, rng).unwrap();
        let left = sim.count(0, 0, 0);
        let right = sim.count(0, 0, 1);
        assert_eq!(left + right, 10, "molecules not conserved");
        left_total += left;
    }

    let mean = left_total as f64 / trials as f64;
    assert!((mean - 5.0).abs() < 0.3, "mean left count {mean}");
}

/// Overwriting a count with its current value must not change any
/// observable state.
#[test]
fn set_count_to_current_value_is_identity() {
    let model = model_from(DIMER_PATH);
    let mut sim = Simulator::new(&model, 1, 0.0).unwrap();

    let total_before = sim.instance(0).total_propensity();
    let props_before: Vec<f64> = (0..sim.n_processes())
        .map(|k| sim.instance(0).propensity(sim.tables(), k))
        .collect();

    sim.set_count(0, 0, 0, sim.count(0, 0, 0));

    assert_eq!(sim.instance(0).total_propensity(), total_before);
    for (k, &p) in props_before.iter().enumerate() {
        assert_eq!(sim.instance(0).propensity(sim.tables(), k), p);
    }
}

/// Two engines built from the same model produce identical event
/// sequences under identical RNG streams.
#[test]
fn identical_seeds_give_identical_trajectories() {
    let model = model_from(EQUILIBRIUM_PATH);
    let mut sim_a = Simulator::new(&model, 1, 0.0).unwrap();
    let mut sim_b = Simulator::new(&model, 1, 0.0).unwrap();

    let rng_a = &mut StdRng::seed_from_u64(7);
    let rng_b = &mut StdRng::seed_from_u64(7);

    for _ in 0..500 {
        let ta = sim_a.advance(0, rng_a).unwrap();
        let tb = sim_b.advance(0, rng_b).unwrap();
        assert_eq!(ta, tb);
        assert_eq!(sim_a.instance(0).counts(), sim_b.instance(0).counts());
    }
}

/// The selector's running total must track the exact propensity sum
/// through a long run of incremental updates.
#[test]
fn total_propensity_stays_consistent() {
    let model = model_from(EQUILIBRIUM_PATH);
    let mut sim = Simulator::new(&model, 1, 0.0).unwrap();
    let rng = &mut StdRng::seed_from_u64(3);

    for _ in 0..2_000 {
        sim.advance(0, rng).unwrap();
        let exact: f64 = (0..sim.n_processes())
            .map(|k| sim.instance(0).propensity(sim.tables(), k))
            .sum();
        let tracked = sim.instance(0).total_propensity();
        assert!(
            (tracked - exact).abs() <= 1e-9 * exact.max(1.0),
            "tracked {tracked}, exact {exact}"
        );
    }
}

/// Replicate instances evolve independently of one another.
#[test]
fn instances_are_independent() {
    let model = model_from(DECAY_PATH);
    let mut sim = Simulator::new(&model, 2, 0.0).unwrap();
    let rng = &mut StdRng::seed_from_u64(11);

    sim.advance_until(0, 1.0, rng).unwrap();
    // instance 1 was never advanced
    assert_eq!(sim.count(1, 0, 0), 100);
    assert_eq!(sim.time(1), 0.0);
    assert!(sim.count(0, 0, 0) < 100);
}

/// A bounded advance must resume the pending waiting time rather than
/// redraw it: splitting a run at an arbitrary boundary produces the
/// same trajectory as running it in one go.
#[test]
fn bounded_advance_caches_the_pending_event() {
    let model = model_from(DECAY_PATH);

    let mut one_go = Simulator::new(&model, 1, 0.0).unwrap();
    let rng = &mut StdRng::seed_from_u64(23);
    one_go.advance_until(0, 2.0, rng).unwrap();
    let expected = one_go.count(0, 0, 0);

    let mut split = Simulator::new(&model, 1, 0.0).unwrap();
    let rng = &mut StdRng::seed_from_u64(23);
    let mut t: f64 = 0.0;
    while t < 2.0 {
        t = split.advance_until(0, (t + 0.03).min(2.0), rng).unwrap();
    }
    assert_eq!(split.count(0, 0, 0), expected);
}

/// Sampling boundaries must not perturb the trajectory law: the
/// final-state distribution is the same whether an interval is
/// simulated in one go or in many small pieces (two-sample χ²).
#[test]
fn split_advance_preserves_the_distribution() {
    let model = model_from(EQUILIBRIUM_PATH);
    let mut sim = Simulator::new(&model, 1, 0.0).unwrap();

    let trials = 1u64 << 14;
    let mut whole: FxHashMap<i64, u64> = FxHashMap::default();
    for i in tqdm!(0..trials, desc = "whole") {
        let rng = &mut StdRng::seed_from_u64(i);
        sim.reset(0);
        sim.advance_until(0, 1.0, rng).unwrap();
        *whole.entry(sim.count(0, 0, 0)).or_default() += 1;
    }

    let mut split: FxHashMap<i64, u64> = FxHashMap::default();
    for i in tqdm!(0..trials, desc = "split") {
        let rng = &mut StdRng::seed_from_u64(trials + i);
        sim.reset(0);
        for step in 1..=8 {
            sim.advance_until(0, step as f64 / 8.0, rng).unwrap();
        }
        *split.entry(sim.count(0, 0, 0)).or_default() += 1;
    }

    assert!(
        same_categorical_dist(&whole, &split),
        "whole {whole:?} vs split {split:?}"
    );
}

/// Long-run state of the symmetric reversible reaction follows the
/// binomial equilibrium distribution (χ² goodness of fit).
#[test]
fn equilibrium_distribution_is_binomial() {
    let model = model_from(EQUILIBRIUM_PATH);
    let mut sim = Simulator::new(&model, 1, 0.0).unwrap();
    let rng = &mut StdRng::seed_from_u64(4242);

    // relaxation time is 1/(k₁+k₂) = 0.5; sampling every 2.0 time
    // units leaves negligible correlation between samples
    let mut observed = [0u64; 11];
    let mut t = 20.0;
    for _ in tqdm!(0..20_000, desc = "equilibrium") {
        sim.advance_until(0, t, rng).unwrap();
        observed[sim.count(0, 0, 0) as usize] += 1;
        t += 2.0;
    }

    // Binomial(10, 1/2)
    let mut probs = [0.0; 11];
    let mut binom = 1.0f64;
    for (i, p) in probs.iter_mut().enumerate() {
        *p = binom / 1024.0;
        binom = binom * (10 - i) as f64 / (i + 1) as f64;
    }

    assert!(
        fits_distribution(&observed, &probs),
        "equilibrium distribution does not fit Binomial(10, 1/2): {observed:?}"
    );
}

/// An exhausted instance (zero total propensity) parks at the horizon
/// instead of failing.
#[test]
fn exhausted_instance_reaches_the_horizon() {
    let model = model_from(DIMER_PATH);
    let mut sim = Simulator::new(&model, 1, 0.0).unwrap();
    let rng = &mut StdRng::seed_from_u64(1);

    // 4 molecules allow exactly two annihilation events
    let t = sim.advance_until(0, 1e6, rng).unwrap();
    assert_eq!(t, 1e6);
    assert_eq!(sim.count(0, 0, 0), 0);
    assert_eq!(sim.instance(0).total_propensity(), 0.0);
}
