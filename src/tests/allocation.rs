use kdam::tqdm;
use quickcheck::{Arbitrary, Gen, QuickCheck};
use rand::{rngs::StdRng, SeedableRng};

use crate::distribute::{distribute, SamplerKind};

const ALL_KINDS: [SamplerKind; 5] = [
    SamplerKind::Multinomial,
    SamplerKind::Systematic,
    SamplerKind::AdjustedPareto,
    SamplerKind::Efraimidis,
    SamplerKind::CpsRejective,
];

/// Seven units over five flat bins with the systematic sampler: two
/// bins receive an extra unit, always non-adjacent, and the total is
/// exact.
#[test]
fn flat_weights_split_seven_over_five() {
    let weights = [1.0; 5];
    for seed in 0..200 {
        let rng = &mut StdRng::seed_from_u64(seed);
        let bins = distribute(7, &weights, SamplerKind::Systematic, rng).unwrap();

        assert_eq!(bins.iter().sum::<u64>(), 7);
        let mut sorted = bins.clone();
        sorted.sort_unstable_by(|a, b| b.cmp(a));
        assert_eq!(sorted, vec![2, 2, 1, 1, 1], "bins {bins:?}");
    }
}

/// Geometric weights: every trial totals exactly 100, and the mean
/// allocation converges to the weight shares within 1%.
#[test]
fn geometric_weights_mean_converges() {
    let weights = [1.0, 2.0, 4.0, 8.0];
    let expected = [100.0 / 15.0, 200.0 / 15.0, 400.0 / 15.0, 800.0 / 15.0];

    let trials = 10_000u64;
    let mut totals = [0u64; 4];
    for i in tqdm!(0..trials, desc = "allocation") {
        let rng = &mut StdRng::seed_from_u64(7000 + i);
        let bins = distribute(100, &weights, SamplerKind::Multinomial, rng).unwrap();
        assert_eq!(bins.iter().sum::<u64>(), 100);
        for (t, b) in totals.iter_mut().zip(&bins) {
            *t += b;
        }
    }

    for (i, (&total, &e)) in totals.iter().zip(&expected).enumerate() {
        let mean = total as f64 / trials as f64;
        assert!(
            (mean - e).abs() < e * 0.01,
            "bin {i}: mean {mean}, expected {e}"
        );
    }
}

/// Means converge for the without-replacement methods too.
#[test]
fn reservoir_methods_are_unbiased_on_flat_weights() {
    let weights = [1.0; 3];
    let expected = 7.0 / 3.0;

    for kind in [SamplerKind::AdjustedPareto, SamplerKind::Efraimidis] {
        let trials = 5_000u64;
        let mut totals = [0u64; 3];
        for i in 0..trials {
            let rng = &mut StdRng::seed_from_u64(31_000 + i);
            let bins = distribute(7, &weights, kind, rng).unwrap();
            assert_eq!(bins.iter().sum::<u64>(), 7);
            for (t, b) in totals.iter_mut().zip(&bins) {
                *t += b;
            }
        }
        for &total in &totals {
            let mean = total as f64 / trials as f64;
            assert!(
                (mean - expected).abs() < 0.05,
                "{kind:?}: mean {mean}, expected {expected}"
            );
        }
    }
}

#[derive(Clone, Debug)]
struct AllocationCase {
    count: u64,
    weights: Vec<f64>,
    seed: u64,
}

impl Arbitrary for AllocationCase {
    fn arbitrary(g: &mut Gen) -> AllocationCase {
        let n = usize::arbitrary(g) % 12 + 1;
        let weights = (0..n)
            .map(|_| (u8::arbitrary(g) as f64 + 1.0) / 16.0)
            .collect();
        AllocationCase {
            count: u64::arbitrary(g) % 500,
            weights,
            seed: u64::arbitrary(g),
        }
    }
}

/// The allocation total is exact for every method, every weight shape
/// and every count.
#[test]
fn totals_are_always_exact() {
    fn property(case: AllocationCase) -> bool {
        let rng = &mut StdRng::seed_from_u64(case.seed);
        ALL_KINDS.iter().all(|&kind| {
            let bins = distribute(case.count, &case.weights, kind, rng).unwrap();
            bins.iter().sum::<u64>() == case.count
        })
    }

    QuickCheck::new()
        .tests(200)
        .quickcheck(property as fn(AllocationCase) -> bool);
}

/// Zero-weight bins never receive units.
#[test]
fn zero_weight_bins_stay_empty() {
    // 10 over weights (2,0,1,0) leaves a deficit unit, so the
    // residual sampler really runs
    let weights = [2.0, 0.0, 1.0, 0.0];
    for kind in ALL_KINDS {
        for seed in 0..50 {
            let rng = &mut StdRng::seed_from_u64(seed);
            let bins = distribute(10, &weights, kind, rng).unwrap();
            assert_eq!(bins[1], 0, "{kind:?} filled a zero-weight bin");
            assert_eq!(bins[3], 0, "{kind:?} filled a zero-weight bin");
            assert_eq!(bins.iter().sum::<u64>(), 10);
        }
    }
}
