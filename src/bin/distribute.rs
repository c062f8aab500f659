//! Study harness for the integer allocation helper: distributes
//! counts across weighted bins with a selectable sampling method and
//! reports per-trial allocations or summary statistics, so the bias
//! and correlation trade-offs of the methods can be compared.

use std::process::ExitCode;

use clap::{command, Parser};
use rand::{rngs::StdRng, Rng, SeedableRng};

use rdsim::distribute::{distribute, SamplerKind};
use rdsim::stats::{RunningCov, RunningStats};

pub const CLAP_STYLING: clap::builder::styling::Styles = clap::builder::styling::Styles::styled()
    .header(clap_cargo::style::HEADER)
    .usage(clap_cargo::style::USAGE)
    .literal(clap_cargo::style::LITERAL)
    .placeholder(clap_cargo::style::PLACEHOLDER)
    .error(clap_cargo::style::ERROR)
    .valid(clap_cargo::style::VALID)
    .invalid(clap_cargo::style::INVALID);

#[derive(Debug, Parser)]
#[command(
    name = "distribute",
    about = "Distribute integer counts across weighted bins.",
    long_about = "Distributes integer counts across weighted bins by rounding
down each bin's proportional share and assigning the leftover units
with a weighted sampling method. Reports either the raw allocations per
trial or summary statistics across trials, normalised by bin weight
unless asked otherwise.",
    styles = CLAP_STYLING,
    disable_version_flag = true
)]
struct Cli {
    /// Sampling method for the residual units.
    #[arg(short, long, value_enum, default_value = "multinomial")]
    method: SamplerKind,

    /// Count to distribute, or an inclusive range N-M drawn uniformly
    /// per trial.
    #[arg(short, long, default_value = "1")]
    count: String,

    /// Number of bins.
    #[arg(short, long, default_value_t = 1)]
    bins: usize,

    /// Geometric bin weights with the given first:last ratio.
    #[arg(short, long, conflicts_with = "linear", value_name = "RATIO")]
    geometric: Option<f64>,

    /// Linear bin weights with the given first:last ratio.
    #[arg(short, long, value_name = "RATIO")]
    linear: Option<f64>,

    /// Number of trials.
    #[arg(short = 'n', long, default_value_t = 1)]
    trials: u64,

    /// RNG seed.
    #[arg(short = 'd', long, default_value_t = 0)]
    seed: u64,

    /// Report raw counts, not weight-normalised values.
    #[arg(short = 'C', long)]
    raw_counts: bool,

    /// Print summary statistics instead of per-trial rows.
    #[arg(short = 'S', long)]
    summary: bool,

    /// With -S, also compute correlation extrema between bins.
    #[arg(short = 'V', long, requires = "summary")]
    covariances: bool,
}

fn parse_count_range(s: &str) -> Option<(u64, u64)> {
    match s.split_once('-') {
        None => {
            let c = s.parse().ok()?;
            Some((c, c))
        }
        Some((lo, hi)) => {
            let lo = lo.parse().ok()?;
            let hi = hi.parse().ok()?;
            (lo <= hi).then_some((lo, hi))
        }
    }
}

/// Bin weights scaled so they total the number of bins.
fn make_weights(args: &Cli) -> Vec<f64> {
    let b = args.bins;
    if b < 2 {
        return vec![1.0; b];
    }
    if let Some(ratio) = args.geometric {
        let a = ratio.powf(1.0 / (b - 1) as f64);
        let mut weights = vec![0.0; b];
        weights[0] = b as f64 * (a - 1.0) / (a.powi(b as i32) - 1.0);
        for i in 1..b {
            weights[i] = a * weights[i - 1];
        }
        weights
    } else if let Some(ratio) = args.linear {
        let a = 2.0 / (b - 1) as f64 * (ratio - 1.0) / (ratio + 1.0);
        (0..b)
            .map(|i| 1.0 + a * (i as f64 - (b - 1) as f64 * 0.5))
            .collect()
    } else {
        vec![1.0; b]
    }
}

fn run(args: &Cli) -> rdsim::Result<()> {
    let Some((c_min, c_max)) = parse_count_range(&args.count) else {
        eprintln!("distribute: cannot parse count range {:?}", args.count);
        std::process::exit(2);
    };
    if args.bins == 0 {
        eprintln!("distribute: need at least one bin");
        std::process::exit(2);
    }

    let weights = make_weights(args);
    let rng = &mut StdRng::seed_from_u64(args.seed);

    if !args.summary {
        print!("trial");
        for bin in 0..args.bins {
            print!(",B{}", bin + 1);
        }
        println!();
    }

    let mut stats = vec![RunningStats::new(); args.bins];
    let mut cov = vec![RunningCov::new(); args.bins * (args.bins - 1) / 2];

    let normalised = |bins: &[u64], i: usize| {
        let x = bins[i] as f64;
        if args.raw_counts || weights[i] == 0.0 {
            x
        } else {
            x / weights[i]
        }
    };

    for trial in 0..args.trials {
        let count = rng.random_range(c_min..=c_max);
        let bins = distribute(count, &weights, args.method, rng)?;

        if args.summary {
            let mut cov_index = 0;
            for i in 0..args.bins {
                let x = normalised(&bins, i);
                stats[i].insert(x);
                if args.covariances {
                    for j in 0..i {
                        cov[cov_index].insert(x, normalised(&bins, j));
                        cov_index += 1;
                    }
                }
            }
        } else {
            print!("{}", trial + 1);
            for i in 0..args.bins {
                print!(",{}", normalised(&bins, i));
            }
            println!();
        }
    }

    if args.summary {
        print!("bin,mean,cv");
        if args.raw_counts {
            print!(",min,max");
        }
        if args.covariances {
            print!(",rmin,rmax");
        }
        println!();

        // correlation extrema per bin, from the pairwise covariances
        let mut cor_stats = vec![RunningStats::new(); args.bins];
        if args.covariances {
            let mut cov_index = 0;
            for i in 0..args.bins {
                for j in 0..i {
                    let mut r = cov[cov_index].covariance();
                    cov_index += 1;
                    r /= (stats[i].variance() * stats[j].variance()).sqrt();
                    cor_stats[i].insert(r);
                    cor_stats[j].insert(r);
                }
            }
        }

        for i in 0..args.bins {
            print!("{},{},{}", i + 1, stats[i].mean(), stats[i].cv());
            if args.raw_counts {
                print!(",{},{}", stats[i].min(), stats[i].max());
            }
            if args.covariances {
                print!(",{},{}", cor_stats[i].min(), cor_stats[i].max());
            }
            println!();
        }
    }

    Ok(())
}

fn main() -> ExitCode {
    let args = Cli::parse();
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("distribute: {err}");
            ExitCode::from(1)
        }
    }
}
