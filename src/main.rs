use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Mutex;

use anyhow::{Context, Result};
use clap::{command, ArgGroup, Parser};
use rand::{rngs::SmallRng, Rng, SeedableRng};
use rayon::prelude::*;
use rdsim::engine::Instance;
use rdsim::process::ProcessTables;
use rdsim::{read_model, Model, Simulator};

// See also `clap_cargo::style::CLAP_STYLING`
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
    name = "rdsim",
    version,
    about = "Stochastic simulation of reaction-diffusion networks.",
    long_about = "Exact stochastic simulation of reaction-diffusion networks.

Reads a model (species, reactions, and a decomposition into well-mixed
cells) from a YAML stream, expands it into kinetic processes, and
generates trajectories with the direct Gillespie method. Counts per
cell and species are emitted as CSV at every sample point.",
    styles = CLAP_STYLING,
    group(ArgGroup::new("span").required(true))
)]
struct Cli {
    /// The model file to read; stdin when absent or "-".
    model_file: Option<PathBuf>,

    /// Model name (required when the stream contains multiple models).
    #[arg(short, long)]
    model: Option<String>,

    /// Run N events.
    #[arg(short = 'n', long, group = "span", value_name = "N")]
    events: Option<u64>,

    /// Run until simulated time reaches TIME.
    #[arg(short = 't', long, group = "span", value_name = "TIME")]
    time: Option<f64>,

    /// Sample every N events (with -n) or every TIME seconds (with -t).
    #[arg(short = 'd', long, value_name = "N|TIME")]
    sample_every: Option<String>,

    /// Run N independent instances.
    #[arg(short = 'P', long, default_value_t = 1, value_name = "N")]
    instances: usize,

    /// Dump per-event state to stderr.
    #[arg(short, long)]
    verbose: bool,

    /// Batch output: buffer internally, flush at the end.
    #[arg(short = 'B', long)]
    batch: bool,

    /// The seed to use for random number generation.
    #[arg(long)]
    seed: Option<u64>,
}

/// How far to simulate and how often to sample.
#[derive(Clone, Copy, Debug)]
enum Plan {
    /// Run a number of events, sampling every `stride` of them.
    Events { n: u64, stride: u64 },
    /// Run to a simulated time, sampling on a fixed period.
    Time { t_end: f64, dt: f64 },
}

impl Plan {
    fn from_args(args: &Cli) -> Result<Plan, String> {
        if let Some(n) = args.events {
            let stride = match &args.sample_every {
                None => 1,
                Some(s) => s
                    .parse::<u64>()
                    .ok()
                    .filter(|&d| d > 0)
                    .ok_or_else(|| format!("-d with -n needs a positive event count, got {s:?}"))?,
            };
            Ok(Plan::Events { n, stride })
        } else {
            let t_end = args.time.expect("clap enforces one of -n/-t");
            let dt = match &args.sample_every {
                None => t_end,
                Some(s) => s
                    .parse::<f64>()
                    .ok()
                    .filter(|&d| d > 0.0)
                    .ok_or_else(|| format!("-d with -t needs a positive time, got {s:?}"))?,
            };
            Ok(Plan::Time { t_end, dt })
        }
    }

    /// Upper estimate of sample points per instance, for buffer sizing.
    fn expected_samples(&self) -> usize {
        match *self {
            Plan::Events { n, stride } => (n / stride + 2) as usize,
            Plan::Time { t_end, dt } => (t_end / dt).ceil() as usize + 2,
        }
    }
}

/// Where the CSV rows go: straight to stdout with a lock per row, or
/// into a pre-reserved buffer flushed (sorted by instance and time) at
/// the end of the run.
enum Sink {
    Stream(Mutex<BufWriter<io::Stdout>>),
    Batch(Mutex<Vec<(usize, f64, String)>>),
}

impl Sink {
    fn emit(&self, instance: usize, time: f64, row: String) -> Result<()> {
        match self {
            Sink::Stream(out) => {
                let mut out = out.lock().expect("output lock poisoned");
                writeln!(out, "{row}")?;
            }
            Sink::Batch(rows) => {
                let mut rows = rows.lock().expect("output lock poisoned");
                rows.push((instance, time, row));
            }
        }
        Ok(())
    }

    fn finish(self) -> Result<()> {
        match self {
            Sink::Stream(out) => {
                out.into_inner().expect("output lock poisoned").flush()?;
            }
            Sink::Batch(rows) => {
                let mut rows = rows.into_inner().expect("output lock poisoned");
                rows.sort_by(|a, b| (a.0, a.1).partial_cmp(&(b.0, b.1)).expect("finite times"));

                let stdout = io::stdout().lock();
                let mut out = BufWriter::new(stdout);
                for (_, _, row) in rows {
                    writeln!(out, "{row}")?;
                }
                out.flush()?;
            }
        }
        Ok(())
    }
}

/// Emits one CSV row per cell for the instance's current state.
fn emit_state(
    sink: &Sink,
    instance: usize,
    t: f64,
    counts: &[i64],
    n_species: usize,
    n_cells: usize,
) -> Result<()> {
    for cell in 0..n_cells {
        let mut row = format!("{instance},{t},{cell}");
        for species in 0..n_species {
            row.push(',');
            row.push_str(&counts[cell * n_species + species].to_string());
        }
        sink.emit(instance, t, row)?;
    }
    Ok(())
}

/// Drives one replicate through the whole plan.
#[allow(clippy::too_many_arguments)]
fn run_instance(
    tables: &ProcessTables,
    instance: &mut Instance,
    j: usize,
    plan: Plan,
    n_species: usize,
    n_cells: usize,
    sink: &Sink,
    verbose: bool,
    rng: &mut SmallRng,
) -> Result<()> {
    emit_state(sink, j, instance.time(), instance.counts(), n_species, n_cells)?;

    match plan {
        Plan::Events { n, stride } => {
            let mut fired = 0;
            let mut emitted_at = 0;
            while fired < n {
                let t = instance.advance(tables, rng)?;
                if !t.is_finite() {
                    // nothing left to fire
                    break;
                }
                fired += 1;

                if verbose {
                    eprintln!("instance {j} event {fired} t={t} counts={:?}", instance.counts());
                }
                if fired % stride == 0 {
                    emit_state(sink, j, t, instance.counts(), n_species, n_cells)?;
                    emitted_at = fired;
                }
            }
            if emitted_at != fired {
                emit_state(sink, j, instance.time(), instance.counts(), n_species, n_cells)?;
            }
        }
        Plan::Time { t_end, dt } => {
            let mut t = instance.time();
            while t < t_end {
                let next = (t + dt).min(t_end);
                instance.advance_until(tables, next, rng)?;
                t = next;
                if verbose {
                    eprintln!("instance {j} t={t} counts={:?}", instance.counts());
                }
                emit_state(sink, j, t, instance.counts(), n_species, n_cells)?;
            }
        }
    }
    Ok(())
}

fn header(model: &Model) -> String {
    let mut line = "instance,time,cell".to_owned();
    for species in &model.species {
        line.push(',');
        line.push_str(&species.name);
    }
    line
}

fn run(args: &Cli) -> Result<()> {
    let plan = match Plan::from_args(args) {
        Ok(plan) => plan,
        Err(message) => {
            // argument errors share clap's exit status
            eprintln!("rdsim: {message}");
            std::process::exit(2);
        }
    };

    let model = match &args.model_file {
        Some(path) if path.as_os_str() != "-" => {
            let file =
                File::open(path).with_context(|| format!("cannot open {}", path.display()))?;
            read_model(file, args.model.as_deref())?
        }
        _ => read_model(io::stdin().lock(), args.model.as_deref())?,
    };

    let mut sim = Simulator::new(&model, args.instances, 0.0)?;
    let n_species = model.n_species();
    let n_cells = model.n_cells();

    let sink = if args.batch {
        let expected = args.instances * plan.expected_samples() * n_cells;
        Sink::Batch(Mutex::new(Vec::with_capacity(expected)))
    } else {
        Sink::Stream(Mutex::new(BufWriter::new(io::stdout())))
    };
    sink.emit(0, f64::NEG_INFINITY, header(&model))?;

    let base_seed = args.seed.unwrap_or_else(|| rand::rng().random());
    let (tables, instances) = sim.parts_mut();

    if args.instances > 1 {
        instances
            .par_iter_mut()
            .enumerate()
            .try_for_each(|(j, instance)| {
                let rng = &mut SmallRng::seed_from_u64(base_seed.wrapping_add(j as u64));
                run_instance(
                    tables, instance, j, plan, n_species, n_cells, &sink, args.verbose, rng,
                )
            })?;
    } else {
        for (j, instance) in instances.iter_mut().enumerate() {
            let rng = &mut SmallRng::seed_from_u64(base_seed.wrapping_add(j as u64));
            run_instance(
                tables, instance, j, plan, n_species, n_cells, &sink, args.verbose, rng,
            )?;
        }
    }

    sink.finish()
}

fn main() -> ExitCode {
    let args = Cli::parse();
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("rdsim: {err:#}");
            ExitCode::from(1)
        }
    }
}
