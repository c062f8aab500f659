use derive_new::new;
use smallvec::SmallVec;
use tinyvec::ArrayVec;

use crate::error::{RdError, Result};
use crate::model::MAX_ORDER;

/// A kinetic process descriptor: the reactant and product population
/// multisets, and the rate constant their propensity is proportional
/// to. Within-cell reactions and diffusion jumps both reduce to this.
#[derive(Clone, Debug, new)]
pub struct ProcessInfo {
    pub left: SmallVec<[usize; MAX_ORDER]>,
    pub right: SmallVec<[usize; MAX_ORDER]>,
    pub rate: f64,
}

/// One propensity-factor contribution: when the owning population
/// changes, slot `slot` of process `k` must change with it.
#[derive(Clone, Copy, Debug)]
struct SlotRef {
    k: usize,
    slot: usize,
}

/// The immutable half of the process system, shared by every instance
/// of the same model: rate constants, the population → factor-slot
/// dependency table, and the process → population-delta table.
///
/// Built in bulk from a descriptor sequence; the tables never change
/// afterwards. A different process set means a fresh set of tables.
#[derive(Debug)]
pub struct ProcessTables {
    n_pop: usize,
    rate: Vec<f64>,
    // entries for the same population and process are contiguous,
    // ordered by slot index; the factor update and rebuild walks
    // rely on this
    pop_to_slots: Vec<Vec<SlotRef>>,
    proc_deltas: Vec<SmallVec<[(usize, i64); 4]>>,
}

impl ProcessTables {
    /// Builds the dependency tables over `n_pop` populations from the
    /// given process descriptors.
    pub fn build(n_pop: usize, processes: &[ProcessInfo]) -> Result<ProcessTables> {
        let mut tables = ProcessTables {
            n_pop,
            rate: Vec::with_capacity(processes.len()),
            pop_to_slots: vec![Vec::new(); n_pop],
            proc_deltas: Vec::with_capacity(processes.len()),
        };

        for (k, info) in processes.iter().enumerate() {
            if info.left.len() > MAX_ORDER {
                return Err(RdError::InvalidParam(format!(
                    "process {k} has {} reactants, above the maximum order {MAX_ORDER}",
                    info.left.len()
                )));
            }
            if let Some(&p) = info
                .left
                .iter()
                .chain(&info.right)
                .find(|&&p| p >= n_pop)
            {
                return Err(RdError::InvalidParam(format!(
                    "process {k} references population {p} out of range"
                )));
            }

            let mut left_sorted: ArrayVec<[usize; MAX_ORDER]> = ArrayVec::new();
            for &p in &info.left {
                left_sorted.push(p);
            }
            left_sorted.sort_unstable();

            for (slot, &p) in left_sorted.iter().enumerate() {
                tables.pop_to_slots[p].push(SlotRef { k, slot });
            }

            // net population change per firing, zero entries dropped
            let mut deltas: SmallVec<[(usize, i64); 4]> = SmallVec::new();
            let add = |p: usize, d: i64, deltas: &mut SmallVec<[(usize, i64); 4]>| {
                match deltas.iter_mut().find(|(q, _)| *q == p) {
                    Some((_, total)) => *total += d,
                    None => deltas.push((p, d)),
                }
            };
            for &p in &info.left {
                add(p, -1, &mut deltas);
            }
            for &p in &info.right {
                add(p, 1, &mut deltas);
            }
            deltas.retain(|&mut (_, d)| d != 0);
            deltas.sort_unstable();

            tables.proc_deltas.push(deltas);
            tables.rate.push(info.rate);
        }

        Ok(tables)
    }

    /// Number of processes.
    pub fn len(&self) -> usize {
        self.rate.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rate.is_empty()
    }

    /// Number of populations.
    pub fn n_pop(&self) -> usize {
        self.n_pop
    }

    /// Rate constant of process `k`.
    pub fn rate(&self, k: usize) -> f64 {
        self.rate[k]
    }
}

/// The mutable half of the process system: one instance's population
/// counts and cached propensity factors.
///
/// For each process the factor slots hold, in reactant-sorted order,
/// the falling sequence `c, c−1, c−2, …` over runs of identical
/// reactants, so that `rate · Π slots` is the exact combinatorial
/// propensity; unused slots stay at one.
#[derive(Clone, Debug, PartialEq)]
pub struct ProcessState {
    counts: Vec<i64>,
    factors: Vec<[i64; MAX_ORDER]>,
}

impl ProcessState {
    /// Fresh state with all counts zero.
    pub fn new(tables: &ProcessTables) -> ProcessState {
        let mut state = ProcessState {
            counts: vec![0; tables.n_pop],
            factors: vec![[1; MAX_ORDER]; tables.len()],
        };
        state.rebuild_factors(tables);
        state
    }

    /// Zeroes every count and rebuilds the factor cache.
    /// The dependency tables are untouched.
    pub fn reset(&mut self, tables: &ProcessTables) {
        self.counts.fill(0);
        self.factors.fill([1; MAX_ORDER]);
        self.rebuild_factors(tables);
    }

    /// Recomputes every referenced factor slot from the current counts.
    ///
    /// Walking a population's contributions in table order, each new
    /// process run restarts the running value at the count and each
    /// further slot of the same run decrements it, which realises the
    /// falling factorial for repeated reactants.
    fn rebuild_factors(&mut self, tables: &ProcessTables) {
        for (p, slots) in tables.pop_to_slots.iter().enumerate() {
            let mut value = 0;
            let mut prev_k = usize::MAX;
            for entry in slots {
                if entry.k != prev_k {
                    value = self.counts[p];
                    prev_k = entry.k;
                } else {
                    value -= 1;
                }
                self.factors[entry.k][entry.slot] = value;
            }
        }
    }

    pub fn count(&self, p: usize) -> i64 {
        self.counts[p]
    }

    pub fn counts(&self) -> &[i64] {
        &self.counts
    }

    /// The propensity of process `k` under the current counts.
    pub fn propensity(&self, tables: &ProcessTables, k: usize) -> f64 {
        self.factors[k]
            .iter()
            .fold(tables.rate[k], |a, &c| a * c as f64)
    }

    /// Sets the count of population `p`, updating every dependent
    /// factor slot and reporting each touched process to `notify` as
    /// `(process, new propensity)`, exactly once per distinct process.
    pub fn set_count(
        &mut self,
        tables: &ProcessTables,
        p: usize,
        c: i64,
        mut notify: impl FnMut(usize, f64),
    ) {
        debug_assert!(c >= 0, "population count cannot be negative: {c}");
        let delta = c - self.counts[p];
        self.counts[p] = c;
        self.touch(tables, p, delta, &mut notify);
    }

    /// Fires process `k`: applies its population deltas and propagates
    /// the factor updates, reporting touched processes like
    /// [`ProcessState::set_count`].
    pub fn apply(
        &mut self,
        tables: &ProcessTables,
        k: usize,
        mut notify: impl FnMut(usize, f64),
    ) {
        for &(p, delta) in &tables.proc_deltas[k] {
            self.counts[p] += delta;
            debug_assert!(
                self.counts[p] >= 0,
                "process {k} drove population {p} negative"
            );
            self.touch(tables, p, delta, &mut notify);
        }
    }

    /// Adds `delta` to every factor slot fed by population `p`.
    /// The contiguity of same-process entries makes the once-per-process
    /// notification a run-boundary check.
    fn touch(
        &mut self,
        tables: &ProcessTables,
        p: usize,
        delta: i64,
        notify: &mut impl FnMut(usize, f64),
    ) {
        let slots = &tables.pop_to_slots[p];
        let mut iter = slots.iter().peekable();
        while let Some(entry) = iter.next() {
            self.factors[entry.k][entry.slot] += delta;
            let run_ends = iter.peek().is_none_or(|next| next.k != entry.k);
            if run_ends {
                notify(entry.k, self.propensity(tables, entry.k));
            }
        }
    }
}
