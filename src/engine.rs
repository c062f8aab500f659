use std::sync::Arc;

use rand::Rng;
use smallvec::smallvec;

use crate::error::Result;
use crate::model::Model;
use crate::process::{ProcessInfo, ProcessState, ProcessTables};
use crate::selector::{Event, Selector};

/// The per-replicate mutable half of a simulation: population counts
/// and factor caches, the event selector, the simulation clock, and
/// the cached next event.
///
/// The cached event is the subtlety: a bounded advance may draw an
/// event that fires past its horizon, and that event must be kept (not
/// redrawn) so later advances resume from the correct waiting time.
/// `stale` marks the cache invalid, either because the event fired or
/// because a mutation changed the propensities under it.
#[derive(Debug)]
pub struct Instance {
    t: f64,
    state: ProcessState,
    selector: Selector,
    next: Event,
    stale: bool,
}

impl Instance {
    fn new(tables: &ProcessTables, t0: f64) -> Instance {
        Instance {
            t: t0,
            state: ProcessState::new(tables),
            selector: Selector::new(tables.len()),
            next: Event { k: 0, dt: f64::INFINITY },
            stale: true,
        }
    }

    /// Current simulation time.
    pub fn time(&self) -> f64 {
        self.t
    }

    /// Count of population `p`.
    pub fn count(&self, p: usize) -> i64 {
        self.state.count(p)
    }

    /// All population counts, in population-index order.
    pub fn counts(&self) -> &[i64] {
        self.state.counts()
    }

    /// Propensity of process `k` under the current counts.
    pub fn propensity(&self, tables: &ProcessTables, k: usize) -> f64 {
        self.state.propensity(tables, k)
    }

    /// Total propensity as tracked by the selector.
    pub fn total_propensity(&self) -> f64 {
        self.selector.total()
    }

    /// Overwrites the count of population `p`, refreshing the affected
    /// propensities and invalidating any cached event.
    pub fn set_count(&mut self, tables: &ProcessTables, p: usize, count: i64) {
        let selector = &mut self.selector;
        self.state
            .set_count(tables, p, count, |k, a| selector.update(k, a));
        self.stale = true;
    }

    /// Ensures a valid cached event, drawing one if necessary.
    /// With no propensity left, the cached event is infinitely distant.
    ///
    /// A ladder fall-off in the selector schedules a rebuild of its
    /// total, so the draw is retried against the freshly summed value;
    /// that also catches totals that had merely drifted off zero.
    fn poll<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Result<()> {
        if !self.stale {
            return Ok(());
        }

        let mut last_err = None;
        for _ in 0..3 {
            if self.selector.total() <= 0.0 {
                self.next = Event { k: 0, dt: f64::INFINITY };
                self.stale = false;
                return Ok(());
            }
            match self.selector.next(rng) {
                Ok(event) => {
                    self.next = event;
                    self.stale = false;
                    return Ok(());
                }
                Err(err) => last_err = Some(err),
            }
        }
        Err(last_err.expect("retry loop ran at least once"))
    }

    fn fire(&mut self, tables: &ProcessTables, k: usize) {
        let selector = &mut self.selector;
        self.state.apply(tables, k, |k2, a| selector.update(k2, a));
    }

    /// Executes exactly one event and returns the new time.
    /// On an exhausted instance the clock jumps to infinity.
    pub fn advance<R: Rng + ?Sized>(
        &mut self,
        tables: &ProcessTables,
        rng: &mut R,
    ) -> Result<f64> {
        self.poll(rng)?;
        if self.next.dt.is_infinite() {
            self.t = f64::INFINITY;
            return Ok(self.t);
        }

        let Event { k, dt } = self.next;
        self.fire(tables, k);
        self.t += dt;
        self.stale = true;
        Ok(self.t)
    }

    /// Executes events while the next firing time is within `t_end`,
    /// then parks the clock at `t_end`, carrying the unused part of the
    /// last waiting time forward in the event cache.
    pub fn advance_until<R: Rng + ?Sized>(
        &mut self,
        tables: &ProcessTables,
        t_end: f64,
        rng: &mut R,
    ) -> Result<f64> {
        if t_end <= self.t {
            return Ok(self.t);
        }

        loop {
            self.poll(rng)?;
            if self.t + self.next.dt > t_end {
                break;
            }

            let Event { k, dt } = self.next;
            self.fire(tables, k);
            self.t += dt;
            self.stale = true;
        }

        self.next.dt -= t_end - self.t;
        self.t = t_end;
        Ok(self.t)
    }
}

/// The simulator facade: expands a [`Model`] into kinetic processes,
/// owns the shared dependency tables and the per-replicate instances,
/// and exposes the advance operations.
///
/// The tables are reference-counted and read-only, so a parallel
/// driver can hand each worker thread a distinct `&mut Instance`
/// alongside the shared `&ProcessTables` without any locking.
#[derive(Debug)]
pub struct Simulator {
    tables: Arc<ProcessTables>,
    initial_counts: Vec<i64>,
    n_species: usize,
    n_cells: usize,
    t0: f64,
    instances: Vec<Instance>,
}

impl Simulator {
    /// Builds the engine for `n_instances` replicates of `model`, all
    /// starting at time `t0` with counts rounded from the species
    /// concentrations.
    pub fn new(model: &Model, n_instances: usize, t0: f64) -> Result<Simulator> {
        model.validate()?;

        let n_species = model.n_species();
        let n_cells = model.n_cells();
        let n_pop = n_species * n_cells;
        let pop = |species: usize, cell: usize| cell * n_species + species;

        let mut processes = Vec::new();

        // cell-local reactions, density rates converted by V^(1-order)
        for (cell_id, cell) in model.cells.iter().enumerate() {
            for reaction in &model.reactions {
                let order = reaction.left.len() as i32;
                processes.push(ProcessInfo::new(
                    reaction.left.iter().map(|&s| pop(s, cell_id)).collect(),
                    reaction.right.iter().map(|&s| pop(s, cell_id)).collect(),
                    reaction.rate * cell.volume.powi(1 - order),
                ));
            }
        }

        // directed diffusion jumps, one per face, species and direction
        for (cell_id, cell) in model.cells.iter().enumerate() {
            for neighbour in &cell.neighbours {
                if neighbour.coef == 0.0 {
                    continue;
                }
                for (s, species) in model.species.iter().enumerate() {
                    processes.push(ProcessInfo::new(
                        smallvec![pop(s, cell_id)],
                        smallvec![pop(s, neighbour.cell)],
                        neighbour.coef * species.diffusivity,
                    ));
                }
            }
        }

        let tables = Arc::new(ProcessTables::build(n_pop, &processes)?);

        let mut initial_counts = vec![0i64; n_pop];
        for (s, species) in model.species.iter().enumerate() {
            for (cell_id, cell) in model.cells.iter().enumerate() {
                initial_counts[pop(s, cell_id)] =
                    (species.concentration * cell.volume).round() as i64;
            }
        }

        let mut instances = Vec::with_capacity(n_instances);
        for _ in 0..n_instances {
            let mut instance = Instance::new(&tables, t0);
            Self::prime(&tables, &initial_counts, &mut instance);
            instances.push(instance);
        }

        Ok(Simulator {
            tables,
            initial_counts,
            n_species,
            n_cells,
            t0,
            instances,
        })
    }

    /// Loads the initial counts and refreshes the selector.
    fn prime(tables: &ProcessTables, initial_counts: &[i64], instance: &mut Instance) {
        for (p, &c) in initial_counts.iter().enumerate() {
            instance.state.set_count(tables, p, c, |_, _| {});
        }
        for k in 0..tables.len() {
            instance
                .selector
                .update(k, instance.state.propensity(tables, k));
        }
        instance.stale = true;
    }

    pub fn n_instances(&self) -> usize {
        self.instances.len()
    }

    pub fn n_species(&self) -> usize {
        self.n_species
    }

    pub fn n_cells(&self) -> usize {
        self.n_cells
    }

    /// Number of kinetic processes the model expanded into.
    pub fn n_processes(&self) -> usize {
        self.tables.len()
    }

    pub fn tables(&self) -> &ProcessTables {
        &self.tables
    }

    /// The population index of `(species, cell)`.
    pub fn population(&self, species: usize, cell: usize) -> usize {
        cell * self.n_species + species
    }

    /// The `(species, cell)` pair of a population index.
    pub fn population_parts(&self, p: usize) -> (usize, usize) {
        (p % self.n_species, p / self.n_species)
    }

    pub fn time(&self, instance: usize) -> f64 {
        self.instances[instance].time()
    }

    pub fn count(&self, instance: usize, species: usize, cell: usize) -> i64 {
        self.instances[instance].count(self.population(species, cell))
    }

    pub fn set_count(&mut self, instance: usize, species: usize, cell: usize, count: i64) {
        let p = self.population(species, cell);
        self.instances[instance].set_count(&self.tables, p, count);
    }

    /// Executes exactly one event on the given instance.
    pub fn advance<R: Rng + ?Sized>(&mut self, instance: usize, rng: &mut R) -> Result<f64> {
        self.instances[instance].advance(&self.tables, rng)
    }

    /// Advances the given instance to `t_end`.
    pub fn advance_until<R: Rng + ?Sized>(
        &mut self,
        instance: usize,
        t_end: f64,
        rng: &mut R,
    ) -> Result<f64> {
        self.instances[instance].advance_until(&self.tables, t_end, rng)
    }

    /// Returns an instance to its initial state.
    pub fn reset(&mut self, instance: usize) {
        let inst = &mut self.instances[instance];
        inst.state.reset(&self.tables);
        inst.selector.reset(self.tables.len());
        inst.t = self.t0;
        Self::prime(&self.tables, &self.initial_counts, inst);
    }

    pub fn instance(&self, instance: usize) -> &Instance {
        &self.instances[instance]
    }

    /// Splits the engine into the shared tables and the mutable
    /// instances, for drivers that iterate replicates across threads.
    pub fn parts_mut(&mut self) -> (&ProcessTables, &mut [Instance]) {
        (self.tables.as_ref(), &mut self.instances)
    }
}
