use std::fmt::{self, Display};

use derive_new::new;
use itertools::Itertools;
use rustc_hash::FxHashMap;

use crate::error::{RdError, Result};

/// The largest reaction order the engine supports.
pub const MAX_ORDER: usize = 3;

/// A chemical species, with its diffusivity and its initial
/// concentration (applied uniformly over all cells).
#[derive(Clone, Debug)]
pub struct Species {
    pub name: String,
    pub diffusivity: f64,
    pub concentration: f64,
}

/// A reaction between species, identified by index into the model's
/// species collection. `left` and `right` are multisets: a species
/// appearing twice reacts at second order in that species.
#[derive(Clone, Debug)]
pub struct Reaction {
    pub name: String,
    pub left: Vec<usize>,
    pub right: Vec<usize>,
    pub rate: f64,
}

/// A diffusive coupling from one cell to a neighbouring cell.
/// The coefficient is purely geometric; it is multiplied by the
/// species diffusivity to obtain a jump rate.
#[derive(Clone, Copy, Debug, new)]
pub struct Neighbour {
    pub cell: usize,
    pub coef: f64,
}

/// A well-mixed subvolume and its outgoing diffusive couplings.
#[derive(Clone, Debug)]
pub struct Cell {
    pub volume: f64,
    pub neighbours: Vec<Neighbour>,
}

/// A named list of cell indices, as produced by one `wmvol` or `grid`
/// clause of the model file.
#[derive(Clone, Debug)]
pub struct CellSet {
    pub name: String,
    pub cells: Vec<usize>,
}

/// Anything stored in a [`NamedCollection`].
pub trait Named {
    fn name(&self) -> &str;
}

impl Named for Species {
    fn name(&self) -> &str {
        &self.name
    }
}
impl Named for Reaction {
    fn name(&self) -> &str {
        &self.name
    }
}
impl Named for CellSet {
    fn name(&self) -> &str {
        &self.name
    }
}

/// A collection of named items with stable zero-based indices.
/// Items keep their insertion order; duplicate names are rejected.
#[derive(Clone, Debug)]
pub struct NamedCollection<T: Named> {
    items: Vec<T>,
    index: FxHashMap<String, usize>,
}

impl<T: Named> Default for NamedCollection<T> {
    fn default() -> Self {
        NamedCollection {
            items: Vec::new(),
            index: FxHashMap::default(),
        }
    }
}

impl<T: Named> NamedCollection<T> {
    /// Appends an item, returning its index.
    /// Fails if an item with the same name is already present.
    pub fn insert(&mut self, item: T) -> Result<usize> {
        if self.index.contains_key(item.name()) {
            return Err(RdError::InvalidModel(format!(
                "duplicate name {:?}",
                item.name()
            )));
        }
        let idx = self.items.len();
        self.index.insert(item.name().to_owned(), idx);
        self.items.push(item);
        Ok(idx)
    }

    /// Looks up an item index by name.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    /// Derives a key not yet present in the collection by appending
    /// a numeric suffix: `k`, `k1`, `k2`, ...
    pub fn unique_key(&self, key: &str) -> String {
        let mut unique = key.to_owned();
        let mut suffix = 0;
        while self.index.contains_key(&unique) {
            suffix += 1;
            unique = format!("{key}{suffix}");
        }
        unique
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.items.iter()
    }
}

impl<T: Named> std::ops::Index<usize> for NamedCollection<T> {
    type Output = T;

    fn index(&self, idx: usize) -> &T {
        &self.items[idx]
    }
}

impl<'t, T: Named> IntoIterator for &'t NamedCollection<T> {
    type Item = &'t T;
    type IntoIter = std::slice::Iter<'t, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

/// An immutable reaction-diffusion model: the species, the reactions
/// between them, and the spatial decomposition into coupled cells.
/// Built by the loader (or by hand in tests), validated once, and never
/// mutated afterwards.
#[derive(Clone, Debug, Default)]
pub struct Model {
    pub name: String,
    pub species: NamedCollection<Species>,
    pub reactions: NamedCollection<Reaction>,
    pub cell_sets: NamedCollection<CellSet>,
    pub cells: Vec<Cell>,
}

impl Model {
    pub fn n_species(&self) -> usize {
        self.species.len()
    }

    pub fn n_reactions(&self) -> usize {
        self.reactions.len()
    }

    pub fn n_cells(&self) -> usize {
        self.cells.len()
    }

    /// Appends a single well-mixed cell with no neighbours, registering
    /// it under the given set name.
    pub fn add_wmvol(&mut self, name: &str, volume: f64) -> Result<()> {
        let cell_id = self.cells.len();
        self.cells.push(Cell {
            volume,
            neighbours: Vec::new(),
        });
        self.cell_sets.insert(CellSet {
            name: name.to_owned(),
            cells: vec![cell_id],
        })?;
        Ok(())
    }

    /// Appends a rectangular grid of cells spanning `extent`, with
    /// `counts` cells along each axis. Every interior face couples the
    /// two adjacent cells in both directions with geometric coefficient
    /// `1/Δa²` along axis `a`.
    pub fn add_grid(
        &mut self,
        name: &str,
        scale: f64,
        extent: [[f64; 3]; 2],
        counts: [usize; 3],
    ) -> Result<()> {
        if scale <= 0.0 {
            return Err(RdError::InvalidModel("grid scale must be positive".into()));
        }
        if counts.iter().any(|&n| n == 0) {
            return Err(RdError::InvalidModel("grid counts must be positive".into()));
        }

        let mut step = [0.0; 3];
        for a in 0..3 {
            let width = (extent[1][a] - extent[0][a]) * scale;
            if width <= 0.0 {
                return Err(RdError::InvalidModel(
                    "grid extent must have positive width on every axis".into(),
                ));
            }
            step[a] = width / counts[a] as f64;
        }

        let [nx, ny, nz] = counts;
        let volume = step[0] * step[1] * step[2];
        let base = self.cells.len();
        let grid_index = |ix: usize, iy: usize, iz: usize| base + ix + nx * (iy + ny * iz);

        for iz in 0..nz {
            for iy in 0..ny {
                for ix in 0..nx {
                    let mut neighbours = Vec::new();
                    let mut couple = |idx: [usize; 3], axis: usize| {
                        let coef = 1.0 / (step[axis] * step[axis]);
                        neighbours.push(Neighbour::new(grid_index(idx[0], idx[1], idx[2]), coef));
                    };
                    if ix > 0 {
                        couple([ix - 1, iy, iz], 0);
                    }
                    if ix + 1 < nx {
                        couple([ix + 1, iy, iz], 0);
                    }
                    if iy > 0 {
                        couple([ix, iy - 1, iz], 1);
                    }
                    if iy + 1 < ny {
                        couple([ix, iy + 1, iz], 1);
                    }
                    if iz > 0 {
                        couple([ix, iy, iz - 1], 2);
                    }
                    if iz + 1 < nz {
                        couple([ix, iy, iz + 1], 2);
                    }
                    self.cells.push(Cell { volume, neighbours });
                }
            }
        }

        self.cell_sets.insert(CellSet {
            name: name.to_owned(),
            cells: (base..self.cells.len()).collect(),
        })?;
        Ok(())
    }

    /// Checks every numeric invariant of the model entities.
    pub fn validate(&self) -> Result<()> {
        for species in &self.species {
            if species.diffusivity < 0.0 {
                return Err(RdError::InvalidModel(format!(
                    "species {:?} has negative diffusivity",
                    species.name
                )));
            }
            if species.concentration < 0.0 {
                return Err(RdError::InvalidModel(format!(
                    "species {:?} has negative concentration",
                    species.name
                )));
            }
        }

        for reaction in &self.reactions {
            if reaction.rate < 0.0 {
                return Err(RdError::InvalidModel(format!(
                    "reaction {:?} has negative rate",
                    reaction.name
                )));
            }
            if reaction.left.len() > MAX_ORDER {
                return Err(RdError::InvalidModel(format!(
                    "reaction {:?} has order {}, above the maximum {}",
                    reaction.name,
                    reaction.left.len(),
                    MAX_ORDER
                )));
            }
            for &s in reaction.left.iter().chain(&reaction.right) {
                if s >= self.species.len() {
                    return Err(RdError::InvalidModel(format!(
                        "reaction {:?} references species index {s} out of range",
                        reaction.name
                    )));
                }
            }
        }

        for (cell_id, cell) in self.cells.iter().enumerate() {
            if cell.volume <= 0.0 {
                return Err(RdError::InvalidModel(format!(
                    "cell {cell_id} has non-positive volume"
                )));
            }
            for neighbour in &cell.neighbours {
                if neighbour.cell >= self.cells.len() {
                    return Err(RdError::InvalidModel(format!(
                        "cell {cell_id} references neighbour {} out of range",
                        neighbour.cell
                    )));
                }
                if neighbour.coef < 0.0 {
                    return Err(RdError::InvalidModel(format!(
                        "cell {cell_id} has a negative diffusion coefficient"
                    )));
                }
            }
        }

        for set in &self.cell_sets {
            if let Some(&cell) = set.cells.iter().find(|&&c| c >= self.cells.len()) {
                return Err(RdError::InvalidModel(format!(
                    "cell set {:?} references cell {cell} out of range",
                    set.name
                )));
            }
        }

        Ok(())
    }

    fn format_side(&self, side: &[usize]) -> String {
        if side.is_empty() {
            return "Ø".to_owned();
        }
        let mut counts: Vec<(usize, usize)> = Vec::new();
        for &s in side {
            match counts.iter_mut().find(|(idx, _)| *idx == s) {
                Some((_, n)) => *n += 1,
                None => counts.push((s, 1)),
            }
        }
        counts
            .into_iter()
            .map(|(s, n)| {
                let name = &self.species[s].name;
                if n == 1 {
                    name.clone()
                } else {
                    format!("{n}{name}")
                }
            })
            .join(" + ")
    }
}

impl Display for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "species:")?;
        for species in &self.species {
            writeln!(
                f,
                "  {}: diffusivity={} concentration={}",
                species.name, species.diffusivity, species.concentration
            )?;
        }
        writeln!(f, "reactions:")?;
        for reaction in &self.reactions {
            writeln!(
                f,
                "  {}: rate={} {} -> {}",
                reaction.name,
                reaction.rate,
                self.format_side(&reaction.left),
                self.format_side(&reaction.right)
            )?;
        }
        writeln!(f, "cells: {}", self.cells.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn named_collection_rejects_duplicates() {
        let mut species = NamedCollection::default();
        species
            .insert(Species {
                name: "A".to_owned(),
                diffusivity: 0.0,
                concentration: 0.0,
            })
            .unwrap();
        let dup = species.insert(Species {
            name: "A".to_owned(),
            diffusivity: 1.0,
            concentration: 0.0,
        });
        assert!(dup.is_err());
        assert_eq!(species.index_of("A"), Some(0));
    }

    #[test]
    fn unique_key_appends_suffixes() {
        let mut sets = NamedCollection::<CellSet>::default();
        sets.insert(CellSet {
            name: "r".to_owned(),
            cells: vec![],
        })
        .unwrap();
        assert_eq!(sets.unique_key("r"), "r1");
        assert_eq!(sets.unique_key("s"), "s");
    }

    #[test]
    fn grid_couples_neighbours_both_ways() {
        let mut model = Model::default();
        model
            .add_grid("g", 1.0, [[0.0, 0.0, 0.0], [2.0, 1.0, 1.0]], [2, 1, 1])
            .unwrap();
        assert_eq!(model.cells.len(), 2);
        // one face, coupled in both directions with coefficient 1/Δx² = 1
        assert_eq!(model.cells[0].neighbours.len(), 1);
        assert_eq!(model.cells[0].neighbours[0].cell, 1);
        assert_eq!(model.cells[0].neighbours[0].coef, 1.0);
        assert_eq!(model.cells[1].neighbours[0].cell, 0);
        // volumes multiply the per-axis steps
        assert_eq!(model.cells[0].volume, 1.0);
    }

    #[test]
    fn validate_rejects_negative_rate() {
        let mut model = Model::default();
        model
            .species
            .insert(Species {
                name: "A".to_owned(),
                diffusivity: 0.0,
                concentration: 0.0,
            })
            .unwrap();
        model
            .reactions
            .insert(Reaction {
                name: "bad".to_owned(),
                left: vec![0],
                right: vec![],
                rate: -1.0,
            })
            .unwrap();
        assert!(model.validate().is_err());
    }
}
