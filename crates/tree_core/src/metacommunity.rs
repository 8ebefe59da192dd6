//! The top level of a simulation: patches linked by seed dispersal.
//!
//! Each full [`step`](Metacommunity::step) runs a deterministic phase, one
//! adaptive ODE step over the concatenated state of every plant in every
//! patch, followed by a stochastic phase in which plants die and released
//! seeds are scattered over the patches. All randomness comes from the one
//! random source owned here, consumed in patch, species, plant order.

use std::sync::Arc;

use nalgebra::DMatrix;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Binomial, Distribution};
use tracing::debug;

use crate::error::{Result, TreeError};
use crate::ode::Solver;
use crate::parameters::Parameters;
use crate::patch::Patch;
use crate::traits::OdeTarget;

pub struct Metacommunity<R: Rng = SmallRng> {
    parameters: Arc<Parameters>,
    patches: Vec<Patch>,
    solver: Solver,
    age: f64,
    rng: R,
}

impl Metacommunity<SmallRng> {
    /// A metacommunity whose random source is seeded with `seed`.
    pub fn with_seed(parameters: Arc<Parameters>, seed: u64) -> Result<Self> {
        Self::new(parameters, SmallRng::seed_from_u64(seed))
    }
}

impl<R: Rng> Metacommunity<R> {
    /// Empty patches, all in full light.
    pub fn new(parameters: Arc<Parameters>, rng: R) -> Result<Self> {
        let template = Patch::new(&parameters)?;
        let patches = vec![template; parameters.n_patches()];
        let solver = Solver::new(parameters.control());
        Ok(Self {
            parameters,
            patches,
            solver,
            age: 0.0,
            rng,
        })
    }

    pub fn parameters(&self) -> &Arc<Parameters> {
        &self.parameters
    }

    /// Number of patches.
    pub fn size(&self) -> usize {
        self.patches.len()
    }

    pub fn n_species(&self) -> usize {
        self.parameters.n_species()
    }

    /// Simulated time elapsed.
    pub fn age(&self) -> f64 {
        self.age
    }

    pub fn patches(&self) -> &[Patch] {
        &self.patches
    }

    pub fn at(&self, index: usize) -> Result<&Patch> {
        TreeError::check_index("patch", index, self.patches.len())?;
        Ok(&self.patches[index])
    }

    pub fn at_mut(&mut self, index: usize) -> Result<&mut Patch> {
        TreeError::check_index("patch", index, self.patches.len())?;
        Ok(&mut self.patches[index])
    }

    pub fn solver(&self) -> &Solver {
        &self.solver
    }

    pub fn rng_mut(&mut self) -> &mut R {
        &mut self.rng
    }

    pub fn set_rng(&mut self, rng: R) {
        self.rng = rng;
    }

    /// One deterministic phase followed by one stochastic phase.
    pub fn step(&mut self) -> Result<()> {
        self.step_deterministic()?;
        self.step_stochastic()
    }

    /// Advances every plant by one adaptive ODE step; returns its length.
    pub fn step_deterministic(&mut self) -> Result<f64> {
        let state = self.patches.ode_values_vec();
        self.solver.set_state(state, self.age);
        let h = self.solver.step(self.patches.as_mut_slice())?;
        self.age = self.solver.time();
        debug!(age = self.age, h, size = self.solver.state().len(), "ODE step accepted");
        Ok(h)
    }

    /// Deaths first, then the seeds released by the survivors are dispersed.
    pub fn step_stochastic(&mut self) -> Result<()> {
        let died = self.deaths();
        let seeds = self.births();
        debug!(age = self.age, died, seeds = ?seeds, "stochastic step");
        self.add_seeds(&seeds)
    }

    /// Seeds released per species, summed over patches.
    pub fn births(&mut self) -> Vec<usize> {
        let mut total = vec![0; self.n_species()];
        for patch in &mut self.patches {
            for (sum, n) in total.iter_mut().zip(patch.births()) {
                *sum += n;
            }
        }
        total
    }

    /// Survival checks in every patch; returns the number of plants removed.
    pub fn deaths(&mut self) -> usize {
        let rng = &mut self.rng;
        self.patches.iter_mut().map(|patch| patch.deaths(rng)).sum()
    }

    /// Scatters `seeds[s]` seeds of each species over the patches.
    ///
    /// Patch `i` of `n` receives `Binomial(remaining, 1 / (n - i))` of the
    /// seeds not yet placed, so every seed lands somewhere and each patch
    /// expects an equal share.
    pub fn add_seeds(&mut self, seeds: &[usize]) -> Result<()> {
        let n_species = self.n_species();
        let n_patches = self.patches.len();
        TreeError::check_length("seed counts", seeds.len(), n_species)?;

        let mut allocation = DMatrix::<usize>::zeros(n_species, n_patches);
        for (s, &total) in seeds.iter().enumerate() {
            let mut remaining = total as u64;
            for p in 0..n_patches {
                if remaining == 0 {
                    break;
                }
                let share = 1.0 / (n_patches - p) as f64;
                let draw = Binomial::new(remaining, share)
                    .map_err(|err| TreeError::Distribution(err.to_string()))?
                    .sample(&mut self.rng);
                allocation[(s, p)] = draw as usize;
                remaining -= draw;
            }
        }
        self.add_seedlings(&allocation)
    }

    /// Adds `seedlings[(s, p)]` seedlings of species `s` to patch `p`.
    pub fn add_seedlings(&mut self, seedlings: &DMatrix<usize>) -> Result<()> {
        let expected = (self.n_species(), self.patches.len());
        if seedlings.shape() != expected {
            return Err(TreeError::ShapeMismatch {
                what: "seedling table",
                expected: format!("{} species x {} patches", expected.0, expected.1),
                got: format!("{} x {}", seedlings.nrows(), seedlings.ncols()),
            });
        }
        for (patch, column) in self.patches.iter_mut().zip(seedlings.column_iter()) {
            let counts: Vec<usize> = column.iter().copied().collect();
            patch.add_seeds(&counts)?;
        }
        Ok(())
    }

    /// Plant counts as a species x patch table.
    pub fn n_individuals(&self) -> DMatrix<usize> {
        DMatrix::from_fn(self.n_species(), self.patches.len(), |s, p| {
            self.patches[p].species()[s].size()
        })
    }

    /// Back to the initial state: age zero, no plants, solver reset.
    pub fn clear(&mut self) {
        self.age = 0.0;
        for patch in &mut self.patches {
            patch.clear();
        }
        self.solver.reset();
    }
}

impl<R: Rng> OdeTarget for Metacommunity<R> {
    fn ode_size(&self) -> usize {
        self.patches.ode_size()
    }

    fn ode_values<'a>(&self, out: &'a mut [f64]) -> &'a mut [f64] {
        self.patches.ode_values(out)
    }

    fn ode_values_set<'a>(&mut self, values: &'a [f64]) -> Result<&'a [f64]> {
        TreeError::check_min_length("metacommunity state", values.len(), self.ode_size())?;
        self.patches.as_mut_slice().ode_values_set(values)
    }

    fn ode_rates<'a>(&self, out: &'a mut [f64]) -> &'a mut [f64] {
        self.patches.ode_rates(out)
    }
}
