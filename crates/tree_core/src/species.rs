use std::sync::Arc;

use rand::Rng;

use crate::environment::Environment;
use crate::error::{Result, TreeError};
use crate::plant::{Plant, RateModel};
use crate::plant_spline::PlantSpline;
use crate::strategy::Strategy;

/// The plants of one strategy within a patch, in arrival order.
#[derive(Debug, Clone)]
pub struct Species {
    strategy: Arc<Strategy>,
    /// Template for new arrivals, rates computed in the patch environment.
    seed: Plant,
    plants: Vec<Plant>,
}

impl Species {
    pub fn new(strategy: Arc<Strategy>, spline: Option<Arc<PlantSpline>>) -> Self {
        let rate_model = spline.map_or(RateModel::Exact, RateModel::Approximate);
        Self {
            seed: Plant::with_rate_model(strategy.clone(), rate_model),
            strategy,
            plants: Vec::new(),
        }
    }

    pub fn strategy(&self) -> &Arc<Strategy> {
        &self.strategy
    }

    pub fn seed(&self) -> &Plant {
        &self.seed
    }

    pub fn plants(&self) -> &[Plant] {
        &self.plants
    }

    pub fn size(&self) -> usize {
        self.plants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plants.is_empty()
    }

    pub fn at(&self, index: usize) -> Result<&Plant> {
        TreeError::check_index("plant", index, self.plants.len())?;
        Ok(&self.plants[index])
    }

    pub fn clear(&mut self) {
        self.plants.clear();
    }

    /// Switches every plant, and future arrivals, to `rate_model`.
    pub fn set_rate_model(&mut self, rate_model: RateModel) {
        for plant in self.plants.iter_mut().chain(std::iter::once(&mut self.seed)) {
            plant.set_rate_model(rate_model.clone());
        }
    }

    pub fn compute_vars_phys(&mut self, environment: &dyn Environment) -> Result<()> {
        self.seed.compute_vars_phys(environment)?;
        for plant in &mut self.plants {
            plant.compute_vars_phys(environment)?;
        }
        Ok(())
    }

    /// Whole seeds released by every plant.
    pub fn births(&mut self) -> usize {
        self.plants.iter_mut().map(Plant::offspring).sum()
    }

    /// Removes plants that fail their survival check; survivors keep their
    /// order.
    pub fn deaths<R: Rng>(&mut self, rng: &mut R) -> usize {
        let before = self.plants.len();
        self.plants.retain_mut(|plant| !plant.died(rng));
        before - self.plants.len()
    }

    /// Appends `n` seedlings copied from the seed template.
    pub fn add_seeds(&mut self, n: usize) {
        self.plants.extend(std::iter::repeat(self.seed.clone()).take(n));
    }

    pub fn ode_size(&self) -> usize {
        self.plants.iter().map(Plant::ode_size).sum()
    }

    pub fn ode_values<'a>(&self, mut out: &'a mut [f64]) -> &'a mut [f64] {
        for plant in &self.plants {
            out = plant.ode_values(out);
        }
        out
    }

    /// Sets each plant's state and recomputes its rates in `environment`.
    /// On error no plant is changed.
    pub fn ode_values_set<'a>(
        &mut self,
        values: &'a [f64],
        environment: &dyn Environment,
    ) -> Result<&'a [f64]> {
        let (plants, rest) = self.staged_values(values, environment)?;
        self.plants = plants;
        Ok(rest)
    }

    /// Copies of the plants carrying `values`, with rates computed; `self`
    /// is left alone.
    pub(crate) fn staged_values<'a>(
        &self,
        mut values: &'a [f64],
        environment: &dyn Environment,
    ) -> Result<(Vec<Plant>, &'a [f64])> {
        let mut plants = Vec::with_capacity(self.plants.len());
        for plant in &self.plants {
            let mut plant = plant.clone();
            values = plant.ode_values_set(values)?;
            plant.compute_vars_phys(environment)?;
            plants.push(plant);
        }
        Ok((plants, values))
    }

    pub(crate) fn replace_plants(&mut self, plants: Vec<Plant>) {
        self.plants = plants;
    }

    pub fn ode_rates<'a>(&self, mut out: &'a mut [f64]) -> &'a mut [f64] {
        for plant in &self.plants {
            out = plant.ode_rates(out);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::Species;
    use crate::control::Control;
    use crate::environment::FixedEnvironment;
    use crate::error::TreeError;
    use crate::strategy::Strategy;
    use crate::testing::ConstantRng;

    fn species() -> Species {
        let strategy = Strategy::new(Control::default()).expect("strategy");
        let mut species = Species::new(Arc::new(strategy), None);
        species
            .compute_vars_phys(&FixedEnvironment::full_light())
            .expect("seed vars");
        species
    }

    #[test]
    fn seeds_start_at_seed_height_with_rates() {
        let mut species = species();
        species.add_seeds(3);
        assert_eq!(species.size(), 3);
        assert_eq!(species.ode_size(), 9);
        let h0 = species.strategy().height_0();
        for plant in species.plants() {
            assert_eq!(plant.height(), h0);
            assert!(plant.vars().height_rate > 0.0);
        }
        assert!(matches!(
            species.at(3),
            Err(TreeError::IndexOutOfRange { index: 3, len: 3, .. })
        ));
    }

    #[test]
    fn state_is_concatenated_in_plant_order() {
        let mut species = species();
        species.add_seeds(2);
        let env = FixedEnvironment::full_light();
        let values = [1.0, 0.1, 0.2, 2.0, 0.3, 0.4, 7.0];
        let rest = species.ode_values_set(&values, &env).expect("values");
        assert_eq!(rest, &[7.0]);

        let mut out = vec![0.0; 6];
        assert!(species.ode_values(&mut out).is_empty());
        assert_eq!(out, &values[..6]);
        assert_eq!(species.at(1).expect("plant").height(), 2.0);

        let mut rates = vec![0.0; 6];
        species.ode_rates(&mut rates);
        assert!(rates[0] > 0.0 && rates[3] > 0.0);
    }

    #[test]
    fn births_release_whole_seeds() {
        let mut species = species();
        species.add_seeds(2);
        let env = FixedEnvironment::full_light();
        species
            .ode_values_set(&[1.0, 0.0, 2.5, 1.0, 0.0, 1.5], &env)
            .expect("values");
        assert_eq!(species.births(), 3);
        assert_eq!(species.births(), 0);
    }

    #[test]
    fn deaths_keep_survivor_order() {
        let mut species = species();
        species.add_seeds(3);
        let env = FixedEnvironment::full_light();
        species
            .ode_values_set(&[1.0, 0.0, 0.0, 2.0, 5.0, 0.0, 3.0, 0.0, 0.0], &env)
            .expect("values");
        // A zero draw kills only plants with positive accumulated hazard.
        assert_eq!(species.deaths(&mut ConstantRng(0)), 1);
        let heights: Vec<f64> = species.plants().iter().map(|p| p.height()).collect();
        assert_eq!(heights, vec![1.0, 3.0]);

        assert_eq!(species.deaths(&mut ConstantRng(u64::MAX)), 0);
        species.clear();
        assert!(species.is_empty());
    }
}
