use std::sync::Arc;

use rand::Rng;

use crate::environment::{Environment, FixedEnvironment};
use crate::error::{Result, TreeError};
use crate::parameters::{IndividualKind, Parameters};
use crate::plant::{Plant, RateModel};
use crate::plant_spline::PlantSpline;
use crate::species::Species;
use crate::traits::OdeTarget;

/// One spatial replicate: a population per species under a shared light
/// environment.
///
/// The ODE state is the concatenation of every plant's state, species by
/// species, plants in arrival order.
#[derive(Debug, Clone)]
pub struct Patch {
    species: Vec<Species>,
    environment: Arc<dyn Environment>,
    individual: IndividualKind,
}

impl Patch {
    /// An empty patch in full light.
    pub fn new(parameters: &Parameters) -> Result<Self> {
        Self::with_environment(parameters, Arc::new(FixedEnvironment::full_light()))
    }

    pub fn with_environment(
        parameters: &Parameters,
        environment: Arc<dyn Environment>,
    ) -> Result<Self> {
        let species = parameters
            .strategies()
            .iter()
            .map(|strategy| Species::new(strategy.clone(), None))
            .collect();
        let mut patch = Self {
            species,
            environment,
            individual: parameters.individual(),
        };
        patch.rebuild_rate_models()?;
        patch.compute_vars_phys()?;
        Ok(patch)
    }

    pub fn n_species(&self) -> usize {
        self.species.len()
    }

    pub fn species(&self) -> &[Species] {
        &self.species
    }

    pub fn at(&self, index: usize) -> Result<&Species> {
        TreeError::check_index("species", index, self.species.len())?;
        Ok(&self.species[index])
    }

    pub fn environment(&self) -> &Arc<dyn Environment> {
        &self.environment
    }

    /// Installs a new environment; approximate plants get splines built for
    /// it and every plant's rates are recomputed.
    pub fn set_environment(&mut self, environment: Arc<dyn Environment>) -> Result<()> {
        let previous = std::mem::replace(&mut self.environment, environment);
        let refreshed = self
            .rebuild_rate_models()
            .and_then(|()| self.compute_vars_phys());
        if refreshed.is_err() {
            self.environment = previous;
            self.rebuild_rate_models()?;
            self.compute_vars_phys()?;
        }
        refreshed
    }

    fn rebuild_rate_models(&mut self) -> Result<()> {
        if self.individual == IndividualKind::Exact {
            return Ok(());
        }
        for species in &mut self.species {
            let spline = PlantSpline::new(species.strategy(), self.environment.as_ref())?;
            species.set_rate_model(RateModel::Approximate(Arc::new(spline)));
        }
        Ok(())
    }

    pub fn compute_vars_phys(&mut self) -> Result<()> {
        for species in &mut self.species {
            species.compute_vars_phys(self.environment.as_ref())?;
        }
        Ok(())
    }

    pub fn size(&self) -> usize {
        self.species.iter().map(Species::size).sum()
    }

    /// Plant counts per species.
    pub fn n_individuals(&self) -> Vec<usize> {
        self.species.iter().map(Species::size).collect()
    }

    /// Seeds released per species.
    pub fn births(&mut self) -> Vec<usize> {
        self.species.iter_mut().map(Species::births).collect()
    }

    /// Survival checks for every plant; returns the number that died.
    pub fn deaths<R: Rng>(&mut self, rng: &mut R) -> usize {
        self.species
            .iter_mut()
            .map(|species| species.deaths(rng))
            .sum()
    }

    /// Appends `seeds[i]` seedlings to species `i`.
    pub fn add_seeds(&mut self, seeds: &[usize]) -> Result<()> {
        TreeError::check_length("seed counts", seeds.len(), self.species.len())?;
        for (species, &n) in self.species.iter_mut().zip(seeds) {
            species.add_seeds(n);
        }
        Ok(())
    }

    pub fn clear(&mut self) {
        for species in &mut self.species {
            species.clear();
        }
    }

    fn staged_values<'a>(&self, mut values: &'a [f64]) -> Result<(Vec<Vec<Plant>>, &'a [f64])> {
        let mut staged = Vec::with_capacity(self.species.len());
        for species in &self.species {
            let (plants, rest) = species.staged_values(values, self.environment.as_ref())?;
            staged.push(plants);
            values = rest;
        }
        Ok((staged, values))
    }

    fn replace_plants(&mut self, staged: Vec<Vec<Plant>>) {
        for (species, plants) in self.species.iter_mut().zip(staged) {
            species.replace_plants(plants);
        }
    }
}

impl OdeTarget for Patch {
    fn ode_size(&self) -> usize {
        self.species.iter().map(Species::ode_size).sum()
    }

    fn ode_values<'a>(&self, mut out: &'a mut [f64]) -> &'a mut [f64] {
        for species in &self.species {
            out = species.ode_values(out);
        }
        out
    }

    /// All or nothing: a short slice or a failed rate computation leaves
    /// every plant as it was.
    fn ode_values_set<'a>(&mut self, values: &'a [f64]) -> Result<&'a [f64]> {
        TreeError::check_min_length("patch state", values.len(), self.ode_size())?;
        let (staged, rest) = self.staged_values(values)?;
        self.replace_plants(staged);
        Ok(rest)
    }

    fn ode_rates<'a>(&self, mut out: &'a mut [f64]) -> &'a mut [f64] {
        for species in &self.species {
            out = species.ode_rates(out);
        }
        out
    }
}

impl OdeTarget for [Patch] {
    fn ode_size(&self) -> usize {
        self.iter().map(Patch::ode_size).sum()
    }

    fn ode_values<'a>(&self, mut out: &'a mut [f64]) -> &'a mut [f64] {
        for patch in self {
            out = patch.ode_values(out);
        }
        out
    }

    fn ode_values_set<'a>(&mut self, mut values: &'a [f64]) -> Result<&'a [f64]> {
        TreeError::check_min_length("patch states", values.len(), self.ode_size())?;
        let mut staged = Vec::with_capacity(self.len());
        for patch in self.iter() {
            let (plants, rest) = patch.staged_values(values)?;
            staged.push(plants);
            values = rest;
        }
        for (patch, plants) in self.iter_mut().zip(staged) {
            patch.replace_plants(plants);
        }
        Ok(values)
    }

    fn ode_rates<'a>(&self, mut out: &'a mut [f64]) -> &'a mut [f64] {
        for patch in self {
            out = patch.ode_rates(out);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::Patch;
    use crate::control::Control;
    use crate::environment::{Environment, FixedEnvironment};
    use crate::error::TreeError;
    use crate::lookup::{ParameterMap, ParameterTable};
    use crate::parameters::{IndividualKind, Parameters};
    use crate::strategy::Strategy;
    use crate::testing::ConstantRng;
    use crate::traits::OdeTarget;

    fn parameters(individual: IndividualKind) -> Parameters {
        let first = Strategy::new(Control::default()).expect("strategy");
        let mut second = first.clone();
        let traits: ParameterMap = [("lma".to_string(), 0.3)].into_iter().collect();
        second.set_parameters(&traits).expect("lma");
        Parameters::new(vec![first, second], Control::default(), 1, individual)
            .expect("parameters")
    }

    #[test]
    fn ode_size_is_sum_over_plants() {
        let mut patch = Patch::new(&parameters(IndividualKind::Exact)).expect("patch");
        assert_eq!(patch.ode_size(), 0);
        patch.add_seeds(&[2, 3]).expect("seeds");
        assert_eq!(patch.size(), 5);
        assert_eq!(patch.n_individuals(), vec![2, 3]);
        assert_eq!(patch.ode_size(), 15);

        let err = patch.add_seeds(&[1]).expect_err("one count for two species");
        assert!(matches!(err, TreeError::ShapeMismatch { .. }));
        assert_eq!(patch.size(), 5);
    }

    #[test]
    fn values_and_rates_share_plant_order() {
        let mut patch = Patch::new(&parameters(IndividualKind::Exact)).expect("patch");
        patch.add_seeds(&[1, 1]).expect("seeds");
        let values = vec![1.5, 0.0, 0.0, 2.5, 0.0, 0.0];
        patch.ode_values_set(&values).expect("values");
        assert_eq!(patch.ode_values_vec(), values);

        let rates = patch.ode_rates_vec();
        let first = patch.at(0).expect("species").at(0).expect("plant");
        let second = patch.at(1).expect("species").at(0).expect("plant");
        assert_eq!(&rates[..3], &first.vars().rates());
        assert_eq!(&rates[3..], &second.vars().rates());
        assert!(matches!(
            patch.at(2),
            Err(TreeError::IndexOutOfRange { .. })
        ));
    }

    /// Light is undefined above `top`.
    #[derive(Debug)]
    struct Ceiling {
        top: f64,
    }

    impl Environment for Ceiling {
        fn canopy_openness(&self, height: f64) -> f64 {
            if height > self.top {
                f64::NAN
            } else {
                1.0
            }
        }
    }

    #[test]
    fn short_state_leaves_plants_untouched() {
        let mut patch = Patch::new(&parameters(IndividualKind::Exact)).expect("patch");
        patch.add_seeds(&[2, 0]).expect("seeds");
        let before = patch.ode_values_vec();
        let rates = patch.ode_rates_vec();

        let err = patch
            .ode_values_set(&[3.0, 0.0, 0.0, 4.0])
            .expect_err("four values for six");
        assert_eq!(
            err,
            TreeError::ShapeMismatch {
                what: "patch state",
                expected: "at least 6".into(),
                got: "4".into(),
            }
        );
        assert_eq!(patch.ode_values_vec(), before);
        assert_eq!(patch.ode_rates_vec(), rates);

        let mut patches = vec![patch.clone(), patch.clone()];
        assert!(matches!(
            patches.as_mut_slice().ode_values_set(&[3.0; 9]),
            Err(TreeError::ShapeMismatch { what: "patch states", .. })
        ));
        assert_eq!(patches.as_slice().ode_values_vec(), [before.clone(), before].concat());
    }

    #[test]
    fn failed_rate_computation_leaves_plants_untouched() {
        let parameters = parameters(IndividualKind::Exact);
        let mut patch =
            Patch::with_environment(&parameters, Arc::new(Ceiling { top: 3.0 })).expect("patch");
        patch.add_seeds(&[1, 1]).expect("seeds");
        let before = patch.ode_values_vec();
        let rates = patch.ode_rates_vec();

        let err = patch
            .ode_values_set(&[1.0, 0.0, 0.0, 4.0, 0.0, 0.0])
            .expect_err("second plant reaches undefined light");
        assert!(matches!(err, TreeError::Integration { .. }));
        assert_eq!(patch.ode_values_vec(), before);
        assert_eq!(patch.ode_rates_vec(), rates);

        patch
            .ode_values_set(&[1.0, 0.0, 0.0, 2.0, 0.0, 0.0])
            .expect("both plants below the ceiling");
        assert_eq!(patch.ode_values_vec(), vec![1.0, 0.0, 0.0, 2.0, 0.0, 0.0]);
    }

    #[test]
    fn shading_the_patch_recomputes_rates() {
        let mut patch = Patch::new(&parameters(IndividualKind::Exact)).expect("patch");
        patch.add_seeds(&[1, 0]).expect("seeds");
        let sun = patch.ode_rates_vec()[0];
        patch
            .set_environment(Arc::new(FixedEnvironment::new(0.4).expect("openness")))
            .expect("environment");
        let shade = patch.ode_rates_vec()[0];
        assert!(shade < sun);
    }

    #[test]
    fn approximate_patches_use_splines() {
        let mut patch = Patch::new(&parameters(IndividualKind::Approximate)).expect("patch");
        patch.add_seeds(&[1, 1]).expect("seeds");
        for species in patch.species() {
            assert!(species.at(0).expect("plant").uses_spline());
        }
    }

    #[test]
    fn deaths_and_clear() {
        let mut patch = Patch::new(&parameters(IndividualKind::Exact)).expect("patch");
        patch.add_seeds(&[2, 2]).expect("seeds");
        patch
            .ode_values_set(&[1.0, 1.0, 0.0, 1.0, 0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 3.0, 0.0])
            .expect("values");
        assert_eq!(patch.deaths(&mut ConstantRng(0)), 2);
        assert_eq!(patch.n_individuals(), vec![1, 1]);
        patch.clear();
        assert_eq!(patch.size(), 0);
        assert_eq!(patch.n_species(), 2);
    }
}
