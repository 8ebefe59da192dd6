//! Individual plants.
//!
//! A plant carries three state variables (height, accumulated mortality
//! hazard and accumulated fecundity) and caches the physiological variables
//! computed for its current height. Rates come either straight from the
//! strategy or, for small plants, from a precomputed [`PlantSpline`].

use std::sync::Arc;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::environment::Environment;
use crate::error::{Result, TreeError};
use crate::plant_spline::PlantSpline;
use crate::strategy::Strategy;

/// Number of state variables per plant.
pub const PLANT_ODE_SIZE: usize = 3;

/// How a plant evaluates its rates.
#[derive(Debug, Clone)]
pub enum RateModel {
    /// Always from first principles.
    Exact,
    /// From the spline up to its maximum height, exact above it.
    Approximate(Arc<PlantSpline>),
}

/// Physiological variables at the plant's current height.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PlantVars {
    pub leaf_area: f64,
    pub net_production: f64,
    pub reproduction_fraction: f64,
    pub height_rate: f64,
    pub mortality_rate: f64,
    pub fecundity_rate: f64,
}

impl PlantVars {
    /// `[dheight/dt, dmortality/dt, dfecundity/dt]`.
    pub fn rates(&self) -> [f64; PLANT_ODE_SIZE] {
        [self.height_rate, self.mortality_rate, self.fecundity_rate]
    }

    /// Computes every variable directly from `strategy`.
    pub fn exact(strategy: &Strategy, height: f64, environment: &dyn Environment) -> Result<Self> {
        let leaf_area = strategy.leaf_area(height);
        let mass_leaf = strategy.mass_leaf(leaf_area);
        let mass_sapwood = strategy.mass_sapwood(leaf_area, height);
        let mass_bark = strategy.mass_bark(mass_sapwood);
        let mass_root = strategy.mass_root(leaf_area);

        let assimilation = strategy.assimilation(height, leaf_area, environment)?;
        let respiration = strategy.respiration(leaf_area, mass_sapwood, mass_bark, mass_root);
        let turnover = strategy.turnover(mass_leaf, mass_sapwood, mass_bark, mass_root);
        let net_production = strategy.production(assimilation, respiration) - turnover;

        let reproduction_fraction = strategy.reproduction_fraction(height);
        let (height_rate, fecundity_rate) = if net_production > 0.0 {
            (
                (1.0 - reproduction_fraction) * net_production / strategy.dmass_dheight(height),
                reproduction_fraction * net_production / strategy.seed_cost(),
            )
        } else {
            (0.0, 0.0)
        };

        Ok(Self {
            leaf_area,
            net_production,
            reproduction_fraction,
            height_rate,
            mortality_rate: strategy.mortality_rate(height, net_production, leaf_area),
            fecundity_rate,
        })
    }
}

#[derive(Debug, Clone)]
pub struct Plant {
    strategy: Arc<Strategy>,
    rate_model: RateModel,
    height: f64,
    mortality: f64,
    fecundity: f64,
    vars: PlantVars,
}

impl Plant {
    /// A seedling at the strategy's seed height, rates computed exactly.
    pub fn new(strategy: Arc<Strategy>) -> Self {
        Self::with_rate_model(strategy, RateModel::Exact)
    }

    /// A seedling whose rates come from `spline` while it is small enough.
    pub fn approximate(strategy: Arc<Strategy>, spline: Arc<PlantSpline>) -> Self {
        Self::with_rate_model(strategy, RateModel::Approximate(spline))
    }

    pub fn with_rate_model(strategy: Arc<Strategy>, rate_model: RateModel) -> Self {
        let height = strategy.height_0();
        Self {
            strategy,
            rate_model,
            height,
            mortality: 0.0,
            fecundity: 0.0,
            vars: PlantVars::default(),
        }
    }

    pub fn strategy(&self) -> &Arc<Strategy> {
        &self.strategy
    }

    pub fn rate_model(&self) -> &RateModel {
        &self.rate_model
    }

    pub fn set_rate_model(&mut self, rate_model: RateModel) {
        self.rate_model = rate_model;
    }

    pub fn height(&self) -> f64 {
        self.height
    }

    pub fn set_height(&mut self, height: f64) -> Result<()> {
        if !height.is_finite() || height <= 0.0 {
            return Err(TreeError::InvalidParameter(format!(
                "plant height must be positive (got {height})"
            )));
        }
        self.height = height;
        Ok(())
    }

    /// Mortality hazard accumulated since the last survival check.
    pub fn mortality(&self) -> f64 {
        self.mortality
    }

    /// Seeds accumulated but not yet released.
    pub fn fecundity(&self) -> f64 {
        self.fecundity
    }

    /// Variables from the last [`compute_vars_phys`](Self::compute_vars_phys).
    pub fn vars(&self) -> &PlantVars {
        &self.vars
    }

    /// Whether the spline is used at the current height.
    pub fn uses_spline(&self) -> bool {
        match &self.rate_model {
            RateModel::Exact => false,
            RateModel::Approximate(spline) => self.height <= spline.height_max(),
        }
    }

    pub fn compute_vars_phys(&mut self, environment: &dyn Environment) -> Result<()> {
        self.vars = match &self.rate_model {
            RateModel::Approximate(spline) if self.height <= spline.height_max() => {
                spline.vars(&self.strategy, self.height)
            }
            _ => PlantVars::exact(&self.strategy, self.height, environment)?,
        };
        Ok(())
    }

    /// Probability that a seed of this strategy establishes in
    /// `environment`.
    ///
    /// Dispersal does not call this: every dispersed seed arrives as a
    /// seedling so seed totals are conserved. Callers that want to thin
    /// arrivals draw against it before adding seedlings.
    pub fn germination_probability(&self, environment: &dyn Environment) -> Result<f64> {
        let seedling = PlantVars::exact(&self.strategy, self.strategy.height_0(), environment)?;
        Ok(self
            .strategy
            .germination_probability(seedling.net_production, seedling.leaf_area))
    }

    /// Releases the whole seeds accumulated so far.
    pub fn offspring(&mut self) -> usize {
        if !(self.fecundity >= 1.0) {
            return 0;
        }
        let whole = self.fecundity.floor();
        self.fecundity -= whole;
        whole as usize
    }

    /// Survival check against the hazard accumulated since the last one.
    ///
    /// Survivors start accumulating again from zero.
    pub fn died<R: Rng>(&mut self, rng: &mut R) -> bool {
        let p_death = 1.0 - (-self.mortality.max(0.0)).exp();
        if rng.random::<f64>() < p_death {
            true
        } else {
            self.mortality = 0.0;
            false
        }
    }

    pub fn ode_size(&self) -> usize {
        PLANT_ODE_SIZE
    }

    pub fn ode_values<'a>(&self, out: &'a mut [f64]) -> &'a mut [f64] {
        let (head, rest) = out.split_at_mut(PLANT_ODE_SIZE);
        head.copy_from_slice(&[self.height, self.mortality, self.fecundity]);
        rest
    }

    /// Takes the plant's state from the front of `values`. Cached rates are
    /// not refreshed; call [`compute_vars_phys`](Self::compute_vars_phys).
    pub fn ode_values_set<'a>(&mut self, values: &'a [f64]) -> Result<&'a [f64]> {
        if values.len() < PLANT_ODE_SIZE {
            return Err(TreeError::ShapeMismatch {
                what: "plant state",
                expected: format!("{PLANT_ODE_SIZE} values"),
                got: values.len().to_string(),
            });
        }
        let (head, rest) = values.split_at(PLANT_ODE_SIZE);
        self.height = head[0];
        self.mortality = head[1];
        self.fecundity = head[2];
        Ok(rest)
    }

    pub fn ode_rates<'a>(&self, out: &'a mut [f64]) -> &'a mut [f64] {
        let (head, rest) = out.split_at_mut(PLANT_ODE_SIZE);
        head.copy_from_slice(&self.vars.rates());
        rest
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::{Plant, PlantVars};
    use crate::control::Control;
    use crate::environment::{FixedEnvironment, LightEnvironment};
    use crate::plant_spline::PlantSpline;
    use crate::strategy::Strategy;
    use crate::testing::ConstantRng;

    fn strategy() -> Arc<Strategy> {
        Arc::new(Strategy::new(Control::default()).expect("default strategy"))
    }

    #[test]
    fn seedling_grows_in_full_light() {
        let mut plant = Plant::new(strategy());
        plant
            .compute_vars_phys(&FixedEnvironment::full_light())
            .expect("vars");
        let vars = plant.vars();
        assert!(vars.net_production > 0.0);
        assert!(vars.height_rate > 0.0);
        assert!(vars.mortality_rate > 0.0);
        assert!(vars.fecundity_rate >= 0.0);
        assert!(!plant.uses_spline());
    }

    #[test]
    fn shade_slows_growth() {
        let strategy = strategy();
        let h = 1.0;
        let sun = PlantVars::exact(&strategy, h, &FixedEnvironment::full_light()).expect("sun");
        let shade = PlantVars::exact(
            &strategy,
            h,
            &FixedEnvironment::new(0.3).expect("valid openness"),
        )
        .expect("shade");
        assert!(shade.height_rate < sun.height_rate);
        assert!(shade.mortality_rate > sun.mortality_rate);
    }

    #[test]
    fn deep_shade_stops_growth() {
        let strategy = strategy();
        let dark = FixedEnvironment::new(0.0).expect("valid openness");
        let vars = PlantVars::exact(&strategy, 2.0, &dark).expect("vars");
        assert!(vars.net_production < 0.0);
        assert_eq!(vars.height_rate, 0.0);
        assert_eq!(vars.fecundity_rate, 0.0);
    }

    #[test]
    fn approximate_matches_exact_at_spline_boundary() {
        let strategy = strategy();
        let environment = LightEnvironment::new(vec![0.0, 2.0, 8.0], vec![0.4, 0.7, 1.0])
            .expect("light profile");
        let spline = Arc::new(PlantSpline::new(&strategy, &environment).expect("spline"));
        let tol = strategy.control().plant_spline_tol;

        let mut exact = Plant::new(strategy.clone());
        let mut approx = Plant::approximate(strategy.clone(), spline.clone());
        for height in [spline.height_max(), 0.5 * (strategy.height_0() + spline.height_max())] {
            exact.set_height(height).expect("height");
            approx.set_height(height).expect("height");
            exact.compute_vars_phys(&environment).expect("exact vars");
            approx.compute_vars_phys(&environment).expect("approximate vars");
            assert!(approx.uses_spline());
            for (a, e) in approx.vars().rates().iter().zip(exact.vars().rates()) {
                assert!((a - e).abs() <= 10.0 * tol * (1.0 + e.abs()), "{a} vs {e}");
            }
        }

        approx.set_height(spline.height_max() * 1.5).expect("height");
        approx.compute_vars_phys(&environment).expect("vars");
        assert!(!approx.uses_spline());
    }

    #[test]
    fn offspring_releases_whole_seeds() {
        let mut plant = Plant::new(strategy());
        plant
            .ode_values_set(&[1.0, 0.0, 3.75])
            .expect("three values");
        assert_eq!(plant.offspring(), 3);
        assert!((plant.fecundity() - 0.75).abs() < 1e-12);
        assert_eq!(plant.offspring(), 0);
    }

    #[test]
    fn survivors_reset_their_hazard() {
        let mut plant = Plant::new(strategy());
        plant.ode_values_set(&[1.0, 0.5, 0.0]).expect("values");
        let mut high = ConstantRng(u64::MAX);
        assert!(!plant.died(&mut high));
        assert_eq!(plant.mortality(), 0.0);

        plant.ode_values_set(&[1.0, 0.5, 0.0]).expect("values");
        let mut low = ConstantRng(0);
        assert!(plant.died(&mut low));
    }

    #[test]
    fn ode_round_trip_preserves_order() {
        let mut plant = Plant::new(strategy());
        let rest = plant
            .ode_values_set(&[2.0, 0.1, 0.2, 99.0])
            .expect("values");
        assert_eq!(rest, &[99.0]);
        let mut out = [0.0; 4];
        let rest = plant.ode_values(&mut out);
        assert_eq!(rest.len(), 1);
        assert_eq!(&out[..3], &[2.0, 0.1, 0.2]);
        assert!(plant.ode_values_set(&[1.0]).is_err());
    }

    #[test]
    fn germination_falls_in_shade() {
        let plant = Plant::new(strategy());
        let sun = plant
            .germination_probability(&FixedEnvironment::full_light())
            .expect("sun");
        let shade = plant
            .germination_probability(&FixedEnvironment::new(0.2).expect("openness"))
            .expect("shade");
        assert!(sun > shade && sun <= 1.0 && shade >= 0.0);
    }
}
