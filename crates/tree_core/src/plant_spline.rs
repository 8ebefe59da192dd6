use tracing::debug;

use crate::environment::Environment;
use crate::error::{Result, TreeError};
use crate::interpolator::{AdaptiveSpline, Interpolator};
use crate::plant::PlantVars;
use crate::strategy::Strategy;

/// Plant rates tabulated against height for one strategy in one
/// environment.
///
/// Covers `[height_0, plant_spline_height_max]`; knots are added until every
/// interval midpoint matches the exact model to `plant_spline_tol`. The top
/// knot sits exactly on `height_max`, so the switch to exact rates above it is
/// continuous.
#[derive(Debug, Clone, PartialEq)]
pub struct PlantSpline {
    height_min: f64,
    height_max: f64,
    net_production: Interpolator,
    height_rate: Interpolator,
    mortality_rate: Interpolator,
    fecundity_rate: Interpolator,
}

impl PlantSpline {
    pub fn new(strategy: &Strategy, environment: &dyn Environment) -> Result<Self> {
        let control = strategy.control();
        let height_min = strategy.height_0();
        let height_max = control.plant_spline_height_max;
        if height_max <= height_min {
            return Err(TreeError::InvalidParameter(format!(
                "spline height_max {height_max} must exceed seed height {height_min}"
            )));
        }

        let builder = AdaptiveSpline {
            tol_abs: control.plant_spline_tol,
            tol_rel: control.plant_spline_tol,
            n_initial: control.plant_spline_n_points,
            max_points: control.plant_spline_max_points,
        };
        let sample = |height: f64| -> Result<Vec<f64>> {
            let vars = PlantVars::exact(strategy, height, environment)?;
            Ok(vec![
                vars.net_production,
                vars.height_rate,
                vars.mortality_rate,
                vars.fecundity_rate,
            ])
        };
        let mut splines = builder.build(sample, height_min, height_max)?.into_iter();
        let mut next = || {
            splines
                .next()
                .ok_or_else(|| TreeError::Interpolation("missing spline component".into()))
        };
        let spline = Self {
            height_min,
            height_max,
            net_production: next()?,
            height_rate: next()?,
            mortality_rate: next()?,
            fecundity_rate: next()?,
        };
        debug!(
            height_min,
            height_max,
            knots = spline.len(),
            "built plant rate spline"
        );
        Ok(spline)
    }

    pub fn height_min(&self) -> f64 {
        self.height_min
    }

    pub fn height_max(&self) -> f64 {
        self.height_max
    }

    /// Number of knots.
    pub fn len(&self) -> usize {
        self.height_rate.len()
    }

    pub fn is_empty(&self) -> bool {
        self.height_rate.is_empty()
    }

    /// Interpolated variables at `height`; allometry is computed directly.
    pub fn vars(&self, strategy: &Strategy, height: f64) -> PlantVars {
        PlantVars {
            leaf_area: strategy.leaf_area(height),
            net_production: self.net_production.eval(height),
            reproduction_fraction: strategy.reproduction_fraction(height),
            height_rate: self.height_rate.eval(height).max(0.0),
            mortality_rate: self.mortality_rate.eval(height),
            fecundity_rate: self.fecundity_rate.eval(height).max(0.0),
        }
    }
}
