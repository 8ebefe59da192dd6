use serde::{Deserialize, Serialize};

use crate::error::{Result, TreeError};
use crate::lookup::parameter_table;

/// Numerical settings shared by the integrators, the seed-height root
/// finder and the rate splines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Control {
    /// Integrate assimilation over the crown rather than using the light
    /// level at the top of the plant.
    pub plant_assimilation_over_distribution: bool,
    /// Use adaptive subdivision; otherwise a single Gauss–Kronrod rule.
    pub plant_assimilation_adaptive: bool,
    pub plant_assimilation_tol_abs: f64,
    pub plant_assimilation_tol_rel: f64,
    /// Maximum number of subintervals the quadrature may create.
    pub plant_assimilation_iterations: usize,

    pub plant_seed_tol: f64,
    pub plant_seed_iterations: usize,

    /// Plants at or below this height use the rate spline when approximate.
    pub plant_spline_height_max: f64,
    pub plant_spline_n_points: usize,
    pub plant_spline_tol: f64,
    pub plant_spline_max_points: usize,

    pub ode_step_size_initial: f64,
    pub ode_step_size_min: f64,
    pub ode_step_size_max: f64,
    pub ode_tol_abs: f64,
    pub ode_tol_rel: f64,
    /// Weight of `|y|` in the ODE error scale.
    pub ode_a_y: f64,
    /// Weight of `h |dy/dt|` in the ODE error scale.
    pub ode_a_dydt: f64,
    /// Number of step-size reductions allowed within one step.
    pub ode_max_retries: usize,
}

impl Default for Control {
    fn default() -> Self {
        Self {
            plant_assimilation_over_distribution: true,
            plant_assimilation_adaptive: true,
            plant_assimilation_tol_abs: 1e-6,
            plant_assimilation_tol_rel: 1e-6,
            plant_assimilation_iterations: 1000,
            plant_seed_tol: 1e-8,
            plant_seed_iterations: 1000,
            plant_spline_height_max: 5.0,
            plant_spline_n_points: 17,
            plant_spline_tol: 1e-6,
            plant_spline_max_points: 1025,
            ode_step_size_initial: 1e-3,
            ode_step_size_min: 1e-8,
            ode_step_size_max: 1.0,
            ode_tol_abs: 1e-6,
            ode_tol_rel: 1e-6,
            ode_a_y: 1.0,
            ode_a_dydt: 0.0,
            ode_max_retries: 50,
        }
    }
}

parameter_table!(Control {
    plant_assimilation_tol_abs,
    plant_assimilation_tol_rel,
    plant_seed_tol,
    plant_spline_height_max,
    plant_spline_tol,
    ode_step_size_initial,
    ode_step_size_min,
    ode_step_size_max,
    ode_tol_abs,
    ode_tol_rel,
    ode_a_y,
    ode_a_dydt,
} post = Control::validate);

impl Control {
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("plant_assimilation_tol_abs", self.plant_assimilation_tol_abs),
            ("plant_assimilation_tol_rel", self.plant_assimilation_tol_rel),
            ("plant_seed_tol", self.plant_seed_tol),
            ("plant_spline_height_max", self.plant_spline_height_max),
            ("plant_spline_tol", self.plant_spline_tol),
            ("ode_step_size_initial", self.ode_step_size_initial),
            ("ode_step_size_min", self.ode_step_size_min),
            ("ode_step_size_max", self.ode_step_size_max),
            ("ode_tol_abs", self.ode_tol_abs),
            ("ode_tol_rel", self.ode_tol_rel),
        ];
        for (name, value) in positive {
            if !value.is_finite() || value <= 0.0 {
                return Err(TreeError::InvalidParameter(format!(
                    "{name} must be finite and positive (got {value})"
                )));
            }
        }
        for (name, value) in [("ode_a_y", self.ode_a_y), ("ode_a_dydt", self.ode_a_dydt)] {
            if !value.is_finite() || value < 0.0 {
                return Err(TreeError::InvalidParameter(format!(
                    "{name} must be finite and non-negative (got {value})"
                )));
            }
        }
        if self.ode_step_size_min > self.ode_step_size_max {
            return Err(TreeError::InvalidParameter(
                "ode_step_size_min must not exceed ode_step_size_max".into(),
            ));
        }
        if self.plant_assimilation_iterations == 0 || self.plant_seed_iterations == 0 {
            return Err(TreeError::InvalidParameter(
                "iteration limits must be greater than zero".into(),
            ));
        }
        if self.plant_spline_n_points < 2 {
            return Err(TreeError::InvalidParameter(
                "plant_spline_n_points must be at least 2".into(),
            ));
        }
        if self.plant_spline_max_points < self.plant_spline_n_points {
            return Err(TreeError::InvalidParameter(
                "plant_spline_max_points must be at least plant_spline_n_points".into(),
            ));
        }
        Ok(())
    }
}
