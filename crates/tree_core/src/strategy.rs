//! Plant strategies: the trait values of one functional type.
//!
//! Traits are read and written by name through [`ParameterTable`]; every
//! successful write recomputes the derived constants (`eta_c`, `k_l`, `k_s`,
//! the seed height) and rebuilds the quadrature integrator from the current
//! [`Control`]. Fields are private, so the derived constants cannot drift
//! out of date.

use std::sync::Arc;

use crate::control::Control;
use crate::environment::Environment;
use crate::error::{Result, TreeError};
use crate::interpolator::Interpolator;
use crate::lookup::{parameter_table, ParameterMap, ParameterTable};
use crate::quadrature::Qag;

#[allow(non_snake_case)]
#[derive(Debug, Clone, PartialEq)]
pub struct Strategy {
    // Core traits and the reference values they are scaled against.
    lma: f64,
    rho: f64,
    hmat: f64,
    s: f64,
    n_area: f64,
    lma_0: f64,
    rho_0: f64,
    hmat_0: f64,
    s_0: f64,
    n_area_0: f64,

    // Allometry: crown shape, leaf area per sapwood area, height–leaf area
    // scaling, root mass per leaf area, bark per sapwood.
    eta: f64,
    theta: f64,
    a1: f64,
    B1: f64,
    a3: f64,
    b: f64,

    // Turnover.
    k_l0: f64,
    B4: f64,
    k_s0: f64,
    B5: f64,
    k_b: f64,
    k_r: f64,

    // Respiration.
    c_Rs: f64,
    c_Rb: f64,
    c_Rr: f64,
    c_Rl: f64,

    // Production: yield, mol CO2 → kg biomass, light response.
    Y: f64,
    c_bio: f64,
    c_p1: f64,
    c_p2: f64,

    // Reproduction.
    c_acc: f64,
    B7: f64,
    c_r1: f64,
    c_r2: f64,

    // Mortality.
    c_s0: f64,
    c_d0: f64,
    c_d1: f64,
    B6: f64,
    c_d2: f64,
    c_d3: f64,

    // Derived.
    eta_c: f64,
    k_l: f64,
    k_s: f64,
    height_0: f64,

    control: Control,
    integrator: Qag,
    assimilation_fn: Option<Arc<Interpolator>>,
}

parameter_table!(Strategy {
    lma, rho, hmat, s, n_area,
    lma_0, rho_0, hmat_0, s_0, n_area_0,
    eta, theta, a1, B1, a3, b,
    k_l0, B4, k_s0, B5, k_b, k_r,
    c_Rs, c_Rb, c_Rr, c_Rl,
    Y, c_bio, c_p1, c_p2,
    c_acc, B7, c_r1, c_r2,
    c_s0, c_d0, c_d1, B6, c_d2, c_d3,
} post = Strategy::refresh);

impl Strategy {
    /// Default trait values, with derived constants computed under `control`.
    pub fn new(control: Control) -> Result<Self> {
        control.validate()?;
        let mut strategy = Self {
            lma: 0.1978791,
            rho: 608.0,
            hmat: 16.5958691,
            s: 3.8e-5,
            n_area: 1.87e-3,
            lma_0: 0.1978791,
            rho_0: 608.0,
            hmat_0: 16.5958691,
            s_0: 3.8e-5,
            n_area_0: 1.87e-3,

            eta: 12.0,
            theta: 4669.0,
            a1: 5.44,
            B1: 0.306,
            a3: 0.07,
            b: 0.17,

            k_l0: 0.4565855,
            B4: 1.71,
            k_s0: 0.2,
            B5: 0.0,
            k_b: 0.2,
            k_r: 1.0,

            c_Rs: 4012.0,
            c_Rb: 8024.0,
            c_Rr: 217.0,
            c_Rl: 2.1e4,

            Y: 0.7,
            c_bio: 12e-3 / 0.49,
            c_p1: 150.36,
            c_p2: 0.19,

            c_acc: 4.0,
            B7: 1.0,
            c_r1: 1.0,
            c_r2: 50.0,

            c_s0: 0.1,
            c_d0: 0.01,
            c_d1: 0.0,
            B6: 0.0,
            c_d2: 5.5,
            c_d3: 20.0,

            eta_c: 0.0,
            k_l: 0.0,
            k_s: 0.0,
            height_0: 0.0,

            integrator: Qag::from_control(&control),
            control,
            assimilation_fn: None,
        };
        strategy.refresh()?;
        Ok(strategy)
    }

    /// Default traits overridden by `values`.
    pub fn from_parameters(values: &ParameterMap, control: Control) -> Result<Self> {
        let mut strategy = Self::new(control)?;
        strategy.set_parameters(values)?;
        Ok(strategy)
    }

    pub fn lma(&self) -> f64 {
        self.lma
    }

    pub fn rho(&self) -> f64 {
        self.rho
    }

    pub fn hmat(&self) -> f64 {
        self.hmat
    }

    /// Seed mass.
    pub fn s(&self) -> f64 {
        self.s
    }

    /// Crown shape constant derived from `eta`.
    pub fn eta_c(&self) -> f64 {
        self.eta_c
    }

    /// Leaf turnover rate.
    pub fn k_l(&self) -> f64 {
        self.k_l
    }

    /// Sapwood turnover rate.
    pub fn k_s(&self) -> f64 {
        self.k_s
    }

    /// Height of a germinated seed.
    pub fn height_0(&self) -> f64 {
        self.height_0
    }

    pub fn control(&self) -> &Control {
        &self.control
    }

    pub fn integrator(&self) -> &Qag {
        &self.integrator
    }

    pub fn assimilation_fn(&self) -> Option<&Interpolator> {
        self.assimilation_fn.as_deref()
    }

    /// Installs the control and re-derives everything that depends on it.
    pub fn set_control(&mut self, control: Control) -> Result<()> {
        control.validate()?;
        let mut updated = self.clone();
        updated.control = control;
        updated.refresh()?;
        *self = updated;
        Ok(())
    }

    /// Per-leaf-area assimilation as a function of height; when set it is
    /// used instead of integrating over the crown.
    pub fn set_assimilation_fn(&mut self, assimilation_fn: Option<Interpolator>) {
        self.assimilation_fn = assimilation_fn.map(Arc::new);
    }

    fn refresh(&mut self) -> Result<()> {
        self.validate()?;
        self.eta_c = 1.0 - 2.0 / (1.0 + self.eta) + 1.0 / (1.0 + 2.0 * self.eta);
        self.k_l = self.k_l0 * (self.lma / self.lma_0).powf(-self.B4);
        self.k_s = self.k_s0 * (self.rho / self.rho_0).powf(-self.B5);
        self.integrator = Qag::from_control(&self.control);
        self.height_0 = self.seed_height()?;
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        let positive = [
            ("lma", self.lma),
            ("rho", self.rho),
            ("hmat", self.hmat),
            ("s", self.s),
            ("n_area", self.n_area),
            ("lma_0", self.lma_0),
            ("rho_0", self.rho_0),
            ("hmat_0", self.hmat_0),
            ("s_0", self.s_0),
            ("n_area_0", self.n_area_0),
            ("eta", self.eta),
            ("theta", self.theta),
            ("a1", self.a1),
            ("B1", self.B1),
            ("Y", self.Y),
            ("c_bio", self.c_bio),
            ("c_acc", self.c_acc),
        ];
        for (name, value) in positive {
            if !value.is_finite() || value <= 0.0 {
                return Err(TreeError::InvalidParameter(format!(
                    "{name} must be positive (got {value})"
                )));
            }
        }

        let non_negative = [
            ("a3", self.a3),
            ("b", self.b),
            ("k_l0", self.k_l0),
            ("k_s0", self.k_s0),
            ("k_b", self.k_b),
            ("k_r", self.k_r),
            ("c_Rs", self.c_Rs),
            ("c_Rb", self.c_Rb),
            ("c_Rr", self.c_Rr),
            ("c_Rl", self.c_Rl),
            ("c_p1", self.c_p1),
            ("c_p2", self.c_p2),
            ("c_r2", self.c_r2),
            ("c_s0", self.c_s0),
            ("c_d0", self.c_d0),
            ("c_d2", self.c_d2),
            ("c_d3", self.c_d3),
        ];
        for (name, value) in non_negative {
            if !value.is_finite() || value < 0.0 {
                return Err(TreeError::InvalidParameter(format!(
                    "{name} must be non-negative (got {value})"
                )));
            }
        }

        for (name, value) in [
            ("B4", self.B4),
            ("B5", self.B5),
            ("B6", self.B6),
            ("B7", self.B7),
            ("c_d1", self.c_d1),
        ] {
            if !value.is_finite() {
                return Err(TreeError::InvalidParameter(format!(
                    "{name} must be finite (got {value})"
                )));
            }
        }

        if !(0.0..=1.0).contains(&self.c_r1) {
            return Err(TreeError::InvalidParameter(format!(
                "c_r1 must lie in [0, 1] (got {})",
                self.c_r1
            )));
        }
        Ok(())
    }

    // Bisection for the height at which total mass equals seed mass.
    fn seed_height(&self) -> Result<f64> {
        let target = self.s;
        let mut lo = 0.0;
        let mut hi = 1.0;
        let mut doublings = 0;
        while self.mass_total(hi) < target {
            hi *= 2.0;
            doublings += 1;
            if doublings > 64 {
                return Err(TreeError::RootNotFound(format!(
                    "could not bracket the seed height for seed mass {target}"
                )));
            }
        }

        for _ in 0..self.control.plant_seed_iterations {
            let mid = 0.5 * (lo + hi);
            if self.mass_total(mid) < target {
                lo = mid;
            } else {
                hi = mid;
            }
            if hi - lo <= self.control.plant_seed_tol {
                return Ok(0.5 * (lo + hi));
            }
        }
        Err(TreeError::RootNotFound(format!(
            "seed height did not converge within {} iterations",
            self.control.plant_seed_iterations
        )))
    }

    // * Allometry

    pub(crate) fn leaf_area(&self, height: f64) -> f64 {
        (height / self.a1).powf(1.0 / self.B1)
    }

    pub(crate) fn mass_leaf(&self, leaf_area: f64) -> f64 {
        self.lma * leaf_area
    }

    pub(crate) fn mass_sapwood(&self, leaf_area: f64, height: f64) -> f64 {
        self.rho * self.eta_c * leaf_area * height / self.theta
    }

    pub(crate) fn mass_bark(&self, mass_sapwood: f64) -> f64 {
        self.b * mass_sapwood
    }

    pub(crate) fn mass_root(&self, leaf_area: f64) -> f64 {
        self.a3 * leaf_area
    }

    pub(crate) fn mass_total(&self, height: f64) -> f64 {
        let leaf_area = self.leaf_area(height);
        let sapwood = self.mass_sapwood(leaf_area, height);
        self.mass_leaf(leaf_area) + sapwood + self.mass_bark(sapwood) + self.mass_root(leaf_area)
    }

    /// Derivative of total mass with respect to height.
    pub(crate) fn dmass_dheight(&self, height: f64) -> f64 {
        let leaf_area = self.leaf_area(height);
        let dleaf_area = leaf_area / (self.B1 * height);
        let dsapwood = self.rho * self.eta_c / self.theta * (leaf_area + height * dleaf_area);
        self.lma * dleaf_area + dsapwood * (1.0 + self.b) + self.a3 * dleaf_area
    }

    /// Density of leaf area at height `z` in a crown of height `height`;
    /// integrates to one over `[0, height]`.
    pub(crate) fn leaf_density(&self, z: f64, height: f64) -> f64 {
        let x = z / height;
        let xe = x.powf(self.eta - 1.0);
        2.0 * self.eta * (1.0 - xe * x) * xe / height
    }

    // * Production

    fn assimilation_per_area(&self, openness: f64) -> f64 {
        self.c_p1 * openness / (openness + self.c_p2)
    }

    /// Gross assimilation of the whole plant (mol CO2 / yr).
    pub(crate) fn assimilation(
        &self,
        height: f64,
        leaf_area: f64,
        environment: &dyn Environment,
    ) -> Result<f64> {
        let per_area = if let Some(curve) = &self.assimilation_fn {
            curve.eval(height)
        } else if self.control.plant_assimilation_over_distribution {
            self.integrator.integrate(
                |z| {
                    self.leaf_density(z, height)
                        * self.assimilation_per_area(environment.canopy_openness(z))
                },
                0.0,
                height,
            )?
        } else {
            self.assimilation_per_area(environment.canopy_openness(height))
        };
        Ok(leaf_area * per_area)
    }

    pub(crate) fn respiration(
        &self,
        leaf_area: f64,
        mass_sapwood: f64,
        mass_bark: f64,
        mass_root: f64,
    ) -> f64 {
        self.c_Rl * self.n_area * leaf_area
            + self.c_Rs * mass_sapwood / self.rho
            + self.c_Rb * mass_bark / self.rho
            + self.c_Rr * mass_root
    }

    /// Net dry-mass production before turnover (kg / yr).
    pub(crate) fn production(&self, assimilation: f64, respiration: f64) -> f64 {
        self.Y * self.c_bio * (assimilation - respiration)
    }

    pub(crate) fn turnover(
        &self,
        mass_leaf: f64,
        mass_sapwood: f64,
        mass_bark: f64,
        mass_root: f64,
    ) -> f64 {
        self.k_l * mass_leaf + self.k_s * mass_sapwood + self.k_b * mass_bark + self.k_r * mass_root
    }

    // * Reproduction and mortality

    pub(crate) fn reproduction_fraction(&self, height: f64) -> f64 {
        self.c_r1 / (1.0 + (self.c_r2 * (1.0 - height / self.hmat)).exp())
    }

    /// Dry mass spent per seed, accessory costs included.
    pub(crate) fn seed_cost(&self) -> f64 {
        self.c_acc * self.s * (self.s / self.s_0).powf(self.B7 - 1.0)
    }

    pub(crate) fn mortality_rate(&self, height: f64, net_production: f64, leaf_area: f64) -> f64 {
        let structural = self.c_d0
            * (self.rho / self.rho_0).powf(-self.c_d1)
            * (height / self.hmat).powf(self.B6);
        let per_area = if leaf_area > 0.0 {
            net_production / leaf_area
        } else {
            0.0
        };
        structural + self.c_d2 * (-self.c_d3 * per_area).exp()
    }

    pub(crate) fn germination_probability(&self, net_production: f64, leaf_area: f64) -> f64 {
        if net_production <= 0.0 {
            0.0
        } else {
            let ratio = self.c_s0 * leaf_area / net_production;
            1.0 / (1.0 + ratio * ratio)
        }
    }
}
