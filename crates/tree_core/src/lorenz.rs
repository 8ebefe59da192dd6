//! The Lorenz system, a small known target for exercising the ODE solver.

use crate::error::{Result, TreeError};
use crate::traits::OdeTarget;

#[derive(Debug, Clone, PartialEq)]
pub struct Lorenz {
    sigma: f64,
    r: f64,
    b: f64,
    y: [f64; 3],
    dydt: [f64; 3],
}

impl Lorenz {
    pub fn new(sigma: f64, r: f64, b: f64) -> Self {
        let mut system = Self {
            sigma,
            r,
            b,
            y: [0.0; 3],
            dydt: [0.0; 3],
        };
        system.compute_rates();
        system
    }

    /// `[sigma, R, b]`.
    pub fn pars(&self) -> [f64; 3] {
        [self.sigma, self.r, self.b]
    }

    fn compute_rates(&mut self) {
        let [y0, y1, y2] = self.y;
        self.dydt = [
            self.sigma * (y1 - y0),
            self.r * y0 - y1 - y0 * y2,
            -self.b * y2 + y0 * y1,
        ];
    }
}

impl Default for Lorenz {
    /// The classic chaotic parameter set.
    fn default() -> Self {
        Self::new(10.0, 28.0, 8.0 / 3.0)
    }
}

impl OdeTarget for Lorenz {
    fn ode_size(&self) -> usize {
        3
    }

    fn ode_values<'a>(&self, out: &'a mut [f64]) -> &'a mut [f64] {
        let (head, rest) = out.split_at_mut(3);
        head.copy_from_slice(&self.y);
        rest
    }

    fn ode_values_set<'a>(&mut self, values: &'a [f64]) -> Result<&'a [f64]> {
        if values.len() < 3 {
            return Err(TreeError::ShapeMismatch {
                what: "Lorenz state",
                expected: "3 values".into(),
                got: values.len().to_string(),
            });
        }
        let (head, rest) = values.split_at(3);
        self.y.copy_from_slice(head);
        self.compute_rates();
        Ok(rest)
    }

    fn ode_rates<'a>(&self, out: &'a mut [f64]) -> &'a mut [f64] {
        let (head, rest) = out.split_at_mut(3);
        head.copy_from_slice(&self.dydt);
        rest
    }
}
