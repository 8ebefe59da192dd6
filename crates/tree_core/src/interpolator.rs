//! Natural cubic splines and an adaptive builder that places knots where a
//! sampled function is hard to follow.

use serde::{Deserialize, Serialize};

use crate::error::{Result, TreeError};

/// Natural cubic spline through a set of knots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interpolator {
    x: Vec<f64>,
    y: Vec<f64>,
    /// Second derivatives at the knots.
    m: Vec<f64>,
}

impl Interpolator {
    /// Fits a spline through `(x[i], y[i])`; `x` must be strictly increasing.
    pub fn new(x: Vec<f64>, y: Vec<f64>) -> Result<Self> {
        if x.len() != y.len() {
            return Err(TreeError::ShapeMismatch {
                what: "interpolator data",
                expected: format!("{} y values", x.len()),
                got: y.len().to_string(),
            });
        }
        if x.len() < 2 {
            return Err(TreeError::Interpolation(
                "at least two knots are required".into(),
            ));
        }
        if x.iter().chain(y.iter()).any(|v| !v.is_finite()) {
            return Err(TreeError::Interpolation("knots must be finite".into()));
        }
        if x.windows(2).any(|w| w[1] <= w[0]) {
            return Err(TreeError::Interpolation(
                "x values must be strictly increasing".into(),
            ));
        }
        let m = natural_second_derivatives(&x, &y);
        Ok(Self { x, y, m })
    }

    pub fn min(&self) -> f64 {
        self.x[0]
    }

    pub fn max(&self) -> f64 {
        self.x[self.x.len() - 1]
    }

    pub fn len(&self) -> usize {
        self.x.len()
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }

    pub fn x(&self) -> &[f64] {
        &self.x
    }

    pub fn y(&self) -> &[f64] {
        &self.y
    }

    /// Evaluates the spline; outside the knots the end segments are
    /// extended.
    pub fn eval(&self, u: f64) -> f64 {
        let n = self.x.len();
        let i = self
            .x
            .partition_point(|&xi| xi <= u)
            .saturating_sub(1)
            .min(n - 2);

        let h = self.x[i + 1] - self.x[i];
        let a = (self.x[i + 1] - u) / h;
        let b = (u - self.x[i]) / h;
        a * self.y[i]
            + b * self.y[i + 1]
            + ((a * a * a - a) * self.m[i] + (b * b * b - b) * self.m[i + 1]) * h * h / 6.0
    }
}

// Thomas algorithm on the tridiagonal system with M_0 = M_{n-1} = 0.
fn natural_second_derivatives(x: &[f64], y: &[f64]) -> Vec<f64> {
    let n = x.len();
    let mut m = vec![0.0; n];
    if n < 3 {
        return m;
    }

    let inner = n - 2;
    let mut diag = vec![0.0; inner];
    let mut upper = vec![0.0; inner];
    let mut rhs = vec![0.0; inner];
    for k in 0..inner {
        let i = k + 1;
        let h0 = x[i] - x[i - 1];
        let h1 = x[i + 1] - x[i];
        diag[k] = 2.0 * (h0 + h1);
        upper[k] = h1;
        rhs[k] = 6.0 * ((y[i + 1] - y[i]) / h1 - (y[i] - y[i - 1]) / h0);
    }

    for k in 1..inner {
        let lower = x[k + 1] - x[k];
        let w = lower / diag[k - 1];
        diag[k] -= w * upper[k - 1];
        rhs[k] -= w * rhs[k - 1];
    }

    m[inner] = rhs[inner - 1] / diag[inner - 1];
    for k in (0..inner - 1).rev() {
        m[k + 1] = (rhs[k] - upper[k] * m[k + 2]) / diag[k];
    }
    m
}

/// Builds splines for a vector-valued function, refining by bisection until
/// every interval midpoint is reproduced within tolerance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdaptiveSpline {
    pub tol_abs: f64,
    pub tol_rel: f64,
    pub n_initial: usize,
    pub max_points: usize,
}

impl AdaptiveSpline {
    /// Returns one spline per output component of `f`, all sharing knots.
    pub fn build<F>(&self, mut f: F, a: f64, b: f64) -> Result<Vec<Interpolator>>
    where
        F: FnMut(f64) -> Result<Vec<f64>>,
    {
        if !(a < b) {
            return Err(TreeError::Interpolation(format!(
                "invalid spline domain [{a}, {b}]"
            )));
        }
        let n = self.n_initial.max(2);
        let mut xs: Vec<f64> = (0..n)
            .map(|i| a + (b - a) * i as f64 / (n - 1) as f64)
            .collect();
        xs[n - 1] = b;
        let mut ys = xs.iter().map(|&x| f(x)).collect::<Result<Vec<_>>>()?;
        let width = ys[0].len();
        if ys.iter().any(|y| y.len() != width) {
            return Err(TreeError::Interpolation(
                "sampled function changed output length".into(),
            ));
        }

        loop {
            let splines = fit_components(&xs, &ys, width)?;

            let mut refined_x = Vec::with_capacity(2 * xs.len());
            let mut refined_y = Vec::with_capacity(2 * xs.len());
            let mut added = 0usize;
            for i in 0..xs.len() - 1 {
                refined_x.push(xs[i]);
                refined_y.push(ys[i].clone());

                let mid = 0.5 * (xs[i] + xs[i + 1]);
                let exact = f(mid)?;
                let acceptable = splines.iter().zip(&exact).all(|(spline, &target)| {
                    (spline.eval(mid) - target).abs()
                        <= self.tol_abs + self.tol_rel * target.abs()
                });
                if !acceptable {
                    refined_x.push(mid);
                    refined_y.push(exact);
                    added += 1;
                }
            }
            refined_x.push(xs[xs.len() - 1]);
            refined_y.push(ys[ys.len() - 1].clone());

            if added == 0 {
                return Ok(splines);
            }
            if refined_x.len() > self.max_points {
                return Err(TreeError::Interpolation(format!(
                    "spline refinement needs more than {} points",
                    self.max_points
                )));
            }
            xs = refined_x;
            ys = refined_y;
        }
    }
}

fn fit_components(xs: &[f64], ys: &[Vec<f64>], width: usize) -> Result<Vec<Interpolator>> {
    (0..width)
        .map(|j| Interpolator::new(xs.to_vec(), ys.iter().map(|y| y[j]).collect()))
        .collect()
}
