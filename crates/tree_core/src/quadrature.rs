//! Adaptive Gauss–Kronrod quadrature.
//!
//! Each interval is estimated with the 7-point Gauss rule and the 15-point
//! Kronrod extension that shares its nodes; their difference is the error
//! estimate. The adaptive driver keeps bisecting the interval with the
//! largest error until the summed error meets the tolerance or the
//! subdivision budget runs out.

use serde::{Deserialize, Serialize};

use crate::control::Control;
use crate::error::{Result, TreeError};

// Kronrod abscissae on [-1, 1], positive half; odd indices are Gauss nodes.
const XGK: [f64; 8] = [
    0.991_455_371_120_812_6,
    0.949_107_912_342_758_5,
    0.864_864_423_359_769_1,
    0.741_531_185_599_394_4,
    0.586_087_235_467_691_1,
    0.405_845_151_377_397_2,
    0.207_784_955_007_898_5,
    0.0,
];

const WGK: [f64; 8] = [
    0.022_935_322_010_529_22,
    0.063_092_092_629_978_55,
    0.104_790_010_322_250_18,
    0.140_653_259_715_525_92,
    0.169_004_726_639_267_9,
    0.190_350_578_064_785_4,
    0.204_432_940_075_298_9,
    0.209_482_141_084_727_83,
];

// Gauss weights for XGK[1], XGK[3], XGK[5], XGK[7].
const WG: [f64; 4] = [
    0.129_484_966_168_869_7,
    0.279_705_391_489_276_7,
    0.381_830_050_505_118_9,
    0.417_959_183_673_469_4,
];

#[derive(Debug, Clone, Copy, PartialEq)]
struct Segment {
    a: f64,
    b: f64,
    area: f64,
    error: f64,
}

/// Estimate of `∫_a^b f` from the paired rule, with its error.
fn gauss_kronrod<F: FnMut(f64) -> f64>(f: &mut F, a: f64, b: f64) -> Segment {
    let center = 0.5 * (a + b);
    let half = 0.5 * (b - a);

    let f_center = f(center);
    let mut kronrod = WGK[7] * f_center;
    let mut gauss = WG[3] * f_center;

    for j in 0..7 {
        let dx = half * XGK[j];
        let pair = f(center - dx) + f(center + dx);
        kronrod += WGK[j] * pair;
        if j % 2 == 1 {
            gauss += WG[j / 2] * pair;
        }
    }

    Segment {
        a,
        b,
        area: kronrod * half,
        error: ((kronrod - gauss) * half).abs(),
    }
}

/// Adaptive integrator configured once and reused for many integrands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Qag {
    tol_abs: f64,
    tol_rel: f64,
    max_intervals: usize,
    adaptive: bool,
    #[serde(skip)]
    last_area: f64,
    #[serde(skip)]
    last_error: f64,
    #[serde(skip)]
    last_iterations: usize,
    #[serde(skip)]
    last_intervals: Vec<(f64, f64)>,
}

impl Qag {
    pub fn new(tol_abs: f64, tol_rel: f64, max_intervals: usize) -> Self {
        Self {
            tol_abs,
            tol_rel,
            max_intervals: max_intervals.max(1),
            adaptive: true,
            last_area: 0.0,
            last_error: 0.0,
            last_iterations: 0,
            last_intervals: Vec::new(),
        }
    }

    /// A single Kronrod evaluation with no subdivision.
    pub fn non_adaptive() -> Self {
        Self {
            adaptive: false,
            ..Self::new(f64::INFINITY, f64::INFINITY, 1)
        }
    }

    pub fn from_control(control: &Control) -> Self {
        if control.plant_assimilation_adaptive {
            Self::new(
                control.plant_assimilation_tol_abs,
                control.plant_assimilation_tol_rel,
                control.plant_assimilation_iterations,
            )
        } else {
            Self::non_adaptive()
        }
    }

    pub fn is_adaptive(&self) -> bool {
        self.adaptive
    }

    pub fn last_area(&self) -> f64 {
        self.last_area
    }

    pub fn last_error(&self) -> f64 {
        self.last_error
    }

    /// Number of subdivisions performed by the most recent call.
    pub fn last_iterations(&self) -> usize {
        self.last_iterations
    }

    /// Final partition of the most recent call, sorted by left endpoint.
    pub fn last_intervals(&self) -> &[(f64, f64)] {
        &self.last_intervals
    }

    /// Integrates `f` over `[a, b]` and records diagnostics.
    pub fn integrate_recording<F: FnMut(f64) -> f64>(
        &mut self,
        f: F,
        a: f64,
        b: f64,
    ) -> Result<f64> {
        let (area, error, iterations, mut segments) = self.run(f, a, b)?;
        segments.sort_by(|x, y| x.a.total_cmp(&y.a));
        self.last_area = area;
        self.last_error = error;
        self.last_iterations = iterations;
        self.last_intervals = segments.iter().map(|s| (s.a, s.b)).collect();
        Ok(area)
    }

    /// Integrates `f` over `[a, b]` without touching the diagnostics, so a
    /// shared integrator can be used behind `&self`.
    pub fn integrate<F: FnMut(f64) -> f64>(&self, f: F, a: f64, b: f64) -> Result<f64> {
        self.run(f, a, b).map(|(area, ..)| area)
    }

    fn run<F: FnMut(f64) -> f64>(
        &self,
        mut f: F,
        a: f64,
        b: f64,
    ) -> Result<(f64, f64, usize, Vec<Segment>)> {
        if a == b {
            return Ok((0.0, 0.0, 0, Vec::new()));
        }

        let first = gauss_kronrod(&mut f, a, b);
        if !first.area.is_finite() || !first.error.is_finite() {
            return Err(TreeError::Integration {
                intervals: 1,
                estimate: first.area,
                error: first.error,
            });
        }
        if !self.adaptive {
            return Ok((first.area, first.error, 0, vec![first]));
        }

        let mut segments = vec![first];
        let mut area = first.area;
        let mut error = first.error;
        let mut iterations = 0usize;

        while error > self.tolerance(area) {
            if segments.len() >= self.max_intervals {
                return Err(TreeError::Integration {
                    intervals: segments.len(),
                    estimate: area,
                    error,
                });
            }

            let worst = segments
                .iter()
                .enumerate()
                .max_by(|x, y| x.1.error.total_cmp(&y.1.error))
                .map(|(i, _)| i)
                .unwrap_or(0);
            let parent = segments.swap_remove(worst);
            let mid = 0.5 * (parent.a + parent.b);
            let left = gauss_kronrod(&mut f, parent.a, mid);
            let right = gauss_kronrod(&mut f, mid, parent.b);

            area += left.area + right.area - parent.area;
            error += left.error + right.error - parent.error;
            segments.push(left);
            segments.push(right);
            iterations += 1;

            if !area.is_finite() || !error.is_finite() {
                return Err(TreeError::Integration {
                    intervals: segments.len(),
                    estimate: area,
                    error,
                });
            }
        }

        // Re-sum to shed the drift from incremental updates.
        let area: f64 = segments.iter().map(|s| s.area).sum();
        let error: f64 = segments.iter().map(|s| s.error).sum();
        Ok((area, error, iterations, segments))
    }

    fn tolerance(&self, area: f64) -> f64 {
        self.tol_abs.max(self.tol_rel * area.abs())
    }
}
