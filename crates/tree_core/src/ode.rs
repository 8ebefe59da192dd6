//! Adaptive ODE integration over any [`OdeTarget`].
//!
//! [`Solver`] keeps the time, the state vector and the step size between
//! calls but does not own the system it integrates; the system is passed in
//! on every call so that an aggregate can own its own solver.
//! [`OdeSystem`] bundles a target with a solver for standalone use.

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::control::Control;
use crate::error::{Result, TreeError};
use crate::solvers::CashKarp;
use crate::traits::OdeTarget;

/// Step-size controller: the classic scaled-error test.
///
/// Component `i` is acceptable when `|err_i| <= tol_abs + tol_rel *
/// (a_y |y_i| + a_dydt h |dy_i/dt|)`, up to a slack of
/// [`OdeControl::ACCEPT_SLACK`]: a step is kept while the largest ratio of
/// error to scale stays at or below 1.1.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OdeControl {
    pub tol_abs: f64,
    pub tol_rel: f64,
    pub a_y: f64,
    pub a_dydt: f64,
    pub step_size_min: f64,
    pub step_size_max: f64,
}

impl OdeControl {
    const SAFETY: f64 = 0.9;
    /// Largest error-to-scale ratio still accepted. Steps that miss the
    /// tolerance by under 10% are kept rather than retried.
    pub const ACCEPT_SLACK: f64 = 1.1;
    // Order of the propagated (fifth-order) solution.
    const ORDER: f64 = (CashKarp::ORDER + 1) as f64;

    pub fn from_control(control: &Control) -> Self {
        Self {
            tol_abs: control.ode_tol_abs,
            tol_rel: control.ode_tol_rel,
            a_y: control.ode_a_y,
            a_dydt: control.ode_a_dydt,
            step_size_min: control.ode_step_size_min,
            step_size_max: control.ode_step_size_max,
        }
    }

    /// Largest ratio of error to allowed error over all components.
    pub fn error_ratio(&self, y: &[f64], y_err: &[f64], dydt: &[f64], h: f64) -> f64 {
        y.iter()
            .zip(y_err)
            .zip(dydt)
            .map(|((yi, ei), di)| {
                let scale =
                    self.tol_abs + self.tol_rel * (self.a_y * yi.abs() + self.a_dydt * h * di.abs());
                ei.abs() / scale
            })
            .fold(0.0, f64::max)
    }

    /// Whether a step with error ratio `ratio` is kept; see
    /// [`ACCEPT_SLACK`](Self::ACCEPT_SLACK).
    pub fn accepts(&self, ratio: f64) -> bool {
        ratio <= Self::ACCEPT_SLACK
    }

    /// Step size to retry with after a rejected step.
    pub fn shrink(&self, h: f64, ratio: f64) -> f64 {
        h * (Self::SAFETY * ratio.powf(-1.0 / Self::ORDER)).max(0.2)
    }

    /// Step size to continue with after an accepted step.
    pub fn grow(&self, h: f64, ratio: f64) -> f64 {
        let next = if ratio < 0.5 {
            h * (Self::SAFETY * ratio.powf(-1.0 / (Self::ORDER + 1.0))).min(5.0)
        } else {
            h
        };
        next.min(self.step_size_max)
    }
}

/// States visited by [`Solver::advance_save`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Trajectory {
    pub times: Vec<f64>,
    pub states: Vec<Vec<f64>>,
}

impl Trajectory {
    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    fn push(&mut self, time: f64, state: &[f64]) {
        self.times.push(time);
        self.states.push(state.to_vec());
    }
}

pub struct Solver {
    control: OdeControl,
    step_size_initial: f64,
    max_retries: usize,
    stepper: CashKarp,
    time: f64,
    step_size: f64,
    y: Vec<f64>,
    dydt: Vec<f64>,
    y_out: Vec<f64>,
    y_err: Vec<f64>,
}

impl Solver {
    pub fn new(control: &Control) -> Self {
        let ode_control = OdeControl::from_control(control);
        let step_size_initial = control
            .ode_step_size_initial
            .clamp(ode_control.step_size_min, ode_control.step_size_max);
        Self {
            control: ode_control,
            step_size_initial,
            max_retries: control.ode_max_retries,
            stepper: CashKarp::new(0),
            time: 0.0,
            step_size: step_size_initial,
            y: Vec::new(),
            dydt: Vec::new(),
            y_out: Vec::new(),
            y_err: Vec::new(),
        }
    }

    pub fn time(&self) -> f64 {
        self.time
    }

    pub fn set_time(&mut self, time: f64) {
        self.time = time;
    }

    pub fn state(&self) -> &[f64] {
        &self.y
    }

    /// Step size the next adaptive step will start from.
    pub fn step_size(&self) -> f64 {
        self.step_size
    }

    pub fn control(&self) -> &OdeControl {
        &self.control
    }

    /// Replaces the state; the step size carries over.
    pub fn set_state(&mut self, y: Vec<f64>, time: f64) {
        let n = y.len();
        self.y = y;
        self.time = time;
        for buffer in [&mut self.dydt, &mut self.y_out, &mut self.y_err] {
            buffer.clear();
            buffer.resize(n, 0.0);
        }
        self.stepper.resize(n);
    }

    /// Back to time zero, an empty state and the initial step size.
    pub fn reset(&mut self) {
        self.set_state(Vec::new(), 0.0);
        self.step_size = self.step_size_initial;
    }

    /// One adaptive step; returns the size of the accepted step.
    pub fn step<T: OdeTarget + ?Sized>(&mut self, target: &mut T) -> Result<f64> {
        self.adaptive_step(target, f64::INFINITY, f64::INFINITY)
    }

    /// One step of exactly `dt` without error control.
    pub fn step_fixed<T: OdeTarget + ?Sized>(&mut self, target: &mut T, dt: f64) -> Result<()> {
        self.check_target(target)?;
        target.derivs(self.time, &self.y, &mut self.dydt)?;
        if let Err(err) = self.attempt(target, dt) {
            target.ode_values_set(&self.y)?;
            return Err(err);
        }
        self.commit(target, dt)
    }

    /// Tries a step of exactly `dt`; keeps it only if it meets the
    /// tolerance.
    pub fn try_step<T: OdeTarget + ?Sized>(&mut self, target: &mut T, dt: f64) -> Result<bool> {
        self.check_target(target)?;
        target.derivs(self.time, &self.y, &mut self.dydt)?;
        let ratio = self.attempt(target, dt)?;
        if self.control.accepts(ratio) {
            self.commit(target, dt)?;
            Ok(true)
        } else {
            target.ode_values_set(&self.y)?;
            Ok(false)
        }
    }

    /// Steps adaptively until `time`, never taking a step longer than `dt`
    /// when one is given.
    pub fn advance<T: OdeTarget + ?Sized>(
        &mut self,
        target: &mut T,
        time: f64,
        dt: Option<f64>,
    ) -> Result<()> {
        self.advance_inner(target, time, dt, None)
    }

    /// Like [`advance`](Self::advance), recording every accepted state
    /// including the starting one.
    pub fn advance_save<T: OdeTarget + ?Sized>(
        &mut self,
        target: &mut T,
        time: f64,
        dt: Option<f64>,
    ) -> Result<Trajectory> {
        let mut trajectory = Trajectory::default();
        trajectory.push(self.time, &self.y);
        self.advance_inner(target, time, dt, Some(&mut trajectory))?;
        Ok(trajectory)
    }

    fn advance_inner<T: OdeTarget + ?Sized>(
        &mut self,
        target: &mut T,
        time: f64,
        dt: Option<f64>,
        mut trajectory: Option<&mut Trajectory>,
    ) -> Result<()> {
        if !time.is_finite() || time < self.time {
            return Err(TreeError::InvalidParameter(format!(
                "cannot advance from t = {} to t = {time}",
                self.time
            )));
        }
        if let Some(dt) = dt {
            if !(dt > 0.0) {
                return Err(TreeError::InvalidParameter(format!(
                    "maximum step dt must be positive (got {dt})"
                )));
            }
        }

        let max_step = dt.unwrap_or(f64::INFINITY);
        while self.time < time {
            self.adaptive_step(target, max_step, time)?;
            if let Some(trajectory) = trajectory.as_deref_mut() {
                trajectory.push(self.time, &self.y);
            }
        }
        Ok(())
    }

    fn adaptive_step<T: OdeTarget + ?Sized>(
        &mut self,
        target: &mut T,
        max_step: f64,
        stop: f64,
    ) -> Result<f64> {
        self.check_target(target)?;
        target.derivs(self.time, &self.y, &mut self.dydt)?;

        let limit = max_step.min(stop - self.time);
        let limited = self.step_size >= limit;
        let mut h = self.step_size.min(limit);

        for retry in 0..=self.max_retries {
            let ratio = match self.attempt(target, h) {
                Ok(ratio) => ratio,
                Err(err) => {
                    target.ode_values_set(&self.y)?;
                    return Err(err);
                }
            };

            if self.control.accepts(ratio) {
                let reached_stop = limited && h == limit && limit == stop - self.time;
                let next = self.control.grow(h, ratio);
                self.commit(target, h)?;
                if reached_stop {
                    self.time = stop;
                }
                self.step_size = if limited { self.step_size.max(next) } else { next };
                return Ok(h);
            }

            let shrunk = self.control.shrink(h, ratio);
            trace!(time = self.time, h, ratio, retry, "rejected ODE step");
            if shrunk < self.control.step_size_min {
                target.ode_values_set(&self.y)?;
                return Err(TreeError::StepFailure {
                    time: self.time,
                    step_size: shrunk,
                    reason: format!(
                        "step size fell below minimum {}",
                        self.control.step_size_min
                    ),
                });
            }
            h = shrunk;
        }

        target.ode_values_set(&self.y)?;
        Err(TreeError::StepFailure {
            time: self.time,
            step_size: h,
            reason: format!("no acceptable step after {} retries", self.max_retries),
        })
    }

    // Runs the stepper from the current state; returns the error ratio.
    fn attempt<T: OdeTarget + ?Sized>(&mut self, target: &mut T, h: f64) -> Result<f64> {
        self.stepper.step(
            target,
            self.time,
            &self.y,
            &self.dydt,
            h,
            &mut self.y_out,
            &mut self.y_err,
        )?;
        if self.y_out.iter().any(|v| !v.is_finite()) {
            return Ok(f64::INFINITY);
        }
        Ok(self.control.error_ratio(&self.y, &self.y_err, &self.dydt, h))
    }

    fn commit<T: OdeTarget + ?Sized>(&mut self, target: &mut T, h: f64) -> Result<()> {
        std::mem::swap(&mut self.y, &mut self.y_out);
        self.time += h;
        target.ode_values_set(&self.y)?;
        Ok(())
    }

    fn check_target<T: OdeTarget + ?Sized>(&self, target: &T) -> Result<()> {
        TreeError::check_length("solver state", self.y.len(), target.ode_size())
    }
}

/// A target bundled with its own solver.
pub struct OdeSystem<T: OdeTarget> {
    obj: T,
    solver: Solver,
}

impl<T: OdeTarget> OdeSystem<T> {
    pub fn new(obj: T, control: &Control) -> Self {
        let mut solver = Solver::new(control);
        solver.set_state(obj.ode_values_vec(), 0.0);
        Self { obj, solver }
    }

    /// Uses the given tolerances and otherwise default settings.
    pub fn with_tolerances(obj: T, tol_abs: f64, tol_rel: f64) -> Self {
        let control = Control {
            ode_tol_abs: tol_abs,
            ode_tol_rel: tol_rel,
            ..Control::default()
        };
        Self::new(obj, &control)
    }

    pub fn obj(&self) -> &T {
        &self.obj
    }

    pub fn into_inner(self) -> T {
        self.obj
    }

    pub fn solver(&self) -> &Solver {
        &self.solver
    }

    pub fn t(&self) -> f64 {
        self.solver.time()
    }

    pub fn set_t(&mut self, t: f64) {
        self.solver.set_time(t);
    }

    pub fn y(&self) -> &[f64] {
        self.solver.state()
    }

    pub fn set_y(&mut self, y: Vec<f64>) -> Result<()> {
        TreeError::check_length("state", y.len(), self.obj.ode_size())?;
        self.obj.ode_values_set(&y)?;
        let t = self.solver.time();
        self.solver.set_state(y, t);
        Ok(())
    }

    pub fn do_step(&mut self, dt: f64) -> Result<()> {
        self.solver.step_fixed(&mut self.obj, dt)
    }

    pub fn step(&mut self) -> Result<f64> {
        self.solver.step(&mut self.obj)
    }

    pub fn try_step(&mut self, dt: f64) -> Result<bool> {
        self.solver.try_step(&mut self.obj, dt)
    }

    pub fn advance(&mut self, t: f64, dt: Option<f64>) -> Result<()> {
        self.solver.advance(&mut self.obj, t, dt)
    }

    pub fn advance_save(&mut self, t: f64, dt: Option<f64>) -> Result<Trajectory> {
        self.solver.advance_save(&mut self.obj, t, dt)
    }
}

#[cfg(test)]
mod tests {
    use super::{OdeControl, OdeSystem, Solver};
    use crate::control::Control;
    use crate::error::{Result, TreeError};
    use crate::lorenz::Lorenz;
    use crate::traits::OdeTarget;

    /// dy/dt = -rate * y, one component per rate.
    #[derive(Debug, Clone)]
    struct Decay {
        rates: Vec<f64>,
        y: Vec<f64>,
    }

    impl OdeTarget for Decay {
        fn ode_size(&self) -> usize {
            self.y.len()
        }

        fn ode_values<'a>(&self, out: &'a mut [f64]) -> &'a mut [f64] {
            let (head, rest) = out.split_at_mut(self.y.len());
            head.copy_from_slice(&self.y);
            rest
        }

        fn ode_values_set<'a>(&mut self, values: &'a [f64]) -> Result<&'a [f64]> {
            let (head, rest) = values.split_at(self.y.len());
            self.y.copy_from_slice(head);
            Ok(rest)
        }

        fn ode_rates<'a>(&self, out: &'a mut [f64]) -> &'a mut [f64] {
            let (head, rest) = out.split_at_mut(self.y.len());
            for ((d, y), r) in head.iter_mut().zip(&self.y).zip(&self.rates) {
                *d = -r * y;
            }
            rest
        }
    }

    fn decay(rates: &[f64]) -> Decay {
        Decay {
            rates: rates.to_vec(),
            y: vec![1.0; rates.len()],
        }
    }

    fn tight() -> Control {
        Control {
            ode_tol_abs: 1e-10,
            ode_tol_rel: 1e-10,
            ..Control::default()
        }
    }

    #[test]
    fn advance_matches_exponential_decay() {
        let mut system = OdeSystem::new(decay(&[0.5, 2.0]), &tight());
        system.advance(3.0, None).expect("advance should succeed");
        assert_eq!(system.t(), 3.0);
        assert!((system.y()[0] - (-1.5_f64).exp()).abs() < 1e-8);
        assert!((system.y()[1] - (-6.0_f64).exp()).abs() < 1e-8);
        assert_eq!(system.obj().y, system.y());
    }

    #[test]
    fn adaptive_step_grows_on_easy_problems() {
        let mut system = OdeSystem::new(decay(&[0.1]), &Control::default());
        let first = system.step().expect("step should succeed");
        let second = system.step().expect("step should succeed");
        assert!(second > first);
        assert!((system.t() - (first + second)).abs() < 1e-15);
    }

    #[test]
    fn advance_save_respects_maximum_step() {
        let mut system = OdeSystem::new(decay(&[1.0]), &Control::default());
        let trajectory = system.advance_save(1.0, Some(0.1)).expect("advance");
        assert!(trajectory.len() >= 11);
        assert_eq!(trajectory.times[0], 0.0);
        assert_eq!(trajectory.states[0], vec![1.0]);
        assert_eq!(trajectory.times.last().copied(), Some(1.0));
        for pair in trajectory.times.windows(2) {
            assert!(pair[1] > pair[0]);
            assert!(pair[1] - pair[0] <= 0.1 + 1e-12);
        }
    }

    #[test]
    fn try_step_rejects_oversized_steps_without_moving() {
        let mut system = OdeSystem::new(decay(&[50.0]), &tight());
        let accepted = system.try_step(0.5).expect("try_step should run");
        assert!(!accepted);
        assert_eq!(system.t(), 0.0);
        assert_eq!(system.y(), &[1.0]);
        assert_eq!(system.obj().y, vec![1.0]);

        assert!(system.try_step(1e-6).expect("try_step should run"));
        assert_eq!(system.t(), 1e-6);
    }

    #[test]
    fn do_step_always_accepts() {
        let mut system = OdeSystem::new(decay(&[1.0]), &Control::default());
        system.do_step(0.25).expect("fixed step");
        assert_eq!(system.t(), 0.25);
        assert!((system.y()[0] - (-0.25_f64).exp()).abs() < 1e-6);
    }

    #[test]
    fn exhausted_retries_fail_and_restore_state() {
        let control = Control {
            ode_tol_abs: 1e-12,
            ode_tol_rel: 1e-12,
            ode_step_size_initial: 1.0,
            ode_max_retries: 1,
            ..Control::default()
        };
        let mut system = OdeSystem::new(decay(&[100.0]), &control);
        let err = system.step().expect_err("stiff decay should not fit two retries");
        assert!(matches!(err, TreeError::StepFailure { .. }));
        assert_eq!(system.t(), 0.0);
        assert_eq!(system.obj().y, vec![1.0]);
    }

    #[test]
    fn advance_rejects_going_backwards() {
        let mut system = OdeSystem::new(decay(&[1.0]), &Control::default());
        system.set_t(2.0);
        assert!(system.advance(1.0, None).is_err());
        assert!(system.advance(3.0, Some(0.0)).is_err());
    }

    #[test]
    fn solver_checks_target_size() {
        let mut solver = Solver::new(&Control::default());
        solver.set_state(vec![1.0], 0.0);
        let mut target = decay(&[1.0, 1.0]);
        assert!(matches!(
            solver.step(&mut target),
            Err(TreeError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn lorenz_trajectory_is_reproducible() {
        let start = vec![1.0, 1.0, 1.0];
        let mut a = OdeSystem::with_tolerances(Lorenz::default(), 1e-8, 1e-8);
        let mut b = OdeSystem::with_tolerances(Lorenz::default(), 1e-8, 1e-8);
        a.set_y(start.clone()).expect("set state");
        b.set_y(start).expect("set state");
        a.advance(1.0, None).expect("advance");
        b.advance(0.5, None).expect("advance");
        b.advance(1.0, None).expect("advance");
        for (x, y) in a.y().iter().zip(b.y()) {
            assert!((x - y).abs() < 1e-4);
        }
        assert_eq!(a.obj().ode_values_vec(), a.y());
    }

    #[test]
    fn controller_bounds_step_changes() {
        let control = OdeControl::from_control(&Control::default());
        assert_eq!(control.shrink(1.0, 1e12), 0.2);
        assert!(control.grow(0.1, 0.0) <= 0.5);
        assert_eq!(control.grow(0.9, 0.0), 1.0);
        assert_eq!(control.grow(0.1, 0.8), 0.1);
        let ratio = control.error_ratio(&[1.0, 0.0], &[1e-6, 1e-6], &[0.0, 0.0], 0.1);
        assert!((ratio - 1.0).abs() < 1e-9);
    }

    #[test]
    fn acceptance_allows_a_tenth_over_tolerance() {
        let control = OdeControl::from_control(&Control::default());
        assert!(control.accepts(1.0));
        assert!(control.accepts(1.1));
        assert!(!control.accepts(1.1 + 1e-9));
        assert!(!control.accepts(f64::NAN));
        // 5% over the absolute tolerance
        let ratio = control.error_ratio(&[0.0], &[1.05e-6], &[0.0], 0.1);
        assert!(ratio > 1.0 && control.accepts(ratio));
    }
}
