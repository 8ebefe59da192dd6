use crate::error::{Result, TreeError};

/// Anything the ODE solver can drive: a flat state vector plus its
/// derivative.
///
/// Aggregates (plants, species, patches, the metacommunity) implement this by
/// concatenating their parts in a fixed order. Each method consumes the front
/// of the slice it is given and returns the unused remainder, so nested
/// implementations can be chained.
pub trait OdeTarget {
    /// Length of the state vector.
    fn ode_size(&self) -> usize;

    /// Copies the current state into the front of `out`.
    fn ode_values<'a>(&self, out: &'a mut [f64]) -> &'a mut [f64];

    /// Overwrites the state from the front of `values`, refreshing any
    /// cached rates that depend on it.
    fn ode_values_set<'a>(&mut self, values: &'a [f64]) -> Result<&'a [f64]>;

    /// Copies the rates for the current state into the front of `out`.
    fn ode_rates<'a>(&self, out: &'a mut [f64]) -> &'a mut [f64];

    /// Evaluates `dy/dt` at `(time, y)`, leaving the target at state `y`.
    fn derivs(&mut self, _time: f64, y: &[f64], dydt: &mut [f64]) -> Result<()> {
        let size = self.ode_size();
        TreeError::check_length("ODE state", y.len(), size)?;
        TreeError::check_length("ODE rates", dydt.len(), size)?;
        self.ode_values_set(y)?;
        self.ode_rates(dydt);
        Ok(())
    }

    fn ode_values_vec(&self) -> Vec<f64> {
        let mut out = vec![0.0; self.ode_size()];
        self.ode_values(&mut out);
        out
    }

    fn ode_rates_vec(&self) -> Vec<f64> {
        let mut out = vec![0.0; self.ode_size()];
        self.ode_rates(&mut out);
        out
    }
}
