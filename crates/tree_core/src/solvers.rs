use crate::error::Result;
use crate::traits::OdeTarget;

/// Cash–Karp embedded Runge–Kutta 4(5) stepper.
///
/// Produces the fifth-order solution together with the difference to the
/// embedded fourth-order one, which drives step-size control.
pub struct CashKarp {
    k2: Vec<f64>,
    k3: Vec<f64>,
    k4: Vec<f64>,
    k5: Vec<f64>,
    k6: Vec<f64>,
    tmp: Vec<f64>,
}

impl CashKarp {
    /// Order of the embedded (lower order) solution.
    pub const ORDER: u32 = 4;

    pub fn new(dim: usize) -> Self {
        Self {
            k2: vec![0.0; dim],
            k3: vec![0.0; dim],
            k4: vec![0.0; dim],
            k5: vec![0.0; dim],
            k6: vec![0.0; dim],
            tmp: vec![0.0; dim],
        }
    }

    pub fn dimension(&self) -> usize {
        self.tmp.len()
    }

    pub fn resize(&mut self, dim: usize) {
        for buffer in [
            &mut self.k2,
            &mut self.k3,
            &mut self.k4,
            &mut self.k5,
            &mut self.k6,
            &mut self.tmp,
        ] {
            buffer.clear();
            buffer.resize(dim, 0.0);
        }
    }

    /// Takes one step of size `dt` from `(t, y)` where `dydt` = f(t, y).
    ///
    /// Writes the new state to `y_out` and the error estimate to `y_err`.
    /// The target is left at an intermediate stage; callers must reset it.
    #[allow(clippy::too_many_arguments)]
    pub fn step<T: OdeTarget + ?Sized>(
        &mut self,
        target: &mut T,
        t: f64,
        y: &[f64],
        dydt: &[f64],
        dt: f64,
        y_out: &mut [f64],
        y_err: &mut [f64],
    ) -> Result<()> {
        const C2: f64 = 1.0 / 5.0;
        const C3: f64 = 3.0 / 10.0;
        const C4: f64 = 3.0 / 5.0;
        const C5: f64 = 1.0;
        const C6: f64 = 7.0 / 8.0;

        const A21: f64 = 1.0 / 5.0;
        const A31: f64 = 3.0 / 40.0;
        const A32: f64 = 9.0 / 40.0;
        const A41: f64 = 3.0 / 10.0;
        const A42: f64 = -9.0 / 10.0;
        const A43: f64 = 6.0 / 5.0;
        const A51: f64 = -11.0 / 54.0;
        const A52: f64 = 5.0 / 2.0;
        const A53: f64 = -70.0 / 27.0;
        const A54: f64 = 35.0 / 27.0;
        const A61: f64 = 1631.0 / 55296.0;
        const A62: f64 = 175.0 / 512.0;
        const A63: f64 = 575.0 / 13824.0;
        const A64: f64 = 44275.0 / 110592.0;
        const A65: f64 = 253.0 / 4096.0;

        // Fifth-order weights.
        const B1: f64 = 37.0 / 378.0;
        const B3: f64 = 250.0 / 621.0;
        const B4: f64 = 125.0 / 594.0;
        const B6: f64 = 512.0 / 1771.0;

        // Fifth minus fourth order weights.
        const E1: f64 = B1 - 2825.0 / 27648.0;
        const E3: f64 = B3 - 18575.0 / 48384.0;
        const E4: f64 = B4 - 13525.0 / 55296.0;
        const E5: f64 = -277.0 / 14336.0;
        const E6: f64 = B6 - 1.0 / 4.0;

        let n = y.len();
        if self.dimension() != n {
            self.resize(n);
        }
        let k1 = dydt;

        // k2
        for i in 0..n {
            self.tmp[i] = y[i] + dt * A21 * k1[i];
        }
        target.derivs(t + C2 * dt, &self.tmp, &mut self.k2)?;

        // k3
        for i in 0..n {
            self.tmp[i] = y[i] + dt * (A31 * k1[i] + A32 * self.k2[i]);
        }
        target.derivs(t + C3 * dt, &self.tmp, &mut self.k3)?;

        // k4
        for i in 0..n {
            self.tmp[i] = y[i] + dt * (A41 * k1[i] + A42 * self.k2[i] + A43 * self.k3[i]);
        }
        target.derivs(t + C4 * dt, &self.tmp, &mut self.k4)?;

        // k5
        for i in 0..n {
            self.tmp[i] = y[i]
                + dt * (A51 * k1[i] + A52 * self.k2[i] + A53 * self.k3[i] + A54 * self.k4[i]);
        }
        target.derivs(t + C5 * dt, &self.tmp, &mut self.k5)?;

        // k6
        for i in 0..n {
            self.tmp[i] = y[i]
                + dt * (A61 * k1[i]
                    + A62 * self.k2[i]
                    + A63 * self.k3[i]
                    + A64 * self.k4[i]
                    + A65 * self.k5[i]);
        }
        target.derivs(t + C6 * dt, &self.tmp, &mut self.k6)?;

        for i in 0..n {
            y_out[i] = y[i]
                + dt * (B1 * k1[i] + B3 * self.k3[i] + B4 * self.k4[i] + B6 * self.k6[i]);
            y_err[i] = dt
                * (E1 * k1[i]
                    + E3 * self.k3[i]
                    + E4 * self.k4[i]
                    + E5 * self.k5[i]
                    + E6 * self.k6[i]);
        }
        Ok(())
    }
}
