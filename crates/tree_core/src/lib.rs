pub mod control;
pub mod environment;
pub mod error;
pub mod interpolator;
pub mod lookup;
pub mod lorenz;
pub mod metacommunity;
pub mod ode;
pub mod parameters;
pub mod patch;
pub mod plant;
pub mod plant_spline;
pub mod quadrature;
pub mod solvers;
pub mod species;
pub mod strategy;
#[cfg(test)]
mod testing;
/// The `tree_core` crate simulates plant metacommunities: individual plants
/// grow continuously under an adaptive ODE solver, while deaths and seed
/// dispersal happen as discrete random events between solver steps.
///
/// Key components:
/// - **Traits**: `OdeTarget`, the flat state/rate surface every level of the
///   community exposes to the solver.
/// - **Lookup**: named access to the numeric fields of `Strategy` and `Control`.
/// - **Plants**: `Strategy` (traits and physiology), `Plant` (exact or
///   spline-approximated rates), `Species`, `Patch`, `Metacommunity`.
/// - **Numerics**: Cash–Karp stepper, adaptive Gauss–Kronrod quadrature,
///   natural cubic splines.
pub mod traits;

pub use control::Control;
pub use environment::{Environment, FixedEnvironment, LightEnvironment};
pub use error::{Result, TreeError};
pub use lookup::{ParameterMap, ParameterTable};
pub use metacommunity::Metacommunity;
pub use parameters::{IndividualKind, Parameters, ParametersSettings};
pub use patch::Patch;
pub use plant::{Plant, PlantVars, RateModel};
pub use strategy::Strategy;
pub use traits::OdeTarget;
