//! The light environment seen by plants in a patch.

use std::fmt::Debug;

use crate::error::{Result, TreeError};
use crate::interpolator::Interpolator;

/// Resource signal as a function of height.
///
/// Implementations are supplied from outside the simulation core; the core
/// only reads them.
pub trait Environment: Debug + Send + Sync {
    /// Fraction of full light reaching `height`, in `[0, 1]`.
    fn canopy_openness(&self, height: f64) -> f64;
}

/// The same light level at every height.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FixedEnvironment {
    openness: f64,
}

impl FixedEnvironment {
    pub fn new(openness: f64) -> Result<Self> {
        if !(0.0..=1.0).contains(&openness) {
            return Err(TreeError::InvalidParameter(format!(
                "canopy openness must lie in [0, 1] (got {openness})"
            )));
        }
        Ok(Self { openness })
    }

    pub fn full_light() -> Self {
        Self { openness: 1.0 }
    }
}

impl Default for FixedEnvironment {
    fn default() -> Self {
        Self::full_light()
    }
}

impl Environment for FixedEnvironment {
    fn canopy_openness(&self, _height: f64) -> f64 {
        self.openness
    }
}

/// Openness interpolated from a height profile.
///
/// Above the tallest knot the canopy is open; below the lowest knot the
/// lowest value holds.
#[derive(Debug, Clone, PartialEq)]
pub struct LightEnvironment {
    profile: Interpolator,
}

impl LightEnvironment {
    pub fn new(heights: Vec<f64>, openness: Vec<f64>) -> Result<Self> {
        if openness.iter().any(|e| !(0.0..=1.0).contains(e)) {
            return Err(TreeError::InvalidParameter(
                "canopy openness must lie in [0, 1]".into(),
            ));
        }
        Ok(Self {
            profile: Interpolator::new(heights, openness)?,
        })
    }

    pub fn profile(&self) -> &Interpolator {
        &self.profile
    }
}

impl Environment for LightEnvironment {
    fn canopy_openness(&self, height: f64) -> f64 {
        if height > self.profile.max() {
            1.0
        } else if height < self.profile.min() {
            self.profile.y()[0]
        } else {
            self.profile.eval(height).clamp(0.0, 1.0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Environment, FixedEnvironment, LightEnvironment};

    #[test]
    fn fixed_environment_validates_range() {
        assert!(FixedEnvironment::new(1.2).is_err());
        let env = FixedEnvironment::new(0.4).expect("valid openness");
        assert_eq!(env.canopy_openness(3.0), 0.4);
        assert_eq!(FixedEnvironment::default().canopy_openness(0.0), 1.0);
    }

    #[test]
    fn light_profile_is_open_above_canopy() {
        let env = LightEnvironment::new(vec![0.0, 5.0, 10.0], vec![0.2, 0.5, 0.9])
            .expect("valid profile");
        assert!((env.canopy_openness(5.0) - 0.5).abs() < 1e-12);
        assert_eq!(env.canopy_openness(12.0), 1.0);
        assert_eq!(env.canopy_openness(-1.0), 0.2);
        let mid = env.canopy_openness(7.5);
        assert!(mid > 0.5 && mid < 0.9);
    }
}
