use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::control::Control;
use crate::error::{Result, TreeError};
use crate::lookup::ParameterMap;
use crate::strategy::Strategy;

/// Which rate model newly created plants use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndividualKind {
    #[default]
    Exact,
    Approximate,
}

/// Global configuration shared by every patch of a metacommunity.
///
/// Every strategy carries the same [`Control`]; it is installed here so the
/// integrators and seed heights agree with the solver settings.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameters {
    strategies: Vec<Arc<Strategy>>,
    control: Control,
    n_patches: usize,
    individual: IndividualKind,
}

impl Parameters {
    pub fn new(
        strategies: Vec<Strategy>,
        control: Control,
        n_patches: usize,
        individual: IndividualKind,
    ) -> Result<Self> {
        control.validate()?;
        if n_patches == 0 {
            return Err(TreeError::InvalidParameter(
                "a metacommunity needs at least one patch".into(),
            ));
        }
        let strategies = strategies
            .into_iter()
            .map(|mut strategy| {
                if strategy.control() != &control {
                    strategy.set_control(control.clone())?;
                }
                Ok(Arc::new(strategy))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            strategies,
            control,
            n_patches,
            individual,
        })
    }

    pub fn strategies(&self) -> &[Arc<Strategy>] {
        &self.strategies
    }

    pub fn strategy(&self, index: usize) -> Result<&Arc<Strategy>> {
        TreeError::check_index("species", index, self.strategies.len())?;
        Ok(&self.strategies[index])
    }

    pub fn control(&self) -> &Control {
        &self.control
    }

    pub fn n_species(&self) -> usize {
        self.strategies.len()
    }

    pub fn n_patches(&self) -> usize {
        self.n_patches
    }

    pub fn individual(&self) -> IndividualKind {
        self.individual
    }
}

/// Serializable description of [`Parameters`]: strategies are given as
/// trait overrides on top of the defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParametersSettings {
    pub n_patches: usize,
    pub individual: IndividualKind,
    pub control: Control,
    pub strategies: Vec<ParameterMap>,
}

impl Default for ParametersSettings {
    fn default() -> Self {
        Self {
            n_patches: 1,
            individual: IndividualKind::Exact,
            control: Control::default(),
            strategies: Vec::new(),
        }
    }
}

impl ParametersSettings {
    pub fn build(&self) -> Result<Parameters> {
        let strategies = self
            .strategies
            .iter()
            .map(|traits| Strategy::from_parameters(traits, self.control.clone()))
            .collect::<Result<Vec<_>>>()?;
        Parameters::new(
            strategies,
            self.control.clone(),
            self.n_patches,
            self.individual,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::{IndividualKind, Parameters, ParametersSettings};
    use crate::control::Control;
    use crate::error::TreeError;
    use crate::lookup::ParameterTable;
    use crate::strategy::Strategy;
    use crate::testing::assert_err_contains;

    #[test]
    fn strategies_receive_the_global_control() {
        let control = Control {
            plant_assimilation_over_distribution: false,
            ..Control::default()
        };
        let strategy = Strategy::new(Control::default()).expect("strategy");
        let parameters = Parameters::new(vec![strategy], control.clone(), 3, IndividualKind::Exact)
            .expect("parameters");
        assert_eq!(parameters.n_species(), 1);
        assert_eq!(parameters.n_patches(), 3);
        assert_eq!(parameters.strategies()[0].control(), &control);
        assert!(matches!(
            parameters.strategy(1),
            Err(TreeError::IndexOutOfRange { index: 1, len: 1, .. })
        ));
    }

    #[test]
    fn zero_patches_are_rejected() {
        assert_err_contains(
            Parameters::new(Vec::new(), Control::default(), 0, IndividualKind::Exact),
            "at least one patch",
        );
    }

    #[test]
    fn settings_build_from_json() {
        let json = r#"{
            "n_patches": 2,
            "individual": "approximate",
            "strategies": [{ "hmat": 10.0 }, {}]
        }"#;
        let settings: ParametersSettings = serde_json::from_str(json).expect("settings");
        let parameters = settings.build().expect("parameters");
        assert_eq!(parameters.n_patches(), 2);
        assert_eq!(parameters.individual(), IndividualKind::Approximate);
        assert_eq!(parameters.strategies()[0].hmat(), 10.0);
        assert_eq!(
            parameters.strategies()[1].get_parameters(),
            Strategy::new(Control::default())
                .expect("strategy")
                .get_parameters()
        );
    }

    #[test]
    fn unknown_trait_names_fail_the_build() {
        let json = r#"{ "strategies": [{ "height": 1.0 }] }"#;
        let settings: ParametersSettings = serde_json::from_str(json).expect("settings");
        let err = settings.build().expect_err("unknown trait");
        assert_eq!(
            err,
            TreeError::UnknownParameter {
                names: vec!["height".into()]
            }
        );
    }
}
