//! Named access to the `f64` fields of parameter structs.
//!
//! A struct opts in with [`parameter_table!`], which generates a fixed
//! name → field registry at compile time. Because the registry depends only
//! on the type, copies of a struct share it and nothing needs rebuilding
//! when a value is cloned or moved.

use std::collections::BTreeMap;

use crate::error::{Result, TreeError};

/// Parameter values keyed by field name.
pub type ParameterMap = BTreeMap<String, f64>;

pub trait ParameterTable: Clone {
    /// Every tracked field name, in declaration order.
    const NAMES: &'static [&'static str];

    fn parameter(&self, name: &str) -> Option<f64>;

    fn parameter_mut(&mut self, name: &str) -> Option<&mut f64>;

    /// Runs after every successful write through [`set_parameters`].
    ///
    /// An error here rejects the whole write set.
    ///
    /// [`set_parameters`]: ParameterTable::set_parameters
    fn post_set_parameters(&mut self) -> Result<()> {
        Ok(())
    }

    fn has_key(&self, name: &str) -> bool {
        Self::NAMES.contains(&name)
    }

    fn get_parameters(&self) -> ParameterMap {
        Self::NAMES
            .iter()
            .filter_map(|&name| self.parameter(name).map(|v| (name.to_string(), v)))
            .collect()
    }

    /// Writes a subset of parameters by name.
    ///
    /// All names are checked before anything is written. The values are
    /// applied to a copy and the post-update hook runs on that copy, so
    /// `self` is only replaced once the whole set has been accepted.
    fn set_parameters(&mut self, values: &ParameterMap) -> Result<()> {
        let unknown: Vec<String> = values
            .keys()
            .filter(|name| !self.has_key(name))
            .cloned()
            .collect();
        if !unknown.is_empty() {
            return Err(TreeError::UnknownParameter { names: unknown });
        }

        let mut updated = self.clone();
        for (name, &value) in values {
            if let Some(slot) = updated.parameter_mut(name) {
                *slot = value;
            }
        }
        updated.post_set_parameters()?;
        *self = updated;
        Ok(())
    }
}

/// Implements [`ParameterTable`] for a struct from a list of its `f64` fields.
///
/// ```ignore
/// parameter_table!(Strategy { lma, rho, hmat } post = Strategy::refresh);
/// ```
macro_rules! parameter_table {
    ($ty:ty { $($field:ident),+ $(,)? } $(post = $hook:path)?) => {
        impl $crate::lookup::ParameterTable for $ty {
            const NAMES: &'static [&'static str] = &[$(stringify!($field)),+];

            fn parameter(&self, name: &str) -> Option<f64> {
                match name {
                    $(stringify!($field) => Some(self.$field),)+
                    _ => None,
                }
            }

            fn parameter_mut(&mut self, name: &str) -> Option<&mut f64> {
                match name {
                    $(stringify!($field) => Some(&mut self.$field),)+
                    _ => None,
                }
            }

            $(
                fn post_set_parameters(&mut self) -> $crate::error::Result<()> {
                    $hook(self)
                }
            )?
        }
    };
}

pub(crate) use parameter_table;
