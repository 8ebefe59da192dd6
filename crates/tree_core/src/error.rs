use thiserror::Error;

/// Errors reported by the simulation core.
///
/// Every variant is raised synchronously by the operation that detected it;
/// none of them is recovered from inside the crate.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TreeError {
    /// `set_parameters` was given names absent from the parameter table.
    #[error("unknown parameters: {}", names.join(", "))]
    UnknownParameter { names: Vec<String> },

    /// A value outside the domain its field accepts.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("{what} index {index} out of range (size {len})")]
    IndexOutOfRange {
        what: &'static str,
        index: usize,
        len: usize,
    },

    /// A table or vector whose dimensions disagree with the current layout.
    #[error("{what} has wrong shape: expected {expected}, got {got}")]
    ShapeMismatch {
        what: &'static str,
        expected: String,
        got: String,
    },

    /// Quadrature ran out of subdivisions before meeting its tolerance.
    #[error(
        "integration failed to converge after {intervals} subdivisions \
         (estimate {estimate}, error {error})"
    )]
    Integration {
        intervals: usize,
        estimate: f64,
        error: f64,
    },

    /// The ODE stepper could not find an acceptable step.
    #[error("ODE step failed at t = {time} with step size {step_size}: {reason}")]
    StepFailure {
        time: f64,
        step_size: f64,
        reason: String,
    },

    #[error("root finding failed: {0}")]
    RootNotFound(String),

    #[error("interpolation error: {0}")]
    Interpolation(String),

    /// A random distribution rejected its parameters.
    #[error("distribution error: {0}")]
    Distribution(String),
}

pub type Result<T> = std::result::Result<T, TreeError>;

impl TreeError {
    pub(crate) fn check_index(what: &'static str, index: usize, len: usize) -> Result<usize> {
        if index < len {
            Ok(index)
        } else {
            Err(TreeError::IndexOutOfRange { what, index, len })
        }
    }

    pub(crate) fn check_min_length(what: &'static str, got: usize, min: usize) -> Result<()> {
        if got >= min {
            Ok(())
        } else {
            Err(TreeError::ShapeMismatch {
                what,
                expected: format!("at least {min}"),
                got: got.to_string(),
            })
        }
    }

    pub(crate) fn check_length(what: &'static str, got: usize, expected: usize) -> Result<()> {
        if got == expected {
            Ok(())
        } else {
            Err(TreeError::ShapeMismatch {
                what,
                expected: expected.to_string(),
                got: got.to_string(),
            })
        }
    }
}
