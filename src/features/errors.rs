//! Errors for feature extraction, rescaling and dataset persistence.
//!
//! [`FeatureError`] covers contract violations between tensors (feature
//! cardinality, replicate counts), invalid numeric content, and dataset file
//! I/O. Dimension mismatches are never coerced: they surface immediately to
//! the caller.
#[cfg(feature = "python-bindings")]
use pyo3::{exceptions::PyValueError, prelude::*};

use crate::simulation::errors::SimError;

/// Result alias for feature operations that may produce [`FeatureError`].
pub type FeatureResult<T> = Result<T, FeatureError>;

#[derive(Debug, Clone, PartialEq)]
pub enum FeatureError {
    /// Two tensors disagree on a dimension that must match.
    DimensionMismatch { context: &'static str, expected: usize, found: usize },

    /// A batch that must contain data is empty.
    EmptyBatch { name: &'static str },

    /// A tensor holds NaN or infinite values.
    NonFiniteValue { name: &'static str, index: Vec<usize> },

    /// A required dataset file is absent.
    MissingArtifact { path: String },

    /// Reading or writing a file failed.
    Io { path: String, text: String },

    /// Encoding or decoding failed.
    Serialization { path: String, text: String },

    /// Simulation failed while building a dataset.
    Simulation(SimError),
}

impl std::error::Error for FeatureError {}

impl std::fmt::Display for FeatureError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FeatureError::DimensionMismatch { context, expected, found } => {
                write!(f, "Dimension mismatch in {context}: expected {expected}, found {found}")
            }
            FeatureError::EmptyBatch { name } => write!(f, "Batch '{name}' is empty"),
            FeatureError::NonFiniteValue { name, index } => {
                write!(f, "Tensor '{name}' holds a non-finite value at {index:?}")
            }
            FeatureError::MissingArtifact { path } => write!(f, "Missing dataset file: {path}"),
            FeatureError::Io { path, text } => write!(f, "I/O error on {path}: {text}"),
            FeatureError::Serialization { path, text } => {
                write!(f, "Could not (de)serialize {path}: {text}")
            }
            FeatureError::Simulation(err) => write!(f, "Simulation failed: {err}"),
        }
    }
}

#[cfg(feature = "python-bindings")]
impl std::convert::From<FeatureError> for PyErr {
    fn from(err: FeatureError) -> PyErr {
        PyValueError::new_err(err.to_string())
    }
}

impl From<SimError> for FeatureError {
    fn from(err: SimError) -> FeatureError {
        FeatureError::Simulation(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // -------------------------------------------------------------------------
    // Scope
    // -----
    // Display messages name the failing context, and simulation errors
    // convert losslessly.
    // -------------------------------------------------------------------------

    #[test]
    // Purpose
    // -------
    // Verify messages carry the violated dimension and that `SimError`
    // converts into the `Simulation` variant.
    fn feature_error_display_and_conversion() {
        let err = FeatureError::DimensionMismatch { context: "rescaler", expected: 13, found: 11 };
        assert_eq!(err.to_string(), "Dimension mismatch in rescaler: expected 13, found 11");

        let sim = SimError::InvalidTimeBins { reason: "x" };
        assert_eq!(FeatureError::from(sim.clone()), FeatureError::Simulation(sim));
    }
}
