//! Errors for network construction, training, inference and artifacts.
//!
//! [`ModelError`] separates configuration failures (architecture, training
//! and ensemble options), tensor-contract failures (`DimensionMismatch`),
//! numerical breakdown during training (`NonFiniteLoss`), and artifact I/O
//! (`MissingArtifact`, `Io`, `Serialization`). Feature-layer failures are
//! wrapped through `From<FeatureError>`.
#[cfg(feature = "python-bindings")]
use pyo3::{exceptions::PyValueError, prelude::*};

use crate::features::errors::FeatureError;

/// Result alias for model operations that may produce [`ModelError`].
pub type ModelResult<T> = Result<T, ModelError>;

#[derive(Debug, Clone, PartialEq)]
pub enum ModelError {
    /// Layer sizes or dropout rate are unusable.
    InvalidArchitecture { reason: &'static str },

    /// A training, ensemble or sweep option is out of range.
    InvalidOption { name: &'static str, value: f64, reason: &'static str },

    /// A tensor disagrees with the network or with its companion tensor.
    DimensionMismatch { context: &'static str, expected: usize, found: usize },

    /// A required artifact file is absent.
    MissingArtifact { path: String },

    /// Reading or writing a file failed.
    Io { path: String, text: String },

    /// Encoding or decoding failed.
    Serialization { path: String, text: String },

    /// The training loss became NaN or infinite.
    NonFiniteLoss { epoch: usize },

    /// Feature extraction or rescaling failed.
    Feature(FeatureError),
}

impl std::error::Error for ModelError {}

impl std::fmt::Display for ModelError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModelError::InvalidArchitecture { reason } => {
                write!(f, "Invalid network architecture: {reason}")
            }
            ModelError::InvalidOption { name, value, reason } => {
                write!(f, "Invalid option {name} = {value}: {reason}")
            }
            ModelError::DimensionMismatch { context, expected, found } => {
                write!(f, "Dimension mismatch in {context}: expected {expected}, found {found}")
            }
            ModelError::MissingArtifact { path } => write!(f, "Missing model artifact: {path}"),
            ModelError::Io { path, text } => write!(f, "I/O error on {path}: {text}"),
            ModelError::Serialization { path, text } => {
                write!(f, "Could not (de)serialize {path}: {text}")
            }
            ModelError::NonFiniteLoss { epoch } => {
                write!(f, "Training loss became non-finite at epoch {epoch}")
            }
            ModelError::Feature(err) => write!(f, "{err}"),
        }
    }
}

#[cfg(feature = "python-bindings")]
impl std::convert::From<ModelError> for PyErr {
    fn from(err: ModelError) -> PyErr {
        PyValueError::new_err(err.to_string())
    }
}

impl From<FeatureError> for ModelError {
    fn from(err: FeatureError) -> ModelError {
        match err {
            FeatureError::DimensionMismatch { context, expected, found } => {
                ModelError::DimensionMismatch { context, expected, found }
            }
            FeatureError::MissingArtifact { path } => ModelError::MissingArtifact { path },
            other => ModelError::Feature(other),
        }
    }
}
