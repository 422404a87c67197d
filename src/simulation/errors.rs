//! Errors for the diversification and preservation simulators (configuration
//! checks, time-bin / area-table structure, distribution construction, and
//! replicate rejection).
//!
//! This module defines [`SimError`], used by every stage of the simulation
//! stack. It implements `Display`/`Error` and, behind the `python-bindings`
//! feature, converts to `PyErr`.
//!
//! ## Conventions
//! - Ages are in Myr before present (positive, 0 = present).
//! - Configuration errors carry the offending parameter name so callers can
//!   report exactly which knob was rejected.
//! - [`SimError::DegenerateTrajectory`] is a resampling trigger inside the
//!   birth–death retry loop. Callers only see it wrapped as the reason of a
//!   [`SimError::SimulationBoundsError`].
#[cfg(feature = "python-bindings")]
use pyo3::{exceptions::PyValueError, prelude::*};
use statrs::distribution::{BinomialError, GammaError, NormalError, PoissonError};

/// Result alias for simulation operations that may produce [`SimError`].
pub type SimResult<T> = Result<T, SimError>;

/// Unified error type for the simulation stack.
#[derive(Debug, Clone, PartialEq)]
pub enum SimError {
    // ---- Configuration ----
    /// A `[min, max]` range is malformed (min > max, non-finite, negative).
    InvalidRange { name: &'static str, min: f64, max: f64, reason: &'static str },

    /// A probability lies outside `[0, 1]` or is non-finite.
    InvalidProbability { name: &'static str, value: f64 },

    /// A scalar parameter violates its constraint.
    InvalidParameter { name: &'static str, value: f64, reason: &'static str },

    // ---- Structure ----
    /// Time-bin boundaries are unusable (too few, duplicated, negative).
    InvalidTimeBins { reason: &'static str },

    /// The area table is malformed.
    InvalidAreaTable { row: usize, reason: &'static str },

    /// Two per-area or per-lineage arrays disagree in shape.
    ShapeMismatch { name: &'static str, expected: Vec<usize>, found: Vec<usize> },

    // ---- Distributions ----
    /// Wrapper for statrs distribution construction errors.
    InvalidDistribution { name: &'static str, text: String },

    // ---- Replicate outcomes ----
    /// All lineages went extinct before the present.
    DegenerateTrajectory { extinct_at: f64 },

    /// A replicate could not satisfy the species-count bounds within the
    /// retry budget.
    SimulationBoundsError { attempts: usize, last_reason: String },

    /// A worker could not produce its batch.
    WorkerFailed { worker: usize, seed: u64, source: Box<SimError> },
}

impl std::error::Error for SimError {}

impl std::fmt::Display for SimError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SimError::InvalidRange { name, min, max, reason } => {
                write!(f, "Invalid range for '{name}': [{min}, {max}]. {reason}")
            }
            SimError::InvalidProbability { name, value } => {
                write!(f, "Probability '{name}' must be finite and in [0, 1]; got {value}")
            }
            SimError::InvalidParameter { name, value, reason } => {
                write!(f, "Invalid value for '{name}': {value}. {reason}")
            }
            SimError::InvalidTimeBins { reason } => {
                write!(f, "Invalid time bins: {reason}")
            }
            SimError::InvalidAreaTable { row, reason } => {
                write!(f, "Invalid area table at row {row}: {reason}")
            }
            SimError::ShapeMismatch { name, expected, found } => {
                write!(f, "Shape mismatch for '{name}': expected {expected:?}, found {found:?}")
            }
            SimError::InvalidDistribution { name, text } => {
                write!(f, "Could not build {name} distribution: {text}")
            }
            SimError::DegenerateTrajectory { extinct_at } => {
                write!(f, "All lineages went extinct at age {extinct_at:.3} before the present")
            }
            SimError::SimulationBoundsError { attempts, last_reason } => {
                write!(
                    f,
                    "Replicate violated species-count bounds in all {attempts} attempts \
                     (last rejection: {last_reason})"
                )
            }
            SimError::WorkerFailed { worker, seed, source } => {
                write!(f, "Simulation worker {worker} (seed {seed}) failed: {source}")
            }
        }
    }
}

#[cfg(feature = "python-bindings")]
impl std::convert::From<SimError> for PyErr {
    fn from(err: SimError) -> PyErr {
        PyValueError::new_err(err.to_string())
    }
}

impl From<GammaError> for SimError {
    fn from(err: GammaError) -> SimError {
        SimError::InvalidDistribution { name: "Gamma", text: err.to_string() }
    }
}

impl From<PoissonError> for SimError {
    fn from(err: PoissonError) -> SimError {
        SimError::InvalidDistribution { name: "Poisson", text: err.to_string() }
    }
}

impl From<NormalError> for SimError {
    fn from(err: NormalError) -> SimError {
        SimError::InvalidDistribution { name: "Normal", text: err.to_string() }
    }
}

impl From<BinomialError> for SimError {
    fn from(err: BinomialError) -> SimError {
        SimError::InvalidDistribution { name: "Binomial", text: err.to_string() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use statrs::distribution::{Binomial, Gamma, Normal, Poisson};

    // -------------------------------------------------------------------------
    // Scope
    // -----
    // These tests cover the mapping of statrs construction errors into
    // `SimError::InvalidDistribution`.
    // -------------------------------------------------------------------------

    #[test]
    // Purpose
    // -------
    // Ensure each distribution's construction error keeps its name.
    //
    // Given
    // -----
    // - Invalid Gamma, Poisson, Normal and Binomial parameters.
    //
    // Expect
    // ------
    // - `InvalidDistribution` tagged with the matching distribution name.
    fn statrs_errors_map_to_invalid_distribution() {
        let gamma: SimError = Gamma::new(-1.0, 1.0).unwrap_err().into();
        let poisson: SimError = Poisson::new(-2.0).unwrap_err().into();
        let normal: SimError = Normal::new(0.0, -1.0).unwrap_err().into();
        let binomial: SimError = Binomial::new(1.5, 3).unwrap_err().into();

        for (err, expected) in
            [(gamma, "Gamma"), (poisson, "Poisson"), (normal, "Normal"), (binomial, "Binomial")]
        {
            assert!(matches!(err, SimError::InvalidDistribution { name, .. } if name == expected));
        }
    }
}
