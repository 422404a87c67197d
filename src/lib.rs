//! deepdive_rs — simulation-trained estimation of past biodiversity.
//!
//! Purpose
//! -------
//! Serve as the crate root for Rust callers and as the PyO3 bridge that
//! exposes trained models and feature extraction to Python via the
//! `_deepdive_rs` extension module. The pipeline simulates diversification
//! and fossil preservation, reduces each synthetic record to per-bin
//! features, trains a recurrent regressor on (features, true diversity)
//! pairs, and applies it with Monte Carlo dropout to empirical records.
//!
//! Key behaviors
//! -------------
//! - Re-export the core Rust modules (`simulation`, `features`, `model`) as
//!   the public crate surface.
//! - Define `#[pyclass]` wrappers and the `#[pymodule]` initializer for the
//!   `_deepdive_rs` Python extension when `python-bindings` is enabled.
//!
//! Invariants & assumptions
//! ------------------------
//! - All numerical work lives in the inner modules; this file performs only
//!   FFI glue, input conversion and error mapping.
//! - Per-bin arrays are youngest-first everywhere, including across the
//!   Python boundary.
//!
//! Conventions
//! -----------
//! - Python-exposed classes live under `_deepdive_rs.<submodule>`
//!   (`model`, `features`).
//! - Errors from core Rust code are rich enums internally and become
//!   `ValueError` at the PyO3 boundary.
//! - The library emits `tracing` events and never installs a subscriber.
//!
//! Downstream usage
//! ----------------
//! - Rust: build a [`simulation::RunContext`], call
//!   [`features::simulate_dataset`], train with [`model::train_model`], and
//!   predict with [`model::ModelArtifact::predict`].
//! - Python: `DeepDiveModel.load(path).predict(features)`.
//!
//! Testing notes
//! -------------
//! - Unit tests live next to each module; end-to-end scenarios are in
//!   `tests/integration_pipeline.rs`.

pub mod features;
pub mod model;
pub mod simulation;
pub mod utils;

#[cfg(feature = "python-bindings")]
use numpy::{IntoPyArray, PyArray1, PyArray2};

#[cfg(feature = "python-bindings")]
use pyo3::{prelude::*, types::PyAny};

#[cfg(feature = "python-bindings")]
use std::path::Path;

#[cfg(feature = "python-bindings")]
use crate::{
    features::extract,
    model::ModelArtifact,
    simulation::{preservation::OccurrenceData, time_bins::TimeBinning},
    utils::{
        build_ensemble_options, extract_count_matrix, extract_count_tensor, extract_f64_array,
        extract_f64_matrix,
    },
};

/// DeepDiveModel — Python-facing handle on a trained model artifact.
///
/// Purpose
/// -------
/// Load an artifact directory once and run Monte Carlo dropout ensembles
/// on `(bins, features)` tensors from Python.
///
/// Key behaviors
/// -------------
/// - `DeepDiveModel.load(path)` reads weights, history and rescaler together.
/// - `predict` returns the raw `(n_predictions, bins)` log-space samples,
///   matching what the training labels looked like.
/// - `summary` returns `(mean, median, lower, upper)` per bin on the
///   diversity scale, after the requested scaling.
///
/// Notes
/// -----
/// - Rust callers should use [`ModelArtifact`] directly.
#[cfg(feature = "python-bindings")]
#[pyclass(module = "deepdive_rs.model")]
pub struct DeepDiveModel {
    inner: ModelArtifact,
}

#[cfg(feature = "python-bindings")]
#[pymethods]
impl DeepDiveModel {
    #[staticmethod]
    pub fn load(path: &str) -> PyResult<DeepDiveModel> {
        Ok(DeepDiveModel { inner: ModelArtifact::load(Path::new(path))? })
    }

    #[getter]
    pub fn name(&self) -> String {
        self.inner.name.clone()
    }

    #[getter]
    pub fn n_features(&self) -> usize {
        self.inner.network.architecture().n_features
    }

    #[getter]
    pub fn best_epoch(&self) -> usize {
        self.inner.history.best_epoch
    }

    #[getter]
    pub fn loss(&self) -> Vec<f64> {
        self.inner.history.loss.clone()
    }

    #[getter]
    pub fn val_loss(&self) -> Vec<f64> {
        self.inner.history.val_loss.clone()
    }

    #[pyo3(signature = (features, n_predictions = 5, seed = 0, dropout = true))]
    pub fn predict<'py>(
        &self, py: Python<'py>, features: &Bound<'py, PyAny>, n_predictions: usize, seed: u64,
        dropout: bool,
    ) -> PyResult<Bound<'py, PyArray2<f64>>> {
        let x = extract_f64_matrix(features)?;
        let options = build_ensemble_options(n_predictions, seed, None, dropout)?;
        let prediction = self.inner.predict(&x, &options)?;
        Ok(prediction.samples().clone().into_pyarray(py))
    }

    #[pyo3(signature = (features, n_predictions = 5, seed = 0, scaling = None))]
    #[allow(clippy::type_complexity)]
    pub fn summary<'py>(
        &self, py: Python<'py>, features: &Bound<'py, PyAny>, n_predictions: usize, seed: u64,
        scaling: Option<&str>,
    ) -> PyResult<(
        Bound<'py, PyArray1<f64>>,
        Bound<'py, PyArray1<f64>>,
        Bound<'py, PyArray1<f64>>,
        Bound<'py, PyArray1<f64>>,
    )> {
        let x = extract_f64_matrix(features)?;
        let options = build_ensemble_options(n_predictions, seed, scaling, true)?;
        let s = self.inner.predict(&x, &options)?.summary();
        Ok((s.mean.into_pyarray(py), s.median.into_pyarray(py), s.lower.into_pyarray(py), s.upper.into_pyarray(py)))
    }
}

/// Reduce occurrence counts `(species, areas, bins)` and localities
/// `(areas, bins)` to the `(bins, features)` tensor used by the models.
#[cfg(feature = "python-bindings")]
#[pyfunction]
pub fn extract_features<'py>(
    py: Python<'py>, occurrences: &Bound<'py, PyAny>, localities: &Bound<'py, PyAny>,
    bin_edges: &Bound<'py, PyAny>,
) -> PyResult<Bound<'py, PyArray2<f64>>> {
    let edges = extract_f64_array(py, bin_edges)?;
    let binning = TimeBinning::new(edges.as_slice()?)?;
    let data = OccurrenceData::new(extract_count_tensor(occurrences)?, extract_count_matrix(localities)?)?;
    let x = extract::extract_features(&data, &binning)?;
    Ok(x.into_pyarray(py))
}

/// _deepdive_rs — PyO3 module initializer for the Python extension.
///
/// Registers the `model` and `features` submodules and adds them to
/// `sys.modules` so dotted imports work.
#[cfg(feature = "python-bindings")]
#[pymodule]
fn _deepdive_rs<'py>(_py: Python<'py>, m: &Bound<'py, PyModule>) -> PyResult<()> {
    let model_mod = PyModule::new(_py, "model")?;
    let features_mod = PyModule::new(_py, "features")?;
    model_module(_py, m, &model_mod)?;
    features_module(_py, m, &features_mod)?;

    // Manually add submodules into sys.modules to allow for dot notation.
    _py.import("sys")?.getattr("modules")?.set_item("deepdive_rs.model", model_mod)?;
    _py.import("sys")?.getattr("modules")?.set_item("deepdive_rs.features", features_mod)?;
    Ok(())
}

#[cfg(feature = "python-bindings")]
fn model_module<'py>(
    _py: Python, deepdive: &Bound<'py, PyModule>, m: &Bound<'py, PyModule>,
) -> PyResult<()> {
    m.add_class::<DeepDiveModel>()?;
    deepdive.add_submodule(m)?;
    Ok(())
}

#[cfg(feature = "python-bindings")]
fn features_module<'py>(
    _py: Python, deepdive: &Bound<'py, PyModule>, m: &Bound<'py, PyModule>,
) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(extract_features, m)?)?;
    deepdive.add_submodule(m)?;
    Ok(())
}
