//! Python conversion helpers for the `python-bindings` feature.
//!
//! Every helper accepts a numpy array of the expected dtype first and falls
//! back to nested Python sequences, returning owned `ndarray` containers so
//! the core modules never see Python objects.
#[cfg(feature = "python-bindings")]
use ndarray::{Array2, Array3};

#[cfg(feature = "python-bindings")]
use pyo3::{exceptions::PyValueError, prelude::*, types::PyAny};

#[cfg(feature = "python-bindings")]
use numpy::{
    IntoPyArray,    // Vec → PyArray
    PyArrayMethods, // .readonly()
    PyReadonlyArray1, PyReadonlyArray2, PyReadonlyArray3,
};

#[cfg(feature = "python-bindings")]
use crate::model::ensemble::{EnsembleOptions, Scaling};

/// 1-D float64 input as a contiguous read-only numpy array.
#[cfg(feature = "python-bindings")]
#[inline]
pub fn extract_f64_array<'py>(
    py: Python<'py>, raw_data: &Bound<'py, PyAny>,
) -> PyResult<PyReadonlyArray1<'py, f64>> {
    if let Ok(arr_ro) = raw_data.extract::<PyReadonlyArray1<f64>>() {
        if arr_ro.as_slice().is_ok() {
            return Ok(arr_ro);
        }
    }

    let vec: Vec<f64> = raw_data.extract().map_err(|_| {
        pyo3::exceptions::PyTypeError::new_err("expected a 1-D numpy.ndarray or sequence of float64")
    })?;
    Ok(vec.into_pyarray(py).readonly())
}

/// 2-D float64 input, e.g. a `(bins, features)` tensor.
#[cfg(feature = "python-bindings")]
pub fn extract_f64_matrix(raw_data: &Bound<'_, PyAny>) -> PyResult<Array2<f64>> {
    if let Ok(arr_ro) = raw_data.extract::<PyReadonlyArray2<f64>>() {
        return Ok(arr_ro.as_array().to_owned());
    }
    let rows: Vec<Vec<f64>> = raw_data.extract().map_err(|_| {
        pyo3::exceptions::PyTypeError::new_err("expected a 2-D numpy.ndarray of float64")
    })?;
    let (shape, data) =
        flatten_rows(rows).ok_or_else(|| PyValueError::new_err("rows must all have the same length"))?;
    Array2::from_shape_vec(shape, data).map_err(|e| PyValueError::new_err(e.to_string()))
}

/// 2-D non-negative integer counts, e.g. localities `(areas, bins)`.
#[cfg(feature = "python-bindings")]
pub fn extract_count_matrix(raw_data: &Bound<'_, PyAny>) -> PyResult<Array2<u32>> {
    if let Ok(arr_ro) = raw_data.extract::<PyReadonlyArray2<i64>>() {
        let view = arr_ro.as_array();
        let data = view.iter().map(|&v| to_count(v)).collect::<PyResult<Vec<u32>>>()?;
        return Array2::from_shape_vec(view.dim(), data).map_err(|e| PyValueError::new_err(e.to_string()));
    }
    let rows: Vec<Vec<i64>> = raw_data.extract().map_err(|_| {
        pyo3::exceptions::PyTypeError::new_err("expected a 2-D numpy.ndarray or nested sequence of int64 counts")
    })?;
    let (shape, raw) =
        flatten_rows(rows).ok_or_else(|| PyValueError::new_err("rows must all have the same length"))?;
    let data = raw.into_iter().map(to_count).collect::<PyResult<Vec<u32>>>()?;
    Array2::from_shape_vec(shape, data).map_err(|e| PyValueError::new_err(e.to_string()))
}

/// 3-D non-negative integer counts, e.g. occurrences `(species, areas, bins)`.
#[cfg(feature = "python-bindings")]
pub fn extract_count_tensor(raw_data: &Bound<'_, PyAny>) -> PyResult<Array3<u32>> {
    if let Ok(arr_ro) = raw_data.extract::<PyReadonlyArray3<i64>>() {
        let view = arr_ro.as_array();
        let data = view.iter().map(|&v| to_count(v)).collect::<PyResult<Vec<u32>>>()?;
        return Array3::from_shape_vec(view.dim(), data).map_err(|e| PyValueError::new_err(e.to_string()));
    }
    let blocks: Vec<Vec<Vec<i64>>> = raw_data.extract().map_err(|_| {
        pyo3::exceptions::PyTypeError::new_err("expected a 3-D numpy.ndarray or nested sequence of int64 counts")
    })?;
    let (shape, raw) = flatten_blocks(blocks)
        .ok_or_else(|| PyValueError::new_err("nested sequences must form a regular 3-D block"))?;
    let data = raw.into_iter().map(to_count).collect::<PyResult<Vec<u32>>>()?;
    Array3::from_shape_vec(shape, data).map_err(|e| PyValueError::new_err(e.to_string()))
}

/// Row-major data and shape of equal-length rows; `None` when ragged.
#[cfg(any(test, feature = "python-bindings"))]
fn flatten_rows<T>(rows: Vec<Vec<T>>) -> Option<((usize, usize), Vec<T>)> {
    let n_cols = rows.first().map_or(0, Vec::len);
    if rows.iter().any(|r| r.len() != n_cols) {
        return None;
    }
    let n_rows = rows.len();
    Some(((n_rows, n_cols), rows.into_iter().flatten().collect()))
}

/// Row-major data and shape of a regular 3-D nesting; `None` when ragged.
#[cfg(any(test, feature = "python-bindings"))]
fn flatten_blocks<T>(blocks: Vec<Vec<Vec<T>>>) -> Option<((usize, usize, usize), Vec<T>)> {
    let n_mid = blocks.first().map_or(0, Vec::len);
    let n_inner = blocks.first().and_then(|b| b.first()).map_or(0, Vec::len);
    if blocks.iter().any(|b| b.len() != n_mid || b.iter().any(|r| r.len() != n_inner)) {
        return None;
    }
    let n_outer = blocks.len();
    Some(((n_outer, n_mid, n_inner), blocks.into_iter().flatten().flatten().collect()))
}

#[cfg(feature = "python-bindings")]
fn to_count(v: i64) -> PyResult<u32> {
    u32::try_from(v).map_err(|_| PyValueError::new_err(format!("count {v} is negative or too large")))
}

/// Map the scaling names used by the prediction scripts onto [`Scaling`].
#[cfg(feature = "python-bindings")]
pub fn parse_scaling(scaling: Option<&str>) -> PyResult<Scaling> {
    match scaling {
        None | Some("none") => Ok(Scaling::None),
        Some("1-mean") => Ok(Scaling::OneMean),
        Some("first-bin") => Ok(Scaling::FirstBin),
        Some(other) => Err(PyValueError::new_err(format!(
            "unknown scaling '{other}'; expected None, '1-mean' or 'first-bin'"
        ))),
    }
}

#[cfg(feature = "python-bindings")]
pub fn build_ensemble_options(
    n_predictions: usize, seed: u64, scaling: Option<&str>, dropout: bool,
) -> PyResult<EnsembleOptions> {
    let mut options = EnsembleOptions::new(n_predictions, seed, parse_scaling(scaling)?)?;
    options.mc_dropout = dropout;
    Ok(options)
}
