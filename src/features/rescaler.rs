//! Feature rescaler — one multiplicative scale per feature column.
//!
//! Purpose
//! -------
//! Bring feature columns of very different magnitudes (occurrence counts in
//! the thousands, durations of a few Myr) onto a comparable range before
//! training, and apply exactly the same transform at inference.
//!
//! Key behaviors
//! -------------
//! - [`FeatureRescaler::fit`] computes `scale_j = 1 / max |x_j|` over every
//!   replicate and bin of a training batch; all-zero columns get scale 1.
//! - [`FeatureRescaler::apply`] multiplies, [`FeatureRescaler::inverse`]
//!   divides; both reject tensors whose feature count differs from the fitted
//!   one with `FeatureError::DimensionMismatch`.
//!
//! Invariants & assumptions
//! ------------------------
//! - Fitted once, on training data only; validation, test and empirical
//!   tensors reuse the stored scales unmodified.
//! - Scales are finite and strictly positive.
//!
//! Conventions
//! -----------
//! - The feature axis is always the last axis, so the same rescaler handles a
//!   single `(bins, features)` tensor and a `(replicates, bins, features)`
//!   batch.
//! - The state serializes to JSON and is stored with every model artifact.
use crate::features::errors::{FeatureError, FeatureResult};
use ndarray::{Array, Array1, Array3, ArrayBase, Axis, Data, Dimension};
use serde::{Deserialize, Serialize};

/// FeatureRescaler — fitted per-feature multiplicative scales.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureRescaler {
    scale: Array1<f64>,
}

impl FeatureRescaler {
    /// Fit scales on a `(replicates, bins, features)` training batch.
    ///
    /// Errors
    /// ------
    /// - `FeatureError::EmptyBatch` when the batch has no replicates, bins or
    ///   features.
    /// - `FeatureError::NonFiniteValue` when any entry is NaN or infinite.
    pub fn fit(batch: &Array3<f64>) -> FeatureResult<Self> {
        if batch.is_empty() {
            return Err(FeatureError::EmptyBatch { name: "rescaler training batch" });
        }
        if let Some(((r, b, f), _)) = batch.indexed_iter().find(|(_, v)| !v.is_finite()) {
            return Err(FeatureError::NonFiniteValue { name: "features", index: vec![r, b, f] });
        }
        let scale = Array1::from_iter((0..batch.dim().2).map(|f| {
            let max = batch.index_axis(Axis(2), f).fold(0.0_f64, |m, &v| m.max(v.abs()));
            if max > 0.0 {
                1.0 / max
            } else {
                1.0
            }
        }));
        Ok(FeatureRescaler { scale })
    }

    /// Rebuild from stored scales.
    ///
    /// Errors
    /// ------
    /// - `FeatureError::NonFiniteValue` for non-finite or non-positive scales.
    pub fn from_scales(scale: Array1<f64>) -> FeatureResult<Self> {
        if let Some(i) = scale.iter().position(|s| !s.is_finite() || *s <= 0.0) {
            return Err(FeatureError::NonFiniteValue { name: "rescaler scale", index: vec![i] });
        }
        Ok(FeatureRescaler { scale })
    }

    pub fn n_features(&self) -> usize {
        self.scale.len()
    }

    pub fn scales(&self) -> &Array1<f64> {
        &self.scale
    }

    /// Rescale a tensor whose last axis is the feature axis.
    pub fn apply<S, D>(&self, x: &ArrayBase<S, D>) -> FeatureResult<Array<f64, D>>
    where
        S: Data<Elem = f64>,
        D: Dimension,
    {
        self.check(x)?;
        let mut out = x.to_owned();
        out *= &self.scale;
        Ok(out)
    }

    /// Undo [`FeatureRescaler::apply`].
    pub fn inverse<S, D>(&self, x: &ArrayBase<S, D>) -> FeatureResult<Array<f64, D>>
    where
        S: Data<Elem = f64>,
        D: Dimension,
    {
        self.check(x)?;
        let mut out = x.to_owned();
        out /= &self.scale;
        Ok(out)
    }

    fn check<S, D>(&self, x: &ArrayBase<S, D>) -> FeatureResult<()>
    where
        S: Data<Elem = f64>,
        D: Dimension,
    {
        let found = x.shape().last().copied().unwrap_or(0);
        if found != self.n_features() {
            return Err(FeatureError::DimensionMismatch {
                context: "feature rescaler",
                expected: self.n_features(),
                found,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::{array, Array2};

    // -------------------------------------------------------------------------
    // Scope
    // -----
    // These tests cover:
    // - Fitting scales from the column-wise maximum magnitude.
    // - Apply / inverse round trips on batches and single tensors.
    // - Cardinality and finiteness checks.
    // -------------------------------------------------------------------------

    fn batch() -> Array3<f64> {
        Array3::from_shape_vec(
            (2, 2, 3),
            vec![1.0, 0.0, -4.0, 2.0, 0.0, 1.0, 5.0, 0.0, 2.0, 3.0, 0.0, 0.5],
        )
        .unwrap()
    }

    #[test]
    // Purpose
    // -------
    // Verify fitted scales and the round trip through apply / inverse.
    //
    // Given
    // -----
    // - A 2 × 2 × 3 batch whose columns peak at 5, 0 and |-4|.
    //
    // Expect
    // ------
    // - Scales [0.2, 1, 0.25]; applied values within [-1, 1]; inverse
    //   reconstructs the batch.
    fn fit_apply_inverse_round_trip() {
        // Arrange
        let x = batch();

        // Act
        let rescaler = FeatureRescaler::fit(&x).unwrap();
        let scaled = rescaler.apply(&x).unwrap();
        let back = rescaler.inverse(&scaled).unwrap();

        // Assert
        assert_eq!(rescaler.scales(), &array![0.2, 1.0, 0.25]);
        assert!(scaled.iter().all(|v| v.abs() <= 1.0 + 1e-12));
        for (a, b) in back.iter().zip(x.iter()) {
            assert_relative_eq!(*a, *b, epsilon = 1e-12);
        }
    }

    #[test]
    // Purpose
    // -------
    // Ensure a single (bins, features) tensor is rescaled like a batch row.
    fn apply_single_tensor_matches_batch() {
        let x = batch();
        let rescaler = FeatureRescaler::fit(&x).unwrap();
        let single: Array2<f64> = x.index_axis(Axis(0), 1).to_owned();

        let scaled_single = rescaler.apply(&single).unwrap();
        let scaled_batch = rescaler.apply(&x).unwrap();

        assert_eq!(scaled_single, scaled_batch.index_axis(Axis(0), 1));
    }

    #[test]
    // Purpose
    // -------
    // Verify mismatched cardinality and non-finite inputs are rejected.
    fn rescaler_rejects_mismatch_and_nan() {
        let rescaler = FeatureRescaler::fit(&batch()).unwrap();
        let wrong = Array2::<f64>::zeros((2, 4));
        assert!(matches!(
            rescaler.apply(&wrong),
            Err(FeatureError::DimensionMismatch { expected: 3, found: 4, .. })
        ));

        let mut bad = batch();
        bad[[1, 0, 2]] = f64::NAN;
        assert!(matches!(FeatureRescaler::fit(&bad), Err(FeatureError::NonFiniteValue { .. })));
        assert!(FeatureRescaler::fit(&Array3::zeros((0, 2, 3))).is_err());
    }
}
