//! Ensemble — Monte Carlo dropout predictions and their summaries.
//!
//! Purpose
//! -------
//! Turn one feature tensor into a distribution of diversity trajectories by
//! repeating stochastic forward passes of a trained network with dropout
//! left on, then summarize that distribution per bin.
//!
//! Key behaviors
//! -------------
//! - [`predict_ensemble`] rescales the features with the model's own
//!   rescaler, runs `n_predictions` `MonteCarlo` passes (one batch row per
//!   pass, independent masks) from a seeded `ChaCha8Rng`, and keeps the
//!   log-space samples.
//! - [`EnsemblePrediction::trajectories`] inverts the training transform
//!   (`exp(z) - 1`); [`EnsemblePrediction::mean_trajectory`] averages them
//!   and applies the configured [`Scaling`].
//! - [`EnsemblePrediction::summary`] reports mean, median and the central
//!   95% interval per bin on the same scale.
//!
//! Invariants & assumptions
//! ------------------------
//! - The same seed, model and input always produce identical samples.
//! - With `mc_dropout = false` every sample equals the evaluation-mode
//!   prediction.
//! - A scaling denominator that is zero or non-finite leaves the values
//!   unscaled (logged at `warn`).
use crate::{
    features::{extract::denormalize_labels, rescaler::FeatureRescaler},
    model::{
        errors::{ModelError, ModelResult},
        network::{ForwardMode, Network},
    },
};
use ndarray::{Array1, Array2, Array3, Axis};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Post-hoc normalization of predicted trajectories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Scaling {
    /// Absolute diversity.
    #[default]
    None,
    /// Divide by the mean of the mean trajectory.
    OneMean,
    /// Divide by the oldest bin of the mean trajectory (the first bin in
    /// oldest-first time order).
    FirstBin,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnsembleOptions {
    pub n_predictions: usize,
    pub seed: u64,
    pub scaling: Scaling,
    /// Keep dropout active at inference.
    pub mc_dropout: bool,
}

impl EnsembleOptions {
    pub fn new(n_predictions: usize, seed: u64, scaling: Scaling) -> ModelResult<Self> {
        let options = EnsembleOptions { n_predictions, seed, scaling, mc_dropout: true };
        options.validate()?;
        Ok(options)
    }

    pub fn validate(&self) -> ModelResult<()> {
        if self.n_predictions == 0 {
            return Err(ModelError::InvalidOption {
                name: "n_predictions",
                value: 0.0,
                reason: "must be at least 1",
            });
        }
        Ok(())
    }
}

impl Default for EnsembleOptions {
    fn default() -> Self {
        EnsembleOptions { n_predictions: 5, seed: 0, scaling: Scaling::None, mc_dropout: true }
    }
}

/// Per-bin summary of an ensemble on the scaled diversity scale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnsembleSummary {
    pub mean: Array1<f64>,
    pub median: Array1<f64>,
    pub lower: Array1<f64>,
    pub upper: Array1<f64>,
}

/// Log-space samples `(n_predictions, n_bins)` plus their scaling rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnsemblePrediction {
    samples: Array2<f64>,
    scaling: Scaling,
}

impl EnsemblePrediction {
    pub fn new(samples: Array2<f64>, scaling: Scaling) -> Self {
        EnsemblePrediction { samples, scaling }
    }

    /// Raw network outputs, `ln(diversity + 1)`.
    pub fn samples(&self) -> &Array2<f64> {
        &self.samples
    }

    pub fn n_predictions(&self) -> usize {
        self.samples.nrows()
    }

    pub fn n_bins(&self) -> usize {
        self.samples.ncols()
    }

    /// Unscaled diversity trajectories, one row per sample.
    pub fn trajectories(&self) -> Array2<f64> {
        denormalize_labels(&self.samples)
    }

    /// Mean diversity per bin after scaling.
    pub fn mean_trajectory(&self) -> Array1<f64> {
        let mut mean = self.unscaled_mean();
        mean /= self.denominator(&mean);
        mean
    }

    /// Mean, median and 2.5 / 97.5 percentiles per bin after scaling.
    pub fn summary(&self) -> EnsembleSummary {
        let unscaled = self.unscaled_mean();
        let den = self.denominator(&unscaled);
        let scaled = self.trajectories() / den;
        let mut median = Array1::zeros(self.n_bins());
        let mut lower = Array1::zeros(self.n_bins());
        let mut upper = Array1::zeros(self.n_bins());
        for (b, column) in scaled.axis_iter(Axis(1)).enumerate() {
            let mut sorted = column.to_vec();
            sorted.sort_by(f64::total_cmp);
            median[b] = quantile(&sorted, 0.5);
            lower[b] = quantile(&sorted, 0.025);
            upper[b] = quantile(&sorted, 0.975);
        }
        EnsembleSummary { mean: unscaled / den, median, lower, upper }
    }

    fn unscaled_mean(&self) -> Array1<f64> {
        self.trajectories().mean_axis(Axis(0)).unwrap_or_else(|| Array1::zeros(self.n_bins()))
    }

    fn denominator(&self, mean: &Array1<f64>) -> f64 {
        let den = match self.scaling {
            Scaling::None => return 1.0,
            Scaling::OneMean => mean.mean().unwrap_or(f64::NAN),
            Scaling::FirstBin => mean.last().copied().unwrap_or(f64::NAN),
        };
        if den.is_finite() && den != 0.0 {
            den
        } else {
            warn!(scaling = ?self.scaling, den, "scaling denominator unusable; returning unscaled values");
            1.0
        }
    }
}

/// Linear-interpolation quantile of an ascending slice.
pub fn quantile(sorted: &[f64], q: f64) -> f64 {
    match sorted.len() {
        0 => f64::NAN,
        1 => sorted[0],
        n => {
            let pos = q.clamp(0.0, 1.0) * (n - 1) as f64;
            let lo = pos.floor() as usize;
            let hi = (lo + 1).min(n - 1);
            let w = pos - lo as f64;
            sorted[lo] * (1.0 - w) + sorted[hi] * w
        }
    }
}

/// Run a Monte Carlo dropout ensemble on one `(bins, features)` tensor.
///
/// Errors
/// ------
/// - `ModelError::DimensionMismatch` when the features disagree with the
///   rescaler or the network.
/// - `ModelError::InvalidOption` for `n_predictions == 0`.
pub fn predict_ensemble(
    network: &Network, rescaler: &FeatureRescaler, features: &Array2<f64>, options: &EnsembleOptions,
) -> ModelResult<EnsemblePrediction> {
    options.validate()?;
    let expected = network.architecture().n_features;
    if rescaler.n_features() != expected {
        return Err(ModelError::DimensionMismatch {
            context: "rescaler vs network features",
            expected,
            found: rescaler.n_features(),
        });
    }
    let scaled = rescaler.apply(features)?;
    let (n_bins, n_feat) = scaled.dim();
    let batch = Array3::from_shape_fn((options.n_predictions, n_bins, n_feat), |(_, t, j)| scaled[[t, j]]);

    let mut rng = ChaCha8Rng::seed_from_u64(options.seed);
    let mode = if options.mc_dropout { ForwardMode::MonteCarlo } else { ForwardMode::Evaluate };
    let samples = network.forward(&batch, mode, &mut rng)?;
    debug!(n_predictions = options.n_predictions, n_bins, "ensemble predicted");
    Ok(EnsemblePrediction::new(samples, options.scaling))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::network::Architecture;
    use approx::assert_relative_eq;
    use ndarray::array;

    // -------------------------------------------------------------------------
    // Scope
    // -----
    // These tests cover:
    // - Seeded determinism and stochasticity of Monte Carlo passes.
    // - Scaling rules and the per-bin summary.
    // - Quantile interpolation and dimension checks.
    // -------------------------------------------------------------------------

    fn model(dropout: f64) -> (Network, FeatureRescaler) {
        let net = Network::new(Architecture::new(3, vec![4], vec![3], dropout).unwrap(), 2).unwrap();
        let rescaler = FeatureRescaler::from_scales(array![1.0, 0.5, 0.1]).unwrap();
        (net, rescaler)
    }

    fn features() -> Array2<f64> {
        array![[1.0, 2.0, 10.0], [0.5, 1.0, 3.0], [0.0, 0.0, 1.0], [2.0, 1.0, 0.0]]
    }

    #[test]
    // Purpose
    // -------
    // Verify seeded determinism, sample diversity and the dropout switch.
    //
    // Given
    // -----
    // - A network with dropout 0.3 and a 4-bin input.
    //
    // Expect
    // ------
    // - Same seed gives identical samples; samples differ across rows.
    // - With `mc_dropout = false` all rows equal the evaluation output.
    fn ensemble_is_seeded_and_stochastic() {
        // Arrange
        let (net, rescaler) = model(0.3);
        let options = EnsembleOptions::new(20, 4, Scaling::None).unwrap();

        // Act
        let a = predict_ensemble(&net, &rescaler, &features(), &options).unwrap();
        let b = predict_ensemble(&net, &rescaler, &features(), &options).unwrap();
        let off = EnsembleOptions { mc_dropout: false, ..options.clone() };
        let c = predict_ensemble(&net, &rescaler, &features(), &off).unwrap();

        // Assert
        assert_eq!(a, b);
        assert_eq!(a.samples().dim(), (20, 4));
        assert_ne!(a.samples().row(0), a.samples().row(1));
        let eval = net.evaluate(&rescaler.apply(&features()).unwrap().insert_axis(Axis(0))).unwrap();
        for row in c.samples().outer_iter() {
            assert_eq!(row, eval.row(0));
        }
    }

    #[test]
    // Purpose
    // -------
    // Check the three scaling rules on hand-built samples.
    //
    // Given
    // -----
    // - Log samples whose trajectories are [1, 3] and [3, 5].
    //
    // Expect
    // ------
    // - Mean trajectory [2, 4]; OneMean gives [2/3, 4/3]; FirstBin divides
    //   by the oldest bin and gives [0.5, 1].
    fn scaling_rules_divide_mean_trajectory() {
        let samples = array![[1.0, 3.0], [3.0, 5.0]].mapv(f64::ln_1p);

        let none = EnsemblePrediction::new(samples.clone(), Scaling::None).mean_trajectory();
        let one_mean = EnsemblePrediction::new(samples.clone(), Scaling::OneMean).mean_trajectory();
        let first = EnsemblePrediction::new(samples, Scaling::FirstBin).mean_trajectory();

        assert_relative_eq!(none[0], 2.0, epsilon = 1e-12);
        assert_relative_eq!(none[1], 4.0, epsilon = 1e-12);
        assert_relative_eq!(one_mean[0], 2.0 / 3.0, epsilon = 1e-12);
        assert_relative_eq!(one_mean[1], 4.0 / 3.0, epsilon = 1e-12);
        assert_relative_eq!(first[0], 0.5, epsilon = 1e-12);
        assert_relative_eq!(first[1], 1.0, epsilon = 1e-12);
    }

    #[test]
    // Purpose
    // -------
    // Pin what each scaling produces on a youngest-first trajectory.
    //
    // Given
    // -----
    // - One sample per ensemble whose trajectory is [10, 5, 2], youngest
    //   bin first.
    //
    // Expect
    // ------
    // - FirstBin leaves the oldest bin at exactly 1: [5, 2.5, 1].
    // - OneMean gives a trajectory whose mean is 1.
    // - The summary mean matches `mean_trajectory` for both.
    fn scaling_normalizes_oldest_bin_and_mean() {
        // Arrange
        let samples = array![[10.0, 5.0, 2.0]].mapv(f64::ln_1p);

        // Act
        let first = EnsemblePrediction::new(samples.clone(), Scaling::FirstBin);
        let one_mean = EnsemblePrediction::new(samples, Scaling::OneMean);

        // Assert
        let traj = first.mean_trajectory();
        assert_relative_eq!(traj[2], 1.0, epsilon = 1e-12);
        assert_relative_eq!(traj[0], 5.0, epsilon = 1e-12);
        assert_relative_eq!(traj[1], 2.5, epsilon = 1e-12);
        assert_relative_eq!(one_mean.mean_trajectory().mean().unwrap(), 1.0, epsilon = 1e-12);
        assert_eq!(first.summary().mean, traj);
        assert_eq!(one_mean.summary().mean, one_mean.mean_trajectory());
    }

    #[test]
    // Purpose
    // -------
    // Ensure an unusable denominator leaves values unscaled.
    //
    // Given
    // -----
    // - Trajectories whose oldest bin is 0, and an all-zero trajectory.
    //
    // Expect
    // ------
    // - FirstBin and OneMean return the unscaled mean, with no NaN or Inf.
    fn zero_denominator_falls_back_to_unscaled() {
        // Arrange
        let oldest_zero = array![[4.0, 2.0, 0.0]].mapv(f64::ln_1p);
        let all_zero = Array2::<f64>::zeros((2, 3));

        // Act
        let first = EnsemblePrediction::new(oldest_zero.clone(), Scaling::FirstBin).mean_trajectory();
        let none = EnsemblePrediction::new(oldest_zero, Scaling::None).mean_trajectory();
        let one_mean = EnsemblePrediction::new(all_zero, Scaling::OneMean);

        // Assert
        assert_eq!(first, none);
        assert_eq!(one_mean.mean_trajectory(), Array1::<f64>::zeros(3));
        let s = one_mean.summary();
        assert!(s.lower.iter().chain(&s.upper).chain(&s.median).all(|v| v.is_finite()));
    }

    #[test]
    // Purpose
    // -------
    // Verify summary ordering and quantile interpolation.
    fn summary_bounds_bracket_median() {
        let (net, rescaler) = model(0.4);
        let options = EnsembleOptions::new(200, 8, Scaling::OneMean).unwrap();
        let pred = predict_ensemble(&net, &rescaler, &features(), &options).unwrap();

        let summary = pred.summary();

        assert_eq!(summary.mean, pred.mean_trajectory());
        for b in 0..4 {
            assert!(summary.lower[b] <= summary.median[b]);
            assert!(summary.median[b] <= summary.upper[b]);
        }
        assert_relative_eq!(summary.mean.mean().unwrap(), 1.0, epsilon = 1e-12);
        assert_eq!(quantile(&[1.0, 2.0, 3.0, 4.0], 0.5), 2.5);
        assert_eq!(quantile(&[7.0], 0.975), 7.0);
        assert!(quantile(&[], 0.5).is_nan());
    }

    #[test]
    // Purpose
    // -------
    // Ensure feature-count disagreements surface as `DimensionMismatch`.
    fn ensemble_rejects_mismatched_features() {
        let (net, rescaler) = model(0.1);
        let wrong = Array2::<f64>::zeros((4, 5));
        assert!(matches!(
            predict_ensemble(&net, &rescaler, &wrong, &EnsembleOptions::default()),
            Err(ModelError::DimensionMismatch { .. })
        ));
        let other = FeatureRescaler::from_scales(array![1.0, 1.0]).unwrap();
        assert!(matches!(
            predict_ensemble(&net, &other, &features(), &EnsembleOptions::default()),
            Err(ModelError::DimensionMismatch { context: "rescaler vs network features", .. })
        ));
        assert!(EnsembleOptions::new(0, 0, Scaling::None).is_err());
    }
}
