//! Training — minibatch Adam with early stopping on validation loss.
//!
//! Purpose
//! -------
//! Fit a [`Network`] to rescaled features and log-transformed labels,
//! holding out the tail of the dataset for validation, and record the loss
//! history used later for model comparison.
//!
//! Key behaviors
//! -------------
//! - Each epoch shuffles the training replicates with a seeded
//!   `ChaCha8Rng`, runs minibatch `Train`-mode passes and applies one
//!   [`Adam`] step per minibatch.
//! - After every epoch the validation MSE is computed in `Evaluate` mode.
//! - Training stops after `patience` epochs without improvement; the
//!   weights of the best validation epoch are restored before returning.
//!
//! Invariants & assumptions
//! ------------------------
//! - `TrainingHistory::best_epoch` always indexes the minimum of
//!   `val_loss`; ties keep the earliest epoch.
//! - A NaN or infinite loss aborts training with
//!   `ModelError::NonFiniteLoss`; the network is left at its last finite
//!   best weights.
//!
//! Conventions
//! -----------
//! - Labels passed to [`fit`] are already `ln(y + 1)`; features are already
//!   rescaled.
//! - Epochs are 0-based throughout.
use crate::model::{
    errors::{ModelError, ModelResult},
    network::Network,
};
use ndarray::{Array1, Array2, Array3, Axis};
use rand::{seq::SliceRandom, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Options controlling [`fit`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingOptions {
    /// Maximum number of epochs.
    pub epochs: usize,
    pub batch_size: usize,
    /// Epochs without validation improvement before stopping.
    pub patience: usize,
    /// Fraction of replicates, taken from the tail, used for validation.
    pub validation_split: f64,
    pub learning_rate: f64,
    /// Seed for shuffling and dropout masks.
    pub seed: u64,
    /// Log every epoch at `info` instead of `debug`.
    pub verbose: bool,
}

impl TrainingOptions {
    /// Validated constructor.
    ///
    /// Errors
    /// ------
    /// - `ModelError::InvalidOption` for zero epochs or batch size, a
    ///   validation split outside `(0, 1)`, or a non-positive learning rate.
    pub fn new(
        epochs: usize, batch_size: usize, patience: usize, validation_split: f64, learning_rate: f64,
        seed: u64,
    ) -> ModelResult<Self> {
        let options =
            TrainingOptions { epochs, batch_size, patience, validation_split, learning_rate, seed, verbose: false };
        options.validate()?;
        Ok(options)
    }

    pub fn validate(&self) -> ModelResult<()> {
        if self.epochs == 0 {
            return Err(ModelError::InvalidOption { name: "epochs", value: 0.0, reason: "must be at least 1" });
        }
        if self.batch_size == 0 {
            return Err(ModelError::InvalidOption { name: "batch_size", value: 0.0, reason: "must be at least 1" });
        }
        if !(self.validation_split > 0.0 && self.validation_split < 1.0) {
            return Err(ModelError::InvalidOption {
                name: "validation_split",
                value: self.validation_split,
                reason: "must lie in (0, 1)",
            });
        }
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(ModelError::InvalidOption {
                name: "learning_rate",
                value: self.learning_rate,
                reason: "must be finite and positive",
            });
        }
        Ok(())
    }
}

impl Default for TrainingOptions {
    fn default() -> Self {
        TrainingOptions {
            epochs: 1000,
            batch_size: 100,
            patience: 5,
            validation_split: 0.2,
            learning_rate: 1e-3,
            seed: 0,
            verbose: false,
        }
    }
}

/// Per-epoch losses and the epoch with the lowest validation loss.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingHistory {
    pub loss: Vec<f64>,
    pub val_loss: Vec<f64>,
    pub best_epoch: usize,
}

impl TrainingHistory {
    pub fn n_epochs(&self) -> usize {
        self.val_loss.len()
    }

    pub fn best_val_loss(&self) -> f64 {
        self.val_loss.get(self.best_epoch).copied().unwrap_or(f64::NAN)
    }

    /// Training loss recorded at the best validation epoch.
    pub fn training_loss_at_best(&self) -> f64 {
        self.loss.get(self.best_epoch).copied().unwrap_or(f64::NAN)
    }
}

/// Adam optimizer over a flat parameter vector (β₁ = 0.9, β₂ = 0.999).
#[derive(Debug, Clone)]
pub struct Adam {
    learning_rate: f64,
    beta1: f64,
    beta2: f64,
    eps: f64,
    m: Array1<f64>,
    v: Array1<f64>,
    t: i32,
}

impl Adam {
    pub fn new(n_params: usize, learning_rate: f64) -> Self {
        Adam {
            learning_rate,
            beta1: 0.9,
            beta2: 0.999,
            eps: 1e-8,
            m: Array1::zeros(n_params),
            v: Array1::zeros(n_params),
            t: 0,
        }
    }

    /// One bias-corrected update of `theta` against `grad`.
    pub fn step(&mut self, theta: &mut Array1<f64>, grad: &Array1<f64>) {
        self.t += 1;
        let (b1, b2) = (self.beta1, self.beta2);
        self.m.zip_mut_with(grad, |m, &g| *m = b1 * *m + (1.0 - b1) * g);
        self.v.zip_mut_with(grad, |v, &g| *v = b2 * *v + (1.0 - b2) * g * g);
        let c1 = 1.0 - b1.powi(self.t);
        let c2 = 1.0 - b2.powi(self.t);
        let lr = self.learning_rate;
        let eps = self.eps;
        ndarray::Zip::from(theta).and(&self.m).and(&self.v).for_each(|p, &m, &v| {
            *p -= lr * (m / c1) / ((v / c2).sqrt() + eps);
        });
    }
}

/// Train `network` in place and return its history.
///
/// Parameters
/// ----------
/// - `x`: rescaled features `(replicates, bins, features)`.
/// - `y`: log-transformed labels `(replicates, bins)`.
///
/// Errors
/// ------
/// - `ModelError::InvalidOption` for invalid options, or when the split
///   leaves either side empty.
/// - `ModelError::DimensionMismatch` when tensors disagree with the network
///   or with each other.
/// - `ModelError::NonFiniteLoss` when training diverges.
pub fn fit(
    network: &mut Network, x: &Array3<f64>, y: &Array2<f64>, options: &TrainingOptions,
) -> ModelResult<TrainingHistory> {
    options.validate()?;
    if y.nrows() != x.dim().0 {
        return Err(ModelError::DimensionMismatch {
            context: "label replicates",
            expected: x.dim().0,
            found: y.nrows(),
        });
    }
    let n = x.dim().0;
    let n_val = (options.validation_split * n as f64).round() as usize;
    if n_val == 0 || n_val >= n {
        return Err(ModelError::InvalidOption {
            name: "validation_split",
            value: options.validation_split,
            reason: "leaves an empty training or validation set",
        });
    }
    let n_train = n - n_val;
    let val_idx: Vec<usize> = (n_train..n).collect();
    let x_val = x.select(Axis(0), &val_idx);
    let y_val = y.select(Axis(0), &val_idx);

    let mut rng = ChaCha8Rng::seed_from_u64(options.seed);
    let mut adam = Adam::new(network.n_params(), options.learning_rate);
    let mut theta = network.theta();
    let mut best_theta = theta.clone();
    let mut history = TrainingHistory { loss: Vec::new(), val_loss: Vec::new(), best_epoch: 0 };
    let mut order: Vec<usize> = (0..n_train).collect();
    let mut wait = 0;

    for epoch in 0..options.epochs {
        order.shuffle(&mut rng);
        let mut epoch_loss = 0.0;
        for batch in order.chunks(options.batch_size) {
            let xb = x.select(Axis(0), batch);
            let yb = y.select(Axis(0), batch);
            let (loss, grad) = network.loss_and_grad(&xb, &yb, &mut rng)?;
            if !loss.is_finite() || grad.iter().any(|g| !g.is_finite()) {
                network.set_theta(&best_theta)?;
                return Err(ModelError::NonFiniteLoss { epoch });
            }
            adam.step(&mut theta, &grad);
            network.set_theta(&theta)?;
            epoch_loss += loss * batch.len() as f64;
        }
        let loss = epoch_loss / n_train as f64;
        let val_loss = network.mse(&x_val, &y_val)?;
        if !val_loss.is_finite() {
            network.set_theta(&best_theta)?;
            return Err(ModelError::NonFiniteLoss { epoch });
        }
        history.loss.push(loss);
        history.val_loss.push(val_loss);
        if options.verbose {
            info!(epoch, loss, val_loss, "epoch finished");
        } else {
            debug!(epoch, loss, val_loss, "epoch finished");
        }

        if epoch == 0 || val_loss < history.best_val_loss() {
            history.best_epoch = epoch;
            best_theta.assign(&theta);
            wait = 0;
        } else {
            wait += 1;
            if wait >= options.patience {
                info!(epoch, best_epoch = history.best_epoch, "early stopping");
                break;
            }
        }
    }

    network.set_theta(&best_theta)?;
    Ok(history)
}
