//! Network — the sequence regressor and its parameter vector.
//!
//! Purpose
//! -------
//! Map a rescaled feature tensor `(batch, bins, features)` to one
//! non-negative log-diversity value per bin, and compute the mean-squared
//! error and its gradient for training.
//!
//! Key behaviors
//! -------------
//! - Layer stack: LSTM layers (full sequences) → dropout → dense ReLU layers,
//!   each followed by dropout → per-bin linear head → softplus.
//! - [`ForwardMode`] selects dropout behaviour: `Train` and `MonteCarlo`
//!   draw fresh masks from the supplied RNG, `Evaluate` disables dropout.
//!   Only `Train` keeps the activations needed for backpropagation.
//! - [`Network::loss_and_grad`] runs a `Train` pass and backpropagates the
//!   MSE into a flat gradient aligned with [`Network::theta`].
//! - Parameters flatten to and from a single `Array1<f64>` in a fixed order
//!   (per LSTM layer `w_x, w_h, b`; per dense layer `w, b`; head `w, b`),
//!   which is what the optimizer updates.
//!
//! Invariants & assumptions
//! ------------------------
//! - Input feature counts are checked against the architecture on every
//!   call; a mismatch is `ModelError::DimensionMismatch`.
//! - Weights are only mutated through [`Network::set_theta`]; forward passes
//!   take `&self`, so stochastic inference never changes the model.
//!
//! Testing notes
//! -------------
//! - Analytic gradients are compared with central finite differences on a
//!   small network with dropout disabled.
use crate::model::{
    errors::{ModelError, ModelResult},
    layers::{
        dense_backward, dropout_mask, lstm_backward, lstm_forward, lstm_infer, safe_logistic,
        safe_softplus,
        DenseWeights, LstmCache, LstmWeights,
    },
};
use ndarray::{s, Array1, Array2, Array3, ArrayViewD, ArrayViewMutD};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

/// Architecture — layer sizes and dropout rate of a [`Network`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Architecture {
    pub n_features: usize,
    pub lstm_nodes: Vec<usize>,
    pub dense_nodes: Vec<usize>,
    pub dropout: f64,
}

impl Architecture {
    /// Validated constructor.
    ///
    /// Errors
    /// ------
    /// - `ModelError::InvalidArchitecture` for zero features, an empty LSTM
    ///   stack, zero-width layers, or dropout outside `[0, 1)`.
    pub fn new(
        n_features: usize, lstm_nodes: Vec<usize>, dense_nodes: Vec<usize>, dropout: f64,
    ) -> ModelResult<Self> {
        let arch = Architecture { n_features, lstm_nodes, dense_nodes, dropout };
        arch.validate()?;
        Ok(arch)
    }

    pub fn validate(&self) -> ModelResult<()> {
        if self.n_features == 0 {
            return Err(ModelError::InvalidArchitecture { reason: "the network needs at least one feature" });
        }
        if self.lstm_nodes.is_empty() {
            return Err(ModelError::InvalidArchitecture { reason: "at least one LSTM layer is required" });
        }
        if self.lstm_nodes.iter().chain(&self.dense_nodes).any(|&n| n == 0) {
            return Err(ModelError::InvalidArchitecture { reason: "layer widths must be positive" });
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(ModelError::InvalidArchitecture { reason: "dropout must lie in [0, 1)" });
        }
        Ok(())
    }

    /// Total number of trainable parameters.
    pub fn n_params(&self) -> usize {
        let mut n_in = self.n_features;
        let mut total = 0;
        for &h in &self.lstm_nodes {
            total += (n_in + h + 1) * 4 * h;
            n_in = h;
        }
        for &d in &self.dense_nodes {
            total += (n_in + 1) * d;
            n_in = d;
        }
        total + n_in + 1
    }
}

/// How dropout behaves during a forward pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardMode {
    /// Dropout active; used while fitting.
    Train,
    /// Dropout disabled; deterministic output.
    Evaluate,
    /// Dropout active at inference time for Monte Carlo ensembles; no
    /// backpropagation caches are kept.
    MonteCarlo,
}

/// Parameters — all weights of a network, also used for gradients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameters {
    pub lstm: Vec<LstmWeights>,
    pub dense: Vec<DenseWeights>,
    pub output: DenseWeights,
}

impl Parameters {
    pub fn zeros(arch: &Architecture) -> Self {
        Self::build(arch, LstmWeights::zeros, DenseWeights::zeros)
    }

    pub fn init<R: Rng + ?Sized>(arch: &Architecture, rng: &mut R) -> Self {
        let mut lstm = Vec::with_capacity(arch.lstm_nodes.len());
        let mut n_in = arch.n_features;
        for &h in &arch.lstm_nodes {
            lstm.push(LstmWeights::init(n_in, h, rng));
            n_in = h;
        }
        let mut dense = Vec::with_capacity(arch.dense_nodes.len());
        for &d in &arch.dense_nodes {
            dense.push(DenseWeights::init(n_in, d, rng));
            n_in = d;
        }
        Parameters { lstm, dense, output: DenseWeights::init(n_in, 1, rng) }
    }

    fn build(
        arch: &Architecture, lstm_fn: impl Fn(usize, usize) -> LstmWeights,
        dense_fn: impl Fn(usize, usize) -> DenseWeights,
    ) -> Self {
        let mut n_in = arch.n_features;
        let mut lstm = Vec::with_capacity(arch.lstm_nodes.len());
        for &h in &arch.lstm_nodes {
            lstm.push(lstm_fn(n_in, h));
            n_in = h;
        }
        let mut dense = Vec::with_capacity(arch.dense_nodes.len());
        for &d in &arch.dense_nodes {
            dense.push(dense_fn(n_in, d));
            n_in = d;
        }
        Parameters { lstm, dense, output: dense_fn(n_in, 1) }
    }

    fn tensors(&self) -> Vec<ArrayViewD<'_, f64>> {
        let mut out = Vec::with_capacity(3 * self.lstm.len() + 2 * self.dense.len() + 2);
        for layer in &self.lstm {
            out.push(layer.w_x.view().into_dyn());
            out.push(layer.w_h.view().into_dyn());
            out.push(layer.b.view().into_dyn());
        }
        for layer in self.dense.iter().chain(std::iter::once(&self.output)) {
            out.push(layer.w.view().into_dyn());
            out.push(layer.b.view().into_dyn());
        }
        out
    }

    fn tensors_mut(&mut self) -> Vec<ArrayViewMutD<'_, f64>> {
        let mut out = Vec::with_capacity(3 * self.lstm.len() + 2 * self.dense.len() + 2);
        for LstmWeights { w_x, w_h, b } in self.lstm.iter_mut() {
            out.push(w_x.view_mut().into_dyn());
            out.push(w_h.view_mut().into_dyn());
            out.push(b.view_mut().into_dyn());
        }
        for DenseWeights { w, b } in self.dense.iter_mut().chain(std::iter::once(&mut self.output)) {
            out.push(w.view_mut().into_dyn());
            out.push(b.view_mut().into_dyn());
        }
        out
    }

    pub fn len(&self) -> usize {
        self.tensors().iter().map(|t| t.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All parameters in layer order.
    pub fn flatten(&self) -> Array1<f64> {
        self.tensors().into_iter().flat_map(|t| t.into_iter().copied()).collect()
    }

    /// Overwrite every parameter from a flat vector produced by
    /// [`Parameters::flatten`].
    pub fn assign_flat(&mut self, theta: &Array1<f64>) -> ModelResult<()> {
        let expected = self.len();
        if theta.len() != expected {
            return Err(ModelError::DimensionMismatch {
                context: "parameter vector",
                expected,
                found: theta.len(),
            });
        }
        let mut offset = 0;
        for mut tensor in self.tensors_mut() {
            let n = tensor.len();
            tensor.iter_mut().zip(theta.slice(s![offset..offset + n])).for_each(|(dst, &src)| *dst = src);
            offset += n;
        }
        Ok(())
    }

    fn same_shapes(&self, other: &Parameters) -> bool {
        let (a, b) = (self.tensors(), other.tensors());
        a.len() == b.len() && a.iter().zip(&b).all(|(x, y)| x.shape() == y.shape())
    }
}

/// Intermediate values of a forward pass needed for backpropagation.
struct Trace {
    lstm: Vec<LstmCache>,
    lstm_mask: Option<Array2<f64>>,
    dense_inputs: Vec<Array2<f64>>,
    dense_pre: Vec<Array2<f64>>,
    dense_masks: Vec<Option<Array2<f64>>>,
    head_input: Array2<f64>,
    head_pre: Array2<f64>,
}

/// Network — an [`Architecture`] with its [`Parameters`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Network {
    architecture: Architecture,
    params: Parameters,
}

impl Network {
    /// Freshly initialized network; `seed` fixes the initial weights.
    pub fn new(architecture: Architecture, seed: u64) -> ModelResult<Self> {
        architecture.validate()?;
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let params = Parameters::init(&architecture, &mut rng);
        Ok(Network { architecture, params })
    }

    /// Rebuild from stored parts, checking every tensor shape.
    pub fn from_parts(architecture: Architecture, params: Parameters) -> ModelResult<Self> {
        architecture.validate()?;
        let reference = Parameters::zeros(&architecture);
        if !reference.same_shapes(&params) {
            return Err(ModelError::DimensionMismatch {
                context: "stored network weights",
                expected: reference.len(),
                found: params.len(),
            });
        }
        Ok(Network { architecture, params })
    }

    pub fn architecture(&self) -> &Architecture {
        &self.architecture
    }

    pub fn parameters(&self) -> &Parameters {
        &self.params
    }

    pub fn n_params(&self) -> usize {
        self.params.len()
    }

    pub fn theta(&self) -> Array1<f64> {
        self.params.flatten()
    }

    pub fn set_theta(&mut self, theta: &Array1<f64>) -> ModelResult<()> {
        self.params.assign_flat(theta)
    }

    /// Forward pass returning `(batch, bins)` log-space predictions.
    ///
    /// `rng` supplies dropout masks in `Train` and `MonteCarlo` mode and is
    /// left untouched in `Evaluate` mode.
    pub fn forward<R: Rng + ?Sized>(
        &self, x: &Array3<f64>, mode: ForwardMode, rng: &mut R,
    ) -> ModelResult<Array2<f64>> {
        match mode {
            ForwardMode::Train => Ok(self.run(x, Some(rng))?.0),
            ForwardMode::MonteCarlo => self.infer(x, Some(rng)),
            ForwardMode::Evaluate => self.infer::<ChaCha8Rng>(x, None),
        }
    }

    /// Deterministic forward pass with dropout disabled.
    pub fn evaluate(&self, x: &Array3<f64>) -> ModelResult<Array2<f64>> {
        self.infer::<ChaCha8Rng>(x, None)
    }

    /// Mean squared error of evaluation-mode predictions against `y`.
    pub fn mse(&self, x: &Array3<f64>, y: &Array2<f64>) -> ModelResult<f64> {
        self.check_targets(x, y)?;
        let pred = self.evaluate(x)?;
        Ok((&pred - y).mapv(|d| d * d).mean().unwrap_or(f64::NAN))
    }

    /// Training-mode MSE and its gradient with respect to [`Network::theta`].
    ///
    /// Errors
    /// ------
    /// - `ModelError::DimensionMismatch` when `x` or `y` disagree with the
    ///   network or with each other, or when the batch is empty.
    pub fn loss_and_grad<R: Rng + ?Sized>(
        &self, x: &Array3<f64>, y: &Array2<f64>, rng: &mut R,
    ) -> ModelResult<(f64, Array1<f64>)> {
        self.check_targets(x, y)?;
        let (n_batch, n_bins, _) = x.dim();
        let n = (n_batch * n_bins) as f64;
        let (pred, trace) = self.run(x, Some(rng))?;

        let diff = &pred - y;
        let loss = diff.mapv(|d| d * d).sum() / n;

        let mut grads = Parameters::zeros(&self.architecture);
        let d_pred = rows(diff.iter().map(|d| 2.0 * d / n).collect(), n_batch * n_bins, 1)?;
        let dz_head = d_pred * trace.head_pre.mapv(safe_logistic);
        let (mut da, g_head) = dense_backward(trace.head_input.view(), &self.params.output, &dz_head);
        grads.output = g_head;

        for k in (0..self.params.dense.len()).rev() {
            if let Some(mask) = &trace.dense_masks[k] {
                da *= mask;
            }
            let dz = da * trace.dense_pre[k].mapv(|v| if v > 0.0 { 1.0 } else { 0.0 });
            let (dx, g) = dense_backward(trace.dense_inputs[k].view(), &self.params.dense[k], &dz);
            grads.dense[k] = g;
            da = dx;
        }
        if let Some(mask) = &trace.lstm_mask {
            da *= mask;
        }

        let width = da.ncols();
        let mut d_seq = Array3::from_shape_vec((n_batch, n_bins, width), da.iter().copied().collect())
            .map_err(|_| reshape_error(n_batch * n_bins * width))?;
        for k in (0..self.params.lstm.len()).rev() {
            let (dx, g) = lstm_backward(d_seq.view(), &self.params.lstm[k], &trace.lstm[k]);
            grads.lstm[k] = g;
            d_seq = dx;
        }
        Ok((loss, grads.flatten()))
    }

    // Inference pass: same masks in the same order as `run`, no caches.
    fn infer<R: Rng + ?Sized>(
        &self, x: &Array3<f64>, mut rng: Option<&mut R>,
    ) -> ModelResult<Array2<f64>> {
        let (n_batch, n_bins, n_feat) = x.dim();
        self.check_features(n_feat)?;
        let rate = self.architecture.dropout;
        let mut apply_dropout = |a: &mut Array2<f64>| {
            if let Some(r) = rng.as_deref_mut() {
                if rate > 0.0 {
                    let mask = dropout_mask(a.dim(), rate, r);
                    *a *= &mask;
                }
            }
        };

        let mut seq = x.to_owned();
        for layer in &self.params.lstm {
            seq = lstm_infer(seq.view(), layer);
        }
        let width = seq.dim().2;
        let mut a = rows(seq.iter().copied().collect(), n_batch * n_bins, width)?;
        apply_dropout(&mut a);
        for layer in &self.params.dense {
            a = layer.forward(a.view()).mapv(|v| v.max(0.0));
            apply_dropout(&mut a);
        }
        let head = self.params.output.forward(a.view());
        rows(head.iter().map(|&v| safe_softplus(v)).collect(), n_batch, n_bins)
    }

    fn check_features(&self, n_feat: usize) -> ModelResult<()> {
        if n_feat != self.architecture.n_features {
            return Err(ModelError::DimensionMismatch {
                context: "network input features",
                expected: self.architecture.n_features,
                found: n_feat,
            });
        }
        Ok(())
    }

    fn run<R: Rng + ?Sized>(
        &self, x: &Array3<f64>, mut rng: Option<&mut R>,
    ) -> ModelResult<(Array2<f64>, Trace)> {
        let (n_batch, n_bins, n_feat) = x.dim();
        self.check_features(n_feat)?;
        let rate = self.architecture.dropout;
        let mut draw_mask = |dim: (usize, usize)| -> Option<Array2<f64>> {
            match rng.as_deref_mut() {
                Some(r) if rate > 0.0 => Some(dropout_mask(dim, rate, r)),
                _ => None,
            }
        };

        let mut seq = x.to_owned();
        let mut lstm_caches = Vec::with_capacity(self.params.lstm.len());
        for layer in &self.params.lstm {
            let (out, cache) = lstm_forward(seq.view(), layer);
            lstm_caches.push(cache);
            seq = out;
        }

        let width = seq.dim().2;
        let mut a = rows(seq.iter().copied().collect(), n_batch * n_bins, width)?;
        let lstm_mask = draw_mask(a.dim());
        if let Some(mask) = &lstm_mask {
            a *= mask;
        }

        let mut dense_inputs = Vec::with_capacity(self.params.dense.len());
        let mut dense_pre = Vec::with_capacity(self.params.dense.len());
        let mut dense_masks = Vec::with_capacity(self.params.dense.len());
        for layer in &self.params.dense {
            let z = layer.forward(a.view());
            let mut act = z.mapv(|v| v.max(0.0));
            let mask = draw_mask(act.dim());
            if let Some(m) = &mask {
                act *= m;
            }
            dense_inputs.push(a);
            dense_pre.push(z);
            dense_masks.push(mask);
            a = act;
        }

        let head_pre = self.params.output.forward(a.view());
        let pred = rows(head_pre.iter().map(|&v| safe_softplus(v)).collect(), n_batch, n_bins)?;
        let trace = Trace {
            lstm: lstm_caches,
            lstm_mask,
            dense_inputs,
            dense_pre,
            dense_masks,
            head_input: a,
            head_pre,
        };
        Ok((pred, trace))
    }

    fn check_targets(&self, x: &Array3<f64>, y: &Array2<f64>) -> ModelResult<()> {
        let (n_batch, n_bins, _) = x.dim();
        if n_batch == 0 || n_bins == 0 {
            return Err(ModelError::DimensionMismatch { context: "empty batch", expected: 1, found: 0 });
        }
        if y.nrows() != n_batch {
            return Err(ModelError::DimensionMismatch {
                context: "label replicates",
                expected: n_batch,
                found: y.nrows(),
            });
        }
        if y.ncols() != n_bins {
            return Err(ModelError::DimensionMismatch {
                context: "label bins",
                expected: n_bins,
                found: y.ncols(),
            });
        }
        Ok(())
    }
}

fn rows(data: Vec<f64>, n_rows: usize, n_cols: usize) -> ModelResult<Array2<f64>> {
    let found = data.len();
    Array2::from_shape_vec((n_rows, n_cols), data).map_err(|_| reshape_error(found))
}

fn reshape_error(found: usize) -> ModelError {
    ModelError::DimensionMismatch { context: "activation reshape", expected: found, found }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use finitediff::FiniteDiff;

    // -------------------------------------------------------------------------
    // Scope
    // -----
    // These tests cover:
    // - Architecture validation and parameter counting.
    // - Flatten / assign round trips of the parameter vector.
    // - Forward-mode semantics (evaluate vs Monte Carlo dropout).
    // - Full-network gradients against central finite differences.
    // -------------------------------------------------------------------------

    fn small_arch(dropout: f64) -> Architecture {
        Architecture::new(3, vec![4, 2], vec![3], dropout).unwrap()
    }

    fn inputs() -> (Array3<f64>, Array2<f64>) {
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        let x = Array3::from_shape_fn((2, 4, 3), |_| rng.gen_range(-1.0..1.0));
        let y = Array2::from_shape_fn((2, 4), |_| rng.gen_range(0.0..3.0));
        (x, y)
    }

    #[test]
    // Purpose
    // -------
    // Verify invalid architectures are rejected and parameter counts agree
    // between the closed form and the allocated tensors.
    fn architecture_validation_and_param_count() {
        assert!(Architecture::new(0, vec![4], vec![], 0.1).is_err());
        assert!(Architecture::new(3, vec![], vec![], 0.1).is_err());
        assert!(Architecture::new(3, vec![4, 0], vec![], 0.1).is_err());
        assert!(Architecture::new(3, vec![4], vec![], 1.0).is_err());

        let arch = small_arch(0.1);
        let net = Network::new(arch.clone(), 1).unwrap();
        assert_eq!(net.n_params(), arch.n_params());
        // lstm 3→4: (3 + 4 + 1)·16, lstm 4→2: (4 + 2 + 1)·8, dense 2→3, head 3→1
        assert_eq!(arch.n_params(), 128 + 56 + 9 + 4);
    }

    #[test]
    // Purpose
    // -------
    // Ensure theta round-trips and wrong lengths are rejected.
    fn theta_round_trip_and_length_check() {
        let mut net = Network::new(small_arch(0.0), 2).unwrap();
        let theta = net.theta();
        let shifted = theta.mapv(|v| v + 0.5);
        net.set_theta(&shifted).unwrap();
        assert_eq!(net.theta(), shifted);
        assert!(matches!(
            net.set_theta(&Array1::zeros(3)),
            Err(ModelError::DimensionMismatch { context: "parameter vector", .. })
        ));
    }

    #[test]
    // Purpose
    // -------
    // Verify forward-mode semantics.
    //
    // Given
    // -----
    // - A network with dropout 0.3 and a fixed input.
    //
    // Expect
    // ------
    // - Evaluate is deterministic and ignores the RNG.
    // - Monte Carlo passes differ between draws but repeat under the same
    //   seed; all predictions are non-negative.
    fn forward_modes_control_dropout() {
        // Arrange
        let net = Network::new(small_arch(0.3), 4).unwrap();
        let (x, _) = inputs();
        let mut rng = ChaCha8Rng::seed_from_u64(9);

        // Act
        let e1 = net.forward(&x, ForwardMode::Evaluate, &mut rng).unwrap();
        let e2 = net.evaluate(&x).unwrap();
        let mc1 = net.forward(&x, ForwardMode::MonteCarlo, &mut rng).unwrap();
        let mc2 = net.forward(&x, ForwardMode::MonteCarlo, &mut rng).unwrap();
        let mc1_again =
            net.forward(&x, ForwardMode::MonteCarlo, &mut ChaCha8Rng::seed_from_u64(9)).unwrap();

        // Assert
        assert_eq!(e1, e2);
        assert_eq!(e1.dim(), (2, 4));
        assert_ne!(mc1, mc2);
        assert_eq!(mc1, mc1_again);
        assert!(mc1.iter().chain(e1.iter()).all(|&v| v >= 0.0 && v.is_finite()));
    }

    #[test]
    // Purpose
    // -------
    // Ensure the cache-free Monte Carlo pass draws the same masks as the
    // training pass.
    //
    // Given
    // -----
    // - A two-LSTM, one-dense network with dropout 0.4 and one seed.
    //
    // Expect
    // ------
    // - `Train` and `MonteCarlo` predictions agree for the same RNG state.
    fn monte_carlo_matches_train_pass_without_caches() {
        // Arrange
        let arch = Architecture::new(3, vec![5, 3], vec![4], 0.4).unwrap();
        let net = Network::new(arch, 6).unwrap();
        let (x, _) = inputs();

        // Act
        let train = net.forward(&x, ForwardMode::Train, &mut ChaCha8Rng::seed_from_u64(2)).unwrap();
        let mc = net.forward(&x, ForwardMode::MonteCarlo, &mut ChaCha8Rng::seed_from_u64(2)).unwrap();

        // Assert
        assert_eq!(train.dim(), mc.dim());
        for (a, b) in train.iter().zip(mc.iter()) {
            assert_relative_eq!(*a, *b, epsilon = 1e-12);
        }
    }

    #[test]
    // Purpose
    // -------
    // Ensure input feature counts and label shapes are checked.
    fn forward_rejects_wrong_shapes() {
        let net = Network::new(small_arch(0.0), 4).unwrap();
        let bad = Array3::<f64>::zeros((2, 4, 5));
        assert!(matches!(
            net.evaluate(&bad),
            Err(ModelError::DimensionMismatch { expected: 3, found: 5, .. })
        ));
        let (x, _) = inputs();
        assert!(net.mse(&x, &Array2::zeros((2, 3))).is_err());
    }

    #[test]
    // Purpose
    // -------
    // Check the analytic gradient of the MSE against central differences.
    //
    // Given
    // -----
    // - The small architecture with dropout disabled and random data.
    //
    // Expect
    // ------
    // - Training loss equals the evaluation MSE.
    // - Every gradient entry agrees with the finite-difference estimate.
    fn loss_gradient_matches_finite_differences() {
        // Arrange
        let net = Network::new(small_arch(0.0), 6).unwrap();
        let (x, y) = inputs();
        let objective = |theta: &Vec<f64>| -> f64 {
            let mut probe = net.clone();
            probe.set_theta(&Array1::from(theta.clone())).unwrap();
            probe.mse(&x, &y).unwrap()
        };

        // Act
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let (loss, grad) = net.loss_and_grad(&x, &y, &mut rng).unwrap();
        let fd = net.theta().to_vec().central_diff(&objective);

        // Assert
        assert_relative_eq!(loss, net.mse(&x, &y).unwrap(), epsilon = 1e-12);
        assert_eq!(grad.len(), fd.len());
        for (a, b) in grad.iter().zip(fd.iter()) {
            assert_relative_eq!(*a, *b, epsilon = 1e-6);
        }
    }
}
