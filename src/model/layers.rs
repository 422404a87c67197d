//! Layers — batched LSTM and dense kernels with explicit backward passes.
//!
//! Purpose
//! -------
//! Provide the numerical building blocks of the sequence regressor: an LSTM
//! layer returning the full hidden sequence, a fully connected layer,
//! inverted dropout masks and numerically stable activations. Each layer
//! exposes a forward pass that records what its backward pass needs.
//!
//! Key behaviors
//! -------------
//! - [`lstm_forward`] runs a `(batch, time, inputs)` tensor through one LSTM
//!   layer (gate order input, forget, candidate, output) starting from zero
//!   state, returning `(batch, time, hidden)` and an [`LstmCache`].
//! - [`lstm_backward`] performs backpropagation through time and returns the
//!   input gradient together with parameter gradients shaped like
//!   [`LstmWeights`].
//! - [`DenseWeights::forward`] / [`dense_backward`] handle `(rows, inputs)`
//!   matrices; time-distributed use flattens `(batch, time)` into rows.
//! - [`dropout_mask`] draws an inverted dropout mask (entries `0` or
//!   `1 / (1 - rate)`), so the expected activation is unchanged.
//!
//! Invariants & assumptions
//! ------------------------
//! - Shapes are validated by the network before these kernels run; the
//!   kernels themselves assume consistent inputs.
//! - `safe_softplus` and `safe_logistic` never overflow for finite input.
//!
//! Conventions
//! -----------
//! - Weight matrices are stored `(inputs, outputs)` so a forward pass is
//!   `x.dot(w) + b`.
//! - LSTM gate blocks occupy consecutive column ranges of width `hidden` in
//!   `w_x`, `w_h` and `b`.
use ndarray::{s, Array1, Array2, Array3, ArrayView2, ArrayView3, Axis};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Numerically stable `ln(1 + exp(x))`.
pub fn safe_softplus(x: f64) -> f64 {
    if x > 20.0 { x } else { x.exp().ln_1p() }
}

/// Numerically stable logistic function, the derivative of softplus.
pub fn safe_logistic(x: f64) -> f64 {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let e = x.exp();
        e / (1.0 + e)
    }
}

fn glorot<R: Rng + ?Sized>(rows: usize, cols: usize, rng: &mut R) -> Array2<f64> {
    let limit = (6.0 / (rows + cols) as f64).sqrt();
    Array2::from_shape_fn((rows, cols), |_| rng.gen_range(-limit..limit))
}

/// LstmWeights — input, recurrent and bias parameters of one LSTM layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LstmWeights {
    /// `(inputs, 4 · hidden)`
    pub w_x: Array2<f64>,
    /// `(hidden, 4 · hidden)`
    pub w_h: Array2<f64>,
    /// `4 · hidden`
    pub b: Array1<f64>,
}

impl LstmWeights {
    pub fn zeros(n_inputs: usize, n_hidden: usize) -> Self {
        LstmWeights {
            w_x: Array2::zeros((n_inputs, 4 * n_hidden)),
            w_h: Array2::zeros((n_hidden, 4 * n_hidden)),
            b: Array1::zeros(4 * n_hidden),
        }
    }

    /// Glorot-uniform weights with the forget-gate bias set to one.
    pub fn init<R: Rng + ?Sized>(n_inputs: usize, n_hidden: usize, rng: &mut R) -> Self {
        let mut b = Array1::zeros(4 * n_hidden);
        b.slice_mut(s![n_hidden..2 * n_hidden]).fill(1.0);
        LstmWeights {
            w_x: glorot(n_inputs, 4 * n_hidden, rng),
            w_h: glorot(n_hidden, 4 * n_hidden, rng),
            b,
        }
    }

    pub fn n_inputs(&self) -> usize {
        self.w_x.nrows()
    }

    pub fn n_hidden(&self) -> usize {
        self.w_h.nrows()
    }
}

/// Activations recorded by [`lstm_forward`] for [`lstm_backward`].
#[derive(Debug, Clone)]
pub struct LstmCache {
    inputs: Array3<f64>,
    /// `(batch, time + 1, hidden)`; slot 0 is the zero initial state.
    hidden: Array3<f64>,
    cell: Array3<f64>,
    /// Post-activation gates `(batch, time, 4 · hidden)`.
    gates: Array3<f64>,
}

/// Run one LSTM layer over a `(batch, time, inputs)` tensor.
pub fn lstm_forward(x: ArrayView3<'_, f64>, w: &LstmWeights) -> (Array3<f64>, LstmCache) {
    let (n_batch, n_time, _) = x.dim();
    let h = w.n_hidden();
    let mut hidden = Array3::<f64>::zeros((n_batch, n_time + 1, h));
    let mut cell = Array3::<f64>::zeros((n_batch, n_time + 1, h));
    let mut gates = Array3::<f64>::zeros((n_batch, n_time, 4 * h));

    for t in 0..n_time {
        let mut z = x.index_axis(Axis(1), t).dot(&w.w_x) + hidden.index_axis(Axis(1), t).dot(&w.w_h);
        z += &w.b;
        let i = z.slice(s![.., 0..h]).mapv(safe_logistic);
        let f = z.slice(s![.., h..2 * h]).mapv(safe_logistic);
        let g = z.slice(s![.., 2 * h..3 * h]).mapv(f64::tanh);
        let o = z.slice(s![.., 3 * h..]).mapv(safe_logistic);

        let c = &f * &cell.index_axis(Axis(1), t) + &i * &g;
        let h_t = &o * &c.mapv(f64::tanh);

        let mut g_t = gates.index_axis_mut(Axis(1), t);
        g_t.slice_mut(s![.., 0..h]).assign(&i);
        g_t.slice_mut(s![.., h..2 * h]).assign(&f);
        g_t.slice_mut(s![.., 2 * h..3 * h]).assign(&g);
        g_t.slice_mut(s![.., 3 * h..]).assign(&o);
        cell.index_axis_mut(Axis(1), t + 1).assign(&c);
        hidden.index_axis_mut(Axis(1), t + 1).assign(&h_t);
    }

    let out = hidden.slice(s![.., 1.., ..]).to_owned();
    (out, LstmCache { inputs: x.to_owned(), hidden, cell, gates })
}

/// Forward pass of one LSTM layer without caches, for inference.
///
/// Returns the same hidden sequence as [`lstm_forward`] while keeping only
/// the current hidden and cell states.
pub fn lstm_infer(x: ArrayView3<'_, f64>, w: &LstmWeights) -> Array3<f64> {
    let (n_batch, n_time, _) = x.dim();
    let h = w.n_hidden();
    let mut out = Array3::<f64>::zeros((n_batch, n_time, h));
    let mut h_t = Array2::<f64>::zeros((n_batch, h));
    let mut c_t = Array2::<f64>::zeros((n_batch, h));

    for t in 0..n_time {
        let mut z = x.index_axis(Axis(1), t).dot(&w.w_x) + h_t.dot(&w.w_h);
        z += &w.b;
        let i = z.slice(s![.., 0..h]).mapv(safe_logistic);
        let f = z.slice(s![.., h..2 * h]).mapv(safe_logistic);
        let g = z.slice(s![.., 2 * h..3 * h]).mapv(f64::tanh);
        let o = z.slice(s![.., 3 * h..]).mapv(safe_logistic);

        c_t = &f * &c_t + &i * &g;
        h_t = &o * &c_t.mapv(f64::tanh);
        out.index_axis_mut(Axis(1), t).assign(&h_t);
    }
    out
}

/// Backpropagate `d_out` (`(batch, time, hidden)`) through one LSTM layer.
///
/// Returns the gradient with respect to the layer input and the parameter
/// gradients.
pub fn lstm_backward(
    d_out: ArrayView3<'_, f64>, w: &LstmWeights, cache: &LstmCache,
) -> (Array3<f64>, LstmWeights) {
    let (n_batch, n_time, _) = d_out.dim();
    let h = w.n_hidden();
    let mut grad = LstmWeights::zeros(w.n_inputs(), h);
    let mut dx = Array3::<f64>::zeros((n_batch, n_time, w.n_inputs()));
    let mut dh_next = Array2::<f64>::zeros((n_batch, h));
    let mut dc_next = Array2::<f64>::zeros((n_batch, h));

    for t in (0..n_time).rev() {
        let gates = cache.gates.index_axis(Axis(1), t);
        let i = gates.slice(s![.., 0..h]);
        let f = gates.slice(s![.., h..2 * h]);
        let g = gates.slice(s![.., 2 * h..3 * h]);
        let o = gates.slice(s![.., 3 * h..]);
        let c_prev = cache.cell.index_axis(Axis(1), t);
        let tanh_c = cache.cell.index_axis(Axis(1), t + 1).mapv(f64::tanh);

        let dh = &d_out.index_axis(Axis(1), t) + &dh_next;
        let d_o = &dh * &tanh_c * o.mapv(|v| v * (1.0 - v));
        let dc = &dh * &o * tanh_c.mapv(|v| 1.0 - v * v) + &dc_next;
        let d_i = &dc * &g * i.mapv(|v| v * (1.0 - v));
        let d_f = &dc * &c_prev * f.mapv(|v| v * (1.0 - v));
        let d_g = &dc * &i * g.mapv(|v| 1.0 - v * v);
        dc_next = &dc * &f;

        let mut dz = Array2::<f64>::zeros((n_batch, 4 * h));
        dz.slice_mut(s![.., 0..h]).assign(&d_i);
        dz.slice_mut(s![.., h..2 * h]).assign(&d_f);
        dz.slice_mut(s![.., 2 * h..3 * h]).assign(&d_g);
        dz.slice_mut(s![.., 3 * h..]).assign(&d_o);

        grad.w_x += &cache.inputs.index_axis(Axis(1), t).t().dot(&dz);
        grad.w_h += &cache.hidden.index_axis(Axis(1), t).t().dot(&dz);
        grad.b += &dz.sum_axis(Axis(0));
        dx.index_axis_mut(Axis(1), t).assign(&dz.dot(&w.w_x.t()));
        dh_next = dz.dot(&w.w_h.t());
    }
    (dx, grad)
}

/// DenseWeights — a fully connected layer `x.dot(w) + b`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DenseWeights {
    pub w: Array2<f64>,
    pub b: Array1<f64>,
}

impl DenseWeights {
    pub fn zeros(n_inputs: usize, n_outputs: usize) -> Self {
        DenseWeights { w: Array2::zeros((n_inputs, n_outputs)), b: Array1::zeros(n_outputs) }
    }

    pub fn init<R: Rng + ?Sized>(n_inputs: usize, n_outputs: usize, rng: &mut R) -> Self {
        DenseWeights { w: glorot(n_inputs, n_outputs, rng), b: Array1::zeros(n_outputs) }
    }

    pub fn n_inputs(&self) -> usize {
        self.w.nrows()
    }

    pub fn n_outputs(&self) -> usize {
        self.w.ncols()
    }

    /// Pre-activation output for `(rows, inputs)`.
    pub fn forward(&self, x: ArrayView2<'_, f64>) -> Array2<f64> {
        let mut z = x.dot(&self.w);
        z += &self.b;
        z
    }
}

/// Gradients of a dense layer given its input `x` and the pre-activation
/// gradient `dz`. Returns `(dx, parameter gradients)`.
pub fn dense_backward(
    x: ArrayView2<'_, f64>, w: &DenseWeights, dz: &Array2<f64>,
) -> (Array2<f64>, DenseWeights) {
    let grad = DenseWeights { w: x.t().dot(dz), b: dz.sum_axis(Axis(0)) };
    (dz.dot(&w.w.t()), grad)
}

/// Inverted dropout mask with entries `0` (probability `rate`) or
/// `1 / (1 - rate)`. `rate` must lie in `[0, 1)`.
pub fn dropout_mask<R: Rng + ?Sized>(dim: (usize, usize), rate: f64, rng: &mut R) -> Array2<f64> {
    let keep = 1.0 / (1.0 - rate);
    Array2::from_shape_fn(dim, |_| if rng.gen::<f64>() < rate { 0.0 } else { keep })
}
