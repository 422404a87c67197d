//! model — sequence regressor, training, Monte Carlo dropout inference.
//!
//! Purpose
//! -------
//! Learn the mapping from per-bin sampling features to log-transformed true
//! diversity, and use the trained network with dropout left active to
//! produce an ensemble of diversity trajectories for a new record.
//!
//! Key behaviors
//! -------------
//! - [`layers`]: LSTM / dense kernels with hand-written backward passes.
//! - [`network`]: the layer stack, forward modes and the MSE gradient.
//! - [`training`]: Adam with tail validation and early stopping.
//! - [`ensemble`]: Monte Carlo dropout sampling and summaries.
//! - [`artifact`]: one directory per trained model (weights, history,
//!   rescaler), loaded all-or-nothing.
//! - [`sweep`]: named model grids, per-model training, comparison reports.
//!
//! Invariants & assumptions
//! ------------------------
//! - A network, its training history and its rescaler are always used
//!   together; loading any of them alone is not supported.
//! - Model weights are never mutated during inference.
//!
//! Downstream usage
//! ----------------
//! - Build a [`Dataset`](crate::features::Dataset), call [`train_model`] or
//!   [`train_sweep`], save with [`ModelArtifact::save`], later
//!   [`ModelArtifact::load`] and [`ModelArtifact::predict`].

pub mod artifact;
pub mod ensemble;
pub mod errors;
pub mod layers;
pub mod network;
pub mod sweep;
pub mod training;

// ---- Re-exports (primary public surface) ----------------------------------
pub use self::artifact::ModelArtifact;
pub use self::ensemble::{
    predict_ensemble, EnsembleOptions, EnsemblePrediction, EnsembleSummary, Scaling,
};
pub use self::errors::{ModelError, ModelResult};
pub use self::network::{Architecture, ForwardMode, Network};
pub use self::sweep::{
    compare_models, default_grid, model_grid, save_sweep, train_model, train_sweep,
    write_comparison_csv, ComparisonRow, LossFunction, ModelSettings,
};
pub use self::training::{fit, Adam, TrainingHistory, TrainingOptions};
