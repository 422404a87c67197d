//! features — fixed-shape tensors from occurrence data, rescaling, datasets.
//!
//! Purpose
//! -------
//! Bridge simulation and modelling: reduce every replicate (or an empirical
//! record) to a `(n_bins, n_features)` feature tensor and a label trajectory,
//! normalize features with a rescaler fitted once on training data, and
//! persist datasets.
//!
//! Key behaviors
//! -------------
//! - [`extract`]: deterministic per-bin summaries; the same function serves
//!   simulated and empirical inputs.
//! - [`rescaler`]: per-feature multiplicative scaling with an exact inverse.
//! - [`dataset`]: stacked tensors, tail splits, bincode/JSON persistence and
//!   batch simulation into a dataset.
//!
//! Invariants & assumptions
//! ------------------------
//! - Feature count and order are fixed by [`FeatureLayout`]; any mismatch is
//!   reported as `FeatureError::DimensionMismatch`, never coerced.

pub mod dataset;
pub mod errors;
pub mod extract;
pub mod rescaler;

pub use self::dataset::{load_settings, save_settings, simulate_dataset, Dataset, SimulatedBatch};
pub use self::errors::{FeatureError, FeatureResult};
pub use self::extract::{
    denormalize_labels, extract_features, label_trajectory, normalize_labels, FeatureLayout,
    N_BASE_FEATURES,
};
pub use self::rescaler::FeatureRescaler;
