//! Dataset — paired feature / label tensors and their persistence.
//!
//! Purpose
//! -------
//! Hold the `(replicates, bins, features)` feature tensor and the
//! `(replicates, bins)` label tensor produced by a simulation batch, split
//! them for training, and persist them under deterministic, tag-keyed names.
//!
//! Key behaviors
//! -------------
//! - [`simulate_dataset`] runs a [`RunContext`] batch and reduces every
//!   replicate to `(features, labels)` (and optionally its settings record)
//!   inside the workers.
//! - [`Dataset::split_tail`] holds out the last replicates as validation.
//! - Files: `{tag}_features.bin`, `{tag}_labels.bin` (bincode) and
//!   `{tag}_settings.json` (serde_json) inside a caller-supplied directory.
//!
//! Invariants & assumptions
//! ------------------------
//! - Feature and label tensors agree on replicates and bins; labels are raw
//!   (not log-transformed) diversity counts.
use crate::{
    features::{
        errors::{FeatureError, FeatureResult},
        extract::{extract_features, label_trajectory},
    },
    simulation::{
        batch::{collect_batches, RunContext},
        errors::SimError,
        preservation::SimulationSettings,
    },
};
use ndarray::{Array1, Array2, Array3, Axis};
use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    io::{BufReader, BufWriter},
    path::{Path, PathBuf},
};
use tracing::info;

/// Dataset — features `(n, bins, features)` and labels `(n, bins)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    features: Array3<f64>,
    labels: Array2<f64>,
}

impl Dataset {
    /// Pair tensors after checking that replicates and bins agree.
    pub fn new(features: Array3<f64>, labels: Array2<f64>) -> FeatureResult<Self> {
        let (n, bins, _) = features.dim();
        if labels.nrows() != n {
            return Err(FeatureError::DimensionMismatch {
                context: "dataset replicates",
                expected: n,
                found: labels.nrows(),
            });
        }
        if labels.ncols() != bins {
            return Err(FeatureError::DimensionMismatch {
                context: "dataset bins",
                expected: bins,
                found: labels.ncols(),
            });
        }
        Ok(Dataset { features, labels })
    }

    /// Stack per-replicate `(features, labels)` pairs.
    ///
    /// Errors
    /// ------
    /// - `FeatureError::EmptyBatch` for no pairs.
    /// - `FeatureError::DimensionMismatch` when shapes differ between pairs.
    pub fn from_pairs(pairs: Vec<(Array2<f64>, Array1<f64>)>) -> FeatureResult<Self> {
        let Some((first_x, _)) = pairs.first() else {
            return Err(FeatureError::EmptyBatch { name: "dataset" });
        };
        let (bins, n_feat) = first_x.dim();
        let n = pairs.len();
        let mut features = Array3::<f64>::zeros((n, bins, n_feat));
        let mut labels = Array2::<f64>::zeros((n, bins));
        for (i, (x, y)) in pairs.into_iter().enumerate() {
            if x.dim() != (bins, n_feat) {
                return Err(FeatureError::DimensionMismatch {
                    context: "replicate features",
                    expected: n_feat,
                    found: x.ncols(),
                });
            }
            if y.len() != bins {
                return Err(FeatureError::DimensionMismatch {
                    context: "replicate labels",
                    expected: bins,
                    found: y.len(),
                });
            }
            features.index_axis_mut(Axis(0), i).assign(&x);
            labels.row_mut(i).assign(&y);
        }
        Ok(Dataset { features, labels })
    }

    pub fn features(&self) -> &Array3<f64> {
        &self.features
    }

    pub fn labels(&self) -> &Array2<f64> {
        &self.labels
    }

    pub fn len(&self) -> usize {
        self.features.dim().0
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn n_bins(&self) -> usize {
        self.features.dim().1
    }

    pub fn n_features(&self) -> usize {
        self.features.dim().2
    }

    /// Replicates at `indices`, in that order.
    pub fn select(&self, indices: &[usize]) -> Dataset {
        Dataset {
            features: self.features.select(Axis(0), indices),
            labels: self.labels.select(Axis(0), indices),
        }
    }

    /// Split off the last `round(fraction · n)` replicates.
    ///
    /// Returns `(head, tail)`.
    pub fn split_tail(&self, fraction: f64) -> (Dataset, Dataset) {
        let n = self.len();
        let n_tail = ((fraction.clamp(0.0, 1.0) * n as f64).round() as usize).min(n);
        let cut = n - n_tail;
        let head: Vec<usize> = (0..cut).collect();
        let tail: Vec<usize> = (cut..n).collect();
        (self.select(&head), self.select(&tail))
    }

    /// Write `{tag}_features.bin` and `{tag}_labels.bin` into `dir`.
    pub fn save(&self, dir: &Path, tag: &str) -> FeatureResult<()> {
        let (fx, fy) = dataset_paths(dir, tag);
        write_bincode(&fx, &self.features)?;
        write_bincode(&fy, &self.labels)?;
        info!(path = %fx.display(), n = self.len(), "saved dataset");
        Ok(())
    }

    /// Load a dataset saved with [`Dataset::save`].
    ///
    /// Errors
    /// ------
    /// - `FeatureError::MissingArtifact` when either file is absent.
    /// - `FeatureError::Serialization` / `DimensionMismatch` for corrupt or
    ///   inconsistent files.
    pub fn load(dir: &Path, tag: &str) -> FeatureResult<Self> {
        let (fx, fy) = dataset_paths(dir, tag);
        let features: Array3<f64> = read_bincode(&fx)?;
        let labels: Array2<f64> = read_bincode(&fy)?;
        Dataset::new(features, labels)
    }
}

/// Output of [`simulate_dataset`].
#[derive(Debug, Clone)]
pub struct SimulatedBatch {
    pub dataset: Dataset,
    /// Per-replicate provenance (empty unless requested).
    pub settings: Vec<SimulationSettings>,
    /// Workers whose batch was aborted.
    pub failures: Vec<SimError>,
}

type Reduced = FeatureResult<(Array2<f64>, Array1<f64>, Option<SimulationSettings>)>;

/// Simulate a batch and reduce every replicate to `(features, labels)`.
///
/// Errors
/// ------
/// - `FeatureError::Simulation` carrying the first worker failure when no
///   worker produced data; `FeatureError::EmptyBatch` for an empty layout.
/// - Extraction errors (not expected for simulated data).
pub fn simulate_dataset(ctx: &RunContext, keep_settings: bool) -> FeatureResult<SimulatedBatch> {
    let outcomes = ctx.simulate_batch(|lineages, record| -> Reduced {
        let x = extract_features(&record.occurrence_data(), &ctx.binning)?;
        let y = label_trajectory(lineages, &ctx.binning);
        let settings = keep_settings.then_some(record.settings);
        Ok((x, y, settings))
    });
    let (reduced, failures) = collect_batches(outcomes);
    let mut pairs = Vec::with_capacity(reduced.len());
    let mut settings = Vec::new();
    for item in reduced {
        let (x, y, s) = item?;
        pairs.push((x, y));
        settings.extend(s);
    }
    if pairs.is_empty() {
        if let Some(first) = failures.first().cloned() {
            return Err(FeatureError::Simulation(first));
        }
    }
    let dataset = Dataset::from_pairs(pairs)?;
    Ok(SimulatedBatch { dataset, settings, failures })
}

/// Write per-replicate settings to `{tag}_settings.json`.
pub fn save_settings(dir: &Path, tag: &str, settings: &[SimulationSettings]) -> FeatureResult<()> {
    let path = dir.join(format!("{tag}_settings.json"));
    let file = File::create(&path).map_err(|e| io_error(&path, e))?;
    serde_json::to_writer_pretty(BufWriter::new(file), settings)
        .map_err(|e| FeatureError::Serialization { path: path.display().to_string(), text: e.to_string() })
}

/// Read settings written by [`save_settings`].
pub fn load_settings(dir: &Path, tag: &str) -> FeatureResult<Vec<SimulationSettings>> {
    let path = dir.join(format!("{tag}_settings.json"));
    let file = open_existing(&path)?;
    serde_json::from_reader(BufReader::new(file))
        .map_err(|e| FeatureError::Serialization { path: path.display().to_string(), text: e.to_string() })
}

fn dataset_paths(dir: &Path, tag: &str) -> (PathBuf, PathBuf) {
    (dir.join(format!("{tag}_features.bin")), dir.join(format!("{tag}_labels.bin")))
}

fn io_error(path: &Path, err: std::io::Error) -> FeatureError {
    FeatureError::Io { path: path.display().to_string(), text: err.to_string() }
}

fn open_existing(path: &Path) -> FeatureResult<File> {
    if !path.exists() {
        return Err(FeatureError::MissingArtifact { path: path.display().to_string() });
    }
    File::open(path).map_err(|e| io_error(path, e))
}

fn write_bincode<T: Serialize>(path: &Path, value: &T) -> FeatureResult<()> {
    let file = File::create(path).map_err(|e| io_error(path, e))?;
    bincode::serialize_into(BufWriter::new(file), value)
        .map_err(|e| FeatureError::Serialization { path: path.display().to_string(), text: e.to_string() })
}

fn read_bincode<T: serde::de::DeserializeOwned>(path: &Path) -> FeatureResult<T> {
    let file = open_existing(path)?;
    bincode::deserialize_from(BufReader::new(file))
        .map_err(|e| FeatureError::Serialization { path: path.display().to_string(), text: e.to_string() })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    // -------------------------------------------------------------------------
    // Scope
    // -----
    // These tests cover:
    // - Stacking, validation and tail splitting.
    // - Save / load round trips and missing-file errors.
    //
    // They intentionally DO NOT cover:
    // - `simulate_dataset` end to end (see the integration tests).
    // -------------------------------------------------------------------------

    fn pairs(n: usize) -> Vec<(Array2<f64>, Array1<f64>)> {
        (0..n)
            .map(|i| (Array2::from_elem((3, 4), i as f64), array![i as f64, 1.0, 2.0]))
            .collect()
    }

    #[test]
    // Purpose
    // -------
    // Verify stacking keeps replicate order and the tail split holds out the
    // last replicates.
    //
    // Given
    // -----
    // - 10 replicates whose features equal their index.
    //
    // Expect
    // ------
    // - Split 0.2 gives 8 head and 2 tail replicates; tail starts at index 8.
    fn from_pairs_and_split_tail() {
        // Arrange
        let data = Dataset::from_pairs(pairs(10)).unwrap();

        // Act
        let (head, tail) = data.split_tail(0.2);

        // Assert
        assert_eq!(data.len(), 10);
        assert_eq!((data.n_bins(), data.n_features()), (3, 4));
        assert_eq!(head.len(), 8);
        assert_eq!(tail.len(), 2);
        assert_eq!(tail.features()[[0, 0, 0]], 8.0);
        assert_eq!(tail.labels()[[1, 0]], 9.0);
    }

    #[test]
    // Purpose
    // -------
    // Ensure inconsistent pairs and empty inputs are rejected.
    fn from_pairs_rejects_inconsistent_shapes() {
        let mut bad = pairs(2);
        bad[1].0 = Array2::zeros((3, 5));
        assert!(matches!(Dataset::from_pairs(bad), Err(FeatureError::DimensionMismatch { .. })));
        assert!(matches!(Dataset::from_pairs(vec![]), Err(FeatureError::EmptyBatch { .. })));
    }

    #[test]
    // Purpose
    // -------
    // Verify save / load round trip and the missing-file error.
    fn save_load_round_trip_and_missing_file() {
        // Arrange
        let dir = tempfile::tempdir().unwrap();
        let data = Dataset::from_pairs(pairs(3)).unwrap();

        // Act
        data.save(dir.path(), "train").unwrap();
        let loaded = Dataset::load(dir.path(), "train").unwrap();
        let missing = Dataset::load(dir.path(), "absent");

        // Assert
        assert_eq!(loaded, data);
        assert!(dir.path().join("train_features.bin").exists());
        assert!(matches!(missing, Err(FeatureError::MissingArtifact { .. })));
    }
}
