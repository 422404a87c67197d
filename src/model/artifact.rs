//! Model artifacts — a trained network, its history and its rescaler.
//!
//! Purpose
//! -------
//! Persist everything inference needs in one directory, and refuse to load
//! a partial or inconsistent set of files.
//!
//! Key behaviors
//! -------------
//! - [`ModelArtifact::save`] writes `architecture.json`, `weights.bin`
//!   (bincode), `history.json` and `rescaler.json` into a directory.
//! - [`ModelArtifact::load`] requires all four; any absent file is
//!   `ModelError::MissingArtifact` naming the path.
//! - Weights are checked against the stored architecture, and the rescaler's
//!   feature count against the network input.
//!
//! Conventions
//! -----------
//! - The artifact name is the directory's final component.
use crate::{
    features::rescaler::FeatureRescaler,
    model::{
        ensemble::{predict_ensemble, EnsembleOptions, EnsemblePrediction},
        errors::{ModelError, ModelResult},
        network::{Architecture, Network, Parameters},
        training::TrainingHistory,
    },
};
use ndarray::Array2;
use serde::{de::DeserializeOwned, Serialize};
use std::{
    fs::{self, File},
    io::{BufReader, BufWriter},
    path::Path,
};
use tracing::info;

const ARCHITECTURE_FILE: &str = "architecture.json";
const WEIGHTS_FILE: &str = "weights.bin";
const HISTORY_FILE: &str = "history.json";
const RESCALER_FILE: &str = "rescaler.json";

/// ModelArtifact — network, training history and fitted rescaler.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelArtifact {
    pub name: String,
    pub network: Network,
    pub history: TrainingHistory,
    pub rescaler: FeatureRescaler,
}

impl ModelArtifact {
    /// Bundle parts after checking the rescaler matches the network input.
    pub fn new(
        name: impl Into<String>, network: Network, history: TrainingHistory, rescaler: FeatureRescaler,
    ) -> ModelResult<Self> {
        let expected = network.architecture().n_features;
        if rescaler.n_features() != expected {
            return Err(ModelError::DimensionMismatch {
                context: "artifact rescaler",
                expected,
                found: rescaler.n_features(),
            });
        }
        Ok(ModelArtifact { name: name.into(), network, history, rescaler })
    }

    /// Write the artifact into `dir`, creating it if needed.
    pub fn save(&self, dir: &Path) -> ModelResult<()> {
        fs::create_dir_all(dir).map_err(|e| io_error(dir, e))?;
        write_json(&dir.join(ARCHITECTURE_FILE), self.network.architecture())?;
        write_bincode(&dir.join(WEIGHTS_FILE), self.network.parameters())?;
        write_json(&dir.join(HISTORY_FILE), &self.history)?;
        write_json(&dir.join(RESCALER_FILE), &self.rescaler)?;
        info!(model = %self.name, path = %dir.display(), "saved model artifact");
        Ok(())
    }

    /// Load an artifact written by [`ModelArtifact::save`].
    ///
    /// Errors
    /// ------
    /// - `ModelError::MissingArtifact` when any of the four files is absent.
    /// - `ModelError::Serialization` for unreadable content.
    /// - `ModelError::DimensionMismatch` when weights, architecture and
    ///   rescaler disagree.
    pub fn load(dir: &Path) -> ModelResult<Self> {
        let architecture: Architecture = read_json(&dir.join(ARCHITECTURE_FILE))?;
        let params: Parameters = read_bincode(&dir.join(WEIGHTS_FILE))?;
        let history: TrainingHistory = read_json(&dir.join(HISTORY_FILE))?;
        let rescaler: FeatureRescaler = read_json(&dir.join(RESCALER_FILE))?;
        let network = Network::from_parts(architecture, params)?;
        let name = dir.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
        info!(model = %name, path = %dir.display(), "loaded model artifact");
        ModelArtifact::new(name, network, history, rescaler)
    }

    /// Monte Carlo dropout ensemble for one `(bins, features)` tensor.
    pub fn predict(&self, features: &Array2<f64>, options: &EnsembleOptions) -> ModelResult<EnsemblePrediction> {
        predict_ensemble(&self.network, &self.rescaler, features, options)
    }
}

fn io_error(path: &Path, err: std::io::Error) -> ModelError {
    ModelError::Io { path: path.display().to_string(), text: err.to_string() }
}

fn serialization_error(path: &Path, text: String) -> ModelError {
    ModelError::Serialization { path: path.display().to_string(), text }
}

fn open_existing(path: &Path) -> ModelResult<File> {
    if !path.is_file() {
        return Err(ModelError::MissingArtifact { path: path.display().to_string() });
    }
    File::open(path).map_err(|e| io_error(path, e))
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> ModelResult<()> {
    let file = File::create(path).map_err(|e| io_error(path, e))?;
    serde_json::to_writer_pretty(BufWriter::new(file), value).map_err(|e| serialization_error(path, e.to_string()))
}

fn read_json<T: DeserializeOwned>(path: &Path) -> ModelResult<T> {
    let file = open_existing(path)?;
    serde_json::from_reader(BufReader::new(file)).map_err(|e| serialization_error(path, e.to_string()))
}

fn write_bincode<T: Serialize + ?Sized>(path: &Path, value: &T) -> ModelResult<()> {
    let file = File::create(path).map_err(|e| io_error(path, e))?;
    bincode::serialize_into(BufWriter::new(file), value).map_err(|e| serialization_error(path, e.to_string()))
}

fn read_bincode<T: DeserializeOwned>(path: &Path) -> ModelResult<T> {
    let file = open_existing(path)?;
    bincode::deserialize_from(BufReader::new(file)).map_err(|e| serialization_error(path, e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    // -------------------------------------------------------------------------
    // Scope
    // -----
    // These tests cover:
    // - Save / load round trips through a temporary directory.
    // - Missing files and inconsistent rescalers.
    // -------------------------------------------------------------------------

    fn artifact() -> ModelArtifact {
        let arch = Architecture::new(2, vec![3], vec![2], 0.1).unwrap();
        let network = Network::new(arch, 5).unwrap();
        let history = TrainingHistory { loss: vec![1.0, 0.5], val_loss: vec![0.9, 0.7], best_epoch: 1 };
        let rescaler = FeatureRescaler::from_scales(array![0.5, 0.25]).unwrap();
        ModelArtifact::new("lstm1_d1_o0.1_mse", network, history, rescaler).unwrap()
    }

    #[test]
    // Purpose
    // -------
    // Verify a saved artifact loads back identical and predicts the same.
    //
    // Given
    // -----
    // - A small artifact saved to `<tmp>/lstm1_d1_o0.1_mse`.
    //
    // Expect
    // ------
    // - Network, history and rescaler equal the originals; the name comes
    //   from the directory; seeded ensembles agree.
    fn artifact_round_trip() {
        // Arrange
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("lstm1_d1_o0.1_mse");
        let original = artifact();

        // Act
        original.save(&dir).unwrap();
        let loaded = ModelArtifact::load(&dir).unwrap();

        // Assert
        assert_eq!(loaded, original);
        let x = array![[1.0, 2.0], [3.0, 4.0]];
        let options = EnsembleOptions::new(10, 3, Default::default()).unwrap();
        assert_eq!(loaded.predict(&x, &options).unwrap(), original.predict(&x, &options).unwrap());
    }

    #[test]
    // Purpose
    // -------
    // Ensure a missing rescaler file is reported by path.
    fn load_reports_missing_file() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("m");
        artifact().save(&dir).unwrap();
        fs::remove_file(dir.join(RESCALER_FILE)).unwrap();

        match ModelArtifact::load(&dir) {
            Err(ModelError::MissingArtifact { path }) => assert!(path.ends_with(RESCALER_FILE)),
            other => panic!("expected MissingArtifact, got {other:?}"),
        }
    }

    #[test]
    // Purpose
    // -------
    // Verify a rescaler of the wrong cardinality cannot be bundled.
    fn artifact_rejects_mismatched_rescaler() {
        let a = artifact();
        let wrong = FeatureRescaler::from_scales(array![1.0, 1.0, 1.0]).unwrap();
        assert!(matches!(
            ModelArtifact::new("x", a.network, a.history, wrong),
            Err(ModelError::DimensionMismatch { expected: 2, found: 3, .. })
        ));
    }
}
