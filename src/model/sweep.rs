//! Sweep — named model configurations, training and comparison.
//!
//! Purpose
//! -------
//! Express a hyperparameter grid as a list of immutable [`ModelSettings`],
//! map each through one pure [`train_model`] call, and compare the trained
//! models on a held-out test set.
//!
//! Key behaviors
//! -------------
//! - [`model_grid`] builds the cartesian product `lstm × dense × loss ×
//!   dropout`, numbering models in that order and naming them
//!   `lstm{n}_d{m}_o{dropout}_{loss}`.
//! - [`train_model`] fits a rescaler on the dataset features, rescales
//!   them, log-transforms the labels, trains a fresh network and bundles a
//!   [`ModelArtifact`].
//! - [`train_sweep`] trains every configuration, optionally one model per
//!   rayon task; models share no state.
//! - [`compare_models`] reports `{model, training_epochs, training_mse,
//!   validation_mse, test_mse}` per artifact, and [`write_comparison_csv`]
//!   writes the table.
//!
//! Invariants & assumptions
//! ------------------------
//! - Model names within one sweep are unique, since each names its
//!   artifact directory.
//! - `training_epochs` is the 0-based best epoch; `training_mse` is the
//!   training loss at that epoch; `validation_mse` the minimum validation
//!   loss; `test_mse` the evaluation-mode MSE on log labels.
use crate::{
    features::{dataset::Dataset, extract::normalize_labels, rescaler::FeatureRescaler},
    model::{
        artifact::ModelArtifact,
        errors::{ModelError, ModelResult},
        network::{Architecture, Network},
        training::{fit, TrainingOptions},
    },
};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::{
    collections::HashSet,
    fs::File,
    io::{BufWriter, Write},
    path::Path,
};
use tracing::{info, warn};

/// Training objective. Only mean squared error on log labels is supported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum LossFunction {
    #[default]
    Mse,
}

impl LossFunction {
    pub fn tag(&self) -> &'static str {
        match self {
            LossFunction::Mse => "mse",
        }
    }
}

/// ModelSettings — one immutable entry of a model grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSettings {
    pub model_n: usize,
    pub lstm_nodes: Vec<usize>,
    pub dense_nodes: Vec<usize>,
    pub dropout: f64,
    pub loss: LossFunction,
}

impl ModelSettings {
    pub fn name(&self) -> String {
        format!(
            "lstm{}_d{}_o{}_{}",
            self.lstm_nodes.len(),
            self.dense_nodes.len(),
            self.dropout,
            self.loss.tag()
        )
    }

    pub fn architecture(&self, n_features: usize) -> ModelResult<Architecture> {
        Architecture::new(n_features, self.lstm_nodes.clone(), self.dense_nodes.clone(), self.dropout)
    }
}

/// Cartesian product of layer stacks and dropout rates.
pub fn model_grid(lstm_nodes: &[Vec<usize>], dense_nodes: &[Vec<usize>], dropout: &[f64]) -> Vec<ModelSettings> {
    let mut grid = Vec::new();
    for l in lstm_nodes {
        for d in dense_nodes {
            for &o in dropout {
                grid.push(ModelSettings {
                    model_n: grid.len(),
                    lstm_nodes: l.clone(),
                    dense_nodes: d.clone(),
                    dropout: o,
                    loss: LossFunction::Mse,
                });
            }
        }
    }
    grid
}

/// The grid used for the proboscidean study: LSTM `[64, 32]` or `[64]`,
/// dense `[8]` or none, dropout 0.05.
pub fn default_grid() -> Vec<ModelSettings> {
    model_grid(&[vec![64, 32], vec![64]], &[vec![8], vec![]], &[0.05])
}

/// Train one configuration on `dataset` (raw features and labels).
///
/// Errors
/// ------
/// - Feature errors from fitting or applying the rescaler.
/// - `ModelError::InvalidArchitecture` / `InvalidOption` for bad settings.
/// - Any training error from [`fit`].
pub fn train_model(
    settings: &ModelSettings, dataset: &Dataset, options: &TrainingOptions,
) -> ModelResult<ModelArtifact> {
    let rescaler = FeatureRescaler::fit(dataset.features())?;
    let x = rescaler.apply(dataset.features())?;
    let y = normalize_labels(dataset.labels());
    let mut network = Network::new(settings.architecture(dataset.n_features())?, options.seed)?;
    let history = fit(&mut network, &x, &y, options)?;
    info!(
        model = %settings.name(),
        epochs = history.n_epochs(),
        best_epoch = history.best_epoch,
        val_loss = history.best_val_loss(),
        "model trained"
    );
    ModelArtifact::new(settings.name(), network, history, rescaler)
}

/// Train every configuration of `grid`, in grid order.
///
/// With `parallel`, each model trains in its own rayon task. A failing
/// model does not stop the others; its slot holds the error.
///
/// Errors
/// ------
/// - `ModelError::InvalidArchitecture` when two settings share a name.
pub fn train_sweep(
    grid: &[ModelSettings], dataset: &Dataset, options: &TrainingOptions, parallel: bool,
) -> ModelResult<Vec<ModelResult<ModelArtifact>>> {
    let mut seen = HashSet::new();
    if !grid.iter().all(|s| seen.insert(s.name())) {
        return Err(ModelError::InvalidArchitecture { reason: "model names in a sweep must be unique" });
    }
    let run = |settings: &ModelSettings| {
        let result = train_model(settings, dataset, options);
        if let Err(err) = &result {
            warn!(model = %settings.name(), error = %err, "model training failed");
        }
        result
    };
    Ok(if parallel { grid.par_iter().map(run).collect() } else { grid.iter().map(run).collect() })
}

/// Save each artifact under `root/{name}`.
pub fn save_sweep(artifacts: &[ModelArtifact], root: &Path) -> ModelResult<()> {
    artifacts.iter().try_for_each(|a| a.save(&root.join(&a.name)))
}

/// One row of the model comparison report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonRow {
    pub model: String,
    pub training_epochs: usize,
    pub training_mse: f64,
    pub validation_mse: f64,
    pub test_mse: f64,
}

/// Compare trained models on a test dataset (raw features and labels).
pub fn compare_models(artifacts: &[ModelArtifact], test: &Dataset) -> ModelResult<Vec<ComparisonRow>> {
    let y = normalize_labels(test.labels());
    artifacts
        .iter()
        .map(|a| -> ModelResult<ComparisonRow> {
            let x = a.rescaler.apply(test.features())?;
            Ok(ComparisonRow {
                model: a.name.clone(),
                training_epochs: a.history.best_epoch,
                training_mse: a.history.training_loss_at_best(),
                validation_mse: a.history.best_val_loss(),
                test_mse: a.network.mse(&x, &y)?,
            })
        })
        .collect()
}

/// Write the comparison table as CSV.
pub fn write_comparison_csv(rows: &[ComparisonRow], path: &Path) -> ModelResult<()> {
    let io = |e: std::io::Error| ModelError::Io { path: path.display().to_string(), text: e.to_string() };
    let mut out = BufWriter::new(File::create(path).map_err(io)?);
    writeln!(out, "model,training_epochs,training_mse,validation_mse,test_mse").map_err(io)?;
    for r in rows {
        writeln!(
            out,
            "{},{},{},{},{}",
            r.model, r.training_epochs, r.training_mse, r.validation_mse, r.test_mse
        )
        .map_err(io)?;
    }
    out.flush().map_err(io)?;
    info!(path = %path.display(), n_models = rows.len(), "wrote model comparison");
    Ok(())
}
