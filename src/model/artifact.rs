//! Saved model artifacts
//!
//! An artifact is addressed by a path stem. The weights go to `<stem>.mpk`
//! via `CompactRecorder` and a JSON sidecar `<stem>.json` describes the
//! architecture and the epoch that produced them.

use std::fs;
use std::path::{Path, PathBuf};

use burn::{
    module::Module,
    record::CompactRecorder,
    tensor::backend::Backend,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{ModelConfig, PneumoniaModel};
use crate::dataset::ClassLabel;
use crate::utils::error::{PneumoniaError, Result};

/// `<stem>.<ext>`, keeping any dots already in the stem
pub fn artifact_path(stem: &Path, ext: &str) -> PathBuf {
    let mut path = stem.as_os_str().to_os_string();
    path.push(".");
    path.push(ext);
    PathBuf::from(path)
}

/// `<stem>_history.json`
pub fn history_path(stem: &Path) -> PathBuf {
    let mut name = stem.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push("_history.json");
    stem.with_file_name(name)
}

/// Sidecar contents
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactMetadata {
    pub model: ModelConfig,
    /// Class directory names in index order
    pub class_names: Vec<String>,
    pub epoch: usize,
    pub val_accuracy: f64,
    pub val_loss: f64,
    pub learning_rate: f64,
    pub num_parameters: usize,
    pub timestamp: String,
    pub version: String,
}

impl ArtifactMetadata {
    pub fn new(model: ModelConfig, epoch: usize, val_accuracy: f64, val_loss: f64, learning_rate: f64) -> Self {
        Self {
            model,
            class_names: ClassLabel::ALL.iter().map(|c| c.dir_name().to_string()).collect(),
            epoch,
            val_accuracy,
            val_loss,
            learning_rate,
            num_parameters: 0,
            timestamp: Utc::now().to_rfc3339(),
            version: crate::VERSION.to_string(),
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let json = fs::read_to_string(path)?;
        let metadata: Self = serde_json::from_str(&json)?;
        metadata.check_classes()?;
        Ok(metadata)
    }

    fn check_classes(&self) -> Result<()> {
        let expected: Vec<&str> = ClassLabel::ALL.iter().map(|c| c.dir_name()).collect();
        if self.class_names != expected {
            return Err(PneumoniaError::Model(format!(
                "artifact classes {:?} do not match {:?}",
                self.class_names, expected
            )));
        }
        Ok(())
    }
}

/// Write weights and sidecar for `model`
///
/// Both files are overwritten. Any failure is returned to the caller.
pub fn save_artifact<B: Backend>(
    model: &PneumoniaModel<B>,
    metadata: &ArtifactMetadata,
    stem: &Path,
) -> Result<()> {
    if let Some(parent) = stem.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let weights = artifact_path(stem, "mpk");
    model
        .clone()
        .save_file(weights.clone(), &CompactRecorder::new())
        .map_err(|e| PneumoniaError::Model(format!("failed to save weights to {:?}: {:?}", weights, e)))?;

    let mut metadata = metadata.clone();
    metadata.num_parameters = model.num_params();
    metadata.save(&artifact_path(stem, "json"))?;

    info!("Model saved to {:?}", weights);
    Ok(())
}

/// Rebuild the architecture from the sidecar and load the weights
pub fn load_artifact<B: Backend>(
    stem: &Path,
    device: &B::Device,
) -> Result<(PneumoniaModel<B>, ArtifactMetadata)> {
    let sidecar = artifact_path(stem, "json");
    let weights = artifact_path(stem, "mpk");
    for path in [&sidecar, &weights] {
        if !path.is_file() {
            return Err(PneumoniaError::PathNotFound(path.clone()));
        }
    }

    let metadata = ArtifactMetadata::load(&sidecar)?;
    let model = metadata
        .model
        .init_for_record::<B>(device)?
        .load_file(weights.clone(), &CompactRecorder::new(), device)
        .map_err(|e| PneumoniaError::Model(format!("failed to load weights from {:?}: {:?}", weights, e)))?;

    info!(
        "Loaded {} model from {:?} (epoch {}, val_acc {:.2}%)",
        metadata.model.variant,
        weights,
        metadata.epoch,
        metadata.val_accuracy * 100.0
    );
    Ok((model, metadata))
}

/// Size of the weights file, if the artifact exists
pub fn artifact_size(stem: &Path) -> Option<u64> {
    fs::metadata(artifact_path(stem, "mpk")).ok().map(|m| m.len())
}
