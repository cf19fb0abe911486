//! Training configuration
//!
//! Every knob of a training run lives in [`TrainingConfig`]. Defaults match
//! the `train` command; a TOML file can override any subset of fields and
//! CLI flags are applied on top.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::dataset::AugmentationConfig;
use crate::model::artifact::{artifact_path, history_path};
use crate::model::{InputShape, ModelConfig, ModelVariant};
use crate::utils::error::{PneumoniaError, Result};

pub const DEFAULT_EPOCHS: usize = 20;
pub const DEFAULT_BATCH_SIZE: usize = 32;
pub const DEFAULT_VALIDATION_SPLIT: f64 = 0.2;
pub const DEFAULT_IMAGE_SIZE: usize = 224;
pub const DEFAULT_SEED: u64 = 42;
pub const DEFAULT_OUTPUT: &str = "models/pneumonia_model";

/// Configuration of a training run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    /// Dataset root (pre-split or flat)
    pub data_dir: PathBuf,
    /// Maximum number of epochs
    pub epochs: usize,
    pub batch_size: usize,
    /// Held-out fraction for a flat dataset
    pub validation_split: f64,
    pub model_type: ModelVariant,
    /// Artifact stem; `.mpk`, `.json` and `_history.json` are appended
    pub output: PathBuf,
    pub seed: u64,
    /// Adam learning rate; the variant default when unset
    pub learning_rate: Option<f64>,
    /// Square input side in pixels
    pub image_size: usize,
    pub dropout: f64,
    /// Pretrained MobileNetV2 record for the transfer variant
    pub backbone_weights: Option<PathBuf>,
    /// Apply training-time augmentation
    pub augment: bool,
    /// Stale epochs (val loss) before stopping
    pub early_stopping_patience: usize,
    /// Stale epochs (val loss) before reducing the learning rate
    pub lr_patience: usize,
    pub lr_factor: f64,
    pub min_lr: f64,
    pub augmentation: AugmentationConfig,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            epochs: DEFAULT_EPOCHS,
            batch_size: DEFAULT_BATCH_SIZE,
            validation_split: DEFAULT_VALIDATION_SPLIT,
            model_type: ModelVariant::Simple,
            output: PathBuf::from(DEFAULT_OUTPUT),
            seed: DEFAULT_SEED,
            learning_rate: None,
            image_size: DEFAULT_IMAGE_SIZE,
            dropout: 0.5,
            backbone_weights: None,
            augment: true,
            early_stopping_patience: 5,
            lr_patience: 3,
            lr_factor: 0.5,
            min_lr: 1e-7,
            augmentation: AugmentationConfig::default(),
        }
    }
}

impl TrainingConfig {
    /// Read a TOML file; missing fields keep their defaults
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            PneumoniaError::Config(format!("cannot read config file {:?}: {}", path, e))
        })?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| PneumoniaError::Serialization(e.to_string()))
    }

    /// Learning rate actually used by the optimizer
    pub fn effective_learning_rate(&self) -> f64 {
        self.learning_rate
            .unwrap_or_else(|| self.model_type.default_learning_rate())
    }

    pub fn input_shape(&self) -> InputShape {
        InputShape::square(self.image_size)
    }

    /// Architecture description for the model factory and the sidecar
    pub fn model_config(&self) -> ModelConfig {
        ModelConfig::new(self.model_type, self.input_shape())
            .with_dropout(self.dropout)
            .with_backbone_weights(self.backbone_weights.clone())
    }

    /// Reject values that would fail later, before any data is touched
    pub fn validate(&self) -> Result<()> {
        fn invalid(msg: String) -> Result<()> {
            Err(PneumoniaError::Config(msg))
        }

        if self.epochs == 0 {
            return invalid("epochs must be at least 1".into());
        }
        if self.batch_size == 0 {
            return invalid("batch size must be at least 1".into());
        }
        if !(self.validation_split > 0.0 && self.validation_split < 1.0) {
            return invalid(format!(
                "validation split must be in (0, 1), got {}",
                self.validation_split
            ));
        }
        let lr = self.effective_learning_rate();
        if !(lr.is_finite() && lr > 0.0) {
            return invalid(format!("learning rate must be positive, got {}", lr));
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return invalid(format!("dropout must be in [0, 1), got {}", self.dropout));
        }
        if self.early_stopping_patience == 0 || self.lr_patience == 0 {
            return invalid("patience values must be at least 1".into());
        }
        if !(self.lr_factor > 0.0 && self.lr_factor < 1.0) {
            return invalid(format!("lr factor must be in (0, 1), got {}", self.lr_factor));
        }
        if !(self.min_lr >= 0.0 && self.min_lr.is_finite()) {
            return invalid(format!("min lr must be non-negative, got {}", self.min_lr));
        }
        if let Some(path) = &self.backbone_weights {
            if self.model_type != ModelVariant::Transfer {
                tracing::warn!("backbone weights {:?} are ignored by the simple model", path);
            }
        }

        self.input_shape().validate_for(self.model_type)
    }

    /// Path of the weights file written by the checkpoint
    pub fn weights_path(&self) -> PathBuf {
        artifact_path(&self.output, "mpk")
    }

    /// Path of the architecture/metrics sidecar
    pub fn sidecar_path(&self) -> PathBuf {
        artifact_path(&self.output, "json")
    }

    pub fn history_path(&self) -> PathBuf {
        history_path(&self.output)
    }
}
