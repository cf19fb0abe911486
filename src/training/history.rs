//! Per-epoch metric history

use std::path::Path;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::utils::error::Result;
use crate::utils::metrics::BinaryConfusion;

/// Loss and confusion-derived metrics of one pass over a split
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PassMetrics {
    pub loss: f64,
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub samples: usize,
}

impl PassMetrics {
    pub fn from_confusion(loss: f64, confusion: &BinaryConfusion) -> Self {
        Self {
            loss,
            accuracy: confusion.accuracy(),
            precision: confusion.precision(),
            recall: confusion.recall(),
            samples: confusion.total(),
        }
    }
}

/// Everything the callbacks see about a finished epoch
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EpochMetrics {
    /// 1-based epoch number
    pub epoch: usize,
    pub train: PassMetrics,
    pub val: PassMetrics,
    /// Learning rate the epoch was trained with
    pub learning_rate: f64,
    pub duration_secs: f64,
}

impl EpochMetrics {
    pub fn val_loss(&self) -> f64 {
        self.val.loss
    }

    pub fn val_accuracy(&self) -> f64 {
        self.val.accuracy
    }

    pub fn is_finite(&self) -> bool {
        self.train.loss.is_finite() && self.val.loss.is_finite()
    }
}

/// Why the loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// All configured epochs ran
    EpochBudget,
    /// Validation loss stopped improving
    EarlyStopping,
    /// A loss became NaN or infinite
    Diverged,
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StopReason::EpochBudget => write!(f, "epoch budget exhausted"),
            StopReason::EarlyStopping => write!(f, "early stopping"),
            StopReason::Diverged => write!(f, "loss diverged"),
        }
    }
}

/// Metric history written next to the model at the end of a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingHistory {
    pub epochs: Vec<EpochMetrics>,
    pub stop_reason: Option<StopReason>,
    /// Epoch whose weights were saved last
    pub best_epoch: Option<usize>,
    pub best_val_accuracy: Option<f64>,
    /// Epoch whose weights the final model carries
    pub restored_epoch: Option<usize>,
    pub finished_at: Option<String>,
}

impl TrainingHistory {
    pub fn new() -> Self {
        Self {
            epochs: Vec::new(),
            stop_reason: None,
            best_epoch: None,
            best_val_accuracy: None,
            restored_epoch: None,
            finished_at: None,
        }
    }

    pub fn push(&mut self, metrics: EpochMetrics) {
        self.epochs.push(metrics);
    }

    pub fn epochs_run(&self) -> usize {
        self.epochs.len()
    }

    pub fn last(&self) -> Option<&EpochMetrics> {
        self.epochs.last()
    }

    pub fn finish(&mut self, reason: StopReason) {
        self.stop_reason = Some(reason);
        self.finished_at = Some(Utc::now().to_rfc3339());
    }

    /// Write as pretty JSON, creating parent directories
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        info!("Training history saved to {:?}", path);
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }
}

impl Default for TrainingHistory {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn epoch(n: usize, val_loss: f64) -> EpochMetrics {
        EpochMetrics {
            epoch: n,
            train: PassMetrics { loss: 0.7, accuracy: 0.5, ..Default::default() },
            val: PassMetrics { loss: val_loss, accuracy: 0.6, ..Default::default() },
            learning_rate: 1e-3,
            duration_secs: 1.0,
        }
    }

    #[test]
    fn test_pass_metrics_from_confusion() {
        let mut confusion = BinaryConfusion::new();
        confusion.record(true, true);
        confusion.record(true, false);
        confusion.record(false, false);
        confusion.record(false, true);

        let m = PassMetrics::from_confusion(0.4, &confusion);
        assert_eq!(m.samples, 4);
        assert_eq!(m.accuracy, 0.5);
        assert_eq!(m.precision, 0.5);
        assert_eq!(m.recall, 0.5);
    }

    #[test]
    fn test_non_finite_detection() {
        assert!(epoch(1, 0.3).is_finite());
        assert!(!epoch(1, f64::NAN).is_finite());
        assert!(!epoch(1, f64::INFINITY).is_finite());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested/model_history.json");

        let mut history = TrainingHistory::new();
        history.push(epoch(1, 0.5));
        history.push(epoch(2, 0.4));
        history.best_epoch = Some(2);
        history.finish(StopReason::EpochBudget);
        history.save(&path).unwrap();

        let loaded = TrainingHistory::load(&path).unwrap();
        assert_eq!(loaded.epochs_run(), 2);
        assert_eq!(loaded.epochs, history.epochs);
        assert_eq!(loaded.stop_reason, Some(StopReason::EpochBudget));
        assert!(loaded.finished_at.is_some());

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"epoch_budget\""));
    }
}
