//! Generic epoch loop
//!
//! [`fit`] drives any [`EpochRunner`] through the epoch budget and applies
//! the callbacks' actions in order after each epoch. The burn-backed runner
//! lives in `trainer`; tests drive the loop with scripted runners.

use colored::Colorize;
use tracing::{error, info, warn};

use super::callbacks::{
    Callback, CallbackAction, EarlyStopping, ModelCheckpoint, Monitor, ReduceLrOnPlateau,
};
use super::config::TrainingConfig;
use super::history::{EpochMetrics, PassMetrics, StopReason, TrainingHistory};
use crate::utils::error::Result;
use crate::utils::logging::TrainingLogger;

/// One model plus its data, seen epoch by epoch
pub trait EpochRunner {
    /// In-memory copy of the weights
    type Snapshot;

    /// One pass over the training data at `learning_rate`
    fn train_epoch(&mut self, epoch: usize, learning_rate: f64) -> Result<PassMetrics>;

    /// One pass over the validation data, without weight updates
    fn validate(&mut self, epoch: usize) -> Result<PassMetrics>;

    fn snapshot(&self) -> Self::Snapshot;

    fn restore(&mut self, snapshot: Self::Snapshot) -> Result<()>;

    /// Persist the current weights to the artifact path
    fn save_checkpoint(&mut self, metrics: &EpochMetrics) -> Result<()>;
}

/// Checkpoint on val_accuracy, early stopping and LR decay on val_loss
pub fn standard_callbacks(config: &TrainingConfig) -> Vec<Box<dyn Callback>> {
    vec![
        Box::new(ModelCheckpoint::new(Monitor::ValAccuracy)),
        Box::new(EarlyStopping::new(
            Monitor::ValLoss,
            config.early_stopping_patience,
        )),
        Box::new(ReduceLrOnPlateau::new(
            Monitor::ValLoss,
            config.lr_patience,
            config.lr_factor,
            config.min_lr,
        )),
    ]
}

/// Run up to `epochs` epochs starting at `initial_lr`
///
/// A non-finite train or validation loss ends the run once the epoch has
/// finished, with [`StopReason::Diverged`]. That epoch is left out of the
/// history; the caller decides whether divergence is an error.
pub fn fit<R: EpochRunner>(
    runner: &mut R,
    callbacks: &mut [Box<dyn Callback>],
    epochs: usize,
    initial_lr: f64,
) -> Result<TrainingHistory> {
    let mut history = TrainingHistory::new();
    let mut logger = TrainingLogger::new(epochs);
    let mut learning_rate = initial_lr;
    let mut remembered: Option<(usize, R::Snapshot)> = None;
    let mut reason = StopReason::EpochBudget;

    for epoch in 1..=epochs {
        logger.start_epoch(epoch);
        println!("{}", format!("Epoch {}/{}", epoch, epochs).yellow().bold());

        let train = runner.train_epoch(epoch, learning_rate)?;
        let val = runner.validate(epoch)?;
        let metrics = EpochMetrics {
            epoch,
            train,
            val,
            learning_rate,
            duration_secs: logger.epoch_seconds(),
        };
        logger.end_epoch(train.loss, val.loss, val.accuracy, learning_rate);

        if !metrics.is_finite() {
            error!(
                "Loss diverged at epoch {} (train {}, val {})",
                epoch, train.loss, val.loss
            );
            reason = StopReason::Diverged;
            break;
        }
        history.push(metrics);

        let mut saved = false;
        let mut stop = false;
        let mut next_lr = learning_rate;
        for callback in callbacks.iter_mut() {
            match callback.on_epoch_end(&metrics, learning_rate) {
                CallbackAction::Continue => {}
                CallbackAction::SaveCheckpoint => {
                    runner.save_checkpoint(&metrics)?;
                    history.best_epoch = Some(epoch);
                    history.best_val_accuracy = Some(metrics.val_accuracy());
                    saved = true;
                }
                CallbackAction::RememberWeights => {
                    remembered = Some((epoch, runner.snapshot()));
                }
                CallbackAction::Stop => stop = true,
                CallbackAction::SetLearningRate(lr) => next_lr = lr,
            }
        }

        print_epoch_summary(&metrics, saved);
        learning_rate = next_lr;

        if stop {
            match remembered.take() {
                Some((best_epoch, snapshot)) => {
                    info!("Restoring weights from epoch {}", best_epoch);
                    runner.restore(snapshot)?;
                    history.restored_epoch = Some(best_epoch);
                }
                None => warn!("Early stopping fired without remembered weights"),
            }
            reason = StopReason::EarlyStopping;
            break;
        }
    }

    if history.restored_epoch.is_none() && reason != StopReason::Diverged {
        history.restored_epoch = history.last().map(|m| m.epoch);
    }
    history.finish(reason);
    logger.log_complete(
        history.epochs_run(),
        history.best_val_accuracy.unwrap_or(0.0),
    );

    Ok(history)
}

fn print_epoch_summary(metrics: &EpochMetrics, saved: bool) {
    println!(
        "  {} loss: {:.4} | acc: {:.2}% | val_loss: {:.4} | val_acc: {:.2}% | val_precision: {:.3} | val_recall: {:.3} | lr: {:.1e}{}",
        "→".cyan(),
        metrics.train.loss,
        metrics.train.accuracy * 100.0,
        metrics.val.loss,
        metrics.val.accuracy * 100.0,
        metrics.val.precision,
        metrics.val.recall,
        metrics.learning_rate,
        if saved {
            " (saved)".green().to_string()
        } else {
            String::new()
        }
    );
}
