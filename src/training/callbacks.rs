//! Epoch-end callbacks
//!
//! Three independent observers, each with its own [`PlateauTracker`]:
//!
//! | callback              | monitors       | on improvement      | on plateau            |
//! |-----------------------|----------------|---------------------|-----------------------|
//! | [`ModelCheckpoint`]   | `val_accuracy` | save the artifact   | nothing               |
//! | [`EarlyStopping`]     | `val_loss`     | remember weights    | stop, restore weights |
//! | [`ReduceLrOnPlateau`] | `val_loss`     | nothing             | scale the LR          |
//!
//! Improvement is strict in every case. The trackers never share counters,
//! so an LR reduction does not delay early stopping.

use serde::{Deserialize, Serialize};
use tracing::info;

use super::history::EpochMetrics;

/// Which metric a callback watches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Monitor {
    ValLoss,
    ValAccuracy,
}

impl Monitor {
    pub fn mode(self) -> MonitorMode {
        match self {
            Monitor::ValLoss => MonitorMode::Min,
            Monitor::ValAccuracy => MonitorMode::Max,
        }
    }

    pub fn read(self, metrics: &EpochMetrics) -> f64 {
        match self {
            Monitor::ValLoss => metrics.val_loss(),
            Monitor::ValAccuracy => metrics.val_accuracy(),
        }
    }
}

impl std::fmt::Display for Monitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Monitor::ValLoss => write!(f, "val_loss"),
            Monitor::ValAccuracy => write!(f, "val_accuracy"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorMode {
    Min,
    Max,
}

/// Best-so-far value plus a count of epochs since it last improved
#[derive(Debug, Clone, PartialEq)]
pub struct PlateauTracker {
    mode: MonitorMode,
    best: f64,
    wait: usize,
}

impl PlateauTracker {
    pub fn new(mode: MonitorMode) -> Self {
        let best = match mode {
            MonitorMode::Min => f64::INFINITY,
            MonitorMode::Max => f64::NEG_INFINITY,
        };
        Self { mode, best, wait: 0 }
    }

    pub fn best(&self) -> f64 {
        self.best
    }

    pub fn wait(&self) -> usize {
        self.wait
    }

    /// Strictly better than the best so far
    pub fn is_improvement(&self, value: f64) -> bool {
        match self.mode {
            MonitorMode::Min => value < self.best,
            MonitorMode::Max => value > self.best,
        }
    }

    /// Feed one observation; returns whether it improved
    pub fn update(&mut self, value: f64) -> bool {
        if self.is_improvement(value) {
            self.best = value;
            self.wait = 0;
            true
        } else {
            self.wait += 1;
            false
        }
    }

    pub fn reset_wait(&mut self) {
        self.wait = 0;
    }
}

/// What the training loop should do after a callback has seen an epoch
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CallbackAction {
    Continue,
    /// Persist the current weights to the artifact path
    SaveCheckpoint,
    /// Keep an in-memory copy of the current weights
    RememberWeights,
    /// End training and restore the remembered weights
    Stop,
    SetLearningRate(f64),
}

/// An epoch-end observer
pub trait Callback {
    fn name(&self) -> &'static str;

    /// Inspect a finished epoch trained with `learning_rate`
    fn on_epoch_end(&mut self, metrics: &EpochMetrics, learning_rate: f64) -> CallbackAction;
}

/// Save the model whenever validation accuracy reaches a new best
#[derive(Debug, Clone)]
pub struct ModelCheckpoint {
    monitor: Monitor,
    tracker: PlateauTracker,
    best_epoch: Option<usize>,
}

impl ModelCheckpoint {
    pub fn new(monitor: Monitor) -> Self {
        Self {
            monitor,
            tracker: PlateauTracker::new(monitor.mode()),
            best_epoch: None,
        }
    }

    pub fn best_epoch(&self) -> Option<usize> {
        self.best_epoch
    }

    pub fn best(&self) -> f64 {
        self.tracker.best()
    }
}

impl Default for ModelCheckpoint {
    fn default() -> Self {
        Self::new(Monitor::ValAccuracy)
    }
}

impl Callback for ModelCheckpoint {
    fn name(&self) -> &'static str {
        "model_checkpoint"
    }

    fn on_epoch_end(&mut self, metrics: &EpochMetrics, _learning_rate: f64) -> CallbackAction {
        let previous = self.tracker.best();
        let value = self.monitor.read(metrics);
        if self.tracker.update(value) {
            info!(
                "Epoch {}: {} improved from {:.5} to {:.5}, saving model",
                metrics.epoch, self.monitor, previous, value
            );
            self.best_epoch = Some(metrics.epoch);
            CallbackAction::SaveCheckpoint
        } else {
            info!(
                "Epoch {}: {} did not improve from {:.5}",
                metrics.epoch, self.monitor, previous
            );
            CallbackAction::Continue
        }
    }
}

/// Stop once validation loss has not improved for `patience` epochs
#[derive(Debug, Clone)]
pub struct EarlyStopping {
    monitor: Monitor,
    patience: usize,
    tracker: PlateauTracker,
    best_epoch: Option<usize>,
    stopped_epoch: Option<usize>,
}

impl EarlyStopping {
    pub fn new(monitor: Monitor, patience: usize) -> Self {
        Self {
            monitor,
            patience,
            tracker: PlateauTracker::new(monitor.mode()),
            best_epoch: None,
            stopped_epoch: None,
        }
    }

    pub fn wait(&self) -> usize {
        self.tracker.wait()
    }

    /// Epoch whose weights get restored on stop
    pub fn best_epoch(&self) -> Option<usize> {
        self.best_epoch
    }

    pub fn stopped_epoch(&self) -> Option<usize> {
        self.stopped_epoch
    }
}

impl Callback for EarlyStopping {
    fn name(&self) -> &'static str {
        "early_stopping"
    }

    fn on_epoch_end(&mut self, metrics: &EpochMetrics, _learning_rate: f64) -> CallbackAction {
        if self.tracker.update(self.monitor.read(metrics)) {
            self.best_epoch = Some(metrics.epoch);
            return CallbackAction::RememberWeights;
        }

        if self.tracker.wait() >= self.patience {
            info!(
                "Epoch {}: early stopping, {} has not improved for {} epochs",
                metrics.epoch,
                self.monitor,
                self.tracker.wait()
            );
            self.stopped_epoch = Some(metrics.epoch);
            return CallbackAction::Stop;
        }

        CallbackAction::Continue
    }
}

/// Scale the learning rate down when validation loss plateaus
#[derive(Debug, Clone)]
pub struct ReduceLrOnPlateau {
    monitor: Monitor,
    patience: usize,
    factor: f64,
    min_lr: f64,
    tracker: PlateauTracker,
}

impl ReduceLrOnPlateau {
    pub fn new(monitor: Monitor, patience: usize, factor: f64, min_lr: f64) -> Self {
        Self {
            monitor,
            patience,
            factor,
            min_lr,
            tracker: PlateauTracker::new(monitor.mode()),
        }
    }

    pub fn wait(&self) -> usize {
        self.tracker.wait()
    }
}

impl Callback for ReduceLrOnPlateau {
    fn name(&self) -> &'static str {
        "reduce_lr_on_plateau"
    }

    fn on_epoch_end(&mut self, metrics: &EpochMetrics, learning_rate: f64) -> CallbackAction {
        if self.tracker.update(self.monitor.read(metrics)) {
            return CallbackAction::Continue;
        }
        if self.tracker.wait() < self.patience || learning_rate <= self.min_lr {
            return CallbackAction::Continue;
        }

        let new_lr = (learning_rate * self.factor).max(self.min_lr);
        self.tracker.reset_wait();
        info!(
            "Epoch {}: reducing learning rate from {:.2e} to {:.2e}",
            metrics.epoch, learning_rate, new_lr
        );
        CallbackAction::SetLearningRate(new_lr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::training::history::PassMetrics;

    fn epoch(n: usize, val_loss: f64, val_accuracy: f64) -> EpochMetrics {
        EpochMetrics {
            epoch: n,
            train: PassMetrics::default(),
            val: PassMetrics {
                loss: val_loss,
                accuracy: val_accuracy,
                ..Default::default()
            },
            learning_rate: 1e-3,
            duration_secs: 0.0,
        }
    }

    #[test]
    fn test_tracker_is_strict() {
        let mut min = PlateauTracker::new(MonitorMode::Min);
        assert!(min.update(0.5));
        assert!(!min.update(0.5));
        assert_eq!(min.wait(), 1);
        assert!(min.update(0.49));
        assert_eq!(min.wait(), 0);

        let mut max = PlateauTracker::new(MonitorMode::Max);
        assert!(max.update(0.0));
        assert!(!max.update(0.0));
    }

    #[test]
    fn test_checkpoint_only_on_strict_improvement() {
        let mut cb = ModelCheckpoint::default();
        let accs = [0.6, 0.7, 0.7, 0.65, 0.8];
        let actions: Vec<CallbackAction> = accs
            .iter()
            .enumerate()
            .map(|(i, &acc)| cb.on_epoch_end(&epoch(i + 1, 0.5, acc), 1e-3))
            .collect();

        assert_eq!(
            actions,
            vec![
                CallbackAction::SaveCheckpoint,
                CallbackAction::SaveCheckpoint,
                CallbackAction::Continue,
                CallbackAction::Continue,
                CallbackAction::SaveCheckpoint,
            ]
        );
        assert_eq!(cb.best_epoch(), Some(5));
        assert_eq!(cb.best(), 0.8);
    }

    #[test]
    fn test_first_epoch_always_checkpoints() {
        let mut cb = ModelCheckpoint::default();
        assert_eq!(
            cb.on_epoch_end(&epoch(1, 9.0, 0.0), 1e-3),
            CallbackAction::SaveCheckpoint
        );
    }

    #[test]
    fn test_early_stopping_after_patience() {
        let mut cb = EarlyStopping::new(Monitor::ValLoss, 5);
        assert_eq!(
            cb.on_epoch_end(&epoch(1, 0.5, 0.5), 1e-3),
            CallbackAction::RememberWeights
        );
        for n in 2..=5 {
            assert_eq!(cb.on_epoch_end(&epoch(n, 0.6, 0.5), 1e-3), CallbackAction::Continue);
        }
        assert_eq!(cb.wait(), 4);
        assert_eq!(cb.on_epoch_end(&epoch(6, 0.5, 0.5), 1e-3), CallbackAction::Stop);
        assert_eq!(cb.stopped_epoch(), Some(6));
        assert_eq!(cb.best_epoch(), Some(1));
    }

    #[test]
    fn test_lr_reduction_and_floor() {
        let mut cb = ReduceLrOnPlateau::new(Monitor::ValLoss, 3, 0.5, 1e-7);
        cb.on_epoch_end(&epoch(1, 0.5, 0.5), 1e-3);
        assert_eq!(cb.on_epoch_end(&epoch(2, 0.5, 0.5), 1e-3), CallbackAction::Continue);
        assert_eq!(cb.on_epoch_end(&epoch(3, 0.5, 0.5), 1e-3), CallbackAction::Continue);
        assert_eq!(
            cb.on_epoch_end(&epoch(4, 0.5, 0.5), 1e-3),
            CallbackAction::SetLearningRate(5e-4)
        );
        assert_eq!(cb.wait(), 0);

        let mut near_floor = ReduceLrOnPlateau::new(Monitor::ValLoss, 1, 0.5, 1e-7);
        near_floor.on_epoch_end(&epoch(1, 0.5, 0.5), 1.5e-7);
        assert_eq!(
            near_floor.on_epoch_end(&epoch(2, 0.5, 0.5), 1.5e-7),
            CallbackAction::SetLearningRate(1e-7)
        );
        assert_eq!(
            near_floor.on_epoch_end(&epoch(3, 0.5, 0.5), 1e-7),
            CallbackAction::Continue
        );
    }

    #[test]
    fn test_trackers_are_independent() {
        let mut stop = EarlyStopping::new(Monitor::ValLoss, 5);
        let mut lr = ReduceLrOnPlateau::new(Monitor::ValLoss, 3, 0.5, 1e-7);
        let mut rate = 1e-3;

        for n in 1..=4 {
            let m = epoch(n, if n == 1 { 0.4 } else { 0.45 }, 0.5);
            stop.on_epoch_end(&m, rate);
            if let CallbackAction::SetLearningRate(new) = lr.on_epoch_end(&m, rate) {
                rate = new;
            }
        }

        assert_eq!(rate, 5e-4);
        assert_eq!(lr.wait(), 0);
        assert_eq!(stop.wait(), 3);
    }
}
