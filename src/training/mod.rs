//! Training module
//!
//! This module provides:
//! - [`TrainingConfig`]: typed run configuration, loadable from TOML
//! - [`callbacks`]: checkpoint, early-stopping and LR-decay state machines
//! - [`fit`]: the epoch loop, generic over an [`EpochRunner`]
//! - [`BurnRunner`]: the burn implementation with weighted BCE and Adam
//! - [`run_training`]: the whole pipeline from data directory to artifact

pub mod callbacks;
pub mod config;
pub mod fit;
pub mod history;
pub mod pipeline;
pub mod trainer;

pub use callbacks::{
    Callback, CallbackAction, EarlyStopping, ModelCheckpoint, Monitor, PlateauTracker,
    ReduceLrOnPlateau,
};
pub use config::TrainingConfig;
pub use fit::{fit, standard_callbacks, EpochRunner};
pub use history::{EpochMetrics, PassMetrics, StopReason, TrainingHistory};
pub use pipeline::{run_training, TrainingOutcome};
pub use trainer::BurnRunner;
