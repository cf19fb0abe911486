//! # Pneumonia CNN
//!
//! Chest X-ray pneumonia classification with the Burn framework.
//!
//! ## Features
//!
//! - **Dataset organizer** that splits a flat `NORMAL`/`PNEUMONIA` collection
//!   into stratified, seeded train/val/test folders
//! - **Two models**: a from-scratch CNN and a MobileNetV2 transfer model,
//!   both emitting a single logit for P(Pneumonia)
//! - **Training pipeline** with augmentation, class-imbalance weights,
//!   checkpointing on validation accuracy, early stopping and LR decay
//! - **Predictor** handle for single images, batches and labeled folders
//!
//! ## Modules
//!
//! - `dataset`: Layout detection, organizer, class counts, augmentation and loading
//! - `model`: Both architectures, the factory and artifact persistence
//! - `training`: Configuration, callbacks, the epoch loop and the pipeline
//! - `inference`: Prediction and evaluation with a saved artifact
//! - `utils`: Errors, logging and metrics
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use pneumonia_cnn::backend::{default_device, TrainingBackend};
//! use pneumonia_cnn::training::{run_training, TrainingConfig};
//!
//! let config = TrainingConfig::default();
//! let outcome = run_training::<TrainingBackend>(&config, default_device())?;
//! println!("ran {} epochs", outcome.history.epochs_run());
//! ```

pub mod backend;
pub mod dataset;
pub mod inference;
pub mod model;
pub mod training;
pub mod utils;

// Re-export commonly used items for convenience
pub use dataset::{
    check_structure, organize, ClassCounts, ClassLabel, ClassWeights, DatasetLayout, Split,
    XrayBatch, XrayBatcher, XrayDataset, XrayItem,
};
pub use inference::{Prediction, Predictor};
pub use model::{create_model, InputShape, ModelConfig, ModelVariant, PneumoniaModel};
pub use training::{run_training, TrainingConfig, TrainingHistory};
pub use utils::error::{PneumoniaError, Result};
pub use utils::metrics::BinaryConfusion;

/// Default model input side in pixels
pub const IMAGE_SIZE: usize = 224;

/// Version of the library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
