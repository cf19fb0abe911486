//! Inference module for model prediction
//!
//! This module provides:
//! - Loading a saved artifact into an owned [`Predictor`] handle
//! - Single image and batch prediction, thresholded at 0.5
//! - Evaluation over a labeled directory

pub mod predictor;

pub use predictor::{EvaluationReport, Prediction, Predictor};

/// Batch size used when evaluating a directory
pub const DEFAULT_EVAL_BATCH_SIZE: usize = 32;
