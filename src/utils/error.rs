//! Error Handling Module
//!
//! Defines the error type shared by the organizer, the training pipeline and
//! the predictor. Uses thiserror for ergonomic error definitions.

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for the pneumonia training pipeline
#[derive(Error, Debug)]
pub enum PneumoniaError {
    /// Error loading or decoding an image
    #[error("Failed to load image at '{0}': {1}")]
    ImageLoad(PathBuf, String),

    /// Error with dataset layout or contents
    #[error("Dataset error: {0}")]
    Dataset(String),

    /// Error building, saving or loading a model
    #[error("Model error: {0}")]
    Model(String),

    /// Error during the training loop
    #[error("Training error: {0}")]
    Training(String),

    /// Error with inference
    #[error("Inference error: {0}")]
    Inference(String),

    /// Configuration error (bad variant, bad fraction, missing directory)
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Path not found
    #[error("Path not found: {0}")]
    PathNotFound(PathBuf),
}

impl PneumoniaError {
    /// Whether this error should be reported as a configuration problem
    pub fn is_config(&self) -> bool {
        matches!(self, PneumoniaError::Config(_))
    }
}

impl From<serde_json::Error> for PneumoniaError {
    fn from(err: serde_json::Error) -> Self {
        PneumoniaError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for PneumoniaError {
    fn from(err: toml::de::Error) -> Self {
        PneumoniaError::Config(format!("invalid TOML: {}", err))
    }
}

impl From<image::ImageError> for PneumoniaError {
    fn from(err: image::ImageError) -> Self {
        PneumoniaError::InvalidInput(format!("image error: {}", err))
    }
}

/// Convenience Result type for pipeline operations
pub type Result<T> = std::result::Result<T, PneumoniaError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PneumoniaError::Dataset("no images".to_string());
        assert_eq!(format!("{}", err), "Dataset error: no images");
    }

    #[test]
    fn test_image_load_error() {
        let path = PathBuf::from("/data/train/NORMAL/im-0001.jpeg");
        let err = PneumoniaError::ImageLoad(path, "truncated file".to_string());
        assert!(format!("{}", err).contains("im-0001.jpeg"));
    }

    #[test]
    fn test_config_classification() {
        assert!(PneumoniaError::Config("bad".into()).is_config());
        assert!(!PneumoniaError::Training("nan".into()).is_config());
    }
}
