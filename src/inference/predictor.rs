//! Inference Predictor Module
//!
//! A [`Predictor`] owns a loaded model and turns chest X-ray images into
//! P(Pneumonia). Images go through the same resize and rescale as the
//! validation data; nothing is augmented.

use std::path::{Path, PathBuf};
use std::time::Instant;

use burn::tensor::{backend::Backend, Tensor, TensorData};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::dataset::burn_dataset::load_image;
use crate::dataset::layout::scan_samples;
use crate::dataset::{Augmenter, ClassLabel};
use crate::model::artifact::{load_artifact, ArtifactMetadata};
use crate::model::PneumoniaModel;
use crate::utils::error::{PneumoniaError, Result};
use crate::utils::metrics::{BinaryConfusion, DECISION_THRESHOLD};

/// Result of a single prediction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prediction {
    /// Path to the input image (if applicable)
    pub image_path: Option<PathBuf>,
    pub label: ClassLabel,
    /// P(Pneumonia)
    pub probability: f32,
    /// Probability of the predicted label
    pub confidence: f32,
    pub inference_time_ms: f64,
}

impl Prediction {
    /// Threshold `probability` at 0.5
    pub fn from_probability(probability: f32, image_path: Option<PathBuf>, inference_time_ms: f64) -> Self {
        let (label, confidence) = if probability > DECISION_THRESHOLD {
            (ClassLabel::Pneumonia, probability)
        } else {
            (ClassLabel::Normal, 1.0 - probability)
        };
        Self {
            image_path,
            label,
            probability,
            confidence,
            inference_time_ms,
        }
    }
}

impl std::fmt::Display for Prediction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(path) = &self.image_path {
            write!(f, "{:?}: ", path)?;
        }
        write!(
            f,
            "{} (P(pneumonia) = {:.4}, confidence {:.1}%, {:.1} ms)",
            self.label.display_name(),
            self.probability,
            self.confidence * 100.0,
            self.inference_time_ms
        )
    }
}

/// Metrics of a saved model over a labeled directory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub directory: PathBuf,
    pub confusion: BinaryConfusion,
    /// Files that could not be decoded
    pub skipped: usize,
}

impl std::fmt::Display for EvaluationReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Evaluated {} images in {:?}", self.confusion.total(), self.directory)?;
        if self.skipped > 0 {
            writeln!(f, "Skipped {} unreadable files", self.skipped)?;
        }
        writeln!(f, "Accuracy:  {:.2}%", self.confusion.accuracy() * 100.0)?;
        writeln!(f, "Precision: {:.4}", self.confusion.precision())?;
        writeln!(f, "Recall:    {:.4}", self.confusion.recall())?;
        writeln!(f, "F1:        {:.4}", self.confusion.f1())?;
        write!(f, "{}", self.confusion)
    }
}

/// A loaded model plus its preprocessing
pub struct Predictor<B: Backend> {
    model: PneumoniaModel<B>,
    metadata: ArtifactMetadata,
    preprocessor: Augmenter,
    device: B::Device,
}

impl<B: Backend> Predictor<B> {
    /// Load the artifact at `stem` (`<stem>.mpk` + `<stem>.json`)
    pub fn load(stem: &Path, device: B::Device) -> Result<Self> {
        let (model, metadata) = load_artifact::<B>(stem, &device)?;
        Ok(Self::new(model, metadata, device))
    }

    pub fn new(model: PneumoniaModel<B>, metadata: ArtifactMetadata, device: B::Device) -> Self {
        let shape = metadata.model.input_shape;
        Self {
            model,
            preprocessor: Augmenter::no_augmentation(shape.height as u32),
            metadata,
            device,
        }
    }

    pub fn metadata(&self) -> &ArtifactMetadata {
        &self.metadata
    }

    pub fn image_size(&self) -> usize {
        self.preprocessor.image_size() as usize
    }

    /// P(Pneumonia) for a [batch, 3, H, W] tensor of pixels in [0, 1]
    pub fn predict_batch(&self, images: Tensor<B, 4>) -> Result<Vec<f32>> {
        let [_, channels, height, width] = images.dims();
        let shape = self.metadata.model.input_shape;
        if channels != shape.channels || height != shape.height || width != shape.width {
            return Err(PneumoniaError::Inference(format!(
                "expected images of {}x{}x{}, got {}x{}x{}",
                shape.height, shape.width, shape.channels, height, width, channels
            )));
        }

        self.model
            .predict_proba(images)
            .into_data()
            .convert::<f32>()
            .to_vec::<f32>()
            .map_err(|e| PneumoniaError::Inference(format!("cannot read predictions: {:?}", e)))
    }

    /// Decode, preprocess and classify one image file
    pub fn predict_image(&self, path: &Path) -> Result<Prediction> {
        let start = Instant::now();
        let pixels = self.preprocess(path)?;
        let probability = self
            .predict_batch(self.to_tensor(pixels, 1))?
            .first()
            .copied()
            .ok_or_else(|| PneumoniaError::Inference("empty prediction".to_string()))?;

        Ok(Prediction::from_probability(
            probability,
            Some(path.to_path_buf()),
            start.elapsed().as_secs_f64() * 1000.0,
        ))
    }

    /// Run over `dir/{NORMAL,PNEUMONIA}` and accumulate a confusion matrix
    pub fn evaluate(&self, dir: &Path, batch_size: usize) -> Result<EvaluationReport> {
        if !dir.is_dir() {
            return Err(PneumoniaError::PathNotFound(dir.to_path_buf()));
        }
        let samples = scan_samples(dir);
        if samples.is_empty() {
            return Err(PneumoniaError::Dataset(format!("no labeled images under {:?}", dir)));
        }

        let mut confusion = BinaryConfusion::new();
        let mut skipped = 0;

        let preprocessor = &self.preprocessor;
        for chunk in samples.chunks(batch_size.max(1)) {
            let decoded: Vec<Option<(Vec<f32>, i64)>> = chunk
                .par_iter()
                .map(|s| match preprocess_with(preprocessor, &s.path) {
                    Ok(pixels) => Some((pixels, s.label.index() as i64)),
                    Err(e) => {
                        warn!("Skipping unreadable image: {}", e);
                        None
                    }
                })
                .collect();

            let (pixels, labels): (Vec<Vec<f32>>, Vec<i64>) = decoded.into_iter().flatten().unzip();
            skipped += chunk.len() - labels.len();
            if labels.is_empty() {
                continue;
            }

            let images = self.to_tensor(pixels.concat(), labels.len());
            let mut batch = BinaryConfusion::new();
            batch.record_probabilities(&self.predict_batch(images)?, &labels);
            debug!(
                "Batch of {}: accuracy {:.2}%",
                batch.total(),
                batch.accuracy() * 100.0
            );
            confusion.merge(&batch);
        }

        Ok(EvaluationReport {
            directory: dir.to_path_buf(),
            confusion,
            skipped,
        })
    }

    fn preprocess(&self, path: &Path) -> Result<Vec<f32>> {
        preprocess_with(&self.preprocessor, path)
    }

    fn to_tensor(&self, pixels: Vec<f32>, batch: usize) -> Tensor<B, 4> {
        let size = self.image_size();
        Tensor::from_floats(TensorData::new(pixels, [batch, 3, size, size]), &self.device)
    }
}

fn preprocess_with(preprocessor: &Augmenter, path: &Path) -> Result<Vec<f32>> {
    let img = load_image(path)?;
    Ok(preprocessor.preprocess(&img, None))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::test_util::{populate, write_image};
    use crate::model::artifact::save_artifact;
    use crate::model::{InputShape, ModelConfig, ModelVariant};
    use burn_ndarray::NdArray;
    use tempfile::tempdir;

    type TestBackend = NdArray;

    fn saved_predictor(dir: &Path) -> Predictor<TestBackend> {
        let device = Default::default();
        let config = ModelConfig::new(ModelVariant::Simple, InputShape::square(96));
        let model = config.init::<TestBackend>(&device).unwrap();
        let stem = dir.join("models/pneumonia_model");
        save_artifact(&model, &ArtifactMetadata::new(config, 1, 0.5, 0.7, 1e-3), &stem).unwrap();
        Predictor::load(&stem, device).unwrap()
    }

    #[test]
    fn test_threshold() {
        let p = Prediction::from_probability(0.8, None, 0.0);
        assert_eq!(p.label, ClassLabel::Pneumonia);
        assert!((p.confidence - 0.8).abs() < 1e-6);

        let n = Prediction::from_probability(0.5, None, 0.0);
        assert_eq!(n.label, ClassLabel::Normal);
        assert!((n.confidence - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_predict_image() {
        let dir = tempdir().unwrap();
        let predictor = saved_predictor(dir.path());
        let image = dir.path().join("xray.jpeg");
        write_image(&image, 300, 128);

        let prediction = predictor.predict_image(&image).unwrap();
        assert!((0.0..=1.0).contains(&prediction.probability));
        assert_eq!(prediction.image_path.as_deref(), Some(image.as_path()));
    }

    #[test]
    fn test_predict_batch_rejects_wrong_shape() {
        let dir = tempdir().unwrap();
        let predictor = saved_predictor(dir.path());
        let images = Tensor::<TestBackend, 4>::zeros([1, 3, 64, 64], &Default::default());
        assert!(matches!(
            predictor.predict_batch(images),
            Err(PneumoniaError::Inference(_))
        ));
    }

    #[test]
    fn test_evaluate_counts_and_skips() {
        let dir = tempdir().unwrap();
        let predictor = saved_predictor(dir.path());
        let test_dir = dir.path().join("test");
        populate(&test_dir.join("NORMAL"), "n", 3, 10);
        populate(&test_dir.join("PNEUMONIA"), "p", 2, 240);
        std::fs::write(test_dir.join("PNEUMONIA/broken.png"), b"nope").unwrap();

        let report = predictor.evaluate(&test_dir, 2).unwrap();
        assert_eq!(report.confusion.total(), 5);
        assert_eq!(report.skipped, 1);
        assert!(report.to_string().contains("Accuracy"));
    }

    #[test]
    fn test_missing_artifact() {
        let dir = tempdir().unwrap();
        assert!(Predictor::<TestBackend>::load(&dir.path().join("none"), Default::default()).is_err());
    }
}
