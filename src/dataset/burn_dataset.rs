//! Burn Dataset Integration for chest X-rays
//!
//! Implements Burn's `Dataset` trait and `Batcher` for the training loop.
//! Images are decoded lazily; the batcher only stacks already
//! preprocessed items into tensors.

use std::path::Path;

use burn::data::dataloader::batcher::Batcher;
use burn::data::dataset::Dataset;
use burn::prelude::*;
use image::{DynamicImage, ImageReader};
use rand_chacha::ChaCha8Rng;
use tracing::warn;

use super::augmentation::Augmenter;
use super::layout::LabeledSample;
use crate::utils::error::{PneumoniaError, Result};

/// Decode an image file, sniffing the format from its contents
pub fn load_image(path: &Path) -> Result<DynamicImage> {
    ImageReader::open(path)?
        .with_guessed_format()?
        .decode()
        .map_err(|e| PneumoniaError::ImageLoad(path.to_path_buf(), e.to_string()))
}

/// A single preprocessed image ready for batching
#[derive(Clone, Debug)]
pub struct XrayItem {
    /// Image data as flattened CHW float array [3 * H * W] in [0, 1]
    pub image: Vec<f32>,
    /// Class index (0 = NORMAL, 1 = PNEUMONIA)
    pub label: usize,
    /// Image path (for logging)
    pub path: String,
}

impl XrayItem {
    /// Load and preprocess a sample, augmenting when an RNG is given
    pub fn from_sample(
        sample: &LabeledSample,
        augmenter: &Augmenter,
        rng: Option<&mut ChaCha8Rng>,
    ) -> Result<Self> {
        let img = load_image(&sample.path)?;
        Ok(Self {
            image: augmenter.preprocess(&img, rng),
            label: sample.label.index(),
            path: sample.path.to_string_lossy().to_string(),
        })
    }
}

/// Labeled X-ray dataset, decoded on demand without augmentation
#[derive(Debug, Clone)]
pub struct XrayDataset {
    samples: Vec<LabeledSample>,
    augmenter: Augmenter,
}

impl XrayDataset {
    pub fn new(samples: Vec<LabeledSample>, augmenter: Augmenter) -> Self {
        Self { samples, augmenter }
    }

    pub fn samples(&self) -> &[LabeledSample] {
        &self.samples
    }

    pub fn augmenter(&self) -> &Augmenter {
        &self.augmenter
    }

    pub fn image_size(&self) -> usize {
        self.augmenter.image_size() as usize
    }

    /// Load item `index`, augmented with `rng` when given
    ///
    /// Unreadable files are logged and yield `None`.
    pub fn load(&self, index: usize, rng: Option<&mut ChaCha8Rng>) -> Option<XrayItem> {
        let sample = self.samples.get(index)?;
        match XrayItem::from_sample(sample, &self.augmenter, rng) {
            Ok(item) => Some(item),
            Err(e) => {
                warn!("Skipping unreadable image: {}", e);
                None
            }
        }
    }
}

impl Dataset<XrayItem> for XrayDataset {
    fn get(&self, index: usize) -> Option<XrayItem> {
        self.load(index, None)
    }

    fn len(&self) -> usize {
        self.samples.len()
    }
}

/// A batch of X-ray images
#[derive(Clone, Debug)]
pub struct XrayBatch<B: Backend> {
    /// Images with shape [batch_size, 3, height, width]
    pub images: Tensor<B, 4>,
    /// Labels with shape [batch_size]
    pub targets: Tensor<B, 1, Int>,
    /// Host copy of the labels for metric accumulation
    pub labels: Vec<i64>,
}

impl<B: Backend> XrayBatch<B> {
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

/// Batcher stacking preprocessed items into tensors
#[derive(Clone, Debug)]
pub struct XrayBatcher {
    image_size: usize,
}

impl XrayBatcher {
    pub fn new(image_size: usize) -> Self {
        Self { image_size }
    }
}

impl<B: Backend> Batcher<B, XrayItem, XrayBatch<B>> for XrayBatcher {
    fn batch(&self, items: Vec<XrayItem>, device: &B::Device) -> XrayBatch<B> {
        let batch_size = items.len();
        let size = self.image_size;

        let images_data: Vec<f32> = items.iter().flat_map(|item| item.image.iter().copied()).collect();
        let images = Tensor::<B, 4>::from_floats(
            TensorData::new(images_data, [batch_size, 3, size, size]),
            device,
        );

        let labels: Vec<i64> = items.iter().map(|item| item.label as i64).collect();
        let targets =
            Tensor::<B, 1, Int>::from_data(TensorData::new(labels.clone(), [batch_size]), device);

        XrayBatch {
            images,
            targets,
            labels,
        }
    }
}
