//! Class-imbalance correction
//!
//! Per-class image counts are taken by re-scanning the effective training
//! directory, and turned into `weight[c] = max(counts) / counts[c]`.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::layout::LabeledSample;
use super::{list_images, ClassLabel, NUM_CLASSES};
use crate::utils::error::{PneumoniaError, Result};

/// Image count per class, indexed by [`ClassLabel::index`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassCounts {
    counts: [usize; NUM_CLASSES],
}

impl ClassCounts {
    pub fn new(counts: [usize; NUM_CLASSES]) -> Self {
        Self { counts }
    }

    /// Count images in `dir/{CLASS}` for every class
    ///
    /// Missing or empty class folders count as zero and are logged as skipped.
    pub fn scan(dir: &Path) -> Self {
        let mut counts = [0; NUM_CLASSES];
        for class in ClassLabel::ALL {
            let class_dir = dir.join(class.dir_name());
            if !class_dir.is_dir() {
                warn!("Class folder {:?} not found, skipping {}", class_dir, class);
                continue;
            }
            let n = list_images(&class_dir).len();
            if n == 0 {
                warn!("Class folder {:?} has no images, skipping {}", class_dir, class);
            }
            counts[class.index()] = n;
        }
        Self { counts }
    }

    /// Count labels of already discovered samples
    pub fn from_samples(samples: &[LabeledSample]) -> Self {
        let mut counts = [0; NUM_CLASSES];
        for sample in samples {
            counts[sample.label.index()] += 1;
        }
        Self { counts }
    }

    pub fn get(&self, class: ClassLabel) -> usize {
        self.counts[class.index()]
    }

    pub fn total(&self) -> usize {
        self.counts.iter().sum()
    }

    pub fn as_array(&self) -> [usize; NUM_CLASSES] {
        self.counts
    }

    /// Classes with at least one image
    pub fn non_empty_classes(&self) -> usize {
        self.counts.iter().filter(|&&n| n > 0).count()
    }

    /// Fail unless at least two classes have samples
    pub fn ensure_trainable(&self) -> Result<()> {
        if self.total() == 0 {
            return Err(PneumoniaError::Dataset(
                "the training directory contains no images".to_string(),
            ));
        }
        if self.non_empty_classes() < NUM_CLASSES {
            let missing: Vec<&str> = ClassLabel::ALL
                .into_iter()
                .filter(|c| self.get(*c) == 0)
                .map(|c| c.dir_name())
                .collect();
            return Err(PneumoniaError::Dataset(format!(
                "binary training needs images for both classes; none found for {}",
                missing.join(", ")
            )));
        }
        Ok(())
    }
}

impl std::fmt::Display for ClassCounts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let total = self.total().max(1) as f64;
        for (i, class) in ClassLabel::ALL.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            let n = self.get(*class);
            write!(
                f,
                "{:<10} {:>6} ({:>5.1}%)",
                class.dir_name(),
                n,
                100.0 * n as f64 / total
            )?;
        }
        Ok(())
    }
}

/// Loss weight per class, indexed by [`ClassLabel::index`]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClassWeights {
    weights: [f32; NUM_CLASSES],
}

impl ClassWeights {
    /// `max(counts) / counts[c]`, or `None` when any class count is zero
    ///
    /// An all-zero or partially empty count table disables weighting with a
    /// warning; whether training may proceed is decided by
    /// [`ClassCounts::ensure_trainable`].
    pub fn compute(counts: &ClassCounts) -> Option<Self> {
        if counts.total() == 0 {
            warn!("No class counts available, training without class weights");
            return None;
        }
        if counts.non_empty_classes() < NUM_CLASSES {
            warn!(
                "At least one class has no training images, training without class weights"
            );
            return None;
        }

        let max = counts.as_array().into_iter().max().unwrap_or(0) as f32;
        let mut weights = [1.0; NUM_CLASSES];
        for class in ClassLabel::ALL {
            weights[class.index()] = max / counts.get(class) as f32;
        }
        Some(Self { weights })
    }

    pub fn new(weights: [f32; NUM_CLASSES]) -> Self {
        Self { weights }
    }

    pub fn get(&self, class: ClassLabel) -> f32 {
        self.weights[class.index()]
    }

    /// Weights as a vector ordered by class index, as the loss expects
    pub fn to_vec(&self) -> Vec<f32> {
        self.weights.to_vec()
    }
}

impl std::fmt::Display for ClassWeights {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let parts: Vec<String> = ClassLabel::ALL
            .iter()
            .map(|c| format!("{} ({}): {:.3}", c.dir_name(), c.index(), self.get(*c)))
            .collect();
        write!(f, "{}", parts.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::layout::{scan_samples, DatasetLayout};
    use crate::dataset::test_util::populate;
    use tempfile::tempdir;

    #[test]
    fn test_weights_for_imbalanced_counts() {
        let weights = ClassWeights::compute(&ClassCounts::new([100, 300])).unwrap();
        assert_eq!(weights.get(ClassLabel::Normal), 3.0);
        assert_eq!(weights.get(ClassLabel::Pneumonia), 1.0);
        assert_eq!(weights.to_vec(), vec![3.0, 1.0]);
    }

    #[test]
    fn test_most_frequent_class_gets_one() {
        let weights = ClassWeights::compute(&ClassCounts::new([1341, 3875])).unwrap();
        assert_eq!(weights.get(ClassLabel::Pneumonia), 1.0);
        assert!((weights.get(ClassLabel::Normal) - 3875.0 / 1341.0).abs() < 1e-5);

        let balanced = ClassWeights::compute(&ClassCounts::new([50, 50])).unwrap();
        assert_eq!(balanced.to_vec(), vec![1.0, 1.0]);
    }

    #[test]
    fn test_zero_class_disables_weighting_and_blocks_training() {
        let counts = ClassCounts::new([0, 120]);
        assert!(ClassWeights::compute(&counts).is_none());
        assert!(matches!(
            counts.ensure_trainable(),
            Err(PneumoniaError::Dataset(msg)) if msg.contains("NORMAL")
        ));
    }

    #[test]
    fn test_all_zero_counts() {
        let counts = ClassCounts::default();
        assert!(ClassWeights::compute(&counts).is_none());
        assert!(counts.ensure_trainable().is_err());
    }

    #[test]
    fn test_scan_missing_class_counts_zero() {
        let dir = tempdir().unwrap();
        populate(&dir.path().join("PNEUMONIA"), "p", 3, 200);

        let counts = ClassCounts::scan(dir.path());
        assert_eq!(counts.as_array(), [0, 3]);
        assert_eq!(counts.non_empty_classes(), 1);
    }

    #[test]
    fn test_counting_and_loading_share_class_indices() {
        let dir = tempdir().unwrap();
        populate(&dir.path().join("train/NORMAL"), "n", 2, 10);
        populate(&dir.path().join("train/PNEUMONIA"), "p", 6, 200);
        populate(&dir.path().join("val/NORMAL"), "vn", 1, 10);
        populate(&dir.path().join("val/PNEUMONIA"), "vp", 1, 200);

        let layout = DatasetLayout::detect(dir.path(), 0.2).unwrap();
        let scanned = ClassCounts::scan(layout.training_dir());
        let loaded = ClassCounts::from_samples(&scan_samples(layout.training_dir()));
        assert_eq!(scanned, loaded);

        // The minority class (NORMAL, index 0) carries the larger weight
        let weights = ClassWeights::compute(&scanned).unwrap();
        assert_eq!(weights.to_vec(), vec![3.0, 1.0]);
        let sample = scan_samples(layout.training_dir())
            .into_iter()
            .find(|s| s.path.to_string_lossy().contains("/NORMAL/"))
            .unwrap();
        assert_eq!(sample.label.index(), 0);
    }
}
