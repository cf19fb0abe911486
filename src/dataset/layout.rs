//! Dataset layout detection and sample discovery
//!
//! Two layouts are supported:
//!
//! ```text
//! Pre-split                       Flat
//! data/                           data/
//! ├── train/{NORMAL,PNEUMONIA}/   ├── NORMAL/
//! ├── val/{NORMAL,PNEUMONIA}/     └── PNEUMONIA/
//! └── test/...  (unused here)
//! ```
//!
//! The pre-split layout is used iff both `train/` and `val/` exist. The
//! flat layout holds out a per-class fraction for validation.

use std::path::{Path, PathBuf};

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::class_weights::ClassCounts;
use super::{list_images, ClassLabel, Split};
use crate::utils::error::{PneumoniaError, Result};

/// Expected directory structure, printed when the data directory is unusable
pub const EXPECTED_STRUCTURE: &str = "\
Expected one of:
  <data_dir>/train/NORMAL/*.jpeg      <data_dir>/NORMAL/*.jpeg
  <data_dir>/train/PNEUMONIA/*.jpeg   <data_dir>/PNEUMONIA/*.jpeg
  <data_dir>/val/NORMAL/*.jpeg
  <data_dir>/val/PNEUMONIA/*.jpeg
Image extensions: png, jpg, jpeg, jfif (any case).
Use `pneumonia_cnn organize --source <dir>` to create the split layout.";

/// A labeled image on disk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabeledSample {
    pub path: PathBuf,
    pub label: ClassLabel,
}

/// Which side of a flat directory's held-out split to take
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Subset {
    Training,
    Validation,
}

/// On-disk layout of a training data directory
#[derive(Debug, Clone, PartialEq)]
pub enum DatasetLayout {
    /// `train/` and `val/` subdirectories, each with class folders
    PreSplit { train_dir: PathBuf, val_dir: PathBuf },
    /// Class folders directly under `root`, split on the fly
    Flat { root: PathBuf, validation_split: f64 },
}

impl DatasetLayout {
    /// Detect the layout of `data_dir`
    ///
    /// `validation_split` only applies to the flat layout and must lie in (0, 1).
    pub fn detect(data_dir: &Path, validation_split: f64) -> Result<Self> {
        if !data_dir.is_dir() {
            return Err(PneumoniaError::PathNotFound(data_dir.to_path_buf()));
        }

        let train_dir = data_dir.join(Split::Train.dir_name());
        let val_dir = data_dir.join(Split::Val.dir_name());

        if train_dir.is_dir() && val_dir.is_dir() {
            debug!("Detected pre-split layout in {:?}", data_dir);
            return Ok(Self::PreSplit { train_dir, val_dir });
        }

        if !(validation_split > 0.0 && validation_split < 1.0) {
            return Err(PneumoniaError::Config(format!(
                "validation split must be in (0, 1) for a flat directory, got {}",
                validation_split
            )));
        }

        debug!("Detected flat layout in {:?}", data_dir);
        Ok(Self::Flat {
            root: data_dir.to_path_buf(),
            validation_split,
        })
    }

    /// Directory whose class folders hold the training images
    pub fn training_dir(&self) -> &Path {
        match self {
            Self::PreSplit { train_dir, .. } => train_dir,
            Self::Flat { root, .. } => root,
        }
    }

    pub fn is_pre_split(&self) -> bool {
        matches!(self, Self::PreSplit { .. })
    }

    /// Collect training and validation samples
    pub fn load_splits(&self, seed: u64) -> Result<DataSplits> {
        let splits = match self {
            Self::PreSplit { train_dir, val_dir } => DataSplits {
                train: scan_samples(train_dir),
                val: scan_samples(val_dir),
            },
            Self::Flat {
                root,
                validation_split,
            } => DataSplits {
                train: flat_subset(root, *validation_split, seed, Subset::Training),
                val: flat_subset(root, *validation_split, seed, Subset::Validation),
            },
        };

        info!(
            "Found {} training and {} validation images ({})",
            splits.train.len(),
            splits.val.len(),
            self
        );
        Ok(splits)
    }
}

impl std::fmt::Display for DatasetLayout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PreSplit { .. } => write!(f, "pre-split train/val layout"),
            Self::Flat {
                validation_split, ..
            } => write!(
                f,
                "flat layout, {:.0}% held out for validation",
                validation_split * 100.0
            ),
        }
    }
}

/// Every image under `dir/{CLASS}` for both classes, in class then name order
pub fn scan_samples(dir: &Path) -> Vec<LabeledSample> {
    ClassLabel::ALL
        .into_iter()
        .flat_map(|label| {
            list_images(&dir.join(label.dir_name()))
                .into_iter()
                .map(move |path| LabeledSample { path, label })
        })
        .collect()
}

/// One side of a seeded per-class split of a flat directory
///
/// For each class, files are sorted and shuffled with `ChaCha8Rng(seed)`;
/// the first `floor(n * validation_split)` form the validation subset and
/// the rest the training subset, so the two never overlap.
pub fn flat_subset(
    root: &Path,
    validation_split: f64,
    seed: u64,
    subset: Subset,
) -> Vec<LabeledSample> {
    let mut samples = Vec::new();

    for label in ClassLabel::ALL {
        let mut files = list_images(&root.join(label.dir_name()));
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        files.shuffle(&mut rng);

        let n_val = (files.len() as f64 * validation_split).floor() as usize;
        let chosen = match subset {
            Subset::Validation => &files[..n_val],
            Subset::Training => &files[n_val..],
        };
        samples.extend(chosen.iter().map(|path| LabeledSample {
            path: path.clone(),
            label,
        }));
    }

    samples
}

/// Training and validation samples for one run
#[derive(Debug, Clone)]
pub struct DataSplits {
    pub train: Vec<LabeledSample>,
    pub val: Vec<LabeledSample>,
}

impl DataSplits {
    pub fn train_counts(&self) -> ClassCounts {
        ClassCounts::from_samples(&self.train)
    }

    pub fn val_counts(&self) -> ClassCounts {
        ClassCounts::from_samples(&self.val)
    }
}
