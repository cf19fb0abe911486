//! Dataset module for chest X-ray data handling
//!
//! This module provides functionality for:
//! - Organizing a flat two-class collection into train/val/test splits
//! - Detecting the on-disk layout and scanning labeled samples
//! - Counting per-class images for class weighting
//! - Data augmentation, Burn batching and epoch-wise loading
//!
//! ## Class mapping
//!
//! [`ClassLabel`] is the only place where a class is assigned an index.
//! The organizer, the class counter, the loader and the predictor all go
//! through it, so `NORMAL` is always 0 and `PNEUMONIA` is always 1.

pub mod augmentation;
pub mod burn_dataset;
pub mod class_weights;
pub mod layout;
pub mod loader;
pub mod organizer;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;
use walkdir::WalkDir;

pub use augmentation::{AugmentationConfig, Augmenter};
pub use burn_dataset::{XrayBatch, XrayBatcher, XrayDataset, XrayItem};
pub use class_weights::{ClassCounts, ClassWeights};
pub use layout::{DataSplits, DatasetLayout, LabeledSample};
pub use loader::XrayLoader;
pub use organizer::{check_structure, organize, OrganizeReport, SplitPlan, StructureReport};

/// Recognized image extensions (compared case-insensitively)
pub const IMAGE_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "jfif"];

/// Number of diagnostic classes
pub const NUM_CLASSES: usize = 2;

/// The two diagnostic classes, in index order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ClassLabel {
    Normal = 0,
    Pneumonia = 1,
}

impl ClassLabel {
    /// All classes, ordered by index
    pub const ALL: [ClassLabel; NUM_CLASSES] = [ClassLabel::Normal, ClassLabel::Pneumonia];

    /// Class index used for targets and weight tables
    pub fn index(self) -> usize {
        self as usize
    }

    /// Class from an index
    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    /// Directory name on disk
    pub fn dir_name(self) -> &'static str {
        match self {
            ClassLabel::Normal => "NORMAL",
            ClassLabel::Pneumonia => "PNEUMONIA",
        }
    }

    /// Human-readable label used in predictions
    pub fn display_name(self) -> &'static str {
        match self {
            ClassLabel::Normal => "Normal",
            ClassLabel::Pneumonia => "Pneumonia",
        }
    }

    /// Class from a directory name (exact match)
    pub fn from_dir_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.dir_name() == name)
    }
}

impl std::fmt::Display for ClassLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.dir_name())
    }
}

/// One of the three on-disk partitions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Split {
    Train,
    Val,
    Test,
}

impl Split {
    pub const ALL: [Split; 3] = [Split::Train, Split::Val, Split::Test];

    /// Directory name on disk
    pub fn dir_name(self) -> &'static str {
        match self {
            Split::Train => "train",
            Split::Val => "val",
            Split::Test => "test",
        }
    }
}

impl std::fmt::Display for Split {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.dir_name())
    }
}

/// Whether a path has one of the recognized image extensions
pub fn is_image_file(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or(false)
}

/// List the image files directly inside `dir`, sorted by file name
///
/// A missing directory yields an empty list. Unreadable entries are
/// skipped with a warning.
pub fn list_images(dir: &Path) -> Vec<PathBuf> {
    if !dir.is_dir() {
        return Vec::new();
    }

    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(e) => Some(e),
            Err(err) => {
                warn!("Skipping unreadable entry in {:?}: {}", dir, err);
                None
            }
        })
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| is_image_file(p))
        .collect();

    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    files
}

#[cfg(test)]
pub(crate) mod test_util {
    use std::path::Path;

    use image::{ImageBuffer, Rgb};

    /// Write a small synthetic RGB image; brightness encodes `shade`
    pub fn write_image(path: &Path, size: u32, shade: u8) {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        let img = ImageBuffer::from_fn(size, size, |x, y| {
            Rgb([shade, (x * 7 % 256) as u8, (y * 5 % 256) as u8])
        });
        img.save(path).unwrap();
    }

    /// Create `count` images named `{prefix}_{i:03}.png` in `dir`
    pub fn populate(dir: &Path, prefix: &str, count: usize, shade: u8) {
        std::fs::create_dir_all(dir).unwrap();
        for i in 0..count {
            write_image(&dir.join(format!("{}_{:03}.png", prefix, i)), 8, shade);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_canonical_class_indices() {
        assert_eq!(ClassLabel::Normal.index(), 0);
        assert_eq!(ClassLabel::Pneumonia.index(), 1);
        assert_eq!(ClassLabel::from_index(1), Some(ClassLabel::Pneumonia));
        assert_eq!(ClassLabel::from_index(2), None);
        assert_eq!(ClassLabel::from_dir_name("NORMAL"), Some(ClassLabel::Normal));
        assert_eq!(ClassLabel::from_dir_name("normal"), None);
    }

    #[test]
    fn test_is_image_file_case_insensitive() {
        assert!(is_image_file(Path::new("a/b.PNG")));
        assert!(is_image_file(Path::new("a/b.Jpeg")));
        assert!(is_image_file(Path::new("a/b.jfif")));
        assert!(!is_image_file(Path::new("a/b.txt")));
        assert!(!is_image_file(Path::new("a/noext")));
    }

    #[test]
    fn test_list_images_filters_and_sorts() {
        let dir = tempdir().unwrap();
        for name in ["c.jpg", "a.PNG", "b.jfif", "notes.txt"] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }
        std::fs::create_dir(dir.path().join("nested.png")).unwrap();

        let names: Vec<String> = list_images(dir.path())
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();

        assert_eq!(names, vec!["a.PNG", "b.jfif", "c.jpg"]);
    }

    #[test]
    fn test_list_images_missing_dir() {
        assert!(list_images(Path::new("/definitely/not/here")).is_empty());
    }
}
