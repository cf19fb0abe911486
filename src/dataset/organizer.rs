//! Dataset Organizer
//!
//! Turns a flat two-class collection (`source/{NORMAL,PNEUMONIA}/*`) into
//! `target/{train,val,test}/{NORMAL,PNEUMONIA}/*` by copying files.
//!
//! ## Split rule
//!
//! Each class is split on its own. Files are sorted by name, shuffled with
//! a `ChaCha8Rng` seeded from the run seed, then cut in order:
//!
//! - `n_train = floor(n * train_fraction)`
//! - `n_val = floor((n - n_train) / 2)`
//! - `n_test = n - n_train - n_val`
//!
//! so 10 files at 0.8 give 8/1/1 and 11 files give 8/1/2.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{list_images, ClassLabel, Split};
use crate::utils::error::{PneumoniaError, Result};

/// Default fraction of each class that goes to `train/`
pub const DEFAULT_TRAIN_FRACTION: f64 = 0.8;

/// Default seed for split assignment
pub const DEFAULT_SEED: u64 = 42;

/// Tolerance so that e.g. 10 * 0.7 is not floored to 6
const FRACTION_EPSILON: f64 = 1e-9;

/// Reject fractions outside the open interval (0, 1)
pub fn validate_train_fraction(train_fraction: f64) -> Result<()> {
    if !(train_fraction > 0.0 && train_fraction < 1.0) {
        return Err(PneumoniaError::Config(format!(
            "train fraction must be in (0, 1), got {}",
            train_fraction
        )));
    }
    Ok(())
}

/// File assignment for a single class
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitPlan {
    pub train: Vec<PathBuf>,
    pub val: Vec<PathBuf>,
    pub test: Vec<PathBuf>,
}

impl SplitPlan {
    /// Partition sizes `(train, val, test)` for `n` files
    pub fn sizes(n: usize, train_fraction: f64) -> (usize, usize, usize) {
        let n_train = ((n as f64 * train_fraction) + FRACTION_EPSILON).floor() as usize;
        let n_train = n_train.min(n);
        let rest = n - n_train;
        let n_val = rest / 2;
        (n_train, n_val, rest - n_val)
    }

    /// Shuffle `files` deterministically and cut them into three partitions
    pub fn new(mut files: Vec<PathBuf>, train_fraction: f64, seed: u64) -> Self {
        files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));

        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        files.shuffle(&mut rng);

        let (n_train, n_val, _) = Self::sizes(files.len(), train_fraction);
        let test = files.split_off(n_train + n_val);
        let val = files.split_off(n_train);

        Self {
            train: files,
            val,
            test,
        }
    }

    /// Files assigned to `split`
    pub fn files(&self, split: Split) -> &[PathBuf] {
        match split {
            Split::Train => &self.train,
            Split::Val => &self.val,
            Split::Test => &self.test,
        }
    }

    pub fn total(&self) -> usize {
        self.train.len() + self.val.len() + self.test.len()
    }
}

/// Outcome for one class of an organize run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassOutcome {
    pub class: ClassLabel,
    /// Reason the class was skipped, if it was
    pub skipped: Option<String>,
    /// Files planned per split, in `Split::ALL` order
    pub planned: [usize; 3],
    /// Files actually copied per split
    pub copied: [usize; 3],
    /// Copy failures (source path, error message)
    pub failures: Vec<(PathBuf, String)>,
}

impl ClassOutcome {
    fn skipped(class: ClassLabel, reason: String) -> Self {
        Self {
            class,
            skipped: Some(reason),
            planned: [0; 3],
            copied: [0; 3],
            failures: Vec::new(),
        }
    }
}

/// Summary of an organize run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrganizeReport {
    pub source: PathBuf,
    pub target: PathBuf,
    pub train_fraction: f64,
    pub seed: u64,
    pub classes: Vec<ClassOutcome>,
}

impl OrganizeReport {
    /// Number of files copied for `class` into `split`
    pub fn copied(&self, class: ClassLabel, split: Split) -> usize {
        let idx = split_index(split);
        self.classes
            .iter()
            .find(|c| c.class == class)
            .map(|c| c.copied[idx])
            .unwrap_or(0)
    }

    pub fn total_copied(&self) -> usize {
        self.classes.iter().map(|c| c.copied.iter().sum::<usize>()).sum()
    }

    pub fn total_failures(&self) -> usize {
        self.classes.iter().map(|c| c.failures.len()).sum()
    }
}

impl std::fmt::Display for OrganizeReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Organized {:?} -> {:?}", self.source, self.target)?;
        writeln!(
            f,
            "  train fraction {:.2}, seed {}",
            self.train_fraction, self.seed
        )?;
        for outcome in &self.classes {
            match &outcome.skipped {
                Some(reason) => writeln!(f, "  {:<10} skipped ({})", outcome.class, reason)?,
                None => writeln!(
                    f,
                    "  {:<10} train {:>5}  val {:>5}  test {:>5}  failed {}",
                    outcome.class,
                    outcome.copied[0],
                    outcome.copied[1],
                    outcome.copied[2],
                    outcome.failures.len()
                )?,
            }
        }
        write!(f, "  total copied: {}", self.total_copied())
    }
}

fn split_index(split: Split) -> usize {
    match split {
        Split::Train => 0,
        Split::Val => 1,
        Split::Test => 2,
    }
}

/// Compute the split plan for every class without touching the target
///
/// Classes whose folder is missing or holds no images map to `None`.
pub fn plan_organize(
    source_dir: &Path,
    train_fraction: f64,
    seed: u64,
) -> Result<Vec<(ClassLabel, Option<SplitPlan>)>> {
    validate_train_fraction(train_fraction)?;
    if !source_dir.is_dir() {
        return Err(PneumoniaError::PathNotFound(source_dir.to_path_buf()));
    }

    Ok(ClassLabel::ALL
        .into_iter()
        .map(|class| {
            let files = list_images(&source_dir.join(class.dir_name()));
            let plan = (!files.is_empty()).then(|| SplitPlan::new(files, train_fraction, seed));
            (class, plan)
        })
        .collect())
}

/// Split `source_dir` into `target_dir/{train,val,test}/{class}` by copying
///
/// Missing or empty class folders are skipped with a warning. Individual
/// copy failures are recorded in the report and do not abort the run.
pub fn organize(
    source_dir: &Path,
    target_dir: &Path,
    train_fraction: f64,
    seed: u64,
) -> Result<OrganizeReport> {
    let plans = plan_organize(source_dir, train_fraction, seed)?;

    for split in Split::ALL {
        for class in ClassLabel::ALL {
            std::fs::create_dir_all(target_dir.join(split.dir_name()).join(class.dir_name()))?;
        }
    }

    let mut classes = Vec::with_capacity(plans.len());
    for (class, plan) in plans {
        let class_dir = source_dir.join(class.dir_name());
        let Some(plan) = plan else {
            let reason = if class_dir.is_dir() {
                "no images found"
            } else {
                "folder not found"
            };
            warn!("Skipping class {}: {} in {:?}", class, reason, class_dir);
            classes.push(ClassOutcome::skipped(class, reason.to_string()));
            continue;
        };

        info!(
            "{}: {} images -> train {}, val {}, test {}",
            class,
            plan.total(),
            plan.train.len(),
            plan.val.len(),
            plan.test.len()
        );

        let mut outcome = ClassOutcome {
            class,
            skipped: None,
            planned: [plan.train.len(), plan.val.len(), plan.test.len()],
            copied: [0; 3],
            failures: Vec::new(),
        };

        for split in Split::ALL {
            let dest_dir = target_dir.join(split.dir_name()).join(class.dir_name());
            for src in plan.files(split) {
                let Some(file_name) = src.file_name() else {
                    continue;
                };
                match std::fs::copy(src, dest_dir.join(file_name)) {
                    Ok(_) => outcome.copied[split_index(split)] += 1,
                    Err(e) => {
                        warn!("Failed to copy {:?}: {}", src, e);
                        outcome.failures.push((src.clone(), e.to_string()));
                    }
                }
            }
        }

        debug!("{}: copied {:?}", class, outcome.copied);
        classes.push(outcome);
    }

    let report = OrganizeReport {
        source: source_dir.to_path_buf(),
        target: target_dir.to_path_buf(),
        train_fraction,
        seed,
        classes,
    };
    info!(
        "Organization complete: {} files copied, {} failures",
        report.total_copied(),
        report.total_failures()
    );
    Ok(report)
}

/// Per-class, per-split image counts of a data directory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructureReport {
    pub root: PathBuf,
    /// Counts in `root/{CLASS}`; `None` when the folder is absent
    pub flat: Vec<(ClassLabel, Option<usize>)>,
    /// Counts in `root/{split}/{CLASS}` for every split folder present
    pub splits: Vec<(Split, Vec<(ClassLabel, Option<usize>)>)>,
}

impl StructureReport {
    /// Images available for `class`, from the flat folder or `train/`
    pub fn available(&self, class: ClassLabel) -> usize {
        let flat = lookup(&self.flat, class).unwrap_or(0);
        let train = self
            .splits
            .iter()
            .find(|(s, _)| *s == Split::Train)
            .and_then(|(_, counts)| lookup(counts, class))
            .unwrap_or(0);
        flat.max(train)
    }

    /// Both class folders exist and hold at least one image
    pub fn is_usable(&self) -> bool {
        ClassLabel::ALL.into_iter().all(|c| self.available(c) > 0)
    }

    /// Count for `split`/`class`, if that folder exists
    pub fn split_count(&self, split: Split, class: ClassLabel) -> Option<usize> {
        self.splits
            .iter()
            .find(|(s, _)| *s == split)
            .and_then(|(_, counts)| lookup(counts, class))
    }
}

fn lookup(counts: &[(ClassLabel, Option<usize>)], class: ClassLabel) -> Option<usize> {
    counts.iter().find(|(c, _)| *c == class).and_then(|(_, n)| *n)
}

fn count_classes(dir: &Path) -> Vec<(ClassLabel, Option<usize>)> {
    ClassLabel::ALL
        .into_iter()
        .map(|class| {
            let class_dir = dir.join(class.dir_name());
            let count = class_dir.is_dir().then(|| list_images(&class_dir).len());
            (class, count)
        })
        .collect()
}

impl std::fmt::Display for StructureReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fn line(
            f: &mut std::fmt::Formatter<'_>,
            indent: &str,
            counts: &[(ClassLabel, Option<usize>)],
        ) -> std::fmt::Result {
            for (class, count) in counts {
                match count {
                    Some(n) => writeln!(f, "{}{:<10} {:>6} images", indent, class, n)?,
                    None => writeln!(f, "{}{:<10} missing", indent, class)?,
                }
            }
            Ok(())
        }

        writeln!(f, "Structure of {:?}", self.root)?;
        if self.flat.iter().any(|(_, n)| n.is_some()) {
            line(f, "  ", &self.flat)?;
        }
        for (split, counts) in &self.splits {
            let total: usize = counts.iter().filter_map(|(_, n)| *n).sum();
            writeln!(f, "  {}/ ({} images)", split, total)?;
            line(f, "    ", counts)?;
        }
        write!(
            f,
            "  usable for training: {}",
            if self.is_usable() { "yes" } else { "no" }
        )
    }
}

/// Report the structure of `dir` without modifying anything
pub fn check_structure(dir: &Path) -> StructureReport {
    let splits = Split::ALL
        .into_iter()
        .filter(|s| dir.join(s.dir_name()).is_dir())
        .map(|s| (s, count_classes(&dir.join(s.dir_name()))))
        .collect();

    StructureReport {
        root: dir.to_path_buf(),
        flat: count_classes(dir),
        splits,
    }
}

/// File names in a directory, for disjointness checks
pub fn file_names(dir: &Path) -> HashSet<String> {
    list_images(dir)
        .iter()
        .filter_map(|p| p.file_name().map(|n| n.to_string_lossy().to_string()))
        .collect()
}
