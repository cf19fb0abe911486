//! Epoch-wise batch loading
//!
//! Training loaders reshuffle every epoch with a generator seeded from
//! `(seed, epoch)` and give each item its own augmentation seed, so a run
//! is reproducible regardless of thread scheduling. Validation loaders
//! keep file order and never augment.
//!
//! Both yield `floor(len / batch_size)` batches per epoch; the trailing
//! partial batch is dropped.

use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;

use super::burn_dataset::{XrayDataset, XrayItem};

/// Mixes the epoch into the seed so consecutive epochs differ
const EPOCH_SEED_STRIDE: u64 = 0x9E37_79B9_7F4A_7C15;

/// Batched view over an [`XrayDataset`]
#[derive(Debug, Clone)]
pub struct XrayLoader {
    dataset: XrayDataset,
    batch_size: usize,
    shuffle: bool,
    augment: bool,
    seed: u64,
}

/// One planned batch: dataset indices with their augmentation seeds
pub type StepPlan = Vec<(usize, Option<u64>)>;

impl XrayLoader {
    /// Shuffled loader; augments when `augment` is set
    pub fn training(dataset: XrayDataset, batch_size: usize, seed: u64, augment: bool) -> Self {
        Self {
            dataset,
            batch_size,
            shuffle: true,
            augment,
            seed,
        }
    }

    /// Order-stable loader without augmentation
    pub fn validation(dataset: XrayDataset, batch_size: usize) -> Self {
        Self {
            dataset,
            batch_size,
            shuffle: false,
            augment: false,
            seed: 0,
        }
    }

    pub fn dataset(&self) -> &XrayDataset {
        &self.dataset
    }

    pub fn num_samples(&self) -> usize {
        self.dataset.samples().len()
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// `floor(samples / batch_size)`
    pub fn steps_per_epoch(&self) -> usize {
        if self.batch_size == 0 {
            return 0;
        }
        self.num_samples() / self.batch_size
    }

    /// Index and augmentation-seed assignment for every step of `epoch`
    pub fn plan_epoch(&self, epoch: usize) -> Vec<StepPlan> {
        let mut indices: Vec<usize> = (0..self.num_samples()).collect();
        let mut rng =
            ChaCha8Rng::seed_from_u64(self.seed ^ (epoch as u64).wrapping_mul(EPOCH_SEED_STRIDE));

        if self.shuffle {
            indices.shuffle(&mut rng);
        }

        let steps = self.steps_per_epoch();
        let planned: Vec<(usize, Option<u64>)> = indices
            .into_iter()
            .take(steps * self.batch_size)
            .map(|i| (i, self.augment.then(|| rng.gen::<u64>())))
            .collect();

        planned
            .chunks(self.batch_size.max(1))
            .map(|chunk| chunk.to_vec())
            .collect()
    }

    /// Decode one planned step in parallel, preserving order
    ///
    /// Unreadable images are dropped, so a batch may come back short.
    pub fn load_step(&self, step: &StepPlan) -> Vec<XrayItem> {
        step.par_iter()
            .filter_map(|&(index, item_seed)| match item_seed {
                Some(s) => {
                    let mut rng = ChaCha8Rng::seed_from_u64(s);
                    self.dataset.load(index, Some(&mut rng))
                }
                None => self.dataset.load(index, None),
            })
            .collect()
    }

    /// Iterate the decoded batches of `epoch`
    pub fn iter_epoch(&self, epoch: usize) -> impl Iterator<Item = Vec<XrayItem>> + '_ {
        self.plan_epoch(epoch)
            .into_iter()
            .map(move |step| self.load_step(&step))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::augmentation::Augmenter;
    use crate::dataset::layout::LabeledSample;
    use crate::dataset::test_util::write_image;
    use crate::dataset::ClassLabel;
    use std::path::PathBuf;
    use tempfile::tempdir;

    fn fake_dataset(n: usize) -> XrayDataset {
        let samples = (0..n)
            .map(|i| LabeledSample {
                path: PathBuf::from(format!("/unused/{}.png", i)),
                label: if i % 2 == 0 { ClassLabel::Normal } else { ClassLabel::Pneumonia },
            })
            .collect();
        XrayDataset::new(samples, Augmenter::no_augmentation(8))
    }

    #[test]
    fn test_steps_per_epoch_floors() {
        assert_eq!(XrayLoader::validation(fake_dataset(10), 3).steps_per_epoch(), 3);
        assert_eq!(XrayLoader::validation(fake_dataset(2), 3).steps_per_epoch(), 0);
        assert_eq!(XrayLoader::training(fake_dataset(64), 32, 1, true).steps_per_epoch(), 2);
    }

    #[test]
    fn test_validation_order_is_stable() {
        let loader = XrayLoader::validation(fake_dataset(7), 2);
        let plan = loader.plan_epoch(0);
        assert_eq!(plan.len(), 3);
        let indices: Vec<usize> = plan.iter().flatten().map(|(i, _)| *i).collect();
        assert_eq!(indices, vec![0, 1, 2, 3, 4, 5]);
        assert!(plan.iter().flatten().all(|(_, seed)| seed.is_none()));
        assert_eq!(loader.plan_epoch(3), plan);
    }

    #[test]
    fn test_training_shuffle_is_seeded_per_epoch() {
        let loader = XrayLoader::training(fake_dataset(40), 8, 42, true);
        let e0 = loader.plan_epoch(0);
        let e1 = loader.plan_epoch(1);

        assert_eq!(e0, loader.plan_epoch(0));
        assert_ne!(e0, e1);

        let mut seen: Vec<usize> = e0.iter().flatten().map(|(i, _)| *i).collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..40).collect::<Vec<_>>());
        assert!(e0.iter().flatten().all(|(_, seed)| seed.is_some()));
    }

    #[test]
    fn test_load_step_drops_unreadable() {
        let dir = tempdir().unwrap();
        let good = dir.path().join("ok.png");
        write_image(&good, 12, 30);
        let dataset = XrayDataset::new(
            vec![
                LabeledSample { path: good, label: ClassLabel::Normal },
                LabeledSample { path: dir.path().join("missing.png"), label: ClassLabel::Pneumonia },
            ],
            Augmenter::with_defaults(8),
        );
        let loader = XrayLoader::training(dataset, 2, 5, true);

        let batches: Vec<Vec<XrayItem>> = loader.iter_epoch(0).collect();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 1);
        assert_eq!(batches[0][0].label, 0);
    }
}
