//! Burn-backed epoch runner
//!
//! Implements [`EpochRunner`] for a [`PneumoniaModel`] on any autodiff
//! backend:
//! - class-weighted binary cross-entropy on logits for training
//! - unweighted binary cross-entropy for validation
//! - Adam updates at the learning rate chosen by the loop
//! - accuracy, precision and recall from a confusion matrix at 0.5

use std::path::PathBuf;

use burn::{
    data::dataloader::batcher::Batcher,
    module::{AutodiffModule, Module},
    nn::loss::{BinaryCrossEntropyLoss, BinaryCrossEntropyLossConfig},
    optim::{GradientsParams, Optimizer},
    tensor::{
        activation::sigmoid,
        backend::{AutodiffBackend, Backend},
        ElementConversion, Tensor,
    },
};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::debug;

use super::fit::EpochRunner;
use super::history::{EpochMetrics, PassMetrics};
use crate::dataset::{ClassWeights, XrayBatch, XrayBatcher, XrayLoader};
use crate::model::artifact::{save_artifact, ArtifactMetadata};
use crate::model::{ModelConfig, PneumoniaModel};
use crate::utils::error::{PneumoniaError, Result};
use crate::utils::metrics::BinaryConfusion;

/// Deep copy of every parameter and running statistic
pub type ModelRecord<B> = <PneumoniaModel<B> as Module<B>>::Record;

/// Model, optimizer and data for one training run
pub struct BurnRunner<B, O>
where
    B: AutodiffBackend,
    O: Optimizer<PneumoniaModel<B>, B>,
{
    model: PneumoniaModel<B>,
    optimizer: O,
    train_loader: XrayLoader,
    val_loader: XrayLoader,
    batcher: XrayBatcher,
    train_loss: BinaryCrossEntropyLoss<B>,
    val_loss: BinaryCrossEntropyLoss<B::InnerBackend>,
    model_config: ModelConfig,
    output: PathBuf,
    device: B::Device,
    show_progress: bool,
}

impl<B, O> BurnRunner<B, O>
where
    B: AutodiffBackend,
    O: Optimizer<PneumoniaModel<B>, B>,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        model: PneumoniaModel<B>,
        optimizer: O,
        train_loader: XrayLoader,
        val_loader: XrayLoader,
        class_weights: Option<ClassWeights>,
        model_config: ModelConfig,
        output: PathBuf,
        device: B::Device,
    ) -> Self {
        let batcher = XrayBatcher::new(train_loader.dataset().image_size());
        let train_loss = BinaryCrossEntropyLossConfig::new()
            .with_logits(true)
            .with_weights(class_weights.map(|w| w.to_vec()))
            .init(&device);
        let val_loss = BinaryCrossEntropyLossConfig::new()
            .with_logits(true)
            .init(&device);

        Self {
            model,
            optimizer,
            train_loader,
            val_loader,
            batcher,
            train_loss,
            val_loss,
            model_config,
            output,
            device,
            show_progress: true,
        }
    }

    /// Hide the per-step progress bar
    pub fn without_progress(mut self) -> Self {
        self.show_progress = false;
        self
    }

    pub fn model(&self) -> &PneumoniaModel<B> {
        &self.model
    }

    pub fn into_model(self) -> PneumoniaModel<B> {
        self.model
    }

    fn progress_bar(&self, steps: usize, phase: &str) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }
        let bar = ProgressBar::new(steps as u64);
        let style = ProgressStyle::default_bar()
            .template("  {prefix:>5} [{bar:40.cyan/blue}] {pos}/{len} steps {msg}")
            .map(|s| s.progress_chars("=>-"))
            .unwrap_or_else(|_| ProgressStyle::default_bar());
        bar.set_style(style);
        bar.set_prefix(phase.to_string());
        bar
    }
}

/// Sigmoid probabilities of a logit tensor, copied to the host
fn probabilities<BK: Backend>(logits: Tensor<BK, 1>) -> Result<Vec<f32>> {
    sigmoid(logits)
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|e| PneumoniaError::Training(format!("cannot read predictions: {:?}", e)))
}

impl<B, O> EpochRunner for BurnRunner<B, O>
where
    B: AutodiffBackend,
    O: Optimizer<PneumoniaModel<B>, B>,
{
    type Snapshot = ModelRecord<B>;

    fn train_epoch(&mut self, epoch: usize, learning_rate: f64) -> Result<PassMetrics> {
        let plan = self.train_loader.plan_epoch(epoch);
        let bar = self.progress_bar(plan.len(), "train");

        let mut confusion = BinaryConfusion::new();
        let mut loss_sum = 0.0;
        let mut batches = 0usize;

        for step in &plan {
            let items = self.train_loader.load_step(step);
            if items.is_empty() {
                bar.inc(1);
                continue;
            }

            let batch: XrayBatch<B> = self.batcher.batch(items, &self.device);
            let logits = self.model.forward(batch.images);
            let loss = self.train_loss.forward(logits.clone(), batch.targets);

            let loss_value: f64 = loss.clone().into_scalar().elem();
            confusion.record_probabilities(&probabilities(logits.detach())?, &batch.labels);
            loss_sum += loss_value;
            batches += 1;

            let grads = GradientsParams::from_grads(loss.backward(), &self.model);
            self.model = self.optimizer.step(learning_rate, self.model.clone(), grads);

            bar.set_message(format!("loss {:.4}", loss_sum / batches as f64));
            bar.inc(1);
        }
        bar.finish_and_clear();

        if batches == 0 {
            return Err(PneumoniaError::Training(format!(
                "epoch {} produced no readable training batches",
                epoch
            )));
        }

        debug!("Epoch {}: {} training batches", epoch, batches);
        Ok(PassMetrics::from_confusion(loss_sum / batches as f64, &confusion))
    }

    fn validate(&mut self, _epoch: usize) -> Result<PassMetrics> {
        let model = self.model.valid();
        let plan = self.val_loader.plan_epoch(0);
        let bar = self.progress_bar(plan.len(), "val");

        let mut confusion = BinaryConfusion::new();
        let mut loss_sum = 0.0;
        let mut batches = 0usize;

        for step in &plan {
            let items = self.val_loader.load_step(step);
            if items.is_empty() {
                bar.inc(1);
                continue;
            }

            let batch: XrayBatch<B::InnerBackend> = self.batcher.batch(items, &self.device);
            let logits = model.forward(batch.images);
            let loss = self.val_loss.forward(logits.clone(), batch.targets);

            let loss_value: f64 = loss.into_scalar().elem();
            confusion.record_probabilities(&probabilities(logits)?, &batch.labels);
            loss_sum += loss_value;
            batches += 1;
            bar.inc(1);
        }
        bar.finish_and_clear();

        if batches == 0 {
            return Err(PneumoniaError::Training(
                "no readable validation batches".to_string(),
            ));
        }

        Ok(PassMetrics::from_confusion(loss_sum / batches as f64, &confusion))
    }

    /// A record, not a clone: cloned batch-norm running stats share state
    /// with the live model and would keep updating.
    fn snapshot(&self) -> ModelRecord<B> {
        self.model.clone().into_record()
    }

    /// Loads into a freshly built module so no pending running-stat updates
    /// of the live model survive the restore. Parameter ids come from the
    /// record, so the optimizer state still applies.
    fn restore(&mut self, snapshot: ModelRecord<B>) -> Result<()> {
        self.model = self
            .model_config
            .init_for_record::<B>(&self.device)?
            .load_record(snapshot);
        Ok(())
    }

    fn save_checkpoint(&mut self, metrics: &EpochMetrics) -> Result<()> {
        let metadata = ArtifactMetadata::new(
            self.model_config.clone(),
            metrics.epoch,
            metrics.val_accuracy(),
            metrics.val_loss(),
            metrics.learning_rate,
        );
        save_artifact(&self.model, &metadata, &self.output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::layout::LabeledSample;
    use crate::dataset::test_util::write_image;
    use crate::dataset::{Augmenter, ClassLabel, XrayDataset};
    use crate::model::artifact::load_artifact;
    use crate::model::{InputShape, ModelVariant};
    use burn::backend::Autodiff;
    use burn::optim::AdamConfig;
    use burn_ndarray::NdArray;
    use tempfile::tempdir;

    type TestBackend = Autodiff<NdArray>;

    fn dataset(dir: &std::path::Path, n: usize, size: u32) -> XrayDataset {
        let samples = (0..n)
            .map(|i| {
                let label = if i % 2 == 0 { ClassLabel::Normal } else { ClassLabel::Pneumonia };
                let path = dir.join(format!("{}_{}.png", label.dir_name(), i));
                write_image(&path, 40, if i % 2 == 0 { 20 } else { 220 });
                LabeledSample { path, label }
            })
            .collect();
        XrayDataset::new(samples, Augmenter::no_augmentation(size))
    }

    fn runner(
        dir: &std::path::Path,
    ) -> BurnRunner<TestBackend, impl Optimizer<PneumoniaModel<TestBackend>, TestBackend>> {
        runner_for(dir, ModelVariant::Simple, 96)
    }

    fn runner_for(
        dir: &std::path::Path,
        variant: ModelVariant,
        size: usize,
    ) -> BurnRunner<TestBackend, impl Optimizer<PneumoniaModel<TestBackend>, TestBackend>> {
        let device = Default::default();
        let config = ModelConfig::new(variant, InputShape::square(size));
        let model = config.init::<TestBackend>(&device).unwrap();
        let data = dataset(&dir.join("images"), 4, size as u32);

        BurnRunner::new(
            model,
            AdamConfig::new().init::<TestBackend, PneumoniaModel<TestBackend>>(),
            XrayLoader::training(data.clone(), 2, 1, false),
            XrayLoader::validation(data, 2),
            ClassWeights::compute(&crate::dataset::ClassCounts::new([2, 2])),
            config,
            dir.join("models/model"),
            device,
        )
        .without_progress()
    }

    #[test]
    fn test_epoch_metrics_are_finite() {
        let dir = tempdir().unwrap();
        let mut runner = runner(dir.path());

        let train = runner.train_epoch(1, 1e-3).unwrap();
        let val = runner.validate(1).unwrap();

        assert!(train.loss.is_finite());
        assert!(val.loss.is_finite());
        assert_eq!(train.samples, 4);
        assert_eq!(val.samples, 4);
        assert!((0.0..=1.0).contains(&val.accuracy));
    }

    #[test]
    fn test_checkpoint_writes_loadable_artifact() {
        let dir = tempdir().unwrap();
        let mut runner = runner(dir.path());
        let val = runner.validate(1).unwrap();
        let metrics = EpochMetrics {
            epoch: 1,
            train: PassMetrics::default(),
            val,
            learning_rate: 1e-3,
            duration_secs: 0.0,
        };

        runner.save_checkpoint(&metrics).unwrap();

        let (_, meta) = load_artifact::<NdArray>(&dir.path().join("models/model"), &Default::default())
            .unwrap();
        assert_eq!(meta.epoch, 1);
        assert_eq!(meta.val_accuracy, val.accuracy);
    }

    #[test]
    fn test_restore_replaces_weights() {
        let dir = tempdir().unwrap();
        let mut runner = runner(dir.path());
        let before = runner.snapshot();
        let weights = |m: &PneumoniaModel<TestBackend>| match m {
            PneumoniaModel::Simple(s) => s.output.bias.as_ref().unwrap().val().into_data(),
            PneumoniaModel::Transfer(t) => t.output.bias.as_ref().unwrap().val().into_data(),
        };
        let initial = weights(runner.model());

        runner.train_epoch(1, 1e-2).unwrap();
        assert_ne!(weights(runner.model()), initial);

        runner.restore(before).unwrap();
        assert_eq!(weights(runner.model()), initial);
    }

    #[test]
    fn test_restore_rewinds_batch_norm_statistics() {
        let dir = tempdir().unwrap();
        let mut runner = runner_for(dir.path(), ModelVariant::Transfer, 32);
        let stem_mean = |m: &PneumoniaModel<TestBackend>| match m {
            PneumoniaModel::Transfer(t) => t.backbone.stem.bn.running_mean.value().into_data(),
            PneumoniaModel::Simple(_) => unreachable!("transfer model expected"),
        };

        let initial = stem_mean(runner.model());
        let snapshot = runner.snapshot();

        runner.train_epoch(1, 1e-2).unwrap();
        runner.validate(1).unwrap();
        assert_ne!(stem_mean(runner.model()), initial);

        runner.restore(snapshot).unwrap();
        assert_eq!(stem_mean(runner.model()), initial);

        // validation syncs running stats; nothing from before the restore may leak in
        runner.validate(2).unwrap();
        assert_eq!(stem_mean(runner.model()), initial);
    }
}
