//! End-to-end training run
//!
//! Order matters: configuration problems surface before any directory is
//! scanned, and data problems surface before a model is built.

use std::path::Path;

use burn::{module::Module, optim::AdamConfig, tensor::backend::AutodiffBackend};
use colored::Colorize;
use tracing::info;

use super::config::TrainingConfig;
use super::fit::{fit, standard_callbacks};
use super::history::{StopReason, TrainingHistory};
use super::trainer::BurnRunner;
use crate::dataset::{
    Augmenter, ClassCounts, ClassWeights, DatasetLayout, XrayDataset, XrayLoader,
};
use crate::model::PneumoniaModel;
use crate::utils::error::{PneumoniaError, Result};
use crate::utils::format_duration;

/// What a finished run leaves behind in memory
pub struct TrainingOutcome<B: AutodiffBackend> {
    /// Final weights (best-loss weights when early stopping fired)
    pub model: PneumoniaModel<B>,
    pub history: TrainingHistory,
    pub class_counts: ClassCounts,
    pub class_weights: Option<ClassWeights>,
    pub layout: DatasetLayout,
}

/// Train a model as described by `config`
///
/// Writes the best checkpoint to `<output>.mpk` / `<output>.json` and the
/// metric history to `<output>_history.json`.
pub fn run_training<B: AutodiffBackend>(
    config: &TrainingConfig,
    device: B::Device,
) -> Result<TrainingOutcome<B>> {
    config.validate()?;

    println!("{}", "Checking dataset...".cyan());
    let layout = DatasetLayout::detect(&config.data_dir, config.validation_split)?;
    println!("  Layout: {}", layout);
    println!("  Training directory: {:?}", layout.training_dir());

    let class_counts = ClassCounts::scan(layout.training_dir());
    println!();
    println!("{}", "Class distribution:".cyan().bold());
    for line in class_counts.to_string().lines() {
        println!("  {}", line);
    }

    let class_weights = ClassWeights::compute(&class_counts);
    match &class_weights {
        Some(weights) => println!("  Class weights: {}", weights),
        None => println!(
            "  {} class weights disabled, every class contributes equally",
            "Warning:".yellow()
        ),
    }
    class_counts.ensure_trainable()?;

    let splits = layout.load_splits(config.seed)?;
    let image_size = config.image_size as u32;
    let train_augmenter = if config.augment {
        Augmenter::new(config.augmentation.clone(), image_size)
    } else {
        Augmenter::no_augmentation(image_size)
    };
    let train_loader = XrayLoader::training(
        XrayDataset::new(splits.train.clone(), train_augmenter),
        config.batch_size,
        config.seed,
        config.augment,
    );
    let val_loader = XrayLoader::validation(
        XrayDataset::new(splits.val.clone(), Augmenter::no_augmentation(image_size)),
        config.batch_size,
    );

    for (name, loader) in [("training", &train_loader), ("validation", &val_loader)] {
        if loader.steps_per_epoch() == 0 {
            return Err(PneumoniaError::Config(format!(
                "batch size {} is larger than the {} {} images",
                config.batch_size,
                loader.num_samples(),
                name
            )));
        }
    }

    println!();
    println!("{}", "Dataset splits:".cyan().bold());
    println!(
        "  Training:   {:>6} images, {} steps per epoch",
        train_loader.num_samples(),
        train_loader.steps_per_epoch()
    );
    println!(
        "  Validation: {:>6} images, {} steps per epoch",
        val_loader.num_samples(),
        val_loader.steps_per_epoch()
    );

    let model_config = config.model_config();
    let model = model_config.init::<B>(&device)?;
    let learning_rate = config.effective_learning_rate();

    println!();
    println!("{}", "Model:".cyan().bold());
    println!("  Variant:        {}", config.model_type);
    println!("  Input:          {}", config.input_shape());
    println!("  Parameters:     {}", model.num_params());
    println!("  Learning rate:  {:.1e}", learning_rate);
    println!("  Epochs:         {}", config.epochs);
    println!("  Batch size:     {}", config.batch_size);
    println!("  Augmentation:   {}", if config.augment { "on" } else { "off" });
    println!("  Output:         {:?}", config.weights_path());
    println!();

    let optimizer = AdamConfig::new().init::<B, PneumoniaModel<B>>();
    let mut runner = BurnRunner::new(
        model,
        optimizer,
        train_loader,
        val_loader,
        class_weights,
        model_config,
        config.output.clone(),
        device,
    );

    println!("{}", "Starting training...".green().bold());
    println!();
    let mut callbacks = standard_callbacks(config);
    let history = fit(&mut runner, &mut callbacks, config.epochs, learning_rate)?;
    save_history(&history, &config.history_path())?;

    println!();
    println!("{}", "Training complete!".green().bold());
    println!(
        "  Epochs run:        {} ({})",
        history.epochs_run(),
        history
            .stop_reason
            .map(|r| r.to_string())
            .unwrap_or_default()
    );
    let total_secs: f64 = history.epochs.iter().map(|e| e.duration_secs).sum();
    println!("  Total time:        {}", format_duration(total_secs));
    if let (Some(epoch), Some(acc)) = (history.best_epoch, history.best_val_accuracy) {
        println!("  Best val accuracy: {:.2}% (epoch {})", acc * 100.0, epoch);
    }
    println!("  Best model saved to: {:?}", config.weights_path());
    println!("  History saved to:    {:?}", config.history_path());
    info!("Training run finished");

    Ok(TrainingOutcome {
        model: runner.into_model(),
        history,
        class_counts,
        class_weights,
        layout,
    })
}

/// Write the history, then report a diverged run as an error
///
/// The epochs before divergence stay on disk either way.
fn save_history(history: &TrainingHistory, path: &Path) -> Result<()> {
    history.save(path)?;
    if history.stop_reason == Some(StopReason::Diverged) {
        return Err(PneumoniaError::Training(format!(
            "loss diverged at epoch {}, history of the {} finite epochs saved to {:?}",
            history.epochs_run() + 1,
            history.epochs_run(),
            path
        )));
    }
    Ok(())
}
