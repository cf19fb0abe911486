//! Pneumonia CNN command line
//!
//! Organizes chest X-ray folders, trains the classifier and runs a saved
//! model on new images.

use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing::info;

use pneumonia_cnn::backend::{backend_name, default_device, DefaultBackend, TrainingBackend};
use pneumonia_cnn::dataset::layout::EXPECTED_STRUCTURE;
use pneumonia_cnn::dataset::organizer::{
    plan_organize, validate_train_fraction, DEFAULT_SEED, DEFAULT_TRAIN_FRACTION,
};
use pneumonia_cnn::dataset::{check_structure, is_image_file, list_images, organize, Split};
use pneumonia_cnn::inference::{Predictor, DEFAULT_EVAL_BATCH_SIZE};
use pneumonia_cnn::model::artifact::artifact_size;
use pneumonia_cnn::model::ModelVariant;
use pneumonia_cnn::training::config::DEFAULT_OUTPUT;
use pneumonia_cnn::training::{run_training, TrainingConfig};
use pneumonia_cnn::utils::format_bytes;
use pneumonia_cnn::utils::logging::{init_logging, LogConfig};
use pneumonia_cnn::PneumoniaError;

/// Chest X-ray pneumonia classification with Burn
#[derive(Parser, Debug)]
#[command(name = "pneumonia_cnn")]
#[command(version)]
#[command(about = "Train and run a chest X-ray pneumonia classifier", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true, default_value = "false")]
    verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Train a model on a pre-split or flat data directory
    Train(TrainArgs),

    /// Split a flat NORMAL/PNEUMONIA collection into train/val/test
    Organize {
        /// Flat source directory with NORMAL/ and PNEUMONIA/
        #[arg(short, long)]
        source: Option<PathBuf>,

        /// Target directory for train/, val/ and test/
        #[arg(short, long, default_value = "data")]
        target: PathBuf,

        /// Fraction of each class copied to train/ (the rest is halved into val/ and test/)
        #[arg(long, default_value_t = DEFAULT_TRAIN_FRACTION)]
        train_split: f64,

        /// Only report the structure of --source (or --target), copy nothing
        #[arg(long, default_value = "false")]
        check: bool,

        /// Seed for the split assignment
        #[arg(long, default_value_t = DEFAULT_SEED)]
        seed: u64,

        /// Do not ask for confirmation before copying
        #[arg(short, long, default_value = "false")]
        yes: bool,
    },

    /// Report dataset counts and whether a trained model exists
    CheckSetup {
        /// Data directory to inspect
        #[arg(short, long, default_value = "data")]
        data_dir: PathBuf,

        /// Model artifact stem
        #[arg(short, long, default_value = DEFAULT_OUTPUT)]
        model: PathBuf,
    },

    /// Classify one or more images (directories are expanded)
    Predict {
        /// Model artifact stem
        #[arg(short, long, default_value = DEFAULT_OUTPUT)]
        model: PathBuf,

        /// Image files or directories
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        /// Print predictions as JSON
        #[arg(long, default_value = "false")]
        json: bool,
    },

    /// Measure a saved model on a labeled directory
    Evaluate {
        /// Model artifact stem
        #[arg(short, long, default_value = DEFAULT_OUTPUT)]
        model: PathBuf,

        /// Directory with NORMAL/ and PNEUMONIA/
        #[arg(short, long, default_value = "data/test")]
        data_dir: PathBuf,

        /// Batch size for inference
        #[arg(short, long, default_value_t = DEFAULT_EVAL_BATCH_SIZE)]
        batch_size: usize,
    },
}

/// Flags override the config file, which overrides the defaults
#[derive(clap::Args, Debug)]
struct TrainArgs {
    /// TOML file with training settings
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Dataset directory (default: data)
    #[arg(short, long)]
    data_dir: Option<PathBuf>,

    /// Number of training epochs (default: 20)
    #[arg(short, long)]
    epochs: Option<usize>,

    /// Batch size (default: 32)
    #[arg(short, long)]
    batch_size: Option<usize>,

    /// Held-out fraction for a flat dataset (default: 0.2)
    #[arg(long)]
    validation_split: Option<f64>,

    /// Model architecture (default: simple)
    #[arg(short, long, value_enum)]
    model_type: Option<ModelVariant>,

    /// Artifact stem (default: models/pneumonia_model)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Random seed (default: 42)
    #[arg(long)]
    seed: Option<u64>,

    /// Learning rate (default: 1e-3 simple, 1e-4 transfer)
    #[arg(short, long)]
    learning_rate: Option<f64>,

    /// Square input size in pixels (default: 224)
    #[arg(long)]
    image_size: Option<usize>,

    /// Pretrained MobileNetV2 record for --model-type transfer
    #[arg(long)]
    backbone_weights: Option<PathBuf>,

    /// Disable training augmentation
    #[arg(long, default_value = "false")]
    no_augment: bool,
}

impl TrainArgs {
    fn into_config(self) -> Result<TrainingConfig> {
        let mut config = match &self.config {
            Some(path) => TrainingConfig::load(path)?,
            None => TrainingConfig::default(),
        };

        if let Some(v) = self.data_dir {
            config.data_dir = v;
        }
        if let Some(v) = self.epochs {
            config.epochs = v;
        }
        if let Some(v) = self.batch_size {
            config.batch_size = v;
        }
        if let Some(v) = self.validation_split {
            config.validation_split = v;
        }
        if let Some(v) = self.model_type {
            config.model_type = v;
        }
        if let Some(v) = self.output {
            config.output = v;
        }
        if let Some(v) = self.seed {
            config.seed = v;
        }
        if self.learning_rate.is_some() {
            config.learning_rate = self.learning_rate;
        }
        if let Some(v) = self.image_size {
            config.image_size = v;
        }
        if self.backbone_weights.is_some() {
            config.backbone_weights = self.backbone_weights;
        }
        if self.no_augment {
            config.augment = false;
        }

        Ok(config)
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_config = if cli.verbose {
        LogConfig::verbose()
    } else {
        LogConfig::default()
    };

    let _ = init_logging(&log_config);

    print_banner();

    match cli.command {
        Commands::Train(args) => cmd_train(args)?,

        Commands::Organize {
            source,
            target,
            train_split,
            check,
            seed,
            yes,
        } => cmd_organize(source.as_deref(), &target, train_split, check, seed, yes)?,

        Commands::CheckSetup { data_dir, model } => cmd_check_setup(&data_dir, &model)?,

        Commands::Predict {
            model,
            inputs,
            json,
        } => cmd_predict(&model, &inputs, json)?,

        Commands::Evaluate {
            model,
            data_dir,
            batch_size,
        } => cmd_evaluate(&model, &data_dir, batch_size)?,
    }

    Ok(())
}

fn print_banner() {
    println!(
        "{}",
        r#"
 +------------------------------------------------------------+
 |   Pneumonia CNN                                            |
 |   Chest X-ray classification with Burn + Rust              |
 +------------------------------------------------------------+
  "#
        .green()
    );
}

fn print_expected_structure() {
    println!();
    println!("{}", "Expected structure:".yellow());
    for line in EXPECTED_STRUCTURE.lines() {
        println!("  {}", line);
    }
}

fn cmd_train(args: TrainArgs) -> Result<()> {
    let config = args.into_config()?;
    info!("Training with {:?}", config);
    println!("  Backend: {}", backend_name());

    match run_training::<TrainingBackend>(&config, default_device()) {
        Ok(_) => {
            println!();
            println!("{}", "Next steps:".cyan().bold());
            println!(
                "  • Evaluate: pneumonia_cnn evaluate --model {:?} --data-dir {:?}",
                config.output,
                config.data_dir.join(Split::Test.dir_name())
            );
            println!(
                "  • Predict:  pneumonia_cnn predict --model {:?} <image>",
                config.output
            );
            Ok(())
        }
        Err(PneumoniaError::PathNotFound(path)) => {
            println!(
                "{} Data directory not found: {:?}",
                "Error:".red(),
                path
            );
            print_expected_structure();
            bail!("data directory {:?} not found", path)
        }
        Err(e @ PneumoniaError::Dataset(_)) => {
            println!("{} {}", "Error:".red(), e);
            print_expected_structure();
            Err(e.into())
        }
        Err(e) => Err(e.into()),
    }
}

fn cmd_organize(
    source: Option<&Path>,
    target: &Path,
    train_split: f64,
    check: bool,
    seed: u64,
    yes: bool,
) -> Result<()> {
    if check {
        let dir = source.unwrap_or(target);
        if !dir.exists() {
            println!("{} Directory not found: {:?}", "Error:".red(), dir);
            print_expected_structure();
            return Ok(());
        }
        let report = check_structure(dir);
        println!("{}", report);
        if !report.is_usable() {
            print_expected_structure();
        }
        return Ok(());
    }

    let Some(source) = source else {
        bail!("--source is required unless --check is given");
    };
    validate_train_fraction(train_split)?;

    if !source.is_dir() {
        println!("{} Source directory not found: {:?}", "Error:".red(), source);
        println!();
        println!("The source must contain NORMAL/ and PNEUMONIA/ folders of images.");
        bail!("source directory {:?} not found", source);
    }

    println!("{}", check_structure(source));
    println!();

    let val_fraction = (1.0 - train_split) / 2.0;
    println!("{}", "Split plan:".cyan().bold());
    println!(
        "  train {:.0}% / val {:.0}% / test {:.0}%, seed {}",
        train_split * 100.0,
        val_fraction * 100.0,
        val_fraction * 100.0,
        seed
    );
    for (class, plan) in plan_organize(source, train_split, seed)? {
        match plan {
            Some(plan) => println!(
                "  {:<10} train {:>5}  val {:>5}  test {:>5}",
                class.dir_name(),
                plan.train.len(),
                plan.val.len(),
                plan.test.len()
            ),
            None => println!("  {:<10} {}", class.dir_name(), "skipped (no images)".yellow()),
        }
    }
    println!("  Target: {:?}", target);
    println!();

    if !yes && !confirm("Copy files now? [y/N] ")? {
        println!("{}", "Cancelled, nothing was copied.".yellow());
        return Ok(());
    }

    let report = organize(source, target, train_split, seed)?;
    let report_path = target.join("organize_report.json");
    std::fs::write(&report_path, serde_json::to_string_pretty(&report)?)
        .with_context(|| format!("writing {:?}", report_path))?;
    println!();
    println!("{}", report);
    if report.total_failures() > 0 {
        println!(
            "{} {} files could not be copied",
            "Warning:".yellow(),
            report.total_failures()
        );
    }
    println!();
    println!("{}", check_structure(target));
    println!();
    println!("{}", "Organization complete!".green().bold());
    println!("  Report: {:?}", report_path);
    println!("  Next: pneumonia_cnn train --data-dir {:?}", target);

    Ok(())
}

fn confirm(prompt: &str) -> Result<bool> {
    print!("{}", prompt);
    io::stdout().flush()?;

    let mut answer = String::new();
    io::stdin()
        .lock()
        .read_line(&mut answer)
        .context("reading confirmation")?;
    Ok(matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"))
}

fn cmd_check_setup(data_dir: &Path, model: &Path) -> Result<()> {
    println!("{}", "Data:".cyan().bold());
    let data_ok = if data_dir.exists() {
        let report = check_structure(data_dir);
        println!("{}", report);
        report.is_usable()
    } else {
        println!("  {} directory {:?} not found", "[missing]".red(), data_dir);
        print_expected_structure();
        false
    };

    println!();
    println!("{}", "Backend:".cyan().bold());
    println!("  {}", backend_name());

    println!();
    println!("{}", "Models:".cyan().bold());
    if let Some(parent) = model.parent().filter(|p| !p.as_os_str().is_empty()) {
        if !parent.exists() {
            std::fs::create_dir_all(parent)?;
            println!("  Created {:?}", parent);
        }
    }
    match artifact_size(model) {
        Some(bytes) => println!(
            "  {} existing model {:?} ({})",
            "[ok]".green(),
            model,
            format_bytes(bytes)
        ),
        None => println!("  No trained model yet, `pneumonia_cnn train` will create {:?}", model),
    }

    println!();
    if data_ok {
        println!("{}", "Ready to train.".green().bold());
    } else {
        println!("{}", "Data directory is not usable yet.".yellow().bold());
    }
    Ok(())
}

fn cmd_predict(model: &Path, inputs: &[PathBuf], json: bool) -> Result<()> {
    let predictor = Predictor::<DefaultBackend>::load(model, default_device())?;

    let mut images = Vec::new();
    for input in inputs {
        if input.is_dir() {
            images.extend(list_images(input));
        } else if is_image_file(input) {
            images.push(input.clone());
        } else {
            println!("{} skipping {:?}, not an image", "Warning:".yellow(), input);
        }
    }
    if images.is_empty() {
        bail!("no images to classify");
    }

    let mut predictions = Vec::with_capacity(images.len());
    for path in &images {
        match predictor.predict_image(path) {
            Ok(prediction) => predictions.push(prediction),
            Err(e) => println!("{} {}", "Error:".red(), e),
        }
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&predictions)?);
    } else {
        println!("{}", "Predictions:".cyan().bold());
        for prediction in &predictions {
            println!("  {}", prediction);
        }
    }
    Ok(())
}

fn cmd_evaluate(model: &Path, data_dir: &Path, batch_size: usize) -> Result<()> {
    let predictor = Predictor::<DefaultBackend>::load(model, default_device())?;
    let report = predictor.evaluate(data_dir, batch_size)?;

    println!("{}", "Evaluation:".cyan().bold());
    println!("{}", report);
    Ok(())
}
