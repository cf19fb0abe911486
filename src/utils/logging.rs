//! Logging Module
//!
//! Structured logging with the `tracing` crate. `RUST_LOG` overrides the
//! configured level when set.

use std::time::Instant;

use tracing::Level;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Subscriber settings for the CLI
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Level used when `RUST_LOG` is unset
    pub level: Level,
    pub timestamps: bool,
    /// Show module paths
    pub include_target: bool,
    pub ansi_colors: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            timestamps: true,
            include_target: false,
            ansi_colors: true,
        }
    }
}

impl LogConfig {
    /// Debug-level logging with module targets (`--verbose`)
    pub fn verbose() -> Self {
        Self {
            level: Level::DEBUG,
            include_target: true,
            ..Self::default()
        }
    }

    fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(self.level.as_str().to_lowercase()))
    }
}

/// Install the global subscriber
///
/// Fails if one is already installed, which the CLI ignores.
pub fn init_logging(config: &LogConfig) -> Result<(), String> {
    let builder = FmtSubscriber::builder()
        .with_env_filter(config.filter())
        .with_ansi(config.ansi_colors)
        .with_target(config.include_target)
        .compact();

    let result = if config.timestamps {
        tracing::subscriber::set_global_default(builder.finish())
    } else {
        tracing::subscriber::set_global_default(builder.without_time().finish())
    };

    result.map_err(|e| format!("cannot install log subscriber: {}", e))
}

/// Per-epoch timing and log lines for the training loop
pub struct TrainingLogger {
    epoch: usize,
    total_epochs: usize,
    epoch_start: Instant,
    training_start: Instant,
}

impl TrainingLogger {
    /// Create a new training logger
    pub fn new(total_epochs: usize) -> Self {
        Self {
            epoch: 0,
            total_epochs,
            epoch_start: Instant::now(),
            training_start: Instant::now(),
        }
    }

    /// Log start of an epoch (1-based)
    pub fn start_epoch(&mut self, epoch: usize) {
        self.epoch = epoch;
        self.epoch_start = Instant::now();
        tracing::debug!("Epoch {}/{} started", epoch, self.total_epochs);
    }

    /// Seconds spent in the current epoch
    pub fn epoch_seconds(&self) -> f64 {
        self.epoch_start.elapsed().as_secs_f64()
    }

    /// Seconds until the epoch budget is exhausted, at the current pace
    pub fn eta_seconds(&self) -> f64 {
        let total_time = self.training_start.elapsed().as_secs_f64();
        let remaining = self.total_epochs.saturating_sub(self.epoch);
        remaining as f64 * total_time / self.epoch.max(1) as f64
    }

    /// Log end of an epoch with its headline metrics
    pub fn end_epoch(&self, train_loss: f64, val_loss: f64, val_accuracy: f64, learning_rate: f64) {
        let eta_secs = self.eta_seconds();

        tracing::debug!(
            "Epoch {}/{} completed in {:.1}s | loss {:.4} | val_loss {:.4} | val_acc {:.2}% | lr {:.2e} | ETA {:.0}s",
            self.epoch,
            self.total_epochs,
            self.epoch_seconds(),
            train_loss,
            val_loss,
            val_accuracy * 100.0,
            learning_rate,
            eta_secs
        );
    }

    /// Log training completion
    pub fn log_complete(&self, epochs_run: usize, best_accuracy: f64) {
        tracing::info!(
            "Training finished after {} epochs in {:.1}s | best val_acc {:.2}%",
            epochs_run,
            self.training_start.elapsed().as_secs_f64(),
            best_accuracy * 100.0
        );
    }
}
