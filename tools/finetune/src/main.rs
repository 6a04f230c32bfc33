//! Fine-tuning CLI.
//!
//! Loads a TOML training configuration, applies command-line overrides and
//! runs the orchestrator on the compiled backend.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;
use verdant_core::{
    install_interrupt_handler, load_toml_config, setup_cli_logging, CancellationToken, ModelName,
    OptimizerKind, RunStatus, TrainingConfig,
};
use verdant_training::{backend_name, TrainingOrchestrator, TrainingOutcome};

/// Fine-tune a plant image classifier
#[derive(Parser, Debug)]
#[command(
    name = "verdant-finetune",
    about = "Fine-tune a plant image classifier on a partitioned dataset",
    long_about = "Trains one of the registered architectures on DATA_DIR/{train,val} and \
                  optionally evaluates DATA_DIR/test, writing a checkpoint and its JSON sidecar."
)]
struct Args {
    /// Training configuration file (TOML)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Override the partitioned data root
    #[arg(short, long, value_name = "DIR")]
    data_dir: Option<PathBuf>,

    /// Override the architecture
    #[arg(short, long)]
    model: Option<ModelName>,

    /// Override the optimizer
    #[arg(long)]
    optimizer: Option<OptimizerKind>,

    /// Override number of epochs
    #[arg(short, long, value_name = "N")]
    epochs: Option<usize>,

    /// Override batch size
    #[arg(short, long, value_name = "SIZE")]
    batch_size: Option<usize>,

    /// Override learning rate
    #[arg(short, long, value_name = "LR")]
    lr: Option<f64>,

    /// Start from this checkpoint
    #[arg(long, value_name = "PATH")]
    load: Option<PathBuf>,

    /// Write the trained model here
    #[arg(short, long, value_name = "PATH")]
    save: Option<PathBuf>,

    /// Drop mismatched checkpoint parts instead of failing
    #[arg(long)]
    tolerant: bool,

    /// Seed for shuffling and augmentation
    #[arg(long)]
    seed: Option<u64>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Validate the configuration and exit
    #[arg(long)]
    dry_run: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    setup_cli_logging(args.verbose)?;

    let config = build_config(&args)?;
    config.validate().context("Invalid training configuration")?;

    info!("Backend: {}", backend_name());
    print_config_summary(&config);
    if args.dry_run {
        info!("Configuration validated successfully (dry run)");
        return Ok(());
    }

    let epochs = ProgressBar::new(config.training.num_epochs as u64);
    epochs.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} epochs {msg}")
            .context("Invalid progress template")?
            .progress_chars("=>-"),
    );
    epochs.enable_steady_tick(Duration::from_millis(250));

    let reporter = |message: &str| {
        if message.starts_with("Processing batch") {
            epochs.set_message(message.to_string());
        } else if message.starts_with("val Loss") {
            epochs.inc(1);
            epochs.println(message);
        } else if message != "----------" {
            epochs.println(message);
        }
    };

    let token = CancellationToken::new();
    install_interrupt_handler(&token)?;
    let orchestrator = TrainingOrchestrator::new(config);
    let outcome = orchestrator
        .run_default(&reporter, &token)
        .inspect_err(|_| epochs.abandon())
        .context("Fine-tuning failed")?;
    epochs.finish_and_clear();

    print_outcome(&outcome);
    Ok(())
}

fn build_config(args: &Args) -> Result<TrainingConfig> {
    let mut config = match &args.config {
        Some(path) => load_toml_config::<TrainingConfig>(path)
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => TrainingConfig::default(),
    };

    if let Some(dir) = &args.data_dir {
        config.data.data_dir = dir.clone();
    }
    if let Some(model) = args.model {
        config.model.name = model;
    }
    if let Some(kind) = args.optimizer {
        config.optimizer.kind = kind;
    }
    if let Some(epochs) = args.epochs {
        config.training.num_epochs = epochs;
    }
    if let Some(batch_size) = args.batch_size {
        config.training.batch_size = batch_size;
    }
    if let Some(lr) = args.lr {
        config.optimizer.learning_rate = lr;
    }
    if args.load.is_some() {
        config.checkpoint.load_path = args.load.clone();
    }
    if args.save.is_some() {
        config.checkpoint.save_path = args.save.clone();
    }
    if args.tolerant {
        config.checkpoint.strict = false;
    }
    if args.seed.is_some() {
        config.seed = args.seed;
    }

    Ok(config)
}

fn print_config_summary(config: &TrainingConfig) {
    info!("Configuration:");
    info!("  Model: {} (dropout {})", config.model.name, config.model.dropout);
    info!(
        "  Optimizer: {} (lr {})",
        config.optimizer.kind, config.optimizer.learning_rate
    );
    info!("  Loss: {}", config.loss.kind);
    info!(
        "  Epochs: {}, batch size: {}",
        config.training.num_epochs, config.training.batch_size
    );
    info!("  Data: {:?} at {}px", config.data.data_dir, config.data.input_size);
    if let Some(path) = &config.checkpoint.load_path {
        info!("  Resume from: {:?} (strict: {})", path, config.checkpoint.strict);
    }
}

fn print_outcome(outcome: &TrainingOutcome) {
    println!();
    let headline = match outcome.status {
        RunStatus::Completed => "Fine-tuning Complete!".green().bold(),
        RunStatus::EarlyStopped => "Fine-tuning Stopped Early".green().bold(),
        RunStatus::Cancelled => "Fine-tuning Cancelled".yellow().bold(),
    };
    println!("{headline}");
    println!("  Epochs run:     {}", outcome.history.len());
    println!("  Val accuracy:   {:.2}%", outcome.val_accuracy * 100.0);
    if let Some(best) = outcome.history.best_val_accuracy() {
        println!("  Best val acc:   {:.2}%", best * 100.0);
    }
    if let Some(test) = outcome.test_accuracy {
        println!("  Test accuracy:  {:.2}%", test * 100.0);
    }
    println!("  Precision:      {}", outcome.precision);
    println!("  Seed:           {}", outcome.seed);
    if let Some(path) = &outcome.checkpoint {
        println!("  Saved to:       {}", path.display().to_string().cyan());
    }
}
