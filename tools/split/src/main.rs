//! Dataset partitioning CLI.
//!
//! Scans a raw image tree for class directories and writes a stratified
//! train/val/test split, optionally resized, under the destination root.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;
use verdant_core::{
    install_interrupt_handler, load_toml_config, setup_cli_logging, CancellationToken, ColorMode,
    PartitionConfig, SplitRatios,
};
use verdant_dataset::{DatasetManifest, DatasetPartitioner, PartitionOutcome, MANIFEST_FILE};

/// Partition a raw plant image tree into train/val/test folders
#[derive(Parser, Debug)]
#[command(
    name = "verdant-split",
    about = "Partition a raw image tree into train/val/test folders",
    long_about = "Finds every directory holding images (at any depth), treats its name as a class \
                  and copies a shuffled, per-class split of its images into \
                  DEST/{train,val,test}/CLASS."
)]
struct Args {
    /// Raw image tree
    #[arg(value_name = "SOURCE")]
    source: Option<PathBuf>,

    /// Destination root
    #[arg(value_name = "DEST")]
    destination: Option<PathBuf>,

    /// Partition configuration file (TOML)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Train, val and test ratios, comma separated
    #[arg(long, value_name = "T,V,T", value_delimiter = ',', num_args = 3)]
    ratios: Option<Vec<f64>>,

    /// Resize every image to SIZExSIZE instead of copying the file
    #[arg(short, long, value_name = "SIZE")]
    resolution: Option<u32>,

    /// Shuffle seed
    #[arg(short, long)]
    seed: Option<u64>,

    /// Pixel format when resizing (RGB, L, RGBA)
    #[arg(long, value_name = "MODE")]
    color_mode: Option<ColorMode>,

    /// Recognized extensions, comma separated
    #[arg(long, value_delimiter = ',')]
    extensions: Option<Vec<String>>,

    /// Remove existing split folders in DEST before writing
    #[arg(long)]
    clear: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    setup_cli_logging(args.verbose)?;

    let config = build_config(&args)?;
    info!("Partitioning {:?} into {:?}", config.source, config.destination);

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {msg}")
            .context("Invalid progress template")?,
    );
    spinner.enable_steady_tick(Duration::from_millis(120));

    let reporter = |message: &str| {
        if message.starts_with("Copying") || message.starts_with("Found class") {
            spinner.set_message(message.to_string());
        } else {
            spinner.println(message);
        }
    };

    let token = CancellationToken::new();
    install_interrupt_handler(&token)?;
    let outcome = DatasetPartitioner::new(config)
        .run(&reporter, &token)
        .inspect_err(|_| spinner.abandon())
        .context("Dataset partitioning failed")?;
    spinner.finish_and_clear();

    match outcome {
        PartitionOutcome::Completed(manifest) => print_summary(&manifest),
        PartitionOutcome::Cancelled => println!("{}", "Partitioning cancelled".yellow().bold()),
    }

    Ok(())
}

fn build_config(args: &Args) -> Result<PartitionConfig> {
    let mut config = match &args.config {
        Some(path) => load_toml_config::<PartitionConfig>(path)
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => PartitionConfig::default(),
    };

    match (&args.source, &args.destination, &args.config) {
        (Some(source), Some(destination), _) => {
            config.source = source.clone();
            config.destination = destination.clone();
        }
        (None, None, Some(_)) => {}
        _ => bail!("SOURCE and DEST are required unless a config file provides them"),
    }

    if let Some(ratios) = &args.ratios {
        if let [train, val, test] = ratios[..] {
            config.ratios = SplitRatios::new(train, val, test);
        }
    }
    if args.resolution.is_some() {
        config.resolution = args.resolution;
    }
    if args.seed.is_some() {
        config.seed = args.seed;
    }
    if let Some(mode) = args.color_mode {
        config.color_mode = mode;
    }
    if let Some(extensions) = &args.extensions {
        config.extensions = extensions.clone();
    }
    config.clear_destination |= args.clear;

    Ok(config)
}

fn print_summary(manifest: &DatasetManifest) {
    println!();
    println!("{}", "Partition Complete!".green().bold());
    println!("  Classes: {}", manifest.classes.len().to_string().cyan());
    println!(
        "  Images:  {} ({} train / {} val / {} test)",
        manifest.total().to_string().cyan(),
        manifest.train_count,
        manifest.val_count,
        manifest.test_count
    );
    println!("  Seed:    {}", manifest.seed);
    if !manifest.duplicates.is_empty() {
        println!(
            "  {} {} duplicate class directories were skipped",
            "!".yellow(),
            manifest.duplicates.len()
        );
    }
    println!(
        "  Manifest: {}",
        manifest.destination.join(MANIFEST_FILE).display()
    );
}
