//! Stratified train/val/test partitioning of a discovered image tree.
//!
//! Each class is shuffled with one run-wide seeded generator and cut into
//! consecutive train, val and test slices whose sizes are `count * ratio`
//! truncated toward zero. Whatever truncation leaves over goes to train, so
//! the three slices always partition the class exactly.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use image::imageops::FilterType;
use image::DynamicImage;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use verdant_core::{
    CancellationToken, ColorMode, Error, PartitionConfig, ProgressReporter, Result, Split,
    SplitRatios,
};

use crate::discovery::{discover_classes, ClassDirectory};

/// File written next to the split folders on successful completion
pub const MANIFEST_FILE: &str = "split_info.json";

/// Per-split image counts for a class of a given size
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SplitCounts {
    pub train: usize,
    pub val: usize,
    pub test: usize,
}

impl SplitCounts {
    /// Truncated counts in train, val, test order. The train count here does
    /// not include the leftover; see [`SplitAssignment::assign`].
    pub fn for_class(total: usize, ratios: &SplitRatios) -> Self {
        let take = |ratio: f64| (total as f64 * ratio) as usize;

        let train = take(ratios.train).min(total);
        let val = take(ratios.val).min(total - train);
        let test = take(ratios.test).min(total - train - val);

        Self { train, val, test }
    }
}

/// Disjoint train/val/test image lists for one class
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SplitAssignment {
    pub train: Vec<PathBuf>,
    pub val: Vec<PathBuf>,
    pub test: Vec<PathBuf>,
}

impl SplitAssignment {
    /// Shuffle `images` with `rng` and cut it into consecutive slices.
    pub fn assign<R: Rng + ?Sized>(
        mut images: Vec<PathBuf>,
        ratios: &SplitRatios,
        rng: &mut R,
    ) -> Self {
        images.shuffle(rng);

        let counts = SplitCounts::for_class(images.len(), ratios);
        let val_end = counts.train + counts.val;
        let test_end = val_end + counts.test;

        let leftover = images.split_off(test_end);
        let test = images.split_off(val_end);
        let val = images.split_off(counts.train);
        let mut train = images;
        train.extend(leftover);

        Self { train, val, test }
    }

    pub fn get(&self, split: Split) -> &[PathBuf] {
        match split {
            Split::Train => &self.train,
            Split::Val => &self.val,
            Split::Test => &self.test,
        }
    }

    pub fn len(&self) -> usize {
        self.train.len() + self.val.len() + self.test.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Split membership of one class, by file name
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassManifest {
    pub name: String,
    pub source: PathBuf,
    pub train: Vec<String>,
    pub val: Vec<String>,
    pub test: Vec<String>,
}

impl ClassManifest {
    fn files_mut(&mut self, split: Split) -> &mut Vec<String> {
        match split {
            Split::Train => &mut self.train,
            Split::Val => &mut self.val,
            Split::Test => &mut self.test,
        }
    }

    pub fn files(&self, split: Split) -> &[String] {
        match split {
            Split::Train => &self.train,
            Split::Val => &self.val,
            Split::Test => &self.test,
        }
    }
}

/// Description of a finished partitioning run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetManifest {
    pub created_at: String,
    pub source: PathBuf,
    pub destination: PathBuf,
    pub seed: u64,
    pub ratios: SplitRatios,
    pub resolution: Option<u32>,
    pub color_mode: ColorMode,
    pub classes: Vec<ClassManifest>,
    /// Class directories skipped because their name was already taken
    pub duplicates: Vec<PathBuf>,
    pub train_count: usize,
    pub val_count: usize,
    pub test_count: usize,
}

impl DatasetManifest {
    pub fn class(&self, name: &str) -> Option<&ClassManifest> {
        self.classes.iter().find(|c| c.name == name)
    }

    pub fn total(&self) -> usize {
        self.train_count + self.val_count + self.test_count
    }

    pub fn load(path: &Path) -> Result<Self> {
        let json = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }
}

/// How a partitioning run ended, when it did not fail
#[derive(Debug, Clone)]
pub enum PartitionOutcome {
    Completed(DatasetManifest),
    /// Stopped at a polling point; the destination may be partially populated
    Cancelled,
}

impl PartitionOutcome {
    pub fn manifest(&self) -> Option<&DatasetManifest> {
        match self {
            PartitionOutcome::Completed(manifest) => Some(manifest),
            PartitionOutcome::Cancelled => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, PartitionOutcome::Cancelled)
    }
}

/// Turns a raw class tree into `dest/{train,val,test}/{class}/{file}`.
#[derive(Debug, Clone)]
pub struct DatasetPartitioner {
    config: PartitionConfig,
}

impl DatasetPartitioner {
    pub fn new(config: PartitionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PartitionConfig {
        &self.config
    }

    /// Run the partitioning. Failures are reported through `reporter` before
    /// being returned; cancellation is `Ok(PartitionOutcome::Cancelled)`.
    pub fn run(
        &self,
        reporter: &dyn ProgressReporter,
        token: &CancellationToken,
    ) -> Result<PartitionOutcome> {
        self.run_inner(reporter, token).inspect_err(|e| {
            reporter.report(&format!("Error: {e}"));
        })
    }

    fn run_inner(
        &self,
        reporter: &dyn ProgressReporter,
        token: &CancellationToken,
    ) -> Result<PartitionOutcome> {
        let config = &self.config;
        config.validate()?;

        reporter.report("Starting dataset processing...");

        if !config.source.is_dir() {
            return Err(Error::Input(format!(
                "Source directory not found: {}",
                config.source.display()
            )));
        }
        let stale = self.check_destination()?;

        let discovery = discover_classes(&config.source, &config.extensions, reporter)?;
        if discovery.is_empty() {
            return Err(Error::NoClasses(config.source.clone()));
        }

        for dir in stale {
            info!("Clearing existing split folder {:?}", dir);
            fs::remove_dir_all(&dir)?;
        }

        let seed = config.seed.unwrap_or_else(rand::random);
        reporter.report(&format!("Using random seed: {seed}"));
        let mut rng = ChaCha8Rng::seed_from_u64(seed);

        for split in self.active_splits() {
            fs::create_dir_all(self.split_dir(split))?;
        }

        let mut manifest = DatasetManifest {
            created_at: Utc::now().to_rfc3339(),
            source: config.source.clone(),
            destination: config.destination.clone(),
            seed,
            ratios: config.ratios,
            resolution: config.resolution,
            color_mode: config.color_mode,
            classes: Vec::with_capacity(discovery.classes.len()),
            duplicates: discovery.duplicates.clone(),
            train_count: 0,
            val_count: 0,
            test_count: 0,
        };

        for class in &discovery.classes {
            if token.is_cancelled() {
                reporter.report("Processing cancelled.");
                return Ok(PartitionOutcome::Cancelled);
            }

            match self.process_class(class, &mut rng, reporter, token)? {
                Some(class_manifest) => manifest.classes.push(class_manifest),
                None => {
                    reporter.report("Processing cancelled.");
                    return Ok(PartitionOutcome::Cancelled);
                }
            }
        }

        for class in &manifest.classes {
            manifest.train_count += class.train.len();
            manifest.val_count += class.val.len();
            manifest.test_count += class.test.len();
        }

        let manifest_path = config.destination.join(MANIFEST_FILE);
        fs::write(&manifest_path, serde_json::to_string_pretty(&manifest)?)?;
        info!(
            "Split complete - Train: {}, Val: {}, Test: {} (manifest: {:?})",
            manifest.train_count, manifest.val_count, manifest.test_count, manifest_path
        );

        reporter.report("Dataset processing complete.");
        Ok(PartitionOutcome::Completed(manifest))
    }

    /// Returns `None` when cancellation was observed mid-class.
    fn process_class(
        &self,
        class: &ClassDirectory,
        rng: &mut ChaCha8Rng,
        reporter: &dyn ProgressReporter,
        token: &CancellationToken,
    ) -> Result<Option<ClassManifest>> {
        reporter.report(&format!(
            "Found class: {} with {} images.",
            class.name,
            class.images.len()
        ));

        let assignment = SplitAssignment::assign(class.images.clone(), &self.config.ratios, rng);
        let mut class_manifest = ClassManifest {
            name: class.name.clone(),
            source: class.path.clone(),
            ..ClassManifest::default()
        };

        for split in Split::ALL {
            let files = assignment.get(split);
            if files.is_empty() {
                continue;
            }

            let class_dir = self.split_dir(split).join(&class.name);
            fs::create_dir_all(&class_dir)?;
            reporter.report(&format!(
                "Copying {} {} images for class {}...",
                files.len(),
                split.label(),
                class.name
            ));

            for source in files {
                if token.is_cancelled() {
                    return Ok(None);
                }

                let Some(file_name) = source.file_name() else {
                    continue;
                };
                self.materialize(source, &class_dir.join(file_name))?;
                class_manifest
                    .files_mut(split)
                    .push(file_name.to_string_lossy().to_string());
            }
        }

        info!(
            "  {}: {} total (train: {}, val: {}, test: {})",
            class.name,
            assignment.len(),
            assignment.train.len(),
            assignment.val.len(),
            assignment.test.len()
        );

        Ok(Some(class_manifest))
    }

    fn materialize(&self, source: &Path, dest: &Path) -> Result<()> {
        let Some(size) = self.config.resolution else {
            fs::copy(source, dest)?;
            return Ok(());
        };

        let img = image::open(source)
            .map_err(|e| Error::Image(format!("Failed to decode {}: {e}", source.display())))?;
        let img = convert_color(img, self.config.color_mode)
            .resize_exact(size, size, FilterType::Triangle);
        img.save(dest)
            .map_err(|e| Error::Image(format!("Failed to write {}: {e}", dest.display())))?;

        debug!("Wrote {:?} ({}x{})", dest, size, size);
        Ok(())
    }

    /// Refuse to write into populated split folders unless asked to clear
    /// them. Returns the folders to clear; nothing is removed here.
    fn check_destination(&self) -> Result<Vec<PathBuf>> {
        let destination = &self.config.destination;
        if destination.exists() && !destination.is_dir() {
            return Err(Error::Input(format!(
                "Destination is not a directory: {}",
                destination.display()
            )));
        }

        let mut stale = Vec::new();
        for split in Split::ALL {
            let dir = self.split_dir(split);
            if !dir.exists() {
                continue;
            }
            if !dir.is_dir() {
                return Err(Error::DestinationNotEmpty(dir));
            }

            let populated = fs::read_dir(&dir)?.next().is_some();
            if !populated {
                continue;
            }
            if !self.config.clear_destination {
                return Err(Error::DestinationNotEmpty(dir));
            }
            stale.push(dir);
        }

        Ok(stale)
    }

    fn active_splits(&self) -> Vec<Split> {
        Split::ALL
            .into_iter()
            .filter(|split| *split != Split::Test || self.config.ratios.test > 0.0)
            .collect()
    }

    fn split_dir(&self, split: Split) -> PathBuf {
        self.config.destination.join(split.dir_name())
    }
}

fn convert_color(img: DynamicImage, mode: ColorMode) -> DynamicImage {
    match mode {
        ColorMode::Rgb => DynamicImage::ImageRgb8(img.to_rgb8()),
        ColorMode::L => DynamicImage::ImageLuma8(img.to_luma8()),
        ColorMode::Rgba => DynamicImage::ImageRgba8(img.to_rgba8()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{create_class, create_test_image};
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;
    use verdant_core::{ErrorKind, RecordingReporter};

    fn paths(n: usize) -> Vec<PathBuf> {
        (0..n).map(|i| PathBuf::from(format!("img_{i:03}.jpg"))).collect()
    }

    fn config(source: &Path, dest: &Path, ratios: SplitRatios) -> PartitionConfig {
        PartitionConfig {
            ratios,
            seed: Some(42),
            ..PartitionConfig::new(source, dest)
        }
    }

    fn files_in(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = match fs::read_dir(dir) {
            Ok(entries) => entries
                .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
                .collect(),
            Err(_) => Vec::new(),
        };
        names.sort();
        names
    }

    #[test]
    fn test_counts_truncate_in_order() {
        let counts = SplitCounts::for_class(10, &SplitRatios::new(0.8, 0.1, 0.1));
        assert_eq!(counts, SplitCounts { train: 8, val: 1, test: 1 });

        let counts = SplitCounts::for_class(10, &SplitRatios::new(0.7, 0.2, 0.1));
        assert_eq!(counts, SplitCounts { train: 7, val: 2, test: 1 });

        let counts = SplitCounts::for_class(7, &SplitRatios::new(0.5, 0.25, 0.25));
        assert_eq!(counts, SplitCounts { train: 3, val: 1, test: 1 });
    }

    #[test]
    fn test_assignment_partitions_exactly() {
        let ratio_grid = [
            SplitRatios::new(0.8, 0.1, 0.1),
            SplitRatios::new(0.33, 0.33, 0.33),
            SplitRatios::new(0.0, 0.5, 0.5),
            SplitRatios::new(0.6, 0.0, 0.0),
            SplitRatios::new(0.0, 0.0, 0.0),
        ];
        let mut rng = ChaCha8Rng::seed_from_u64(3);

        for ratios in ratio_grid {
            for n in [0usize, 1, 2, 3, 9, 10, 37] {
                let images = paths(n);
                let assignment = SplitAssignment::assign(images.clone(), &ratios, &mut rng);
                assert_eq!(assignment.len(), n);

                let mut all: HashSet<PathBuf> = HashSet::new();
                for split in Split::ALL {
                    for path in assignment.get(split) {
                        assert!(all.insert(path.clone()), "{path:?} assigned twice");
                    }
                }
                assert_eq!(all, images.into_iter().collect::<HashSet<_>>());
            }
        }
    }

    #[test]
    fn test_leftover_goes_to_train() {
        let mut rng = ChaCha8Rng::seed_from_u64(0);

        let one = SplitAssignment::assign(paths(1), &SplitRatios::new(0.8, 0.1, 0.1), &mut rng);
        assert_eq!((one.train.len(), one.val.len(), one.test.len()), (1, 0, 0));

        let seven = SplitAssignment::assign(paths(7), &SplitRatios::new(0.5, 0.25, 0.25), &mut rng);
        assert_eq!((seven.train.len(), seven.val.len(), seven.test.len()), (5, 1, 1));

        let none = SplitAssignment::assign(paths(4), &SplitRatios::new(0.0, 0.0, 0.0), &mut rng);
        assert_eq!(none.train.len(), 4);
    }

    #[test]
    fn test_assignment_reproducible_for_seed() {
        let ratios = SplitRatios::new(0.6, 0.2, 0.2);
        let a = SplitAssignment::assign(paths(25), &ratios, &mut ChaCha8Rng::seed_from_u64(11));
        let b = SplitAssignment::assign(paths(25), &ratios, &mut ChaCha8Rng::seed_from_u64(11));
        let c = SplitAssignment::assign(paths(25), &ratios, &mut ChaCha8Rng::seed_from_u64(12));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_ten_images_split_eight_one_one() {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("raw");
        let dest = temp_dir.path().join("out");
        create_class(&source.join("A"), 10);

        let reporter = RecordingReporter::new();
        let ratios = SplitRatios::new(0.8, 0.1, 0.1);
        let partitioner = DatasetPartitioner::new(config(&source, &dest, ratios));
        let outcome = partitioner.run(&reporter, &CancellationToken::new()).unwrap();

        let manifest = outcome.manifest().unwrap();
        assert_eq!((manifest.train_count, manifest.val_count, manifest.test_count), (8, 1, 1));
        assert_eq!(files_in(&dest.join("train/A")).len(), 8);
        assert_eq!(files_in(&dest.join("val/A")).len(), 1);
        assert_eq!(files_in(&dest.join("test/A")).len(), 1);

        let messages = reporter.messages();
        assert_eq!(messages.first().map(String::as_str), Some("Starting dataset processing..."));
        assert!(messages.contains(&"Found class: A with 10 images.".to_string()));
        assert!(messages.contains(&"Copying 8 training images for class A...".to_string()));
        assert!(messages.contains(&"Copying 1 validation images for class A...".to_string()));
        assert!(messages.contains(&"Copying 1 test images for class A...".to_string()));
        assert_eq!(messages.last().map(String::as_str), Some("Dataset processing complete."));

        let saved = DatasetManifest::load(&dest.join(MANIFEST_FILE)).unwrap();
        assert_eq!(saved.seed, 42);
        assert_eq!(saved.class("A").unwrap().train.len(), 8);
    }

    #[test]
    fn test_no_image_in_two_splits() {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("raw");
        let dest = temp_dir.path().join("out");
        create_class(&source.join("rose"), 13);
        create_class(&source.join("tulip"), 6);
        create_class(&source.join("lily"), 1);

        let ratios = SplitRatios::new(0.6, 0.2, 0.2);
        let partitioner = DatasetPartitioner::new(config(&source, &dest, ratios));
        let outcome = partitioner
            .run(&RecordingReporter::new(), &CancellationToken::new())
            .unwrap();
        let manifest = outcome.manifest().unwrap();
        assert_eq!(manifest.total(), 20);

        for class in ["rose", "tulip", "lily"] {
            let mut seen = HashSet::new();
            for split in Split::ALL {
                for name in files_in(&dest.join(split.dir_name()).join(class)) {
                    assert!(seen.insert(name), "file present in two splits");
                }
            }
        }

        // single-image class lands in train only
        assert_eq!(files_in(&dest.join("train/lily")).len(), 1);
        assert!(!dest.join("val/lily").exists());
        assert!(!dest.join("test/lily").exists());
    }

    #[test]
    fn test_same_seed_same_membership() {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("raw");
        create_class(&source.join("fern"), 12);
        create_class(&source.join("moss"), 9);

        let run = |dest: &Path| {
            let ratios = SplitRatios::new(0.5, 0.3, 0.2);
            let partitioner = DatasetPartitioner::new(config(&source, dest, ratios));
            let outcome = partitioner
                .run(&RecordingReporter::new(), &CancellationToken::new())
                .unwrap();
            outcome.manifest().unwrap().classes.clone()
        };

        let first = run(&temp_dir.path().join("out1"));
        let second = run(&temp_dir.path().join("out2"));
        assert_eq!(
            first.iter().map(|c| (&c.train, &c.val, &c.test)).collect::<Vec<_>>(),
            second.iter().map(|c| (&c.train, &c.val, &c.test)).collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_duplicate_class_only_first_copied() {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("raw");
        let dest = temp_dir.path().join("out");
        create_class(&source.join("north/A"), 4);
        for i in 0..3 {
            create_test_image(&source.join(format!("south/A/other_{i}.png")));
        }

        let reporter = RecordingReporter::new();
        let ratios = SplitRatios::new(1.0, 0.0, 0.0);
        let partitioner = DatasetPartitioner::new(config(&source, &dest, ratios));
        let outcome = partitioner.run(&reporter, &CancellationToken::new()).unwrap();

        assert!(reporter.contains("Class name 'A' is duplicated"));
        let copied = files_in(&dest.join("train/A"));
        assert_eq!(copied.len(), 4);
        assert!(copied.iter().all(|name| !name.starts_with("other_")));
        assert_eq!(outcome.manifest().unwrap().duplicates, vec![source.join("south/A")]);
    }

    #[test]
    fn test_non_empty_destination_aborts() {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("raw");
        let dest = temp_dir.path().join("out");
        create_class(&source.join("A"), 5);
        create_test_image(&dest.join("train/old/stale.jpg"));

        let reporter = RecordingReporter::new();
        let partitioner = DatasetPartitioner::new(config(&source, &dest, SplitRatios::default()));
        let err = partitioner.run(&reporter, &CancellationToken::new()).unwrap_err();

        assert!(matches!(err, Error::DestinationNotEmpty(_)));
        assert_eq!(err.kind(), ErrorKind::Input);
        assert!(reporter.contains("Destination not empty"));
        assert!(!dest.join("val").exists());
        assert!(!dest.join("train/A").exists());
        assert!(!dest.join(MANIFEST_FILE).exists());
    }

    #[test]
    fn test_clear_destination_replaces_stale_split() {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("raw");
        let dest = temp_dir.path().join("out");
        create_class(&source.join("A"), 5);
        create_test_image(&dest.join("train/old/stale.jpg"));

        let mut cfg = config(&source, &dest, SplitRatios::new(0.8, 0.2, 0.0));
        cfg.clear_destination = true;
        DatasetPartitioner::new(cfg)
            .run(&RecordingReporter::new(), &CancellationToken::new())
            .unwrap();

        assert!(!dest.join("train/old").exists());
        assert_eq!(files_in(&dest.join("train/A")).len(), 4);
        assert!(!dest.join("test").exists());
    }

    #[test]
    fn test_clear_destination_keeps_stale_split_when_no_classes() {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("raw");
        let dest = temp_dir.path().join("out");
        fs::create_dir_all(source.join("empty")).unwrap();
        create_test_image(&dest.join("train/old/stale.jpg"));

        let mut cfg = config(&source, &dest, SplitRatios::default());
        cfg.clear_destination = true;
        let err = DatasetPartitioner::new(cfg)
            .run(&RecordingReporter::new(), &CancellationToken::new())
            .unwrap_err();

        assert!(matches!(err, Error::NoClasses(_)));
        assert!(dest.join("train/old/stale.jpg").is_file());
    }

    #[test]
    fn test_no_classes_fails_before_writing() {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("raw");
        let dest = temp_dir.path().join("out");
        fs::create_dir_all(source.join("empty")).unwrap();

        let reporter = RecordingReporter::new();
        let err = DatasetPartitioner::new(config(&source, &dest, SplitRatios::default()))
            .run(&reporter, &CancellationToken::new())
            .unwrap_err();

        assert!(matches!(err, Error::NoClasses(_)));
        assert!(reporter.contains("No subdirectories with image files found."));
        assert!(!dest.join("train").exists());
    }

    #[test]
    fn test_invalid_ratios_rejected_first() {
        let temp_dir = TempDir::new().unwrap();
        let err = DatasetPartitioner::new(config(
            &temp_dir.path().join("missing"),
            &temp_dir.path().join("out"),
            SplitRatios::new(0.9, 0.2, 0.0),
        ))
        .run(&RecordingReporter::new(), &CancellationToken::new())
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn test_resize_writes_exact_resolution() {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("raw");
        let dest = temp_dir.path().join("out");
        create_class(&source.join("A"), 4);

        let mut cfg = config(&source, &dest, SplitRatios::new(0.5, 0.5, 0.0));
        cfg.resolution = Some(24);
        cfg.color_mode = ColorMode::L;
        DatasetPartitioner::new(cfg)
            .run(&RecordingReporter::new(), &CancellationToken::new())
            .unwrap();

        for split in ["train", "val"] {
            for name in files_in(&dest.join(split).join("A")) {
                let img = image::open(dest.join(split).join("A").join(name)).unwrap();
                assert_eq!((img.width(), img.height()), (24, 24));
                assert!(matches!(img, DynamicImage::ImageLuma8(_)));
            }
        }
    }

    #[test]
    fn test_cancelled_before_start_returns_cleanly() {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("raw");
        let dest = temp_dir.path().join("out");
        create_class(&source.join("A"), 3);

        let token = CancellationToken::new();
        token.cancel();
        let reporter = RecordingReporter::new();
        let outcome = DatasetPartitioner::new(config(&source, &dest, SplitRatios::default()))
            .run(&reporter, &token)
            .unwrap();

        assert!(outcome.is_cancelled());
        assert_eq!(reporter.messages().last().map(String::as_str), Some("Processing cancelled."));
        assert!(files_in(&dest.join("train/A")).is_empty());
        assert!(!dest.join(MANIFEST_FILE).exists());
    }

    #[test]
    fn test_cancel_mid_run_leaves_valid_files() {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("raw");
        let dest = temp_dir.path().join("out");
        create_class(&source.join("A"), 6);
        create_class(&source.join("B"), 6);

        let token = CancellationToken::new();
        let trigger = token.clone();
        let copies = AtomicUsize::new(0);
        // cancel once the first class has started copying
        let reporter = |message: &str| {
            if message.starts_with("Copying") && copies.fetch_add(1, Ordering::SeqCst) == 0 {
                trigger.cancel();
            }
        };

        let ratios = SplitRatios::new(1.0, 0.0, 0.0);
        let outcome = DatasetPartitioner::new(config(&source, &dest, ratios))
            .run(&reporter, &token)
            .unwrap();

        assert!(outcome.is_cancelled());
        assert!(!dest.join("train/B").exists());
        for name in files_in(&dest.join("train/A")) {
            assert!(image::open(dest.join("train/A").join(name)).is_ok());
        }
    }
}
