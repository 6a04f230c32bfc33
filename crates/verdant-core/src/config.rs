//! Configuration structures for partitioning and fine-tuning runs.
//!
//! Every field has a default, so a TOML file only needs to name what it
//! changes. `validate()` performs all range checks up front; nothing reads
//! the filesystem before it passes.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{Error, Result};
use crate::types::{ColorMode, EarlyStoppingMetric, LossKind, ModelName, OptimizerKind};

/// Image extensions recognized when nothing else is configured
pub const DEFAULT_IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

/// ImageNet channel means
pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];

/// ImageNet channel standard deviations
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

fn default_extensions() -> Vec<String> {
    DEFAULT_IMAGE_EXTENSIONS.iter().map(|e| e.to_string()).collect()
}

fn validate_extensions(extensions: &[String]) -> Result<()> {
    if extensions.iter().all(|e| e.trim_start_matches('.').is_empty()) {
        return Err(Error::Configuration(
            "at least one image extension must be configured".to_string(),
        ));
    }
    Ok(())
}

/// Train/validation/test split ratios
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SplitRatios {
    pub train: f64,
    pub val: f64,
    pub test: f64,
}

impl Default for SplitRatios {
    fn default() -> Self {
        Self {
            train: 0.8,
            val: 0.1,
            test: 0.1,
        }
    }
}

impl SplitRatios {
    pub fn new(train: f64, val: f64, test: f64) -> Self {
        Self { train, val, test }
    }

    /// Each ratio must lie in [0, 1] and together they may not exceed 1.0.
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [("train", self.train), ("val", self.val), ("test", self.test)] {
            if !(0.0..=1.0).contains(&value) {
                return Err(Error::Configuration(format!(
                    "{name} ratio must be within [0, 1], got {value}"
                )));
            }
        }

        let sum = self.train + self.val + self.test;
        if sum > 1.0 + 1e-9 {
            return Err(Error::Configuration(format!(
                "split ratios must sum to at most 1.0, got {sum}"
            )));
        }
        Ok(())
    }
}

/// Settings for one partitioning run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PartitionConfig {
    /// Raw tree to scan for class directories
    pub source: PathBuf,
    /// Root receiving train/val/test folders
    pub destination: PathBuf,
    pub ratios: SplitRatios,
    /// Square edge length for re-encoded images; `None` copies bytes unchanged
    pub resolution: Option<u32>,
    /// Shuffle seed; `None` draws one from OS entropy
    pub seed: Option<u64>,
    /// Recognized extensions, compared case-insensitively
    pub extensions: Vec<String>,
    pub color_mode: ColorMode,
    /// Remove existing split folders instead of refusing to run
    pub clear_destination: bool,
}

impl Default for PartitionConfig {
    fn default() -> Self {
        Self {
            source: PathBuf::from("data/raw"),
            destination: PathBuf::from("data/processed"),
            ratios: SplitRatios::default(),
            resolution: None,
            seed: None,
            extensions: default_extensions(),
            color_mode: ColorMode::Rgb,
            clear_destination: false,
        }
    }
}

impl PartitionConfig {
    pub fn new(source: impl Into<PathBuf>, destination: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.ratios.validate()?;
        if self.resolution == Some(0) {
            return Err(Error::Configuration(
                "resolution must be a positive number of pixels".to_string(),
            ));
        }
        validate_extensions(&self.extensions)
    }
}

/// Main configuration for a fine-tuning run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub model: ModelConfig,
    pub optimizer: OptimizerConfig,
    pub loss: LossConfig,
    pub training: TrainingParams,
    pub data: DataConfig,
    pub augmentation: AugmentationConfig,
    pub early_stopping: EarlyStoppingConfig,
    pub checkpoint: CheckpointConfig,
    pub device: DeviceConfig,
    /// Seed for shuffling and augmentation; `None` draws one per run
    pub seed: Option<u64>,
}

impl TrainingConfig {
    pub fn validate(&self) -> Result<()> {
        self.model.validate()?;
        self.optimizer.validate()?;
        self.loss.validate()?;
        self.training.validate()?;
        self.data.validate()?;
        self.augmentation.validate()?;
        self.early_stopping.validate()?;

        let min_size = self.model.name.min_input_size();
        if self.data.input_size < min_size {
            return Err(Error::Configuration(format!(
                "input_size {} is too small for {} (minimum {})",
                self.data.input_size, self.model.name, min_size
            )));
        }
        Ok(())
    }
}

/// Model configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Registry key
    pub name: ModelName,
    /// Dropout applied before the classifier head
    pub dropout: f64,
    /// Ignore `checkpoint.load_path` and start from fresh weights
    pub train_from_scratch: bool,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            name: ModelName::ResNet18,
            dropout: 0.0,
            train_from_scratch: false,
        }
    }
}

impl ModelConfig {
    fn validate(&self) -> Result<()> {
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(Error::Configuration(format!(
                "dropout must be within [0, 1), got {}",
                self.dropout
            )));
        }
        Ok(())
    }
}

/// Optimizer hyperparameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    pub kind: OptimizerKind,
    pub learning_rate: f64,
    /// `None` means 0.01 for AdamW and no decay otherwise
    pub weight_decay: Option<f32>,
    /// SGD momentum; 0 disables it
    pub momentum: f64,
    pub beta_1: f32,
    pub beta_2: f32,
    pub epsilon: f32,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            kind: OptimizerKind::AdamW,
            learning_rate: 0.001,
            weight_decay: None,
            momentum: 0.0,
            beta_1: 0.9,
            beta_2: 0.999,
            epsilon: 1e-8,
        }
    }
}

impl OptimizerConfig {
    fn validate(&self) -> Result<()> {
        if !(self.learning_rate > 0.0) {
            return Err(Error::Configuration(format!(
                "learning_rate must be positive, got {}",
                self.learning_rate
            )));
        }
        if matches!(self.weight_decay, Some(wd) if wd < 0.0) {
            return Err(Error::Configuration("weight_decay cannot be negative".to_string()));
        }
        if !(0.0..1.0).contains(&self.momentum) {
            return Err(Error::Configuration(format!(
                "momentum must be within [0, 1), got {}",
                self.momentum
            )));
        }
        for (name, beta) in [("beta_1", self.beta_1), ("beta_2", self.beta_2)] {
            if !(0.0..1.0).contains(&beta) {
                return Err(Error::Configuration(format!(
                    "{name} must be within [0, 1), got {beta}"
                )));
            }
        }
        if !(self.epsilon > 0.0) {
            return Err(Error::Configuration("epsilon must be positive".to_string()));
        }
        Ok(())
    }
}

/// Loss function selection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LossConfig {
    pub kind: LossKind,
    /// Only used by `label_smoothing`
    pub smoothing: f32,
}

impl Default for LossConfig {
    fn default() -> Self {
        Self {
            kind: LossKind::CrossEntropy,
            smoothing: 0.1,
        }
    }
}

impl LossConfig {
    fn validate(&self) -> Result<()> {
        if self.kind == LossKind::LabelSmoothing && !(0.0..1.0).contains(&self.smoothing) {
            return Err(Error::Configuration(format!(
                "smoothing must be within [0, 1), got {}",
                self.smoothing
            )));
        }
        Ok(())
    }
}

/// Epoch and batch counts
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingParams {
    pub num_epochs: usize,
    pub batch_size: usize,
    /// Run the held-out test split after the last epoch when it exists
    pub evaluate_test: bool,
}

impl Default for TrainingParams {
    fn default() -> Self {
        Self {
            num_epochs: 25,
            batch_size: 32,
            evaluate_test: true,
        }
    }
}

impl TrainingParams {
    fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(Error::Configuration("batch_size must be positive".to_string()));
        }
        Ok(())
    }
}

/// Where the partitioned data lives and how it is fed to the model
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    /// Root holding train/val/(test) folders
    pub data_dir: PathBuf,
    /// Square input edge fed to the model
    pub input_size: u32,
    /// Shorter-side resize before center cropping; derived when `None`
    pub resize_size: Option<u32>,
    /// Threads decoding a batch; 0 or 1 decodes on the calling thread
    pub num_workers: usize,
    /// Accepted for compatibility; burn manages host memory itself
    pub pin_memory: bool,
    pub extensions: Vec<String>,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data/processed"),
            input_size: 224,
            resize_size: None,
            num_workers: 0,
            pin_memory: false,
            extensions: default_extensions(),
        }
    }
}

impl DataConfig {
    /// Resize edge used before center cropping, `input_size / 224 * 256` by default.
    pub fn effective_resize_size(&self) -> u32 {
        self.resize_size
            .unwrap_or_else(|| (self.input_size as f64 / 224.0 * 256.0) as u32)
    }

    fn validate(&self) -> Result<()> {
        if self.input_size == 0 {
            return Err(Error::Configuration("input_size must be positive".to_string()));
        }
        if self.effective_resize_size() < self.input_size {
            return Err(Error::Configuration(format!(
                "resize_size ({}) cannot be smaller than input_size ({})",
                self.effective_resize_size(),
                self.input_size
            )));
        }
        validate_extensions(&self.extensions)
    }
}

/// Train-time augmentation toggles and parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AugmentationConfig {
    /// Random resized crop instead of resize + center crop
    pub random_resized_crop: bool,
    /// Area fraction range for the random crop
    pub crop_scale: (f32, f32),
    /// Aspect ratio range for the random crop
    pub crop_ratio: (f32, f32),
    pub horizontal_flip: bool,
    pub rotation: bool,
    pub rotation_degrees: f32,
    pub color_jitter: bool,
    pub brightness: f32,
    pub contrast: f32,
    pub saturation: f32,
    pub hue: f32,
    /// Per-channel mean; ImageNet statistics when `None`
    pub mean: Option<[f32; 3]>,
    /// Per-channel std; ImageNet statistics when `None`
    pub std: Option<[f32; 3]>,
}

impl Default for AugmentationConfig {
    fn default() -> Self {
        Self {
            random_resized_crop: true,
            crop_scale: (0.08, 1.0),
            crop_ratio: (3.0 / 4.0, 4.0 / 3.0),
            horizontal_flip: true,
            rotation: true,
            rotation_degrees: 15.0,
            color_jitter: true,
            brightness: 0.2,
            contrast: 0.2,
            saturation: 0.0,
            hue: 0.0,
            mean: None,
            std: None,
        }
    }
}

impl AugmentationConfig {
    /// Resolved normalization statistics as `(mean, std)`
    pub fn normalization(&self) -> ([f32; 3], [f32; 3]) {
        (
            self.mean.unwrap_or(IMAGENET_MEAN),
            self.std.unwrap_or(IMAGENET_STD),
        )
    }

    fn validate(&self) -> Result<()> {
        let (lo, hi) = self.crop_scale;
        if !(lo > 0.0 && lo <= hi && hi <= 1.0) {
            return Err(Error::Configuration(format!(
                "crop_scale must satisfy 0 < min <= max <= 1, got ({lo}, {hi})"
            )));
        }
        let (lo, hi) = self.crop_ratio;
        if !(lo > 0.0 && lo <= hi) {
            return Err(Error::Configuration(format!(
                "crop_ratio must satisfy 0 < min <= max, got ({lo}, {hi})"
            )));
        }
        if self.rotation_degrees < 0.0 {
            return Err(Error::Configuration("rotation_degrees cannot be negative".to_string()));
        }
        for (name, value) in [
            ("brightness", self.brightness),
            ("contrast", self.contrast),
            ("saturation", self.saturation),
        ] {
            if value < 0.0 {
                return Err(Error::Configuration(format!("{name} cannot be negative")));
            }
        }
        if !(0.0..=0.5).contains(&self.hue) {
            return Err(Error::Configuration(format!(
                "hue must be within [0, 0.5], got {}",
                self.hue
            )));
        }
        let (_, std) = self.normalization();
        if std.iter().any(|s| *s <= 0.0) {
            return Err(Error::Configuration("normalization std must be positive".to_string()));
        }
        Ok(())
    }
}

/// Early stopping on a validation metric
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EarlyStoppingConfig {
    /// Consecutive non-improving epochs tolerated; 0 disables early stopping
    pub patience: usize,
    pub min_delta: f64,
    pub metric: EarlyStoppingMetric,
}

impl Default for EarlyStoppingConfig {
    fn default() -> Self {
        Self {
            patience: 0,
            min_delta: 0.0,
            metric: EarlyStoppingMetric::Loss,
        }
    }
}

impl EarlyStoppingConfig {
    pub fn enabled(&self) -> bool {
        self.patience > 0
    }

    fn validate(&self) -> Result<()> {
        if self.min_delta < 0.0 {
            return Err(Error::Configuration("min_delta cannot be negative".to_string()));
        }
        Ok(())
    }
}

/// Checkpoint locations and load policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckpointConfig {
    /// Weights to start from
    pub load_path: Option<PathBuf>,
    /// Where to write the trained weights on normal completion
    pub save_path: Option<PathBuf>,
    /// Reject mismatched checkpoints instead of dropping the mismatched parts
    pub strict: bool,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            load_path: None,
            save_path: None,
            strict: true,
        }
    }
}

/// Device and precision preferences
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Honoured only when an accelerator is present
    pub mixed_precision: bool,
}
