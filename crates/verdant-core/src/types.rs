//! Closed selection enums for the engine.
//!
//! Every string-keyed choice the configuration surface exposes (model,
//! optimizer, loss, early-stopping metric, color mode) is a closed enum. The
//! textual names are only accepted at the parsing boundary, so an unsupported
//! value is rejected as a configuration error before any data is touched.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::{Error, Result};

/// Implements `Display`, `FromStr` and the serde string conversions for a
/// closed enum that provides `ALL` and `as_str`.
macro_rules! named_choice {
    ($ty:ty, $what:literal) => {
        impl std::fmt::Display for $ty {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self> {
                let wanted = s.trim();
                <$ty>::ALL
                    .iter()
                    .copied()
                    .find(|choice| choice.as_str().eq_ignore_ascii_case(wanted))
                    .ok_or_else(|| {
                        let names: Vec<&str> = <$ty>::ALL.iter().map(|c| c.as_str()).collect();
                        Error::unsupported($what, wanted, &names)
                    })
            }
        }

        impl TryFrom<String> for $ty {
            type Error = Error;

            fn try_from(value: String) -> Result<Self> {
                value.parse()
            }
        }

        impl From<$ty> for String {
            fn from(value: $ty) -> Self {
                value.as_str().to_string()
            }
        }
    };
}

/// Model architectures known to the registry
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(try_from = "String", into = "String")]
pub enum ModelName {
    /// ResNet-18
    #[default]
    ResNet18,
    /// EfficientNet-B0 style inverted-residual network
    EfficientNetB0,
    /// Small four-block CNN, quick to train on CPU
    PlantCnn,
}

impl ModelName {
    pub const ALL: [ModelName; 3] = [
        ModelName::ResNet18,
        ModelName::EfficientNetB0,
        ModelName::PlantCnn,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ModelName::ResNet18 => "resnet18",
            ModelName::EfficientNetB0 => "efficientnet_b0",
            ModelName::PlantCnn => "plant_cnn",
        }
    }

    /// Smallest square input the architecture's downsampling can handle
    pub fn min_input_size(&self) -> u32 {
        match self {
            ModelName::ResNet18 | ModelName::EfficientNetB0 => 32,
            ModelName::PlantCnn => 16,
        }
    }
}

named_choice!(ModelName, "model");

/// Optimizer kind
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(try_from = "String", into = "String")]
pub enum OptimizerKind {
    /// Adam optimizer
    Adam,
    /// AdamW optimizer (decoupled weight decay)
    #[default]
    AdamW,
    /// SGD with optional momentum
    Sgd,
}

impl OptimizerKind {
    pub const ALL: [OptimizerKind; 3] = [
        OptimizerKind::Adam,
        OptimizerKind::AdamW,
        OptimizerKind::Sgd,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OptimizerKind::Adam => "adam",
            OptimizerKind::AdamW => "adamw",
            OptimizerKind::Sgd => "sgd",
        }
    }
}

named_choice!(OptimizerKind, "optimizer");

/// Loss function kind
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(try_from = "String", into = "String")]
pub enum LossKind {
    /// Plain cross entropy
    #[default]
    CrossEntropy,
    /// Cross entropy with label smoothing
    LabelSmoothing,
}

impl LossKind {
    pub const ALL: [LossKind; 2] = [LossKind::CrossEntropy, LossKind::LabelSmoothing];

    pub fn as_str(&self) -> &'static str {
        match self {
            LossKind::CrossEntropy => "cross_entropy",
            LossKind::LabelSmoothing => "label_smoothing",
        }
    }
}

named_choice!(LossKind, "loss");

/// Validation metric watched by early stopping
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(try_from = "String", into = "String")]
pub enum EarlyStoppingMetric {
    /// Lower validation loss is better
    #[default]
    Loss,
    /// Higher validation accuracy is better
    Accuracy,
}

impl EarlyStoppingMetric {
    pub const ALL: [EarlyStoppingMetric; 2] =
        [EarlyStoppingMetric::Loss, EarlyStoppingMetric::Accuracy];

    pub fn as_str(&self) -> &'static str {
        match self {
            EarlyStoppingMetric::Loss => "loss",
            EarlyStoppingMetric::Accuracy => "accuracy",
        }
    }
}

named_choice!(EarlyStoppingMetric, "early stopping metric");

/// Pixel format written by the partitioner when resizing
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(try_from = "String", into = "String")]
pub enum ColorMode {
    /// 8-bit RGB
    #[default]
    Rgb,
    /// 8-bit luminance
    L,
    /// 8-bit RGB with alpha
    Rgba,
}

impl ColorMode {
    pub const ALL: [ColorMode; 3] = [ColorMode::Rgb, ColorMode::L, ColorMode::Rgba];

    pub fn as_str(&self) -> &'static str {
        match self {
            ColorMode::Rgb => "RGB",
            ColorMode::L => "L",
            ColorMode::Rgba => "RGBA",
        }
    }
}

named_choice!(ColorMode, "color mode");

/// Dataset split written by the partitioner and read by the orchestrator
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Split {
    Train,
    Val,
    Test,
}

impl Split {
    pub const ALL: [Split; 3] = [Split::Train, Split::Val, Split::Test];

    /// Folder name under the destination root
    pub fn dir_name(&self) -> &'static str {
        match self {
            Split::Train => "train",
            Split::Val => "val",
            Split::Test => "test",
        }
    }

    /// Word used in progress messages
    pub fn label(&self) -> &'static str {
        match self {
            Split::Train => "training",
            Split::Val => "validation",
            Split::Test => "test",
        }
    }
}

impl std::fmt::Display for Split {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.dir_name())
    }
}

/// Arithmetic precision used for the forward/backward pass
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Precision {
    /// 32-bit floats everywhere
    Full,
    /// Half-precision floats on the accelerator
    Mixed,
}

impl Precision {
    /// Mixed precision needs both the request and an accelerator; anything
    /// else quietly runs at full precision.
    pub fn resolve(requested_mixed: bool, accelerator_present: bool) -> Self {
        if requested_mixed && accelerator_present {
            Precision::Mixed
        } else {
            Precision::Full
        }
    }
}

impl std::fmt::Display for Precision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Precision::Full => write!(f, "fp32"),
            Precision::Mixed => write!(f, "mixed (fp16)"),
        }
    }
}
