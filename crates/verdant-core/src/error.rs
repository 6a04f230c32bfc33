//! Error types for the verdant engine.

use std::path::PathBuf;

use thiserror::Error;

/// Main error type shared by the partitioner and the training orchestrator.
#[derive(Error, Debug)]
pub enum Error {
    /// Unsupported name, out-of-range ratio or other invalid setting
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Missing or unusable input data
    #[error("Input error: {0}")]
    Input(String),

    /// Discovery found no directory holding image files
    #[error("No subdirectories with image files found under {}", .0.display())]
    NoClasses(PathBuf),

    /// A destination split folder already holds entries
    #[error("Destination not empty: {} already contains entries", .0.display())]
    DestinationNotEmpty(PathBuf),

    /// IO error occurred
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Image decode/encode error
    #[error("Image processing error: {0}")]
    Image(String),

    /// Checkpoint could not be read, written or matched against the model
    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    /// Failure inside the training loop
    #[error("Training error: {0}")]
    Training(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Coarse classification of an [`Error`], used by callers to decide how to
/// present a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Rejected before any I/O or compute
    Configuration,
    /// Rejected before any destination mutation
    Input,
    /// Raised while work was in progress
    Runtime,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Configuration(_) => ErrorKind::Configuration,
            Error::Input(_) | Error::NoClasses(_) | Error::DestinationNotEmpty(_) => {
                ErrorKind::Input
            }
            Error::Io(_)
            | Error::Image(_)
            | Error::Checkpoint(_)
            | Error::Training(_)
            | Error::Serialization(_) => ErrorKind::Runtime,
        }
    }

    pub(crate) fn unsupported(what: &str, value: &str, expected: &[&str]) -> Self {
        Error::Configuration(format!(
            "Unsupported {what}: '{value}' (expected one of: {})",
            expected.join(", ")
        ))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<image::ImageError> for Error {
    fn from(err: image::ImageError) -> Self {
        Error::Image(err.to_string())
    }
}

/// Specialized Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
