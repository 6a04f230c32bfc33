//! Image dataset handling for the verdant engine.
//!
//! - [`discovery`]: find class directories in an arbitrarily nested tree
//! - [`partition`]: stratified train/val/test split onto disk
//! - [`augmentation`]: train and eval image pipelines
//! - [`folder`] and [`batcher`]: split folders as burn datasets and batches

pub mod augmentation;
pub mod batcher;
pub mod discovery;
pub mod folder;
pub mod partition;

#[cfg(test)]
mod test_util;

pub use augmentation::{AugmentationPipeline, Normalization, Transform};
pub use batcher::{ImageBatch, ImageBatcher, ImageItem, ItemLoader};
pub use discovery::{discover_classes, ClassDirectory, Discovery};
pub use folder::{ImageFolder, ImageSample};
pub use partition::{
    ClassManifest, DatasetManifest, DatasetPartitioner, PartitionOutcome, SplitAssignment,
    SplitCounts, MANIFEST_FILE,
};
