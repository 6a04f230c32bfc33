//! Checkpoint saving and loading.
//!
//! A checkpoint is the burn record written with `CompactRecorder`
//! (`<path>.mpk`) plus a JSON sidecar (`<path>.json`) describing the
//! architecture, class mapping and final metrics. The sidecar is what lets a
//! load detect architecture mismatches before touching the record.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use burn::module::Module;
use burn::record::{CompactRecorder, Recorder};
use burn::tensor::backend::Backend;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use verdant_core::{Error, ModelName, Result, RunStatus};

use crate::model::{Classifier, ClassifierRecord};

/// Sidecar describing a saved model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointMetadata {
    pub model_name: ModelName,
    pub num_classes: usize,
    pub class_to_index: BTreeMap<String, usize>,
    pub input_size: u32,
    pub epochs_completed: usize,
    pub status: RunStatus,
    pub val_accuracy: f64,
    pub test_accuracy: Option<f64>,
    pub timestamp: String,
}

impl CheckpointMetadata {
    pub fn new(
        model_name: ModelName,
        class_to_index: BTreeMap<String, usize>,
        input_size: u32,
    ) -> Self {
        Self {
            model_name,
            num_classes: class_to_index.len(),
            class_to_index,
            input_size,
            epochs_completed: 0,
            status: RunStatus::Completed,
            val_accuracy: 0.0,
            test_accuracy: None,
            timestamp: Utc::now().to_rfc3339(),
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).map_err(|e| {
            Error::Serialization(format!("Failed to serialize checkpoint metadata: {e}"))
        })?;
        fs::write(path, json)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let json = fs::read_to_string(path)?;
        serde_json::from_str(&json).map_err(|e| {
            Error::Serialization(format!(
                "Failed to read checkpoint metadata {}: {e}",
                path.display()
            ))
        })
    }
}

/// Path of the burn record for a checkpoint base path
pub fn record_path(path: &Path) -> PathBuf {
    path.with_extension("mpk")
}

/// Path of the JSON sidecar for a checkpoint base path
pub fn metadata_path(path: &Path) -> PathBuf {
    path.with_extension("json")
}

/// What a tolerant or strict load ended up applying
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// Every weight came from the checkpoint
    Full,
    /// Backbone from the checkpoint, freshly initialized head
    BackboneOnly,
    /// Nothing applied; the model keeps its fresh weights
    Skipped,
}

/// Write `model` and its sidecar next to `path`.
pub fn save_checkpoint<B: Backend>(
    model: &Classifier<B>,
    metadata: &CheckpointMetadata,
    path: &Path,
) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    model
        .clone()
        .save_file(record_path(path), &CompactRecorder::new())
        .map_err(|e| {
            Error::Checkpoint(format!("Failed to save model to {}: {e:?}", path.display()))
        })?;
    metadata.save(&metadata_path(path))?;

    info!("Checkpoint saved to {:?}", record_path(path));
    Ok(())
}

/// Load the checkpoint at `path` into `model`.
///
/// Strict mode fails on a missing sidecar, a different architecture or a head
/// of a different size. Tolerant mode keeps the fresh head on a head mismatch
/// and skips the checkpoint entirely on anything else.
pub fn load_checkpoint<B: Backend>(
    model: Classifier<B>,
    path: &Path,
    strict: bool,
    device: &B::Device,
) -> Result<(Classifier<B>, LoadOutcome)> {
    let record_file = record_path(path);
    if !record_file.is_file() {
        return Err(Error::Checkpoint(format!(
            "Checkpoint not found: {}",
            record_file.display()
        )));
    }

    let expected = model.model_name();
    let sidecar = metadata_path(path);
    let reject = |message: String| -> Result<(Classifier<B>, LoadOutcome)> {
        Err(Error::Checkpoint(message))
    };

    if !sidecar.is_file() {
        let message = format!("Checkpoint metadata not found: {}", sidecar.display());
        if strict {
            return reject(message);
        }
        warn!("{message}; keeping freshly initialized weights");
        return Ok((model, LoadOutcome::Skipped));
    }

    let metadata = CheckpointMetadata::load(&sidecar)?;
    if metadata.model_name != expected {
        let message = format!(
            "Checkpoint architecture '{}' does not match model '{}'",
            metadata.model_name, expected
        );
        if strict {
            return reject(message);
        }
        warn!("{message}; keeping freshly initialized weights");
        return Ok((model, LoadOutcome::Skipped));
    }

    let record: ClassifierRecord<B> = CompactRecorder::new()
        .load(record_file.clone(), device)
        .map_err(|e| {
            Error::Checkpoint(format!("Failed to load {}: {e:?}", record_file.display()))
        })?;

    let checkpoint_classes = record.head.weight.val().dims()[1];
    if checkpoint_classes != model.num_classes() {
        let message = format!(
            "Checkpoint head has {} classes, model expects {}",
            checkpoint_classes,
            model.num_classes()
        );
        if strict {
            return reject(message);
        }
        warn!("{message}; loading backbone only");
        return Ok((model.load_backbone(record), LoadOutcome::BackboneOnly));
    }

    info!("Loaded checkpoint {:?}", record_file);
    Ok((model.load_record(record), LoadOutcome::Full))
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::tensor::Tensor;
    use burn_ndarray::NdArray;
    use tempfile::TempDir;

    type TestBackend = NdArray<f32>;

    fn classes(n: usize) -> BTreeMap<String, usize> {
        (0..n).map(|i| (format!("class_{i}"), i)).collect()
    }

    fn saved_plant_cnn(dir: &TempDir, num_classes: usize) -> (PathBuf, Classifier<TestBackend>) {
        let device = Default::default();
        let model =
            Classifier::<TestBackend>::build(ModelName::PlantCnn, num_classes, 0.0, &device);
        let path = dir.path().join("ckpt/model");
        let metadata = CheckpointMetadata::new(ModelName::PlantCnn, classes(num_classes), 32);
        save_checkpoint(&model, &metadata, &path).unwrap();
        (path, model)
    }

    fn logits(model: &Classifier<TestBackend>) -> Vec<f32> {
        let input = Tensor::<TestBackend, 4>::ones([1, 3, 16, 16], &Default::default());
        model.forward(input).into_data().to_vec().unwrap()
    }

    #[test]
    fn test_save_writes_record_and_sidecar() {
        let dir = TempDir::new().unwrap();
        let (path, _) = saved_plant_cnn(&dir, 3);

        assert!(record_path(&path).is_file());
        let metadata = CheckpointMetadata::load(&metadata_path(&path)).unwrap();
        assert_eq!(metadata.model_name, ModelName::PlantCnn);
        assert_eq!(metadata.num_classes, 3);
        assert_eq!(metadata.class_to_index["class_2"], 2);
    }

    #[test]
    fn test_strict_round_trip_restores_weights() {
        let dir = TempDir::new().unwrap();
        let (path, original) = saved_plant_cnn(&dir, 3);

        let device = Default::default();
        let fresh = Classifier::<TestBackend>::build(ModelName::PlantCnn, 3, 0.0, &device);
        let (loaded, outcome) = load_checkpoint(fresh, &path, true, &device).unwrap();

        assert_eq!(outcome, LoadOutcome::Full);
        let (a, b) = (logits(&original), logits(&loaded));
        for (x, y) in a.iter().zip(b.iter()) {
            assert!((x - y).abs() < 1e-2);
        }
    }

    #[test]
    fn test_strict_rejects_head_mismatch() {
        let dir = TempDir::new().unwrap();
        let (path, _) = saved_plant_cnn(&dir, 3);

        let device = Default::default();
        let fresh = Classifier::<TestBackend>::build(ModelName::PlantCnn, 5, 0.0, &device);
        let err = load_checkpoint(fresh, &path, true, &device).unwrap_err();

        assert!(matches!(err, Error::Checkpoint(_)));
        assert_eq!(err.kind(), verdant_core::ErrorKind::Runtime);
    }

    #[test]
    fn test_tolerant_keeps_fresh_head() {
        let dir = TempDir::new().unwrap();
        let (path, _) = saved_plant_cnn(&dir, 3);

        let device = Default::default();
        let fresh = Classifier::<TestBackend>::build(ModelName::PlantCnn, 5, 0.0, &device);
        let (loaded, outcome) = load_checkpoint(fresh, &path, false, &device).unwrap();

        assert_eq!(outcome, LoadOutcome::BackboneOnly);
        assert_eq!(loaded.num_classes(), 5);
    }

    #[test]
    fn test_architecture_mismatch() {
        let dir = TempDir::new().unwrap();
        let (path, _) = saved_plant_cnn(&dir, 3);
        let device = Default::default();

        let other = Classifier::<TestBackend>::build(ModelName::EfficientNetB0, 3, 0.0, &device);
        let err = load_checkpoint(other, &path, true, &device).unwrap_err();
        assert!(err.to_string().contains("architecture"));

        let other = Classifier::<TestBackend>::build(ModelName::EfficientNetB0, 3, 0.0, &device);
        let (_, outcome) = load_checkpoint(other, &path, false, &device).unwrap();
        assert_eq!(outcome, LoadOutcome::Skipped);
    }

    #[test]
    fn test_missing_checkpoint_is_error() {
        let dir = TempDir::new().unwrap();
        let device = Default::default();
        let model = Classifier::<TestBackend>::build(ModelName::PlantCnn, 2, 0.0, &device);

        let err = load_checkpoint(model, &dir.path().join("absent"), false, &device).unwrap_err();
        assert!(matches!(err, Error::Checkpoint(_)));
    }
}
