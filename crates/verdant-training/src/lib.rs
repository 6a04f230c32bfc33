//! Model registry, checkpoints and the fine-tuning orchestrator.
//!
//! The compute backend is chosen at compile time (see [`backend`]); every
//! public entry point is generic over it so tests can run on `NdArray`.

pub mod backend;
pub mod checkpoint;
pub mod early_stopping;
pub mod model;
pub mod orchestrator;

pub use backend::{
    accelerator_available, backend_name, default_device, DefaultBackend, TrainingBackend,
};
pub use checkpoint::{
    load_checkpoint, metadata_path, record_path, save_checkpoint, CheckpointMetadata, LoadOutcome,
};
pub use early_stopping::EarlyStopping;
pub use model::{Backbone, Classifier};
pub use orchestrator::{
    EpochMetrics, OrchestratorState, PhaseMetrics, TrainingHistory, TrainingOrchestrator,
    TrainingOutcome,
};
