//! Fine-tuning run orchestration.
//!
//! A run validates its configuration, opens the partitioned image folders,
//! builds the classifier (optionally from a checkpoint) and then alternates
//! train and validation passes until the epoch budget, early stopping or the
//! cancellation token ends it. Progress goes to the caller's reporter; the
//! current phase is observable through [`TrainingOrchestrator::state`].

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Mutex;

use burn::data::dataloader::batcher::Batcher;
use burn::data::dataset::Dataset;
use burn::module::AutodiffModule;
use burn::nn::loss::{CrossEntropyLoss, CrossEntropyLossConfig};
use burn::optim::decay::WeightDecayConfig;
use burn::optim::momentum::MomentumConfig;
use burn::optim::{AdamConfig, AdamWConfig, GradientsParams, Optimizer, SgdConfig};
use burn::tensor::backend::{AutodiffBackend, Backend};
use burn::tensor::{ElementConversion, Int, Tensor};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use verdant_core::{
    CancellationToken, LossConfig, LossKind, OptimizerConfig, OptimizerKind, Precision,
    ProgressReporter, Result, RunStatus, Split, TrainingConfig,
};
use verdant_dataset::{AugmentationPipeline, ImageBatch, ImageBatcher, ImageFolder, ItemLoader};

use crate::backend;
use crate::checkpoint::{load_checkpoint, record_path, save_checkpoint, CheckpointMetadata};
use crate::early_stopping::EarlyStopping;
use crate::model::Classifier;

/// Decoupled weight decay used by AdamW when none is configured
pub const ADAMW_DEFAULT_WEIGHT_DECAY: f32 = 0.01;

fn adamw_weight_decay(opt: &OptimizerConfig) -> f32 {
    opt.weight_decay.unwrap_or(ADAMW_DEFAULT_WEIGHT_DECAY)
}

/// Lifecycle of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrchestratorState {
    Idle,
    Initializing,
    Training,
    Validating,
    Testing,
    Completed,
    EarlyStopped,
    Cancelled,
    Failed,
}

impl OrchestratorState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::EarlyStopped | Self::Cancelled | Self::Failed
        )
    }
}

impl From<RunStatus> for OrchestratorState {
    fn from(status: RunStatus) -> Self {
        match status {
            RunStatus::Completed => Self::Completed,
            RunStatus::EarlyStopped => Self::EarlyStopped,
            RunStatus::Cancelled => Self::Cancelled,
        }
    }
}

impl fmt::Display for OrchestratorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Initializing => "initializing",
            Self::Training => "training",
            Self::Validating => "validating",
            Self::Testing => "testing",
            Self::Completed => "completed",
            Self::EarlyStopped => "early stopped",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Sample-weighted loss and accuracy of one pass over a split
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PhaseMetrics {
    pub loss: f64,
    pub accuracy: f64,
    pub samples: usize,
}

impl PhaseMetrics {
    fn summary(&self, phase: Split) -> String {
        format!("{} Loss: {:.4} Acc: {:.4}", phase, self.loss, self.accuracy)
    }
}

#[derive(Debug, Default)]
struct RunningMetrics {
    loss_sum: f64,
    correct: usize,
    samples: usize,
}

impl RunningMetrics {
    fn add(&mut self, batch_len: usize, batch_loss: f64, correct: usize) {
        self.loss_sum += batch_loss * batch_len as f64;
        self.correct += correct;
        self.samples += batch_len;
    }

    fn finish(self) -> PhaseMetrics {
        if self.samples == 0 {
            return PhaseMetrics::default();
        }
        PhaseMetrics {
            loss: self.loss_sum / self.samples as f64,
            accuracy: self.correct as f64 / self.samples as f64,
            samples: self.samples,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpochMetrics {
    pub epoch: usize,
    pub train: PhaseMetrics,
    pub val: PhaseMetrics,
}

/// Per-epoch metrics in completion order
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrainingHistory {
    pub epochs: Vec<EpochMetrics>,
}

impl TrainingHistory {
    pub fn len(&self) -> usize {
        self.epochs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.epochs.is_empty()
    }

    pub fn last(&self) -> Option<&EpochMetrics> {
        self.epochs.last()
    }

    pub fn best_val_accuracy(&self) -> Option<f64> {
        self.epochs.iter().map(|e| e.val.accuracy).reduce(f64::max)
    }
}

/// Result of a run that did not fail
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingOutcome {
    pub status: RunStatus,
    /// Validation accuracy of the last completed epoch
    pub val_accuracy: f64,
    /// Present only when the test pass ran
    pub test_accuracy: Option<f64>,
    pub history: TrainingHistory,
    pub class_to_index: BTreeMap<String, usize>,
    pub seed: u64,
    pub precision: Precision,
    /// Record written on completion, if any
    pub checkpoint: Option<PathBuf>,
}

/// Splits evaluated without gradient updates
#[derive(Debug, Clone, Copy)]
enum EvalPhase {
    Val,
    Test,
}

/// Everything a run needs after initialization, independent of the backend.
struct Session<'a> {
    reporter: &'a dyn ProgressReporter,
    token: &'a CancellationToken,
    train: ImageFolder,
    val: ImageFolder,
    test: Option<ImageFolder>,
    train_loader: ItemLoader,
    eval_loader: ItemLoader,
    batcher: ImageBatcher,
    batch_size: usize,
    rng: ChaCha8Rng,
    class_to_index: BTreeMap<String, usize>,
    seed: u64,
    precision: Precision,
}

impl Session<'_> {
    /// One optimization pass over the shuffled train split. `None` means the
    /// token was set before a batch.
    fn train_epoch<B, O>(
        &mut self,
        mut model: Classifier<B>,
        optimizer: &mut O,
        loss_fn: &CrossEntropyLoss<B>,
        learning_rate: f64,
        device: &B::Device,
    ) -> Result<Option<(Classifier<B>, PhaseMetrics)>>
    where
        B: AutodiffBackend,
        O: Optimizer<Classifier<B>, B>,
    {
        let mut order: Vec<usize> = (0..self.train.len()).collect();
        order.shuffle(&mut self.rng);

        let num_batches = order.len().div_ceil(self.batch_size);
        let report_every = (num_batches / 10).max(1);
        let mut running = RunningMetrics::default();

        for (i, chunk) in order.chunks(self.batch_size).enumerate() {
            if self.token.is_cancelled() {
                return Ok(None);
            }

            let samples: Vec<_> = chunk
                .iter()
                .map(|&idx| self.train.samples()[idx].clone())
                .collect();
            let items = self.train_loader.load(&samples, &mut self.rng)?;
            let batch: ImageBatch<B> = self.batcher.batch(items, device);
            let batch_len = batch.len();

            let output = model.forward(batch.images);
            let loss = loss_fn.forward(output.clone(), batch.targets.clone());
            running.add(
                batch_len,
                loss.clone().into_scalar().elem::<f64>(),
                correct_predictions(output, batch.targets),
            );

            let grads = GradientsParams::from_grads(loss.backward(), &model);
            model = optimizer.step(learning_rate, model, grads);

            if num_batches > 10 && (i + 1) % report_every == 0 {
                self.reporter
                    .report(&format!("Processing batch {}/{}", i + 1, num_batches));
            }
        }

        Ok(Some((model, running.finish())))
    }

    /// Gradient-free pass through the eval pipeline.
    fn evaluate<B: Backend>(
        &mut self,
        model: &Classifier<B>,
        phase: EvalPhase,
        loss_fn: &CrossEntropyLoss<B>,
        device: &B::Device,
    ) -> Result<Option<PhaseMetrics>> {
        let folder = match phase {
            EvalPhase::Val => &self.val,
            EvalPhase::Test => match &self.test {
                Some(folder) => folder,
                None => return Ok(Some(PhaseMetrics::default())),
            },
        };

        let mut running = RunningMetrics::default();
        for chunk in folder.samples().chunks(self.batch_size) {
            if self.token.is_cancelled() {
                return Ok(None);
            }

            let items = self.eval_loader.load(chunk, &mut self.rng)?;
            let batch: ImageBatch<B> = self.batcher.batch(items, device);
            let batch_len = batch.len();

            let output = model.forward(batch.images);
            let loss = loss_fn.forward(output.clone(), batch.targets.clone());
            running.add(
                batch_len,
                loss.into_scalar().elem::<f64>(),
                correct_predictions(output, batch.targets),
            );
        }

        Ok(Some(running.finish()))
    }

    fn outcome(
        &self,
        status: RunStatus,
        val_accuracy: f64,
        test_accuracy: Option<f64>,
        history: TrainingHistory,
        checkpoint: Option<PathBuf>,
    ) -> TrainingOutcome {
        TrainingOutcome {
            status,
            val_accuracy,
            test_accuracy,
            history,
            class_to_index: self.class_to_index.clone(),
            seed: self.seed,
            precision: self.precision,
            checkpoint,
        }
    }

    fn cancelled(&self, val_accuracy: f64, history: TrainingHistory) -> TrainingOutcome {
        self.reporter.report("Fine-tuning cancelled");
        self.outcome(RunStatus::Cancelled, val_accuracy, None, history, None)
    }
}

fn correct_predictions<B: Backend>(output: Tensor<B, 2>, targets: Tensor<B, 1, Int>) -> usize {
    let [batch_size, _] = output.dims();
    let predictions = output.argmax(1).reshape([batch_size]);
    predictions
        .equal(targets)
        .int()
        .sum()
        .into_scalar()
        .elem::<i64>() as usize
}

fn build_loss<B: Backend>(config: &LossConfig, device: &B::Device) -> CrossEntropyLoss<B> {
    let smoothing = match config.kind {
        LossKind::CrossEntropy => None,
        LossKind::LabelSmoothing => Some(config.smoothing),
    };
    CrossEntropyLossConfig::new()
        .with_smoothing(smoothing)
        .init(device)
}

/// Drives one fine-tuning run from configuration to checkpoint.
pub struct TrainingOrchestrator {
    config: TrainingConfig,
    accelerator_available: bool,
    state: Mutex<OrchestratorState>,
}

impl TrainingOrchestrator {
    pub fn new(config: TrainingConfig) -> Self {
        Self {
            config,
            accelerator_available: backend::accelerator_available(),
            state: Mutex::new(OrchestratorState::Idle),
        }
    }

    /// Override accelerator detection when resolving precision.
    pub fn with_accelerator_available(mut self, available: bool) -> Self {
        self.accelerator_available = available;
        self
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    pub fn precision(&self) -> Precision {
        Precision::resolve(self.config.device.mixed_precision, self.accelerator_available)
    }

    pub fn state(&self) -> OrchestratorState {
        match self.state.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    fn set_state(&self, next: OrchestratorState) {
        let mut guard = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if *guard != next {
            info!("Orchestrator state: {} -> {}", *guard, next);
            *guard = next;
        }
    }

    /// Run on the compiled backend, switching to half precision when granted.
    ///
    /// Mixed precision runs the whole forward and backward pass in f16 on
    /// `Autodiff<Cuda<f16>>`. There is no loss scaling, so very small
    /// gradients can underflow to zero.
    #[cfg(feature = "cuda")]
    pub fn run_default(
        &self,
        reporter: &dyn ProgressReporter,
        token: &CancellationToken,
    ) -> Result<TrainingOutcome> {
        let device = backend::default_device();
        match self.precision() {
            Precision::Mixed => {
                self.run::<backend::MixedPrecisionBackend>(&device, reporter, token)
            }
            Precision::Full => self.run::<backend::TrainingBackend>(&device, reporter, token),
        }
    }

    /// Run on the compiled backend.
    #[cfg(not(feature = "cuda"))]
    pub fn run_default(
        &self,
        reporter: &dyn ProgressReporter,
        token: &CancellationToken,
    ) -> Result<TrainingOutcome> {
        self.run::<backend::TrainingBackend>(&backend::default_device(), reporter, token)
    }

    /// Execute the full run on backend `B`.
    ///
    /// Failures are reported as `Error: <message>` and leave the orchestrator
    /// in the `Failed` state; cancellation is an `Ok` outcome.
    pub fn run<B: AutodiffBackend>(
        &self,
        device: &B::Device,
        reporter: &dyn ProgressReporter,
        token: &CancellationToken,
    ) -> Result<TrainingOutcome> {
        self.set_state(OrchestratorState::Initializing);
        let result = self.execute::<B>(device, reporter, token);
        match &result {
            Ok(outcome) => self.set_state(outcome.status.into()),
            Err(e) => {
                self.set_state(OrchestratorState::Failed);
                reporter.report(&format!("Error: {e}"));
            }
        }
        result
    }

    fn execute<B: AutodiffBackend>(
        &self,
        device: &B::Device,
        reporter: &dyn ProgressReporter,
        token: &CancellationToken,
    ) -> Result<TrainingOutcome> {
        let session = self.initialize(reporter, token)?;
        let config = &self.config;

        let mut model = Classifier::<B>::build(
            config.model.name,
            session.class_to_index.len(),
            config.model.dropout,
            device,
        );

        match &config.checkpoint.load_path {
            Some(path) if config.model.train_from_scratch => {
                info!("train_from_scratch is set; ignoring checkpoint {:?}", path);
            }
            Some(path) => {
                let (loaded, outcome) =
                    load_checkpoint(model, path, config.checkpoint.strict, device)?;
                info!("Checkpoint {:?} applied: {:?}", path, outcome);
                model = loaded;
            }
            None => {}
        }

        info!(
            "Model {} with {} classes, {} precision",
            config.model.name,
            model.num_classes(),
            session.precision
        );

        let opt = &config.optimizer;
        match opt.kind {
            OptimizerKind::Adam => {
                let optimizer = AdamConfig::new()
                    .with_beta_1(opt.beta_1)
                    .with_beta_2(opt.beta_2)
                    .with_epsilon(opt.epsilon)
                    .with_weight_decay(opt.weight_decay.map(WeightDecayConfig::new))
                    .init::<B, Classifier<B>>();
                self.fit(model, optimizer, session, device)
            }
            OptimizerKind::AdamW => {
                let optimizer = AdamWConfig::new()
                    .with_beta_1(opt.beta_1)
                    .with_beta_2(opt.beta_2)
                    .with_epsilon(opt.epsilon)
                    .with_weight_decay(adamw_weight_decay(opt))
                    .init::<B, Classifier<B>>();
                self.fit(model, optimizer, session, device)
            }
            OptimizerKind::Sgd => {
                let momentum = (opt.momentum > 0.0).then(|| {
                    MomentumConfig::new()
                        .with_momentum(opt.momentum)
                        .with_dampening(0.0)
                });
                let optimizer = SgdConfig::new()
                    .with_momentum(momentum)
                    .with_weight_decay(opt.weight_decay.map(WeightDecayConfig::new))
                    .init::<B, Classifier<B>>();
                self.fit(model, optimizer, session, device)
            }
        }
    }

    fn initialize<'a>(
        &self,
        reporter: &'a dyn ProgressReporter,
        token: &'a CancellationToken,
    ) -> Result<Session<'a>> {
        let config = &self.config;
        config.validate()?;

        let precision = self.precision();
        if config.device.mixed_precision && precision == Precision::Full {
            debug!("Mixed precision requested without an accelerator; using fp32");
        }
        if config.data.pin_memory {
            debug!("pin_memory has no effect on the burn backends");
        }

        let data = &config.data;
        let train_dir = data.data_dir.join(Split::Train.dir_name());
        let train = ImageFolder::open(&train_dir, &data.extensions)?;
        let val = ImageFolder::with_classes(
            &data.data_dir.join(Split::Val.dir_name()),
            &data.extensions,
            train.classes(),
        )?;

        let test_dir = data.data_dir.join(Split::Test.dir_name());
        let test = if config.training.evaluate_test && test_dir.is_dir() {
            let folder = ImageFolder::with_classes(&test_dir, &data.extensions, train.classes())?;
            if folder.is_empty() {
                debug!("Test folder {:?} holds no images; skipping test pass", test_dir);
                None
            } else {
                Some(folder)
            }
        } else {
            None
        };

        if val.is_empty() {
            warn!("Validation folder holds no images; validation metrics will be zero");
        }
        info!(
            "Dataset: {} classes, {} train, {} val, {} test images",
            train.num_classes(),
            train.len(),
            val.len(),
            test.as_ref().map_or(0, |t| t.len())
        );

        let seed = config.seed.unwrap_or_else(rand::random);
        info!("Using random seed: {}", seed);

        let train_loader = ItemLoader::new(AugmentationPipeline::train(config), data.num_workers)?;
        let eval_loader = ItemLoader::new(AugmentationPipeline::eval(config), data.num_workers)?;

        Ok(Session {
            reporter,
            token,
            class_to_index: train.class_to_index(),
            train,
            val,
            test,
            train_loader,
            eval_loader,
            batcher: ImageBatcher::new(data.input_size as usize),
            batch_size: config.training.batch_size,
            rng: ChaCha8Rng::seed_from_u64(seed),
            seed,
            precision,
        })
    }

    fn fit<B, O>(
        &self,
        mut model: Classifier<B>,
        mut optimizer: O,
        mut session: Session<'_>,
        device: &B::Device,
    ) -> Result<TrainingOutcome>
    where
        B: AutodiffBackend,
        O: Optimizer<Classifier<B>, B>,
    {
        let config = &self.config;
        let reporter = session.reporter;
        let num_epochs = config.training.num_epochs;
        let learning_rate = config.optimizer.learning_rate;

        let train_loss = build_loss::<B>(&config.loss, device);
        let eval_loss = build_loss::<B::InnerBackend>(&config.loss, device);

        let mut stopper = EarlyStopping::new(&config.early_stopping);
        let mut history = TrainingHistory::default();
        let mut status = RunStatus::Completed;
        let mut val_accuracy = 0.0;

        for epoch in 0..num_epochs {
            if session.token.is_cancelled() {
                return Ok(session.cancelled(val_accuracy, history));
            }

            reporter.report(&format!("Epoch {}/{}", epoch, num_epochs - 1));
            reporter.report("----------");

            self.set_state(OrchestratorState::Training);
            let Some((trained, train)) =
                session.train_epoch(model, &mut optimizer, &train_loss, learning_rate, device)?
            else {
                return Ok(session.cancelled(val_accuracy, history));
            };
            model = trained;
            reporter.report(&train.summary(Split::Train));

            self.set_state(OrchestratorState::Validating);
            let evaluated = session.evaluate(&model.valid(), EvalPhase::Val, &eval_loss, device)?;
            let Some(val) = evaluated else {
                return Ok(session.cancelled(val_accuracy, history));
            };
            reporter.report(&val.summary(Split::Val));
            val_accuracy = val.accuracy;

            history.epochs.push(EpochMetrics { epoch, train, val });

            if stopper.enabled() {
                stopper.update(val.loss, val.accuracy);
                if stopper.should_stop() {
                    reporter.report(&format!(
                        "Early stopping triggered after {} epochs with no improvement.",
                        stopper.counter()
                    ));
                    status = RunStatus::EarlyStopped;
                    break;
                }
            }
        }

        let mut test_accuracy = None;
        if session.test.is_some() {
            self.set_state(OrchestratorState::Testing);
            let evaluated = session.evaluate(&model.valid(), EvalPhase::Test, &eval_loss, device)?;
            let Some(test) = evaluated else {
                return Ok(session.cancelled(val_accuracy, history));
            };
            reporter.report(&test.summary(Split::Test));
            test_accuracy = Some(test.accuracy);
        }

        let checkpoint = match &config.checkpoint.save_path {
            Some(path) => {
                let mut metadata = CheckpointMetadata::new(
                    config.model.name,
                    session.class_to_index.clone(),
                    config.data.input_size,
                );
                metadata.epochs_completed = history.len();
                metadata.status = status;
                metadata.val_accuracy = val_accuracy;
                metadata.test_accuracy = test_accuracy;

                save_checkpoint(&model, &metadata, path)?;
                reporter.report(&format!("Model saved to {}", record_path(path).display()));
                Some(record_path(path))
            }
            None => None,
        };

        reporter.report("Fine-tuning finished");
        Ok(session.outcome(status, val_accuracy, test_accuracy, history, checkpoint))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::metadata_path;
    use burn::backend::Autodiff;
    use burn_ndarray::NdArray;
    use image::{Rgb, RgbImage};
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;
    use verdant_core::{Error, ErrorKind, ModelName, RecordingReporter};

    type TestBackend = Autodiff<NdArray<f32>>;

    const COLORS: [[u8; 3]; 3] = [[200, 40, 40], [40, 200, 40], [40, 40, 200]];

    /// `root/{train,val,test}/class_{i}` with solid-color images per class.
    fn create_dataset(root: &Path, classes: usize, per_split: [usize; 3]) {
        for (split, count) in Split::ALL.iter().zip(per_split) {
            for class in 0..classes {
                let dir = root.join(split.dir_name()).join(format!("class_{class}"));
                fs::create_dir_all(&dir).unwrap();
                for i in 0..count {
                    let img = RgbImage::from_pixel(20, 20, Rgb(COLORS[class % COLORS.len()]));
                    img.save(dir.join(format!("img_{i}.png"))).unwrap();
                }
            }
        }
    }

    fn tiny_config(data_dir: &Path) -> TrainingConfig {
        let mut config = TrainingConfig::default();
        config.model.name = ModelName::PlantCnn;
        config.data.data_dir = data_dir.to_path_buf();
        config.data.input_size = 16;
        config.training.num_epochs = 2;
        config.training.batch_size = 4;
        config.seed = Some(7);
        config
    }

    fn run(
        config: TrainingConfig,
        token: &CancellationToken,
    ) -> (TrainingOrchestrator, RecordingReporter, Result<TrainingOutcome>) {
        let orchestrator = TrainingOrchestrator::new(config).with_accelerator_available(false);
        let reporter = RecordingReporter::new();
        let result = orchestrator.run::<TestBackend>(&Default::default(), &reporter, token);
        (orchestrator, reporter, result)
    }

    #[test]
    fn test_completed_run_reports_and_saves() {
        let temp_dir = TempDir::new().unwrap();
        create_dataset(temp_dir.path(), 2, [4, 2, 2]);
        let save_path = temp_dir.path().join("out/model");

        let mut config = tiny_config(temp_dir.path());
        config.checkpoint.save_path = Some(save_path.clone());
        let (orchestrator, reporter, result) = run(config, &CancellationToken::new());
        let outcome = result.unwrap();

        assert_eq!(outcome.status, RunStatus::Completed);
        assert_eq!(orchestrator.state(), OrchestratorState::Completed);
        assert_eq!(outcome.history.len(), 2);
        assert_eq!(outcome.seed, 7);
        assert_eq!(outcome.precision, Precision::Full);
        assert!((0.0..=1.0).contains(&outcome.val_accuracy));
        assert!(outcome.test_accuracy.is_some());
        assert_eq!(outcome.class_to_index["class_1"], 1);

        let messages = reporter.messages();
        assert_eq!(messages[0], "Epoch 0/1");
        assert_eq!(messages[1], "----------");
        assert!(messages.iter().any(|m| m == "Epoch 1/1"));
        assert!(messages.iter().any(|m| m.starts_with("train Loss: ")));
        assert!(messages.iter().any(|m| m.starts_with("val Loss: ")));
        assert!(messages.iter().any(|m| m.starts_with("test Loss: ")));
        assert_eq!(messages.last().unwrap(), "Fine-tuning finished");

        assert_eq!(outcome.checkpoint, Some(record_path(&save_path)));
        assert!(record_path(&save_path).is_file());
        let metadata = CheckpointMetadata::load(&metadata_path(&save_path)).unwrap();
        assert_eq!(metadata.model_name, ModelName::PlantCnn);
        assert_eq!(metadata.epochs_completed, 2);
        assert_eq!(metadata.test_accuracy, outcome.test_accuracy);
    }

    #[test]
    fn test_metrics_are_sample_weighted() {
        let temp_dir = TempDir::new().unwrap();
        // 5 val images with batch size 2 gives a ragged last batch
        create_dataset(temp_dir.path(), 1, [3, 5, 0]);

        let mut config = tiny_config(temp_dir.path());
        config.training.num_epochs = 1;
        config.training.batch_size = 2;
        let (_, _, result) = run(config, &CancellationToken::new());
        let outcome = result.unwrap();

        let epoch = outcome.history.last().unwrap();
        assert_eq!(epoch.train.samples, 3);
        assert_eq!(epoch.val.samples, 5);
        // a single class is always predicted correctly
        assert_eq!(epoch.val.accuracy, 1.0);
        assert_eq!(outcome.test_accuracy, None);
    }

    #[test]
    fn test_batch_progress_messages() {
        let temp_dir = TempDir::new().unwrap();
        create_dataset(temp_dir.path(), 2, [6, 1, 0]);

        let mut config = tiny_config(temp_dir.path());
        config.training.num_epochs = 1;
        config.training.batch_size = 1;
        let (_, reporter, result) = run(config, &CancellationToken::new());
        result.unwrap();

        assert!(reporter.contains("Processing batch 1/12"));
        assert!(reporter.contains("Processing batch 12/12"));
    }

    #[test]
    fn test_no_batch_progress_for_short_epochs() {
        let temp_dir = TempDir::new().unwrap();
        create_dataset(temp_dir.path(), 2, [2, 1, 0]);

        let mut config = tiny_config(temp_dir.path());
        config.training.num_epochs = 1;
        config.training.batch_size = 1;
        let (_, reporter, result) = run(config, &CancellationToken::new());
        result.unwrap();

        assert!(!reporter.contains("Processing batch"));
    }

    #[test]
    fn test_early_stopping_after_patience() {
        let temp_dir = TempDir::new().unwrap();
        create_dataset(temp_dir.path(), 2, [2, 1, 1]);

        let mut config = tiny_config(temp_dir.path());
        config.training.num_epochs = 6;
        config.early_stopping.patience = 1;
        config.early_stopping.min_delta = 100.0;
        let (orchestrator, reporter, result) = run(config, &CancellationToken::new());
        let outcome = result.unwrap();

        assert_eq!(outcome.status, RunStatus::EarlyStopped);
        assert_eq!(orchestrator.state(), OrchestratorState::EarlyStopped);
        assert_eq!(outcome.history.len(), 2);
        assert_eq!(outcome.val_accuracy, outcome.history.last().unwrap().val.accuracy);
        assert!(reporter.contains("Early stopping triggered after 1 epochs with no improvement."));
        assert!(!reporter.contains("Epoch 2/5"));
        // the test pass still runs after an early stop
        assert!(outcome.test_accuracy.is_some());
        assert!(reporter.contains("Fine-tuning finished"));
    }

    #[test]
    fn test_cancel_before_first_epoch() {
        let temp_dir = TempDir::new().unwrap();
        create_dataset(temp_dir.path(), 2, [2, 1, 0]);
        let save_path = temp_dir.path().join("model");

        let mut config = tiny_config(temp_dir.path());
        config.checkpoint.save_path = Some(save_path.clone());
        let token = CancellationToken::new();
        token.cancel();
        let (orchestrator, reporter, result) = run(config, &token);
        let outcome = result.unwrap();

        assert_eq!(outcome.status, RunStatus::Cancelled);
        assert_eq!(orchestrator.state(), OrchestratorState::Cancelled);
        assert!(outcome.history.is_empty());
        assert_eq!(outcome.val_accuracy, 0.0);
        assert_eq!(reporter.messages(), vec!["Fine-tuning cancelled"]);
        assert!(!record_path(&save_path).exists());
        assert!(!metadata_path(&save_path).exists());
    }

    #[test]
    fn test_cancel_mid_run_keeps_last_val_accuracy() {
        let temp_dir = TempDir::new().unwrap();
        create_dataset(temp_dir.path(), 2, [2, 1, 0]);
        let save_path = temp_dir.path().join("model");

        let mut config = tiny_config(temp_dir.path());
        config.training.num_epochs = 5;
        config.checkpoint.save_path = Some(save_path.clone());

        let orchestrator = TrainingOrchestrator::new(config).with_accelerator_available(false);
        let token = CancellationToken::new();
        let seen = RecordingReporter::new();
        let reporter = |message: &str| {
            seen.report(message);
            if message == "Epoch 1/4" {
                token.cancel();
            }
        };
        let outcome = orchestrator
            .run::<TestBackend>(&Default::default(), &reporter, &token)
            .unwrap();

        assert_eq!(outcome.status, RunStatus::Cancelled);
        assert_eq!(outcome.history.len(), 1);
        assert_eq!(outcome.val_accuracy, outcome.history.epochs[0].val.accuracy);
        assert_eq!(seen.messages().last().unwrap(), "Fine-tuning cancelled");
        assert!(!seen.contains("Fine-tuning finished"));
        assert!(!record_path(&save_path).exists());
    }

    #[test]
    fn test_invalid_config_fails_before_reading_data() {
        let mut config = tiny_config(Path::new("/nonexistent/verdant"));
        config.training.batch_size = 0;
        let (orchestrator, reporter, result) = run(config, &CancellationToken::new());

        let err = result.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert_eq!(orchestrator.state(), OrchestratorState::Failed);
        assert!(reporter.messages()[0].starts_with("Error: "));
    }

    #[test]
    fn test_input_below_model_minimum_is_configuration_error() {
        let temp_dir = TempDir::new().unwrap();
        create_dataset(temp_dir.path(), 2, [2, 1, 0]);

        let mut config = tiny_config(temp_dir.path());
        config.data.input_size = 8;
        let (orchestrator, _, result) = run(config, &CancellationToken::new());

        assert_eq!(result.unwrap_err().kind(), ErrorKind::Configuration);
        assert_eq!(orchestrator.state(), OrchestratorState::Failed);
    }

    #[test]
    fn test_adamw_default_weight_decay() {
        let mut opt = TrainingConfig::default().optimizer;
        assert_eq!(opt.weight_decay, None);
        assert_eq!(adamw_weight_decay(&opt), 0.01);

        opt.weight_decay = Some(0.05);
        assert_eq!(adamw_weight_decay(&opt), 0.05);
    }

    #[test]
    fn test_missing_data_dir_is_input_error() {
        let temp_dir = TempDir::new().unwrap();
        let config = tiny_config(&temp_dir.path().join("missing"));
        let (_, _, result) = run(config, &CancellationToken::new());
        assert_eq!(result.unwrap_err().kind(), ErrorKind::Input);
    }

    #[test]
    fn test_unsupported_optimizer_rejected_at_parse_time() {
        let err = serde_json::from_str::<TrainingConfig>(r#"{"optimizer": {"kind": "rmsprop"}}"#)
            .unwrap_err();
        assert!(err.to_string().contains("rmsprop"));

        let err = "rmsprop".parse::<OptimizerKind>().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn test_every_optimizer_and_loss_trains() {
        let temp_dir = TempDir::new().unwrap();
        create_dataset(temp_dir.path(), 2, [2, 1, 0]);

        for kind in OptimizerKind::ALL {
            let mut config = tiny_config(temp_dir.path());
            config.training.num_epochs = 1;
            config.optimizer.kind = kind;
            config.optimizer.momentum = 0.9;
            config.loss.kind = LossKind::LabelSmoothing;
            let (_, _, result) = run(config, &CancellationToken::new());
            assert_eq!(result.unwrap().status, RunStatus::Completed, "{kind}");
        }
    }

    #[test]
    fn test_checkpoint_resume_strict_and_tolerant() {
        let temp_dir = TempDir::new().unwrap();
        let two = temp_dir.path().join("two");
        let three = temp_dir.path().join("three");
        create_dataset(&two, 2, [2, 1, 0]);
        create_dataset(&three, 3, [2, 1, 0]);
        let save_path = temp_dir.path().join("ckpt/model");

        let mut config = tiny_config(&two);
        config.training.num_epochs = 1;
        config.checkpoint.save_path = Some(save_path.clone());
        run(config, &CancellationToken::new()).2.unwrap();

        // same classes resume cleanly
        let mut config = tiny_config(&two);
        config.training.num_epochs = 1;
        config.checkpoint.load_path = Some(save_path.clone());
        run(config, &CancellationToken::new()).2.unwrap();

        let mut config = tiny_config(&three);
        config.training.num_epochs = 1;
        config.checkpoint.load_path = Some(save_path.clone());
        let (orchestrator, _, result) = run(config.clone(), &CancellationToken::new());
        assert!(matches!(result.unwrap_err(), Error::Checkpoint(_)));
        assert_eq!(orchestrator.state(), OrchestratorState::Failed);

        config.checkpoint.strict = false;
        let outcome = run(config.clone(), &CancellationToken::new()).2.unwrap();
        assert_eq!(outcome.class_to_index.len(), 3);

        config.checkpoint.strict = true;
        config.model.train_from_scratch = true;
        assert!(run(config, &CancellationToken::new()).2.is_ok());
    }

    #[test]
    fn test_unknown_val_class_is_skipped() {
        let temp_dir = TempDir::new().unwrap();
        create_dataset(temp_dir.path(), 2, [2, 1, 0]);
        let stray = temp_dir.path().join("val/class_9");
        fs::create_dir_all(&stray).unwrap();
        RgbImage::new(20, 20).save(stray.join("x.png")).unwrap();

        let mut config = tiny_config(temp_dir.path());
        config.training.num_epochs = 1;
        let outcome = run(config, &CancellationToken::new()).2.unwrap();

        assert_eq!(outcome.class_to_index.len(), 2);
        assert_eq!(outcome.history.epochs[0].val.samples, 2);
    }

    #[test]
    fn test_test_pass_can_be_disabled() {
        let temp_dir = TempDir::new().unwrap();
        create_dataset(temp_dir.path(), 2, [2, 1, 1]);

        let mut config = tiny_config(temp_dir.path());
        config.training.num_epochs = 1;
        config.training.evaluate_test = false;
        let (_, reporter, result) = run(config, &CancellationToken::new());

        assert_eq!(result.unwrap().test_accuracy, None);
        assert!(!reporter.contains("test Loss"));
    }

    #[test]
    fn test_mixed_precision_needs_accelerator() {
        let mut config = TrainingConfig::default();
        config.device.mixed_precision = true;

        let cpu = TrainingOrchestrator::new(config.clone()).with_accelerator_available(false);
        assert_eq!(cpu.precision(), Precision::Full);
        assert_eq!(cpu.state(), OrchestratorState::Idle);

        let gpu = TrainingOrchestrator::new(config).with_accelerator_available(true);
        assert_eq!(gpu.precision(), Precision::Mixed);
    }
}
