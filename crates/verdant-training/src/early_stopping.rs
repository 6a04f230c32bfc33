//! Patience-based early stopping on a validation metric.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use verdant_core::{EarlyStoppingConfig, EarlyStoppingMetric};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EarlyStopping {
    patience: usize,
    min_delta: f64,
    metric: EarlyStoppingMetric,
    best: Option<f64>,
    counter: usize,
}

impl EarlyStopping {
    pub fn new(config: &EarlyStoppingConfig) -> Self {
        Self {
            patience: config.patience,
            min_delta: config.min_delta,
            metric: config.metric,
            best: None,
            counter: 0,
        }
    }

    pub fn enabled(&self) -> bool {
        self.patience > 0
    }

    /// Record one epoch's validation results. Returns whether it improved.
    pub fn update(&mut self, val_loss: f64, val_accuracy: f64) -> bool {
        let value = match self.metric {
            EarlyStoppingMetric::Loss => val_loss,
            EarlyStoppingMetric::Accuracy => val_accuracy,
        };

        let improved = match (self.best, self.metric) {
            (None, _) => true,
            (Some(best), EarlyStoppingMetric::Loss) => value < best - self.min_delta,
            (Some(best), EarlyStoppingMetric::Accuracy) => value > best + self.min_delta,
        };

        if improved {
            if let Some(best) = self.best {
                info!("Validation {} improved from {:.4} to {:.4}", self.metric, best, value);
            }
            self.best = Some(value);
            self.counter = 0;
        } else {
            self.counter += 1;
            warn!("No improvement. Patience: {}/{}", self.counter, self.patience);
        }

        improved
    }

    /// True once `patience` consecutive epochs failed to improve
    pub fn should_stop(&self) -> bool {
        self.enabled() && self.counter >= self.patience
    }

    pub fn counter(&self) -> usize {
        self.counter
    }

    pub fn best(&self) -> Option<f64> {
        self.best
    }
}
