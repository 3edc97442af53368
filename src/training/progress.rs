//! Progress reporting from the ensemble loop

use super::metrics::{sanitize, RegressionMetrics};
use crate::error::Result;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Validation metrics for one epoch, sanitized
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EpochMetrics {
    pub val_r2: Option<f64>,
    pub val_mae: Option<f64>,
    pub val_rmse: Option<f64>,
    pub val_mape: Option<f64>,
    pub val_loss: Option<f64>,
}

impl EpochMetrics {
    pub fn new(metrics: &RegressionMetrics, val_loss: f64) -> Self {
        Self {
            val_r2: sanitize(metrics.r2),
            val_mae: sanitize(metrics.mae),
            val_rmse: sanitize(metrics.rmse),
            val_mape: sanitize(metrics.mape),
            val_loss: sanitize(val_loss),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    /// Percent in `[0, 100]`
    pub overall_progress: f64,
    pub epoch: usize,
    pub train_loss: Option<f64>,
    pub val_r2: Option<f64>,
    pub metrics: EpochMetrics,
}

/// Fraction of the job done when `member` reaches `epoch`, as a percentage.
/// Only the first member reports, so later members are under-counted.
pub fn overall_progress(member: usize, epoch: usize, n_models: usize, epochs: usize) -> f64 {
    let total = (n_models * epochs).max(1) as f64;
    ((member * epochs + epoch) as f64 / total * 100.0).clamp(0.0, 100.0)
}

/// Receiver of progress events. Errors abort training.
pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: &ProgressEvent) -> Result<()>;
}

impl<F> ProgressSink for F
where
    F: Fn(&ProgressEvent) -> Result<()> + Send + Sync,
{
    fn emit(&self, event: &ProgressEvent) -> Result<()> {
        self(event)
    }
}

/// Discards every event
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn emit(&self, _event: &ProgressEvent) -> Result<()> {
        Ok(())
    }
}

/// Keeps every event in memory
#[derive(Default)]
pub struct CollectingSink {
    events: Mutex<Vec<ProgressEvent>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().clone()
    }
}

impl ProgressSink for CollectingSink {
    fn emit(&self, event: &ProgressEvent) -> Result<()> {
        self.events.lock().push(*event);
        Ok(())
    }
}

/// Persisted form of one progress emission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingLogEntry {
    pub epoch: usize,
    pub overall_progress: f64,
    pub train_loss: Option<f64>,
    pub val_loss: Option<f64>,
    pub metrics: EpochMetrics,
    pub recorded_at: DateTime<Utc>,
}

impl From<&ProgressEvent> for TrainingLogEntry {
    fn from(event: &ProgressEvent) -> Self {
        Self {
            epoch: event.epoch,
            overall_progress: event.overall_progress,
            train_loss: event.train_loss,
            val_loss: event.metrics.val_loss,
            metrics: event.metrics,
            recorded_at: Utc::now(),
        }
    }
}
