//! Mamformer - ensemble sequence-model forecasting for tabular time series
//!
//! Given a time-ordered table and a target column, the crate ranks input
//! features with tree ensembles, cuts leakage-safe sliding windows, trains
//! an ensemble of sequence models and reports metrics on the original
//! value scale.
//!
//! # Modules
//!
//! ## Data
//! - [`data`] - Time-ordered numeric datasets, CSV loading
//! - [`preprocessing`] - Quantile clipping, robust scaling, feature selection
//! - [`timeseries`] - Sliding windows and chronological splits
//! - [`synthetic`] - Training-window augmentation
//!
//! ## Models
//! - [`architectures`] - Mamformer and Auto-Mamformer networks
//! - [`training`] - Tree ensembles, ensemble training loop, evaluation, checkpoints
//! - [`inference`] - Single-window prediction from a checkpoint
//! - [`device`] - CPU / CUDA selection
//!
//! ## Services
//! - [`tasks`] - Task records, stores and inline / queued dispatch
//! - [`cli`] - Command-line interface

// Core error handling
pub mod error;

// Data
pub mod data;
pub mod preprocessing;
pub mod synthetic;
pub mod timeseries;

// Models
pub mod architectures;
pub mod device;
pub mod inference;
pub mod training;

// Services
pub mod cli;
pub mod tasks;

pub use error::{MamformerError, Result};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::architectures::{ModelSpec, ModelType, SequenceModel};
    pub use crate::data::Dataset;
    pub use crate::device::DevicePreference;
    pub use crate::error::{ErrorKind, MamformerError, Result};
    pub use crate::inference::{Forecast, Predictor};
    pub use crate::preprocessing::{FeatureSelector, QuantileClipper, RobustScaler};
    pub use crate::synthetic::{AugmentConfig, Augmenter};
    pub use crate::tasks::{
        DispatchMode, InMemoryTaskStore, JobQueue, JsonTaskStore, RunOutcome, TaskLookup,
        TaskOrchestrator, TaskStatus, TaskStore,
    };
    pub use crate::timeseries::{ChronologicalSplit, Windower};
    pub use crate::training::{
        ProgressEvent, ProgressSink, RegressionMetrics, TrainingConfig, TrainingPipeline,
        TrainingResult,
    };
}
