//! Model training module
//!
//! - Tree ensembles used to rank input features (random forest, gradient boosting)
//! - Training configuration and validation
//! - Ensemble loop with best-validation checkpointing and progress events
//! - Evaluation, checkpoint persistence and the end-to-end pipeline

pub mod checkpoint;
mod config;
pub mod decision_tree;
pub mod ensemble;
pub mod evaluator;
pub mod gradient_boosting;
pub mod metrics;
mod pipeline;
pub mod progress;
pub mod random_forest;

pub use checkpoint::{CheckpointMeta, CheckpointPaths};
pub use config::TrainingConfig;
pub use ensemble::{EnsembleTrainer, TrainedMember, TrainerSettings};
pub use evaluator::{EnsembleEvaluation, Evaluator};
pub use metrics::{sanitize, RegressionMetrics, SanitizedMetrics};
pub use pipeline::{TrainingPipeline, TrainingResult};
pub use progress::{
    CollectingSink, EpochMetrics, NoProgress, ProgressEvent, ProgressSink, TrainingLogEntry,
};
