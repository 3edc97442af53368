//! Error types for the forecasting pipeline

use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, MamformerError>;

/// Coarse classification of an error, used when a failure is recorded
/// against a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Data,
    Training,
    Persistence,
    Config,
}

/// Main error type for the crate
#[derive(Error, Debug)]
pub enum MamformerError {
    #[error("Data error: {0}")]
    DataError(String),

    #[error("Feature not found: {0}")]
    FeatureNotFound(String),

    #[error("Invalid shape: expected {expected}, got {actual}")]
    ShapeError { expected: String, actual: String },

    #[error("Insufficient data: need at least {required} rows for {what}, got {available}")]
    InsufficientData {
        what: String,
        required: usize,
        available: usize,
    },

    #[error("Training error: {0}")]
    TrainingError(String),

    #[error("Non-finite loss in member {member} at epoch {epoch}")]
    NonFiniteLoss { member: usize, epoch: usize },

    #[error("Device error: {0}")]
    Device(String),

    #[error("Persistence error: {0}")]
    PersistenceError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid parameter: {name} = {value}, {reason}")]
    InvalidParameter {
        name: String,
        value: String,
        reason: String,
    },

    #[error("Model not fitted")]
    ModelNotFitted,

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl MamformerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            MamformerError::DataError(_)
            | MamformerError::FeatureNotFound(_)
            | MamformerError::ShapeError { .. }
            | MamformerError::InsufficientData { .. } => ErrorKind::Data,
            MamformerError::TrainingError(_)
            | MamformerError::NonFiniteLoss { .. }
            | MamformerError::Device(_)
            | MamformerError::ModelNotFitted => ErrorKind::Training,
            MamformerError::PersistenceError(_)
            | MamformerError::IoError(_)
            | MamformerError::SerializationError(_) => ErrorKind::Persistence,
            MamformerError::ConfigError(_) | MamformerError::InvalidParameter { .. } => {
                ErrorKind::Config
            }
        }
    }

    pub(crate) fn invalid(name: &str, value: impl ToString, reason: &str) -> Self {
        MamformerError::InvalidParameter {
            name: name.to_string(),
            value: value.to_string(),
            reason: reason.to_string(),
        }
    }
}

impl From<polars::error::PolarsError> for MamformerError {
    fn from(err: polars::error::PolarsError) -> Self {
        MamformerError::DataError(err.to_string())
    }
}

impl From<serde_json::Error> for MamformerError {
    fn from(err: serde_json::Error) -> Self {
        MamformerError::SerializationError(err.to_string())
    }
}

impl From<ndarray::ShapeError> for MamformerError {
    fn from(err: ndarray::ShapeError) -> Self {
        MamformerError::ShapeError {
            expected: "valid shape".to_string(),
            actual: err.to_string(),
        }
    }
}

impl From<candle_core::Error> for MamformerError {
    fn from(err: candle_core::Error) -> Self {
        MamformerError::TrainingError(err.to_string())
    }
}
