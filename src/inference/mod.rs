//! Inference module
//!
//! Loads the checkpoint persisted by a training job and forecasts the next
//! target value from one window of raw rows.

mod predictor;

pub use predictor::{Forecast, Predictor};
