//! Single-window inference from a persisted checkpoint

use crate::architectures::{Pass, SequenceModel};
use crate::data::Dataset;
use crate::error::{MamformerError, Result};
use crate::preprocessing::{QuantileClipper, RobustScaler};
use crate::timeseries::Windower;
use crate::training::checkpoint::{load_meta, CheckpointMeta, CheckpointPaths};
use candle_core::{Device, Tensor};
use ndarray::{s, Array2};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info};

/// Relative spread assumed around a point forecast
const RELATIVE_STD: f64 = 0.1;
/// Two-sided 95% normal quantile
const Z_95: f64 = 1.96;

/// A point forecast with its approximate 95% band and the inputs it used
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Forecast {
    pub value: f64,
    pub interval: (f64, f64),
    pub features: Vec<String>,
}

impl Forecast {
    /// Band of ±1.96 standard deviations, the deviation taken as 10% of |value|
    pub fn new(value: f64, features: Vec<String>) -> Self {
        let half = Z_95 * value.abs() * RELATIVE_STD;
        Self {
            value,
            interval: (value - half, value + half),
            features,
        }
    }
}

/// A deployable model rebuilt from its sidecar metadata
pub struct Predictor {
    meta: CheckpointMeta,
    model: SequenceModel,
    scaler: RobustScaler,
    clipper: Option<QuantileClipper>,
    windower: Windower,
}

impl std::fmt::Debug for Predictor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Predictor")
            .field("task_id", &self.meta.task_id)
            .field("model_type", &self.meta.model_type)
            .field("seq_len", &self.meta.spec.seq_len)
            .finish()
    }
}

impl Predictor {
    pub fn load(model_dir: impl AsRef<Path>, task_id: &str) -> Result<Self> {
        Self::load_on(model_dir, task_id, &Device::Cpu)
    }

    pub fn load_on(model_dir: impl AsRef<Path>, task_id: &str, device: &Device) -> Result<Self> {
        let model_dir = model_dir.as_ref();
        let paths = CheckpointPaths::new(model_dir, task_id)?;
        let meta = load_meta(model_dir, task_id)?;

        let mut model = SequenceModel::build(meta.model_type, &meta.spec, device, 0)?;
        model.load(&paths.weights)?;

        let scaler = RobustScaler::from_params(meta.scaler.clone());
        let clipper = meta
            .clip_bounds
            .clone()
            .map(|bounds| QuantileClipper::from_bounds(0.0, 1.0, bounds));
        let windower = Windower::new(meta.spec.seq_len, meta.target_index)?;

        info!(task_id, model = %meta.model_type, "predictor loaded");
        Ok(Self {
            meta,
            model,
            scaler,
            clipper,
            windower,
        })
    }

    pub fn meta(&self) -> &CheckpointMeta {
        &self.meta
    }

    pub fn seq_len(&self) -> usize {
        self.meta.spec.seq_len
    }

    /// Input columns the model reads, in checkpoint order, target excluded
    pub fn features(&self) -> Vec<String> {
        self.meta
            .columns
            .iter()
            .enumerate()
            .filter(|&(j, _)| j != self.meta.target_index)
            .map(|(_, name)| name.clone())
            .collect()
    }

    /// Forecast from exactly `seq_len` raw rows ordered like
    /// [`CheckpointMeta::columns`]
    pub fn predict(&self, rows: &Array2<f64>) -> Result<f64> {
        if rows.nrows() != self.seq_len() {
            return Err(MamformerError::DataError(format!(
                "expected {} rows, got {}",
                self.seq_len(),
                rows.nrows()
            )));
        }
        if rows.ncols() != self.meta.columns.len() {
            return Err(MamformerError::DataError(format!(
                "expected {} columns, got {}",
                self.meta.columns.len(),
                rows.ncols()
            )));
        }

        let mut raw = rows.clone();
        if let Some(clipper) = &self.clipper {
            clipper.transform_inplace(&mut raw)?;
        }
        let scaled = self.scaler.transform(&raw)?;
        let window = self.windower.single(&scaled)?;

        let (l, f) = window.dim();
        let data: Vec<f32> = window.iter().map(|&v| v as f32).collect();
        let xs = Tensor::from_vec(data, (1, l, f), self.model.device())?;
        let out = self.model.forward(&xs, &mut Pass::eval())?.to_vec1::<f32>()?;
        let scaled_pred = out
            .first()
            .copied()
            .map(f64::from)
            .ok_or_else(|| MamformerError::TrainingError("empty model output".to_string()))?;

        let pred = self.scaler.inverse_column(self.meta.target_index, &[scaled_pred])?[0];
        debug!(prediction = pred, "window predicted");
        Ok(pred)
    }

    /// Forecast from rows keyed by column name. The target may be omitted
    /// since it is masked anyway.
    pub fn predict_records(&self, records: &[HashMap<String, f64>]) -> Result<f64> {
        let mut rows = Array2::<f64>::zeros((records.len(), self.meta.columns.len()));
        for (i, record) in records.iter().enumerate() {
            for (j, name) in self.meta.columns.iter().enumerate() {
                match record.get(name) {
                    Some(&v) => rows[[i, j]] = v,
                    None if j == self.meta.target_index => {}
                    None => return Err(MamformerError::FeatureNotFound(name.clone())),
                }
            }
        }
        self.predict(&rows)
    }

    /// Forecast from the last `seq_len` rows of a dataset
    pub fn predict_dataset(&self, dataset: &Dataset) -> Result<f64> {
        let n = dataset.n_rows();
        if n < self.seq_len() {
            return Err(MamformerError::InsufficientData {
                what: "prediction window".to_string(),
                required: self.seq_len(),
                available: n,
            });
        }
        let mut rows = Array2::<f64>::zeros((self.seq_len(), self.meta.columns.len()));
        for (j, name) in self.meta.columns.iter().enumerate() {
            match dataset.column(name) {
                Ok(col) => rows.column_mut(j).assign(&col.slice(s![n - self.seq_len()..])),
                Err(_) if j == self.meta.target_index => {}
                Err(e) => return Err(e),
            }
        }
        self.predict(&rows)
    }

    /// [`Self::predict_dataset`] wrapped with its band and feature list
    pub fn forecast_dataset(&self, dataset: &Dataset) -> Result<Forecast> {
        let value = self.predict_dataset(dataset)?;
        Ok(Forecast::new(value, self.features()))
    }
}
