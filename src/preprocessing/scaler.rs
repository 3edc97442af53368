//! Robust feature scaling (median / inter-quartile range)

use super::quantile_sorted;
use crate::error::{MamformerError, Result};
use ndarray::{Array1, Array2, ArrayView1, Axis};
use serde::{Deserialize, Serialize};

/// Spreads below this are treated as constant columns
const MIN_SPREAD: f64 = 10.0 * f64::EPSILON;

/// Parameters for one fitted column
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScalerParams {
    pub center: f64, // median
    pub scale: f64,  // IQR, 1.0 when (near) zero
}

impl ScalerParams {
    #[inline]
    pub fn apply(&self, v: f64) -> f64 {
        (v - self.center) / self.scale
    }

    #[inline]
    pub fn invert(&self, v: f64) -> f64 {
        v * self.scale + self.center
    }
}

/// Column-wise robust scaler fitted on the training split only
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RobustScaler {
    params: Vec<ScalerParams>,
}

impl RobustScaler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fit per-column median and IQR
    pub fn fit(&mut self, data: &Array2<f64>) -> Result<&mut Self> {
        if data.nrows() == 0 {
            return Err(MamformerError::InsufficientData {
                what: "scaler fit".to_string(),
                required: 1,
                available: 0,
            });
        }
        self.params = data.axis_iter(Axis(1)).map(Self::column_params).collect();
        Ok(self)
    }

    fn column_params(col: ArrayView1<'_, f64>) -> ScalerParams {
        let mut sorted: Vec<f64> = col.to_vec();
        sorted.sort_by(|a, b| a.total_cmp(b));
        let median = quantile_sorted(&sorted, 0.5);
        let iqr = quantile_sorted(&sorted, 0.75) - quantile_sorted(&sorted, 0.25);
        ScalerParams {
            center: median,
            scale: if iqr.abs() < MIN_SPREAD { 1.0 } else { iqr },
        }
    }

    pub fn is_fitted(&self) -> bool {
        !self.params.is_empty()
    }

    pub fn params(&self) -> &[ScalerParams] {
        &self.params
    }

    /// Rebuild a fitted scaler from stored parameters
    pub fn from_params(params: Vec<ScalerParams>) -> Self {
        Self { params }
    }

    fn check(&self, n_cols: usize) -> Result<()> {
        if !self.is_fitted() {
            return Err(MamformerError::ModelNotFitted);
        }
        if n_cols != self.params.len() {
            return Err(MamformerError::ShapeError {
                expected: format!("{} columns", self.params.len()),
                actual: format!("{} columns", n_cols),
            });
        }
        Ok(())
    }

    pub fn transform(&self, data: &Array2<f64>) -> Result<Array2<f64>> {
        self.check(data.ncols())?;
        let mut out = data.clone();
        for (mut col, p) in out.axis_iter_mut(Axis(1)).zip(&self.params) {
            col.mapv_inplace(|v| p.apply(v));
        }
        Ok(out)
    }

    pub fn fit_transform(&mut self, data: &Array2<f64>) -> Result<Array2<f64>> {
        self.fit(data)?;
        self.transform(data)
    }

    pub fn inverse_transform(&self, data: &Array2<f64>) -> Result<Array2<f64>> {
        self.check(data.ncols())?;
        let mut out = data.clone();
        for (mut col, p) in out.axis_iter_mut(Axis(1)).zip(&self.params) {
            col.mapv_inplace(|v| p.invert(v));
        }
        Ok(out)
    }

    /// Map values of a single column back to the original scale
    pub fn inverse_column(&self, column: usize, values: &[f64]) -> Result<Array1<f64>> {
        let p = self
            .params
            .get(column)
            .ok_or(MamformerError::ModelNotFitted)?;
        Ok(values.iter().map(|&v| p.invert(v)).collect())
    }
}
