//! Regression metrics on the original value scale

use serde::{Deserialize, Serialize};

/// R², RMSE, MAE and MAPE (percent) for one prediction set
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegressionMetrics {
    pub r2: f64,
    pub rmse: f64,
    pub mae: f64,
    pub mape: f64,
}

impl RegressionMetrics {
    pub fn compute(y_true: &[f64], y_pred: &[f64]) -> Self {
        Self {
            r2: r2_score(y_true, y_pred),
            rmse: rmse(y_true, y_pred),
            mae: mae(y_true, y_pred),
            mape: mape(y_true, y_pred),
        }
    }

    /// Same metrics with non-finite values replaced by `None`
    pub fn sanitized(&self) -> SanitizedMetrics {
        SanitizedMetrics {
            r2: sanitize(self.r2),
            rmse: sanitize(self.rmse),
            mae: sanitize(self.mae),
            mape: sanitize(self.mape),
        }
    }
}

/// Metrics ready to be persisted or transmitted
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SanitizedMetrics {
    pub r2: Option<f64>,
    pub rmse: Option<f64>,
    pub mae: Option<f64>,
    pub mape: Option<f64>,
}

/// NaN and ±Inf become absent
pub fn sanitize(value: f64) -> Option<f64> {
    value.is_finite().then_some(value)
}

pub fn sanitize_all(values: &[f64]) -> Vec<Option<f64>> {
    values.iter().map(|&v| sanitize(v)).collect()
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

pub fn r2_score(y_true: &[f64], y_pred: &[f64]) -> f64 {
    let y_mean = mean(y_true);
    let ss_tot: f64 = y_true.iter().map(|&y| (y - y_mean).powi(2)).sum();
    let ss_res: f64 = y_true
        .iter()
        .zip(y_pred)
        .map(|(&t, &p)| (t - p).powi(2))
        .sum();
    if ss_tot == 0.0 {
        return if ss_res == 0.0 { 1.0 } else { 0.0 };
    }
    1.0 - ss_res / ss_tot
}

pub fn rmse(y_true: &[f64], y_pred: &[f64]) -> f64 {
    let sq: Vec<f64> = y_true.iter().zip(y_pred).map(|(&t, &p)| (t - p).powi(2)).collect();
    mean(&sq).sqrt()
}

pub fn mae(y_true: &[f64], y_pred: &[f64]) -> f64 {
    let abs: Vec<f64> = y_true.iter().zip(y_pred).map(|(&t, &p)| (t - p).abs()).collect();
    mean(&abs)
}

/// Mean absolute percentage error, ×100. Denominators are floored at
/// machine epsilon so zero targets do not divide by zero.
pub fn mape(y_true: &[f64], y_pred: &[f64]) -> f64 {
    let pct: Vec<f64> = y_true
        .iter()
        .zip(y_pred)
        .map(|(&t, &p)| (t - p).abs() / t.abs().max(f64::EPSILON))
        .collect();
    mean(&pct) * 100.0
}
