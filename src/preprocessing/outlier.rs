//! Quantile clipping of extreme feature values

use super::quantile_sorted;
use crate::error::{MamformerError, Result};
use ndarray::{Array2, Axis};
use serde::{Deserialize, Serialize};

/// Clip bounds for one column
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClipBounds {
    pub lower: f64,
    pub upper: f64,
}

/// Clips every non-excluded column to its `[lower_q, upper_q]` quantile range.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuantileClipper {
    lower_q: f64,
    upper_q: f64,
    /// `None` for columns left untouched (the target)
    bounds: Vec<Option<ClipBounds>>,
}

impl QuantileClipper {
    pub fn new(lower_q: f64, upper_q: f64) -> Result<Self> {
        if !(0.0..=1.0).contains(&lower_q) || !(0.0..=1.0).contains(&upper_q) || lower_q >= upper_q {
            return Err(MamformerError::invalid(
                "clip_quantiles",
                format!("({}, {})", lower_q, upper_q),
                "expected 0 <= lower < upper <= 1",
            ));
        }
        Ok(Self {
            lower_q,
            upper_q,
            bounds: Vec::new(),
        })
    }

    /// Compute bounds for every column except `exclude`
    pub fn fit(&mut self, data: &Array2<f64>, exclude: Option<usize>) -> &mut Self {
        self.bounds = data
            .axis_iter(Axis(1))
            .enumerate()
            .map(|(j, col)| {
                if Some(j) == exclude || col.is_empty() {
                    return None;
                }
                let mut sorted = col.to_vec();
                sorted.sort_by(|a, b| a.total_cmp(b));
                Some(ClipBounds {
                    lower: quantile_sorted(&sorted, self.lower_q),
                    upper: quantile_sorted(&sorted, self.upper_q),
                })
            })
            .collect();
        self
    }

    pub fn bounds(&self) -> &[Option<ClipBounds>] {
        &self.bounds
    }

    pub fn from_bounds(lower_q: f64, upper_q: f64, bounds: Vec<Option<ClipBounds>>) -> Self {
        Self {
            lower_q,
            upper_q,
            bounds,
        }
    }

    pub fn transform_inplace(&self, data: &mut Array2<f64>) -> Result<()> {
        if data.ncols() != self.bounds.len() {
            return Err(MamformerError::ShapeError {
                expected: format!("{} columns", self.bounds.len()),
                actual: format!("{} columns", data.ncols()),
            });
        }
        for (mut col, b) in data.axis_iter_mut(Axis(1)).zip(&self.bounds) {
            if let Some(b) = b {
                col.mapv_inplace(|v| v.clamp(b.lower, b.upper));
            }
        }
        Ok(())
    }
}
