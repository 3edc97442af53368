//! Data preprocessing module
//!
//! - Quantile clipping of extreme feature values
//! - Robust (median / IQR) scaling fitted on the training split
//! - Tree-importance feature selection

pub mod feature_selection;
pub mod outlier;
mod scaler;

pub use feature_selection::{FeatureSelection, FeatureSelector};
pub use outlier::{ClipBounds, QuantileClipper};
pub use scaler::{RobustScaler, ScalerParams};

/// Linear-interpolated quantile of an ascending slice
pub(crate) fn quantile_sorted(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let pos = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}
