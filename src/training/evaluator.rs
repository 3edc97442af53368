//! Ensemble evaluation on the test windows

use super::ensemble::TrainedMember;
use super::metrics::RegressionMetrics;
use crate::error::{MamformerError, Result};
use crate::preprocessing::RobustScaler;
use crate::timeseries::WindowedSamples;
use tracing::info;

/// Averaged ensemble predictions on the original scale, aligned with the
/// true test values
#[derive(Debug, Clone)]
pub struct EnsembleEvaluation {
    pub metrics: RegressionMetrics,
    pub predictions: Vec<f64>,
    pub true_values: Vec<f64>,
}

pub struct Evaluator<'a> {
    scaler: &'a RobustScaler,
    target_index: usize,
    batch_size: usize,
}

impl<'a> Evaluator<'a> {
    pub fn new(scaler: &'a RobustScaler, target_index: usize, batch_size: usize) -> Self {
        Self {
            scaler,
            target_index,
            batch_size: batch_size.max(1),
        }
    }

    /// Unweighted mean of every member's predictions
    pub fn evaluate(&self, members: &[TrainedMember], test: &WindowedSamples) -> Result<EnsembleEvaluation> {
        if members.is_empty() {
            return Err(MamformerError::ModelNotFitted);
        }

        let mut sum = vec![0.0; test.len()];
        for member in members {
            let preds = member.model.predict(&test.x, self.batch_size)?;
            for (acc, p) in sum.iter_mut().zip(preds) {
                *acc += p;
            }
        }
        let n = members.len() as f64;
        let averaged: Vec<f64> = sum.into_iter().map(|v| v / n).collect();

        let predictions = self.scaler.inverse_column(self.target_index, &averaged)?.to_vec();
        let true_values = self.scaler.inverse_column(self.target_index, &test.y.to_vec())?.to_vec();
        let metrics = RegressionMetrics::compute(&true_values, &predictions);
        info!(
            members = members.len(),
            samples = test.len(),
            r2 = metrics.r2,
            rmse = metrics.rmse,
            mae = metrics.mae,
            mape = metrics.mape,
            "ensemble evaluated"
        );

        Ok(EnsembleEvaluation {
            metrics,
            predictions,
            true_values,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::architectures::{ModelSpec, ModelType, SequenceModel};
    use crate::preprocessing::ScalerParams;
    use crate::timeseries::Windower;
    use candle_core::Device;
    use ndarray::Array2;

    fn member(index: usize, seed: u64) -> TrainedMember {
        let spec = ModelSpec { input_dim: 2, seq_len: 3, d_model: 8, n_layers: 1, dropout: 0.0 };
        TrainedMember {
            index,
            model: SequenceModel::build(ModelType::Mamformer, &spec, &Device::Cpu, seed).unwrap(),
            best_val_r2: 0.0,
            best_epoch: Some(0),
            final_val_r2: 0.0,
        }
    }

    #[test]
    fn test_average_matches_members() {
        let data = Array2::from_shape_fn((10, 2), |(i, j)| (i + j) as f64 * 0.1);
        let test = Windower::new(3, 1).unwrap().build(&data).unwrap();
        let scaler = RobustScaler::from_params(vec![ScalerParams { center: 1.0, scale: 2.0 }; 2]);
        let members = vec![member(0, 1), member(1, 2)];

        let eval = Evaluator::new(&scaler, 1, 4).evaluate(&members, &test).unwrap();
        assert_eq!(eval.predictions.len(), test.len());
        assert_eq!(eval.true_values.len(), test.len());

        let a = members[0].model.predict(&test.x, 4).unwrap();
        let b = members[1].model.predict(&test.x, 4).unwrap();
        let expected = ((a[0] + b[0]) / 2.0) * 2.0 + 1.0;
        assert!((eval.predictions[0] - expected).abs() < 1e-9);
        assert!((eval.true_values[0] - (test.y[0] * 2.0 + 1.0)).abs() < 1e-12);
    }

    #[test]
    fn test_empty_ensemble() {
        let data = Array2::from_elem((4, 2), 1.0);
        let test = Windower::new(3, 1).unwrap().build(&data).unwrap();
        let scaler = RobustScaler::from_params(vec![ScalerParams { center: 0.0, scale: 1.0 }; 2]);
        assert!(Evaluator::new(&scaler, 1, 4).evaluate(&[], &test).is_err());
    }
}
