//! Ensemble training loop
//!
//! Members are trained one after another, each from its own seed. After
//! every epoch a full validation pass is scored on the original target
//! scale and the parameters of the best epoch (by R²) are kept; they, not
//! the last epoch's, become the member's trained state.

use super::config::TrainingConfig;
use super::metrics::RegressionMetrics;
use super::progress::{overall_progress, EpochMetrics, ProgressEvent, ProgressSink};
use crate::architectures::{windows_tensor, ModelSpec, ModelType, Pass, SequenceModel};
use crate::error::{MamformerError, Result};
use crate::preprocessing::RobustScaler;
use crate::synthetic::{AugmentConfig, Augmenter};
use crate::timeseries::WindowedSamples;
use candle_core::{Device, Tensor};
use candle_nn::{AdamW, Optimizer, ParamsAdamW};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::{debug, info};

/// Hyperparameters of the ensemble loop
#[derive(Debug, Clone)]
pub struct TrainerSettings {
    pub model_type: ModelType,
    pub spec: ModelSpec,
    pub lr: f64,
    pub weight_decay: f64,
    pub batch_size: usize,
    pub epochs: usize,
    pub n_models: usize,
    pub seed: u64,
    pub progress_every: usize,
    pub augment: AugmentConfig,
}

impl TrainerSettings {
    pub fn from_config(config: &TrainingConfig, input_dim: usize) -> Self {
        Self {
            model_type: config.model_type,
            spec: ModelSpec {
                input_dim,
                seq_len: config.seq_len,
                d_model: config.d_model,
                n_layers: config.n_layers,
                dropout: config.effective_dropout(),
            },
            lr: config.lr,
            weight_decay: config.weight_decay,
            batch_size: config.batch_size,
            epochs: config.epochs,
            n_models: config.n_models,
            seed: config.seed,
            progress_every: config.progress_every.max(1),
            augment: config.augment.clone(),
        }
    }
}

/// One trained ensemble member, holding its best-validation parameters
pub struct TrainedMember {
    pub index: usize,
    pub model: SequenceModel,
    pub best_val_r2: f64,
    pub best_epoch: Option<usize>,
    /// Validation R² after the last epoch, before the best state was restored
    pub final_val_r2: f64,
}

pub struct EnsembleTrainer<'a> {
    settings: TrainerSettings,
    scaler: &'a RobustScaler,
    target_index: usize,
    device: Device,
    sink: &'a dyn ProgressSink,
}

impl<'a> EnsembleTrainer<'a> {
    pub fn new(
        settings: TrainerSettings,
        scaler: &'a RobustScaler,
        target_index: usize,
        device: Device,
        sink: &'a dyn ProgressSink,
    ) -> Self {
        Self {
            settings,
            scaler,
            target_index,
            device,
            sink,
        }
    }

    pub fn settings(&self) -> &TrainerSettings {
        &self.settings
    }

    /// Train every member in turn; any failure discards the whole ensemble
    pub fn train(&self, train: &WindowedSamples, val: &WindowedSamples) -> Result<Vec<TrainedMember>> {
        if train.is_empty() || val.is_empty() {
            return Err(MamformerError::InsufficientData {
                what: "ensemble training windows".to_string(),
                required: 1,
                available: train.len().min(val.len()),
            });
        }
        (0..self.settings.n_models)
            .map(|member| self.train_member(member, train, val))
            .collect()
    }

    fn train_member(&self, member: usize, train: &WindowedSamples, val: &WindowedSamples) -> Result<TrainedMember> {
        let s = &self.settings;
        let seed = s.seed.wrapping_add(member as u64);
        let model = SequenceModel::build(s.model_type, &s.spec, &self.device, seed)?;
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        rng.set_stream(1);

        let params = ParamsAdamW {
            lr: s.lr,
            weight_decay: s.weight_decay,
            ..Default::default()
        };
        let mut optimizer = AdamW::new(model.vars(), params)?;
        let augmenter = Augmenter::new(s.augment.clone())?;

        info!(
            member,
            model = %s.model_type,
            parameters = model.num_parameters(),
            train_windows = train.len(),
            val_windows = val.len(),
            "training ensemble member"
        );

        let mut order: Vec<usize> = (0..train.len()).collect();
        let mut best_r2 = f64::NEG_INFINITY;
        let mut best_epoch = None;
        let mut best_state = None;
        let mut last_r2 = f64::NAN;

        for epoch in 0..s.epochs {
            order.shuffle(&mut rng);
            let mut losses = Vec::with_capacity(order.len().div_ceil(s.batch_size));

            for chunk in order.chunks(s.batch_size) {
                let (xs, ys) = self.augmented_batch(&augmenter, train, chunk, &mut rng)?;
                let preds = model.forward(&xs, &mut Pass::train(&mut rng))?;
                let loss = candle_nn::loss::mse(&preds, &ys)?;
                let value = f64::from(loss.to_scalar::<f32>()?);
                if !value.is_finite() {
                    return Err(MamformerError::NonFiniteLoss { member, epoch });
                }
                optimizer.backward_step(&loss)?;
                losses.push(value);
            }
            let train_loss = losses.iter().sum::<f64>() / losses.len().max(1) as f64;

            let (val_loss, metrics) = self.validate(&model, val)?;
            last_r2 = metrics.r2;
            if metrics.r2 > best_r2 {
                best_r2 = metrics.r2;
                best_epoch = Some(epoch);
                best_state = Some(model.snapshot()?);
                debug!(member, epoch, val_r2 = metrics.r2, "new best checkpoint");
            }

            if member == 0 && epoch % s.progress_every == 0 {
                let epoch_metrics = EpochMetrics::new(&metrics, val_loss);
                let event = ProgressEvent {
                    overall_progress: overall_progress(member, epoch, s.n_models, s.epochs),
                    epoch,
                    train_loss: super::metrics::sanitize(train_loss),
                    val_r2: epoch_metrics.val_r2,
                    metrics: epoch_metrics,
                };
                debug!(epoch, progress = event.overall_progress, train_loss, val_loss, "progress");
                self.sink.emit(&event)?;
            }
        }

        if let Some(state) = &best_state {
            model.restore(state)?;
        }
        info!(member, best_epoch = ?best_epoch, best_val_r2 = best_r2, "member finished");

        Ok(TrainedMember {
            index: member,
            model,
            best_val_r2: best_r2,
            best_epoch,
            final_val_r2: last_r2,
        })
    }

    fn augmented_batch(
        &self,
        augmenter: &Augmenter,
        samples: &WindowedSamples,
        indices: &[usize],
        rng: &mut ChaCha8Rng,
    ) -> Result<(Tensor, Tensor)> {
        let (l, f) = (samples.seq_len(), samples.n_features());
        let mut xs = Vec::with_capacity(indices.len() * l * f);
        let mut ys = Vec::with_capacity(indices.len());
        for &i in indices {
            let (window, label) = augmenter.sample(samples, i, rng);
            xs.extend(window.iter().map(|&v| v as f32));
            ys.push(label as f32);
        }
        Ok((
            Tensor::from_vec(xs, (indices.len(), l, f), &self.device)?,
            Tensor::from_vec(ys, indices.len(), &self.device)?,
        ))
    }

    /// Mean per-batch loss in scaled space, and metrics on the original scale
    fn validate(&self, model: &SequenceModel, val: &WindowedSamples) -> Result<(f64, RegressionMetrics)> {
        let bs = self.settings.batch_size;
        let indices: Vec<usize> = (0..val.len()).collect();
        let mut preds = Vec::with_capacity(val.len());
        let mut losses = Vec::new();

        for chunk in indices.chunks(bs) {
            let xs = windows_tensor(&val.x, chunk, &self.device)?;
            let out: Vec<f64> = model
                .forward(&xs, &mut Pass::eval())?
                .to_vec1::<f32>()?
                .into_iter()
                .map(f64::from)
                .collect();
            let mse = chunk
                .iter()
                .zip(&out)
                .map(|(&i, &p)| (p - val.y[i]).powi(2))
                .sum::<f64>()
                / chunk.len() as f64;
            losses.push(mse);
            preds.extend(out);
        }
        let val_loss = losses.iter().sum::<f64>() / losses.len().max(1) as f64;

        let y_pred = self.scaler.inverse_column(self.target_index, &preds)?.to_vec();
        let y_true = self.scaler.inverse_column(self.target_index, &val.y.to_vec())?.to_vec();
        let metrics = RegressionMetrics::compute(&y_true, &y_pred);
        Ok((val_loss, metrics))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timeseries::Windower;
    use crate::training::progress::CollectingSink;
    use ndarray::Array2;

    fn settings(epochs: usize, n_models: usize) -> TrainerSettings {
        TrainerSettings {
            model_type: ModelType::Mamformer,
            spec: ModelSpec { input_dim: 2, seq_len: 4, d_model: 8, n_layers: 1, dropout: 0.1 },
            lr: 0.01,
            weight_decay: 0.0,
            batch_size: 8,
            epochs,
            n_models,
            seed: 1,
            progress_every: 5,
            augment: AugmentConfig::default(),
        }
    }

    fn windows(n: usize) -> WindowedSamples {
        let data = Array2::from_shape_fn((n, 2), |(i, j)| {
            let t = i as f64 * 0.3;
            if j == 0 { t.sin() } else { t.cos() }
        });
        Windower::new(4, 1).unwrap().build(&data).unwrap()
    }

    #[test]
    fn test_single_member_single_epoch() {
        let scaler = RobustScaler::from_params(vec![
            crate::preprocessing::ScalerParams { center: 0.0, scale: 1.0 };
            2
        ]);
        let sink = CollectingSink::new();
        let trainer = EnsembleTrainer::new(settings(1, 1), &scaler, 1, Device::Cpu, &sink);
        let members = trainer.train(&windows(30), &windows(12)).unwrap();

        assert_eq!(members.len(), 1);
        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].epoch, 0);
        assert_eq!(events[0].overall_progress, 0.0);
        assert!(members[0].best_val_r2 >= members[0].final_val_r2 || members[0].final_val_r2.is_nan());
    }

    #[test]
    fn test_progress_only_first_member() {
        let scaler = RobustScaler::from_params(vec![
            crate::preprocessing::ScalerParams { center: 0.0, scale: 1.0 };
            2
        ]);
        let sink = CollectingSink::new();
        let trainer = EnsembleTrainer::new(settings(6, 2), &scaler, 1, Device::Cpu, &sink);
        let members = trainer.train(&windows(24), &windows(10)).unwrap();

        assert_eq!(members.len(), 2);
        let epochs: Vec<usize> = sink.events().iter().map(|e| e.epoch).collect();
        assert_eq!(epochs, vec![0, 5]);
        let progress: Vec<f64> = sink.events().iter().map(|e| e.overall_progress).collect();
        assert!(progress.windows(2).all(|w| w[0] <= w[1]));
        for m in &members {
            assert!(m.best_epoch.is_some());
            assert!(m.best_val_r2 >= m.final_val_r2);
        }
    }
}
