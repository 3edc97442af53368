//! Training configuration

use crate::architectures::ModelType;
use crate::device::DevicePreference;
use crate::synthetic::{AugmentConfig, Augmenter};
use crate::error::{MamformerError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Every recognized option for one training job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TrainingConfig {
    /// Window length in timesteps
    pub seq_len: usize,

    /// Hidden width of the sequence model
    pub d_model: usize,

    /// Number of stacked blocks
    pub n_layers: usize,

    /// Dropout probability; `None` uses the architecture default
    pub dropout: Option<f64>,

    /// AdamW learning rate
    pub lr: f64,

    /// AdamW decoupled weight decay
    pub weight_decay: f64,

    pub batch_size: usize,

    pub epochs: usize,

    /// Number of input features kept by importance ranking
    pub top_k: usize,

    /// Ensemble size
    pub n_models: usize,

    pub model_type: ModelType,

    /// Fraction of rows held out for testing
    pub test_ratio: f64,

    /// Fraction of the remaining rows used for validation
    pub val_ratio: f64,

    /// Per-column quantile clipping applied before selection; `None` disables
    pub clip_quantiles: Option<(f64, f64)>,

    /// Training-batch perturbations
    pub augment: AugmentConfig,

    /// Trees per ensemble used for feature ranking
    pub selector_trees: usize,

    /// Base seed; member `m` is initialised from `seed + m`
    pub seed: u64,

    pub device: DevicePreference,

    /// Emit a progress record every this many epochs (first member only)
    pub progress_every: usize,

    /// Directory receiving the deployable checkpoint
    pub model_dir: PathBuf,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            seq_len: 12,
            d_model: 64,
            n_layers: 2,
            dropout: None,
            lr: 0.001,
            weight_decay: 0.01,
            batch_size: 32,
            epochs: 400,
            top_k: 12,
            n_models: 5,
            model_type: ModelType::Mamformer,
            test_ratio: 0.15,
            val_ratio: 0.15,
            clip_quantiles: Some((0.01, 0.99)),
            augment: AugmentConfig::default(),
            selector_trees: 50,
            seed: 42,
            device: DevicePreference::Auto,
            progress_every: 5,
            model_dir: PathBuf::from("model"),
        }
    }
}

impl TrainingConfig {
    pub fn new(model_type: ModelType) -> Self {
        Self {
            model_type,
            ..Self::default()
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| MamformerError::ConfigError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&text)
    }

    /// Dropout after resolving the per-architecture default
    pub fn effective_dropout(&self) -> f64 {
        self.dropout.unwrap_or_else(|| self.model_type.default_dropout())
    }

    pub fn with_seq_len(mut self, seq_len: usize) -> Self {
        self.seq_len = seq_len;
        self
    }

    pub fn with_d_model(mut self, d_model: usize) -> Self {
        self.d_model = d_model;
        self
    }

    pub fn with_n_layers(mut self, n_layers: usize) -> Self {
        self.n_layers = n_layers;
        self
    }

    pub fn with_dropout(mut self, dropout: f64) -> Self {
        self.dropout = Some(dropout);
        self
    }

    pub fn with_lr(mut self, lr: f64) -> Self {
        self.lr = lr;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_epochs(mut self, epochs: usize) -> Self {
        self.epochs = epochs;
        self
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn with_n_models(mut self, n_models: usize) -> Self {
        self.n_models = n_models;
        self
    }

    pub fn with_model_type(mut self, model_type: ModelType) -> Self {
        self.model_type = model_type;
        self
    }

    pub fn with_split_ratios(mut self, test_ratio: f64, val_ratio: f64) -> Self {
        self.test_ratio = test_ratio;
        self.val_ratio = val_ratio;
        self
    }

    pub fn with_clip_quantiles(mut self, quantiles: Option<(f64, f64)>) -> Self {
        self.clip_quantiles = quantiles;
        self
    }

    pub fn with_augment(mut self, augment: AugmentConfig) -> Self {
        self.augment = augment;
        self
    }

    pub fn with_selector_trees(mut self, n: usize) -> Self {
        self.selector_trees = n;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_device(mut self, device: DevicePreference) -> Self {
        self.device = device;
        self
    }

    pub fn with_progress_every(mut self, every: usize) -> Self {
        self.progress_every = every;
        self
    }

    pub fn with_model_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.model_dir = dir.into();
        self
    }

    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("seq_len", self.seq_len),
            ("d_model", self.d_model),
            ("n_layers", self.n_layers),
            ("batch_size", self.batch_size),
            ("epochs", self.epochs),
            ("top_k", self.top_k),
            ("n_models", self.n_models),
            ("selector_trees", self.selector_trees),
            ("progress_every", self.progress_every),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(MamformerError::invalid(name, value, "must be positive"));
            }
        }

        let heads = self.model_type.n_heads();
        if self.d_model % heads != 0 {
            return Err(MamformerError::invalid(
                "d_model",
                self.d_model,
                &format!("must be divisible by {} heads for {}", heads, self.model_type),
            ));
        }

        let dropout = self.effective_dropout();
        if !(0.0..1.0).contains(&dropout) {
            return Err(MamformerError::invalid("dropout", dropout, "must lie in [0, 1)"));
        }
        if !(self.lr.is_finite() && self.lr > 0.0) {
            return Err(MamformerError::invalid("lr", self.lr, "must be positive"));
        }
        if !(self.weight_decay.is_finite() && self.weight_decay >= 0.0) {
            return Err(MamformerError::invalid("weight_decay", self.weight_decay, "must be non-negative"));
        }

        for (name, ratio) in [("test_ratio", self.test_ratio), ("val_ratio", self.val_ratio)] {
            if !(ratio > 0.0 && ratio < 1.0) {
                return Err(MamformerError::invalid(name, ratio, "must lie in (0, 1)"));
            }
        }
        if self.test_ratio + self.val_ratio >= 1.0 {
            return Err(MamformerError::invalid(
                "test_ratio",
                self.test_ratio + self.val_ratio,
                "test_ratio + val_ratio must be below 1",
            ));
        }

        if let Some((lower, upper)) = self.clip_quantiles {
            if !(0.0..=1.0).contains(&lower) || !(0.0..=1.0).contains(&upper) || lower >= upper {
                return Err(MamformerError::invalid(
                    "clip_quantiles",
                    format!("({}, {})", lower, upper),
                    "expected 0 <= lower < upper <= 1",
                ));
            }
        }
        Augmenter::new(self.augment.clone())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TrainingConfig::default();
        assert_eq!(config.seq_len, 12);
        assert_eq!(config.epochs, 400);
        assert_eq!(config.n_models, 5);
        assert_eq!(config.effective_dropout(), 0.3);
        assert_eq!(TrainingConfig::new(ModelType::AutoMamformer).effective_dropout(), 0.15);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_pattern() {
        let config = TrainingConfig::default()
            .with_epochs(10)
            .with_n_models(2)
            .with_dropout(0.2)
            .with_model_dir("/tmp/models");
        assert_eq!(config.epochs, 10);
        assert_eq!(config.n_models, 2);
        assert_eq!(config.effective_dropout(), 0.2);
        assert_eq!(config.model_dir, PathBuf::from("/tmp/models"));
    }

    #[test]
    fn test_json_partial_and_unknown() {
        let config = TrainingConfig::from_json_str(
            r#"{"epochs": 20, "model_type": "auto-mamformer", "d_model": 32}"#,
        )
        .unwrap();
        assert_eq!(config.epochs, 20);
        assert_eq!(config.model_type, ModelType::AutoMamformer);
        assert_eq!(config.batch_size, 32);

        assert!(TrainingConfig::from_json_str(r#"{"epochz": 20}"#).is_err());
        assert!(TrainingConfig::from_json_str(r#"{"model_type": "lstm"}"#).is_err());
    }

    #[test]
    fn test_validation_rejects() {
        assert!(TrainingConfig::default().with_epochs(0).validate().is_err());
        assert!(TrainingConfig::default().with_seq_len(0).validate().is_err());
        assert!(TrainingConfig::default().with_dropout(1.0).validate().is_err());
        assert!(TrainingConfig::default().with_lr(0.0).validate().is_err());
        assert!(TrainingConfig::default().with_split_ratios(0.6, 0.4).validate().is_err());
        assert!(TrainingConfig::default()
            .with_clip_quantiles(Some((0.9, 0.1)))
            .validate()
            .is_err());
        // 36 is divisible by 4 but not by 8
        let auto = TrainingConfig::new(ModelType::AutoMamformer).with_d_model(36);
        assert!(auto.validate().is_err());
        assert!(auto.with_model_type(ModelType::Mamformer).validate().is_ok());
    }
}
