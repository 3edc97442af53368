//! Sequence model architectures
//!
//! Two closed variants share one interface through [`SequenceModel`]:
//! - [`Mamformer`]: gated convolution, self-attention and gated MLP blocks
//! - [`AutoMamformer`]: gated convolution fused with series decomposition
//!   and auto-correlation, plus linear and autoregressive shortcuts

pub mod auto_mamformer;
pub mod layers;
pub mod mamformer;
pub mod params;

pub use auto_mamformer::AutoMamformer;
pub use mamformer::Mamformer;
pub use params::{InitScheme, ParamSnapshot, ParamStore, Pass};

use crate::error::{MamformerError, Result};
use candle_core::{Device, Tensor, Var};
use ndarray::Array3;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ModelType {
    #[default]
    #[serde(rename = "mamformer")]
    Mamformer,
    #[serde(rename = "auto-mamformer")]
    AutoMamformer,
}

impl ModelType {
    pub fn n_heads(&self) -> usize {
        match self {
            ModelType::Mamformer => mamformer::MAMFORMER_HEADS,
            ModelType::AutoMamformer => auto_mamformer::AUTO_MAMFORMER_HEADS,
        }
    }

    pub fn default_dropout(&self) -> f64 {
        match self {
            ModelType::Mamformer => 0.3,
            ModelType::AutoMamformer => 0.15,
        }
    }

    fn init_scheme(&self) -> InitScheme {
        match self {
            ModelType::Mamformer => InitScheme::FanIn,
            ModelType::AutoMamformer => InitScheme::Scaled,
        }
    }
}

impl fmt::Display for ModelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelType::Mamformer => write!(f, "mamformer"),
            ModelType::AutoMamformer => write!(f, "auto-mamformer"),
        }
    }
}

impl std::str::FromStr for ModelType {
    type Err = MamformerError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "mamformer" => Ok(ModelType::Mamformer),
            "auto-mamformer" => Ok(ModelType::AutoMamformer),
            other => Err(MamformerError::invalid(
                "model_type",
                other,
                "expected mamformer or auto-mamformer",
            )),
        }
    }
}

/// Shape hyperparameters needed to rebuild a network
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelSpec {
    pub input_dim: usize,
    pub seq_len: usize,
    pub d_model: usize,
    pub n_layers: usize,
    pub dropout: f64,
}

enum Network {
    Mamformer(Mamformer),
    AutoMamformer(AutoMamformer),
}

/// A network together with the parameters it was built from
pub struct SequenceModel {
    kind: ModelType,
    spec: ModelSpec,
    network: Network,
    store: ParamStore,
}

impl SequenceModel {
    pub fn build(kind: ModelType, spec: &ModelSpec, device: &Device, seed: u64) -> Result<Self> {
        if spec.input_dim == 0 || spec.seq_len == 0 {
            return Err(MamformerError::invalid(
                "spec",
                format!("{:?}", spec),
                "input_dim and seq_len must be positive",
            ));
        }
        let mut store = ParamStore::new(device, seed, kind.init_scheme());
        let network = match kind {
            ModelType::Mamformer => Network::Mamformer(Mamformer::new(&mut store, spec)?),
            ModelType::AutoMamformer => Network::AutoMamformer(AutoMamformer::new(&mut store, spec)?),
        };
        Ok(Self {
            kind,
            spec: *spec,
            network,
            store,
        })
    }

    pub fn kind(&self) -> ModelType {
        self.kind
    }

    pub fn spec(&self) -> &ModelSpec {
        &self.spec
    }

    pub fn device(&self) -> &Device {
        self.store.device()
    }

    /// `(batch, seq_len, input_dim)` -> `(batch,)`
    pub fn forward(&self, xs: &Tensor, pass: &mut Pass) -> candle_core::Result<Tensor> {
        match &self.network {
            Network::Mamformer(net) => net.forward(xs, pass),
            Network::AutoMamformer(net) => net.forward(xs, pass),
        }
    }

    /// Evaluation-mode predictions for every window, in order
    pub fn predict(&self, windows: &Array3<f64>, batch_size: usize) -> Result<Vec<f64>> {
        let n = windows.dim().0;
        let indices: Vec<usize> = (0..n).collect();
        let mut out = Vec::with_capacity(n);
        for chunk in indices.chunks(batch_size.max(1)) {
            let xs = windows_tensor(windows, chunk, self.device())?;
            let ys = self.forward(&xs, &mut Pass::eval())?;
            out.extend(ys.to_vec1::<f32>()?.into_iter().map(f64::from));
        }
        Ok(out)
    }

    pub fn vars(&self) -> Vec<Var> {
        self.store.all_vars()
    }

    pub fn num_parameters(&self) -> usize {
        self.store.num_parameters()
    }

    pub fn snapshot(&self) -> Result<ParamSnapshot> {
        Ok(self.store.snapshot()?)
    }

    pub fn restore(&self, snapshot: &ParamSnapshot) -> Result<()> {
        Ok(self.store.restore(snapshot)?)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        self.store
            .save(path)
            .map_err(|e| MamformerError::PersistenceError(format!("{}: {}", path.display(), e)))
    }

    pub fn load(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        self.store
            .load(path)
            .map_err(|e| MamformerError::PersistenceError(format!("{}: {}", path.display(), e)))
    }
}

/// Gather the selected windows into an f32 `(batch, seq_len, features)` tensor
pub fn windows_tensor(windows: &Array3<f64>, indices: &[usize], device: &Device) -> Result<Tensor> {
    let (_, l, f) = windows.dim();
    let mut data = Vec::with_capacity(indices.len() * l * f);
    for &i in indices {
        data.extend(windows.index_axis(ndarray::Axis(0), i).iter().map(|&v| v as f32));
    }
    Ok(Tensor::from_vec(data, (indices.len(), l, f), device)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(d_model: usize) -> ModelSpec {
        ModelSpec {
            input_dim: 3,
            seq_len: 6,
            d_model,
            n_layers: 2,
            dropout: 0.1,
        }
    }

    fn sample_windows(n: usize) -> Array3<f64> {
        Array3::from_shape_fn((n, 6, 3), |(i, t, f)| ((i + t) as f64 * 0.1 + f as f64).sin())
    }

    #[test]
    fn test_model_type_names() {
        assert_eq!("auto-mamformer".parse::<ModelType>().unwrap(), ModelType::AutoMamformer);
        assert!("transformer".parse::<ModelType>().is_err());
        assert_eq!(serde_json::to_string(&ModelType::AutoMamformer).unwrap(), "\"auto-mamformer\"");
        assert_eq!(ModelType::Mamformer.to_string(), "mamformer");
    }

    #[test]
    fn test_forward_shapes() {
        let windows = sample_windows(5);
        for (kind, d) in [(ModelType::Mamformer, 8), (ModelType::AutoMamformer, 16)] {
            let model = SequenceModel::build(kind, &spec(d), &Device::Cpu, 7).unwrap();
            let preds = model.predict(&windows, 2).unwrap();
            assert_eq!(preds.len(), 5);
            assert!(preds.iter().all(|p| p.is_finite()));
        }
    }

    #[test]
    fn test_head_divisibility() {
        assert!(SequenceModel::build(ModelType::Mamformer, &spec(6), &Device::Cpu, 0).is_err());
        assert!(SequenceModel::build(ModelType::AutoMamformer, &spec(12), &Device::Cpu, 0).is_err());
    }

    #[test]
    fn test_same_seed_same_predictions() {
        let windows = sample_windows(4);
        let a = SequenceModel::build(ModelType::AutoMamformer, &spec(16), &Device::Cpu, 3).unwrap();
        let b = SequenceModel::build(ModelType::AutoMamformer, &spec(16), &Device::Cpu, 3).unwrap();
        assert_eq!(a.predict(&windows, 4).unwrap(), b.predict(&windows, 4).unwrap());
        assert_eq!(a.num_parameters(), b.num_parameters());
    }

    #[test]
    fn test_gradients_reach_parameters() {
        let model = SequenceModel::build(ModelType::Mamformer, &spec(8), &Device::Cpu, 1).unwrap();
        let windows = sample_windows(3);
        let xs = windows_tensor(&windows, &[0, 1, 2], &Device::Cpu).unwrap();
        let loss = model.forward(&xs, &mut Pass::eval()).unwrap().sqr().unwrap().mean_all().unwrap();
        let grads = loss.backward().unwrap();
        let with_grad = model.vars().iter().filter(|v| grads.get(v.as_tensor()).is_some()).count();
        assert!(with_grad > 0);
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("weights.safetensors");
        let windows = sample_windows(3);

        let model = SequenceModel::build(ModelType::Mamformer, &spec(8), &Device::Cpu, 5).unwrap();
        model.save(&path).unwrap();

        let mut other = SequenceModel::build(ModelType::Mamformer, &spec(8), &Device::Cpu, 99).unwrap();
        assert_ne!(model.predict(&windows, 8).unwrap(), other.predict(&windows, 8).unwrap());
        other.load(&path).unwrap();
        assert_eq!(model.predict(&windows, 8).unwrap(), other.predict(&windows, 8).unwrap());
    }
}
