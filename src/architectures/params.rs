//! Seeded parameter registry and forward-pass context.
//!
//! Every trainable tensor is drawn from the store's own ChaCha8 stream and
//! registered in a [`VarMap`], so two stores built with the same seed hold
//! bit-identical weights regardless of the compute device.

use super::layers::{DepthwiseConv1d, LayerNorm};
use candle_core::{Device, Result, Tensor, Var};
use candle_nn::{Linear, VarMap};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};
use std::collections::HashMap;
use std::path::Path;

/// Weight initialization family
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitScheme {
    /// Uniform in `±1/sqrt(fan_in)` for weights and biases
    FanIn,
    /// Xavier-uniform (gain 0.5) linear weights with zero bias and
    /// Kaiming-normal (fan-out) convolution kernels
    Scaled,
}

pub struct ParamStore {
    varmap: VarMap,
    device: Device,
    rng: ChaCha8Rng,
    scheme: InitScheme,
}

/// Detached copy of every parameter, keyed by name
#[derive(Debug, Clone)]
pub struct ParamSnapshot {
    tensors: HashMap<String, Tensor>,
}

impl ParamStore {
    pub fn new(device: &Device, seed: u64, scheme: InitScheme) -> Self {
        Self {
            varmap: VarMap::new(),
            device: device.clone(),
            rng: ChaCha8Rng::seed_from_u64(seed),
            scheme,
        }
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn varmap(&self) -> &VarMap {
        &self.varmap
    }

    pub fn all_vars(&self) -> Vec<Var> {
        self.varmap.all_vars()
    }

    pub fn num_parameters(&self) -> usize {
        self.all_vars().iter().map(|v| v.elem_count()).sum()
    }

    fn register(&mut self, name: &str, values: Vec<f32>, shape: &[usize]) -> Result<Tensor> {
        let t = Tensor::from_vec(values, shape, &self.device)?;
        let var = Var::from_tensor(&t)?;
        let tensor = var.as_tensor().clone();
        let mut data = self
            .varmap
            .data()
            .lock()
            .map_err(|_| candle_core::Error::Msg("parameter map lock poisoned".into()))?;
        if data.contains_key(name) {
            return Err(candle_core::Error::Msg(format!("duplicate parameter '{}'", name)));
        }
        data.insert(name.to_string(), var);
        Ok(tensor)
    }

    fn uniform(&mut self, n: usize, bound: f64) -> Vec<f32> {
        (0..n)
            .map(|_| self.rng.gen_range(-bound..=bound) as f32)
            .collect()
    }

    fn normal(&mut self, n: usize, std: f64) -> Result<Vec<f32>> {
        let dist = Normal::new(0.0, std).map_err(|e| candle_core::Error::Msg(e.to_string()))?;
        Ok((0..n).map(|_| dist.sample(&mut self.rng) as f32).collect())
    }

    pub fn constant(&mut self, name: &str, shape: &[usize], value: f32) -> Result<Tensor> {
        let n = shape.iter().product();
        self.register(name, vec![value; n], shape)
    }

    /// Values from an explicit initializer
    pub fn from_values(&mut self, name: &str, shape: &[usize], values: Vec<f32>) -> Result<Tensor> {
        self.register(name, values, shape)
    }

    pub fn gaussian(&mut self, name: &str, shape: &[usize], std: f64) -> Result<Tensor> {
        let values = self.normal(shape.iter().product(), std)?;
        self.register(name, values, shape)
    }

    /// Dense layer mapping `in_dim -> out_dim`
    pub fn linear(&mut self, name: &str, in_dim: usize, out_dim: usize) -> Result<Linear> {
        let n = in_dim * out_dim;
        let (weight, bias) = match self.scheme {
            InitScheme::FanIn => {
                let bound = 1.0 / (in_dim as f64).sqrt();
                (self.uniform(n, bound), self.uniform(out_dim, bound))
            }
            InitScheme::Scaled => {
                let bound = 0.5 * (6.0 / (in_dim + out_dim) as f64).sqrt();
                (self.uniform(n, bound), vec![0.0; out_dim])
            }
        };
        let w = self.register(&format!("{name}.weight"), weight, &[out_dim, in_dim])?;
        let b = self.register(&format!("{name}.bias"), bias, &[out_dim])?;
        Ok(Linear::new(w, Some(b)))
    }

    pub fn layer_norm(&mut self, name: &str, dim: usize) -> Result<LayerNorm> {
        let w = self.constant(&format!("{name}.weight"), &[dim], 1.0)?;
        let b = self.constant(&format!("{name}.bias"), &[dim], 0.0)?;
        Ok(LayerNorm::new(w, b, 1e-5))
    }

    /// Per-channel temporal convolution, kernel stored as `(channels, 1, kernel)`
    pub fn depthwise_conv(&mut self, name: &str, channels: usize, kernel: usize) -> Result<DepthwiseConv1d> {
        let n = channels * kernel;
        let bias_bound = 1.0 / (kernel as f64).sqrt();
        let weight = match self.scheme {
            InitScheme::FanIn => self.uniform(n, bias_bound),
            InitScheme::Scaled => self.normal(n, (2.0 / n as f64).sqrt())?,
        };
        let bias = self.uniform(channels, bias_bound);
        let w = self.register(&format!("{name}.weight"), weight, &[channels, 1, kernel])?;
        let b = self.register(&format!("{name}.bias"), bias, &[channels])?;
        DepthwiseConv1d::new(w, b)
    }

    /// Copy every parameter's current value
    pub fn snapshot(&self) -> Result<ParamSnapshot> {
        let data = self
            .varmap
            .data()
            .lock()
            .map_err(|_| candle_core::Error::Msg("parameter map lock poisoned".into()))?;
        let mut tensors = HashMap::with_capacity(data.len());
        for (name, var) in data.iter() {
            let t = var.as_tensor();
            let values = t.flatten_all()?.to_vec1::<f32>()?;
            tensors.insert(name.clone(), Tensor::from_vec(values, t.dims(), &self.device)?);
        }
        Ok(ParamSnapshot { tensors })
    }

    /// Overwrite parameters in place from a snapshot
    pub fn restore(&self, snapshot: &ParamSnapshot) -> Result<()> {
        let data = self
            .varmap
            .data()
            .lock()
            .map_err(|_| candle_core::Error::Msg("parameter map lock poisoned".into()))?;
        for (name, var) in data.iter() {
            let t = snapshot
                .tensors
                .get(name)
                .ok_or_else(|| candle_core::Error::Msg(format!("snapshot missing '{}'", name)))?;
            var.set(t)?;
        }
        Ok(())
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        self.varmap.save(path)
    }

    /// Load weights into the already-registered parameters
    pub fn load(&mut self, path: impl AsRef<Path>) -> Result<()> {
        self.varmap.load(path)
    }
}

/// Forward-pass mode. Training passes carry the RNG that draws dropout
/// masks; evaluation passes are deterministic.
pub struct Pass<'a> {
    rng: Option<&'a mut ChaCha8Rng>,
}

impl<'a> Pass<'a> {
    pub fn train(rng: &'a mut ChaCha8Rng) -> Self {
        Self { rng: Some(rng) }
    }

    pub fn eval() -> Pass<'static> {
        Pass { rng: None }
    }

    pub fn is_train(&self) -> bool {
        self.rng.is_some()
    }

    /// Inverted dropout: surviving activations are scaled by `1/(1-p)`
    pub fn dropout(&mut self, xs: &Tensor, p: f64) -> Result<Tensor> {
        let Some(rng) = self.rng.as_deref_mut() else {
            return Ok(xs.clone());
        };
        if p <= 0.0 {
            return Ok(xs.clone());
        }
        let keep = 1.0 - p;
        let scale = (1.0 / keep) as f32;
        let mask: Vec<f32> = (0..xs.elem_count())
            .map(|_| if rng.gen::<f64>() < keep { scale } else { 0.0 })
            .collect();
        let mask = Tensor::from_vec(mask, xs.dims(), xs.device())?.to_dtype(xs.dtype())?;
        xs.mul(&mask)
    }
}
