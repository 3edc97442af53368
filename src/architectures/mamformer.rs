//! Mamformer: stacked (gated convolution -> self-attention -> gated MLP)
//! blocks over a projected window, read out through a flattening MLP head.

use super::layers::{gelu, DepthwiseConv1d, LayerNorm};
use super::params::{ParamStore, Pass};
use super::ModelSpec;
use candle_core::{Module, Result, Tensor, D};
use candle_nn::ops::sigmoid;
use candle_nn::Linear;

pub const MAMFORMER_HEADS: usize = 4;

/// Pre-normalized convolutional state-space approximation
struct MiniMamba {
    norm: LayerNorm,
    conv: DepthwiseConv1d,
    proj: Linear,
    dropout: f64,
}

impl MiniMamba {
    fn new(store: &mut ParamStore, name: &str, d_model: usize, dropout: f64) -> Result<Self> {
        Ok(Self {
            norm: store.layer_norm(&format!("{name}.norm"), d_model)?,
            conv: store.depthwise_conv(&format!("{name}.conv"), d_model, 3)?,
            proj: store.linear(&format!("{name}.proj"), d_model, d_model)?,
            dropout,
        })
    }

    fn forward(&self, xs: &Tensor, pass: &mut Pass) -> Result<Tensor> {
        let h = self.norm.forward(xs)?;
        let h = gelu(&self.conv.forward(&h)?)?;
        let h = (self.proj.forward(&h)? * sigmoid(&h)?)?;
        let h = pass.dropout(&h, self.dropout)?;
        h + xs
    }
}

/// Pre-normalized multi-head scaled dot-product self-attention
struct MiniAttention {
    norm: LayerNorm,
    qkv: Linear,
    fc: Linear,
    n_heads: usize,
    dropout: f64,
}

impl MiniAttention {
    fn new(store: &mut ParamStore, name: &str, d_model: usize, n_heads: usize, dropout: f64) -> Result<Self> {
        Ok(Self {
            norm: store.layer_norm(&format!("{name}.norm"), d_model)?,
            qkv: store.linear(&format!("{name}.qkv"), d_model, 3 * d_model)?,
            fc: store.linear(&format!("{name}.fc"), d_model, d_model)?,
            n_heads,
            dropout,
        })
    }

    fn forward(&self, xs: &Tensor, pass: &mut Pass) -> Result<Tensor> {
        let (b, l, d) = xs.dims3()?;
        let head_dim = d / self.n_heads;

        let h = self.norm.forward(xs)?;
        let qkv = self.qkv.forward(&h)?.chunk(3, D::Minus1)?;
        let split = |t: &Tensor| -> Result<Tensor> {
            t.reshape((b, l, self.n_heads, head_dim))?.transpose(1, 2)?.contiguous()
        };
        let (q, k, v) = (split(&qkv[0])?, split(&qkv[1])?, split(&qkv[2])?);

        let scores = (q.matmul(&k.t()?)? / (head_dim as f64).sqrt())?;
        let attn = candle_nn::ops::softmax(&scores, D::Minus1)?;
        let attn = pass.dropout(&attn, self.dropout)?;

        let out = attn.matmul(&v)?.transpose(1, 2)?.reshape((b, l, d))?;
        let out = self.fc.forward(&out)?;
        let out = pass.dropout(&out, self.dropout)?;
        out + xs
    }
}

/// GELU-gated feed-forward with residual
struct GatedMlp {
    norm: LayerNorm,
    fc1: Linear,
    fc2: Linear,
    dropout: f64,
}

impl GatedMlp {
    fn new(store: &mut ParamStore, name: &str, d_model: usize, expansion: usize, dropout: f64) -> Result<Self> {
        let inner = d_model * expansion;
        Ok(Self {
            norm: store.layer_norm(&format!("{name}.norm"), d_model)?,
            fc1: store.linear(&format!("{name}.fc1"), d_model, 2 * inner)?,
            fc2: store.linear(&format!("{name}.fc2"), inner, d_model)?,
            dropout,
        })
    }

    fn forward(&self, xs: &Tensor, pass: &mut Pass) -> Result<Tensor> {
        let h = self.fc1.forward(&self.norm.forward(xs)?)?;
        let parts = h.chunk(2, D::Minus1)?;
        let h = (gelu(&parts[0])? * &parts[1])?;
        let h = pass.dropout(&h, self.dropout)?;
        self.fc2.forward(&h)? + xs
    }
}

struct MamformerBlock {
    mamba: MiniMamba,
    attn: MiniAttention,
    mlp: GatedMlp,
}

impl MamformerBlock {
    fn forward(&self, xs: &Tensor, pass: &mut Pass) -> Result<Tensor> {
        let h = self.mamba.forward(xs, pass)?;
        let h = self.attn.forward(&h, pass)?;
        self.mlp.forward(&h, pass)
    }
}

pub struct Mamformer {
    input_proj: Linear,
    input_norm: LayerNorm,
    blocks: Vec<MamformerBlock>,
    head_fc1: Linear,
    head_fc2: Linear,
    head_out: Linear,
    dropout: f64,
}

impl Mamformer {
    pub fn new(store: &mut ParamStore, spec: &ModelSpec) -> Result<Self> {
        let d = spec.d_model;
        let p = spec.dropout;
        if d % MAMFORMER_HEADS != 0 {
            return Err(candle_core::Error::Msg(format!(
                "d_model {} not divisible by {} heads",
                d, MAMFORMER_HEADS
            )));
        }

        let input_proj = store.linear("input_proj", spec.input_dim, d)?;
        let input_norm = store.layer_norm("input_norm", d)?;
        let blocks = (0..spec.n_layers)
            .map(|i| -> Result<MamformerBlock> {
                let name = format!("layers.{i}");
                Ok(MamformerBlock {
                    mamba: MiniMamba::new(store, &format!("{name}.mamba"), d, p)?,
                    attn: MiniAttention::new(store, &format!("{name}.attn"), d, MAMFORMER_HEADS, p)?,
                    mlp: GatedMlp::new(store, &format!("{name}.mlp"), d, 2, p)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            input_proj,
            input_norm,
            blocks,
            head_fc1: store.linear("head.fc1", spec.seq_len * d, d)?,
            head_fc2: store.linear("head.fc2", d, d / 2)?,
            head_out: store.linear("head.out", d / 2, 1)?,
            dropout: p,
        })
    }

    /// `(batch, seq_len, input_dim)` -> `(batch,)`
    pub fn forward(&self, xs: &Tensor, pass: &mut Pass) -> Result<Tensor> {
        let h = self.input_norm.forward(&self.input_proj.forward(xs)?)?;
        let mut h = pass.dropout(&gelu(&h)?, self.dropout)?;
        for block in &self.blocks {
            h = block.forward(&h, pass)?;
        }

        let (b, l, d) = h.dims3()?;
        let flat = h.reshape((b, l * d))?;
        let z = gelu(&self.head_fc1.forward(&flat)?)?;
        let z = pass.dropout(&z, self.dropout)?;
        let z = gelu(&self.head_fc2.forward(&z)?)?;
        self.head_out.forward(&z)?.squeeze(1)
    }
}
