//! Auto-Mamformer: each block runs a gated-convolution branch and a
//! decomposition + auto-correlation branch in parallel and mixes them with
//! a learned scalar gate. The readout pools the final sequence three ways
//! and blends the head's output with two linear shortcuts of the raw window.

use super::layers::{gelu, roll_left, DepthwiseConv1d, LayerNorm, RealDft, SeriesDecomp};
use super::params::{ParamStore, Pass};
use super::ModelSpec;
use candle_core::{Module, Result, Tensor, D};
use candle_nn::ops::sigmoid;
use candle_nn::Linear;

pub const AUTO_MAMFORMER_HEADS: usize = 8;
const DECOMP_KERNEL: usize = 25;
const CORRELATION_FACTOR: f64 = 5.0;
const FEATURE_DROPOUT: f64 = 0.1;

/// Number of time delays aggregated for a window of `len` steps
pub fn correlation_top_k(len: usize) -> usize {
    if len <= 1 {
        return 1;
    }
    let k = (CORRELATION_FACTOR * ((len + 1) as f64).ln()).round() as usize;
    k.clamp(1, len)
}

/// Period-based dependency discovery: delays are ranked by the
/// batch-averaged autocorrelation, then each sample mixes the values rolled
/// by those delays with softmax weights over its own correlation scores.
struct AutoCorrelation {
    q_proj: Linear,
    k_proj: Linear,
    v_proj: Linear,
    out_proj: Linear,
    n_heads: usize,
    dft: RealDft,
}

impl AutoCorrelation {
    fn new(store: &mut ParamStore, name: &str, d_model: usize, n_heads: usize, seq_len: usize) -> Result<Self> {
        let device = store.device().clone();
        Ok(Self {
            q_proj: store.linear(&format!("{name}.q_proj"), d_model, d_model)?,
            k_proj: store.linear(&format!("{name}.k_proj"), d_model, d_model)?,
            v_proj: store.linear(&format!("{name}.v_proj"), d_model, d_model)?,
            out_proj: store.linear(&format!("{name}.out_proj"), d_model, d_model)?,
            n_heads,
            dft: RealDft::new(seq_len, &device)?,
        })
    }

    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let (b, l, d) = xs.dims3()?;
        let head_dim = d / self.n_heads;
        let heads = |t: Tensor| -> Result<Tensor> {
            t.reshape((b, l, self.n_heads, head_dim))?.transpose(1, 2)?.contiguous()
        };
        let q = heads(self.q_proj.forward(xs)?)?;
        let k = heads(self.k_proj.forward(xs)?)?;
        let v = heads(self.v_proj.forward(xs)?)?;

        // (b, h, l, head_dim) -> per-delay score (b, l)
        let corr = self.dft.cross_correlation(&q, &k)?;
        let scores = corr.mean(3)?.mean(1)?;

        let batch_mean = scores.mean(0)?.to_dtype(candle_core::DType::F32)?.to_vec1::<f32>()?;
        let mut order: Vec<usize> = (0..l).collect();
        order.sort_by(|&a, &c| batch_mean[c].total_cmp(&batch_mean[a]));
        let delays = &order[..correlation_top_k(l)];

        let idx: Vec<u32> = delays.iter().map(|&t| t as u32).collect();
        let idx = Tensor::from_vec(idx, delays.len(), xs.device())?;
        let weights = candle_nn::ops::softmax(&scores.index_select(&idx, 1)?, D::Minus1)?;

        let mut agg = v.zeros_like()?;
        for (i, &delay) in delays.iter().enumerate() {
            let w = weights.narrow(1, i, 1)?.reshape((b, 1, 1, 1))?;
            agg = (agg + roll_left(&v, delay)?.broadcast_mul(&w)?)?;
        }

        let merged = agg.transpose(1, 2)?.reshape((b, l, d))?;
        self.out_proj.forward(&merged)
    }
}

/// Pre-normalized decomposition followed by auto-correlation on the
/// seasonal part, with residual
struct AutoformerAttention {
    norm: LayerNorm,
    decomp: SeriesDecomp,
    correlation: AutoCorrelation,
}

impl AutoformerAttention {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let h = self.norm.forward(xs)?;
        let (seasonal, _trend) = self.decomp.forward(&h)?;
        let out = (xs + self.correlation.forward(&seasonal)?)?;
        let (seasonal, trend) = self.decomp.forward(&out)?;
        seasonal + trend
    }
}

/// Input projection split into a convolved path and a sigmoid gate
struct SimplifiedMamba {
    norm: LayerNorm,
    input_proj: Linear,
    conv: DepthwiseConv1d,
    gate_proj: Linear,
    output_proj: Linear,
}

impl SimplifiedMamba {
    fn new(store: &mut ParamStore, name: &str, d_model: usize) -> Result<Self> {
        Ok(Self {
            norm: store.layer_norm(&format!("{name}.norm"), d_model)?,
            input_proj: store.linear(&format!("{name}.input_proj"), d_model, 2 * d_model)?,
            conv: store.depthwise_conv(&format!("{name}.conv1d"), d_model, 3)?,
            gate_proj: store.linear(&format!("{name}.gate_proj"), d_model, d_model)?,
            output_proj: store.linear(&format!("{name}.output_proj"), d_model, d_model)?,
        })
    }

    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let h = self.input_proj.forward(&self.norm.forward(xs)?)?;
        let parts = h.chunk(2, D::Minus1)?;
        let conv = self.conv.forward(&parts[0].contiguous()?)?.silu()?;
        let gate = sigmoid(&self.gate_proj.forward(&parts[1].contiguous()?)?)?;
        xs + self.output_proj.forward(&(conv * gate)?)?
    }
}

struct AutoMamformerBlock {
    mamba: SimplifiedMamba,
    attn: AutoformerAttention,
    /// Scalar branch mix
    gate: Tensor,
    ffn_norm: LayerNorm,
    ffn_fc1: Linear,
    ffn_fc2: Linear,
    decomp: SeriesDecomp,
    dropout: f64,
}

impl AutoMamformerBlock {
    fn new(store: &mut ParamStore, name: &str, spec: &ModelSpec) -> Result<Self> {
        let d = spec.d_model;
        let device = store.device().clone();
        Ok(Self {
            mamba: SimplifiedMamba::new(store, &format!("{name}.mamba"), d)?,
            attn: AutoformerAttention {
                norm: store.layer_norm(&format!("{name}.autoformer_attn.norm"), d)?,
                decomp: SeriesDecomp::new(DECOMP_KERNEL, spec.seq_len, &device)?,
                correlation: AutoCorrelation::new(
                    store,
                    &format!("{name}.autoformer_attn.auto_correlation"),
                    d,
                    AUTO_MAMFORMER_HEADS,
                    spec.seq_len,
                )?,
            },
            gate: store.constant(&format!("{name}.gate"), &[], 0.5)?,
            ffn_norm: store.layer_norm(&format!("{name}.ffn.norm"), d)?,
            ffn_fc1: store.linear(&format!("{name}.ffn.fc1"), d, 4 * d)?,
            ffn_fc2: store.linear(&format!("{name}.ffn.fc2"), 4 * d, d)?,
            decomp: SeriesDecomp::new(DECOMP_KERNEL, spec.seq_len, &device)?,
            dropout: spec.dropout,
        })
    }

    fn forward(&self, xs: &Tensor, pass: &mut Pass) -> Result<Tensor> {
        let mamba_out = self.mamba.forward(xs)?;
        let auto_out = self.attn.forward(xs)?;
        let inv_gate = (self.gate.neg()? + 1.0)?;
        let fused = (mamba_out.broadcast_mul(&self.gate)? + auto_out.broadcast_mul(&inv_gate)?)?;

        let h = gelu(&self.ffn_fc1.forward(&self.ffn_norm.forward(&fused)?)?)?;
        let h = pass.dropout(&h, self.dropout)?;
        let h = pass.dropout(&self.ffn_fc2.forward(&h)?, self.dropout)?;

        let (seasonal, trend) = self.decomp.forward(&(fused + h)?)?;
        seasonal + trend
    }
}

pub struct AutoMamformer {
    fl_fc1: Linear,
    fl_norm1: LayerNorm,
    fl_fc2: Linear,
    fl_norm2: LayerNorm,
    fl_enhance: Linear,
    pos_embedding: Tensor,
    blocks: Vec<AutoMamformerBlock>,
    head_fc1: Linear,
    head_norm: LayerNorm,
    head_fc2: Linear,
    head_out: Linear,
    linear_residual: Linear,
    ar_residual: Linear,
    fusion_weights: Tensor,
    dropout: f64,
}

impl AutoMamformer {
    pub fn new(store: &mut ParamStore, spec: &ModelSpec) -> Result<Self> {
        let d = spec.d_model;
        if d % AUTO_MAMFORMER_HEADS != 0 {
            return Err(candle_core::Error::Msg(format!(
                "d_model {} not divisible by {} heads",
                d, AUTO_MAMFORMER_HEADS
            )));
        }

        let fl_fc1 = store.linear("feature_learning.fc1", spec.input_dim, 2 * d)?;
        let fl_norm1 = store.layer_norm("feature_learning.norm1", 2 * d)?;
        let fl_fc2 = store.linear("feature_learning.fc2", 2 * d, d)?;
        let fl_norm2 = store.layer_norm("feature_learning.norm2", d)?;
        let fl_enhance = store.linear("feature_learning.enhance", d, d)?;
        let pos_embedding = store.gaussian("pos_embedding", &[spec.seq_len, d], 0.01)?;

        let blocks = (0..spec.n_layers)
            .map(|i| AutoMamformerBlock::new(store, &format!("layers.{i}"), spec))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            fl_fc1,
            fl_norm1,
            fl_fc2,
            fl_norm2,
            fl_enhance,
            pos_embedding,
            blocks,
            head_fc1: store.linear("head.fc1", 3 * d, d)?,
            head_norm: store.layer_norm("head.norm", d)?,
            head_fc2: store.linear("head.fc2", d, d / 2)?,
            head_out: store.linear("head.out", d / 2, 1)?,
            linear_residual: store.linear("linear_residual", spec.input_dim, 1)?,
            ar_residual: store.linear("ar_residual", 1, 1)?,
            fusion_weights: store.from_values("fusion_weights", &[3], vec![0.8, 0.15, 0.05])?,
            dropout: spec.dropout,
        })
    }

    fn feature_learning(&self, xs: &Tensor, pass: &mut Pass) -> Result<Tensor> {
        let h = gelu(&self.fl_norm1.forward(&self.fl_fc1.forward(xs)?)?)?;
        let h = pass.dropout(&h, FEATURE_DROPOUT)?;
        let h = self.fl_norm2.forward(&self.fl_fc2.forward(&h)?)?;
        let h = gelu(&self.fl_enhance.forward(&h)?)?;
        pass.dropout(&h, FEATURE_DROPOUT)
    }

    /// `(batch, seq_len, input_dim)` -> `(batch,)`
    pub fn forward(&self, xs: &Tensor, pass: &mut Pass) -> Result<Tensor> {
        let (_, l, n_features) = xs.dims3()?;

        let mut h = self.feature_learning(xs, pass)?.broadcast_add(&self.pos_embedding)?;
        for block in &self.blocks {
            h = block.forward(&h, pass)?;
        }

        let last = h.narrow(1, l - 1, 1)?.squeeze(1)?;
        let avg = h.mean(1)?;
        let max = h.max(1)?;
        let pooled = Tensor::cat(&[&last, &avg, &max], 1)?;

        let z = gelu(&self.head_norm.forward(&self.head_fc1.forward(&pooled)?)?)?;
        let z = pass.dropout(&z, self.dropout)?;
        let z = gelu(&self.head_fc2.forward(&z)?)?;
        let z = pass.dropout(&z, self.dropout)?;
        let main = self.head_out.forward(&z)?;

        let last_raw = xs.narrow(1, l - 1, 1)?.squeeze(1)?.contiguous()?;
        let linear = self.linear_residual.forward(&last_raw)?;
        let ar_in = last_raw.narrow(1, n_features - 1, 1)?.contiguous()?;
        let ar = self.ar_residual.forward(&ar_in)?;

        let w = candle_nn::ops::softmax(&self.fusion_weights, 0)?;
        let fused = (main.broadcast_mul(&w.narrow(0, 0, 1)?)?
            + linear.broadcast_mul(&w.narrow(0, 1, 1)?)?)?;
        let fused = (fused + ar.broadcast_mul(&w.narrow(0, 2, 1)?)?)?;
        fused.squeeze(1)
    }
}
