//! Differentiable building blocks shared by both sequence models.
//!
//! Everything here is composed from primitive tensor ops so gradients flow
//! through every parameter on any device.

use candle_core::{Device, Module, Result, Tensor, D};

/// GELU (erf form)
pub fn gelu(xs: &Tensor) -> Result<Tensor> {
    xs.gelu_erf()
}

/// Layer normalization over the last dimension, built from primitive ops:
/// the fused kernel behind `candle_nn::LayerNorm` has no backward pass.
#[derive(Debug, Clone)]
pub struct LayerNorm {
    weight: Tensor,
    bias: Tensor,
    eps: f64,
}

impl LayerNorm {
    pub fn new(weight: Tensor, bias: Tensor, eps: f64) -> Self {
        Self { weight, bias, eps }
    }
}

impl Module for LayerNorm {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let mean = xs.mean_keepdim(D::Minus1)?;
        let centered = xs.broadcast_sub(&mean)?;
        let var = centered.sqr()?.mean_keepdim(D::Minus1)?;
        let normed = centered.broadcast_div(&(var + self.eps)?.sqrt()?)?;
        normed.broadcast_mul(&self.weight)?.broadcast_add(&self.bias)
    }
}

/// Depthwise 1-D convolution over the time axis of a `(batch, time, channels)`
/// tensor, zero padded so the output keeps the input length.
#[derive(Debug, Clone)]
pub struct DepthwiseConv1d {
    /// `(channels, 1, kernel)`
    weight: Tensor,
    bias: Tensor,
    kernel: usize,
}

impl DepthwiseConv1d {
    pub fn new(weight: Tensor, bias: Tensor) -> Result<Self> {
        let (_, _, kernel) = weight.dims3()?;
        Ok(Self { weight, bias, kernel })
    }
}

impl Module for DepthwiseConv1d {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let (_, len, _) = xs.dims3()?;
        let pad = (self.kernel - 1) / 2;
        let padded = xs.pad_with_zeros(1, pad, self.kernel - 1 - pad)?;
        // (kernel, channels)
        let taps = self.weight.squeeze(1)?.t()?;

        let mut out = padded.narrow(1, 0, len)?.broadcast_mul(&taps.narrow(0, 0, 1)?)?;
        for k in 1..self.kernel {
            let term = padded.narrow(1, k, len)?.broadcast_mul(&taps.narrow(0, k, 1)?)?;
            out = (out + term)?;
        }
        out.broadcast_add(&self.bias)
    }
}

/// Moving-average trend / seasonal split along time.
///
/// Averages over a window of `min(kernel, seq_len)` steps, counting only
/// in-range positions at the borders. When an even window shortens the
/// output it is linearly resampled back to `seq_len`. Both steps are linear
/// in the input and are folded into one `(seq_len, seq_len)` matrix.
#[derive(Debug, Clone)]
pub struct SeriesDecomp {
    averaging: Tensor,
}

impl SeriesDecomp {
    pub fn new(kernel: usize, seq_len: usize, device: &Device) -> Result<Self> {
        let m = trend_matrix(kernel, seq_len);
        let flat: Vec<f32> = m.iter().flatten().map(|&v| v as f32).collect();
        let averaging = Tensor::from_vec(flat, (seq_len, seq_len), device)?;
        Ok(Self { averaging })
    }

    /// Returns `(seasonal, trend)` with `seasonal + trend == xs`
    pub fn forward(&self, xs: &Tensor) -> Result<(Tensor, Tensor)> {
        let trend = self.averaging.broadcast_matmul(&xs.contiguous()?)?;
        let seasonal = (xs - &trend)?;
        Ok((seasonal, trend))
    }
}

pub(crate) fn trend_matrix(kernel: usize, seq_len: usize) -> Vec<Vec<f64>> {
    let k = kernel.min(seq_len).max(1);
    let pad = (k - 1) / 2;
    let out_len = seq_len + 2 * pad + 1 - k;

    let pool: Vec<Vec<f64>> = (0..out_len)
        .map(|j| {
            let mut row = vec![0.0; seq_len];
            let lo = j as isize - pad as isize;
            let cols: Vec<usize> = (lo..lo + k as isize)
                .filter(|&i| i >= 0 && (i as usize) < seq_len)
                .map(|i| i as usize)
                .collect();
            let w = 1.0 / cols.len() as f64;
            for c in cols {
                row[c] = w;
            }
            row
        })
        .collect();

    if out_len == seq_len {
        return pool;
    }

    // linear resample out_len -> seq_len (half-pixel centres)
    let scale = out_len as f64 / seq_len as f64;
    (0..seq_len)
        .map(|dst| {
            let src = ((dst as f64 + 0.5) * scale - 0.5).max(0.0);
            let i0 = (src.floor() as usize).min(out_len - 1);
            let i1 = (i0 + 1).min(out_len - 1);
            let frac = src - i0 as f64;
            (0..seq_len)
                .map(|c| (1.0 - frac) * pool[i0][c] + frac * pool[i1][c])
                .collect()
        })
        .collect()
}

/// Dense real DFT basis over a length-`n` axis, applied with matmuls.
///
/// The forward basis maps `n` samples to `n/2 + 1` frequency bins; the
/// inverse basis maps a half spectrum back to `n` samples exactly as a real
/// inverse FFT of length `n` does.
#[derive(Debug, Clone)]
pub struct RealDft {
    fwd_cos: Tensor,
    fwd_sin: Tensor,
    inv_cos: Tensor,
    inv_sin: Tensor,
}

impl RealDft {
    pub fn new(n: usize, device: &Device) -> Result<Self> {
        let bins = n / 2 + 1;
        let two_pi = 2.0 * std::f64::consts::PI;
        let angle = |f: usize, t: usize| two_pi * ((f * t) % n) as f64 / n as f64;

        let mut fwd_cos = Vec::with_capacity(bins * n);
        let mut fwd_sin = Vec::with_capacity(bins * n);
        for f in 0..bins {
            for t in 0..n {
                fwd_cos.push(angle(f, t).cos() as f32);
                fwd_sin.push(angle(f, t).sin() as f32);
            }
        }

        let weight = |f: usize| {
            if f == 0 || (n % 2 == 0 && f == n / 2) { 1.0 } else { 2.0 }
        };
        let mut inv_cos = Vec::with_capacity(n * bins);
        let mut inv_sin = Vec::with_capacity(n * bins);
        for t in 0..n {
            for f in 0..bins {
                let w = weight(f) / n as f64;
                inv_cos.push((w * angle(f, t).cos()) as f32);
                inv_sin.push((w * angle(f, t).sin()) as f32);
            }
        }

        Ok(Self {
            fwd_cos: Tensor::from_vec(fwd_cos, (bins, n), device)?,
            fwd_sin: Tensor::from_vec(fwd_sin, (bins, n), device)?,
            inv_cos: Tensor::from_vec(inv_cos, (n, bins), device)?,
            inv_sin: Tensor::from_vec(inv_sin, (n, bins), device)?,
        })
    }

    /// Circular cross-correlation along dim -2:
    /// `out[.., tau, c] = sum_t q[.., (t + tau) % n, c] * k[.., t, c]`,
    /// computed as `irfft(rfft(q) * conj(rfft(k)))`.
    pub fn cross_correlation(&self, q: &Tensor, k: &Tensor) -> Result<Tensor> {
        let q = q.contiguous()?;
        let k = k.contiguous()?;
        // X = C x - i S x
        let qc = self.fwd_cos.broadcast_matmul(&q)?;
        let qs = self.fwd_sin.broadcast_matmul(&q)?;
        let kc = self.fwd_cos.broadcast_matmul(&k)?;
        let ks = self.fwd_sin.broadcast_matmul(&k)?;

        // Q * conj(K)
        let re = ((&qc * &kc)? + (&qs * &ks)?)?;
        let im = ((&qc * &ks)? - (&qs * &kc)?)?;

        let a = self.inv_cos.broadcast_matmul(&re)?;
        let b = self.inv_sin.broadcast_matmul(&im)?;
        a - b
    }
}

/// `out[t] = xs[(t + shift) % len]` along dim 2 of a 4-D tensor
pub fn roll_left(xs: &Tensor, shift: usize) -> Result<Tensor> {
    let len = xs.dim(2)?;
    let shift = shift % len;
    if shift == 0 {
        return Ok(xs.clone());
    }
    Tensor::cat(&[&xs.narrow(2, shift, len - shift)?, &xs.narrow(2, 0, shift)?], 2)
}
