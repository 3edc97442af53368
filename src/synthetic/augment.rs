//! Stochastic window augmentation applied while drawing training batches

use crate::error::{MamformerError, Result};
use crate::timeseries::WindowedSamples;
use ndarray::{s, Array2};
use rand::Rng;
use rand_distr::{Beta, Distribution, Normal};
use serde::{Deserialize, Serialize};

/// Probabilities and magnitudes of each perturbation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AugmentConfig {
    pub mix_prob: f64,
    pub mix_alpha: f64,
    pub scale_prob: f64,
    pub scale_std: f64,
    pub noise_prob: f64,
    pub noise_std: f64,
    pub mask_prob: f64,
}

impl Default for AugmentConfig {
    fn default() -> Self {
        Self {
            mix_prob: 0.3,
            mix_alpha: 0.4,
            scale_prob: 0.4,
            scale_std: 0.05,
            noise_prob: 0.5,
            noise_std: 0.02,
            mask_prob: 0.2,
        }
    }
}

/// Applies, each behind its own independent gate and in this order:
/// mixup with a random partner sample, global amplitude scaling, additive
/// Gaussian noise and zeroing of a contiguous block of timesteps.
#[derive(Debug, Clone)]
pub struct Augmenter {
    config: AugmentConfig,
    beta: Beta<f64>,
    scale: Normal<f64>,
    noise: Normal<f64>,
}

impl Augmenter {
    pub fn new(config: AugmentConfig) -> Result<Self> {
        let beta = Beta::new(config.mix_alpha, config.mix_alpha)
            .map_err(|e| MamformerError::ConfigError(format!("mix_alpha: {}", e)))?;
        let scale = Normal::new(1.0, config.scale_std)
            .map_err(|e| MamformerError::ConfigError(format!("scale_std: {}", e)))?;
        let noise = Normal::new(0.0, config.noise_std)
            .map_err(|e| MamformerError::ConfigError(format!("noise_std: {}", e)))?;
        Ok(Self {
            config,
            beta,
            scale,
            noise,
        })
    }

    pub fn config(&self) -> &AugmentConfig {
        &self.config
    }

    /// Augmented copy of sample `idx`. Partners for mixing are drawn from the
    /// unaugmented pool; the stored samples are never modified.
    pub fn sample<R: Rng + ?Sized>(
        &self,
        samples: &WindowedSamples,
        idx: usize,
        rng: &mut R,
    ) -> (Array2<f64>, f64) {
        let mut seq = samples.window(idx).to_owned();
        let mut target = samples.y[idx];
        let n = samples.len();

        if rng.gen::<f64>() < self.config.mix_prob && n > 1 {
            let partner = rng.gen_range(0..n);
            let lam = self.beta.sample(rng);
            seq = &seq * lam + &(&samples.window(partner) * (1.0 - lam));
            target = lam * target + (1.0 - lam) * samples.y[partner];
        }

        if rng.gen::<f64>() < self.config.scale_prob {
            let factor = self.scale.sample(rng);
            seq *= factor;
        }

        if rng.gen::<f64>() < self.config.noise_prob {
            seq.mapv_inplace(|v| v + self.noise.sample(rng));
        }

        if rng.gen::<f64>() < self.config.mask_prob {
            let len = seq.nrows();
            let mask_len = mask_length(len);
            let start = rng.gen_range(0..=len - mask_len);
            seq.slice_mut(s![start..start + mask_len, ..]).fill(0.0);
        }

        (seq, target)
    }
}

/// Masked block length: a quarter of the window, rounded up
pub(crate) fn mask_length(seq_len: usize) -> usize {
    seq_len.div_ceil(4).max(1).min(seq_len)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timeseries::Windower;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn samples() -> WindowedSamples {
        let data = Array2::from_shape_fn((30, 3), |(i, j)| (i * (j + 1)) as f64 + 1.0);
        Windower::new(8, 2).unwrap().build(&data).unwrap()
    }

    #[test]
    fn test_disabled_gates_are_identity() {
        let cfg = AugmentConfig {
            mix_prob: 0.0,
            scale_prob: 0.0,
            noise_prob: 0.0,
            mask_prob: 0.0,
            ..Default::default()
        };
        let aug = Augmenter::new(cfg).unwrap();
        let s = samples();
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let (seq, y) = aug.sample(&s, 4, &mut rng);
        assert_eq!(seq, s.window(4).to_owned());
        assert_eq!(y, s.y[4]);
    }

    #[test]
    fn test_mask_zeroes_a_block() {
        let cfg = AugmentConfig {
            mix_prob: 0.0,
            scale_prob: 0.0,
            noise_prob: 0.0,
            mask_prob: 1.0,
            ..Default::default()
        };
        let aug = Augmenter::new(cfg).unwrap();
        let s = samples();
        let mut rng = ChaCha8Rng::seed_from_u64(9);
        let (seq, _) = aug.sample(&s, 3, &mut rng);
        let zero_rows = seq.rows().into_iter().filter(|r| r.iter().all(|&v| v == 0.0)).count();
        assert_eq!(zero_rows, 2);
    }

    fn only(mix: f64, scale: f64, noise: f64) -> Augmenter {
        Augmenter::new(AugmentConfig {
            mix_prob: mix,
            scale_prob: scale,
            noise_prob: noise,
            mask_prob: 0.0,
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_mix_blends_window_and_label_alike() {
        let aug = only(1.0, 0.0, 0.0);
        let s = samples();
        let mut rng = ChaCha8Rng::seed_from_u64(3);

        for round in 0..50 {
            let idx = round % s.len();
            let (seq, y) = aug.sample(&s, idx, &mut rng);
            assert_eq!(seq.dim(), s.window(idx).dim());

            // some partner p and one weight lam must explain both outputs
            let explained = (0..s.len()).any(|p| {
                if p == idx {
                    return seq == s.window(idx) && y == s.y[idx];
                }
                let lam = (y - s.y[p]) / (s.y[idx] - s.y[p]);
                let expected = &s.window(idx) * lam + &(&s.window(p) * (1.0 - lam));
                (0.0..=1.0).contains(&lam)
                    && seq.iter().zip(expected.iter()).all(|(a, b)| (a - b).abs() < 1e-9)
            });
            assert!(explained, "round {round}: mixed sample is not a convex blend");

            let (lo, hi) = s.y.iter().fold((f64::MAX, f64::MIN), |(lo, hi), &v| (lo.min(v), hi.max(v)));
            assert!(y >= lo && y <= hi);
        }
    }

    #[test]
    fn test_scale_multiplies_whole_window() {
        let aug = only(0.0, 1.0, 0.0);
        let s = samples();
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        let (seq, y) = aug.sample(&s, 2, &mut rng);
        let src = s.window(2);

        assert_eq!(seq.dim(), src.dim());
        assert_eq!(y, s.y[2]);
        let factor = seq[[0, 0]] / src[[0, 0]];
        assert!(factor != 1.0 && (factor - 1.0).abs() < 0.5);
        for (a, b) in seq.iter().zip(src.iter()) {
            assert!((a - b * factor).abs() < 1e-9);
        }
    }

    #[test]
    fn test_noise_perturbs_each_value_slightly() {
        let aug = only(0.0, 0.0, 1.0);
        let s = samples();
        let mut rng = ChaCha8Rng::seed_from_u64(17);
        let (seq, y) = aug.sample(&s, 5, &mut rng);
        let src = s.window(5);

        assert_eq!(seq.dim(), src.dim());
        assert_eq!(y, s.y[5]);
        assert!(seq != src);
        assert!(seq.iter().zip(src.iter()).all(|(a, b)| (a - b).abs() < 0.2));
    }

    #[test]
    fn test_source_unchanged_and_reproducible() {
        let aug = Augmenter::new(AugmentConfig::default()).unwrap();
        let s = samples();
        let before = s.x.clone();

        let mut a = ChaCha8Rng::seed_from_u64(5);
        let mut b = ChaCha8Rng::seed_from_u64(5);
        for i in 0..s.len() {
            assert_eq!(aug.sample(&s, i, &mut a), aug.sample(&s, i, &mut b));
        }
        assert_eq!(s.x, before);
    }

    #[test]
    fn test_mask_length() {
        assert_eq!(mask_length(12), 3);
        assert_eq!(mask_length(13), 4);
        assert_eq!(mask_length(1), 1);
    }
}
