//! Regression tree used for impurity-based feature importance

use crate::error::{MamformerError, Result};
use ndarray::{Array1, Array2, ArrayView1};
use rand::seq::index::sample;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Nodes below this size scan their candidate features sequentially
const PARALLEL_MIN_SAMPLES: usize = 512;

/// Decision tree node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TreeNode {
    Leaf {
        value: f64,
        n_samples: usize,
    },
    Split {
        feature_idx: usize,
        threshold: f64,
        left: Box<TreeNode>,
        right: Box<TreeNode>,
        n_samples: usize,
    },
}

#[derive(Debug, Clone, Copy)]
struct SplitCandidate {
    feature: usize,
    threshold: f64,
    /// Reduction in summed squared error
    decrease: f64,
}

/// CART regression tree with squared-error splits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionTree {
    root: Option<TreeNode>,
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    /// Features sampled per split (`None` = all)
    pub max_features: Option<usize>,
    pub random_state: u64,
    n_features: usize,
    /// Unnormalized total impurity decrease per feature
    raw_importances: Option<Array1<f64>>,
}

impl Default for DecisionTree {
    fn default() -> Self {
        Self::new()
    }
}

impl DecisionTree {
    pub fn new() -> Self {
        Self {
            root: None,
            max_depth: None,
            min_samples_split: 2,
            min_samples_leaf: 1,
            max_features: None,
            random_state: 0,
            n_features: 0,
            raw_importances: None,
        }
    }

    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = Some(depth);
        self
    }

    pub fn with_min_samples_split(mut self, min_samples: usize) -> Self {
        self.min_samples_split = min_samples.max(2);
        self
    }

    pub fn with_min_samples_leaf(mut self, min_samples: usize) -> Self {
        self.min_samples_leaf = min_samples.max(1);
        self
    }

    pub fn with_max_features(mut self, max_features: usize) -> Self {
        self.max_features = Some(max_features.max(1));
        self
    }

    pub fn with_random_state(mut self, seed: u64) -> Self {
        self.random_state = seed;
        self
    }

    /// Fit on all rows
    pub fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<&mut Self> {
        let indices: Vec<usize> = (0..x.nrows()).collect();
        self.fit_rows(x, y, indices)
    }

    /// Fit on a row subset (duplicates allowed, e.g. a bootstrap sample)
    pub fn fit_rows(&mut self, x: &Array2<f64>, y: &Array1<f64>, mut indices: Vec<usize>) -> Result<&mut Self> {
        if x.nrows() != y.len() {
            return Err(MamformerError::ShapeError {
                expected: format!("y length = {}", x.nrows()),
                actual: format!("y length = {}", y.len()),
            });
        }
        if indices.is_empty() {
            return Err(MamformerError::InsufficientData {
                what: "tree fit".to_string(),
                required: 1,
                available: 0,
            });
        }

        self.n_features = x.ncols();
        let mut importances = vec![0.0; self.n_features];
        let mut rng = ChaCha8Rng::seed_from_u64(self.random_state);

        let root = self.build_tree(x, y, &mut indices, 0, &mut importances, &mut rng);
        self.root = Some(root);
        self.raw_importances = Some(Array1::from_vec(importances));
        Ok(self)
    }

    fn build_tree(
        &self,
        x: &Array2<f64>,
        y: &Array1<f64>,
        indices: &mut [usize],
        depth: usize,
        importances: &mut [f64],
        rng: &mut ChaCha8Rng,
    ) -> TreeNode {
        let n_samples = indices.len();
        let (sum, sq_sum) = indices
            .iter()
            .fold((0.0, 0.0), |(s, q), &i| (s + y[i], q + y[i] * y[i]));
        let mean = sum / n_samples as f64;
        let parent_sse = sq_sum - sum * sum / n_samples as f64;

        let should_stop = n_samples < self.min_samples_split
            || n_samples < 2 * self.min_samples_leaf
            || self.max_depth.map_or(false, |d| depth >= d)
            || parent_sse <= 1e-12;

        if should_stop {
            return TreeNode::Leaf { value: mean, n_samples };
        }

        let features: Vec<usize> = match self.max_features {
            Some(m) if m < self.n_features => {
                let mut f = sample(rng, self.n_features, m).into_vec();
                f.sort_unstable();
                f
            }
            _ => (0..self.n_features).collect(),
        };

        let Some(best) = self.find_best_split(x, y, indices, &features, parent_sse) else {
            return TreeNode::Leaf { value: mean, n_samples };
        };

        importances[best.feature] += best.decrease;

        // in-place partition: left rows first
        let mut split_at = 0;
        for k in 0..indices.len() {
            if x[[indices[k], best.feature]] <= best.threshold {
                indices.swap(k, split_at);
                split_at += 1;
            }
        }
        let (left_idx, right_idx) = indices.split_at_mut(split_at);

        let left = Box::new(self.build_tree(x, y, left_idx, depth + 1, importances, rng));
        let right = Box::new(self.build_tree(x, y, right_idx, depth + 1, importances, rng));

        TreeNode::Split {
            feature_idx: best.feature,
            threshold: best.threshold,
            left,
            right,
            n_samples,
        }
    }

    fn find_best_split(
        &self,
        x: &Array2<f64>,
        y: &Array1<f64>,
        indices: &[usize],
        features: &[usize],
        parent_sse: f64,
    ) -> Option<SplitCandidate> {
        let scan = |&feature: &usize| self.scan_feature(x, y, indices, feature, parent_sse);

        let candidates: Vec<Option<SplitCandidate>> = if indices.len() >= PARALLEL_MIN_SAMPLES {
            features.par_iter().map(scan).collect()
        } else {
            features.iter().map(scan).collect()
        };

        // first feature wins ties
        candidates.into_iter().flatten().fold(None, |best: Option<SplitCandidate>, c| match best {
            Some(b) if b.decrease >= c.decrease => Some(b),
            _ => Some(c),
        })
    }

    /// Sorted sweep over one feature using running sums
    fn scan_feature(
        &self,
        x: &Array2<f64>,
        y: &Array1<f64>,
        indices: &[usize],
        feature: usize,
        parent_sse: f64,
    ) -> Option<SplitCandidate> {
        let n = indices.len();
        let mut pairs: Vec<(f64, f64)> = indices.iter().map(|&i| (x[[i, feature]], y[i])).collect();
        pairs.sort_by(|a, b| a.0.total_cmp(&b.0));

        let total_sum: f64 = pairs.iter().map(|p| p.1).sum();
        let total_sq: f64 = pairs.iter().map(|p| p.1 * p.1).sum();

        let mut left_sum = 0.0;
        let mut left_sq = 0.0;
        let mut best: Option<SplitCandidate> = None;

        for k in 0..n - 1 {
            let (v, yv) = pairs[k];
            left_sum += yv;
            left_sq += yv * yv;

            if v == pairs[k + 1].0 {
                continue;
            }
            let n_left = k + 1;
            let n_right = n - n_left;
            if n_left < self.min_samples_leaf || n_right < self.min_samples_leaf {
                continue;
            }

            let right_sum = total_sum - left_sum;
            let right_sq = total_sq - left_sq;
            let left_sse = left_sq - left_sum * left_sum / n_left as f64;
            let right_sse = right_sq - right_sum * right_sum / n_right as f64;
            let decrease = parent_sse - left_sse - right_sse;

            if decrease > 1e-12 && best.map_or(true, |b| decrease > b.decrease) {
                best = Some(SplitCandidate {
                    feature,
                    threshold: (v + pairs[k + 1].0) / 2.0,
                    decrease,
                });
            }
        }
        best
    }

    pub fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        let root = self.root.as_ref().ok_or(MamformerError::ModelNotFitted)?;
        if x.ncols() != self.n_features {
            return Err(MamformerError::ShapeError {
                expected: format!("{} features", self.n_features),
                actual: format!("{} features", x.ncols()),
            });
        }
        Ok(x.rows()
            .into_iter()
            .map(|row| Self::predict_row(root, &row))
            .collect())
    }

    fn predict_row(node: &TreeNode, row: &ArrayView1<'_, f64>) -> f64 {
        let mut node = node;
        loop {
            match node {
                TreeNode::Leaf { value, .. } => return *value,
                TreeNode::Split { feature_idx, threshold, left, right, .. } => {
                    node = if row[*feature_idx] <= *threshold { left } else { right };
                }
            }
        }
    }

    /// Total squared-error decrease per feature, not normalized
    pub fn raw_importances(&self) -> Option<&Array1<f64>> {
        self.raw_importances.as_ref()
    }

    /// Importances normalized to sum to 1 (all zero for a stump)
    pub fn feature_importances(&self) -> Option<Array1<f64>> {
        self.raw_importances.as_ref().map(normalize)
    }

    pub fn get_depth(&self) -> usize {
        fn depth(node: &TreeNode) -> usize {
            match node {
                TreeNode::Leaf { .. } => 0,
                TreeNode::Split { left, right, .. } => 1 + depth(left).max(depth(right)),
            }
        }
        self.root.as_ref().map_or(0, depth)
    }
}

pub(crate) fn normalize(values: &Array1<f64>) -> Array1<f64> {
    let total = values.sum();
    if total > 0.0 {
        values / total
    } else {
        values.clone()
    }
}
