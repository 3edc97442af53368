//! Tree-importance feature selection
//!
//! Scores every non-target column with two independently fitted tree
//! ensembles (a random forest and a gradient booster), averages their
//! normalized impurity importances and keeps the top `k`.

use crate::data::Dataset;
use crate::error::{MamformerError, Result};
use crate::training::gradient_boosting::{GradientBoostingConfig, GradientBoostingRegressor};
use crate::training::random_forest::RandomForest;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Outcome of a selection pass
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureSelection {
    /// Chosen feature columns, highest score first
    pub features: Vec<String>,
    pub target: String,
    /// Averaged importance for every candidate column, in dataset order
    pub scores: Vec<(String, f64)>,
}

impl FeatureSelection {
    /// Selected features followed by the target
    pub fn columns(&self) -> Vec<String> {
        let mut cols = self.features.clone();
        cols.push(self.target.clone());
        cols
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureSelector {
    k: usize,
    n_estimators: usize,
    random_state: u64,
}

impl FeatureSelector {
    pub fn new(k: usize) -> Self {
        Self {
            k,
            n_estimators: 50,
            random_state: 42,
        }
    }

    pub fn with_n_estimators(mut self, n: usize) -> Self {
        self.n_estimators = n;
        self
    }

    pub fn with_random_state(mut self, seed: u64) -> Self {
        self.random_state = seed;
        self
    }

    pub fn select(&self, dataset: &Dataset, target: &str) -> Result<FeatureSelection> {
        if self.k == 0 {
            return Err(MamformerError::invalid("top_k", 0, "must be at least 1"));
        }
        let (x, y, names) = dataset.feature_matrix(target)?;

        if names.is_empty() {
            return Ok(FeatureSelection {
                features: Vec::new(),
                target: target.to_string(),
                scores: Vec::new(),
            });
        }

        let mut forest = RandomForest::new(self.n_estimators).with_random_state(self.random_state);
        forest.fit(&x, &y)?;
        let rf_scores = forest
            .feature_importances()
            .ok_or(MamformerError::ModelNotFitted)?
            .clone();

        let mut booster = GradientBoostingRegressor::new(GradientBoostingConfig {
            n_estimators: self.n_estimators,
            random_state: Some(self.random_state),
            ..Default::default()
        });
        booster.fit(&x, &y)?;
        let gb_scores = booster.feature_importances();

        let scores: Vec<(String, f64)> = names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), (rf_scores[i] + gb_scores[i]) / 2.0))
            .collect();

        let features = top_k(&scores, self.k);
        debug!(?scores, "feature importance");
        info!(selected = features.len(), candidates = names.len(), "features selected");

        Ok(FeatureSelection {
            features,
            target: target.to_string(),
            scores,
        })
    }
}

/// Highest `k` names by score; ties keep column order
pub(crate) fn top_k(scores: &[(String, f64)], k: usize) -> Vec<String> {
    let mut ranked: Vec<&(String, f64)> = scores.iter().collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
    ranked.into_iter().take(k).map(|(n, _)| n.clone()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn dataset() -> Dataset {
        let n = 150;
        let values = Array2::from_shape_fn((n, 4), |(i, j)| {
            let t = i as f64;
            match j {
                0 => ((i * 31) % 17) as f64,
                1 => (t / 10.0).sin(),
                2 => ((i * 7) % 5) as f64,
                _ => 4.0 * (t / 10.0).sin() + 0.01 * ((i * 31) % 17) as f64,
            }
        });
        Dataset::from_columns(
            vec!["noise_a".into(), "signal".into(), "noise_b".into(), "y".into()],
            values,
        )
        .unwrap()
    }

    #[test]
    fn test_selects_signal_first() {
        let sel = FeatureSelector::new(2).with_n_estimators(10).select(&dataset(), "y").unwrap();
        assert_eq!(sel.features.len(), 2);
        assert_eq!(sel.features[0], "signal");
        assert_eq!(sel.columns().last().unwrap(), "y");
        assert!(!sel.features.contains(&"y".to_string()));
    }

    #[test]
    fn test_k_larger_than_available() {
        let sel = FeatureSelector::new(12).with_n_estimators(5).select(&dataset(), "y").unwrap();
        assert_eq!(sel.features.len(), 3);
        assert_eq!(sel.columns().len(), 4);
    }

    #[test]
    fn test_top_k_tie_order() {
        let scores = vec![("a".to_string(), 0.2), ("b".to_string(), 0.4), ("c".to_string(), 0.2)];
        assert_eq!(top_k(&scores, 3), vec!["b", "a", "c"]);
    }

    #[test]
    fn test_missing_target() {
        assert!(matches!(
            FeatureSelector::new(2).select(&dataset(), "nope"),
            Err(MamformerError::FeatureNotFound(_))
        ));
    }
}
