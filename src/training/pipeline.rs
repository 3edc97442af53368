//! End-to-end training job
//!
//! clip -> select features -> chronological split -> robust scaling (train
//! rows only) -> windowing -> ensemble training -> evaluation -> checkpoint

use super::checkpoint::{save_checkpoint, CheckpointMeta, CheckpointPaths};
use super::config::TrainingConfig;
use super::ensemble::{EnsembleTrainer, TrainerSettings};
use super::evaluator::Evaluator;
use super::metrics::{sanitize, sanitize_all, SanitizedMetrics};
use super::progress::ProgressSink;
use crate::architectures::ModelType;
use crate::data::Dataset;
use crate::device::select_device;
use crate::error::Result;
use crate::preprocessing::{FeatureSelector, QuantileClipper, RobustScaler};
use crate::timeseries::{ChronologicalSplit, Windower};
use chrono::{DateTime, Utc};
use ndarray::s;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::info;

/// Final, sanitized outcome of one training job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingResult {
    pub task_id: String,
    pub model_type: ModelType,
    pub metrics: SanitizedMetrics,
    pub predictions: Vec<Option<f64>>,
    pub true_values: Vec<Option<f64>>,
    pub model_path: PathBuf,
    /// Selected model inputs, target last
    pub columns: Vec<String>,
    /// Averaged importance of every candidate feature
    pub feature_importance: Vec<(String, Option<f64>)>,
    pub member_val_r2: Vec<Option<f64>>,
    pub duration_secs: f64,
    pub completed_at: DateTime<Utc>,
}

pub struct TrainingPipeline {
    config: TrainingConfig,
}

impl TrainingPipeline {
    pub fn new(config: TrainingConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    pub fn run_csv(
        &self,
        task_id: &str,
        path: impl AsRef<Path>,
        target: &str,
        sink: &dyn ProgressSink,
    ) -> Result<TrainingResult> {
        let dataset = Dataset::from_csv(path)?;
        self.run(task_id, &dataset, target, sink)
    }

    pub fn run(
        &self,
        task_id: &str,
        dataset: &Dataset,
        target: &str,
        sink: &dyn ProgressSink,
    ) -> Result<TrainingResult> {
        let cfg = &self.config;
        let start = Instant::now();
        CheckpointPaths::new(&cfg.model_dir, task_id)?;
        let raw_target = dataset.column_index(target)?;
        info!(
            task_id,
            rows = dataset.n_rows(),
            columns = dataset.n_columns(),
            target,
            model = %cfg.model_type,
            "starting training job"
        );

        let mut clipped = dataset.clone();
        let clipper = match cfg.clip_quantiles {
            Some((lower, upper)) => {
                let mut clipper = QuantileClipper::new(lower, upper)?;
                clipper.fit(dataset.values(), Some(raw_target));
                clipper.transform_inplace(clipped.values_mut())?;
                Some(clipper)
            }
            None => None,
        };

        let selection = FeatureSelector::new(cfg.top_k)
            .with_n_estimators(cfg.selector_trees)
            .with_random_state(cfg.seed)
            .select(&clipped, target)?;
        let columns = selection.columns();
        let data = clipped.select(&columns)?;
        let target_index = columns.len() - 1;

        let ranges = ChronologicalSplit::new(cfg.seq_len)
            .with_test_ratio(cfg.test_ratio)
            .with_val_ratio(cfg.val_ratio)
            .split(data.n_rows())?;
        info!(
            train = ranges.train.len(),
            val = ranges.val.len(),
            test = ranges.test.len(),
            features = selection.features.len(),
            "data split"
        );

        let values = data.values();
        let mut scaler = RobustScaler::new();
        let train_rows = scaler.fit_transform(&values.slice(s![ranges.train.clone(), ..]).to_owned())?;
        let val_rows = scaler.transform(&values.slice(s![ranges.val.clone(), ..]).to_owned())?;
        let test_rows = scaler.transform(&values.slice(s![ranges.test.clone(), ..]).to_owned())?;

        let windower = Windower::new(cfg.seq_len, target_index)?;
        let train = windower.build(&train_rows)?;
        let val = windower.build(&val_rows)?;
        let test = windower.build(&test_rows)?;

        let device = select_device(cfg.device)?;
        let settings = TrainerSettings::from_config(cfg, columns.len());
        let spec = settings.spec;
        let members = EnsembleTrainer::new(settings, &scaler, target_index, device, sink).train(&train, &val)?;

        let evaluation = Evaluator::new(&scaler, target_index, cfg.batch_size).evaluate(&members, &test)?;

        // Only the first member is persisted; reported metrics use the whole ensemble.
        let first = &members[0];
        let clip_bounds = clipper
            .as_ref()
            .map(|c| {
                columns
                    .iter()
                    .map(|name| dataset.column_index(name).map(|i| c.bounds()[i]))
                    .collect::<Result<Vec<_>>>()
            })
            .transpose()?;
        let meta = CheckpointMeta {
            task_id: task_id.to_string(),
            model_type: cfg.model_type,
            spec,
            columns: columns.clone(),
            target: target.to_string(),
            target_index,
            scaler: scaler.params().to_vec(),
            clip_bounds,
            val_r2: sanitize(first.best_val_r2),
            created_at: Utc::now(),
        };
        let paths = save_checkpoint(&first.model, &meta, &cfg.model_dir)?;

        let duration_secs = start.elapsed().as_secs_f64();
        info!(task_id, duration_secs, r2 = evaluation.metrics.r2, "training job finished");

        Ok(TrainingResult {
            task_id: task_id.to_string(),
            model_type: cfg.model_type,
            metrics: evaluation.metrics.sanitized(),
            predictions: sanitize_all(&evaluation.predictions),
            true_values: sanitize_all(&evaluation.true_values),
            model_path: paths.weights,
            columns,
            feature_importance: selection
                .scores
                .iter()
                .map(|(name, score)| (name.clone(), sanitize(*score)))
                .collect(),
            member_val_r2: members.iter().map(|m| sanitize(m.best_val_r2)).collect(),
            duration_secs,
            completed_at: Utc::now(),
        })
    }
}
