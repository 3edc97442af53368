//! Deployable checkpoint: safetensors weights plus a JSON sidecar holding
//! everything needed to rebuild the network and its preprocessing.

use crate::architectures::{ModelSpec, ModelType, SequenceModel};
use crate::error::{MamformerError, Result};
use crate::preprocessing::{ClipBounds, ScalerParams};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointMeta {
    pub task_id: String,
    pub model_type: ModelType,
    pub spec: ModelSpec,
    /// Model input columns in order; the target is one of them
    pub columns: Vec<String>,
    pub target: String,
    pub target_index: usize,
    /// Robust-scaler statistics per model column
    pub scaler: Vec<ScalerParams>,
    /// Clip bounds per model column, when clipping was enabled
    pub clip_bounds: Option<Vec<Option<ClipBounds>>>,
    /// Best validation R² of the saved member
    pub val_r2: Option<f64>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointPaths {
    pub weights: PathBuf,
    pub meta: PathBuf,
}

impl CheckpointPaths {
    pub fn new(model_dir: impl AsRef<Path>, task_id: &str) -> Result<Self> {
        if task_id.is_empty()
            || !task_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(MamformerError::invalid(
                "task_id",
                task_id,
                "only ASCII letters, digits, '-' and '_' are allowed",
            ));
        }
        let dir = model_dir.as_ref();
        Ok(Self {
            weights: dir.join(format!("{task_id}.safetensors")),
            meta: dir.join(format!("{task_id}.json")),
        })
    }

    pub fn exists(&self) -> bool {
        self.weights.exists() && self.meta.exists()
    }
}

pub fn save_checkpoint(
    model: &SequenceModel,
    meta: &CheckpointMeta,
    model_dir: impl AsRef<Path>,
) -> Result<CheckpointPaths> {
    let model_dir = model_dir.as_ref();
    let paths = CheckpointPaths::new(model_dir, &meta.task_id)?;
    fs::create_dir_all(model_dir).map_err(|e| {
        MamformerError::PersistenceError(format!("{}: {}", model_dir.display(), e))
    })?;

    model.save(&paths.weights)?;
    let json = serde_json::to_string_pretty(meta)?;
    fs::write(&paths.meta, json)
        .map_err(|e| MamformerError::PersistenceError(format!("{}: {}", paths.meta.display(), e)))?;

    info!(task_id = %meta.task_id, path = %paths.weights.display(), "checkpoint saved");
    Ok(paths)
}

pub fn load_meta(model_dir: impl AsRef<Path>, task_id: &str) -> Result<CheckpointMeta> {
    let paths = CheckpointPaths::new(model_dir, task_id)?;
    let text = fs::read_to_string(&paths.meta)
        .map_err(|e| MamformerError::PersistenceError(format!("{}: {}", paths.meta.display(), e)))?;
    Ok(serde_json::from_str(&text)?)
}

/// Delete both checkpoint files; missing files are not an error
pub fn remove_checkpoint(model_dir: impl AsRef<Path>, task_id: &str) -> Result<()> {
    let paths = CheckpointPaths::new(model_dir, task_id)?;
    for path in [&paths.weights, &paths.meta] {
        match fs::remove_file(path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(MamformerError::PersistenceError(format!("{}: {}", path.display(), e)))
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    fn meta(task_id: &str, spec: ModelSpec) -> CheckpointMeta {
        CheckpointMeta {
            task_id: task_id.to_string(),
            model_type: ModelType::Mamformer,
            spec,
            columns: vec!["a".into(), "y".into()],
            target: "y".into(),
            target_index: 1,
            scaler: vec![ScalerParams { center: 0.0, scale: 1.0 }; 2],
            clip_bounds: None,
            val_r2: Some(0.5),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_rejects_path_like_ids() {
        assert!(CheckpointPaths::new("/tmp", "../evil").is_err());
        assert!(CheckpointPaths::new("/tmp", "").is_err());
        let p = CheckpointPaths::new("/tmp/models", "task-1").unwrap();
        assert_eq!(p.weights, PathBuf::from("/tmp/models/task-1.safetensors"));
        assert_eq!(p.meta, PathBuf::from("/tmp/models/task-1.json"));
    }

    #[test]
    fn test_save_load_remove() {
        let dir = tempfile::tempdir().unwrap();
        let model_dir = dir.path().join("models");
        let spec = ModelSpec { input_dim: 2, seq_len: 4, d_model: 8, n_layers: 1, dropout: 0.1 };
        let model = SequenceModel::build(ModelType::Mamformer, &spec, &Device::Cpu, 0).unwrap();

        let paths = save_checkpoint(&model, &meta("abc", spec), &model_dir).unwrap();
        assert!(paths.exists());

        let loaded = load_meta(&model_dir, "abc").unwrap();
        assert_eq!(loaded.spec, spec);
        assert_eq!(loaded.target_index, 1);

        remove_checkpoint(&model_dir, "abc").unwrap();
        assert!(!paths.exists());
        remove_checkpoint(&model_dir, "abc").unwrap();
        assert!(matches!(load_meta(&model_dir, "abc"), Err(MamformerError::PersistenceError(_))));
    }
}
