//! Storage backends for task records, progress logs and results

use super::record::TaskRecord;
use crate::error::{MamformerError, Result};
use crate::training::{TrainingLogEntry, TrainingResult};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Storage backend trait
pub trait TaskStore: Send + Sync {
    /// Insert a new record; fails if the id already exists
    fn create(&self, record: &TaskRecord) -> Result<()>;

    fn get(&self, id: &Uuid) -> Result<Option<TaskRecord>>;

    /// Overwrite an existing record
    fn update(&self, record: &TaskRecord) -> Result<()>;

    fn append_log(&self, id: &Uuid, entry: &TrainingLogEntry) -> Result<()>;

    /// Log entries in emission order
    fn logs(&self, id: &Uuid) -> Result<Vec<TrainingLogEntry>>;

    fn save_result(&self, id: &Uuid, result: &TrainingResult) -> Result<()>;

    /// Drop the logs and result of a previous attempt
    fn reset_run(&self, id: &Uuid) -> Result<()>;

    fn result(&self, id: &Uuid) -> Result<Option<TrainingResult>>;

    /// Remove the record with its logs and result; `false` if absent
    fn delete(&self, id: &Uuid) -> Result<bool>;

    /// Every record, oldest first
    fn list(&self) -> Result<Vec<TaskRecord>>;
}

fn missing(id: &Uuid) -> MamformerError {
    MamformerError::PersistenceError(format!("task {} does not exist", id))
}

#[derive(Debug, Clone)]
struct TaskEntry {
    record: TaskRecord,
    logs: Vec<TrainingLogEntry>,
    result: Option<TrainingResult>,
}

/// Process-local store
#[derive(Debug, Default)]
pub struct InMemoryTaskStore {
    tasks: RwLock<HashMap<Uuid, TaskEntry>>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TaskStore for InMemoryTaskStore {
    fn create(&self, record: &TaskRecord) -> Result<()> {
        let mut tasks = self.tasks.write();
        if tasks.contains_key(&record.id) {
            return Err(MamformerError::PersistenceError(format!("task {} already exists", record.id)));
        }
        tasks.insert(
            record.id,
            TaskEntry {
                record: record.clone(),
                logs: Vec::new(),
                result: None,
            },
        );
        Ok(())
    }

    fn get(&self, id: &Uuid) -> Result<Option<TaskRecord>> {
        Ok(self.tasks.read().get(id).map(|e| e.record.clone()))
    }

    fn update(&self, record: &TaskRecord) -> Result<()> {
        let mut tasks = self.tasks.write();
        let entry = tasks.get_mut(&record.id).ok_or_else(|| missing(&record.id))?;
        entry.record = record.clone();
        Ok(())
    }

    fn append_log(&self, id: &Uuid, entry: &TrainingLogEntry) -> Result<()> {
        let mut tasks = self.tasks.write();
        let task = tasks.get_mut(id).ok_or_else(|| missing(id))?;
        task.logs.push(entry.clone());
        Ok(())
    }

    fn logs(&self, id: &Uuid) -> Result<Vec<TrainingLogEntry>> {
        Ok(self.tasks.read().get(id).map(|e| e.logs.clone()).unwrap_or_default())
    }

    fn save_result(&self, id: &Uuid, result: &TrainingResult) -> Result<()> {
        let mut tasks = self.tasks.write();
        let task = tasks.get_mut(id).ok_or_else(|| missing(id))?;
        task.result = Some(result.clone());
        Ok(())
    }

    fn reset_run(&self, id: &Uuid) -> Result<()> {
        let mut tasks = self.tasks.write();
        let task = tasks.get_mut(id).ok_or_else(|| missing(id))?;
        task.logs.clear();
        task.result = None;
        Ok(())
    }

    fn result(&self, id: &Uuid) -> Result<Option<TrainingResult>> {
        Ok(self.tasks.read().get(id).and_then(|e| e.result.clone()))
    }

    fn delete(&self, id: &Uuid) -> Result<bool> {
        Ok(self.tasks.write().remove(id).is_some())
    }

    fn list(&self) -> Result<Vec<TaskRecord>> {
        let mut records: Vec<TaskRecord> = self.tasks.read().values().map(|e| e.record.clone()).collect();
        records.sort_by_key(|r| r.created_at);
        Ok(records)
    }
}

/// One directory per task under `base_dir`: `task.json`, `logs.jsonl`
/// (one entry per line) and `result.json`
#[derive(Debug, Clone)]
pub struct JsonTaskStore {
    base_dir: PathBuf,
    // serializes writers within this process
    lock: std::sync::Arc<RwLock<()>>,
}

impl JsonTaskStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Result<Self> {
        let base_dir = base_dir.into();
        fs::create_dir_all(&base_dir).map_err(|e| persist_err(&base_dir, e))?;
        Ok(Self {
            base_dir,
            lock: Default::default(),
        })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn task_dir(&self, id: &Uuid) -> PathBuf {
        self.base_dir.join(id.to_string())
    }

    fn record_path(&self, id: &Uuid) -> PathBuf {
        self.task_dir(id).join("task.json")
    }

    fn logs_path(&self, id: &Uuid) -> PathBuf {
        self.task_dir(id).join("logs.jsonl")
    }

    fn result_path(&self, id: &Uuid) -> PathBuf {
        self.task_dir(id).join("result.json")
    }

    fn write_json<T: serde::Serialize>(&self, path: &Path, value: &T) -> Result<()> {
        let json = serde_json::to_string_pretty(value)?;
        // write-then-rename; readers never see a partial file
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json).map_err(|e| persist_err(&tmp, e))?;
        fs::rename(&tmp, path).map_err(|e| persist_err(path, e))
    }

    fn read_json<T: serde::de::DeserializeOwned>(&self, path: &Path) -> Result<Option<T>> {
        match fs::read_to_string(path) {
            Ok(text) => Ok(Some(serde_json::from_str(&text)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(persist_err(path, e)),
        }
    }
}

fn persist_err(path: &Path, e: std::io::Error) -> MamformerError {
    MamformerError::PersistenceError(format!("{}: {}", path.display(), e))
}

impl TaskStore for JsonTaskStore {
    fn create(&self, record: &TaskRecord) -> Result<()> {
        let _guard = self.lock.write();
        let dir = self.task_dir(&record.id);
        if dir.exists() {
            return Err(MamformerError::PersistenceError(format!("task {} already exists", record.id)));
        }
        fs::create_dir_all(&dir).map_err(|e| persist_err(&dir, e))?;
        self.write_json(&self.record_path(&record.id), record)
    }

    fn get(&self, id: &Uuid) -> Result<Option<TaskRecord>> {
        let _guard = self.lock.read();
        self.read_json(&self.record_path(id))
    }

    fn update(&self, record: &TaskRecord) -> Result<()> {
        let _guard = self.lock.write();
        let path = self.record_path(&record.id);
        if !path.exists() {
            return Err(missing(&record.id));
        }
        self.write_json(&path, record)
    }

    fn append_log(&self, id: &Uuid, entry: &TrainingLogEntry) -> Result<()> {
        let _guard = self.lock.write();
        if !self.record_path(id).exists() {
            return Err(missing(id));
        }
        let path = self.logs_path(id);
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| persist_err(&path, e))?;
        let line = serde_json::to_string(entry)?;
        writeln!(file, "{}", line).map_err(|e| persist_err(&path, e))
    }

    fn logs(&self, id: &Uuid) -> Result<Vec<TrainingLogEntry>> {
        let _guard = self.lock.read();
        let path = self.logs_path(id);
        let file = match fs::File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(persist_err(&path, e)),
        };
        let mut entries = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line.map_err(|e| persist_err(&path, e))?;
            if !line.trim().is_empty() {
                entries.push(serde_json::from_str(&line)?);
            }
        }
        Ok(entries)
    }

    fn save_result(&self, id: &Uuid, result: &TrainingResult) -> Result<()> {
        let _guard = self.lock.write();
        if !self.record_path(id).exists() {
            return Err(missing(id));
        }
        self.write_json(&self.result_path(id), result)
    }

    fn reset_run(&self, id: &Uuid) -> Result<()> {
        let _guard = self.lock.write();
        if !self.record_path(id).exists() {
            return Err(missing(id));
        }
        for path in [self.logs_path(id), self.result_path(id)] {
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(persist_err(&path, e)),
            }
        }
        Ok(())
    }

    fn result(&self, id: &Uuid) -> Result<Option<TrainingResult>> {
        let _guard = self.lock.read();
        self.read_json(&self.result_path(id))
    }

    fn delete(&self, id: &Uuid) -> Result<bool> {
        let _guard = self.lock.write();
        let dir = self.task_dir(id);
        if !dir.exists() {
            return Ok(false);
        }
        fs::remove_dir_all(&dir).map_err(|e| persist_err(&dir, e))?;
        Ok(true)
    }

    fn list(&self) -> Result<Vec<TaskRecord>> {
        let _guard = self.lock.read();
        let mut records = Vec::new();
        let entries = fs::read_dir(&self.base_dir).map_err(|e| persist_err(&self.base_dir, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| persist_err(&self.base_dir, e))?;
            let Some(id) = entry.file_name().to_str().and_then(|n| Uuid::parse_str(n).ok()) else {
                continue;
            };
            if let Some(record) = self.read_json::<TaskRecord>(&self.record_path(&id))? {
                records.push(record);
            }
        }
        records.sort_by_key(|r| r.created_at);
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::record::TaskStatus;
    use crate::training::{EpochMetrics, TrainingConfig};
    use chrono::Utc;

    fn entry(epoch: usize) -> TrainingLogEntry {
        TrainingLogEntry {
            epoch,
            overall_progress: epoch as f64,
            train_loss: Some(0.1),
            val_loss: None,
            metrics: EpochMetrics { val_r2: Some(0.5), val_mae: None, val_rmse: None, val_mape: None, val_loss: None },
            recorded_at: Utc::now(),
        }
    }

    fn exercise(store: &dyn TaskStore) {
        let mut record = TaskRecord::new("data.csv", "y", TrainingConfig::default());
        store.create(&record).unwrap();
        assert!(store.create(&record).is_err());

        record.status = TaskStatus::Running;
        store.update(&record).unwrap();
        assert_eq!(store.get(&record.id).unwrap().unwrap().status, TaskStatus::Running);

        store.append_log(&record.id, &entry(0)).unwrap();
        store.append_log(&record.id, &entry(5)).unwrap();
        let epochs: Vec<usize> = store.logs(&record.id).unwrap().iter().map(|e| e.epoch).collect();
        assert_eq!(epochs, vec![0, 5]);

        store.reset_run(&record.id).unwrap();
        assert!(store.logs(&record.id).unwrap().is_empty());
        store.append_log(&record.id, &entry(0)).unwrap();
        assert_eq!(store.logs(&record.id).unwrap().len(), 1);

        assert_eq!(store.list().unwrap().len(), 1);
        assert!(store.result(&record.id).unwrap().is_none());

        assert!(store.delete(&record.id).unwrap());
        assert!(!store.delete(&record.id).unwrap());
        assert!(store.get(&record.id).unwrap().is_none());
        assert!(store.logs(&record.id).unwrap().is_empty());

        let ghost = Uuid::new_v4();
        assert!(store.append_log(&ghost, &entry(0)).is_err());
        assert!(store.reset_run(&ghost).is_err());
        assert!(store.update(&TaskRecord { id: ghost, ..record }).is_err());
    }

    #[test]
    fn test_in_memory_store() {
        exercise(&InMemoryTaskStore::new());
    }

    #[test]
    fn test_json_store() {
        let dir = tempfile::tempdir().unwrap();
        exercise(&JsonTaskStore::new(dir.path()).unwrap());
    }
}
