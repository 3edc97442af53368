//! Drives training jobs from task records
//!
//! The orchestrator owns a task's record for the duration of one run:
//! Pending -> Running -> Completed | Failed. Progress events are appended to
//! the task's log as they arrive; a rerun starts from an empty log. Saving
//! the result counts as part of the run, and a failed run has its checkpoint
//! removed.

use super::record::{parse_task_id, TaskLookup, TaskProgress, TaskRecord, TaskStatus};
use super::store::TaskStore;
use crate::error::{MamformerError, Result};
use crate::training::checkpoint::remove_checkpoint;
use crate::training::{ProgressEvent, TrainingConfig, TrainingLogEntry, TrainingPipeline, TrainingResult};
use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Where a run executes, which decides how failures surface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchMode {
    /// On the caller's thread; failures are recorded and reported as
    /// [`RunOutcome::Failed`]
    Inline,
    /// On a queue worker; failures are recorded and then returned as errors
    Queued,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Completed(Box<TrainingResult>),
    Failed(String),
    NotFound,
}

#[derive(Clone)]
pub struct TaskOrchestrator {
    store: Arc<dyn TaskStore>,
}

impl TaskOrchestrator {
    pub fn new(store: Arc<dyn TaskStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn TaskStore> {
        &self.store
    }

    /// Validate the configuration and record a pending task
    pub fn submit(
        &self,
        data_path: impl Into<PathBuf>,
        target: impl Into<String>,
        config: TrainingConfig,
    ) -> Result<TaskRecord> {
        config.validate()?;
        let record = TaskRecord::new(data_path, target, config);
        self.store.create(&record)?;
        info!(task_id = %record.id, "task submitted");
        Ok(record)
    }

    pub fn get(&self, id: &str) -> Result<TaskLookup<TaskRecord>> {
        let Some(uuid) = parse_task_id(id) else {
            return Ok(TaskLookup::InvalidId);
        };
        Ok(match self.store.get(&uuid)? {
            Some(record) => TaskLookup::Found(record),
            None => TaskLookup::NotFound,
        })
    }

    pub fn run(&self, id: Uuid, mode: DispatchMode) -> Result<RunOutcome> {
        let Some(mut record) = self.store.get(&id)? else {
            warn!(task_id = %id, "run requested for unknown task");
            return Ok(RunOutcome::NotFound);
        };

        record.status = TaskStatus::Running;
        record.started_at = Some(Utc::now());
        record.completed_at = None;
        record.error = None;
        self.store.update(&record)?;
        self.store.reset_run(&id)?;
        info!(task_id = %id, ?mode, "task running");

        let finished = self.execute(&record).and_then(|result| {
            self.store.save_result(&id, &result)?;
            let done = TaskRecord {
                status: TaskStatus::Completed,
                completed_at: Some(Utc::now()),
                ..record.clone()
            };
            self.store.update(&done)?;
            Ok(result)
        });

        match finished {
            Ok(result) => {
                info!(task_id = %id, "task completed");
                Ok(RunOutcome::Completed(Box::new(result)))
            }
            Err(e) => {
                let message = e.to_string();
                error!(task_id = %id, kind = ?e.kind(), error = %message, "task failed");
                if let Err(cleanup) = remove_checkpoint(&record.config.model_dir, &id.to_string()) {
                    warn!(task_id = %id, error = %cleanup, "could not remove checkpoint of failed task");
                }
                record.status = TaskStatus::Failed;
                record.completed_at = Some(Utc::now());
                record.error = Some(message.clone());
                self.store.update(&record)?;
                match mode {
                    DispatchMode::Inline => Ok(RunOutcome::Failed(message)),
                    DispatchMode::Queued => Err(e),
                }
            }
        }
    }

    fn execute(&self, record: &TaskRecord) -> Result<TrainingResult> {
        let pipeline = TrainingPipeline::new(record.config.clone())?;
        let store = Arc::clone(&self.store);
        let id = record.id;
        let sink = move |event: &ProgressEvent| -> Result<()> {
            store.append_log(&id, &TrainingLogEntry::from(event))
        };
        pipeline.run_csv(&id.to_string(), &record.data_path, &record.target, &sink)
    }

    pub fn progress(&self, id: &str) -> Result<TaskLookup<TaskProgress>> {
        match self.get(id)? {
            TaskLookup::Found(record) => {
                let latest = self.store.logs(&record.id)?.pop();
                Ok(TaskLookup::Found(TaskProgress::new(&record, latest)))
            }
            TaskLookup::NotFound => Ok(TaskLookup::NotFound),
            TaskLookup::InvalidId => Ok(TaskLookup::InvalidId),
        }
    }

    pub fn logs(&self, id: &str) -> Result<TaskLookup<Vec<TrainingLogEntry>>> {
        match self.get(id)? {
            TaskLookup::Found(record) => Ok(TaskLookup::Found(self.store.logs(&record.id)?)),
            TaskLookup::NotFound => Ok(TaskLookup::NotFound),
            TaskLookup::InvalidId => Ok(TaskLookup::InvalidId),
        }
    }

    pub fn result(&self, id: &str) -> Result<TaskLookup<Option<TrainingResult>>> {
        match self.get(id)? {
            TaskLookup::Found(record) => Ok(TaskLookup::Found(self.store.result(&record.id)?)),
            TaskLookup::NotFound => Ok(TaskLookup::NotFound),
            TaskLookup::InvalidId => Ok(TaskLookup::InvalidId),
        }
    }

    /// Remove the record, its logs and result, and its checkpoint files.
    /// Running tasks cannot be deleted.
    pub fn delete(&self, id: &str) -> Result<TaskLookup<()>> {
        let record = match self.get(id)? {
            TaskLookup::Found(record) => record,
            TaskLookup::NotFound => return Ok(TaskLookup::NotFound),
            TaskLookup::InvalidId => return Ok(TaskLookup::InvalidId),
        };
        if record.status == TaskStatus::Running {
            return Err(MamformerError::invalid("task", record.id, "cannot delete a running task"));
        }
        remove_checkpoint(&record.config.model_dir, &record.id.to_string())?;
        self.store.delete(&record.id)?;
        info!(task_id = %record.id, "task deleted");
        Ok(TaskLookup::Found(()))
    }
}
