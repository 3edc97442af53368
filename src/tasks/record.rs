//! Task records and lookup results

use crate::training::{TrainingConfig, TrainingLogEntry};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_finished(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: Uuid,
    pub status: TaskStatus,
    pub config: TrainingConfig,
    pub data_path: PathBuf,
    pub target: String,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl TaskRecord {
    pub fn new(data_path: impl Into<PathBuf>, target: impl Into<String>, config: TrainingConfig) -> Self {
        Self {
            id: Uuid::new_v4(),
            status: TaskStatus::Pending,
            config,
            data_path: data_path.into(),
            target: target.into(),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            error: None,
        }
    }
}

/// Outcome of looking a task up by a caller-supplied identifier
#[derive(Debug, Clone, PartialEq)]
pub enum TaskLookup<T> {
    Found(T),
    NotFound,
    InvalidId,
}

impl<T> TaskLookup<T> {
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> TaskLookup<U> {
        match self {
            TaskLookup::Found(v) => TaskLookup::Found(f(v)),
            TaskLookup::NotFound => TaskLookup::NotFound,
            TaskLookup::InvalidId => TaskLookup::InvalidId,
        }
    }

    pub fn found(self) -> Option<T> {
        match self {
            TaskLookup::Found(v) => Some(v),
            _ => None,
        }
    }
}

/// Parse a task identifier; malformed strings are reported, not raised
pub fn parse_task_id(id: &str) -> Option<Uuid> {
    Uuid::parse_str(id.trim()).ok()
}

/// Snapshot of a task's progress for status queries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskProgress {
    pub id: Uuid,
    pub status: TaskStatus,
    /// Percent; 100 once completed
    pub progress: f64,
    pub latest: Option<TrainingLogEntry>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl TaskProgress {
    pub fn new(record: &TaskRecord, latest: Option<TrainingLogEntry>) -> Self {
        let progress = match record.status {
            TaskStatus::Completed => 100.0,
            _ => latest.as_ref().map(|e| e.overall_progress).unwrap_or(0.0),
        };
        Self {
            id: record.id,
            status: record.status,
            progress,
            latest,
            started_at: record.started_at,
            completed_at: record.completed_at,
            error: record.error.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_task_id() {
        let id = Uuid::new_v4();
        assert_eq!(parse_task_id(&id.to_string()), Some(id));
        assert_eq!(parse_task_id("not-a-uuid"), None);
    }

    #[test]
    fn test_status_serde() {
        assert_eq!(serde_json::to_string(&TaskStatus::Running).unwrap(), "\"running\"");
        assert!(TaskStatus::Failed.is_finished());
        assert!(!TaskStatus::Pending.is_finished());
    }

    #[test]
    fn test_progress_completed_is_full() {
        let mut record = TaskRecord::new("data.csv", "y", TrainingConfig::default());
        assert_eq!(TaskProgress::new(&record, None).progress, 0.0);
        record.status = TaskStatus::Completed;
        assert_eq!(TaskProgress::new(&record, None).progress, 100.0);
    }

    #[test]
    fn test_lookup_map() {
        let l: TaskLookup<u32> = TaskLookup::Found(2);
        assert_eq!(l.map(|v| v * 2), TaskLookup::Found(4));
        let l: TaskLookup<u32> = TaskLookup::InvalidId;
        assert_eq!(l.map(|v| v * 2).found(), None);
    }
}
