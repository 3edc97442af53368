//! Background job queue
//!
//! Jobs run on tokio's blocking pool with at most `workers` in flight.
//! Must be used from within a tokio runtime.

use super::orchestrator::{DispatchMode, RunOutcome, TaskOrchestrator};
use crate::error::{MamformerError, Result};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::debug;
use uuid::Uuid;

#[derive(Clone)]
pub struct JobQueue {
    orchestrator: TaskOrchestrator,
    permits: Arc<Semaphore>,
}

impl JobQueue {
    pub fn new(orchestrator: TaskOrchestrator, workers: usize) -> Self {
        Self {
            orchestrator,
            permits: Arc::new(Semaphore::new(workers.max(1))),
        }
    }

    /// Enqueue a task and return immediately. The handle resolves to the
    /// run's outcome; failures surface as errors.
    pub fn submit(&self, id: Uuid) -> JoinHandle<Result<RunOutcome>> {
        let orchestrator = self.orchestrator.clone();
        let permits = Arc::clone(&self.permits);
        tokio::spawn(async move {
            let _permit = permits
                .acquire_owned()
                .await
                .map_err(|e| MamformerError::TrainingError(format!("job queue closed: {}", e)))?;
            debug!(task_id = %id, "job dequeued");
            tokio::task::spawn_blocking(move || orchestrator.run(id, DispatchMode::Queued))
                .await
                .map_err(|e| MamformerError::TrainingError(format!("job worker panicked: {}", e)))?
        })
    }
}
