//! Task orchestration boundary
//!
//! - Task records with status transitions and timestamps
//! - In-memory and JSON-directory stores
//! - Inline or queued dispatch of training runs

mod orchestrator;
mod queue;
mod record;
mod store;

pub use orchestrator::{DispatchMode, RunOutcome, TaskOrchestrator};
pub use queue::JobQueue;
pub use record::{parse_task_id, TaskLookup, TaskProgress, TaskRecord, TaskStatus};
pub use store::{InMemoryTaskStore, JsonTaskStore, TaskStore};
