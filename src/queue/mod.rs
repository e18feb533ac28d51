//! Background Jobs
//!
//! In-process stand-in for the event/job service: sending a
//! `contacts.import` event starts exactly one run on a tokio task, and runs
//! are looked up by event id the same way the remote status endpoint
//! exposes them.

pub mod jobs;
pub mod workers;

pub use jobs::{ImportJob, Run, RunStatus, SentEvent, IMPORT_EVENT};
pub use workers::ImportWorker;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::RwLock;
use tokio::task::AbortHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::models::RawTable;
use crate::types::{AppError, AppResult};

/// How long finished runs stay queryable
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(60 * 60);

#[derive(Default)]
struct Registry {
    runs: HashMap<String, Vec<Run>>,
    tasks: HashMap<String, AbortHandle>,
}

impl Registry {
    /// Forget events whose runs all ended more than `retention` ago
    fn prune(&mut self, retention: Duration) -> usize {
        let cutoff = chrono::Duration::from_std(retention)
            .ok()
            .and_then(|retention| Utc::now().checked_sub_signed(retention));
        let Some(cutoff) = cutoff else {
            return 0;
        };

        let before = self.runs.len();
        self.runs.retain(|_, runs| {
            !runs
                .iter()
                .all(|run| run.status.is_terminal() && run.ended_at.is_some_and(|ended| ended < cutoff))
        });
        before - self.runs.len()
    }
}

#[derive(Clone)]
pub struct JobQueue {
    worker: Arc<ImportWorker>,
    registry: Arc<RwLock<Registry>>,
    retention: Duration,
}

impl JobQueue {
    pub fn new(worker: ImportWorker) -> Self {
        Self {
            worker: Arc::new(worker),
            registry: Arc::new(RwLock::new(Registry::default())),
            retention: DEFAULT_RETENTION,
        }
    }

    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    /// Send a `contacts.import` event and start its run
    pub async fn send_import(&self, table: RawTable, ranking_criteria: Option<String>) -> SentEvent {
        let event_id = Uuid::new_v4().to_string();
        let run_id = Uuid::new_v4().to_string();

        let run = Run {
            run_id: run_id.clone(),
            event_id: event_id.clone(),
            status: RunStatus::NotStarted,
            output: None,
            started_at: Utc::now(),
            ended_at: None,
        };

        // Registered before the task starts so a status lookup never misses it.
        let mut registry = self.registry.write().await;
        let pruned = registry.prune(self.retention);
        if pruned > 0 {
            debug!(pruned, "Pruned finished runs");
        }
        registry.runs.insert(event_id.clone(), vec![run]);

        let job = ImportJob {
            table,
            ranking_criteria,
        };
        let queue = self.clone();
        let task_event_id = event_id.clone();
        let handle = tokio::spawn(async move {
            queue.execute(&task_event_id, job).await;
        });
        registry.tasks.insert(event_id.clone(), handle.abort_handle());
        drop(registry);

        info!(event = IMPORT_EVENT, event_id = %event_id, run_id = %run_id, "Event sent");

        SentEvent {
            event_id,
            run_ids: vec![run_id],
        }
    }

    async fn execute(&self, event_id: &str, job: ImportJob) {
        self.update(event_id, RunStatus::Running, None).await;

        match self.worker.process_job(job).await {
            Ok(contacts) => {
                let output = match contacts {
                    Some(contacts) => serde_json::to_value(contacts).ok(),
                    None => Some(serde_json::Value::Null),
                };
                self.update(event_id, RunStatus::Completed, output).await;
            }
            Err(e) => {
                error!(event_id = %event_id, error = %e, "Import run failed");
                let output = serde_json::json!({ "error": e.to_string() });
                self.update(event_id, RunStatus::Failed, Some(output)).await;
            }
        }

        self.registry.write().await.tasks.remove(event_id);
    }

    async fn update(&self, event_id: &str, status: RunStatus, output: Option<serde_json::Value>) {
        let mut registry = self.registry.write().await;
        let Some(run) = registry.runs.get_mut(event_id).and_then(|runs| runs.first_mut()) else {
            warn!(event_id = %event_id, "Status update for unknown event");
            return;
        };
        // A cancelled run stays cancelled.
        if run.status.is_terminal() {
            return;
        }
        run.status = status;
        if status.is_terminal() {
            run.output = output;
            run.ended_at = Some(Utc::now());
        }
        info!(event_id = %event_id, run_id = %run.run_id, status = %status, "Run status changed");
    }

    /// Runs started by the event
    pub async fn runs(&self, event_id: &str) -> AppResult<Vec<Run>> {
        self.registry
            .read()
            .await
            .runs
            .get(event_id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("event {}", event_id)))
    }

    /// Abort a run that has not finished yet. Returns whether anything was
    /// cancelled.
    pub async fn cancel(&self, event_id: &str) -> bool {
        let handle = self.registry.write().await.tasks.remove(event_id);
        let Some(handle) = handle else {
            return false;
        };
        handle.abort();
        self.update(event_id, RunStatus::Cancelled, None).await;
        info!(event_id = %event_id, "Run cancelled");
        true
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::llm::testing::replying;
    use crate::sandbox::testing::ScriptedProvider;

    pub const PROGRAM: &str = "```javascript\nconsole.log('[]')\n```";

    /// Queue whose runs always print `stdout` from the sandbox
    pub fn queue_printing(stdout: &str) -> JobQueue {
        let (llm, _) = replying(PROGRAM);
        let provider = Arc::new(ScriptedProvider::printing(stdout));
        JobQueue::new(ImportWorker::new(llm, provider, 5))
    }
}
