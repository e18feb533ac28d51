// Worker implementations

use std::sync::Arc;

use tracing::info;

use crate::agents::{ImportContext, TransformAgent};
use crate::llm::LLM;
use crate::models::Contact;
use crate::queue::jobs::ImportJob;
use crate::sandbox::SandboxProvider;
use crate::types::AppResult;

/// Runs the agentic strategy for `contacts.import` events
pub struct ImportWorker {
    agent: TransformAgent,
}

impl ImportWorker {
    pub fn new(llm: Arc<LLM>, sandbox: Arc<dyn SandboxProvider>, max_iterations: usize) -> Self {
        Self {
            agent: TransformAgent::new(llm, sandbox, max_iterations),
        }
    }

    pub async fn process_job(&self, job: ImportJob) -> AppResult<Option<Vec<Contact>>> {
        info!(rows = job.table.rows.len(), "Processing import job");

        let mut ctx = ImportContext::new(job.table);
        self.agent.run(&mut ctx, job.ranking_criteria.as_deref()).await
    }
}
