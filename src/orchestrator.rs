//! Import Orchestrator
//!
//! One [`ImportSession`] per import dialog. The session walks forward
//! through the import steps and is consumed by either [`ImportSession::confirm`]
//! (contacts handed to the merge callback) or [`ImportSession::cancel`]
//! (everything discarded).
//!
//! ```text
//! manual:     upload ─▶ identify ─▶ map ─▶ import
//! inference:  upload ─▶ mapping ──────────▶ import
//! agentic:    upload ─▶ mapping (job + poll) ─▶ import
//! ```

use std::sync::Arc;

use tokio::sync::{watch, RwLock};
use tracing::{debug, info, warn};

use crate::agents::MappingAgent;
use crate::llm::LLM;
use crate::mapper;
use crate::mapping::FieldMapping;
use crate::models::{Contact, ImportStep, RawTable, Strategy, TargetField};
use crate::parser;
use crate::poll::{poll_until_terminal, PollConfig, StatusSource};
use crate::queue::{JobQueue, SentEvent};
use crate::types::{AppError, AppResult};

/// Number of contacts shown before confirming
pub const PREVIEW_LEN: usize = 5;

/// Append-only contact list shared by every import
#[derive(Clone, Default)]
pub struct ContactBook {
    contacts: Arc<RwLock<Vec<Contact>>>,
}

impl ContactBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `contacts` in order and return the new total
    pub async fn merge(&self, contacts: Vec<Contact>) -> usize {
        let mut book = self.contacts.write().await;
        let merged = contacts.len();
        book.extend(contacts);
        info!(merged, total = book.len(), "Contacts merged");
        book.len()
    }

    pub async fn list(&self) -> Vec<Contact> {
        self.contacts.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.contacts.read().await.len()
    }
}

/// Cancels an in-flight wait of the session it was taken from
#[derive(Clone)]
pub struct SessionCanceller {
    tx: Arc<watch::Sender<bool>>,
}

impl SessionCanceller {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

pub struct ImportSession {
    strategy: Strategy,
    step: ImportStep,
    file_name: Option<String>,
    table: RawTable,
    mapping: FieldMapping,
    contacts: Vec<Contact>,
    ranking_criteria: Option<String>,
    event: Option<SentEvent>,
    cancel_tx: Arc<watch::Sender<bool>>,
}

impl ImportSession {
    pub fn new(strategy: Strategy) -> Self {
        let (cancel_tx, _) = watch::channel(false);
        Self {
            strategy,
            step: ImportStep::Upload,
            file_name: None,
            table: RawTable::default(),
            mapping: FieldMapping::new(),
            contacts: Vec::new(),
            ranking_criteria: None,
            event: None,
            cancel_tx: Arc::new(cancel_tx),
        }
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    pub fn step(&self) -> ImportStep {
        self.step
    }

    pub fn file_name(&self) -> Option<&str> {
        self.file_name.as_deref()
    }

    pub fn table(&self) -> &RawTable {
        &self.table
    }

    pub fn headers(&self) -> &[String] {
        &self.table.headers
    }

    pub fn mapping(&self) -> &FieldMapping {
        &self.mapping
    }

    pub fn contacts(&self) -> &[Contact] {
        &self.contacts
    }

    /// First few projected contacts
    pub fn preview(&self) -> &[Contact] {
        &self.contacts[..self.contacts.len().min(PREVIEW_LEN)]
    }

    /// Event of the agentic run, once submitted
    pub fn event(&self) -> Option<&SentEvent> {
        self.event.as_ref()
    }

    pub fn canceller(&self) -> SessionCanceller {
        SessionCanceller {
            tx: Arc::clone(&self.cancel_tx),
        }
    }

    fn expect_step(&self, expected: ImportStep, action: &str) -> AppResult<()> {
        if self.step != expected {
            return Err(AppError::InvalidStep {
                step: self.step.to_string(),
                action: action.to_string(),
            });
        }
        Ok(())
    }

    fn expect_strategy(&self, expected: Strategy, action: &str) -> AppResult<()> {
        if self.strategy != expected {
            return Err(AppError::InvalidRequest(format!(
                "{} is not available for the {:?} strategy",
                action, self.strategy
            )));
        }
        Ok(())
    }

    /// Ranking criteria for the agentic strategy, set before uploading
    pub fn set_ranking_criteria(&mut self, criteria: Option<String>) -> AppResult<()> {
        self.expect_step(ImportStep::Upload, "set ranking criteria")?;
        self.ranking_criteria = criteria.filter(|c| !c.trim().is_empty());
        Ok(())
    }

    /// Accept an uploaded file. Only CSV files are accepted; anything else
    /// leaves the session in the upload step.
    pub fn select_file(&mut self, file_name: &str, text: &str) -> AppResult<ImportStep> {
        self.expect_step(ImportStep::Upload, "select file")?;

        let is_csv = mime_guess::from_path(file_name)
            .iter()
            .any(|m| m.essence_str() == mime::TEXT_CSV.essence_str());
        if !is_csv {
            warn!(file_name = %file_name, "Rejected non-CSV upload");
            return Err(AppError::InvalidRequest(format!(
                "{} is not a CSV file",
                file_name
            )));
        }

        self.table = parser::parse(text);
        self.file_name = Some(file_name.to_string());
        self.step = match self.strategy {
            Strategy::Manual => ImportStep::Identify,
            Strategy::Inference | Strategy::Agentic => ImportStep::Mapping,
        };

        info!(
            file_name = %file_name,
            columns = self.table.headers.len(),
            rows = self.table.rows.len(),
            step = %self.step,
            "File selected"
        );
        Ok(self.step)
    }

    /// Choose the column for one target field (manual strategy). The
    /// preview is recomputed on every change.
    pub fn select_column(&mut self, field: TargetField, header: &str) -> AppResult<()> {
        if !matches!(self.step, ImportStep::Identify | ImportStep::Map) {
            return Err(AppError::InvalidStep {
                step: self.step.to_string(),
                action: "select column".to_string(),
            });
        }
        self.mapping.select(&self.table.headers, field, header)?;
        self.contacts = mapper::project(&self.table, &self.mapping);
        debug!(contacts = self.contacts.len(), "Preview recomputed");
        Ok(())
    }

    /// Whether `next` would succeed from the current step
    pub fn can_advance(&self) -> bool {
        match self.step {
            ImportStep::Identify => self.mapping.has_identify_fields(),
            ImportStep::Map => true,
            ImportStep::Upload | ImportStep::Mapping | ImportStep::Import => false,
        }
    }

    /// Advance a manual session: identify → map → import
    pub fn next(&mut self) -> AppResult<ImportStep> {
        if !self.can_advance() {
            return Err(AppError::InvalidStep {
                step: self.step.to_string(),
                action: "next".to_string(),
            });
        }
        self.step = match self.step {
            ImportStep::Identify => ImportStep::Map,
            _ => ImportStep::Import,
        };
        debug!(step = %self.step, "Step advanced");
        Ok(self.step)
    }

    /// Apply a complete manual mapping and go straight to the preview
    pub fn apply_mapping(&mut self, mapping: &FieldMapping) -> AppResult<&[Contact]> {
        self.expect_strategy(Strategy::Manual, "Applying a mapping")?;
        for (field, header) in mapping.iter() {
            self.select_column(field, header)?;
        }
        while self.step != ImportStep::Import {
            self.next()?;
        }
        Ok(&self.contacts)
    }

    /// Resolve the mapping with one model call, then project the table.
    /// On failure the session stays in the mapping step with no contacts.
    pub async fn resolve_with_inference(&mut self, llm: &LLM) -> AppResult<&[Contact]> {
        self.expect_strategy(Strategy::Inference, "Inference")?;
        self.expect_step(ImportStep::Mapping, "infer mapping")?;

        let sample = self.table.sample_record();
        match MappingAgent::infer_mapping(llm, &self.table.headers, sample.as_ref()).await {
            Ok(mapping) => {
                self.contacts = mapper::project(&self.table, &mapping);
                self.mapping = mapping;
                self.step = ImportStep::Import;
                info!(contacts = self.contacts.len(), "Inference mapping applied");
                Ok(&self.contacts)
            }
            Err(e) => {
                self.contacts.clear();
                warn!(error = %e, "Inference mapping failed");
                Err(e)
            }
        }
    }

    /// Send the agentic import job for the uploaded table
    pub async fn submit_agentic(&mut self, jobs: &JobQueue) -> AppResult<SentEvent> {
        self.expect_strategy(Strategy::Agentic, "Agentic import")?;
        self.expect_step(ImportStep::Mapping, "submit import job")?;
        if self.event.is_some() {
            return Err(AppError::InvalidStep {
                step: self.step.to_string(),
                action: "submit import job twice".to_string(),
            });
        }

        let sent = jobs
            .send_import(self.table.clone(), self.ranking_criteria.clone())
            .await;
        self.event = Some(sent.clone());
        Ok(sent)
    }

    /// Wait for the submitted run and take its contacts. A completed run
    /// without output yields zero contacts.
    pub async fn await_agentic(
        &mut self,
        source: &dyn StatusSource,
        config: &PollConfig,
    ) -> AppResult<&[Contact]> {
        self.expect_step(ImportStep::Mapping, "await import job")?;
        let event_id = self
            .event
            .as_ref()
            .map(|e| e.event_id.clone())
            .ok_or_else(|| AppError::InvalidStep {
                step: self.step.to_string(),
                action: "await before submitting".to_string(),
            })?;

        let run = poll_until_terminal(source, &event_id, config, self.cancel_tx.subscribe()).await?;
        self.contacts = match run.output {
            Some(serde_json::Value::Null) | None => Vec::new(),
            Some(output) => serde_json::from_value(output)?,
        };
        self.step = ImportStep::Import;
        info!(event_id = %event_id, contacts = self.contacts.len(), "Agentic import finished");
        Ok(&self.contacts)
    }

    /// Submit, wait and, if the wait is cancelled, abort the run as well
    pub async fn resolve_with_agent(
        &mut self,
        jobs: &JobQueue,
        config: &PollConfig,
    ) -> AppResult<&[Contact]> {
        let sent = self.submit_agentic(jobs).await?;
        match self.await_agentic(jobs, config).await {
            Err(AppError::Cancelled) => {
                jobs.cancel(&sent.event_id).await;
                Err(AppError::Cancelled)
            }
            result => result,
        }
    }

    /// Hand the contacts to `merge` and close the session
    pub fn confirm<F, R>(self, merge: F) -> AppResult<R>
    where
        F: FnOnce(Vec<Contact>) -> R,
    {
        self.expect_step(ImportStep::Import, "confirm")?;
        info!(contacts = self.contacts.len(), file_name = ?self.file_name, "Import confirmed");
        Ok(merge(self.contacts))
    }

    /// Discard the session; an in-flight wait ends with `Cancelled`
    pub fn cancel(self) {
        self.cancel_tx.send_replace(true);
        debug!(step = %self.step, "Import cancelled");
    }
}
