//! Transform Agent
//!
//! Agentic strategy. Each iteration the model writes a JavaScript program
//! that reads the dataset from the sandbox and prints the mapped contacts
//! as a JSON array. The program runs in a fresh sandbox that is destroyed
//! when the iteration ends; the outcome is fed back to the model as the
//! next user message.
//!
//! The loop stops as soon as mapped contacts have been recorded in the
//! [`ImportContext`] or the iteration cap is reached. Reaching the cap is
//! not an error: the result is simply absent.

use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::agents::extract_fenced_block;
use crate::llm::LLM;
use crate::models::{lenient_string, Contact, RawTable, TargetField};
use crate::parser;
use crate::sandbox::{with_sandbox, Execution, SandboxProvider};
use crate::types::{AppResult, LLMMessage, LLMRequest};

pub const DEFAULT_MAX_ITERATIONS: usize = 5;

const MAPPED: &str = "Contacts mapped!";
const DEFAULT_CRITERIA: &str = "on their job title.";

/// State threaded through every iteration of one agentic import
#[derive(Debug, Clone, Default)]
pub struct ImportContext {
    table: RawTable,
    mapped_contacts: Option<Vec<Contact>>,
    transcript: Vec<LLMMessage>,
    iterations: usize,
}

impl ImportContext {
    pub fn new(table: RawTable) -> Self {
        Self {
            table,
            ..Default::default()
        }
    }

    pub fn table(&self) -> &RawTable {
        &self.table
    }

    pub fn mapped_contacts(&self) -> Option<&[Contact]> {
        self.mapped_contacts.as_deref()
    }

    pub fn set_mapped_contacts(&mut self, contacts: Vec<Contact>) {
        self.mapped_contacts = Some(contacts);
    }

    pub fn transcript(&self) -> &[LLMMessage] {
        &self.transcript
    }

    pub fn iterations(&self) -> usize {
        self.iterations
    }
}

pub struct TransformAgent {
    llm: Arc<LLM>,
    sandbox: Arc<dyn SandboxProvider>,
    max_iterations: usize,
}

impl TransformAgent {
    pub fn new(llm: Arc<LLM>, sandbox: Arc<dyn SandboxProvider>, max_iterations: usize) -> Self {
        Self {
            llm,
            sandbox,
            max_iterations,
        }
    }

    /// Run the loop until contacts are mapped or the iteration cap is hit.
    /// Model failures abort the run; sandbox failures become feedback.
    pub async fn run(
        &self,
        ctx: &mut ImportContext,
        ranking_criteria: Option<&str>,
    ) -> AppResult<Option<Vec<Contact>>> {
        if ctx.table.is_empty() {
            info!("No rows to transform");
            ctx.set_mapped_contacts(Vec::new());
            return Ok(ctx.mapped_contacts.clone());
        }

        let csv = parser::to_csv(&ctx.table)?;
        let system = self.system_prompt(ctx);

        if ctx.transcript.is_empty() {
            ctx.transcript.push(LLMMessage::user(Self::instruction(ranking_criteria)));
        }

        while ctx.mapped_contacts.is_none() && ctx.iterations < self.max_iterations {
            ctx.iterations += 1;
            let iteration = ctx.iterations;
            info!(iteration, max = self.max_iterations, "Transform iteration started");

            let request = LLMRequest {
                model: self.llm.model().to_string(),
                messages: ctx.transcript.clone(),
                max_tokens: Some(4096),
                temperature: Some(0.0),
                system_instruction: Some(system.clone()),
            };
            let response = self.llm.create_chat_completion(&request).await?;
            ctx.transcript.push(LLMMessage::assistant(response.content.clone()));

            let feedback = match extract_fenced_block(&response.content, &["javascript", "js"]) {
                Some(code) => self.execute(ctx, &csv, code).await,
                None => failure("the reply contains no ```javascript code block"),
            };

            debug!(iteration, feedback = %feedback, "Transform iteration finished");
            ctx.transcript.push(LLMMessage::user(feedback));
        }

        match ctx.mapped_contacts() {
            Some(contacts) => info!(count = contacts.len(), iterations = ctx.iterations, "Contacts transformed"),
            None => warn!(iterations = ctx.iterations, "Iteration cap reached without mapped contacts"),
        }

        Ok(ctx.mapped_contacts.clone())
    }

    /// Run one program in a fresh sandbox and turn the outcome into feedback
    async fn execute(&self, ctx: &mut ImportContext, csv: &str, code: &str) -> String {
        let data_path = self.sandbox.data_path().to_string();
        let csv = csv.to_string();
        let code = code.to_string();

        let outcome = with_sandbox(self.sandbox.as_ref(), |sandbox| async move {
            sandbox.write_file(&data_path, &csv).await?;
            sandbox.run_code(&code).await
        })
        .await;

        match outcome {
            Ok(execution) => match read_contacts(execution) {
                Ok(contacts) => {
                    ctx.set_mapped_contacts(contacts);
                    MAPPED.to_string()
                }
                Err(feedback) => feedback,
            },
            Err(e) => failure(&e.to_string()),
        }
    }

    fn system_prompt(&self, ctx: &ImportContext) -> String {
        let properties = &ctx.table().headers;
        let targets: Vec<&str> = TargetField::ALL.iter().map(|f| f.as_str()).collect();

        format!(
            "You are a contacts mapper agent that maps the contacts from the following properties: {}, \
             to the following properties: {}. \
             Generate a javascript program that will prints the transformed CSV file located in {} as a JSON array. \
             Reply with the program in a single ```javascript code block. \
             IMPORTANT: The program should be able to run without npm dependencies.",
            properties.join(", "),
            targets.join(", "),
            self.sandbox.data_path()
        )
    }

    fn instruction(ranking_criteria: Option<&str>) -> String {
        let criteria = ranking_criteria
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .unwrap_or(DEFAULT_CRITERIA);
        format!(
            "Map the provided contacts list to be imported as valid contacts and rank from 1-10 based {}",
            criteria
        )
    }
}

/// One record as printed by a generated program. Nothing is required
/// here; records missing an identifying field are dropped afterwards.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PrintedContact {
    #[serde(default, deserialize_with = "lenient_string")]
    id: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    full_name: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    email: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    position: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    company: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    ranking: Option<String>,
}

impl From<PrintedContact> for Contact {
    fn from(printed: PrintedContact) -> Self {
        Contact {
            id: printed.id,
            full_name: printed.full_name.map(|v| v.trim().to_string()).unwrap_or_default(),
            email: printed.email.map(|v| v.trim().to_string()).unwrap_or_default(),
            position: printed.position,
            company: printed.company,
            ranking: printed.ranking,
        }
    }
}

fn failure(error: &str) -> String {
    format!("Could not transform contacts: {}", error)
}

/// Standard output wins when it parses; otherwise the program error, if
/// any, is reported back.
fn read_contacts(execution: Execution) -> Result<Vec<Contact>, String> {
    let stdout = execution.stdout_text();
    let stdout = stdout.trim();

    let parse_error = if stdout.is_empty() {
        "program printed nothing to standard output".to_string()
    } else {
        match serde_json::from_str::<Vec<PrintedContact>>(stdout) {
            Ok(printed) => {
                let total = printed.len();
                let contacts: Vec<Contact> = printed
                    .into_iter()
                    .map(Contact::from)
                    .filter(Contact::is_identified)
                    .collect();
                if contacts.len() < total {
                    debug!(dropped = total - contacts.len(), "Dropped printed records without fullName or email");
                }
                if total > 0 && contacts.is_empty() {
                    "no printed record has both a fullName and an email".to_string()
                } else {
                    return Ok(contacts);
                }
            }
            Err(e) => format!("standard output is not a JSON array of contacts: {}", e),
        }
    };

    match execution.error {
        Some(error) => Err(format!("{}: \n {}", error.name, error.traceback)),
        None => Err(failure(&parse_error)),
    }
}
