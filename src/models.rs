use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize};

use crate::config::Config;
use crate::llm::LLM;
use crate::mapping::FieldMapping;
use crate::orchestrator::ContactBook;
use crate::queue::{ImportWorker, JobQueue};
use crate::sandbox::SandboxProvider;

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub llm: Arc<LLM>,
    pub sandbox: Arc<dyn SandboxProvider>,
    pub jobs: JobQueue,
    pub contacts: ContactBook,
}

impl AppState {
    /// Wire the job queue to the given model and sandbox provider
    pub fn new(config: Config, llm: Arc<LLM>, sandbox: Arc<dyn SandboxProvider>) -> Self {
        let worker = ImportWorker::new(
            Arc::clone(&llm),
            Arc::clone(&sandbox),
            config.agent.max_iterations,
        );
        let jobs = JobQueue::new(worker).with_retention(config.agent.run_retention());
        Self {
            config,
            llm,
            sandbox,
            jobs,
            contacts: ContactBook::new(),
        }
    }
}

/// Destination fields every import populates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TargetField {
    FullName,
    Email,
    Position,
    Company,
    Ranking,
}

impl TargetField {
    pub const ALL: [TargetField; 5] = [
        TargetField::FullName,
        TargetField::Email,
        TargetField::Position,
        TargetField::Company,
        TargetField::Ranking,
    ];

    /// Fields that identify a contact; both must be mapped and non-empty.
    pub const IDENTIFY: [TargetField; 2] = [TargetField::FullName, TargetField::Email];

    /// Wire name used in CSV headers, prompts and JSON
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetField::FullName => "fullName",
            TargetField::Email => "email",
            TargetField::Position => "position",
            TargetField::Company => "company",
            TargetField::Ranking => "ranking",
        }
    }

    pub fn is_required(&self) -> bool {
        Self::IDENTIFY.contains(self)
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.as_str() == name)
    }
}

impl std::fmt::Display for TargetField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TargetField {
    type Err = crate::types::AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_name(s.trim()).ok_or_else(|| {
            crate::types::AppError::InvalidRequest(format!("Unknown target field: {}", s))
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "lenient_string")]
    pub id: Option<String>,
    pub full_name: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "lenient_string")]
    pub position: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "lenient_string")]
    pub company: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "lenient_string")]
    pub ranking: Option<String>,
}

impl Contact {
    /// Every required field carries a non-empty value
    pub fn is_identified(&self) -> bool {
        TargetField::ALL
            .iter()
            .filter(|field| field.is_required())
            .all(|field| self.get(*field).is_some_and(|value| !value.is_empty()))
    }

    /// Value of a target field, `None` when the optional field is unset
    pub fn get(&self, field: TargetField) -> Option<&str> {
        match field {
            TargetField::FullName => Some(self.full_name.as_str()),
            TargetField::Email => Some(self.email.as_str()),
            TargetField::Position => self.position.as_deref(),
            TargetField::Company => self.company.as_deref(),
            TargetField::Ranking => self.ranking.as_deref(),
        }
    }

    pub fn set(&mut self, field: TargetField, value: String) {
        match field {
            TargetField::FullName => self.full_name = value,
            TargetField::Email => self.email = value,
            TargetField::Position => self.position = Some(value),
            TargetField::Company => self.company = Some(value),
            TargetField::Ranking => self.ranking = Some(value),
        }
    }
}

// Generated programs print rankings as numbers as often as strings.
pub(crate) fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(serde_json::Value::Null) => None,
        Some(serde_json::Value::String(s)) => Some(s),
        Some(other) => Some(other.to_string()),
    })
}

/// One parsed row keyed by source header.
pub type Record = BTreeMap<String, String>;

/// Header row plus data rows, cells aligned to headers by position.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportStep {
    Upload,
    Identify,
    Map,
    Mapping,
    Import,
}

impl std::fmt::Display for ImportStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ImportStep::Upload => "upload",
            ImportStep::Identify => "identify",
            ImportStep::Map => "map",
            ImportStep::Mapping => "mapping",
            ImportStep::Import => "import",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// Columns chosen explicitly per target field
    Manual,
    /// One model call infers the column mapping
    Inference,
    /// Generated code transforms the rows inside a sandbox
    Agentic,
}

// API Request/Response types

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportRequest {
    pub file_name: String,
    pub csv: String,
    pub strategy: Strategy,
    #[serde(default)]
    pub mapping: Option<FieldMapping>,
    #[serde(default)]
    pub ranking_criteria: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportResponse {
    pub step: ImportStep,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mapping: Option<FieldMapping>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contacts: Option<Vec<Contact>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_ids: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeResponse {
    pub merged: usize,
    pub total: usize,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_field_wire_names() {
        let names: Vec<&str> = TargetField::ALL.iter().map(|f| f.as_str()).collect();
        assert_eq!(names, ["fullName", "email", "position", "company", "ranking"]);
        assert_eq!(
            serde_json::to_string(&TargetField::FullName).unwrap(),
            "\"fullName\""
        );
        assert_eq!("company".parse::<TargetField>().unwrap(), TargetField::Company);
        assert!("phone".parse::<TargetField>().is_err());
    }

    #[test]
    fn test_contact_serialization_omits_unset_fields() {
        let contact = Contact {
            full_name: "Ada Lovelace".to_string(),
            email: "ada@x.com".to_string(),
            ..Default::default()
        };
        let json = serde_json::to_value(&contact).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"fullName": "Ada Lovelace", "email": "ada@x.com"})
        );
    }

    #[test]
    fn test_contact_accepts_numeric_ranking() {
        let contact: Contact = serde_json::from_str(
            r#"{"fullName": "Grace Hopper", "email": "grace@navy.mil", "ranking": 9, "extra": true}"#,
        )
        .unwrap();
        assert_eq!(contact.ranking.as_deref(), Some("9"));
        assert_eq!(contact.position, None);
    }

    #[test]
    fn test_contact_is_identified() {
        let mut contact = Contact {
            full_name: "Ada Lovelace".to_string(),
            email: "ada@x.com".to_string(),
            ..Default::default()
        };
        assert!(contact.is_identified());

        contact.email.clear();
        assert!(!contact.is_identified());
        assert!(!Contact::default().is_identified());
        assert!(TargetField::Email.is_required());
        assert!(!TargetField::Ranking.is_required());
    }

    #[test]
    fn test_contact_requires_identify_fields() {
        let parsed = serde_json::from_str::<Contact>(r#"{"fullName": "No Email"}"#);
        assert!(parsed.is_err());
    }
}
