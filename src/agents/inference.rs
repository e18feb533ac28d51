//! Mapping Agent
//!
//! Single-call inference: the observed headers (and optionally one sample
//! row) go to the model, which answers with a JSON object mapping target
//! fields to source headers inside a fenced ```json block. One round trip,
//! no retry.

use tracing::{debug, info, warn};

use crate::agents::{extract_fenced_block, extract_tagged_block};
use crate::llm::LLM;
use crate::mapping::FieldMapping;
use crate::models::{Record, TargetField};
use crate::types::{AppError, AppResult, LLMMessage, LLMRequest};

/// Fields the model is asked to map. Ranking is left out: a file never
/// carries it in a form the model could match reliably.
pub const INFERENCE_TARGETS: [TargetField; 4] = [
    TargetField::FullName,
    TargetField::Email,
    TargetField::Position,
    TargetField::Company,
];

pub struct MappingAgent;

impl MappingAgent {
    /// Ask the model for a column mapping over `headers`
    pub async fn infer_mapping(
        llm: &LLM,
        headers: &[String],
        sample: Option<&Record>,
    ) -> AppResult<FieldMapping> {
        info!(
            provider = %llm.provider_name(),
            columns = headers.len(),
            "Inferring column mapping"
        );

        let request = LLMRequest {
            model: llm.model().to_string(),
            messages: vec![LLMMessage::user(Self::create_mapping_prompt(headers, sample))],
            max_tokens: Some(1024),
            temperature: Some(0.0),
            system_instruction: None,
        };

        let response = llm.create_chat_completion(&request).await?;
        debug!(response_len = response.content.len(), "Received mapping response");

        let mapping = Self::parse_mapping_response(&response.content, headers)?;
        info!(mapped = mapping.len(), "Column mapping inferred");
        Ok(mapping)
    }

    fn create_mapping_prompt(headers: &[String], sample: Option<&Record>) -> String {
        let targets: Vec<&str> = INFERENCE_TARGETS.iter().map(|f| f.as_str()).collect();

        let mut prompt = format!(
            "Return a JSON object to map the following contact properties: {} to the following properties: {}.\n\
             Important:\n\
             - only a 1-1 mapping is allowed.\n\
             - only return a mapping if necessary, otherwise return an empty object.\n\
             - use the target property as key and the contact property as value.\n\
             - wrap the object in a ```json code block.",
            headers.join(", "),
            targets.join(", ")
        );

        if let Some(sample) = sample {
            if let Ok(sample) = serde_json::to_string(sample) {
                prompt.push_str(&format!("\n\nExample contact: {}", sample));
            }
        }

        prompt
    }

    /// Read the mapping out of a model reply. An empty object means the
    /// headers already carry the target names.
    pub fn parse_mapping_response(response: &str, headers: &[String]) -> AppResult<FieldMapping> {
        let block = extract_fenced_block(response, &["json"])
            .or_else(|| extract_tagged_block(response, "json"))
            .ok_or_else(|| {
                warn!("Mapping response has no ```json block");
                AppError::MappingUnavailable("response contains no ```json block".to_string())
            })?;

        let value: serde_json::Value = serde_json::from_str(block).map_err(|e| {
            AppError::MappingUnavailable(format!("mapping block is not valid JSON: {}", e))
        })?;

        let object = value.as_object().ok_or_else(|| {
            AppError::MappingUnavailable("mapping block is not a JSON object".to_string())
        })?;

        if object.is_empty() {
            debug!("Empty mapping returned, using header names as-is");
            let mapping = FieldMapping::identity(headers);
            if !mapping.has_identify_fields() {
                return Err(AppError::MappingUnavailable(
                    "empty mapping but the headers do not name fullName and email".to_string(),
                ));
            }
            return Ok(mapping);
        }

        let mapping = FieldMapping::from_json_object(object);
        if mapping.is_empty() {
            return Err(AppError::MappingUnavailable(
                "mapping object names no known target field".to_string(),
            ));
        }

        for (field, header) in mapping.iter() {
            if !headers.iter().any(|h| h == header) {
                warn!(field = %field, header = %header, "Inferred header not present in file");
            }
        }

        Ok(mapping)
    }
}
