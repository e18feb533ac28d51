//! Column mapping from target fields to source headers, and the manual
//! strategy that builds one from explicit per-field selections.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::models::TargetField;
use crate::types::{AppError, AppResult};

/// Target field → source header. A field missing from the map is unmapped.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldMapping(BTreeMap<TargetField, String>);

impl FieldMapping {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, field: TargetField) -> Option<&str> {
        self.0.get(&field).map(String::as_str)
    }

    /// Map `field` to `header`; an empty header unmaps the field
    pub fn set(&mut self, field: TargetField, header: impl Into<String>) {
        let header = header.into();
        if header.is_empty() {
            self.0.remove(&field);
        } else {
            self.0.insert(field, header);
        }
    }

    pub fn with(mut self, field: TargetField, header: impl Into<String>) -> Self {
        self.set(field, header);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (TargetField, &str)> {
        self.0.iter().map(|(field, header)| (*field, header.as_str()))
    }

    /// Both identifying fields have a column selected
    pub fn has_identify_fields(&self) -> bool {
        TargetField::IDENTIFY.iter().all(|f| self.0.contains_key(f))
    }

    /// Manual selection of a column for one field. The header must be one of
    /// the headers observed in the file, or empty to clear the selection.
    pub fn select(&mut self, headers: &[String], field: TargetField, header: &str) -> AppResult<()> {
        if !header.is_empty() && !headers.iter().any(|h| h == header) {
            return Err(AppError::InvalidRequest(format!(
                "Column '{}' is not present in the uploaded file",
                header
            )));
        }
        debug!(field = %field, header = %header, "Column selected");
        self.set(field, header);
        Ok(())
    }

    /// Build a mapping from explicit selections, validating each one
    pub fn manual<'a, I>(headers: &[String], selections: I) -> AppResult<Self>
    where
        I: IntoIterator<Item = (TargetField, &'a str)>,
    {
        let mut mapping = Self::new();
        for (field, header) in selections {
            mapping.select(headers, field, header)?;
        }
        Ok(mapping)
    }

    /// Mapping for headers that already carry target field names
    pub fn identity(headers: &[String]) -> Self {
        let mut mapping = Self::new();
        for field in TargetField::ALL {
            if headers.iter().any(|h| h == field.as_str()) {
                mapping.set(field, field.as_str());
            }
        }
        mapping
    }

    /// Read a JSON object produced by a model. Keys are normally target
    /// field names with source headers as values; objects written the other
    /// way round (header → field) are accepted too. Non-string values and
    /// unknown names are ignored.
    pub fn from_json_object(object: &serde_json::Map<String, serde_json::Value>) -> Self {
        let mut mapping = Self::new();
        for (key, value) in object {
            let Some(value) = value.as_str() else { continue };
            if let Some(field) = TargetField::from_name(key) {
                mapping.set(field, value);
            } else if let Some(field) = TargetField::from_name(value) {
                mapping.set(field, key.as_str());
            }
        }
        mapping
    }
}

impl FromIterator<(TargetField, String)> for FieldMapping {
    fn from_iter<T: IntoIterator<Item = (TargetField, String)>>(iter: T) -> Self {
        let mut mapping = Self::new();
        for (field, header) in iter {
            mapping.set(field, header);
        }
        mapping
    }
}
