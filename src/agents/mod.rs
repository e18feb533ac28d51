//! Agent System
//!
//! Model-driven column mapping. Two agents resolve how an uploaded file maps
//! onto the target fields:
//!
//! - **Mapping Agent**: one model call that returns a column mapping as JSON
//! - **Transform Agent**: a bounded loop in which the model writes a program
//!   that is executed in a sandbox against the dataset
//!
//! ## Pipeline Overview
//!
//! ```text
//!   headers + sample row                 table + ranking criteria
//!          │                                      │
//!          ▼                                      ▼
//!   ┌─────────────┐                       ┌─────────────┐
//!   │   Mapping   │  → ```json block      │  Transform  │ ◀─┐ feedback
//!   │    Agent    │                       │    Agent    │   │
//!   └─────────────┘                       └─────────────┘   │
//!          │                                      │ code     │
//!          ▼                                      ▼         │
//!    FieldMapping                          ┌─────────────┐   │
//!          │                               │   Sandbox   │ ──┘
//!          ▼                               └─────────────┘
//!   mapper::project                               │ stdout JSON
//!          │                                      ▼
//!          └──────────────▶  Vec<Contact>  ◀──────┘
//! ```

pub mod inference;
pub mod transform;

pub use inference::MappingAgent;
pub use transform::{ImportContext, TransformAgent};

/// Body of the first fenced block (```tag ... ```) whose info string is one
/// of `tags`, compared case-insensitively. Surrounding whitespace is trimmed.
pub fn extract_fenced_block<'a>(text: &'a str, tags: &[&str]) -> Option<&'a str> {
    let mut rest = text;
    while let Some(open) = rest.find("```") {
        let after = &rest[open + 3..];
        let tag_len = after
            .find(|c: char| !c.is_ascii_alphanumeric())
            .unwrap_or(after.len());
        let (tag, body) = after.split_at(tag_len);
        let close = body.find("```")?;
        if tags.iter().any(|t| t.eq_ignore_ascii_case(tag)) {
            return Some(body[..close].trim());
        }
        rest = &body[close + 3..];
    }
    None
}

/// Body of the first `<tag>...</tag>` pair
pub fn extract_tagged_block<'a>(text: &'a str, tag: &str) -> Option<&'a str> {
    let open = format!("<{}>", tag);
    let close = format!("</{}>", tag);
    let start = text.find(&open)? + open.len();
    let end = text[start..].find(&close)?;
    Some(text[start..start + end].trim())
}
