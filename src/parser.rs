//! CSV Parser
//!
//! Splits raw upload text into a header row and data rows. Tokenizing is a
//! plain split on commas: there is no quoting or escaping, so a comma inside
//! a quoted value splits the field. Malformed input never fails; it yields
//! misaligned or empty results instead.

use tracing::debug;

use crate::models::{RawTable, Record};
use crate::types::{AppError, AppResult};

/// Parse comma-delimited text whose first line is the header row
pub fn parse(raw_text: &str) -> RawTable {
    let mut lines = raw_text.split('\n');

    let headers = match lines.next() {
        Some(line) if !line.trim().is_empty() => split_line(line),
        _ => Vec::new(),
    };

    let rows: Vec<Vec<String>> = lines
        .filter(|line| !line.trim().is_empty())
        .map(split_line)
        .collect();

    debug!(columns = headers.len(), rows = rows.len(), "Parsed CSV text");

    RawTable { headers, rows }
}

fn split_line(line: &str) -> Vec<String> {
    line.split(',').map(|cell| cell.trim().to_string()).collect()
}

impl RawTable {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Column index of the first header equal to `header`
    pub fn column_index(&self, header: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == header)
    }

    /// Cell at `row`/`column`; short rows read as absent
    pub fn cell(&self, row: usize, column: usize) -> Option<&str> {
        self.rows
            .get(row)
            .and_then(|cells| cells.get(column))
            .map(String::as_str)
    }

    /// Row `row` as a header-keyed record. Short rows are padded with empty
    /// strings and surplus cells are dropped.
    pub fn record(&self, row: usize) -> Option<Record> {
        let cells = self.rows.get(row)?;
        Some(
            self.headers
                .iter()
                .enumerate()
                .map(|(i, header)| (header.clone(), cells.get(i).cloned().unwrap_or_default()))
                .collect(),
        )
    }

    /// First data row as a record, used as a sample for prompts
    pub fn sample_record(&self) -> Option<Record> {
        self.record(0)
    }
}

/// Serialise a table back into comma-joined text without quoting. Every
/// row is aligned to the header count.
pub fn to_csv(table: &RawTable) -> AppResult<String> {
    let mut wtr = csv::WriterBuilder::new()
        .quote_style(csv::QuoteStyle::Never)
        .flexible(true)
        .from_writer(Vec::new());

    wtr.write_record(&table.headers)
        .map_err(|e| AppError::Internal(format!("Failed to write CSV header: {}", e)))?;
    for cells in &table.rows {
        let aligned = (0..table.headers.len()).map(|i| cells.get(i).map(String::as_str).unwrap_or(""));
        wtr.write_record(aligned)
            .map_err(|e| AppError::Internal(format!("Failed to write CSV row: {}", e)))?;
    }

    let data = wtr
        .into_inner()
        .map_err(|e| AppError::Internal(format!("Failed to flush CSV: {}", e)))?;
    let text = String::from_utf8(data)
        .map_err(|e| AppError::Internal(format!("CSV is not UTF-8: {}", e)))?;

    Ok(text.trim_end_matches('\n').to_string())
}
