//! Load stage
//!
//! Appends transformed rows to a CSV sink. The first write creates the file
//! with a header row; later writes append rows only. Rows are never
//! deduplicated, so loading the same batch twice stores it twice.

use serde::Serialize;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{info, instrument};
use wdp_common::types::TransformedRecord;

use crate::error::{PipelineError, Result, Stage};

/// What a load wrote
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadReport {
    pub rows_written: usize,
    /// True when this load created the sink
    pub header_written: bool,
    /// Sink size after the write, in bytes
    pub sink_bytes: u64,
}

/// Append-only CSV sink
#[derive(Debug, Clone)]
pub struct CsvSink {
    location: PathBuf,
}

fn persist(message: impl Into<String>) -> PipelineError {
    PipelineError::persist(Stage::Load, None, message)
}

impl CsvSink {
    pub fn new(location: impl Into<PathBuf>) -> Self {
        Self {
            location: location.into(),
        }
    }

    pub fn location(&self) -> &Path {
        &self.location
    }

    /// Append `records` to the sink, creating it (with header) if absent.
    ///
    /// The whole batch is encoded before the sink is opened, so a row that
    /// cannot be encoded leaves the sink untouched.
    #[instrument(skip_all, fields(path = %self.location.display(), rows = records.len()))]
    pub fn load(&self, records: &[TransformedRecord]) -> Result<LoadReport> {
        self.append_rows(&TransformedRecord::COLUMNS, records)
    }

    fn append_rows<T: Serialize>(&self, columns: &[&str], rows: &[T]) -> Result<LoadReport> {
        if let Some(parent) = self.location.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                persist(format!("failed to create sink directory {}: {e}", parent.display()))
            })?;
        }

        let size_before = std::fs::metadata(&self.location).ok().map(|m| m.len());
        let header_written = size_before.is_none();

        let bytes = encode(header_written.then_some(columns), rows)?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.location)
            .map_err(|e| persist(format!("failed to open {}: {e}", self.location.display())))?;

        if !bytes.is_empty() {
            file.write_all(&bytes)
                .map_err(|e| persist(format!("failed to write sink: {e}")))?;
            file.sync_all()
                .map_err(|e| persist(format!("failed to sync sink: {e}")))?;
        }

        let sink_bytes = self.verify(size_before, !bytes.is_empty())?;

        if header_written {
            info!(bytes = sink_bytes, "Created new sink");
        } else {
            info!(bytes = sink_bytes, "Appended to existing sink");
        }

        Ok(LoadReport {
            rows_written: rows.len(),
            header_written,
            sink_bytes,
        })
    }

    /// Load a batch handed over as JSON: an array of row objects keyed by
    /// column name.
    pub fn load_json(&self, json: &str) -> Result<LoadReport> {
        let value: serde_json::Value = serde_json::from_str(json)
            .map_err(|e| PipelineError::NotTabular(format!("input is not valid JSON: {e}")))?;

        let rows = match value {
            serde_json::Value::Array(rows) => rows,
            other => {
                return Err(PipelineError::NotTabular(format!(
                    "expected an array of rows, got {}",
                    json_kind(&other)
                )))
            },
        };

        let records = rows
            .into_iter()
            .enumerate()
            .map(|(index, row)| {
                if !row.is_object() {
                    return Err(PipelineError::NotTabular(format!(
                        "row {index} is {}, expected an object",
                        json_kind(&row)
                    )));
                }
                serde_json::from_value::<TransformedRecord>(row).map_err(|e| {
                    PipelineError::validation(Stage::Load, None, format!("row {index}: {e}"))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        self.load(&records)
    }

    /// Re-read the sink after a write and confirm it landed.
    fn verify(&self, size_before: Option<u64>, expect_growth: bool) -> Result<u64> {
        let size_after = std::fs::metadata(&self.location)
            .map_err(|e| persist(format!("sink {} missing after write: {e}", self.location.display())))?
            .len();

        if expect_growth && size_after <= size_before.unwrap_or(0) {
            return Err(persist(format!(
                "sink {} did not grow after write ({} bytes)",
                self.location.display(),
                size_after
            )));
        }

        Ok(size_after)
    }
}

/// Encode an optional header and `rows` as CSV text.
fn encode<T: Serialize>(header: Option<&[&str]>, rows: &[T]) -> Result<Vec<u8>> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());

    if let Some(header) = header {
        writer
            .write_record(header)
            .map_err(|e| persist(format!("failed to encode header: {e}")))?;
    }

    for (index, row) in rows.iter().enumerate() {
        writer.serialize(row).map_err(|e| {
            PipelineError::validation(Stage::Load, None, format!("row {index} cannot be written: {e}"))
        })?;
    }

    writer
        .into_inner()
        .map_err(|e| persist(format!("failed to encode rows: {}", e.error())))
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}
