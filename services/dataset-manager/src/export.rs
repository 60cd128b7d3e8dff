use std::fmt;
use std::str::FromStr;

use bytes::Bytes;
use catalog::Row;
use serde_json::Value;

use crate::error::{DatasetError, Result};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ExportFormat {
    #[default]
    Csv,
    Json,
}

impl ExportFormat {
    pub fn content_type(&self) -> &'static str {
        match self {
            ExportFormat::Csv => "text/csv",
            ExportFormat::Json => "application/json",
        }
    }

    pub fn encode(&self, rows: &[Row]) -> Result<Bytes> {
        match self {
            ExportFormat::Csv => Ok(Bytes::from(to_csv(rows))),
            ExportFormat::Json => serde_json::to_vec(rows)
                .map(Bytes::from)
                .map_err(|e| DatasetError::storage("export", e)),
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExportFormat::Csv => f.write_str("csv"),
            ExportFormat::Json => f.write_str("json"),
        }
    }
}

impl FromStr for ExportFormat {
    type Err = DatasetError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "csv" => Ok(ExportFormat::Csv),
            "json" => Ok(ExportFormat::Json),
            other => Err(DatasetError::InvalidState(format!("unsupported export format: {other}"))),
        }
    }
}

/// Header is every key seen, in first-seen order. Missing cells are empty.
pub fn to_csv(rows: &[Row]) -> String {
    let mut header: Vec<&str> = Vec::new();
    for row in rows {
        for key in row.keys() {
            if !header.contains(&key.as_str()) {
                header.push(key);
            }
        }
    }
    if header.is_empty() {
        return String::new();
    }

    let mut out = String::new();
    push_record(&mut out, header.iter().map(|h| csv_escape(h)));
    for row in rows {
        push_record(
            &mut out,
            header.iter().map(|h| csv_escape(&cell_text(row.get(*h)))),
        );
    }
    out
}

fn push_record(out: &mut String, fields: impl Iterator<Item = String>) {
    let fields: Vec<String> = fields.collect();
    out.push_str(&fields.join(","));
    out.push_str("\r\n");
}

fn cell_text(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

/// Quotes fields holding a comma, quote or line break; inner quotes are doubled.
fn csv_escape(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}
