//! Row Source: reads the ingestion row population from CSV, JSON, or
//! JSONL, inferring format from the file extension or, failing that,
//! sniffing the first non-whitespace byte (`[` => JSON array, `{` =>
//! JSONL, anything else => CSV).

use crate::error::{PipelineError, Result};
use crate::row::Row;
use serde_json::Value;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputFormat {
    Csv,
    Json,
    Jsonl,
}

impl InputFormat {
    pub fn infer(path: &Path, sniffed_byte: Option<u8>) -> Self {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());
        match ext.as_deref() {
            Some("csv") => InputFormat::Csv,
            Some("json") => InputFormat::Json,
            Some("jsonl") | Some("ndjson") => InputFormat::Jsonl,
            _ => match sniffed_byte {
                Some(b'[') => InputFormat::Json,
                Some(b'{') => InputFormat::Jsonl,
                _ => InputFormat::Csv,
            },
        }
    }
}

/// Read the full ingestion row population from `path`.
pub fn read_rows(path: &Path) -> Result<Vec<Row>> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| PipelineError::Config(format!("failed to read {}: {e}", path.display())))?;
    let sniffed = text.trim_start().as_bytes().first().copied();
    match InputFormat::infer(path, sniffed) {
        InputFormat::Csv => read_csv(&text),
        InputFormat::Json => read_json_array(&text),
        InputFormat::Jsonl => read_jsonl(&text),
    }
}

/// Apply `--start`/`--limit` row-slicing. Indices are reassigned
/// starting at `0` so downstream explode/artifact naming stays
/// contiguous regardless of where the slice started in the source file.
pub fn slice_rows(rows: Vec<Row>, start: usize, limit: Option<usize>) -> Vec<Row> {
    let sliced = rows.into_iter().skip(start);
    let sliced: Vec<Row> = match limit {
        Some(n) => sliced.take(n).collect(),
        None => sliced.collect(),
    };
    sliced
        .into_iter()
        .enumerate()
        .map(|(i, mut row)| {
            row.index = i.to_string();
            row
        })
        .collect()
}

fn read_csv(text: &str) -> Result<Vec<Row>> {
    let mut reader = csv::Reader::from_reader(text.as_bytes());
    let headers = reader
        .headers()
        .map_err(|e| PipelineError::Config(format!("invalid CSV header: {e}")))?
        .clone();
    let mut rows = Vec::new();
    for (i, record) in reader.records().enumerate() {
        let record = record.map_err(|e| PipelineError::Config(format!("invalid CSV row {i}: {e}")))?;
        let mut row = Row::new(i.to_string());
        for (key, value) in headers.iter().zip(record.iter()) {
            row.set(key, Value::String(value.to_string()));
        }
        rows.push(row);
    }
    Ok(rows)
}

fn read_json_array(text: &str) -> Result<Vec<Row>> {
    let values: Vec<Value> = serde_json::from_str(text)?;
    Ok(values.into_iter().enumerate().map(|(i, v)| value_to_row(i, v)).collect())
}

fn read_jsonl(text: &str) -> Result<Vec<Row>> {
    let mut rows = Vec::new();
    let mut i = 0;
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let value: Value = serde_json::from_str(line)?;
        rows.push(value_to_row(i, value));
        i += 1;
    }
    Ok(rows)
}

fn value_to_row(index: usize, value: Value) -> Row {
    let mut row = Row::new(index.to_string());
    if let Value::Object(map) = value {
        for (k, v) in map {
            row.set(k, v);
        }
    }
    row
}
