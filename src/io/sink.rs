//! Row Sink: exports the final row population to `data_output_path`,
//! choosing CSV or JSON by file extension (SPEC_FULL.md §4.5, §6).

use crate::error::{PipelineError, Result};
use crate::row::RowStream;
use serde_json::Value;
use std::collections::BTreeSet;
use std::path::Path;

pub fn write_rows(path: &Path, rows: &RowStream) -> Result<()> {
    let is_json = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    if is_json {
        write_json(path, rows)
    } else {
        write_csv(path, rows)
    }
}

fn write_json(path: &Path, rows: &RowStream) -> Result<()> {
    let values: Vec<Value> = rows.rows().iter().map(|r| r.to_value()).collect();
    let text = serde_json::to_string_pretty(&values)?;
    std::fs::write(path, text)
        .map_err(|e| PipelineError::Other(format!("failed to write {}: {e}", path.display())))
}

/// Column order is the union of every row's field names in first-seen
/// order, so rows with a partial field set still line up under the
/// header written from the most complete row(s) seen so far.
fn write_csv(path: &Path, rows: &RowStream) -> Result<()> {
    let mut columns = Vec::new();
    let mut seen = BTreeSet::new();
    for row in rows.rows() {
        for key in row.fields().keys() {
            if seen.insert(key.clone()) {
                columns.push(key.clone());
            }
        }
    }

    let mut writer = csv::Writer::from_path(path)
        .map_err(|e| PipelineError::Other(format!("failed to open {}: {e}", path.display())))?;
    writer
        .write_record(&columns)
        .map_err(|e| PipelineError::Other(e.to_string()))?;
    for row in rows.rows() {
        let record: Vec<String> = columns
            .iter()
            .map(|c| row.get(c).map(value_to_cell).unwrap_or_default())
            .collect();
        writer
            .write_record(&record)
            .map_err(|e| PipelineError::Other(e.to_string()))?;
    }
    writer.flush().map_err(|e| PipelineError::Other(e.to_string()))?;
    Ok(())
}

fn value_to_cell(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row::Row;
    use serde_json::json;
    use tempfile::Builder;

    #[test]
    fn writes_csv_with_union_header() {
        let mut a = Row::new("0");
        a.set("name", json!("Ada"));
        let mut b = Row::new("1");
        b.set("name", json!("Grace"));
        b.set("score", json!(9));
        let stream = RowStream::new(vec![a, b]);

        let file = Builder::new().suffix(".csv").tempfile().unwrap();
        write_rows(file.path(), &stream).unwrap();
        let text = std::fs::read_to_string(file.path()).unwrap();
        assert!(text.starts_with("name,score\n"));
        assert!(text.contains("Ada,\n"));
        assert!(text.contains("Grace,9\n"));
    }

    #[test]
    fn writes_json_array() {
        let mut row = Row::new("0");
        row.set("name", json!("Ada"));
        let stream = RowStream::new(vec![row]);

        let file = Builder::new().suffix(".json").tempfile().unwrap();
        write_rows(file.path(), &stream).unwrap();
        let text = std::fs::read_to_string(file.path()).unwrap();
        let parsed: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed, json!([{"name": "Ada"}]));
    }
}
