//! Rows and the row population that flows between steps.

use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// A single row of data flowing through the pipeline.
///
/// `index` is assigned at ingestion (`0`, `1`, `2`, ...) and stays stable
/// across steps that don't fan the row out. When a step explodes a row
/// into several children, each child's index gets a `.` separated
/// position suffix appended to the parent's, e.g. `"3"` exploding into 3
/// children becomes `"3.0"`, `"3.1"`, `"3.2"`. This keeps output ordering
/// deterministic without needing a second sort key.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub index: String,
    fields: BTreeMap<String, Value>,
}

impl Row {
    pub fn new(index: impl Into<String>) -> Self {
        Self {
            index: index.into(),
            fields: BTreeMap::new(),
        }
    }

    pub fn with_fields(index: impl Into<String>, fields: BTreeMap<String, Value>) -> Self {
        Self {
            index: index.into(),
            fields,
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.fields.insert(key.into(), value);
    }

    pub fn fields(&self) -> &BTreeMap<String, Value> {
        &self.fields
    }

    pub fn fields_mut(&mut self) -> &mut BTreeMap<String, Value> {
        &mut self.fields
    }

    /// Shallow-merge another object's keys into this row, overwriting on
    /// conflict. Non-object values are ignored (merge mode only makes
    /// sense against a JSON object result).
    pub fn merge(&mut self, value: &Value) {
        if let Value::Object(map) = value {
            for (k, v) in map {
                self.fields.insert(k.clone(), v.clone());
            }
        }
    }

    /// Derive a child index for position `pos` (0-based) of an explode
    /// with `total` children.
    pub fn child_index(&self, pos: usize) -> String {
        format!("{}.{}", self.index, pos)
    }

    /// The original (pre-explode) numeric row index, i.e. everything
    /// before the first `.` suffix. Used for artifact naming
    /// (`<base>_<ref_index>_<cand_index>.<ext>`).
    pub fn root_index(&self) -> &str {
        self.index.split('.').next().unwrap_or(&self.index)
    }

    /// Render this row as a flat JSON object (used by the dotted-path
    /// template engine and by CSV/JSON output).
    pub fn to_value(&self) -> Value {
        Value::Object(self.fields.clone().into_iter().collect())
    }
}

impl fmt::Display for Row {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Row[{}]", self.index)
    }
}

/// The mutable population of rows flowing between step boundaries.
///
/// Grows via explode, shrinks via drop. Row order is always by `index`
/// in the natural string-split-numeric order produced by ingestion and
/// explode, which `into_sorted` restores after concurrent step
/// execution scrambles it.
#[derive(Debug, Clone, Default)]
pub struct RowStream {
    rows: Vec<Row>,
}

impl RowStream {
    pub fn new(rows: Vec<Row>) -> Self {
        Self { rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<Row> {
        self.rows
    }

    /// Sort rows by their dotted index, numerically per segment, so
    /// `"10"` sorts after `"9"` and `"3.2"` sorts after `"3.1"`.
    pub fn sort_by_index(&mut self) {
        self.rows.sort_by(|a, b| compare_dotted_index(&a.index, &b.index));
    }
}

fn compare_dotted_index(a: &str, b: &str) -> std::cmp::Ordering {
    let a_parts: Vec<u64> = a.split('.').filter_map(|s| s.parse().ok()).collect();
    let b_parts: Vec<u64> = b.split('.').filter_map(|s| s.parse().ok()).collect();
    a_parts.cmp(&b_parts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn child_index_appends_position() {
        let row = Row::new("3");
        assert_eq!(row.child_index(0), "3.0");
        assert_eq!(row.child_index(2), "3.2");
    }

    #[test]
    fn root_index_strips_suffix() {
        let row = Row::new("3.2");
        assert_eq!(row.root_index(), "3");
        let row = Row::new("7");
        assert_eq!(row.root_index(), "7");
    }

    #[test]
    fn merge_overwrites_on_conflict() {
        let mut row = Row::new("0");
        row.set("a", json!(1));
        row.merge(&json!({"a": 2, "b": 3}));
        assert_eq!(row.get("a"), Some(&json!(2)));
        assert_eq!(row.get("b"), Some(&json!(3)));
    }

    #[test]
    fn sort_by_index_is_numeric_not_lexicographic() {
        let mut stream = RowStream::new(vec![Row::new("10"), Row::new("2"), Row::new("3.1"), Row::new("3.0")]);
        stream.sort_by_index();
        let indices: Vec<&str> = stream.rows().iter().map(|r| r.index.as_str()).collect();
        assert_eq!(indices, vec!["2", "3.0", "3.1", "10"]);
    }
}
