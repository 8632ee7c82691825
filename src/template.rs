//! Prompt template engine.
//!
//! Extends the flat `{key}` substitution the engine started with to
//! dotted-path traversal into nested row data (`{{user.profile.name}}`)
//! and file inlining (`{{file:path/to/snippet.md}}`). A [`Template`] is
//! parsed once into a list of [`Segment`]s and rendered many times --
//! one compile per step, not per row.

use crate::error::{PipelineError, Result};
use crate::row::Row;
use serde_json::Value;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone)]
enum Segment {
    Literal(String),
    Path(String),
    File(String),
}

/// A compiled template: prompt or system-prompt text with
/// `{{dotted.path}}` and `{{file:...}}` placeholders already located.
#[derive(Debug, Clone)]
pub struct Template {
    segments: Vec<Segment>,
}

impl Template {
    /// Parse a template string. Parsing never fails -- an unmatched `{{`
    /// is treated as a literal `{{` rather than an error, matching the
    /// defensive stance the rest of the parsing stack takes toward
    /// malformed input.
    pub fn compile(source: &str) -> Self {
        let mut segments = Vec::new();
        let mut rest = source;
        loop {
            match rest.find("{{") {
                None => {
                    if !rest.is_empty() {
                        segments.push(Segment::Literal(rest.to_string()));
                    }
                    break;
                }
                Some(start) => {
                    if start > 0 {
                        segments.push(Segment::Literal(rest[..start].to_string()));
                    }
                    let after_open = &rest[start + 2..];
                    match after_open.find("}}") {
                        None => {
                            // Unterminated -- treat the rest as literal.
                            segments.push(Segment::Literal(rest[start..].to_string()));
                            break;
                        }
                        Some(end) => {
                            let placeholder = after_open[..end].trim();
                            if let Some(path) = placeholder.strip_prefix("file:") {
                                segments.push(Segment::File(path.trim().to_string()));
                            } else {
                                segments.push(Segment::Path(placeholder.to_string()));
                            }
                            rest = &after_open[end + 2..];
                        }
                    }
                }
            }
        }
        Self { segments }
    }

    /// Render against a row's fields, resolving dotted paths and loading
    /// files relative to `base_dir`.
    pub fn render(&self, row: &Row, base_dir: &Path) -> Result<String> {
        let mut root = row.to_value();
        // `index` is row metadata, not a data field, so it isn't part of
        // `Row::to_value` (which backs CSV/JSON export); expose it to
        // templates anyway so `output_path` can key artifact filenames on
        // it (e.g. `out/draft_{{index}}.png`) without a real field named
        // "index" colliding -- an explicit row field always wins.
        if let Value::Object(map) = &mut root {
            map.entry("index".to_string())
                .or_insert_with(|| Value::String(row.index.clone()));
        }
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(s) => out.push_str(s),
                Segment::Path(path) => {
                    let value = resolve_dotted_path(&root, path);
                    out.push_str(&value_to_display(&value));
                }
                Segment::File(path) => {
                    let full = base_dir.join(path);
                    let content = fs::read_to_string(&full).map_err(|e| {
                        PipelineError::Other(format!(
                            "failed to read template file {}: {e}",
                            full.display()
                        ))
                    })?;
                    out.push_str(&content);
                }
            }
        }
        Ok(out)
    }
}

/// Concatenate every file in `dir` (sorted by filename) with a blank
/// line between files, for assembling a system prompt out of a
/// directory of snippets.
pub fn load_directory_concat(dir: &Path) -> Result<String> {
    let mut entries: Vec<_> = fs::read_dir(dir)
        .map_err(|e| PipelineError::Other(format!("failed to read directory {}: {e}", dir.display())))?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file())
        .collect();
    entries.sort();

    let mut out = String::new();
    for (i, path) in entries.iter().enumerate() {
        if i > 0 {
            out.push_str("\n\n");
        }
        let content = fs::read_to_string(path)
            .map_err(|e| PipelineError::Other(format!("failed to read {}: {e}", path.display())))?;
        out.push_str(content.trim_end());
    }
    Ok(out)
}

fn resolve_dotted_path(root: &Value, path: &str) -> Value {
    let mut current = root;
    for segment in path.split('.') {
        match current.get(segment) {
            Some(v) => current = v,
            None => return Value::Null,
        }
    }
    current.clone()
}

fn value_to_display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    fn row_with(fields: Value) -> Row {
        let mut row = Row::new("0");
        if let Value::Object(map) = fields {
            for (k, v) in map {
                row.set(k, v);
            }
        }
        row
    }

    #[test]
    fn flat_path_substitution() {
        let tpl = Template::compile("Hello {{name}}!");
        let row = row_with(json!({"name": "Alice"}));
        assert_eq!(tpl.render(&row, Path::new(".")).unwrap(), "Hello Alice!");
    }

    #[test]
    fn dotted_path_traversal() {
        let tpl = Template::compile("City: {{user.address.city}}");
        let row = row_with(json!({"user": {"address": {"city": "Wien"}}}));
        assert_eq!(tpl.render(&row, Path::new(".")).unwrap(), "City: Wien");
    }

    #[test]
    fn missing_path_renders_empty() {
        let tpl = Template::compile("X: [{{missing.path}}]");
        let row = row_with(json!({}));
        assert_eq!(tpl.render(&row, Path::new(".")).unwrap(), "X: []");
    }

    #[test]
    fn index_placeholder_resolves_to_row_index() {
        let tpl = Template::compile("out/draft_{{index}}.txt");
        let row = Row::new("4.1");
        assert_eq!(tpl.render(&row, Path::new(".")).unwrap(), "out/draft_4.1.txt");
    }

    #[test]
    fn explicit_index_field_overrides_row_metadata() {
        let tpl = Template::compile("{{index}}");
        let row = row_with(json!({"index": "custom"}));
        assert_eq!(tpl.render(&row, Path::new(".")).unwrap(), "custom");
    }

    #[test]
    fn unterminated_placeholder_is_literal() {
        let tpl = Template::compile("weird {{ unterminated");
        let row = row_with(json!({}));
        assert_eq!(
            tpl.render(&row, Path::new(".")).unwrap(),
            "weird {{ unterminated"
        );
    }

    #[test]
    fn file_inlining() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("snippet.txt");
        let mut f = fs::File::create(&file_path).unwrap();
        writeln!(f, "inlined content").unwrap();

        let tpl = Template::compile("Prefix: {{file:snippet.txt}}");
        let row = row_with(json!({}));
        let rendered = tpl.render(&row, dir.path()).unwrap();
        assert_eq!(rendered, "Prefix: inlined content\n");
    }

    #[test]
    fn directory_concat_sorted() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("b.txt"), "second").unwrap();
        fs::write(dir.path().join("a.txt"), "first").unwrap();
        let combined = load_directory_concat(dir.path()).unwrap();
        assert_eq!(combined, "first\n\nsecond");
    }
}
