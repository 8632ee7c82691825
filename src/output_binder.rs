//! The Output Binder (SPEC_FULL.md §4.5): takes a step's final candidate
//! value(s) and binds them back onto the row population, writing any
//! `output_path` artifacts along the way.

use crate::config::{OutputConfig, OutputMode};
use crate::error::{PipelineError, Result};
use crate::events::{ArtifactContent, Event};
use crate::exec_ctx::ExecCtx;
use crate::row::Row;
use crate::template::Template;
use serde_json::Value;
use std::path::{Path, PathBuf};

/// Bind `values` (one per surviving candidate) onto `row` per `output`.
///
/// A single value binds in place. Multiple values only occur when the
/// step's `output.explode` flag is set (post-judge/feedback collapse
/// normally leaves exactly one); each extra value becomes a sibling row
/// at `row.child_index(i)`.
pub fn bind_output(row: &Row, output: &OutputConfig, values: &[Value]) -> Result<Vec<Row>> {
    if values.is_empty() {
        return Ok(Vec::new());
    }

    if !output.explode || values.len() == 1 {
        let mut bound = row.clone();
        apply_mode(&mut bound, output, values)?;
        return Ok(vec![bound]);
    }

    let mut rows = Vec::with_capacity(values.len());
    for (i, value) in values.iter().enumerate() {
        let mut child = row.clone();
        child.index = row.child_index(i);
        apply_mode(&mut child, output, std::slice::from_ref(value))?;
        rows.push(child);
    }
    Ok(rows)
}

/// Apply one or more candidate values to `row` under `output`'s mode.
/// `values` holds more than one entry only when the step produced
/// several surviving candidates and `output.explode` is `false` --
/// `column` mode then stores the whole array, `merge` folds each value
/// in left to right (later candidates win on key conflicts).
fn apply_mode(row: &mut Row, output: &OutputConfig, values: &[Value]) -> Result<()> {
    match output.mode {
        OutputMode::Merge => {
            for value in values {
                row.merge(value);
            }
        }
        OutputMode::Column => {
            let column = output
                .column
                .as_deref()
                .ok_or_else(|| PipelineError::Config("output.mode = column requires output.column".into()))?;
            let value = if values.len() == 1 {
                values[0].clone()
            } else {
                Value::Array(values.to_vec())
            };
            row.set(column, value);
        }
        OutputMode::Ignore => {}
    }
    Ok(())
}

/// Resolve an `output_path` template against `row`, sanitize it into a
/// filesystem-safe path, create parent directories, and write `content`.
/// When the step produced more than one candidate for this row, `cand`
/// is appended as `_<index>` before the extension so artifacts from
/// different candidates never collide.
pub async fn write_artifact(
    ctx: &ExecCtx,
    row: &Row,
    output_path_template: &str,
    cand: Option<usize>,
    content: &[u8],
) -> Result<PathBuf> {
    let rendered = Template::compile(output_path_template).render(row, &ctx.base_dir)?;
    let sanitized = sanitize_path(&rendered);
    let path = with_candidate_suffix(&ctx.base_dir.join(&sanitized), cand);

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| PipelineError::Other(format!("failed to create {}: {e}", parent.display())))?;
    }
    std::fs::write(&path, content)
        .map_err(|e| PipelineError::Other(format!("failed to write {}: {e}", path.display())))?;

    ctx.events.emit(Event::Artifact {
        filename: path.display().to_string(),
        content: ArtifactContent::Bytes(content.to_vec()),
    });

    Ok(path)
}

/// Collapse whitespace runs and strip characters that are unsafe in a
/// filesystem path, leaving the template author's directory structure
/// (`/` segments) intact.
fn sanitize_path(rendered: &str) -> String {
    let collapsed = rendered.split_whitespace().collect::<Vec<_>>().join("_");
    collapsed
        .chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '.' | '_' | '-' | '/' => c,
            _ => '_',
        })
        .collect()
}

fn with_candidate_suffix(path: &Path, cand: Option<usize>) -> PathBuf {
    let Some(cand) = cand else { return path.to_path_buf() };
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("output");
    let ext = path.extension().and_then(|s| s.to_str());
    let filename = match ext {
        Some(ext) => format!("{stem}_{cand}.{ext}"),
        None => format!("{stem}_{cand}"),
    };
    match path.parent() {
        Some(parent) if parent.as_os_str().len() > 0 => parent.join(filename),
        _ => PathBuf::from(filename),
    }
}
