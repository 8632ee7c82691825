//! Validates a row field against a JSON Schema subset, dropping the row
//! with a [`PipelineError::Content`] on mismatch (SPEC_FULL.md §4.2, §7).

use crate::error::PipelineError;
use crate::exec_ctx::ExecCtx;
use crate::packet::{DataPacket, PluginOutcome};
use crate::plugin::{Capability, Plugin, ResolvedConfig};
use crate::row::Row;
use crate::schema::validate;
use crate::Result;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashSet;

pub struct SchemaValidatePlugin;

impl SchemaValidatePlugin {
    pub fn new() -> Self {
        Self
    }
}

impl Default for SchemaValidatePlugin {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Plugin for SchemaValidatePlugin {
    fn plugin_type(&self) -> &'static str {
        "schema_validate"
    }

    fn required_capabilities(&self) -> HashSet<Capability> {
        HashSet::new()
    }

    fn resolve_config(
        &self,
        raw: &Value,
        row: &Row,
        _inherited_model: Option<&str>,
    ) -> Result<ResolvedConfig> {
        let field = raw
            .get("field")
            .and_then(|v| v.as_str())
            .ok_or_else(|| PipelineError::InvalidConfig("schema_validate requires 'field'".into()))?;
        let schema = raw
            .get("schema")
            .cloned()
            .ok_or_else(|| PipelineError::InvalidConfig("schema_validate requires 'schema'".into()))?;
        let value = row.get(field).cloned().unwrap_or(Value::Null);

        Ok(ResolvedConfig {
            fields: json!({ "field": field, "schema": schema, "value": value }),
            model: None,
        })
    }

    async fn execute(&self, resolved: &ResolvedConfig, _ctx: &ExecCtx) -> Result<PluginOutcome> {
        let schema = resolved
            .fields
            .get("schema")
            .cloned()
            .unwrap_or(Value::Null);
        let value = resolved.fields.get("value").cloned().unwrap_or(Value::Null);
        let field = resolved
            .fields
            .get("field")
            .and_then(|v| v.as_str())
            .unwrap_or("?")
            .to_string();

        let errors = validate(&value, &schema);
        if errors.is_empty() {
            Ok(PluginOutcome::one(DataPacket::new(value)))
        } else {
            let message = errors
                .iter()
                .map(|e| e.to_string())
                .collect::<Vec<_>>()
                .join("; ");
            Err(PipelineError::Content {
                row_index: 0,
                step: field,
                message,
            })
        }
    }
}
