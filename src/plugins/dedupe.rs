//! Drops rows whose templated key has already been seen.
//!
//! First-occurrence-preserving (SPEC_FULL.md §8): the row that first
//! produces a given key survives, every later row with the same key is
//! dropped. State is a plugin-instance-scoped seen-set, matching the
//! "shared state only touched by the dedupe seen-set" note in §5.

use crate::exec_ctx::ExecCtx;
use crate::packet::{DataPacket, PluginOutcome};
use crate::plugin::{Capability, Plugin, ResolvedConfig};
use crate::row::Row;
use crate::template::Template;
use crate::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Mutex;

pub struct DedupePlugin {
    seen: Mutex<HashSet<String>>,
}

impl DedupePlugin {
    pub fn new() -> Self {
        Self {
            seen: Mutex::new(HashSet::new()),
        }
    }
}

impl Default for DedupePlugin {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Plugin for DedupePlugin {
    fn plugin_type(&self) -> &'static str {
        "dedupe"
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
        let key_template = raw
            .get("key")
            .and_then(|v| v.as_str())
            .unwrap_or_default();
        let rendered = Template::compile(key_template).render(row, Path::new("."))?;
        Ok(ResolvedConfig {
            fields: serde_json::json!({ "key": rendered }),
            model: None,
        })
    }

    async fn execute(&self, resolved: &ResolvedConfig, _ctx: &ExecCtx) -> Result<PluginOutcome> {
        let key = resolved
            .fields
            .get("key")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();

        let first_seen = {
            let mut seen = self.seen.lock().expect("dedupe seen-set poisoned");
            seen.insert(key)
        };

        if first_seen {
            Ok(PluginOutcome::one(DataPacket::default()))
        } else {
            Ok(PluginOutcome::drop())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec_ctx::ExecCtx;
    use serde_json::json;

    fn row_with_email(index: &str, email: &str) -> Row {
        let mut row = Row::new(index);
        row.set("email", json!(email));
        row
    }

    #[tokio::test]
    async fn first_occurrence_survives_later_ones_drop() {
        let plugin = DedupePlugin::new();
        let ctx = ExecCtx::builder("http://localhost").build();
        let raw = json!({ "key": "{{email}}" });

        let row_a = row_with_email("0", "a@example.com");
        let resolved_a = plugin.resolve_config(&raw, &row_a, None).unwrap();
        let outcome_a = plugin.execute(&resolved_a, &ctx).await.unwrap();
        assert_eq!(outcome_a.packets.len(), 1);

        let row_b = row_with_email("1", "a@example.com");
        let resolved_b = plugin.resolve_config(&raw, &row_b, None).unwrap();
        let outcome_b = plugin.execute(&resolved_b, &ctx).await.unwrap();
        assert_eq!(outcome_b.packets.len(), 0);

        let row_c = row_with_email("2", "b@example.com");
        let resolved_c = plugin.resolve_config(&raw, &row_c, None).unwrap();
        let outcome_c = plugin.execute(&resolved_c, &ctx).await.unwrap();
        assert_eq!(outcome_c.packets.len(), 1);
    }

    #[test]
    fn resolve_config_is_idempotent() {
        let plugin = DedupePlugin::new();
        let raw = json!({ "key": "{{email}}" });
        let row = row_with_email("0", "a@example.com");
        let first = plugin.resolve_config(&raw, &row, None).unwrap();
        let second = plugin.resolve_config(&raw, &row, None).unwrap();
        assert_eq!(first.fields, second.fields);
    }
}
