//! The Plugin Contract (SPEC_FULL.md §4.2).
//!
//! Generalizes the async-trait-object pattern the engine already uses
//! for [`Backend`](crate::backend::Backend) to a registry of
//! preprocessing plugins keyed by a config-document `type` tag.

use crate::exec_ctx::ExecCtx;
use crate::packet::PluginOutcome;
use crate::row::Row;
use crate::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// A capability a plugin or step declares it needs. The orchestrator
/// checks these against what's registered before a run starts
/// ([`PipelineError::Capability`](crate::error::PipelineError::Capability)
/// aborts the run if unmet).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    HttpFetch,
    BrowserAutomation,
    Llm,
    SearchApi,
    EmailVerify,
}

/// A plugin configuration fully resolved against one row: every
/// template placeholder substituted, every field validated. Producing a
/// `ResolvedConfig` must be idempotent for the same `(raw, row,
/// inherited_model)` triple (SPEC_FULL.md §8).
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub fields: Value,
    pub model: Option<String>,
}

/// The Plugin Contract.
#[async_trait]
pub trait Plugin: Send + Sync {
    /// The config-document `type` tag this plugin answers to.
    fn plugin_type(&self) -> &'static str;

    fn required_capabilities(&self) -> HashSet<Capability>;

    /// Render `raw` against `row`, producing a config ready to execute.
    /// Pure and idempotent: no I/O, no mutation of `row`.
    fn resolve_config(
        &self,
        raw: &Value,
        row: &Row,
        inherited_model: Option<&str>,
    ) -> Result<ResolvedConfig>;

    async fn execute(&self, resolved: &ResolvedConfig, ctx: &ExecCtx) -> Result<PluginOutcome>;
}

/// Registry of plugins keyed by their `type` tag, consulted by the Step
/// Executor when preprocessing a row.
#[derive(Default)]
pub struct PluginRegistry {
    plugins: HashMap<&'static str, Arc<dyn Plugin>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, plugin: Arc<dyn Plugin>) {
        self.plugins.insert(plugin.plugin_type(), plugin);
    }

    pub fn get(&self, plugin_type: &str) -> Option<Arc<dyn Plugin>> {
        self.plugins.get(plugin_type).cloned()
    }

    pub fn capabilities_for(&self, plugin_type: &str) -> Option<HashSet<Capability>> {
        self.get(plugin_type).map(|p| p.required_capabilities())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::dedupe::DedupePlugin;

    #[test]
    fn registry_resolves_by_type_tag() {
        let mut registry = PluginRegistry::new();
        registry.register(Arc::new(DedupePlugin::new()));
        assert!(registry.get("dedupe").is_some());
        assert!(registry.get("nonexistent").is_none());
    }
}
