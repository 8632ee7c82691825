//! Pipeline configuration document: the YAML/JSON shape a run is driven
//! from (SPEC_FULL.md §3, §6).
//!
//! Unknown fields are rejected (`deny_unknown_fields`) so a typo in a
//! config file surfaces as a [`PipelineError::Config`] at load time
//! rather than silently doing nothing.

use crate::error::{PipelineError, Result};
use serde::Deserialize;
use serde_json::Value;
use std::num::NonZeroUsize;
use std::path::Path;

fn default_candidates() -> NonZeroUsize {
    NonZeroUsize::new(1).unwrap()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineConfig {
    #[serde(default)]
    pub globals: GlobalsConfig,
    pub steps: Vec<StepConfig>,
    /// Terminal export path; CSV or JSON chosen by extension.
    pub data_output_path: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GlobalsConfig {
    /// Bounds concurrent row-step executions.
    #[serde(default = "GlobalsConfig::default_task_concurrency")]
    pub task_concurrency: usize,
    /// Bounds global in-flight LLM requests, including judge/feedback calls.
    #[serde(default = "GlobalsConfig::default_concurrency")]
    pub concurrency: usize,
    /// Default model used by steps that don't override it.
    pub model: Option<String>,
    #[serde(default)]
    pub continue_on_error: bool,
}

impl GlobalsConfig {
    fn default_task_concurrency() -> usize {
        4
    }
    fn default_concurrency() -> usize {
        8
    }
}

impl Default for GlobalsConfig {
    fn default() -> Self {
        Self {
            task_concurrency: Self::default_task_concurrency(),
            concurrency: Self::default_concurrency(),
            model: None,
            continue_on_error: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StepConfig {
    pub name: String,
    #[serde(default)]
    pub plugins: Vec<PluginConfig>,
    pub prompt: Option<String>,
    pub system_prompt: Option<String>,
    pub model: Option<String>,
    #[serde(default)]
    pub output: OutputConfig,
    pub schema: Option<Value>,
    #[serde(default = "default_candidates")]
    pub candidates: NonZeroUsize,
    pub judge: Option<JudgeConfig>,
    pub feedback: Option<FeedbackConfig>,
    pub aspect_ratio: Option<String>,
    pub command: Option<String>,
    pub verify_command: Option<String>,
    #[serde(default)]
    pub skip_candidate_command: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OutputMode {
    #[default]
    Merge,
    Column,
    Ignore,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct OutputConfig {
    #[serde(default)]
    pub mode: OutputMode,
    pub column: Option<String>,
    #[serde(default)]
    pub explode: bool,
    pub output_path: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JudgeConfig {
    pub model: Option<String>,
    pub prompt: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FeedbackConfig {
    pub model: Option<String>,
    pub prompt: String,
    #[serde(default = "FeedbackConfig::default_max_loops")]
    pub max_loops: u32,
}

impl FeedbackConfig {
    fn default_max_loops() -> u32 {
        2
    }
}

/// Tagged union of plugin configs, discriminated by `type`.
///
/// Only the two concrete plugins this crate ships
/// (`DedupePlugin`, `SchemaValidatePlugin`) have dedicated variants.
/// Anything else round-trips through `Other` so config documents
/// referencing a plugin registered at runtime (not compiled in) still
/// parse -- the registry resolves the `type` tag against registered
/// plugins at run time, not at config-parse time.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PluginConfig {
    Dedupe {
        key: String,
    },
    SchemaValidate {
        field: String,
        schema: Value,
    },
    #[serde(other)]
    Other,
}

impl PluginConfig {
    /// The `type` tag this config was (or would be) deserialized from --
    /// also the key the [`PluginRegistry`](crate::plugin::PluginRegistry)
    /// looks up the concrete plugin by.
    pub fn type_tag(&self) -> &'static str {
        match self {
            PluginConfig::Dedupe { .. } => "dedupe",
            PluginConfig::SchemaValidate { .. } => "schema_validate",
            PluginConfig::Other => "other",
        }
    }

    /// Re-flatten into the `Value` shape a [`Plugin::resolve_config`](crate::plugin::Plugin::resolve_config)
    /// expects, since the tagged enum already stripped the `type` key.
    pub fn to_raw_value(&self) -> Value {
        match self {
            PluginConfig::Dedupe { key } => serde_json::json!({ "key": key }),
            PluginConfig::SchemaValidate { field, schema } => {
                serde_json::json!({ "field": field, "schema": schema })
            }
            PluginConfig::Other => Value::Null,
        }
    }
}

impl PipelineConfig {
    /// Load a config document from a file, inferring YAML vs JSON from
    /// the extension (`.json` => JSON, everything else => YAML, which is
    /// a JSON superset so `.yml`/`.yaml`/extensionless all work).
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| PipelineError::Config(format!("failed to read {}: {e}", path.display())))?;
        Self::parse(&text, path.extension().and_then(|e| e.to_str()))
    }

    pub fn parse(text: &str, extension_hint: Option<&str>) -> Result<Self> {
        let is_json = extension_hint.map(|e| e.eq_ignore_ascii_case("json")).unwrap_or(false);
        if is_json {
            serde_json::from_str(text).map_err(|e| PipelineError::Config(e.to_string()))
        } else {
            serde_yaml::from_str(text).map_err(|e| PipelineError::Config(e.to_string()))
        }
    }
}
