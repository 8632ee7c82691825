//! # rowforge
//!
//! A batch engine for running rows of data through a configured chain of
//! steps. Each step resolves a prompt template against the row, fans out
//! to one or more LLM candidates, optionally judges between them and runs
//! a critique/regenerate feedback loop, then binds the result back onto
//! the row (merge, named column, or explode into sibling rows).
//!
//! ## Core Concepts
//!
//! - **[`Row`]** / **[`RowStream`]** — the unit of data flowing through
//!   the pipeline and the population of rows between step boundaries.
//! - **[`PipelineConfig`]** — the config document a run is driven from.
//! - **[`Plugin`]** / **[`PluginRegistry`]** — preprocessing plugins that
//!   run before a step's LLM call (dedupe, schema validation, ...).
//! - **[`run_step`]** — the Step Executor: preprocess, candidates, judge,
//!   feedback, verify, output bind.
//! - **[`run_pipeline`]** — the Pipeline Orchestrator: runs every step in
//!   order over a row population, bounded by `task_concurrency`.
//! - **[`Backend`]** — LLM provider abstraction (OpenAI-compatible, mock).
//!
//! ## Quick Start
//!
//! ```no_run
//! use rowforge::{ExecCtx, PipelineConfig};
//! use rowforge::plugin::PluginRegistry;
//! use rowforge::row::Row;
//! use rowforge::orchestrator::run_pipeline;
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() -> anyhow::Result<()> {
//! let config = PipelineConfig::load(std::path::Path::new("pipeline.yaml"))?;
//! let ctx = Arc::new(ExecCtx::builder("http://localhost:11434").build());
//! let registry = Arc::new(PluginRegistry::new());
//! let rows = vec![Row::new("0")];
//!
//! let report = run_pipeline(ctx, registry, &config, rows).await?;
//! println!("{} rows survived", report.rows.len());
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod cli;
pub mod config;
pub mod error;
pub mod events;
pub mod exec_ctx;
pub mod io;
pub mod llm_client;
pub mod orchestrator;
pub mod output_binder;
pub mod output_parser;
pub mod packet;
pub mod plugin;
pub mod plugins;
pub mod row;
pub mod schema;
pub mod step;
pub mod template;

pub use backend::{BackoffConfig, Backend, MockBackend, OpenAiBackend};
pub use config::PipelineConfig;
pub use error::{PipelineError, Result};
pub use exec_ctx::{ExecCtx, ExecCtxBuilder};
pub use orchestrator::{run_pipeline, RunReport};
pub use plugin::{Plugin, PluginRegistry};
pub use row::{Row, RowStream};
pub use step::{run_step, StepOutcome};
