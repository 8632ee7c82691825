//! Thin CLI entrypoint: parse flags, load config, run the pipeline,
//! export the row population, exit with the code SPEC_FULL.md §6 names.

use clap::Parser;
use rowforge::cli::Cli;
use rowforge::config::PipelineConfig;
use rowforge::error::PipelineError;
use rowforge::exec_ctx::ExecCtx;
use rowforge::io::{read_rows, slice_rows, write_rows};
use rowforge::orchestrator::run_pipeline;
use rowforge::plugin::PluginRegistry;
use rowforge::plugins::{dedupe::DedupePlugin, schema_validate::SchemaValidatePlugin};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

const CONFIG_ERROR: u8 = 1;
const CAPABILITY_ERROR: u8 = 2;
const PIPELINE_ERROR: u8 = 3;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    tracing_subscriber::fmt().with_env_filter(cli.log_level()).init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err((code, message)) => {
            tracing::error!(%message, "rowforge run failed");
            eprintln!("error: {message}");
            ExitCode::from(code)
        }
    }
}

async fn run(cli: Cli) -> Result<(), (u8, String)> {
    let mut config = PipelineConfig::load(&cli.config).map_err(|e| (CONFIG_ERROR, e.to_string()))?;
    apply_overrides(&mut config, &cli);

    let rows = read_rows(&cli.input).map_err(|e| (CONFIG_ERROR, e.to_string()))?;
    let rows = slice_rows(rows, cli.start, cli.limit);

    let mut builder = ExecCtx::builder(cli.base_url.clone())
        .concurrency(cli.concurrency.unwrap_or(config.globals.concurrency))
        .timeout(Duration::from_secs(120));
    if let Some(key) = &cli.api_key {
        builder = builder.openai_with_key(key.clone());
    }
    let ctx = Arc::new(builder.build());

    let mut registry = PluginRegistry::new();
    registry.register(Arc::new(DedupePlugin::new()));
    registry.register(Arc::new(SchemaValidatePlugin::new()));
    let registry = Arc::new(registry);

    let report = run_pipeline(ctx, registry, &config, rows)
        .await
        .map_err(|e| (exit_code_for(&e), e.to_string()))?;

    if let Some(path) = &config.data_output_path {
        write_rows(std::path::Path::new(path), &report.rows).map_err(|e| (PIPELINE_ERROR, e.to_string()))?;
    }

    if report.error_count > 0 && !cli.continue_on_error {
        return Err((
            PIPELINE_ERROR,
            format!("{} row(s) failed during the run", report.error_count),
        ));
    }

    Ok(())
}

fn exit_code_for(error: &PipelineError) -> u8 {
    match error {
        PipelineError::Config(_) | PipelineError::InvalidConfig(_) => CONFIG_ERROR,
        PipelineError::Capability(_) => CAPABILITY_ERROR,
        _ => PIPELINE_ERROR,
    }
}

fn apply_overrides(config: &mut PipelineConfig, cli: &Cli) {
    if let Some(n) = cli.concurrency {
        config.globals.concurrency = n;
    }
    if let Some(n) = cli.task_concurrency {
        config.globals.task_concurrency = n;
    }
    if cli.continue_on_error {
        config.globals.continue_on_error = true;
    }
    if let Some(path) = &cli.data_output_path {
        config.data_output_path = Some(path.display().to_string());
    }

    for (i, prompt) in cli.step_prompts.iter().enumerate() {
        if let Some(step) = config.steps.get_mut(i) {
            step.prompt = Some(prompt.clone());
        }
    }
    for (i, model) in &cli.step_model {
        if let Some(step) = config.steps.get_mut(*i) {
            step.model = Some(model.clone());
        }
    }
    for (i, n) in &cli.step_candidates {
        if let Some(step) = config.steps.get_mut(*i) {
            if let Some(n) = std::num::NonZeroUsize::new(*n) {
                step.candidates = n;
            }
        }
    }
    for (i, model) in &cli.judge_model {
        if let Some(step) = config.steps.get_mut(*i) {
            if let Some(judge) = &mut step.judge {
                judge.model = Some(model.clone());
            }
        }
    }
    for (i, command) in &cli.command {
        if let Some(step) = config.steps.get_mut(*i) {
            step.command = Some(command.clone());
        }
    }
    for (i, command) in &cli.verify_command {
        if let Some(step) = config.steps.get_mut(*i) {
            step.verify_command = Some(command.clone());
        }
    }
    for (i, ratio) in &cli.aspect_ratio {
        if let Some(step) = config.steps.get_mut(*i) {
            step.aspect_ratio = Some(ratio.clone());
        }
    }
}
