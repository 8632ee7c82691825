//! CLI flag surface (SPEC_FULL.md §6), grounded in the `clap::Parser`
//! derive style used across the retrieval pack's CLI binaries.

use clap::Parser;
use std::path::PathBuf;

/// Run a configured pipeline over a batch of rows.
#[derive(Parser, Debug)]
#[command(name = "rowforge")]
#[command(version)]
#[command(about = "Batch engine for running rows through configured LLM steps")]
pub struct Cli {
    /// Path to the pipeline config document (YAML or JSON).
    #[arg(short, long)]
    pub config: PathBuf,

    /// Path to the input row file (CSV/JSON/JSONL, format inferred).
    #[arg(short, long)]
    pub input: PathBuf,

    /// Base URL of the OpenAI-compatible chat-completions endpoint.
    #[arg(long, env = "ROWFORGE_BASE_URL", default_value = "https://api.openai.com/v1")]
    pub base_url: String,

    /// API key for the LLM backend.
    #[arg(long, env = "ROWFORGE_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Skip this many rows before processing.
    #[arg(long, default_value_t = 0)]
    pub start: usize,

    /// Process at most this many rows after `--start`.
    #[arg(long)]
    pub limit: Option<usize>,

    /// Override the global LLM request concurrency bound.
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Override the global row-step task concurrency bound.
    #[arg(long)]
    pub task_concurrency: Option<usize>,

    /// Override the terminal `data_output_path` from the config document.
    #[arg(long)]
    pub data_output_path: Option<PathBuf>,

    /// Override step N's model, e.g. `--step-0-model gpt-4o-mini`. May be
    /// repeated once per overridden step.
    #[arg(long = "step-model", value_parser = parse_indexed_override::<String>)]
    pub step_model: Vec<(usize, String)>,

    /// Override step N's candidate count, e.g. `--step-candidates 0=3`.
    #[arg(long = "step-candidates", value_parser = parse_indexed_override::<usize>)]
    pub step_candidates: Vec<(usize, usize)>,

    /// Override step N's judge model.
    #[arg(long = "judge-model", value_parser = parse_indexed_override::<String>)]
    pub judge_model: Vec<(usize, String)>,

    /// Override step N's post-process shell command.
    #[arg(long = "command", value_parser = parse_indexed_override::<String>)]
    pub command: Vec<(usize, String)>,

    /// Override step N's verification shell command.
    #[arg(long = "verify-command", value_parser = parse_indexed_override::<String>)]
    pub verify_command: Vec<(usize, String)>,

    /// Override step N's image aspect ratio.
    #[arg(long = "aspect-ratio", value_parser = parse_indexed_override::<String>)]
    pub aspect_ratio: Vec<(usize, String)>,

    /// Continue the run after a row-level error instead of exiting
    /// non-zero for the batch.
    #[arg(long)]
    pub continue_on_error: bool,

    /// Positional per-step prompt overrides, applied to steps 0..N in
    /// order: `rowforge -c cfg.yaml -i rows.csv -- "Summarize: {{text}}" "Translate: {{text}}"`.
    #[arg(last = true)]
    pub step_prompts: Vec<String>,

    /// Enable verbose (debug level) tracing output.
    #[arg(short, long, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Suppress all tracing output except errors.
    #[arg(short, long)]
    pub quiet: bool,
}

/// Parses `N=value` into `(N, value)`, used for every `--step-*`
/// indexed-override flag.
fn parse_indexed_override<T>(raw: &str) -> Result<(usize, T), String>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let (index, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected `N=value`, got '{raw}'"))?;
    let index: usize = index
        .parse()
        .map_err(|e| format!("invalid step index '{index}': {e}"))?;
    let value: T = value.parse().map_err(|e| format!("invalid value '{value}': {e}"))?;
    Ok((index, value))
}

impl Cli {
    pub fn log_level(&self) -> &'static str {
        if self.quiet {
            "error"
        } else if self.verbose {
            "debug"
        } else {
            "info"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_indexed_override() {
        let (index, value): (usize, String) = parse_indexed_override("1=gpt-4o-mini").unwrap();
        assert_eq!(index, 1);
        assert_eq!(value, "gpt-4o-mini");
    }

    #[test]
    fn rejects_override_without_equals() {
        let result: Result<(usize, String), String> = parse_indexed_override("gpt-4o-mini");
        assert!(result.is_err());
    }

    #[test]
    fn parses_minimal_required_flags() {
        let cli = Cli::parse_from(["rowforge", "-c", "cfg.yaml", "-i", "rows.csv"]);
        assert_eq!(cli.config, PathBuf::from("cfg.yaml"));
        assert_eq!(cli.input, PathBuf::from("rows.csv"));
        assert_eq!(cli.start, 0);
        assert_eq!(cli.base_url, "https://api.openai.com/v1");
        assert_eq!(cli.log_level(), "info");
    }

    #[test]
    fn parses_repeated_step_overrides() {
        let cli = Cli::parse_from([
            "rowforge",
            "-c",
            "cfg.yaml",
            "-i",
            "rows.csv",
            "--step-model",
            "0=gpt-4o",
            "--step-model",
            "1=gpt-4o-mini",
        ]);
        assert_eq!(cli.step_model, vec![(0, "gpt-4o".to_string()), (1, "gpt-4o-mini".to_string())]);
    }
}
