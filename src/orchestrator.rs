//! The Pipeline Orchestrator (SPEC_FULL.md §4.4): runs a row population
//! through every configured step in sequence, bounded by two independent
//! semaphores and barrier-synchronized at each step boundary.
//!
//! Grounded in the bulk-file executor's `Semaphore` + `tokio::spawn`
//! fan-out (`executor.rs::execute_bulk`): one task per unit of work,
//! gated by an `Arc<Semaphore>` permit, results collected before moving
//! on. The LLM-request bound (`ExecCtx.llm_semaphore`) is a second,
//! independent semaphore nested inside each row task.

use crate::config::{PipelineConfig, StepConfig};
use crate::error::{PipelineError, Result};
use crate::events::Event;
use crate::exec_ctx::ExecCtx;
use crate::plugin::{Capability, PluginRegistry};
use crate::row::{Row, RowStream};
use crate::step::{run_step, StepOutcome};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Outcome of a full pipeline run.
pub struct RunReport {
    pub rows: RowStream,
    pub error_count: usize,
}

/// Capabilities this crate's concrete plugins and the LLM Client
/// Abstraction can actually satisfy. Anything a configured plugin
/// declares beyond this set aborts the run before any row is touched
/// (SPEC_FULL.md §4.2).
pub fn builtin_capabilities() -> HashSet<Capability> {
    [Capability::Llm].into_iter().collect()
}

/// Run every step in `config` over `initial_rows`, in order.
///
/// Each step is a barrier: every row's disposition (continue/drop/
/// explode) at step N is resolved before step N+1 starts, per
/// SPEC_FULL.md §4.4. Within a step, row-level tasks run concurrently,
/// bounded by `config.globals.task_concurrency`; LLM requests within
/// those tasks are separately bounded by `ctx.llm_semaphore`
/// (`config.globals.concurrency`).
pub async fn run_pipeline(
    ctx: Arc<ExecCtx>,
    registry: Arc<PluginRegistry>,
    config: &PipelineConfig,
    initial_rows: Vec<Row>,
) -> Result<RunReport> {
    check_capabilities(&registry, config)?;

    ctx.events.emit(Event::RunStart {
        rows: initial_rows.len(),
    });

    let task_semaphore = Arc::new(Semaphore::new(config.globals.task_concurrency.max(1)));
    let mut population = initial_rows;
    let mut error_count = 0usize;

    for (step_index, step) in config.steps.iter().enumerate() {
        ctx.events.emit(Event::StepStart {
            step: step.name.clone(),
            rows: population.len(),
        });

        let step = Arc::new(step.clone());
        let mut handles = Vec::with_capacity(population.len());
        for row in population {
            let row_index = row.index.clone();
            let ctx = Arc::clone(&ctx);
            let registry = Arc::clone(&registry);
            let step = Arc::clone(&step);
            let permit = Arc::clone(&task_semaphore);
            handles.push(tokio::spawn(async move {
                let _permit = permit.acquire_owned().await;
                (row_index, run_step(&ctx, &registry, &step, step_index, row).await)
            }));
        }

        let mut next_population = Vec::new();
        for handle in handles {
            let (row_index, outcome) = handle
                .await
                .map_err(|e| PipelineError::Fatal(format!("row task panicked: {e}")))?;

            match outcome {
                Ok(StepOutcome::Continue(rows)) => next_population.extend(rows),
                Ok(StepOutcome::Drop { reason }) => {
                    ctx.events.emit(Event::RowDrop {
                        row_index: row_index.parse().unwrap_or(0),
                        step: step.name.clone(),
                        reason,
                    });
                }
                Err(e) => {
                    error_count += 1;
                    ctx.events.emit(Event::Error {
                        row_index: row_index.parse().ok(),
                        step: Some(step.name.clone()),
                        kind: e.kind(),
                        message: e.to_string(),
                    });
                    if e.is_fatal() && !config.globals.continue_on_error {
                        return Err(e);
                    }
                }
            }
        }

        population = next_population;
        ctx.events.emit(Event::StepEnd {
            step: step.name.clone(),
            rows_out: population.len(),
        });

        ctx.check_cancelled()?;
        if population.is_empty() {
            break;
        }
    }

    let mut stream = RowStream::new(population);
    stream.sort_by_index();
    ctx.events.emit(Event::RunEnd {
        rows_remaining: stream.len(),
        errors: error_count,
    });

    Ok(RunReport {
        rows: stream,
        error_count,
    })
}

fn check_capabilities(registry: &PluginRegistry, config: &PipelineConfig) -> Result<()> {
    let available = builtin_capabilities();
    for step in &config.steps {
        for plugin_config in &step.plugins {
            let plugin_type = plugin_config.type_tag();
            let required = registry
                .capabilities_for(plugin_type)
                .ok_or_else(|| PipelineError::Config(format!("no plugin registered for type '{plugin_type}'")))?;
            if let Some(missing) = required.difference(&available).next() {
                return Err(PipelineError::Capability(*missing));
            }
        }
        if step.prompt.is_some() && !available.contains(&Capability::Llm) {
            return Err(PipelineError::Capability(Capability::Llm));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MockBackend;
    use crate::config::{GlobalsConfig, OutputConfig, OutputMode, PipelineConfig};
    use std::num::NonZeroUsize;

    fn step(name: &str, prompt: &str) -> StepConfig {
        StepConfig {
            name: name.to_string(),
            plugins: Vec::new(),
            prompt: Some(prompt.to_string()),
            system_prompt: None,
            model: Some("mock-model".to_string()),
            output: OutputConfig {
                mode: OutputMode::Column,
                column: Some("out".to_string()),
                explode: false,
                output_path: None,
            },
            schema: None,
            candidates: NonZeroUsize::new(1).unwrap(),
            judge: None,
            feedback: None,
            aspect_ratio: None,
            command: None,
            verify_command: None,
            skip_candidate_command: false,
        }
    }

    #[tokio::test]
    async fn runs_every_row_through_every_step() {
        let backend = Arc::new(MockBackend::fixed("ok"));
        let ctx = Arc::new(ExecCtx::builder("http://localhost").backend(backend).build());
        let registry = Arc::new(PluginRegistry::new());
        let config = PipelineConfig {
            globals: GlobalsConfig::default(),
            steps: vec![step("one", "p1"), step("two", "p2")],
            data_output_path: None,
        };
        let rows = vec![Row::new("0"), Row::new("1"), Row::new("2")];

        let report = run_pipeline(ctx, registry, &config, rows).await.unwrap();
        assert_eq!(report.rows.len(), 3);
        assert_eq!(report.error_count, 0);
        for row in report.rows.rows() {
            assert_eq!(row.get("out"), Some(&serde_json::json!("ok")));
        }
    }

    #[tokio::test]
    async fn unregistered_plugin_type_aborts_before_any_row_runs() {
        let backend = Arc::new(MockBackend::fixed("ok"));
        let ctx = Arc::new(ExecCtx::builder("http://localhost").backend(backend).build());
        let registry = Arc::new(PluginRegistry::new());
        let mut bad_step = step("one", "p1");
        bad_step.plugins = vec![crate::config::PluginConfig::Dedupe {
            key: "{{x}}".to_string(),
        }];
        let config = PipelineConfig {
            globals: GlobalsConfig::default(),
            steps: vec![bad_step],
            data_output_path: None,
        };

        let result = run_pipeline(ctx, registry, &config, vec![Row::new("0")]).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn output_preserves_row_order_after_concurrent_execution() {
        let backend = Arc::new(MockBackend::fixed("ok"));
        let ctx = Arc::new(ExecCtx::builder("http://localhost").backend(backend).build());
        let registry = Arc::new(PluginRegistry::new());
        let config = PipelineConfig {
            globals: GlobalsConfig {
                task_concurrency: 8,
                ..GlobalsConfig::default()
            },
            steps: vec![step("one", "p1")],
            data_output_path: None,
        };
        let rows: Vec<Row> = (0..12).map(|i| Row::new(i.to_string())).collect();

        let report = run_pipeline(ctx, registry, &config, rows).await.unwrap();
        let indices: Vec<&str> = report.rows.rows().iter().map(|r| r.index.as_str()).collect();
        assert_eq!(indices, vec!["0", "1", "2", "3", "4", "5", "6", "7", "8", "9", "10", "11"]);
    }

    // The following cover the six named end-to-end scenarios.

    #[tokio::test]
    async fn simple_three_step_chain_with_candidates() {
        let backend = Arc::new(MockBackend::fixed("same answer"));
        let ctx = Arc::new(ExecCtx::builder("http://localhost").backend(backend).build());
        let registry = Arc::new(PluginRegistry::new());
        let mut middle = step("analyze", "look at {{raw}}");
        middle.candidates = NonZeroUsize::new(3).unwrap();
        let config = PipelineConfig {
            globals: GlobalsConfig::default(),
            steps: vec![step("ingest", "echo {{raw}}"), middle, step("finalize", "wrap up")],
            data_output_path: None,
        };
        let rows = vec![Row::new("0")];

        let report = run_pipeline(ctx, registry, &config, rows).await.unwrap();
        assert_eq!(report.rows.len(), 1);
        assert_eq!(report.error_count, 0);
        // "finalize" runs last and overwrites the shared "out" column with
        // its own single-candidate result.
        assert_eq!(report.rows.rows()[0].get("out"), Some(&serde_json::json!("same answer")));
    }

    #[tokio::test]
    async fn explode_step_with_multiple_candidates_writes_one_artifact_per_candidate() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(MockBackend::fixed("body text"));
        let ctx = Arc::new(
            ExecCtx::builder("http://localhost")
                .backend(backend)
                .base_dir(dir.path())
                .build(),
        );
        let registry = Arc::new(PluginRegistry::new());
        let mut explode_step = step("write", "draft {{topic}}");
        explode_step.candidates = NonZeroUsize::new(2).unwrap();
        explode_step.output = OutputConfig {
            mode: OutputMode::Column,
            column: Some("draft".to_string()),
            explode: true,
            output_path: Some("out/draft_{{index}}.txt".to_string()),
        };
        let config = PipelineConfig {
            globals: GlobalsConfig::default(),
            steps: vec![explode_step],
            data_output_path: None,
        };
        // Two input rows, two candidates each -> four exploded rows, four
        // artifacts -- the same ref-index/candidate-index scheme the
        // six-packet/twelve-artifact scenario exercises at larger scale.
        let rows = vec![Row::new("0"), Row::new("1")];

        let report = run_pipeline(ctx, registry, &config, rows).await.unwrap();
        assert_eq!(report.rows.len(), 4);
        for ref_index in 0..2 {
            for cand in 0..2 {
                let path = dir.path().join("out").join(format!("draft_{ref_index}_{cand}.txt"));
                assert!(path.exists(), "missing artifact {}", path.display());
            }
        }
    }

    #[tokio::test]
    async fn dedupe_plugin_drops_repeat_rows_from_the_population() {
        use crate::plugins::dedupe::DedupePlugin;

        let backend = Arc::new(MockBackend::fixed("ok"));
        let ctx = Arc::new(ExecCtx::builder("http://localhost").backend(backend).build());
        let mut registry = PluginRegistry::new();
        registry.register(Arc::new(DedupePlugin::new()));
        let registry = Arc::new(registry);

        let mut dedupe_step = step("clean", "p1");
        dedupe_step.plugins = vec![crate::config::PluginConfig::Dedupe {
            key: "{{email}}".to_string(),
        }];
        let config = PipelineConfig {
            globals: GlobalsConfig::default(),
            steps: vec![dedupe_step],
            data_output_path: None,
        };

        let mut a = Row::new("0");
        a.set("email", serde_json::json!("dup@example.com"));
        let mut b = Row::new("1");
        b.set("email", serde_json::json!("dup@example.com"));
        let mut c = Row::new("2");
        c.set("email", serde_json::json!("unique@example.com"));

        let report = run_pipeline(ctx, registry, &config, vec![a, b, c]).await.unwrap();
        assert_eq!(report.rows.len(), 2);
        let surviving: Vec<&str> = report.rows.rows().iter().map(|r| r.index.as_str()).collect();
        assert_eq!(surviving, vec!["0", "2"]);
    }

    #[tokio::test]
    async fn schema_validation_failure_drops_row_after_exactly_one_retry() {
        // First response fails the schema; the automatic schema-echo retry
        // gets a second malformed response, so the row ends up dropped
        // (counted as an error) after exactly one retry, not an endless loop.
        let backend = Arc::new(MockBackend::new(vec![
            "not json".to_string(),
            "still not json".to_string(),
        ]));
        let ctx = Arc::new(ExecCtx::builder("http://localhost").backend(backend).build());
        let registry = Arc::new(PluginRegistry::new());

        let mut validated_step = step("extract", "extract fields");
        validated_step.schema = Some(serde_json::json!({
            "type": "object",
            "required": ["title"]
        }));
        let config = PipelineConfig {
            globals: GlobalsConfig::default(),
            steps: vec![validated_step],
            data_output_path: None,
        };

        let report = run_pipeline(ctx, registry, &config, vec![Row::new("0")]).await.unwrap();
        assert_eq!(report.rows.len(), 0);
        assert_eq!(report.error_count, 1);
    }

    #[tokio::test]
    async fn verify_loop_regenerates_once_after_a_failed_check() {
        // First candidate fails `verify_command`; the loop feeds its
        // stderr back to the model and regenerates once, which passes --
        // two LLM invocations total (the original candidate plus one
        // verify-driven regeneration).
        let backend = Arc::new(MockBackend::new(vec![
            "draft v1".to_string(),
            "draft v2 good".to_string(),
        ]));
        let ctx = Arc::new(ExecCtx::builder("http://localhost").backend(backend).build());
        let registry = Arc::new(PluginRegistry::new());

        let mut verified_step = step("write", "draft something");
        verified_step.verify_command =
            Some(r#"grep -q good || { echo "missing the word good" >&2; exit 1; }"#.to_string());
        let config = PipelineConfig {
            globals: GlobalsConfig::default(),
            steps: vec![verified_step],
            data_output_path: None,
        };

        let report = run_pipeline(ctx, registry, &config, vec![Row::new("0")]).await.unwrap();
        assert_eq!(report.rows.len(), 1);
        assert_eq!(report.error_count, 0);
        assert_eq!(
            report.rows.rows()[0].get("out"),
            Some(&serde_json::json!("draft v2 good"))
        );
    }

    #[tokio::test]
    async fn judge_selection_emits_judge_chose_event() {
        use crate::config::JudgeConfig;
        use crate::events::{Event, FnEventHandler};
        use std::sync::Mutex;

        let backend = Arc::new(MockBackend::new(vec![
            "candidate one".to_string(),
            "candidate two".to_string(),
            "2".to_string(), // judge picks candidate 2 (1-based)
        ]));
        let chosen = Arc::new(Mutex::new(None));
        let chosen_handle = Arc::clone(&chosen);
        let mut events = crate::events::EventBus::new();
        events.subscribe(Arc::new(FnEventHandler(move |event: Event| {
            if let Event::JudgeChose { chosen_index, .. } = event {
                *chosen_handle.lock().unwrap() = Some(chosen_index);
            }
        })));

        let ctx = Arc::new(
            ExecCtx::builder("http://localhost")
                .backend(backend)
                .events(events)
                .build(),
        );
        let registry = Arc::new(PluginRegistry::new());
        let mut judged_step = step("pick", "write something");
        judged_step.candidates = NonZeroUsize::new(2).unwrap();
        judged_step.judge = Some(JudgeConfig {
            model: None,
            prompt: "Pick the best.".to_string(),
        });
        let config = PipelineConfig {
            globals: GlobalsConfig::default(),
            steps: vec![judged_step],
            data_output_path: None,
        };

        let report = run_pipeline(ctx, registry, &config, vec![Row::new("0")]).await.unwrap();
        assert_eq!(report.rows.len(), 1);
        assert_eq!(*chosen.lock().unwrap(), Some(1));
    }
}
