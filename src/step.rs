//! The Step Executor (SPEC_FULL.md §4.3): runs one step's eight-stage
//! algorithm for a single row.

use crate::config::StepConfig;
use crate::error::{PipelineError, Result};
use crate::events::Event;
use crate::exec_ctx::ExecCtx;
use crate::llm_client::{invoke, ChatMessage, ImageRequest, LlmInvokeRequest, LlmInvokeResponse};
use crate::output_binder::{bind_output, write_artifact};
use crate::output_parser::parse_json_value;
use crate::plugin::PluginRegistry;
use crate::row::Row;
use crate::schema::validate;
use crate::template::Template;
use base64::Engine;
use futures::future::join_all;
use serde_json::Value;
use std::process::Command;
use std::time::Duration;

/// Outcome of running one row through one step.
pub enum StepOutcome {
    /// Row dropped (plugin or unrecoverable content error).
    Drop { reason: String },
    /// Row continues, possibly replaced by the output binder's fan-out.
    Continue(Vec<Row>),
}

struct Candidate {
    text: String,
    structured: Option<Value>,
    /// Set instead of `text` for an image-mode candidate (`step.aspect_ratio`
    /// is configured); `text` stays empty so the shell command/verify paths,
    /// which pipe `text` to stdin, are simply no-ops for image candidates.
    bytes: Option<Vec<u8>>,
}

impl Candidate {
    fn text(text: String, structured: Option<Value>) -> Self {
        Self { text, structured, bytes: None }
    }
}

/// Run `step` for a single `row`. `step_index` feeds deterministic LLM
/// seeding; `registry` resolves preprocessing plugin type tags.
///
/// Preprocessing plugins run in sequential fan-out (SPEC_FULL.md §9): if
/// a plugin explodes a row into N children, the *next* plugin runs
/// independently against each of those N, and so on -- not a Cartesian
/// product of every plugin's explode factor, just each plugin seeing
/// whatever rows the previous one left behind.
pub async fn run_step(
    ctx: &ExecCtx,
    registry: &PluginRegistry,
    step: &StepConfig,
    step_index: usize,
    row: Row,
) -> Result<StepOutcome> {
    let preprocessed = run_preprocess_plugins(ctx, registry, step, vec![row]).await?;
    if preprocessed.is_empty() {
        return Ok(StepOutcome::Drop {
            reason: "preprocessing plugin dropped row".to_string(),
        });
    }

    if step.prompt.is_none() {
        // No LLM call configured for this step: preprocessing plugins
        // were the entire step.
        return Ok(StepOutcome::Continue(preprocessed));
    }

    let mut all_rows = Vec::new();
    for row in preprocessed {
        all_rows.extend(run_llm_portion(ctx, step, step_index, row).await?);
    }
    Ok(StepOutcome::Continue(all_rows))
}

async fn run_llm_portion(ctx: &ExecCtx, step: &StepConfig, step_index: usize, row: Row) -> Result<Vec<Row>> {
    let row_index = numeric_index(&row);
    let model = step
        .model
        .clone()
        .unwrap_or_else(|| "gpt-4o-mini".to_string());

    let messages = assemble_messages(ctx, step, &row)?;

    let candidates = run_candidates(ctx, step, &model, &messages, row_index, step_index).await?;
    if candidates.is_empty() {
        return Err(PipelineError::Content {
            row_index,
            step: step.name.clone(),
            message: "every candidate failed to parse".to_string(),
        });
    }

    // A judge collapses N candidates to the one it picks. With no judge,
    // every surviving candidate carries through (the Output Binder fans
    // them out per `output.explode`, or arrays them under one column).
    let post_judge = if candidates.len() > 1 && step.judge.is_some() {
        let chosen = run_judge(ctx, step, &model, &candidates, row_index, step_index).await?;
        let mut selected = candidates;
        vec![selected.remove(chosen.min(selected.len().saturating_sub(1)))]
    } else {
        candidates
    };

    let final_candidates = if let Some(feedback) = &step.feedback {
        let refined = join_all(post_judge.into_iter().map(|candidate| {
            run_feedback_loop(ctx, step, feedback, &model, candidate, &messages, row_index, step_index)
        }))
        .await;
        let mut flattened = Vec::new();
        for result in refined {
            flattened.extend(result?);
        }
        flattened
    } else {
        post_judge
    };

    let post_processed = run_post_process(ctx, step, &row, &model, &messages, row_index, step_index, final_candidates).await?;

    bind_output(&row, &step.output, &post_processed)
}

fn numeric_index(row: &Row) -> usize {
    row.root_index().parse().unwrap_or(0)
}

/// Run every configured plugin, in order, against the current row
/// population. Each plugin sees the full (possibly already-exploded)
/// population left by the previous one; a plugin runs independently
/// against each row it's handed.
async fn run_preprocess_plugins(
    ctx: &ExecCtx,
    registry: &PluginRegistry,
    step: &StepConfig,
    rows: Vec<Row>,
) -> Result<Vec<Row>> {
    let mut population = rows;
    for plugin_config in &step.plugins {
        let plugin_type = plugin_config.type_tag();
        let plugin = registry.get(plugin_type).ok_or_else(|| {
            PipelineError::Config(format!("no plugin registered for type '{plugin_type}'"))
        })?;
        let raw = plugin_config.to_raw_value();

        let mut next_population = Vec::with_capacity(population.len());
        for current in population {
            let resolved = plugin.resolve_config(&raw, &current, step.model.as_deref())?;

            ctx.events.emit(Event::PluginStart {
                plugin: plugin_type.to_string(),
                row_index: numeric_index(&current),
            });

            let outcome = plugin.execute(&resolved, ctx).await.map_err(|e| {
                let enriched = match e {
                    PipelineError::Content { step, message, .. } => PipelineError::Content {
                        row_index: numeric_index(&current),
                        step,
                        message,
                    },
                    other => PipelineError::Plugin {
                        plugin: plugin_type.to_string(),
                        row_index: numeric_index(&current),
                        message: other.to_string(),
                    },
                };
                ctx.events.emit(Event::PluginError {
                    plugin: plugin_type.to_string(),
                    row_index: numeric_index(&current),
                    message: enriched.to_string(),
                });
                enriched
            })?;

            ctx.events.emit(Event::PluginEnd {
                plugin: plugin_type.to_string(),
                row_index: numeric_index(&current),
                packets: outcome.packets.len(),
            });

            match outcome.disposition() {
                crate::packet::Disposition::Drop => {
                    ctx.events.emit(Event::RowDrop {
                        row_index: numeric_index(&current),
                        step: step.name.clone(),
                        reason: format!("plugin '{plugin_type}' dropped row"),
                    });
                }
                crate::packet::Disposition::Continue => {
                    let mut merged = current;
                    merged.merge(&outcome.packets[0].data);
                    next_population.push(merged);
                }
                crate::packet::Disposition::Explode(n) => {
                    for (pos, packet) in outcome.packets.into_iter().enumerate() {
                        let mut child = current.clone();
                        if n > 1 {
                            child.index = current.child_index(pos);
                        }
                        child.merge(&packet.data);
                        next_population.push(child);
                    }
                }
            }
        }
        population = next_population;
    }
    Ok(population)
}

fn assemble_messages(ctx: &ExecCtx, step: &StepConfig, row: &Row) -> Result<Vec<ChatMessage>> {
    let mut messages = Vec::new();
    if let Some(system) = &step.system_prompt {
        let rendered = Template::compile(system).render(row, &ctx.base_dir)?;
        messages.push(ChatMessage::system(rendered));
    }
    let prompt = step.prompt.as_deref().unwrap_or_default();
    let rendered = Template::compile(prompt).render(row, &ctx.base_dir)?;
    messages.push(ChatMessage::user(rendered));
    Ok(messages)
}

async fn run_candidates(
    ctx: &ExecCtx,
    step: &StepConfig,
    model: &str,
    messages: &[ChatMessage],
    row_index: usize,
    step_index: usize,
) -> Result<Vec<Candidate>> {
    let n = step.candidates.get();
    let futures = (0..n).map(|candidate_index| {
        run_single_candidate(ctx, step, model, messages, row_index, step_index, candidate_index)
    });
    let results = join_all(futures).await;

    let mut candidates = Vec::with_capacity(n);
    for result in results {
        if let Some(candidate) = result? {
            candidates.push(candidate);
        }
    }
    Ok(candidates)
}

async fn run_single_candidate(
    ctx: &ExecCtx,
    step: &StepConfig,
    model: &str,
    messages: &[ChatMessage],
    row_index: usize,
    step_index: usize,
    candidate_index: usize,
) -> Result<Option<Candidate>> {
    ctx.events.emit(Event::LlmRequest {
        row_index,
        step: step.name.clone(),
        model: model.to_string(),
        candidate_index,
    });

    let base_request = LlmInvokeRequest::new(model, messages.to_vec())
        .with_derived_seed(row_index, step_index, candidate_index);
    let mut request = base_request.clone();
    request.structured_schema = step.schema.clone();
    if let Some(ratio) = &step.aspect_ratio {
        request.image = Some(ImageRequest { aspect_ratio: ratio.clone() });
    }

    let mut attempt = 0u32;
    let mut last_response = invoke(ctx, request.clone()).await;

    loop {
        ctx.events.emit(Event::LlmResponse {
            row_index,
            step: step.name.clone(),
            candidate_index,
            ok: last_response.is_ok(),
        });

        let response = match &last_response {
            Ok(r) => r,
            Err(_) => return last_response.map(|_| None),
        };

        let (text, structured) = match response {
            LlmInvokeResponse::Text { text, structured } => (text, structured),
            LlmInvokeResponse::Image { bytes, .. } => {
                ctx.events.emit(Event::CandidateProduced {
                    row_index,
                    step: step.name.clone(),
                    candidate_index,
                });
                return Ok(Some(Candidate {
                    text: String::new(),
                    structured: None,
                    bytes: Some(bytes.clone()),
                }));
            }
        };

        let parsed = structured
            .clone()
            .or_else(|| parse_json_value(text).ok());

        if let Some(schema) = &step.schema {
            match &parsed {
                Some(value) if validate(value, schema).is_empty() => {
                    ctx.events.emit(Event::CandidateProduced {
                        row_index,
                        step: step.name.clone(),
                        candidate_index,
                    });
                    return Ok(Some(Candidate::text(text.clone(), parsed)));
                }
                _ if attempt == 0 => {
                    // One automatic schema-echoing retry (§4.3 step 3).
                    attempt += 1;
                    ctx.events.emit(Event::RetryStart {
                        name: step.name.clone(),
                        attempt,
                        reason: "structured output failed schema validation".to_string(),
                    });
                    let mut retry_messages = messages.to_vec();
                    retry_messages.push(ChatMessage::assistant(text.clone()));
                    retry_messages.push(ChatMessage::user(format!(
                        "Your previous response did not match the required schema:\n{}\n\nRespond again with valid JSON matching this schema exactly.",
                        serde_json::to_string_pretty(schema).unwrap_or_default()
                    )));
                    request = base_request.clone();
                    request.messages = retry_messages;
                    request.structured_schema = step.schema.clone();
                    last_response = invoke(ctx, request.clone()).await;
                    continue;
                }
                _ => {
                    ctx.events.emit(Event::RetryEnd {
                        name: step.name.clone(),
                        attempts: attempt,
                        success: false,
                    });
                    return Ok(None);
                }
            }
        }

        ctx.events.emit(Event::CandidateProduced {
            row_index,
            step: step.name.clone(),
            candidate_index,
        });
        return Ok(Some(Candidate::text(text.clone(), parsed)));
    }
}

async fn run_judge(
    ctx: &ExecCtx,
    step: &StepConfig,
    model: &str,
    candidates: &[Candidate],
    row_index: usize,
    step_index: usize,
) -> Result<usize> {
    let judge = step.judge.as_ref().expect("judge presence checked by caller");
    let judge_model = judge.model.clone().unwrap_or_else(|| model.to_string());

    let mut listing = String::new();
    for (i, candidate) in candidates.iter().enumerate() {
        listing.push_str(&format!("\nCandidate {}:\n{}\n", i + 1, candidate.text));
    }
    let prompt = format!("{}\n{}\n\nRespond with only the candidate number (1-based).", judge.prompt, listing);

    let request = LlmInvokeRequest::new(judge_model, vec![ChatMessage::user(prompt)])
        .with_derived_seed(row_index, step_index, candidates.len());
    let response = invoke(ctx, request).await?;

    let LlmInvokeResponse::Text { text, .. } = response else {
        return Ok(0);
    };

    let chosen_one_based: usize = text
        .trim()
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect::<String>()
        .parse()
        .unwrap_or(1);
    let chosen = chosen_one_based.saturating_sub(1).min(candidates.len().saturating_sub(1));

    ctx.events.emit(Event::JudgeChose {
        row_index,
        step: step.name.clone(),
        chosen_index: chosen,
    });
    Ok(chosen)
}

#[allow(clippy::too_many_arguments)]
async fn run_feedback_loop(
    ctx: &ExecCtx,
    step: &StepConfig,
    feedback: &crate::config::FeedbackConfig,
    model: &str,
    mut current: Candidate,
    original_messages: &[ChatMessage],
    row_index: usize,
    step_index: usize,
) -> Result<Vec<Candidate>> {
    let feedback_model = feedback.model.clone().unwrap_or_else(|| model.to_string());

    for loop_index in 0..feedback.max_loops {
        let critique_prompt = format!("{}\n\nCurrent output:\n{}", feedback.prompt, current.text);
        let request = LlmInvokeRequest::new(feedback_model.clone(), vec![ChatMessage::user(critique_prompt)])
            .with_derived_seed(row_index, step_index, 1000 + loop_index as usize);
        let response = invoke(ctx, request).await?;
        let LlmInvokeResponse::Text { text: critique, .. } = response else {
            break;
        };

        if critique.to_lowercase().contains("accept") {
            break;
        }

        let mut regenerate_messages = original_messages.to_vec();
        regenerate_messages.push(ChatMessage::assistant(current.text.clone()));
        regenerate_messages.push(ChatMessage::user(format!(
            "Feedback: {critique}\n\nRegenerate your response incorporating this feedback."
        )));
        let request = LlmInvokeRequest::new(model, regenerate_messages)
            .with_derived_seed(row_index, step_index, 2000 + loop_index as usize);
        let response = invoke(ctx, request).await?;
        let LlmInvokeResponse::Text { text, structured } = response else {
            break;
        };
        current = Candidate::text(text, structured);
    }

    Ok(vec![current])
}

#[allow(clippy::too_many_arguments)]
async fn run_post_process(
    ctx: &ExecCtx,
    step: &StepConfig,
    row: &Row,
    model: &str,
    original_messages: &[ChatMessage],
    row_index: usize,
    step_index: usize,
    candidates: Vec<Candidate>,
) -> Result<Vec<Value>> {
    let n = candidates.len();
    let mut outputs = Vec::with_capacity(n);

    for (i, mut candidate) in candidates.into_iter().enumerate() {
        if let Some(verify_command) = &step.verify_command {
            candidate = run_verify_loop(
                ctx,
                verify_command,
                model,
                original_messages,
                row_index,
                step_index,
                candidate,
            )
            .await?;
        }

        if let Some(output_path) = &step.output.output_path {
            let cand = (n > 1).then_some(i);
            let content: &[u8] = candidate.bytes.as_deref().unwrap_or(candidate.text.as_bytes());
            write_artifact(ctx, row, output_path, cand, content).await?;
        }

        let value = if let Some(bytes) = &candidate.bytes {
            Value::String(base64::engine::general_purpose::STANDARD.encode(bytes))
        } else {
            candidate
                .structured
                .clone()
                .unwrap_or_else(|| Value::String(candidate.text.clone()))
        };

        let value = if let Some(command) = &step.command {
            if n > 1 && step.skip_candidate_command {
                value
            } else {
                run_shell_command(command, &candidate.text)?
            }
        } else {
            value
        };

        outputs.push(value);
    }
    Ok(outputs)
}

fn run_shell_command(command: &str, stdin_text: &str) -> Result<Value> {
    use std::io::Write;
    use std::process::Stdio;

    let mut child = Command::new("sh")
        .arg("-c")
        .arg(command)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| PipelineError::Other(format!("failed to spawn command: {e}")))?;

    if let Some(mut stdin) = child.stdin.take() {
        let _ = stdin.write_all(stdin_text.as_bytes());
    }

    let output = child
        .wait_with_output()
        .map_err(|e| PipelineError::Other(format!("command failed: {e}")))?;

    Ok(Value::String(String::from_utf8_lossy(&output.stdout).trim().to_string()))
}

const MAX_VERIFY_ATTEMPTS: u32 = 3;

/// Spawn `verify_command` against the candidate's text on stdin. On
/// failure, regenerate via the LLM with the command's stdout/stderr
/// injected as correction context, bounded by `MAX_VERIFY_ATTEMPTS`.
#[allow(clippy::too_many_arguments)]
async fn run_verify_loop(
    ctx: &ExecCtx,
    verify_command: &str,
    model: &str,
    original_messages: &[ChatMessage],
    row_index: usize,
    step_index: usize,
    mut candidate: Candidate,
) -> Result<Candidate> {
    for attempt in 0..MAX_VERIFY_ATTEMPTS {
        let (success, stdout, stderr) = run_shell_checked(verify_command, &candidate.text)?;
        if success {
            return Ok(candidate);
        }

        if attempt + 1 == MAX_VERIFY_ATTEMPTS {
            return Err(PipelineError::Content {
                row_index,
                step: "verify".to_string(),
                message: format!("verify command did not succeed within {MAX_VERIFY_ATTEMPTS} attempts: {stderr}"),
            });
        }

        ctx.events.emit(Event::RetryStart {
            name: "verify".to_string(),
            attempt: attempt + 1,
            reason: format!("verify command failed (stderr: {stderr})"),
        });

        let mut regenerate_messages = original_messages.to_vec();
        regenerate_messages.push(ChatMessage::assistant(candidate.text.clone()));
        regenerate_messages.push(ChatMessage::user(format!(
            "The verification command rejected your previous output.\nstdout:\n{stdout}\nstderr:\n{stderr}\n\nRegenerate your response so it passes verification."
        )));
        let request = LlmInvokeRequest::new(model, regenerate_messages)
            .with_derived_seed(row_index, step_index, 3000 + attempt as usize);
        let response = invoke(ctx, request).await?;
        let LlmInvokeResponse::Text { text, structured } = response else {
            break;
        };
        candidate = Candidate::text(text, structured);
    }

    Ok(candidate)
}

fn run_shell_checked(command: &str, stdin_text: &str) -> Result<(bool, String, String)> {
    use std::io::Write;
    use std::process::Stdio;

    let mut child = Command::new("sh")
        .arg("-c")
        .arg(command)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| PipelineError::Other(format!("failed to spawn verify command: {e}")))?;

    if let Some(mut stdin) = child.stdin.take() {
        let _ = stdin.write_all(stdin_text.as_bytes());
    }

    let output = child
        .wait_with_output()
        .map_err(|e| PipelineError::Other(format!("verify command failed: {e}")))?;

    Ok((
        output.status.success(),
        String::from_utf8_lossy(&output.stdout).trim().to_string(),
        String::from_utf8_lossy(&output.stderr).trim().to_string(),
    ))
}

pub const LLM_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);
pub const SUBPROCESS_TIMEOUT: Duration = Duration::from_secs(300);
