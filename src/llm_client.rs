//! The LLM Client Abstraction (SPEC_FULL.md §4.6): a single `invoke()`
//! entry point the Step Executor calls for every candidate, judge, and
//! feedback request.
//!
//! Wraps [`backend::with_backoff`](crate::backend::with_backoff) for
//! transport retry and deterministic seeding, and falls back to
//! `output_parser` for structured output when the backend has no
//! provider-native JSON mode.

use crate::backend::{self, BackoffConfig, ChatMessage as BackendMessage, LlmConfig, LlmRequest as BackendRequest, Role};
use crate::error::{PipelineError, Result};
use crate::exec_ctx::ExecCtx;
use crate::output_parser::parse_json_value;
use base64::Engine;
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ImageRequest {
    pub aspect_ratio: String,
}

/// A normalized, provider-agnostic LLM request.
#[derive(Debug, Clone)]
pub struct LlmInvokeRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: Option<f64>,
    pub reasoning_effort: Option<String>,
    pub structured_schema: Option<Value>,
    pub image: Option<ImageRequest>,
    /// Deterministic seed, derived from `(row_index, step_index, candidate_index)`.
    pub seed: Option<i64>,
}

impl LlmInvokeRequest {
    pub fn new(model: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: model.into(),
            messages,
            temperature: None,
            reasoning_effort: None,
            structured_schema: None,
            image: None,
            seed: None,
        }
    }

    /// Derive the deterministic seed from `(row_index, step_index,
    /// candidate_index)` as specified in SPEC_FULL.md §4.3/§4.6.
    pub fn with_derived_seed(mut self, row_index: usize, step_index: usize, candidate_index: usize) -> Self {
        let combined = (row_index as i64)
            .wrapping_mul(1_000_003)
            .wrapping_add((step_index as i64).wrapping_mul(1009))
            .wrapping_add(candidate_index as i64);
        self.seed = Some(combined);
        self
    }
}

#[derive(Debug)]
pub enum LlmInvokeResponse {
    Text {
        text: String,
        structured: Option<Value>,
    },
    Image {
        bytes: Vec<u8>,
        mime_type: String,
    },
}

/// Calls [`ExecCtx::backend`] through the retry/backoff wrapper, honoring
/// `structured_schema` via provider JSON mode plus post-hoc defensive
/// extraction, and `image` via a base64-encoded payload in the backend's
/// metadata.
pub async fn invoke(ctx: &ExecCtx, request: LlmInvokeRequest) -> Result<LlmInvokeResponse> {
    ctx.check_cancelled()?;
    let _permit = ctx
        .llm_semaphore
        .clone()
        .acquire_owned()
        .await
        .map_err(|_| PipelineError::Cancelled)?;

    let backend_request = to_backend_request(&request);

    let backoff: BackoffConfig = ctx.backoff.clone();
    let response = backend::with_backoff(
        &ctx.backend,
        &ctx.client,
        &ctx.base_url,
        &backend_request,
        &backoff,
        ctx.cancel_flag(),
        None,
    )
    .await?;

    if let Some(image) = &request.image {
        return extract_image(&response.text, image);
    }

    if request.structured_schema.is_some() || backend_request.config.json_mode {
        let structured = parse_json_value(&response.text).ok();
        return Ok(LlmInvokeResponse::Text {
            text: response.text,
            structured,
        });
    }

    Ok(LlmInvokeResponse::Text {
        text: response.text,
        structured: None,
    })
}

fn to_backend_request(request: &LlmInvokeRequest) -> BackendRequest {
    let mut config = LlmConfig::default();
    if let Some(temp) = request.temperature {
        config.temperature = temp;
    }
    if let Some(seed) = request.seed {
        config.seed = Some(seed);
    }
    config.json_mode = request.structured_schema.is_some();

    let mut system_prompt = None;
    let mut messages = Vec::new();
    let mut prompt = String::new();

    for message in &request.messages {
        match message.role {
            ChatRole::System => system_prompt = Some(message.content.clone()),
            ChatRole::User => {
                prompt = message.content.clone();
                messages.push(BackendMessage {
                    role: Role::User,
                    content: message.content.clone(),
                });
            }
            ChatRole::Assistant => messages.push(BackendMessage {
                role: Role::Assistant,
                content: message.content.clone(),
            }),
        }
    }

    BackendRequest {
        model: request.model.clone(),
        system_prompt,
        prompt,
        messages,
        config,
    }
}

fn extract_image(text: &str, image: &ImageRequest) -> Result<LlmInvokeResponse> {
    let (mime_type, payload) = if let Some(stripped) = text.strip_prefix("data:") {
        let mut parts = stripped.splitn(2, ';');
        let mime = parts.next().unwrap_or("image/png").to_string();
        let rest = parts.next().unwrap_or("");
        let data = rest.strip_prefix("base64,").unwrap_or(rest);
        (mime, data.to_string())
    } else {
        ("image/png".to_string(), text.trim().to_string())
    };

    let bytes = base64::engine::general_purpose::STANDARD
        .decode(payload.as_bytes())
        .map_err(|e| {
            PipelineError::Content {
                row_index: 0,
                step: "image".to_string(),
                message: format!("invalid base64 image payload (aspect_ratio={}): {e}", image.aspect_ratio),
            }
        })?;

    Ok(LlmInvokeResponse::Image { bytes, mime_type })
}
