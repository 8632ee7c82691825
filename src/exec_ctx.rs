//! Execution context shared across plugin and LLM-client invocations.
//!
//! [`ExecCtx`] carries the HTTP client, LLM backend, endpoint, cancellation
//! handle, event bus, the global LLM concurrency semaphore, and the
//! template base directory. It is constructed once per run and shared
//! across every row-step task.

use crate::backend::{Backend, BackoffConfig, OpenAiBackend};
use crate::events::EventBus;
use reqwest::Client;
use std::path::PathBuf;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;
use tokio::sync::Semaphore;

pub struct ExecCtx {
    pub client: Client,
    pub base_url: String,
    pub backend: Arc<dyn Backend>,
    pub backoff: BackoffConfig,
    pub cancellation: Option<Arc<AtomicBool>>,
    pub events: EventBus,
    /// Bounds global in-flight LLM requests (including judge/feedback
    /// calls), independent of `task_concurrency`'s row-level bound.
    pub llm_semaphore: Arc<Semaphore>,
    /// Root directory `{{file:...}}` template paths are resolved against.
    pub base_dir: PathBuf,
}

impl ExecCtx {
    pub fn builder(base_url: impl Into<String>) -> ExecCtxBuilder {
        ExecCtxBuilder {
            client: None,
            base_url: base_url.into(),
            backend: None,
            backoff: None,
            cancellation: None,
            events: EventBus::new(),
            concurrency: 8,
            base_dir: PathBuf::from("."),
            timeout: None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation
            .as_ref()
            .is_some_and(|c| c.load(Ordering::Relaxed))
    }

    pub fn check_cancelled(&self) -> crate::error::Result<()> {
        if self.is_cancelled() {
            return Err(crate::PipelineError::Cancelled);
        }
        Ok(())
    }

    pub fn cancel_flag(&self) -> Option<&AtomicBool> {
        self.cancellation.as_deref()
    }
}

impl std::fmt::Debug for ExecCtx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecCtx")
            .field("base_url", &self.base_url)
            .field("backend", &self.backend.name())
            .field("backoff", &self.backoff)
            .field("has_cancellation", &self.cancellation.is_some())
            .field("available_llm_permits", &self.llm_semaphore.available_permits())
            .finish()
    }
}

pub struct ExecCtxBuilder {
    client: Option<Client>,
    base_url: String,
    backend: Option<Arc<dyn Backend>>,
    backoff: Option<BackoffConfig>,
    cancellation: Option<Arc<AtomicBool>>,
    events: EventBus,
    concurrency: usize,
    base_dir: PathBuf,
    timeout: Option<Duration>,
}

impl ExecCtxBuilder {
    pub fn client(mut self, client: Client) -> Self {
        self.client = Some(client);
        self
    }

    pub fn backend(mut self, backend: Arc<dyn Backend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn openai_with_key(mut self, api_key: impl Into<String>) -> Self {
        self.backend = Some(Arc::new(OpenAiBackend::new().with_api_key(api_key)));
        self
    }

    pub fn backoff(mut self, config: BackoffConfig) -> Self {
        self.backoff = Some(config);
        self
    }

    pub fn cancellation(mut self, cancel: Option<Arc<AtomicBool>>) -> Self {
        self.cancellation = cancel;
        self
    }

    pub fn events(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    /// Global LLM request concurrency bound (SPEC_FULL.md §4.4).
    pub fn concurrency(mut self, n: usize) -> Self {
        self.concurrency = n.max(1);
        self
    }

    pub fn base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.base_dir = dir.into();
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn build(self) -> ExecCtx {
        let timeout = self.timeout.unwrap_or(Duration::from_secs(120));
        let client = self.client.unwrap_or_else(|| {
            Client::builder()
                .timeout(timeout)
                .build()
                .expect("failed to build HTTP client")
        });
        ExecCtx {
            client,
            base_url: normalize_base_url(&self.base_url),
            backend: self.backend.unwrap_or_else(|| Arc::new(OpenAiBackend::new())),
            backoff: self.backoff.unwrap_or_else(BackoffConfig::standard),
            cancellation: self.cancellation,
            events: self.events,
            llm_semaphore: Arc::new(Semaphore::new(self.concurrency)),
            base_dir: self.base_dir,
        }
    }
}

/// Strip known provider path suffixes from a base URL so backends don't
/// double up on their own path segments.
fn normalize_base_url(url: &str) -> String {
    let trimmed = url.trim_end_matches('/');
    for suffix in &[
        "/v1/chat/completions",
        "/v1/chat",
        "/v1",
        "/api/generate",
        "/api/chat",
        "/api",
    ] {
        if let Some(stripped) = trimmed.strip_suffix(suffix) {
            return stripped.to_string();
        }
    }
    trimmed.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_base_url_strips_known_suffixes() {
        assert_eq!(normalize_base_url("https://api.openai.com/v1"), "https://api.openai.com");
        assert_eq!(normalize_base_url("http://localhost:11434/api/"), "http://localhost:11434");
        assert_eq!(normalize_base_url("http://localhost:11434"), "http://localhost:11434");
    }

    #[test]
    fn builder_defaults_produce_a_working_ctx() {
        let ctx = ExecCtx::builder("http://localhost:11434").concurrency(3).build();
        assert_eq!(ctx.llm_semaphore.available_permits(), 3);
        assert!(!ctx.is_cancelled());
    }
}
