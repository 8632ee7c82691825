use std::time::Duration;
use thiserror::Error;

/// Errors produced by the engine and its components.
///
/// Variants fall into the taxonomy a row-oriented batch engine needs:
/// some errors abort the whole run, some are retried transparently at the
/// transport layer, and some only ever remove a single row.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// The pipeline config document failed to parse or referenced an
    /// unknown field. Aborts the run (exit code 1).
    #[error("config error: {0}")]
    Config(String),

    /// A step required a capability no registered plugin/backend provides.
    /// Aborts the run (exit code 2).
    #[error("missing capability: {0:?}")]
    Capability(crate::plugin::Capability),

    /// Low-level HTTP transport failure (connection refused, timeout, etc.).
    /// Retried with backoff at the transport layer; surfaces only if
    /// retries are exhausted.
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// HTTP error with status code, response body, and optional Retry-After
    /// hint. Returned by [`Backend`](crate::backend::Backend) implementations
    /// for non-success status codes.
    #[error("HTTP {status}: {body}")]
    HttpError {
        status: u16,
        body: String,
        retry_after: Option<Duration>,
    },

    /// JSON parsing failed at the serde level.
    #[error("JSON parsing failed: {0}")]
    Json(#[from] serde_json::Error),

    /// LLM output could not be parsed/validated into the expected shape
    /// after exhausting the bounded structured-retry loop. Drops the row
    /// that produced it; the run continues.
    #[error("content error at row {row_index}, step '{step}': {message}")]
    Content {
        row_index: usize,
        step: String,
        message: String,
    },

    /// A plugin failed to execute (not a content/schema problem). Drops
    /// the row that produced it; the run continues.
    #[error("plugin '{plugin}' failed for row {row_index}: {message}")]
    Plugin {
        plugin: String,
        row_index: usize,
        message: String,
    },

    /// An error severe enough to abort the whole run (out of disk space,
    /// panic in a spawned task, broken invariant).
    #[error("fatal error: {0}")]
    Fatal(String),

    /// The pipeline or a component was cancelled via the cancellation flag.
    #[error("pipeline was cancelled")]
    Cancelled,

    /// Invalid configuration detected at build time (builder misuse, not
    /// a config-document parse failure).
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Catch-all for other errors.
    #[error("{0}")]
    Other(String),
}

impl PipelineError {
    /// The step of the error taxonomy (SPEC_FULL.md §7) this error belongs
    /// to, used to decide whether a failure aborts the run or just drops
    /// a row.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::Config(_) => "config",
            PipelineError::Capability(_) => "capability",
            PipelineError::Request(_) | PipelineError::HttpError { .. } => "transient-io",
            PipelineError::Content { .. } => "content",
            PipelineError::Plugin { .. } => "plugin",
            PipelineError::Fatal(_) => "fatal",
            PipelineError::Cancelled => "cancelled",
            PipelineError::InvalidConfig(_) => "config",
            PipelineError::Json(_) => "content",
            PipelineError::Other(_) => "other",
        }
    }

    /// Whether this error should abort the entire run rather than just
    /// drop the row that produced it.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            PipelineError::Config(_)
                | PipelineError::Capability(_)
                | PipelineError::Fatal(_)
                | PipelineError::InvalidConfig(_)
        )
    }
}

impl From<anyhow::Error> for PipelineError {
    fn from(err: anyhow::Error) -> Self {
        PipelineError::Other(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
