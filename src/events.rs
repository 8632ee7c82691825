//! Observability bus for run/step/plugin/LLM lifecycle events.
//!
//! Synchronous pub/sub: emitting an event calls every registered handler
//! on the caller's task before returning. A handler must never panic --
//! [`emit`] catches unwinding panics at the boundary and logs them via
//! `tracing` rather than letting them propagate into engine code.

use std::sync::Arc;

/// Events emitted during a pipeline run.
#[derive(Debug, Clone)]
pub enum Event {
    /// The run has started. `rows` is the initial row count.
    RunStart { rows: usize },
    /// The run has finished. `rows_remaining` survived to the end.
    RunEnd { rows_remaining: usize, errors: usize },
    /// A step has started processing its row population.
    StepStart { step: String, rows: usize },
    /// A step has finished. `rows_out` may differ from input via
    /// explode/drop.
    StepEnd { step: String, rows_out: usize },
    /// A row was dropped (plugin returned zero packets, or an
    /// unrecoverable content error).
    RowDrop {
        row_index: usize,
        step: String,
        reason: String,
    },
    /// A plugin started executing for a row.
    PluginStart {
        plugin: String,
        row_index: usize,
    },
    /// A plugin finished executing for a row.
    PluginEnd {
        plugin: String,
        row_index: usize,
        packets: usize,
    },
    /// A plugin raised an error for a row.
    PluginError {
        plugin: String,
        row_index: usize,
        message: String,
    },
    /// An LLM request is about to be sent.
    LlmRequest {
        row_index: usize,
        step: String,
        model: String,
        candidate_index: usize,
    },
    /// An LLM response was received.
    LlmResponse {
        row_index: usize,
        step: String,
        candidate_index: usize,
        ok: bool,
    },
    /// A single candidate's final (post schema-retry) output was produced.
    CandidateProduced {
        row_index: usize,
        step: String,
        candidate_index: usize,
    },
    /// The judge selected a candidate.
    JudgeChose {
        row_index: usize,
        step: String,
        chosen_index: usize,
    },
    /// An artifact (file, generated image, shell output) was produced.
    Artifact {
        filename: String,
        content: ArtifactContent,
    },
    /// A semantic retry attempt is starting (kept from the LLM-call
    /// retry loop, used by the schema-echo retry in the Step Executor).
    RetryStart {
        name: String,
        attempt: u32,
        reason: String,
    },
    /// A semantic retry sequence has completed.
    RetryEnd {
        name: String,
        attempts: u32,
        success: bool,
    },
    /// A transport-level retry due to HTTP error.
    TransportRetry {
        name: String,
        attempt: u32,
        delay_ms: u64,
        reason: String,
    },
    /// An error was recorded against a row/step (see
    /// [`PipelineError::kind`](crate::error::PipelineError::kind)).
    Error {
        row_index: Option<usize>,
        step: Option<String>,
        kind: &'static str,
        message: String,
    },
}

/// Payload carried by [`Event::Artifact`].
#[derive(Debug, Clone)]
pub enum ArtifactContent {
    Text(String),
    Bytes(Vec<u8>),
}

/// Handler for pipeline lifecycle events.
///
/// This is entirely optional -- the engine runs without any handler
/// registered. Implementations must not panic; the bus will catch a
/// panicking handler but that handler's future events will still be
/// delivered (the bus does not unregister it).
///
/// # Example
///
/// ```
/// use rowforge::events::{Event, EventHandler};
///
/// struct PrintHandler;
///
/// impl EventHandler for PrintHandler {
///     fn on_event(&self, event: Event) {
///         if let Event::RowDrop { row_index, reason, .. } = event {
///             eprintln!("dropped row {row_index}: {reason}");
///         }
///     }
/// }
/// ```
pub trait EventHandler: Send + Sync {
    fn on_event(&self, event: Event);
}

/// Fan an event out to every registered handler.
///
/// Handlers that panic are caught and logged; they do not propagate.
pub fn emit(handlers: &[Arc<dyn EventHandler>], event: Event) {
    for handler in handlers {
        let handler = Arc::clone(handler);
        let event = event.clone();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            handler.on_event(event);
        }));
        if let Err(panic) = result {
            let msg = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            tracing::error!(%msg, "event handler panicked");
        }
    }
}

/// An [`EventHandler`] backed by a closure.
pub struct FnEventHandler<F: Fn(Event) + Send + Sync>(pub F);

impl<F: Fn(Event) + Send + Sync> EventHandler for FnEventHandler<F> {
    fn on_event(&self, event: Event) {
        (self.0)(event);
    }
}

/// Bundles the registered handlers so callers pass one value around
/// instead of a bare `Vec`.
#[derive(Clone, Default)]
pub struct EventBus {
    handlers: Vec<Arc<dyn EventHandler>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, handler: Arc<dyn EventHandler>) {
        self.handlers.push(handler);
    }

    pub fn emit(&self, event: Event) {
        emit(&self.handlers, event);
    }
}
