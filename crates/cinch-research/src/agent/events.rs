//! Events and handlers for a research [`Pipeline`](super::pipeline::Pipeline) run.
//!
//! The pipeline reports its progress through [`ResearchEvent`] variants that
//! cover the full lifecycle of a run, from the brief through delegation and
//! context reduction to the final report. Callers implement
//! [`EventHandler`] to observe them for logging, progress display, metrics,
//! or tests.
//!
//! Events from concurrent delegation units interleave; handlers must be
//! `Send + Sync`.
//!
//! # Choosing an event handler
//!
//! | Handler | Use case |
//! |---------|----------|
//! | [`NoopHandler`] | Tests or fire-and-forget runs |
//! | [`LoggingHandler`] | Structured logging via `tracing` |
//! | [`FnEventHandler`] | Quick closures for simple callbacks |
//! | [`CompositeEventHandler`] | Compose multiple handlers in order |
//! | Custom `impl EventHandler` | Full control |

use crate::agent::notes::ResearchNote;
use crate::agent::supervisor::SupervisorStop;
use crate::api::tracing::UsageTotals;
use crate::context::Rung;
use crate::model::CallStage;
use tracing::{debug, info, warn};

// ── Events ─────────────────────────────────────────────────────────

/// Events emitted by the pipeline during a run.
#[derive(Debug)]
pub enum ResearchEvent<'a> {
    /// A run is starting.
    RunStarted { trace_id: &'a str },
    /// The pipeline stopped to ask the user a question.
    ClarificationRequested { question: &'a str },
    /// The research brief was written.
    BriefWritten { brief: &'a str },
    /// The supervisor finished a planning turn.
    PlanningTurn {
        iteration: u32,
        max_iterations: u32,
        delegations: usize,
    },
    /// A delegation unit acquired a concurrency slot and is starting.
    UnitStarted { index: usize, topic: &'a str },
    /// A delegation unit executed a tool.
    UnitToolCall {
        topic: &'a str,
        name: &'a str,
        call_count: u32,
    },
    /// A delegation unit produced its note.
    UnitFinished {
        index: usize,
        note: &'a ResearchNote,
    },
    /// Notes from a delegation round were integrated, in issuance order.
    NotesIntegrated { iteration: u32, total_notes: usize },
    /// The supervisor loop stopped.
    SupervisorFinished {
        iterations: u32,
        stop: &'a SupervisorStop,
    },
    /// A conversation was shrunk before a model call.
    ContextReduced {
        stage: CallStage,
        rung: Rung,
        before_tokens: usize,
        after_tokens: usize,
    },
    /// The model reported an overflow; the call is retried on a harsher rung.
    OverflowRetry {
        stage: CallStage,
        attempt: u32,
        next_rung: Rung,
    },
    /// The final report is retried with fewer notes.
    ReportFallback {
        attempt: u32,
        notes_kept: usize,
        notes_total: usize,
        /// Characters kept of each note's findings, when they are cut.
        findings_cap: Option<usize>,
    },
    /// The final report was written.
    ReportWritten { chars: usize },
    /// Token usage for the whole run, emitted once at the end.
    Usage(&'a UsageTotals),
}

/// Handler for pipeline events.
///
/// The default implementation ignores every event.
///
/// # Example
///
/// ```ignore
/// struct Progress;
///
/// impl EventHandler for Progress {
///     fn on_event(&self, event: &ResearchEvent<'_>) {
///         if let ResearchEvent::UnitStarted { topic, .. } = event {
///             eprintln!("researching: {topic}");
///         }
///     }
/// }
/// ```
pub trait EventHandler: Send + Sync {
    fn on_event(&self, event: &ResearchEvent<'_>) {
        let _ = event;
    }
}

/// An event handler that does nothing.
pub struct NoopHandler;
impl EventHandler for NoopHandler {}

/// An event handler backed by a closure.
///
/// ```ignore
/// let handler = FnEventHandler::new(|event| {
///     if let ResearchEvent::BriefWritten { brief } = event {
///         println!("{brief}");
///     }
/// });
/// ```
pub struct FnEventHandler<F>(F)
where
    F: Fn(&ResearchEvent<'_>) + Send + Sync;

impl<F> FnEventHandler<F>
where
    F: Fn(&ResearchEvent<'_>) + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> EventHandler for FnEventHandler<F>
where
    F: Fn(&ResearchEvent<'_>) + Send + Sync,
{
    fn on_event(&self, event: &ResearchEvent<'_>) {
        (self.0)(event)
    }
}

/// An event handler that delegates to multiple inner handlers, in order.
///
/// ```ignore
/// let handler = CompositeEventHandler::new()
///     .with(LoggingHandler)
///     .with_if(verbose, DebugHandler::new())
///     .with_opt(progress_bar);
/// ```
pub struct CompositeEventHandler {
    handlers: Vec<Box<dyn EventHandler>>,
}

impl CompositeEventHandler {
    pub fn new() -> Self {
        Self {
            handlers: Vec::new(),
        }
    }

    /// Add a handler to the chain. Handlers are called in registration order.
    pub fn with(mut self, handler: impl EventHandler + 'static) -> Self {
        self.handlers.push(Box::new(handler));
        self
    }

    /// Conditionally add a handler to the chain.
    pub fn with_if(self, condition: bool, handler: impl EventHandler + 'static) -> Self {
        if condition { self.with(handler) } else { self }
    }

    /// Add a handler from an `Option`. `None` is a no-op.
    pub fn with_opt(self, handler: Option<impl EventHandler + 'static>) -> Self {
        match handler {
            Some(h) => self.with(h),
            None => self,
        }
    }
}

impl Default for CompositeEventHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl EventHandler for CompositeEventHandler {
    fn on_event(&self, event: &ResearchEvent<'_>) {
        for handler in &self.handlers {
            handler.on_event(event);
        }
    }
}

/// An event handler that logs events via `tracing`.
pub struct LoggingHandler;

impl EventHandler for LoggingHandler {
    fn on_event(&self, event: &ResearchEvent<'_>) {
        match event {
            ResearchEvent::RunStarted { trace_id } => {
                info!("Research run {trace_id} started");
            }
            ResearchEvent::ClarificationRequested { question } => {
                info!("Clarification requested: {question}");
            }
            ResearchEvent::BriefWritten { brief } => {
                let preview: String = brief.chars().take(200).collect();
                info!(
                    "Research brief: {preview}{}",
                    if brief.chars().count() > 200 { "..." } else { "" }
                );
            }
            ResearchEvent::PlanningTurn {
                iteration,
                max_iterations,
                delegations,
            } => {
                info!("[supervisor {iteration}/{max_iterations}] {delegations} delegation(s)");
            }
            ResearchEvent::UnitStarted { index, topic } => {
                info!("Unit #{index} started: {topic}");
            }
            ResearchEvent::UnitToolCall {
                topic,
                name,
                call_count,
            } => {
                debug!("Unit '{topic}' tool call #{call_count}: {name}");
            }
            ResearchEvent::UnitFinished { index, note } => {
                if note.is_failure() {
                    warn!("Unit #{index} failed: {}", note.summary());
                } else {
                    info!(
                        "Unit #{index} finished: {} ({} chars)",
                        note.topic,
                        note.summary().len()
                    );
                }
            }
            ResearchEvent::NotesIntegrated {
                iteration,
                total_notes,
            } => {
                debug!("Iteration {iteration}: {total_notes} note(s) accumulated");
            }
            ResearchEvent::SupervisorFinished { iterations, stop } => {
                info!("Supervisor finished after {iterations} iteration(s): {stop}");
            }
            ResearchEvent::ContextReduced {
                stage,
                rung,
                before_tokens,
                after_tokens,
            } => {
                info!("[{stage}] context reduced ({rung}): ~{before_tokens} -> ~{after_tokens} tokens");
            }
            ResearchEvent::OverflowRetry {
                stage,
                attempt,
                next_rung,
            } => {
                warn!("[{stage}] context overflow on attempt {attempt}, retrying at rung {next_rung}");
            }
            ResearchEvent::ReportFallback {
                attempt,
                notes_kept,
                notes_total,
                findings_cap,
            } => match findings_cap {
                Some(cap) => warn!(
                    "Report attempt {attempt}: retrying with {notes_kept}/{notes_total} note(s) cut to {cap} chars"
                ),
                None => warn!(
                    "Report attempt {attempt}: retrying with {notes_kept}/{notes_total} note(s)"
                ),
            },
            ResearchEvent::ReportWritten { chars } => {
                info!("Final report written ({chars} chars)");
            }
            ResearchEvent::Usage(totals) => {
                info!("Usage: {}", totals.summary());
            }
        }
    }
}
