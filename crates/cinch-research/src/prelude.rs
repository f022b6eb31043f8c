//! Convenience re-exports for common `cinch-research` types.
//!
//! ```ignore
//! use cinch_research::prelude::*;
//! ```
//!
//! Covers what most programs need to run the pipeline: the client, message
//! constructors, the [`Pipeline`] and its config, tools, and event handlers.
//! Stage internals (reduction ladder, execution helpers) are left to their
//! modules.

// ── Core types ──────────────────────────────────────────────────────
pub use crate::{ChatCompletion, Message, OpenRouterClient, ToolCall, ToolDef, json_schema_for};

// ── Pipeline ────────────────────────────────────────────────────────
pub use crate::agent::{
    CompositeEventHandler, EventHandler, FnEventHandler, JsonlKnowledgeStore, KnowledgeStore,
    LoggingHandler, NoopHandler, Pipeline, ResearchConfig, ResearchEvent, ResearchNote,
    ResearchOutcome, ResearchReport, SupervisorStop,
};
pub use crate::error::{ReportGenerationError, ResearchError};

// ── Model ───────────────────────────────────────────────────────────
pub use crate::model::{CallStage, CompletionRequest, FnModel, ModelClient, ModelError};

// ── Context management ──────────────────────────────────────────────
pub use crate::context::ContextBudget;

// ── Tools ───────────────────────────────────────────────────────────
pub use crate::tools::{
    FetchUrl, FnTool, RemoteLookup, RemoteToolConfig, ThinkTool, Tool, ToolError, ToolFuture,
    ToolSet, WebSearch, parse_tool_args,
};
