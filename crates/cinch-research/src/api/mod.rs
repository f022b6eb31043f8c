//! Support for talking to model providers: retry, overflow detection,
//! context-window limits, and run tracing.
//!
//! - [`retry`] — transient error detection with exponential backoff, plus
//!   recognition of context-window overflow errors.
//! - [`limits`] — known context windows per model, used to size the
//!   [`ContextBudget`](crate::context::ContextBudget) when none is configured.
//! - [`tracing`] — trace ids for runs and delegation units, and a shared
//!   [`UsageTracker`] that totals token spend across concurrent researchers.

pub mod limits;
pub mod retry;
pub mod tracing;

pub use limits::{DEFAULT_CONTEXT_WINDOW, model_token_limit};
pub use retry::RetryConfig;
pub use tracing::{UsageTracker, generate_span_id, generate_trace_id, pricing_for_model};
