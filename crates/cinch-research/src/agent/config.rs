//! Configuration for a research [`Pipeline`](super::pipeline::Pipeline) run.
//!
//! Every field has a default, so a config file only names what it changes.
//!
//! # Examples
//!
//! Defaults:
//!
//! ```ignore
//! let config = ResearchConfig::default();
//! ```
//!
//! Builder methods for common settings:
//!
//! ```ignore
//! let config = ResearchConfig::default()
//!     .with_allow_clarification(false)
//!     .with_max_concurrent_research_units(3)
//!     .with_max_supervisor_iterations(4)
//!     .with_research_model("anthropic/claude-sonnet-4");
//! ```
//!
//! From JSON:
//!
//! ```ignore
//! let config: ResearchConfig = serde_json::from_str(r#"{"max_tool_calls_per_unit": 5}"#)?;
//! ```

use crate::DEFAULT_MODEL;
use crate::api::limits::{DEFAULT_CONTEXT_WINDOW, model_token_limit};
use crate::api::retry::RetryConfig;
use crate::context::ContextBudget;
use serde::Deserialize;
use std::time::Duration;

/// Tunables for one research run.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ResearchConfig {
    /// Whether the pipeline may stop to ask the user a clarifying question.
    pub allow_clarification: bool,
    /// Maximum delegation units running at the same time.
    pub max_concurrent_research_units: usize,
    /// Maximum supervisor planning turns.
    pub max_supervisor_iterations: u32,
    /// Maximum tool calls a single delegation unit may execute.
    pub max_tool_calls_per_unit: u32,

    /// Context budget in tokens. `None` uses the model's known window.
    pub context_budget_tokens: Option<usize>,
    /// Trailing messages the reduction ladder always preserves.
    pub keep_recent_messages: usize,
    /// Character cap for tool results on the truncation rung.
    pub tool_result_char_cap: usize,
    /// Extra attempts after a model-reported context overflow.
    pub max_overflow_retries: u32,
    /// Extra attempts for malformed structured output (clarification, brief).
    pub max_structured_output_retries: u32,
    /// Reduced note subsets tried after the first report attempt overflows.
    pub report_fallback_attempts: u32,

    pub research_model: String,
    pub research_model_max_tokens: u32,
    pub compression_model: String,
    pub compression_model_max_tokens: u32,
    pub final_report_model: String,
    pub final_report_model_max_tokens: u32,

    /// Per model call timeout, in seconds.
    pub model_timeout_secs: u64,
    /// Per tool call timeout, in seconds.
    pub tool_timeout_secs: u64,
    /// Retries for transient model errors (rate limits, 5xx).
    pub model_retries: u32,
}

impl Default for ResearchConfig {
    fn default() -> Self {
        Self {
            allow_clarification: true,
            max_concurrent_research_units: 5,
            max_supervisor_iterations: 6,
            max_tool_calls_per_unit: 10,
            context_budget_tokens: None,
            keep_recent_messages: 6,
            tool_result_char_cap: 4_000,
            max_overflow_retries: 3,
            max_structured_output_retries: 1,
            report_fallback_attempts: 3,
            research_model: DEFAULT_MODEL.into(),
            research_model_max_tokens: 10_000,
            compression_model: DEFAULT_MODEL.into(),
            compression_model_max_tokens: 8_192,
            final_report_model: DEFAULT_MODEL.into(),
            final_report_model_max_tokens: 10_000,
            model_timeout_secs: 300,
            tool_timeout_secs: 60,
            model_retries: 2,
        }
    }
}

impl ResearchConfig {
    pub fn with_allow_clarification(mut self, allow: bool) -> Self {
        self.allow_clarification = allow;
        self
    }

    pub fn with_max_concurrent_research_units(mut self, n: usize) -> Self {
        self.max_concurrent_research_units = n;
        self
    }

    pub fn with_max_supervisor_iterations(mut self, n: u32) -> Self {
        self.max_supervisor_iterations = n;
        self
    }

    pub fn with_max_tool_calls_per_unit(mut self, n: u32) -> Self {
        self.max_tool_calls_per_unit = n;
        self
    }

    pub fn with_context_budget_tokens(mut self, tokens: usize) -> Self {
        self.context_budget_tokens = Some(tokens);
        self
    }

    pub fn with_keep_recent_messages(mut self, n: usize) -> Self {
        self.keep_recent_messages = n;
        self
    }

    pub fn with_tool_result_char_cap(mut self, cap: usize) -> Self {
        self.tool_result_char_cap = cap;
        self
    }

    pub fn with_max_overflow_retries(mut self, n: u32) -> Self {
        self.max_overflow_retries = n;
        self
    }

    pub fn with_report_fallback_attempts(mut self, n: u32) -> Self {
        self.report_fallback_attempts = n;
        self
    }

    /// Use one model for every stage.
    pub fn with_model(self, model: impl Into<String>) -> Self {
        let model = model.into();
        Self {
            research_model: model.clone(),
            compression_model: model.clone(),
            final_report_model: model,
            ..self
        }
    }

    pub fn with_research_model(mut self, model: impl Into<String>) -> Self {
        self.research_model = model.into();
        self
    }

    pub fn with_compression_model(mut self, model: impl Into<String>) -> Self {
        self.compression_model = model.into();
        self
    }

    pub fn with_final_report_model(mut self, model: impl Into<String>) -> Self {
        self.final_report_model = model.into();
        self
    }

    pub fn with_model_timeout(mut self, timeout: Duration) -> Self {
        self.model_timeout_secs = timeout.as_secs().max(1);
        self
    }

    pub fn with_tool_timeout(mut self, timeout: Duration) -> Self {
        self.tool_timeout_secs = timeout.as_secs().max(1);
        self
    }

    pub fn with_model_retries(mut self, retries: u32) -> Self {
        self.model_retries = retries;
        self
    }

    pub fn model_timeout(&self) -> Duration {
        Duration::from_secs(self.model_timeout_secs)
    }

    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_secs)
    }

    pub fn retry(&self) -> RetryConfig {
        RetryConfig::with_retries(self.model_retries)
    }

    /// The context budget for calls to `model`, reserving `output_reserve`
    /// tokens for the response. The reserve never takes more than half the window.
    pub fn context_budget(&self, model: &str, output_reserve: u32) -> ContextBudget {
        let window = self
            .context_budget_tokens
            .or_else(|| model_token_limit(model))
            .unwrap_or(DEFAULT_CONTEXT_WINDOW);
        ContextBudget::new(window)
            .with_output_reserve((output_reserve as usize).min(window / 2))
            .with_keep_recent(self.keep_recent_messages)
            .with_tool_result_char_cap(self.tool_result_char_cap)
    }
}
