//! Context budget: how many tokens a model call may carry.
//!
//! Token counts are estimated from character counts. The estimate is
//! deliberately simple; the reduction ladder in [`super::eviction`] and the
//! overflow retry in [`crate::agent::execution`] absorb its error.

use crate::Message;
use crate::api::limits::{DEFAULT_CONTEXT_WINDOW, model_token_limit};

/// Default characters per token (conservative estimate for English text).
pub const DEFAULT_CHARS_PER_TOKEN: f64 = 3.5;

/// Default number of trailing messages never touched by the reduction ladder.
pub const DEFAULT_KEEP_RECENT: usize = 6;

/// Default cap, in characters, for tool results on the truncation rung.
pub const DEFAULT_TOOL_RESULT_CHAR_CAP: usize = 4_000;

/// Token budget for one model invocation plus the knobs of the reduction ladder.
///
/// ```ignore
/// let budget = ContextBudget::for_model("openai/gpt-4.1")
///     .with_output_reserve(10_000)
///     .with_keep_recent(4);
///
/// let usage = budget.estimate_usage(&messages);
/// println!("{}", usage.to_log_string());
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct ContextBudget {
    max_tokens: usize,
    output_reserve: usize,
    chars_per_token: f64,
    keep_recent: usize,
    tool_result_char_cap: usize,
}

impl ContextBudget {
    /// A budget for a context window of `max_tokens`.
    pub fn new(max_tokens: usize) -> Self {
        Self {
            max_tokens,
            output_reserve: 0,
            chars_per_token: DEFAULT_CHARS_PER_TOKEN,
            keep_recent: DEFAULT_KEEP_RECENT,
            tool_result_char_cap: DEFAULT_TOOL_RESULT_CHAR_CAP,
        }
    }

    /// A budget sized from the model's known context window.
    pub fn for_model(model: &str) -> Self {
        Self::new(model_token_limit(model).unwrap_or(DEFAULT_CONTEXT_WINDOW))
    }

    /// Tokens reserved for the model's response.
    pub fn with_output_reserve(mut self, tokens: usize) -> Self {
        self.output_reserve = tokens;
        self
    }

    pub fn with_chars_per_token(mut self, cpt: f64) -> Self {
        self.chars_per_token = cpt.max(0.1);
        self
    }

    /// Number of trailing messages the ladder always preserves.
    pub fn with_keep_recent(mut self, n: usize) -> Self {
        self.keep_recent = n;
        self
    }

    /// Character cap applied to tool results on the truncation rung.
    pub fn with_tool_result_char_cap(mut self, cap: usize) -> Self {
        self.tool_result_char_cap = cap;
        self
    }

    pub fn max_tokens(&self) -> usize {
        self.max_tokens
    }

    /// Context window minus the output reserve. Every comparison uses this.
    pub fn effective_max_tokens(&self) -> usize {
        self.max_tokens.saturating_sub(self.output_reserve)
    }

    pub fn keep_recent(&self) -> usize {
        self.keep_recent
    }

    pub fn tool_result_char_cap(&self) -> usize {
        self.tool_result_char_cap
    }

    /// Estimated tokens for a conversation, counting text and tool-call payloads.
    pub fn estimate_tokens(&self, messages: &[Message]) -> usize {
        let chars: usize = messages.iter().map(message_chars).sum();
        (chars as f64 / self.chars_per_token).ceil() as usize
    }

    pub fn fits(&self, messages: &[Message]) -> bool {
        self.estimate_tokens(messages) <= self.effective_max_tokens()
    }

    pub fn estimate_usage(&self, messages: &[Message]) -> ContextUsage {
        let estimated_tokens = self.estimate_tokens(messages);
        let max_tokens = self.effective_max_tokens();
        ContextUsage {
            estimated_tokens,
            max_tokens,
            usage_pct: if max_tokens == 0 {
                1.0
            } else {
                estimated_tokens as f64 / max_tokens as f64
            },
        }
    }
}

fn message_chars(message: &Message) -> usize {
    let content = message.content.as_ref().map_or(0, |c| c.len());
    let calls: usize = message
        .tool_calls
        .iter()
        .flatten()
        .map(|c| c.function.name.len() + c.function.arguments.len())
        .sum();
    content + calls
}

/// Snapshot of estimated context usage.
#[derive(Debug, Clone, PartialEq)]
pub struct ContextUsage {
    pub estimated_tokens: usize,
    pub max_tokens: usize,
    pub usage_pct: f64,
}

impl ContextUsage {
    pub fn to_log_string(&self) -> String {
        format!(
            "context: ~{}/{} tokens ({:.0}%)",
            self.estimated_tokens,
            self.max_tokens,
            self.usage_pct * 100.0
        )
    }
}
