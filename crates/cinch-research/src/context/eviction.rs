//! The reduction ladder: shrink a conversation until it fits a [`ContextBudget`].
//!
//! Rungs are applied in order, each only if the previous one was not enough:
//!
//! 1. [`Rung::Intact`]: send the conversation as is.
//! 2. [`Rung::DropStale`]: replace stale tool results (oldest first) with a
//!    one-line `[Cleared: ...]` placeholder.
//! 3. [`Rung::Truncate`]: cut every remaining tool result to
//!    [`ContextBudget::tool_result_char_cap`] characters.
//!
//! Essential messages are never touched by the drop rung: everything up to
//! and including the first user message (system prompt plus original task)
//! and the last [`ContextBudget::keep_recent`] messages.
//!
//! A `floor` lets the caller start further down the ladder. That is how a
//! provider-reported overflow escalates even when the local estimate said the
//! conversation fit. Reduction is deterministic and [`fit`] is idempotent.

use crate::context::ContextBudget;
use crate::error::ContextOverflowError;
use crate::{Message, MessageRole};
use std::collections::HashMap;
use tracing::debug;

/// Prefix of dropped tool result placeholders.
///
/// Both the placeholder writer and the "already dropped?" check use this
/// constant so they can't drift out of sync.
pub const EVICTED_PREFIX: &str = "[Cleared:";

/// Suffix appended to tool results cut by the truncation rung.
pub const TRUNCATION_MARKER: &str = "\n[... truncated to fit the context window]";

/// A step of the reduction ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Rung {
    Intact,
    DropStale,
    Truncate,
}

impl Rung {
    /// The next, more aggressive rung, if any.
    pub fn next(self) -> Option<Rung> {
        match self {
            Rung::Intact => Some(Rung::DropStale),
            Rung::DropStale => Some(Rung::Truncate),
            Rung::Truncate => None,
        }
    }
}

impl std::fmt::Display for Rung {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Rung::Intact => write!(f, "intact"),
            Rung::DropStale => write!(f, "drop-stale"),
            Rung::Truncate => write!(f, "truncate"),
        }
    }
}

/// Result of a successful reduction.
#[derive(Debug, Clone, PartialEq)]
pub struct Reduced {
    pub messages: Vec<Message>,
    /// The last rung that was applied.
    pub rung: Rung,
    pub estimated_tokens: usize,
}

/// Fit a conversation into the budget, starting at the first rung.
pub fn fit(messages: &[Message], budget: &ContextBudget) -> Result<Vec<Message>, ContextOverflowError> {
    reduce(messages, budget, Rung::Intact).map(|r| r.messages)
}

/// Fit a conversation into the budget, applying at least the rungs up to `floor`.
///
/// With `floor == Rung::Intact` the drop rung stops as soon as the
/// conversation fits. With a higher floor every stale tool result is dropped,
/// and with `Rung::Truncate` every tool result is also cut to the cap.
pub fn reduce(
    messages: &[Message],
    budget: &ContextBudget,
    floor: Rung,
) -> Result<Reduced, ContextOverflowError> {
    let mut out = messages.to_vec();

    if floor == Rung::Intact && budget.fits(&out) {
        return Ok(finish(out, Rung::Intact, budget));
    }

    let labels = call_labels(&out);
    let stale = droppable_indices(&out, budget.keep_recent());
    let mut dropped = 0usize;
    for idx in stale {
        if floor == Rung::Intact && budget.fits(&out) {
            break;
        }
        if drop_result(&mut out[idx], &labels) {
            dropped += 1;
        }
    }
    if dropped > 0 {
        debug!("Reduction: dropped {dropped} stale tool result(s)");
    }

    if floor < Rung::Truncate && budget.fits(&out) {
        return Ok(finish(out, Rung::DropStale, budget));
    }

    let cap = budget.tool_result_char_cap();
    let mut truncated = 0;
    for m in out.iter_mut().filter(|m| m.is_tool_result()) {
        if truncate_result(m, cap) {
            truncated += 1;
        }
    }
    if truncated > 0 {
        debug!("Reduction: truncated {truncated} tool result(s) to {cap} chars");
    }

    if budget.fits(&out) {
        Ok(finish(out, Rung::Truncate, budget))
    } else {
        Err(ContextOverflowError {
            estimated_tokens: budget.estimate_tokens(&out),
            budget_tokens: budget.effective_max_tokens(),
        })
    }
}

fn finish(messages: Vec<Message>, rung: Rung, budget: &ContextBudget) -> Reduced {
    let estimated_tokens = budget.estimate_tokens(&messages);
    Reduced {
        messages,
        rung,
        estimated_tokens,
    }
}

/// Tool-result indices outside the essential prefix and the recent tail, oldest first.
fn droppable_indices(messages: &[Message], keep_recent: usize) -> Vec<usize> {
    let prefix_end = messages
        .iter()
        .position(|m| m.role == MessageRole::User)
        .map_or(0, |i| i + 1);
    let tail_start = messages.len().saturating_sub(keep_recent);
    (prefix_end..tail_start)
        .filter(|&i| messages[i].is_tool_result())
        .collect()
}

/// Map tool call ids to a `name(args)` label taken from the assistant turn that issued them.
fn call_labels(messages: &[Message]) -> HashMap<String, String> {
    messages
        .iter()
        .filter_map(|m| m.tool_calls.as_ref())
        .flatten()
        .map(|c| {
            (
                c.id.clone(),
                format!("{}({})", c.name(), summarize_args(c.arguments(), 60)),
            )
        })
        .collect()
}

fn drop_result(message: &mut Message, labels: &HashMap<String, String>) -> bool {
    let Some(content) = message.content.as_deref() else {
        return false;
    };
    if content.starts_with(EVICTED_PREFIX) {
        return false;
    }
    let label = message
        .tool_call_id
        .as_ref()
        .and_then(|id| labels.get(id))
        .map_or("tool result", String::as_str);
    let placeholder = format!("{EVICTED_PREFIX} {label}, {} chars]", content.len());
    if placeholder.len() >= content.len() {
        return false;
    }
    message.content = Some(placeholder);
    true
}

/// Cut a tool result to `cap` characters. Placeholders, and results that
/// would not get shorter once the marker is appended, are left alone.
fn truncate_result(message: &mut Message, cap: usize) -> bool {
    let Some(content) = message.content.as_deref() else {
        return false;
    };
    let limit = cap + TRUNCATION_MARKER.chars().count();
    if content.starts_with(EVICTED_PREFIX) || content.chars().count() <= limit {
        return false;
    }
    let mut cut: String = content.chars().take(cap).collect();
    cut.push_str(TRUNCATION_MARKER);
    message.content = Some(cut);
    true
}

/// Short `key="value"` summary of JSON tool arguments for placeholders.
pub fn summarize_args(arguments: &str, max_chars: usize) -> String {
    let summary = match serde_json::from_str::<serde_json::Value>(arguments) {
        Ok(serde_json::Value::Object(obj)) => obj
            .iter()
            .take(3)
            .map(|(k, v)| format!("{k}={}", clip(&v.to_string(), 40)))
            .collect::<Vec<_>>()
            .join(", "),
        _ => arguments.to_string(),
    };
    clip(&summary, max_chars)
}

fn clip(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max_chars.saturating_sub(3)).collect();
    out.push_str("...");
    out
}
