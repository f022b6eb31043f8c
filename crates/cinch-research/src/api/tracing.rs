//! Run correlation ids and token usage accounting.

use crate::UsageInfo;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

/// Generate a unique trace ID for a research run.
pub fn generate_trace_id() -> String {
    let ts = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let count = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("tr-{ts:x}-{count:04x}")
}

/// Span id for one delegation unit inside a run.
pub fn generate_span_id(trace_id: &str, iteration: u32, unit: usize) -> String {
    format!("{trace_id}:i{iteration}:u{unit}")
}

/// Per-model pricing (USD per 1M tokens).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelPricing {
    pub input_per_million: f64,
    pub output_per_million: f64,
}

impl ModelPricing {
    pub fn estimate_cost(&self, prompt_tokens: u32, completion_tokens: u32) -> f64 {
        (prompt_tokens as f64 / 1_000_000.0) * self.input_per_million
            + (completion_tokens as f64 / 1_000_000.0) * self.output_per_million
    }
}

/// Approximate pricing by model name. Only used to flag runaway spend.
pub fn pricing_for_model(model: &str) -> ModelPricing {
    let name = model.rsplit(['/', ':']).next().unwrap_or(model).to_lowercase();
    let (input, output) = if name.contains("opus") {
        (15.0, 75.0)
    } else if name.contains("sonnet") {
        (3.0, 15.0)
    } else if name.contains("haiku") {
        (0.25, 1.25)
    } else if name.contains("gpt-4.1-mini") {
        (0.40, 1.60)
    } else if name.contains("gpt-4.1") {
        (2.0, 8.0)
    } else if name.contains("gpt-5") {
        (1.25, 10.0)
    } else if name.contains("gpt-4") {
        (2.50, 10.0)
    } else {
        (3.0, 15.0)
    };
    ModelPricing {
        input_per_million: input,
        output_per_million: output,
    }
}

/// Totals accumulated by a [`UsageTracker`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UsageTotals {
    pub model_calls: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub estimated_cost_usd: f64,
}

impl UsageTotals {
    pub fn total_tokens(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }

    /// Format as a short summary string.
    pub fn summary(&self) -> String {
        format!(
            "{} model call(s), tokens: {} prompt + {} completion = {} total, est. cost: ${:.4}",
            self.model_calls,
            self.prompt_tokens,
            self.completion_tokens,
            self.total_tokens(),
            self.estimated_cost_usd,
        )
    }
}

/// Token usage shared by every stage of a run, including concurrent researchers.
#[derive(Debug, Default)]
pub struct UsageTracker {
    totals: Mutex<UsageTotals>,
}

impl UsageTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one model call. Calls without usage data still count.
    pub fn record(&self, model: &str, usage: Option<&UsageInfo>) {
        let prompt = usage.and_then(|u| u.prompt_tokens).unwrap_or(0);
        let completion = usage.and_then(|u| u.completion_tokens).unwrap_or(0);
        let cost = pricing_for_model(model).estimate_cost(prompt, completion);
        if let Ok(mut totals) = self.totals.lock() {
            totals.model_calls += 1;
            totals.prompt_tokens += prompt as u64;
            totals.completion_tokens += completion as u64;
            totals.estimated_cost_usd += cost;
        }
    }

    pub fn snapshot(&self) -> UsageTotals {
        self.totals
            .lock()
            .map(|t| t.clone())
            .unwrap_or_default()
    }
}
