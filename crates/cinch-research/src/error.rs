//! Error types for every stage boundary.
//!
//! Low-level HTTP helpers report `String` errors; they are classified into
//! these enums at the capability boundary so stage logic can match on the
//! failure kind instead of parsing messages.

use crate::agent::notes::ResearchNote;
use crate::api::retry;
use std::time::Duration;
use thiserror::Error;

/// Failure of a single model invocation.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ModelError {
    /// The input exceeded the model's context window.
    #[error("context window exceeded: {0}")]
    ContextOverflow(String),
    /// The call did not finish within its per-call timeout.
    #[error("model call timed out after {0:?}")]
    Timeout(Duration),
    /// Rate limits, 5xx responses, dropped connections.
    #[error("transient model error: {0}")]
    Transient(String),
    /// The capability is unreachable or rejected the request permanently.
    #[error("model unavailable: {0}")]
    Unavailable(String),
    /// The model answered, but not in the shape that was asked for.
    #[error("malformed model response: {0}")]
    Malformed(String),
}

impl ModelError {
    /// Classify a raw API error string.
    pub fn from_api_error(error: impl Into<String>) -> Self {
        let error = error.into();
        if retry::is_malformed_response(&error) {
            Self::Malformed(error)
        } else if retry::is_context_overflow(&error) {
            Self::ContextOverflow(error)
        } else if retry::is_transient_error(&error) && !retry::is_permanent_error(&error) {
            Self::Transient(error)
        } else {
            Self::Unavailable(error)
        }
    }

    pub fn is_overflow(&self) -> bool {
        matches!(self, Self::ContextOverflow(_))
    }
}

/// Failure of a single tool invocation.
///
/// `Failed` is ordinary data: the message is handed back to the model as an
/// observation. `Unavailable` means the capability itself is down and aborts
/// the researcher that hit it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ToolError {
    #[error("{0}")]
    Failed(String),
    #[error("tool capability unavailable: {0}")]
    Unavailable(String),
}

/// The reduction ladder ran out of rungs and the conversation still does not fit.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error(
    "context overflow: ~{estimated_tokens} tokens exceeds the budget of {budget_tokens} after all reductions"
)]
pub struct ContextOverflowError {
    pub estimated_tokens: usize,
    pub budget_tokens: usize,
}

/// The session was cancelled while a stage was suspended.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("research session cancelled")]
pub struct Cancelled;

/// Which model call of the brief stage failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BriefStep {
    Clarification,
    Brief,
}

impl std::fmt::Display for BriefStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BriefStep::Clarification => write!(f, "clarification"),
            BriefStep::Brief => write!(f, "research brief"),
        }
    }
}

/// The clarification & brief stage could not produce a brief.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum BriefGenerationError {
    #[error("model unavailable during {step}: {source}")]
    Model {
        step: BriefStep,
        #[source]
        source: ModelError,
    },
    #[error("malformed {step} output after {attempts} attempt(s): {reason}")]
    Malformed {
        step: BriefStep,
        attempts: u32,
        reason: String,
    },
}

/// The final report could not be generated, even from reduced note subsets.
///
/// Carries the brief and every accumulated note so the caller can still
/// present a degraded report.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("report generation failed after {attempts} attempt(s): {reason}")]
pub struct ReportGenerationError {
    pub brief: String,
    pub notes: Vec<ResearchNote>,
    pub attempts: u32,
    pub reason: String,
}

impl ReportGenerationError {
    /// Render the brief and raw findings as a plain fallback report.
    pub fn degraded_report(&self) -> String {
        let mut out = format!(
            "# Research findings (degraded)\n\n_The final report could not be synthesized: {}._\n\n## Brief\n\n{}\n",
            self.reason, self.brief
        );
        for note in &self.notes {
            if let Some(findings) = note.findings() {
                out.push_str(&format!("\n## {}\n\n{}\n", note.topic, findings));
            }
        }
        out
    }
}

/// Top-level pipeline failure.
#[derive(Debug, Error)]
pub enum ResearchError {
    #[error(transparent)]
    Brief(#[from] BriefGenerationError),
    #[error(transparent)]
    Report(#[from] ReportGenerationError),
    #[error(transparent)]
    Cancelled(#[from] Cancelled),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::notes::UnitOutcome;

    #[test]
    fn classifies_overflow_before_transient() {
        let e = ModelError::from_api_error(
            "OpenRouter API HTTP 400: This model's maximum context length is 128000 tokens",
        );
        assert!(e.is_overflow());
    }

    #[test]
    fn classifies_rate_limit_as_transient() {
        let e = ModelError::from_api_error("OpenRouter API HTTP 429: rate limited");
        assert!(matches!(e, ModelError::Transient(_)));
    }

    #[test]
    fn classifies_auth_as_unavailable() {
        let e = ModelError::from_api_error("OpenRouter API HTTP 401: unauthorized");
        assert!(matches!(e, ModelError::Unavailable(_)));
    }

    #[test]
    fn classifies_5xx_with_invalid_wording_as_transient() {
        let e = ModelError::from_api_error(
            "OpenRouter API HTTP 503 Service Unavailable: invalid upstream response",
        );
        assert!(matches!(e, ModelError::Transient(_)));
    }

    #[test]
    fn classifies_undecodable_body_as_malformed() {
        let e = ModelError::from_api_error(format!(
            "{}: expected value at line 1 column 1",
            retry::MALFORMED_RESPONSE
        ));
        assert!(matches!(e, ModelError::Malformed(_)));
    }

    #[test]
    fn degraded_report_skips_failed_notes() {
        let err = ReportGenerationError {
            brief: "Compare revenue".into(),
            notes: vec![
                ResearchNote::new("2023 revenue", UnitOutcome::findings("$10B", 2, false)),
                ResearchNote::new("2024 revenue", UnitOutcome::failed("search down")),
            ],
            attempts: 3,
            reason: "context window exceeded".into(),
        };
        let text = err.degraded_report();
        assert!(text.contains("Compare revenue"));
        assert!(text.contains("$10B"));
        assert!(!text.contains("search down"));
    }
}
