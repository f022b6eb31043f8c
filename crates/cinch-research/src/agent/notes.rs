//! Research notes: what a delegation unit hands back to the supervisor.

use std::fmt;

/// How a delegation unit ended.
#[derive(Debug, Clone, PartialEq)]
pub enum UnitOutcome {
    /// Compressed findings from the unit's transcript.
    Findings {
        text: String,
        /// Tool calls actually executed.
        tool_calls: u32,
        /// Whether the unit stopped because it hit its tool-call ceiling.
        ceiling_reached: bool,
    },
    /// The unit could not produce findings.
    Failed { reason: String },
}

impl UnitOutcome {
    pub fn findings(text: impl Into<String>, tool_calls: u32, ceiling_reached: bool) -> Self {
        Self::Findings {
            text: text.into(),
            tool_calls,
            ceiling_reached,
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed {
            reason: reason.into(),
        }
    }
}

/// The result of researching one topic.
#[derive(Debug, Clone, PartialEq)]
pub struct ResearchNote {
    pub topic: String,
    pub outcome: UnitOutcome,
}

impl ResearchNote {
    pub fn new(topic: impl Into<String>, outcome: UnitOutcome) -> Self {
        Self {
            topic: topic.into(),
            outcome,
        }
    }

    /// The findings text, or `None` if the unit failed.
    pub fn findings(&self) -> Option<&str> {
        match &self.outcome {
            UnitOutcome::Findings { text, .. } => Some(text),
            UnitOutcome::Failed { .. } => None,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self.outcome, UnitOutcome::Failed { .. })
    }

    /// Text handed back to the supervisor as the delegation's tool result.
    pub fn summary(&self) -> String {
        match &self.outcome {
            UnitOutcome::Findings { text, .. } => text.clone(),
            UnitOutcome::Failed { reason } => format!("[Research failed: {reason}]"),
        }
    }
}

impl fmt::Display for ResearchNote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "## {}\n\n{}", self.topic, self.summary())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_note_renders_marker() {
        let note = ResearchNote::new("2024 revenue", UnitOutcome::failed("search backend down"));
        assert!(note.is_failure());
        assert_eq!(note.findings(), None);
        assert_eq!(note.summary(), "[Research failed: search backend down]");
    }

    #[test]
    fn findings_note_exposes_text() {
        let note = ResearchNote::new("2023 revenue", UnitOutcome::findings("$10B [1]", 3, true));
        assert_eq!(note.findings(), Some("$10B [1]"));
        assert_eq!(note.to_string(), "## 2023 revenue\n\n$10B [1]");
    }
}
