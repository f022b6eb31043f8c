//! Stage prompts and the [`SystemPromptBuilder`] that assembles them.
//!
//! Each stage gets a short preamble plus `## Section` blocks. Dates are
//! rendered once per call with [`today_str`].

use crate::{Message, MessageRole};

/// Builder for multi-section system prompts.
///
/// Sections are joined with double newlines. Empty sections are skipped.
///
/// ```
/// use cinch_research::agent::prompt::SystemPromptBuilder;
///
/// let prompt = SystemPromptBuilder::new("You are a research supervisor.")
///     .section("Date", "2025-01-31")
///     .section_opt("Brief", None::<String>)
///     .build();
///
/// assert!(prompt.contains("## Date"));
/// assert!(!prompt.contains("## Brief"));
/// ```
pub struct SystemPromptBuilder {
    sections: Vec<String>,
}

impl SystemPromptBuilder {
    pub fn new(preamble: impl Into<String>) -> Self {
        Self {
            sections: vec![preamble.into()],
        }
    }

    /// Append a `## heading` section. Skipped if `content` is empty.
    pub fn section(mut self, heading: &str, content: impl Into<String>) -> Self {
        let content = content.into();
        if !content.is_empty() {
            self.sections.push(format!("## {heading}\n\n{content}"));
        }
        self
    }

    /// Append a section only if `content` is `Some`.
    pub fn section_opt(self, heading: &str, content: Option<impl Into<String>>) -> Self {
        match content {
            Some(c) => self.section(heading, c),
            None => self,
        }
    }

    pub fn build(self) -> String {
        self.sections.join("\n\n")
    }
}

/// Today's date as `YYYY-MM-DD`, in local time.
pub fn today_str() -> String {
    chrono::Local::now().format("%Y-%m-%d").to_string()
}

/// Render user/assistant turns as `Role: text` lines for single-shot prompts.
pub fn render_conversation(messages: &[Message]) -> String {
    messages
        .iter()
        .filter(|m| matches!(m.role, MessageRole::User | MessageRole::Assistant))
        .filter(|m| !m.text().trim().is_empty())
        .map(|m| {
            let role = match m.role {
                MessageRole::User => "User",
                _ => "Assistant",
            };
            format!("{role}: {}", m.text().trim())
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub fn clarify_prompt(conversation: &str, date: &str) -> String {
    SystemPromptBuilder::new(
        "You decide whether a research request needs a clarifying question before \
         research starts. Ask only if an acronym, scope, timeframe, or target is \
         genuinely ambiguous. If the request is clear, do not ask.",
    )
    .section("Date", date)
    .section("Conversation", conversation)
    .section(
        "Output",
        "Call clarify_with_user exactly once.\n\
         - need_clarification: true only if a question is required.\n\
         - question: the single, concise question to ask (empty when not needed).\n\
         - verification: when no question is needed, a one-sentence acknowledgement \
           that restates the request and says research will now start.",
    )
    .build()
}

pub fn brief_prompt(conversation: &str, date: &str) -> String {
    SystemPromptBuilder::new(
        "Translate the conversation below into one detailed, unambiguous research brief \
         written in the first person from the user's perspective.",
    )
    .section("Date", date)
    .section("Conversation", conversation)
    .section(
        "Guidelines",
        "Include every requirement and preference the user stated. Mark dimensions \
         the user left open as open rather than inventing constraints. Name preferred \
         sources when the user gave any. Reply with the brief only.",
    )
    .build()
}

pub fn supervisor_prompt(date: &str, max_concurrent: usize, max_iterations: u32) -> String {
    SystemPromptBuilder::new(
        "You are a research supervisor. Break the research brief into focused topics \
         and delegate each to a researcher with delegate_research. Researchers cannot \
         see each other's work, so every topic must be self-contained.",
    )
    .section("Date", date)
    .section(
        "Tools",
        "- delegate_research(topic): start one researcher on a standalone topic.\n\
         - reflect(note): record your assessment of progress. Use it between rounds.\n\
         - complete(): finish when the findings answer the brief. Do not combine it \
           with new delegations.",
    )
    .section(
        "Limits",
        format!(
            "At most {max_concurrent} researchers run at once; extra topics queue. \
             You have {max_iterations} planning turns in total. Prefer one researcher \
             for simple questions and parallel researchers only for clearly separable \
             comparisons."
        ),
    )
    .build()
}

pub fn researcher_prompt(date: &str, max_tool_calls: u32) -> String {
    SystemPromptBuilder::new(
        "You are a researcher investigating a single topic with the tools provided. \
         Search, read, and reflect until you can answer the topic confidently.",
    )
    .section("Date", date)
    .section(
        "Method",
        "Start with broad searches, then narrow. After each search call think to \
         assess what you found and what is missing. Call research_complete as soon \
         as you have enough to answer.",
    )
    .section(
        "Budget",
        format!(
            "You may make at most {max_tool_calls} tool calls. Simple facts need 2-3. \
             Stop when the last two searches returned nothing new."
        ),
    )
    .build()
}

pub fn compress_prompt(date: &str) -> String {
    SystemPromptBuilder::new(
        "You clean up the transcript of a research session. Keep every relevant fact, \
         figure, and quote; remove only duplicates and irrelevant material.",
    )
    .section("Date", date)
    .section(
        "Output",
        "1. **Queries and tool calls made**\n\
         2. **Comprehensive findings**, with inline citations like [1]\n\
         3. **Sources**: numbered list of `[n] Title: URL`",
    )
    .build()
}

/// Final user turn appended to a transcript before compression.
pub const COMPRESS_INSTRUCTION: &str = "Rewrite all of the research above into a cleaned-up, \
    fully cited summary. Preserve every relevant fact and figure verbatim.";

pub fn report_prompt(brief: &str, findings: &str, date: &str) -> String {
    SystemPromptBuilder::new(
        "Write a comprehensive, well-structured research report that answers the brief \
         using only the findings below.",
    )
    .section("Date", date)
    .section("Research brief", brief)
    .section("Findings", findings)
    .section(
        "Format",
        "Use markdown headings. Cite sources inline as [n] and end with a ### Sources \
         section listing each source once, numbered sequentially. Write in the language \
         of the brief.",
    )
    .build()
}
