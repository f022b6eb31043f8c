//! Scripted model and tool fakes shared by the pipeline tests.

#![allow(dead_code)]

use cinch_research::agent::events::{EventHandler, ResearchEvent};
use cinch_research::agent::supervisor::{COMPLETE_TOOL, DELEGATE_TOOL};
use cinch_research::{ChatCompletion, Message, ToolCall};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

pub fn delegate(id: &str, topic: &str) -> ToolCall {
    ToolCall::function(
        id,
        DELEGATE_TOOL,
        serde_json::json!({ "topic": topic }).to_string(),
    )
}

pub fn complete(id: &str) -> ToolCall {
    ToolCall::function(id, COMPLETE_TOOL, "{}")
}

/// Supervisor script: delegate `topics` on the first turn, then complete.
pub fn delegate_then_complete(transcript: &[Message], topics: &[&str]) -> ChatCompletion {
    if transcript.iter().any(Message::is_tool_result) {
        return ChatCompletion::with_tool_calls(vec![complete("done")]);
    }
    ChatCompletion::with_tool_calls(
        topics
            .iter()
            .enumerate()
            .map(|(i, t)| delegate(&format!("d{i}"), t))
            .collect(),
    )
}

/// The topic a researcher or compression request is about.
pub fn unit_topic(messages: &[Message]) -> &str {
    messages.get(1).map(Message::text).unwrap_or("")
}

/// Tool results in a researcher or compression conversation.
pub fn observations(messages: &[Message]) -> Vec<&str> {
    messages
        .iter()
        .filter(|m| m.is_tool_result())
        .map(Message::text)
        .collect()
}

/// Tracks how many delegation units hold a concurrency slot at once.
#[derive(Default)]
pub struct ConcurrencyGauge {
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    finished: Mutex<Vec<usize>>,
}

impl ConcurrencyGauge {
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Unit indices in completion order.
    pub fn finished(&self) -> Vec<usize> {
        self.finished.lock().unwrap().clone()
    }
}

impl EventHandler for ConcurrencyGauge {
    fn on_event(&self, event: &ResearchEvent<'_>) {
        match event {
            ResearchEvent::UnitStarted { .. } => {
                let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                self.peak.fetch_max(now, Ordering::SeqCst);
            }
            ResearchEvent::UnitFinished { index, .. } => {
                self.in_flight.fetch_sub(1, Ordering::SeqCst);
                self.finished.lock().unwrap().push(*index);
            }
            _ => {}
        }
    }
}
