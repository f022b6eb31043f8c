//! Supervisor loop: plan topics, delegate them, integrate the findings.
//!
//! ```text
//! Planning ──► Delegating ──► Integrating ──► Planning ...
//!    │
//!    └──► Stopped(Done | IterationCeiling | Idle | Degraded)
//! ```
//!
//! Each planning turn is one model call offering `delegate_research`,
//! `reflect` and `complete`. Delegations of a turn run concurrently behind a
//! semaphore sized by `max_concurrent_research_units`; queued units are
//! admitted in issuance order. Notes are integrated in issuance order once
//! every unit of the turn has finished, regardless of completion order.

use crate::agent::events::ResearchEvent;
use crate::agent::execution::{StageContext, TimeoutPolicy, or_cancelled};
use crate::agent::knowledge::{KnowledgeRecord, KnowledgeStore};
use crate::agent::notes::ResearchNote;
use crate::agent::prompt::{supervisor_prompt, today_str};
use crate::agent::researcher::Researcher;
use crate::api::tracing::generate_span_id;
use crate::error::Cancelled;
use crate::model::{CallStage, CompletionRequest};
use crate::tools::core::{ToolSet, validate_arguments};
use crate::{ChatCompletion, Message, ToolCall, ToolDef, json_schema_for};
use schemars::JsonSchema;
use serde::Deserialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

pub const DELEGATE_TOOL: &str = "delegate_research";
pub const REFLECT_TOOL: &str = "reflect";
pub const COMPLETE_TOOL: &str = "complete";

/// How long a finished run waits for pending knowledge-store writes.
const KNOWLEDGE_FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

/// Arguments of `delegate_research`.
#[derive(Deserialize, JsonSchema)]
pub struct DelegateResearchArgs {
    /// A standalone research topic, described in at least a paragraph.
    pub topic: String,
}

/// Arguments of `reflect`.
#[derive(Deserialize, JsonSchema)]
pub struct ReflectArgs {
    /// Assessment of progress: what was found, what is missing, what next.
    pub note: String,
}

/// `complete` takes no arguments.
#[derive(Deserialize, JsonSchema)]
pub struct CompleteArgs {}

/// A parsed supervisor tool call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorAction {
    Delegate { topic: String },
    Reflect { note: String },
    Complete,
}

impl SupervisorAction {
    /// Parse a tool call, validating its arguments against the tool's schema.
    pub fn parse(call: &ToolCall) -> Result<Self, String> {
        let args = call.arguments();
        match call.name() {
            DELEGATE_TOOL => {
                validate_arguments(DELEGATE_TOOL, &json_schema_for::<DelegateResearchArgs>(), args)?;
                let parsed: DelegateResearchArgs =
                    serde_json::from_str(args).map_err(|e| e.to_string())?;
                let topic = parsed.topic.trim();
                if topic.is_empty() {
                    return Err("'topic' must not be empty".into());
                }
                Ok(Self::Delegate {
                    topic: topic.to_string(),
                })
            }
            REFLECT_TOOL => {
                validate_arguments(REFLECT_TOOL, &json_schema_for::<ReflectArgs>(), args)?;
                let parsed: ReflectArgs = serde_json::from_str(args).map_err(|e| e.to_string())?;
                Ok(Self::Reflect { note: parsed.note })
            }
            COMPLETE_TOOL => Ok(Self::Complete),
            other => Err(format!("unknown supervisor tool '{other}'")),
        }
    }
}

/// Tool definitions offered on every planning turn.
pub fn supervisor_tools() -> Vec<ToolDef> {
    vec![
        ToolDef::new(
            DELEGATE_TOOL,
            "Delegate one standalone research topic to a researcher.",
            json_schema_for::<DelegateResearchArgs>(),
        ),
        ToolDef::new(
            REFLECT_TOOL,
            "Record a reflection on research progress. Performs no research.",
            json_schema_for::<ReflectArgs>(),
        ),
        ToolDef::new(
            COMPLETE_TOOL,
            "Finish research. Call only when the findings answer the brief.",
            json_schema_for::<CompleteArgs>(),
        ),
    ]
}

/// Why the supervisor stopped. None of these is an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorStop {
    /// `complete` was called with no delegations in the same turn.
    Done,
    /// The planning-turn ceiling was reached.
    IterationCeiling,
    /// A planning turn made no tool calls at all.
    Idle,
    /// The planning call itself failed; research continues with the notes so far.
    Degraded(String),
}

impl fmt::Display for SupervisorStop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SupervisorStop::Done => write!(f, "research complete"),
            SupervisorStop::IterationCeiling => write!(f, "iteration ceiling reached"),
            SupervisorStop::Idle => write!(f, "no further actions requested"),
            SupervisorStop::Degraded(reason) => write!(f, "degraded: {reason}"),
        }
    }
}

/// What the supervisor hands to the report stage.
#[derive(Debug, Clone)]
pub struct SupervisorOutcome {
    /// One note per finished unit, in issuance order.
    pub notes: Vec<ResearchNote>,
    /// Reflections recorded with `reflect`.
    pub raw_notes: Vec<String>,
    pub transcript: Vec<Message>,
    pub iterations: u32,
    pub stop: SupervisorStop,
}

/// A delegation issued by a planning turn.
#[derive(Debug, Clone)]
struct Delegation {
    call_id: String,
    index: usize,
    topic: String,
}

enum State {
    Planning,
    Delegating(Vec<Delegation>),
    Integrating(Vec<Delegation>, Vec<ResearchNote>),
    Stopped(SupervisorStop),
}

/// Result of applying one planning turn to the transcript.
#[derive(Default)]
struct Plan {
    delegations: Vec<Delegation>,
    complete: bool,
    tool_calls: usize,
}

pub struct Supervisor<'a> {
    ctx: StageContext<'a>,
    tools: &'a ToolSet,
    knowledge: Option<Arc<dyn KnowledgeStore>>,
}

impl<'a> Supervisor<'a> {
    pub fn new(ctx: StageContext<'a>, tools: &'a ToolSet) -> Self {
        Self {
            ctx,
            tools,
            knowledge: None,
        }
    }

    pub fn with_knowledge_store(mut self, store: Option<Arc<dyn KnowledgeStore>>) -> Self {
        self.knowledge = store;
        self
    }

    /// Drive the loop to a stop for `brief`.
    pub async fn run(&self, brief: &str) -> Result<SupervisorOutcome, Cancelled> {
        let config = self.ctx.config;
        let max_iterations = config.max_supervisor_iterations;
        let mut transcript = vec![
            Message::system(supervisor_prompt(
                &today_str(),
                config.max_concurrent_research_units,
                max_iterations,
            )),
            Message::user(brief),
        ];
        let mut notes: Vec<ResearchNote> = Vec::new();
        let mut raw_notes = Vec::new();
        let mut iterations = 0u32;
        let mut issued = 0usize;
        let mut pending_writes = JoinSet::new();
        let mut state = State::Planning;

        loop {
            state = match state {
                State::Planning if iterations >= max_iterations => {
                    State::Stopped(SupervisorStop::IterationCeiling)
                }
                State::Planning => {
                    iterations += 1;
                    let request =
                        CompletionRequest::new(CallStage::Supervisor, &config.research_model, transcript.clone())
                            .with_tools(supervisor_tools())
                            .with_max_tokens(config.research_model_max_tokens);
                    let budget =
                        config.context_budget(&config.research_model, config.research_model_max_tokens);
                    match self
                        .ctx
                        .complete_within_budget(&request, &budget, TimeoutPolicy::Escalate)
                        .await?
                    {
                        Err(e) => {
                            warn!("Supervisor planning call failed: {e}");
                            State::Stopped(SupervisorStop::Degraded(e.to_string()))
                        }
                        Ok(completion) => {
                            let plan = apply_turn(&mut transcript, &mut raw_notes, &mut issued, completion);
                            self.ctx.emit(ResearchEvent::PlanningTurn {
                                iteration: iterations,
                                max_iterations,
                                delegations: plan.delegations.len(),
                            });
                            if !plan.delegations.is_empty() {
                                State::Delegating(plan.delegations)
                            } else if plan.complete {
                                State::Stopped(SupervisorStop::Done)
                            } else if plan.tool_calls == 0 {
                                State::Stopped(SupervisorStop::Idle)
                            } else {
                                State::Planning
                            }
                        }
                    }
                }
                State::Delegating(batch) => {
                    let results = self.delegate(&batch, iterations).await?;
                    State::Integrating(batch, results)
                }
                State::Integrating(batch, results) => {
                    for (delegation, note) in batch.into_iter().zip(results) {
                        transcript.push(Message::tool_result(&delegation.call_id, note.summary()));
                        if let (Some(store), Some(findings)) = (&self.knowledge, note.findings()) {
                            let store = store.clone();
                            let record = KnowledgeRecord::new(self.ctx.trace_id, &note.topic, findings);
                            pending_writes.spawn(async move { store.record(record).await });
                        }
                        notes.push(note);
                    }
                    self.ctx.emit(ResearchEvent::NotesIntegrated {
                        iteration: iterations,
                        total_notes: notes.len(),
                    });
                    State::Planning
                }
                State::Stopped(stop) => {
                    info!("Supervisor stopped after {iterations} iteration(s): {stop}");
                    self.ctx.emit(ResearchEvent::SupervisorFinished {
                        iterations,
                        stop: &stop,
                    });
                    flush_writes(pending_writes).await;
                    return Ok(SupervisorOutcome {
                        notes,
                        raw_notes,
                        transcript,
                        iterations,
                        stop,
                    });
                }
            };
        }
    }

    /// Run every delegation of a turn; results come back in issuance order.
    async fn delegate(&self, batch: &[Delegation], iteration: u32) -> Result<Vec<ResearchNote>, Cancelled> {
        let gate = Semaphore::new(self.ctx.config.max_concurrent_research_units.max(1));
        let researcher = Researcher::new(self.ctx, self.tools);

        let units = batch.iter().map(|d| {
            let (gate, researcher) = (&gate, &researcher);
            async move {
                let _permit = or_cancelled(self.ctx.cancel, gate.acquire())
                    .await?
                    .map_err(|_| Cancelled)?;
                debug!(
                    "Unit #{} admitted (span {})",
                    d.index,
                    generate_span_id(self.ctx.trace_id, iteration, d.index)
                );
                self.ctx.emit(ResearchEvent::UnitStarted {
                    index: d.index,
                    topic: &d.topic,
                });
                let note = researcher.investigate(d.index, &d.topic).await?;
                self.ctx.emit(ResearchEvent::UnitFinished {
                    index: d.index,
                    note: &note,
                });
                Ok::<_, Cancelled>(note)
            }
        });
        futures::future::join_all(units).await.into_iter().collect()
    }
}

/// Append one planning turn to the transcript and collect its actions.
///
/// Reflections and completions are answered immediately; delegations are
/// answered during integration. A `complete` issued alongside delegations is
/// deferred until those delegations have been integrated.
fn apply_turn(
    transcript: &mut Vec<Message>,
    raw_notes: &mut Vec<String>,
    issued: &mut usize,
    completion: ChatCompletion,
) -> Plan {
    let calls = completion.tool_calls;
    if calls.is_empty() {
        if let Some(text) = completion.content.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
            transcript.push(Message::assistant_text(text));
        }
        return Plan::default();
    }
    transcript.push(Message::assistant_tool_calls(completion.content, calls.clone()));

    let mut plan = Plan {
        tool_calls: calls.len(),
        ..Plan::default()
    };
    let mut complete_ids = Vec::new();
    for call in &calls {
        match SupervisorAction::parse(call) {
            Ok(SupervisorAction::Delegate { topic }) => {
                plan.delegations.push(Delegation {
                    call_id: call.id.clone(),
                    index: *issued,
                    topic,
                });
                *issued += 1;
            }
            Ok(SupervisorAction::Reflect { note }) => {
                transcript.push(Message::tool_result(&call.id, format!("Reflection recorded: {note}")));
                raw_notes.push(note);
            }
            Ok(SupervisorAction::Complete) => {
                plan.complete = true;
                complete_ids.push(call.id.clone());
            }
            Err(e) => {
                debug!("Invalid supervisor call {}: {e}", call.name());
                transcript.push(Message::tool_result(&call.id, format!("Error: {e}")));
            }
        }
    }
    let reply = if plan.delegations.is_empty() {
        "Research complete."
    } else {
        "Completion deferred: the research delegated in this turn must finish first."
    };
    for id in complete_ids {
        transcript.push(Message::tool_result(id, reply));
    }
    plan
}

async fn flush_writes(mut pending: JoinSet<()>) {
    if pending.is_empty() {
        return;
    }
    let drain = async { while pending.join_next().await.is_some() {} };
    if tokio::time::timeout(KNOWLEDGE_FLUSH_TIMEOUT, drain).await.is_err() {
        warn!("Knowledge store writes still pending after {KNOWLEDGE_FLUSH_TIMEOUT:?}; abandoning");
    }
}
