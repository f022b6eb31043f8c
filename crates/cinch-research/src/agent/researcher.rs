//! Researcher agent: a bounded tool-use loop over one topic.
//!
//! ```text
//! Act ──► Observe ──► Act ...
//!  │         │
//!  └─────────┴──► Compress ──► ResearchNote
//! ```
//!
//! `Act` asks the model for the next step, `Observe` runs the requested tool
//! calls and appends their results, `Compress` turns the private transcript
//! into dense, cited findings. The loop leaves for `Compress` when the model
//! calls `research_complete`, stops calling tools, or the unit's tool-call
//! ceiling is reached.
//!
//! Tool failures are observations for the next `Act`. Only an outage of the
//! model or of a tool capability ends the unit early, with a failed note.
//!
//! Every researcher can call `think`, whether or not the caller's
//! [`ToolSet`] registers it. Tool calls are bounded by the configured tool
//! timeout.

use crate::agent::execution::{BudgetedCallError, StageContext, TimeoutPolicy, or_cancelled};
use crate::agent::events::ResearchEvent;
use crate::agent::notes::{ResearchNote, UnitOutcome};
use crate::agent::prompt::{COMPRESS_INSTRUCTION, compress_prompt, researcher_prompt, today_str};
use crate::error::{Cancelled, ToolError};
use crate::model::{CallStage, CompletionRequest};
use crate::tools::core::{THINK_TOOL, ThinkTool, Tool, ToolSet};
use crate::{Message, ToolCall, ToolDef, json_schema_for};
use schemars::JsonSchema;
use serde::Deserialize;
use tracing::{debug, info, warn};

/// Name of the pseudo-tool a researcher calls when it is done.
pub const RESEARCH_COMPLETE_TOOL: &str = "research_complete";

/// `research_complete` takes no arguments.
#[derive(Deserialize, JsonSchema)]
pub struct ResearchCompleteArgs {}

/// Private state of one delegation. Never shared between units.
#[derive(Debug, Clone)]
pub struct DelegationUnit {
    pub index: usize,
    pub topic: String,
    pub tool_call_count: u32,
    pub transcript: Vec<Message>,
}

impl DelegationUnit {
    pub fn new(index: usize, topic: impl Into<String>, system_prompt: String) -> Self {
        let topic = topic.into();
        Self {
            index,
            transcript: vec![Message::system(system_prompt), Message::user(&topic)],
            topic,
            tool_call_count: 0,
        }
    }
}

/// Why the act/observe loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The model called `research_complete`.
    Completed,
    /// The model answered without tool calls.
    NoToolCalls,
    /// The tool-call ceiling was reached.
    CeilingReached,
    /// The transcript no longer fits the context window.
    Overflow,
}

enum Phase {
    Act,
    Observe(Vec<ToolCall>),
    Compress(StopReason),
}

pub struct Researcher<'a> {
    ctx: StageContext<'a>,
    tools: &'a ToolSet,
}

impl<'a> Researcher<'a> {
    pub fn new(ctx: StageContext<'a>, tools: &'a ToolSet) -> Self {
        Self { ctx, tools }
    }

    /// Investigate `topic` and return exactly one note.
    ///
    /// Returns `Err(Cancelled)` if the session is cancelled; the unit's
    /// transcript is dropped and no note is produced.
    pub async fn investigate(&self, index: usize, topic: &str) -> Result<ResearchNote, Cancelled> {
        let config = self.ctx.config;
        let ceiling = config.max_tool_calls_per_unit;
        let mut unit = DelegationUnit::new(index, topic, researcher_prompt(&today_str(), ceiling));
        let mut phase = if ceiling == 0 {
            Phase::Compress(StopReason::CeilingReached)
        } else {
            Phase::Act
        };

        loop {
            phase = match phase {
                Phase::Act => match self.act(&mut unit).await? {
                    Ok(next) => next,
                    Err(reason) => return Ok(ResearchNote::new(topic, UnitOutcome::failed(reason))),
                },
                Phase::Observe(calls) => match self.observe(&mut unit, calls).await? {
                    Ok(next) => next,
                    Err(reason) => return Ok(ResearchNote::new(topic, UnitOutcome::failed(reason))),
                },
                Phase::Compress(reason) => {
                    debug!(
                        "Unit #{index} compressing after {} tool call(s) ({reason:?})",
                        unit.tool_call_count
                    );
                    let outcome = self.compress(&unit, reason).await?;
                    return Ok(ResearchNote::new(topic, outcome));
                }
            };
        }
    }

    fn tool_defs(&self) -> Vec<ToolDef> {
        let mut defs = self.tools.definitions();
        if !self.tools.contains(THINK_TOOL) {
            defs.push(ThinkTool.definition());
        }
        defs.push(ToolDef::new(
            RESEARCH_COMPLETE_TOOL,
            "Call when you have gathered enough information to answer the topic.",
            json_schema_for::<ResearchCompleteArgs>(),
        ));
        defs
    }

    async fn act(&self, unit: &mut DelegationUnit) -> Result<Result<Phase, String>, Cancelled> {
        let config = self.ctx.config;
        let request = CompletionRequest::new(
            CallStage::Researcher,
            &config.research_model,
            unit.transcript.clone(),
        )
        .with_tools(self.tool_defs())
        .with_max_tokens(config.research_model_max_tokens);
        let budget = config.context_budget(&config.research_model, config.research_model_max_tokens);

        let completion = match self
            .ctx
            .complete_within_budget(&request, &budget, TimeoutPolicy::Retry)
            .await?
        {
            Ok(c) => c,
            Err(BudgetedCallError::Exhausted { reason, .. }) => {
                info!("Unit #{} out of context, compressing: {reason}", unit.index);
                return Ok(Ok(Phase::Compress(StopReason::Overflow)));
            }
            Err(BudgetedCallError::Model(e)) => {
                warn!("Unit #{} lost the model: {e}", unit.index);
                return Ok(Err(format!("model unavailable: {e}")));
            }
        };

        if completion.tool_calls.is_empty() {
            if let Some(text) = completion.non_empty_text() {
                unit.transcript.push(Message::assistant_text(text));
            }
            return Ok(Ok(Phase::Compress(StopReason::NoToolCalls)));
        }
        unit.transcript.push(Message::assistant_tool_calls(
            completion.content.clone(),
            completion.tool_calls.clone(),
        ));
        Ok(Ok(Phase::Observe(completion.tool_calls)))
    }

    async fn observe(
        &self,
        unit: &mut DelegationUnit,
        calls: Vec<ToolCall>,
    ) -> Result<Result<Phase, String>, Cancelled> {
        let ceiling = self.ctx.config.max_tool_calls_per_unit;
        let mut completed = false;
        let mut refused = false;
        let mut replies: Vec<(&str, Option<String>)> = Vec::with_capacity(calls.len());
        let mut admitted = Vec::new();

        for call in &calls {
            if call.name() == RESEARCH_COMPLETE_TOOL {
                completed = true;
                replies.push((&call.id, Some("Research marked complete.".into())));
            } else if unit.tool_call_count >= ceiling {
                refused = true;
                replies.push((
                    &call.id,
                    Some(format!("Tool call budget exhausted ({ceiling} calls); not executed.")),
                ));
            } else {
                unit.tool_call_count += 1;
                self.ctx.emit(ResearchEvent::UnitToolCall {
                    topic: &unit.topic,
                    name: call.name(),
                    call_count: unit.tool_call_count,
                });
                admitted.push(call);
                replies.push((&call.id, None));
            }
        }

        let runs = admitted.iter().map(|call| self.run_tool(call));
        let mut results = or_cancelled(self.ctx.cancel, futures::future::join_all(runs))
            .await?
            .into_iter();

        for (call_id, reply) in replies {
            let text = match reply {
                Some(text) => text,
                None => match results.next() {
                    Some(Ok(output)) => output,
                    Some(Err(ToolError::Failed(msg))) => format!("Error: {msg}"),
                    Some(Err(ToolError::Unavailable(msg))) => {
                        warn!("Unit #{} lost a tool capability: {msg}", unit.index);
                        return Ok(Err(format!("tool capability unavailable: {msg}")));
                    }
                    None => continue,
                },
            };
            unit.transcript.push(Message::tool_result(call_id, text));
        }

        let next = if completed {
            Phase::Compress(StopReason::Completed)
        } else if refused || unit.tool_call_count >= ceiling {
            Phase::Compress(StopReason::CeilingReached)
        } else {
            Phase::Act
        };
        Ok(Ok(next))
    }

    async fn run_tool(&self, call: &ToolCall) -> Result<String, ToolError> {
        if call.name() == THINK_TOOL && !self.tools.contains(THINK_TOOL) {
            return ThinkTool.execute(call.arguments()).await;
        }
        let timeout = self.ctx.config.tool_timeout();
        self.tools
            .execute_within(call.name(), call.arguments(), Some(timeout))
            .await
    }

    async fn compress(
        &self,
        unit: &DelegationUnit,
        reason: StopReason,
    ) -> Result<UnitOutcome, Cancelled> {
        let config = self.ctx.config;
        let mut messages = Vec::with_capacity(unit.transcript.len() + 1);
        messages.push(Message::system(compress_prompt(&today_str())));
        messages.extend(unit.transcript.iter().skip(1).cloned());
        messages.push(Message::user(COMPRESS_INSTRUCTION));

        let request = CompletionRequest::new(CallStage::Compress, &config.compression_model, messages)
            .with_max_tokens(config.compression_model_max_tokens);
        let budget =
            config.context_budget(&config.compression_model, config.compression_model_max_tokens);

        let outcome = match self
            .ctx
            .complete_within_budget(&request, &budget, TimeoutPolicy::Escalate)
            .await?
        {
            Ok(completion) => match completion.non_empty_text() {
                Some(text) => UnitOutcome::findings(
                    text,
                    unit.tool_call_count,
                    reason == StopReason::CeilingReached,
                ),
                None => UnitOutcome::failed("compression returned no text"),
            },
            Err(e) => UnitOutcome::failed(format!("compression failed: {e}")),
        };
        Ok(outcome)
    }
}
