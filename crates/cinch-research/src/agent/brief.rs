//! Clarification & brief stage: conversation in, one research brief out.
//!
//! An optional clarification call asks the model, through the forced
//! `clarify_with_user` tool, whether the request is ambiguous. If it is, the
//! question ends the run for this turn. Otherwise a second call distills the
//! conversation into the brief that every later stage reads.

use crate::agent::execution::{StageContext, TimeoutPolicy};
use crate::agent::events::ResearchEvent;
use crate::agent::prompt::{brief_prompt, clarify_prompt, render_conversation, today_str};
use crate::error::{BriefGenerationError, BriefStep, ResearchError};
use crate::model::{CallStage, CompletionRequest};
use crate::tools::core::validate_arguments;
use crate::{ChatCompletion, Message, MessageRole, ToolDef, json_schema_for};
use schemars::JsonSchema;
use serde::Deserialize;
use tracing::{debug, info, warn};

/// Name of the forced clarification tool.
pub const CLARIFY_TOOL: &str = "clarify_with_user";

/// Structured answer of the clarification call.
#[derive(Debug, Clone, Deserialize, JsonSchema, PartialEq)]
pub struct ClarifyArgs {
    /// Whether the user must be asked a clarifying question.
    pub need_clarification: bool,
    /// The question to ask. Empty when no clarification is needed.
    #[serde(default)]
    pub question: String,
    /// Acknowledgement that research will start. Empty when a question is asked.
    #[serde(default)]
    pub verification: String,
}

/// What the stage decided.
#[derive(Debug, Clone, PartialEq)]
pub enum BriefDecision {
    /// Ask the user this question and stop.
    Clarify(String),
    /// Proceed with this research brief.
    Brief(String),
}

pub struct BriefStage<'a> {
    ctx: StageContext<'a>,
}

impl<'a> BriefStage<'a> {
    pub fn new(ctx: StageContext<'a>) -> Self {
        Self { ctx }
    }

    /// Run the stage over `conversation`, appending the assistant's question
    /// or acknowledgement to it.
    ///
    /// Clarification is attempted at most once per session: it is skipped
    /// when disabled or when the conversation already holds an assistant turn.
    pub async fn run(&self, conversation: &mut Vec<Message>) -> Result<BriefDecision, ResearchError> {
        let already_asked = conversation.iter().any(|m| m.role == MessageRole::Assistant);
        if self.ctx.config.allow_clarification && !already_asked {
            let answer = self.clarify(conversation).await?;
            if answer.need_clarification && !answer.question.trim().is_empty() {
                let question = answer.question.trim().to_string();
                info!("Asking for clarification: {question}");
                conversation.push(Message::assistant_text(&question));
                self.ctx
                    .emit(ResearchEvent::ClarificationRequested { question: &question });
                return Ok(BriefDecision::Clarify(question));
            }
            if !answer.verification.trim().is_empty() {
                conversation.push(Message::assistant_text(answer.verification.trim()));
            }
        } else {
            debug!("Clarification skipped (enabled={}, already_asked={already_asked})", self.ctx.config.allow_clarification);
        }

        let brief = self.write_brief(conversation).await?;
        self.ctx.emit(ResearchEvent::BriefWritten { brief: &brief });
        Ok(BriefDecision::Brief(brief))
    }

    fn attempts(&self) -> u32 {
        1 + self.ctx.config.max_structured_output_retries
    }

    async fn clarify(&self, conversation: &[Message]) -> Result<ClarifyArgs, ResearchError> {
        let step = BriefStep::Clarification;
        let schema = json_schema_for::<ClarifyArgs>();
        let request = CompletionRequest::new(
            CallStage::Clarify,
            &self.ctx.config.research_model,
            vec![Message::user(clarify_prompt(
                &render_conversation(conversation),
                &today_str(),
            ))],
        )
        .with_tools(vec![ToolDef::new(
            CLARIFY_TOOL,
            "Report whether the research request needs a clarifying question.",
            schema.clone(),
        )])
        .with_forced_tool(CLARIFY_TOOL)
        .with_max_tokens(self.ctx.config.research_model_max_tokens);

        let mut reason = String::new();
        for attempt in 1..=self.attempts() {
            let completion = self
                .ctx
                .complete_with_retry(&request, TimeoutPolicy::Retry)
                .await?
                .map_err(|source| BriefGenerationError::Model { step, source })?;
            match structured_args::<ClarifyArgs>(&completion, CLARIFY_TOOL, &schema) {
                Ok(args) => return Ok(args),
                Err(e) => {
                    warn!("Malformed clarification output (attempt {attempt}): {e}");
                    reason = e;
                }
            }
        }
        Err(BriefGenerationError::Malformed {
            step,
            attempts: self.attempts(),
            reason,
        }
        .into())
    }

    async fn write_brief(&self, conversation: &[Message]) -> Result<String, ResearchError> {
        let step = BriefStep::Brief;
        let request = CompletionRequest::new(
            CallStage::Brief,
            &self.ctx.config.research_model,
            vec![Message::user(brief_prompt(
                &render_conversation(conversation),
                &today_str(),
            ))],
        )
        .with_max_tokens(self.ctx.config.research_model_max_tokens);

        for attempt in 1..=self.attempts() {
            let completion = self
                .ctx
                .complete_with_retry(&request, TimeoutPolicy::Retry)
                .await?
                .map_err(|source| BriefGenerationError::Model { step, source })?;
            if let Some(brief) = completion.non_empty_text() {
                return Ok(brief.to_string());
            }
            warn!("Empty research brief (attempt {attempt})");
        }
        Err(BriefGenerationError::Malformed {
            step,
            attempts: self.attempts(),
            reason: "model returned an empty brief".into(),
        }
        .into())
    }
}

/// Extract structured arguments from a forced tool call, falling back to a
/// JSON text body for models that answer in plain content.
fn structured_args<T: serde::de::DeserializeOwned>(
    completion: &ChatCompletion,
    tool: &str,
    schema: &serde_json::Value,
) -> Result<T, String> {
    let raw = match completion.tool_calls.iter().find(|c| c.name() == tool) {
        Some(call) => call.arguments(),
        None => completion
            .non_empty_text()
            .ok_or_else(|| format!("no {tool} call in response"))?,
    };
    validate_arguments(tool, schema, raw)?;
    serde_json::from_str(raw).map_err(|e| format!("invalid {tool} arguments: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::config::ResearchConfig;
    use crate::agent::events::NoopHandler;
    use crate::api::tracing::UsageTracker;
    use crate::error::ModelError;
    use crate::model::FnModel;
    use crate::ToolCall;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio_util::sync::CancellationToken;

    fn clarify_call(args: &str) -> ChatCompletion {
        ChatCompletion::with_tool_calls(vec![ToolCall::function("c1", CLARIFY_TOOL, args)])
    }

    async fn run_stage(
        model: &FnModel,
        config: &ResearchConfig,
        conversation: &mut Vec<Message>,
    ) -> Result<BriefDecision, ResearchError> {
        let (usage, cancel) = (UsageTracker::new(), CancellationToken::new());
        let ctx = StageContext {
            model,
            config,
            events: &NoopHandler,
            usage: &usage,
            cancel: &cancel,
            trace_id: "tr-test",
        };
        BriefStage::new(ctx).run(conversation).await
    }

    #[tokio::test]
    async fn asks_question_when_needed() {
        let model = FnModel::new(|req: CompletionRequest| async move {
            assert_eq!(req.stage, CallStage::Clarify);
            assert_eq!(req.forced_tool.as_deref(), Some(CLARIFY_TOOL));
            Ok(clarify_call(
                r#"{"need_clarification":true,"question":"Which Company X?","verification":""}"#,
            ))
        });
        let mut conv = vec![Message::user("Compare revenue of Company X")];
        let decision = run_stage(&model, &ResearchConfig::default(), &mut conv).await.unwrap();
        assert_eq!(decision, BriefDecision::Clarify("Which Company X?".into()));
        assert_eq!(conv.last().map(Message::text), Some("Which Company X?"));
    }

    #[tokio::test]
    async fn disabled_clarification_goes_straight_to_brief() {
        let model = FnModel::new(|req: CompletionRequest| async move {
            match req.stage {
                CallStage::Brief => Ok(ChatCompletion::text("I want 2023 vs 2024 revenue.")),
                other => panic!("unexpected {other} call"),
            }
        });
        let config = ResearchConfig::default().with_allow_clarification(false);
        let mut conv = vec![Message::user("Compare revenue")];
        let decision = run_stage(&model, &config, &mut conv).await.unwrap();
        assert_eq!(decision, BriefDecision::Brief("I want 2023 vs 2024 revenue.".into()));
    }

    #[tokio::test]
    async fn verification_is_appended_before_brief() {
        let model = FnModel::new(|req: CompletionRequest| async move {
            match req.stage {
                CallStage::Clarify => Ok(clarify_call(
                    r#"{"need_clarification":false,"question":"","verification":"Starting research."}"#,
                )),
                _ => {
                    assert!(req.messages[0].text().contains("Assistant: Starting research."));
                    Ok(ChatCompletion::text("brief"))
                }
            }
        });
        let mut conv = vec![Message::user("Compare revenue")];
        let decision = run_stage(&model, &ResearchConfig::default(), &mut conv).await.unwrap();
        assert_eq!(decision, BriefDecision::Brief("brief".into()));
        assert_eq!(conv.len(), 2);
    }

    #[tokio::test]
    async fn answered_question_skips_second_clarification() {
        let model = FnModel::new(|req: CompletionRequest| async move {
            assert_eq!(req.stage, CallStage::Brief);
            Ok(ChatCompletion::text("brief"))
        });
        let mut conv = vec![
            Message::user("Compare revenue"),
            Message::assistant_text("Which company?"),
            Message::user("Company X"),
        ];
        let decision = run_stage(&model, &ResearchConfig::default(), &mut conv).await.unwrap();
        assert_eq!(decision, BriefDecision::Brief("brief".into()));
    }

    #[tokio::test]
    async fn malformed_output_retried_once_then_fails() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let model = FnModel::new(move |_req| {
            c.fetch_add(1, Ordering::SeqCst);
            async { Ok(clarify_call(r#"{"question": 42}"#)) }
        });
        let mut conv = vec![Message::user("q")];
        let err = run_stage(&model, &ResearchConfig::default(), &mut conv).await.unwrap_err();
        assert!(matches!(
            err,
            ResearchError::Brief(BriefGenerationError::Malformed {
                step: BriefStep::Clarification,
                attempts: 2,
                ..
            })
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn unreachable_model_fails_stage() {
        let model = FnModel::new(|_req| async { Err(ModelError::Unavailable("HTTP 401".into())) });
        let config = ResearchConfig::default().with_allow_clarification(false);
        let mut conv = vec![Message::user("q")];
        let err = run_stage(&model, &config, &mut conv).await.unwrap_err();
        assert!(matches!(
            err,
            ResearchError::Brief(BriefGenerationError::Model {
                step: BriefStep::Brief,
                ..
            })
        ));
    }
}
