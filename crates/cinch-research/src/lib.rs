//! Deep research pipeline for LLM-driven, tool-using investigations.
//!
//! `cinch-research` turns a free-form research request into a written report.
//! A run goes through four stages:
//!
//! 1. **Clarification & brief** ([`agent::brief`]) — optionally asks the user
//!    one clarifying question, then distills the conversation into a single
//!    research brief.
//! 2. **Supervisor loop** ([`agent::supervisor`]) — plans research topics and
//!    delegates them to a bounded pool of concurrent researchers. Findings are
//!    integrated in the order the topics were issued.
//! 3. **Researcher agents** ([`agent::researcher`]) — bounded tool-use loops
//!    that search, fetch and reflect on one topic, then compress their
//!    transcript into dense findings.
//! 4. **Final report** ([`agent::report`]) — synthesizes every finding into a
//!    single report, falling back to smaller note subsets when the context
//!    window overflows.
//!
//! Every model invocation goes through the [`context`] budgeter, which shrinks
//! conversations with a deterministic reduction ladder before they hit the
//! model's context window.
//!
//! # Getting started
//!
//! ```ignore
//! use cinch_research::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = OpenRouterClient::new(std::env::var("OPENROUTER_KEY")?)?;
//!     let tools = ToolSet::new()
//!         .with(WebSearch::new())
//!         .with(FetchUrl::new())
//!         .with(ThinkTool);
//!     let config = ResearchConfig::default().with_allow_clarification(false);
//!
//!     let outcome = Pipeline::new(&client, &tools, &config)
//!         .with_event_handler(&LoggingHandler)
//!         .run(vec![Message::user("Compare 2023 and 2024 revenue of Company X")])
//!         .await?;
//!
//!     if let ResearchOutcome::Report(report) = outcome {
//!         println!("{}", report.report);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`agent`] | [`Pipeline`](agent::pipeline::Pipeline), brief, supervisor, researcher, report, config, events, knowledge store |
//! | [`model`] | [`ModelClient`](model::ModelClient) capability trait, [`FnModel`](model::FnModel), OpenRouter adapter |
//! | [`tools`] | [`Tool`](tools::core::Tool) trait, [`ToolSet`](tools::core::ToolSet) dispatch, web search/fetch, remote lookups |
//! | [`context`] | [`ContextBudget`](context::ContextBudget) estimation and the [`fit`](context::fit) reduction ladder |
//! | [`api`] | Retry with backoff, overflow detection, model token limits, trace ids |
//! | [`error`] | Typed errors for every stage boundary |

use crate::api::retry::MALFORMED_RESPONSE;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

pub mod agent;
pub mod api;
pub mod context;
pub mod error;
pub mod model;
pub mod prelude;
pub mod tools;

// Re-export the most commonly used types at the crate root.
pub use agent::{Pipeline, ResearchConfig, ResearchOutcome};
pub use error::{ModelError, ResearchError, ToolError};
pub use model::{CallStage, CompletionRequest, ModelClient};
pub use tools::core::{Tool, ToolSet};

// ── Constants ──────────────────────────────────────────────────────

/// OpenRouter chat completions endpoint.
pub const OPENROUTER_URL: &str = "https://openrouter.ai/api/v1/chat/completions";

/// Default model for every research stage.
pub const DEFAULT_MODEL: &str = "openai/gpt-4.1";

// ── Schema generation ──────────────────────────────────────────────

/// Generate a JSON Schema value for a type that derives [`schemars::JsonSchema`].
///
/// Used for tool parameter schemas so argument structs stay the single source
/// of truth for both deserialization and validation.
pub fn json_schema_for<T: schemars::JsonSchema>() -> serde_json::Value {
    let schema = schemars::schema_for!(T);
    serde_json::to_value(schema).unwrap_or_else(|_| serde_json::json!({"type": "object"}))
}

// ── Request types ──────────────────────────────────────────────────

/// Chat completion request body sent to OpenRouter.
#[derive(Serialize, Debug, Default)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<Message>,
    #[serde(skip_serializing_if = "is_zero_u32")]
    pub max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolDef>>,
    /// Forces a specific function call (`{"type":"function","function":{"name":..}}`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<serde_json::Value>,
}

fn is_zero_u32(v: &u32) -> bool {
    *v == 0
}

/// Build the OpenAI-format `tool_choice` value forcing one named function.
pub fn forced_tool_choice(name: &str) -> serde_json::Value {
    serde_json::json!({ "type": "function", "function": { "name": name } })
}

// ── Message types ──────────────────────────────────────────────────

/// Role of a message in the conversation.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Tool,
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageRole::System => write!(f, "system"),
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
            MessageRole::Tool => write!(f, "tool"),
        }
    }
}

/// A message in the conversation.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Message {
    pub role: MessageRole,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn assistant_text(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    /// An assistant turn requesting tool calls, optionally with accompanying text.
    pub fn assistant_tool_calls(content: Option<String>, calls: Vec<ToolCall>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content,
            tool_calls: Some(calls),
            tool_call_id: None,
        }
    }

    pub fn tool_result(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Tool,
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: Some(call_id.into()),
        }
    }

    /// Text content, or the empty string.
    pub fn text(&self) -> &str {
        self.content.as_deref().unwrap_or("")
    }

    pub fn is_tool_result(&self) -> bool {
        self.role == MessageRole::Tool
    }
}

// ── Tool types ─────────────────────────────────────────────────────

/// The type of a tool definition. Currently always `Function`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub enum ToolType {
    #[serde(rename = "function")]
    Function,
}

/// Tool definition sent to the API (OpenAI function-calling format).
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ToolDef {
    #[serde(rename = "type")]
    pub tool_type: ToolType,
    pub function: FunctionDef,
}

impl ToolDef {
    /// Create a function-calling tool definition.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
    ) -> Self {
        Self {
            tool_type: ToolType::Function,
            function: FunctionDef {
                name: name.into(),
                description: description.into(),
                parameters,
            },
        }
    }

    pub fn name(&self) -> &str {
        &self.function.name
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct FunctionDef {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// The type of a tool call. Currently always `Function`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub enum CallType {
    #[serde(rename = "function")]
    Function,
}

/// A tool call returned by the model.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub call_type: CallType,
    pub function: FunctionCallData,
}

impl ToolCall {
    /// Build a function tool call.
    pub fn function(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            call_type: CallType::Function,
            function: FunctionCallData {
                name: name.into(),
                arguments: arguments.into(),
            },
        }
    }

    pub fn name(&self) -> &str {
        &self.function.name
    }

    pub fn arguments(&self) -> &str {
        &self.function.arguments
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct FunctionCallData {
    pub name: String,
    pub arguments: String,
}

// ── Response types ─────────────────────────────────────────────────

/// Raw API response (internal deserialization target).
#[derive(Deserialize, Debug)]
struct RawChatResponse {
    choices: Option<Vec<RawChoice>>,
    error: Option<ApiErrorResponse>,
    #[serde(default)]
    usage: Option<UsageInfo>,
}

#[derive(Deserialize, Debug)]
struct RawChoice {
    message: RawResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Deserialize, Debug)]
struct RawResponseMessage {
    content: Option<String>,
    tool_calls: Option<Vec<ToolCall>>,
    reasoning: Option<String>,
}

#[derive(Deserialize, Debug)]
struct ApiErrorResponse {
    message: String,
}

/// A single model response: text, tool calls, or both.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatCompletion {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCall>,
    pub usage: Option<UsageInfo>,
    pub finish_reason: Option<String>,
    /// Reasoning / extended thinking content returned by the model.
    pub reasoning: Option<String>,
}

impl ChatCompletion {
    /// A text-only completion.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            finish_reason: Some("stop".into()),
            ..Default::default()
        }
    }

    /// A completion requesting the given tool calls.
    pub fn with_tool_calls(calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls: calls,
            finish_reason: Some("tool_calls".into()),
            ..Default::default()
        }
    }

    /// Non-empty trimmed text content, if any.
    pub fn non_empty_text(&self) -> Option<&str> {
        self.content
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

/// Token usage statistics.
#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
pub struct UsageInfo {
    pub prompt_tokens: Option<u32>,
    pub completion_tokens: Option<u32>,
    pub total_tokens: Option<u32>,
}

// ── Client ─────────────────────────────────────────────────────────

/// Async HTTP client for the OpenRouter chat completions API.
///
/// Implements [`ModelClient`](model::ModelClient); errors are classified into
/// [`ModelError`] variants at that boundary.
pub struct OpenRouterClient {
    pub(crate) client: reqwest::Client,
    pub(crate) api_key: String,
    pub(crate) referer: String,
    pub(crate) title: String,
}

impl OpenRouterClient {
    /// Create a new client with the given API key and default headers.
    pub fn new(api_key: impl Into<String>) -> Result<Self, String> {
        Self::with_headers(
            api_key,
            "https://github.com/tacryt-socryp/cinch-rs",
            "cinch-research",
        )
    }

    /// Create a new client with custom Referer and X-Title headers.
    pub fn with_headers(
        api_key: impl Into<String>,
        referer: impl Into<String>,
        title: impl Into<String>,
    ) -> Result<Self, String> {
        let client = reqwest::Client::builder()
            .user_agent("cinch-research/0.1")
            .timeout(Duration::from_secs(600))
            .build()
            .map_err(|e| format!("failed to build HTTP client: {e}"))?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            referer: referer.into(),
            title: title.into(),
        })
    }

    /// Send a chat completion request.
    pub async fn chat(&self, body: &ChatRequest) -> Result<ChatCompletion, String> {
        debug!(
            "LLM request: model={}, messages={}, tools={}, max_tokens={}",
            body.model,
            body.messages.len(),
            body.tools.as_ref().map_or(0, |t| t.len()),
            body.max_tokens,
        );
        trace!(
            "Request payload size: {} bytes",
            serde_json::to_string(body).map_or(0, |s| s.len())
        );

        let start = Instant::now();

        let resp = self
            .client
            .post(OPENROUTER_URL)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("HTTP-Referer", &self.referer)
            .header("X-Title", &self.title)
            .json(body)
            .send()
            .await
            .map_err(|e| format!("request failed: {e}"))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| format!("failed to read response: {e}"))?;

        debug!(
            "LLM response: HTTP {} in {:.1}s ({} bytes)",
            status,
            start.elapsed().as_secs_f64(),
            text.len()
        );

        if !status.is_success() {
            return Err(format!("OpenRouter API HTTP {status}: {text}"));
        }

        parse_chat_response(&text)
    }
}

/// Decode a successful OpenRouter response body.
fn parse_chat_response(text: &str) -> Result<ChatCompletion, String> {
    let parsed: RawChatResponse =
        serde_json::from_str(text).map_err(|e| format!("{MALFORMED_RESPONSE}: {e}"))?;

    if let Some(err) = parsed.error {
        return Err(format!("OpenRouter API error: {}", err.message));
    }

    if let Some(ref usage) = parsed.usage {
        debug!(
            "Token usage: prompt={}, completion={}, total={}",
            usage.prompt_tokens.unwrap_or(0),
            usage.completion_tokens.unwrap_or(0),
            usage.total_tokens.unwrap_or(0),
        );
    }

    match parsed.choices.and_then(|c| c.into_iter().next()) {
        Some(c) => Ok(ChatCompletion {
            content: c.message.content,
            tool_calls: c.message.tool_calls.unwrap_or_default(),
            usage: parsed.usage,
            finish_reason: c.finish_reason,
            reasoning: c.message.reasoning,
        }),
        None => {
            debug!("LLM output: empty (no choices)");
            Ok(ChatCompletion {
                usage: parsed.usage,
                ..Default::default()
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn undecodable_body_is_a_malformed_model_error() {
        let err = parse_chat_response("<html>502 Bad Gateway</html>").unwrap_err();
        assert!(matches!(ModelError::from_api_error(err), ModelError::Malformed(_)));
    }

    #[test]
    fn decodes_first_choice() {
        let body = r#"{"choices":[{"message":{"content":"hi"},"finish_reason":"stop"}]}"#;
        let completion = parse_chat_response(body).unwrap();
        assert_eq!(completion.content.as_deref(), Some("hi"));
        assert_eq!(completion.finish_reason.as_deref(), Some("stop"));
    }

    #[test]
    fn message_constructors_set_roles() {
        assert_eq!(Message::system("s").role, MessageRole::System);
        assert_eq!(Message::user("u").role, MessageRole::User);
        let tr = Message::tool_result("call_1", "out");
        assert!(tr.is_tool_result());
        assert_eq!(tr.tool_call_id.as_deref(), Some("call_1"));
    }

    #[test]
    fn chat_request_skips_empty_fields() {
        let body = ChatRequest {
            model: "m".into(),
            messages: vec![Message::user("hi")],
            ..Default::default()
        };
        let json = serde_json::to_value(&body).unwrap();
        assert!(json.get("max_tokens").is_none());
        assert!(json.get("tools").is_none());
        assert!(json.get("tool_choice").is_none());
    }

    #[test]
    fn forced_tool_choice_shape() {
        let v = forced_tool_choice("clarify_with_user");
        assert_eq!(v["function"]["name"], "clarify_with_user");
        assert_eq!(v["type"], "function");
    }

    #[test]
    fn non_empty_text_trims() {
        assert_eq!(ChatCompletion::text("  ").non_empty_text(), None);
        assert_eq!(ChatCompletion::text(" brief ").non_empty_text(), Some("brief"));
    }

    #[test]
    fn tool_call_roundtrips_openai_shape() {
        let call = ToolCall::function("c1", "web_search", r#"{"queries":["x"]}"#);
        let json = serde_json::to_value(&call).unwrap();
        assert_eq!(json["type"], "function");
        assert_eq!(json["function"]["name"], "web_search");
    }
}
