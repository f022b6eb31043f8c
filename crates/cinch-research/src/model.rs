//! The model capability consumed by every research stage.
//!
//! Stages never talk to an HTTP client directly. They build a
//! [`CompletionRequest`] and hand it to a [`ModelClient`], which returns a
//! [`ChatCompletion`] or a classified [`ModelError`]. [`OpenRouterClient`]
//! is the production implementation; [`FnModel`] wraps a closure for tests
//! and custom backends.

pub use crate::error::ModelError;
use crate::{ChatCompletion, ChatRequest, Message, OpenRouterClient, ToolDef, forced_tool_choice};
use std::fmt;
use std::future::Future;
use std::pin::Pin;

/// Boxed future returned by [`ModelClient::complete`].
pub type ModelFuture<'a> = Pin<Box<dyn Future<Output = Result<ChatCompletion, ModelError>> + Send + 'a>>;

/// Which pipeline step issued a model call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallStage {
    Clarify,
    Brief,
    Supervisor,
    Researcher,
    Compress,
    Report,
}

impl fmt::Display for CallStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            CallStage::Clarify => "clarify",
            CallStage::Brief => "brief",
            CallStage::Supervisor => "supervisor",
            CallStage::Researcher => "researcher",
            CallStage::Compress => "compress",
            CallStage::Report => "report",
        };
        f.write_str(label)
    }
}

/// One model invocation: an ordered conversation plus optional callable tools.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub stage: CallStage,
    pub model: String,
    pub messages: Vec<Message>,
    pub tools: Vec<ToolDef>,
    /// Name of a tool the model must call (structured output).
    pub forced_tool: Option<String>,
    pub max_tokens: u32,
}

impl CompletionRequest {
    pub fn new(stage: CallStage, model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            stage,
            model: model.into(),
            messages,
            tools: Vec::new(),
            forced_tool: None,
            max_tokens: 0,
        }
    }

    pub fn with_tools(mut self, tools: Vec<ToolDef>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_forced_tool(mut self, name: impl Into<String>) -> Self {
        self.forced_tool = Some(name.into());
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Whether a tool with this name is offered.
    pub fn offers_tool(&self, name: &str) -> bool {
        self.tools.iter().any(|t| t.name() == name)
    }

    /// Convert into the OpenRouter wire format.
    pub fn to_chat_request(&self) -> ChatRequest {
        ChatRequest {
            model: self.model.clone(),
            messages: self.messages.clone(),
            max_tokens: self.max_tokens,
            temperature: None,
            tools: (!self.tools.is_empty()).then(|| self.tools.clone()),
            tool_choice: self.forced_tool.as_deref().map(forced_tool_choice),
        }
    }
}

/// A language model that completes conversations, optionally calling tools.
///
/// Implementations must report context-window overflow as
/// [`ModelError::ContextOverflow`] so stages can shrink their input and retry.
pub trait ModelClient: Send + Sync {
    fn complete<'a>(&'a self, request: &'a CompletionRequest) -> ModelFuture<'a>;
}

impl ModelClient for OpenRouterClient {
    fn complete<'a>(&'a self, request: &'a CompletionRequest) -> ModelFuture<'a> {
        Box::pin(async move {
            let body = request.to_chat_request();
            self.chat(&body).await.map_err(ModelError::from_api_error)
        })
    }
}

/// Type-erased async handler for [`FnModel`].
type ErasedModelHandler = Box<
    dyn Fn(CompletionRequest) -> Pin<Box<dyn Future<Output = Result<ChatCompletion, ModelError>> + Send>>
        + Send
        + Sync,
>;

/// A closure-backed [`ModelClient`].
///
/// ```ignore
/// let model = FnModel::new(|request: CompletionRequest| async move {
///     match request.stage {
///         CallStage::Brief => Ok(ChatCompletion::text("Research the topic.")),
///         _ => Ok(ChatCompletion::text("done")),
///     }
/// });
/// ```
pub struct FnModel {
    handler: ErasedModelHandler,
}

impl FnModel {
    pub fn new<F, Fut>(handler: F) -> Self
    where
        F: Fn(CompletionRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ChatCompletion, ModelError>> + Send + 'static,
    {
        Self {
            handler: Box::new(move |request| Box::pin(handler(request))),
        }
    }
}

impl ModelClient for FnModel {
    fn complete<'a>(&'a self, request: &'a CompletionRequest) -> ModelFuture<'a> {
        (self.handler)(request.clone())
    }
}

impl fmt::Debug for FnModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnModel").finish_non_exhaustive()
    }
}
