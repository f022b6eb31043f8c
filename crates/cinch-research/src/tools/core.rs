//! Tool abstraction and dispatch.
//!
//! The [`Tool`] trait is the tool capability researchers consume: a static
//! definition (name, description, JSON schema) and an async `execute` that
//! returns a text observation or a [`ToolError`]. Tools are collected into a
//! [`ToolSet`], a dispatch table keyed by tool name that validates arguments
//! against the declared schema before invocation and applies per-call
//! timeouts and result truncation.

use crate::ToolDef;
use crate::error::ToolError;
use schemars::JsonSchema;
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace};

/// Maximum size (in bytes) for tool output before truncation.
pub const DEFAULT_MAX_RESULT_BYTES: usize = 30_000;

/// Default timeout for a single tool call.
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(60);

/// Boxed future returned by [`Tool::execute`].
pub type ToolFuture<'a> = Pin<Box<dyn Future<Output = Result<String, ToolError>> + Send + 'a>>;

// ── Tool trait ─────────────────────────────────────────────────────

/// A tool that a researcher can invoke via function-calling.
///
/// # Example
///
/// ```ignore
/// struct CompanyFacts;
///
/// impl Tool for CompanyFacts {
///     fn definition(&self) -> ToolDef { /* ... */ }
///
///     fn execute(&self, arguments: &str) -> ToolFuture<'_> {
///         let arguments = arguments.to_string();
///         Box::pin(async move {
///             let args: FactsArgs = parse_tool_args(&arguments)?;
///             lookup(&args.ticker).await.map_err(ToolError::Failed)
///         })
///     }
/// }
/// ```
pub trait Tool: Send + Sync {
    /// The tool definition sent to the model.
    fn definition(&self) -> ToolDef;

    /// Execute the tool with the given raw JSON arguments string.
    ///
    /// Recoverable problems (bad arguments, a failed HTTP call) are
    /// [`ToolError::Failed`] and reach the model as an observation. Return
    /// [`ToolError::Unavailable`] only when the backing service is down for
    /// good, e.g. missing credentials.
    fn execute(&self, arguments: &str) -> ToolFuture<'_>;

    /// The tool's name (convenience — delegates to definition).
    fn name(&self) -> String {
        self.definition().function.name
    }
}

// ── ToolSet ────────────────────────────────────────────────────────

/// A collection of tools dispatched by name.
///
/// ```ignore
/// let tools = ToolSet::new()
///     .with_max_result_bytes(15_000)
///     .with_timeout(Some(Duration::from_secs(30)))
///     .with(WebSearch::new())
///     .with_if(fetch_enabled, FetchUrl::new())
///     .with(ThinkTool);
/// ```
pub struct ToolSet {
    tools: HashMap<String, Box<dyn Tool>>,
    max_result_bytes: usize,
    validate_args: bool,
    timeout: Option<Duration>,
}

impl fmt::Debug for ToolSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolSet")
            .field("tools", &self.names())
            .field("max_result_bytes", &self.max_result_bytes)
            .finish()
    }
}

impl ToolSet {
    /// Create an empty tool set with validation on and the default timeout.
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
            max_result_bytes: DEFAULT_MAX_RESULT_BYTES,
            validate_args: true,
            timeout: Some(DEFAULT_TOOL_TIMEOUT),
        }
    }

    /// Set the maximum result size in bytes before truncation.
    pub fn with_max_result_bytes(mut self, max: usize) -> Self {
        self.max_result_bytes = max;
        self
    }

    /// Toggle JSON Schema argument validation before execution.
    pub fn with_arg_validation(mut self, enabled: bool) -> Self {
        self.validate_args = enabled;
        self
    }

    /// Set the per-call timeout. `None` disables timeouts.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.tools.insert(tool.name(), Box::new(tool));
    }

    /// Register a tool (builder pattern).
    pub fn with(mut self, tool: impl Tool + 'static) -> Self {
        self.register(tool);
        self
    }

    /// Conditionally register a tool (builder pattern).
    pub fn with_if(self, condition: bool, tool: impl Tool + 'static) -> Self {
        if condition { self.with(tool) } else { self }
    }

    /// All tool definitions, sorted by name so requests are stable.
    pub fn definitions(&self) -> Vec<ToolDef> {
        let mut defs: Vec<ToolDef> = self.tools.values().map(|t| t.definition()).collect();
        defs.sort_by(|a, b| a.function.name.cmp(&b.function.name));
        defs
    }

    /// Registered tool names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Execute a tool call by name.
    ///
    /// Unknown names, schema violations and timeouts come back as
    /// [`ToolError::Failed`] so the model can correct itself. Successful
    /// output is truncated to `max_result_bytes`.
    pub async fn execute(&self, name: &str, arguments: &str) -> Result<String, ToolError> {
        self.execute_within(name, arguments, self.timeout).await
    }

    /// [`execute`](Self::execute) with `timeout` in place of the set's own limit.
    pub async fn execute_within(
        &self,
        name: &str,
        arguments: &str,
        timeout: Option<Duration>,
    ) -> Result<String, ToolError> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| ToolError::Failed(format!("unknown tool '{name}'")))?;

        if self.validate_args {
            validate_arguments(name, &tool.definition().function.parameters, arguments)
                .map_err(ToolError::Failed)?;
        }

        log_tool_call(name, arguments);
        let start = Instant::now();

        let result = match timeout {
            Some(limit) => match tokio::time::timeout(limit, tool.execute(arguments)).await {
                Ok(r) => r,
                Err(_) => {
                    info!(
                        "Tool {name} timed out after {:.1}s (limit: {:.0}s)",
                        start.elapsed().as_secs_f64(),
                        limit.as_secs_f64(),
                    );
                    Err(ToolError::Failed(format!(
                        "tool '{name}' timed out after {:.0} seconds; try narrower arguments",
                        limit.as_secs_f64(),
                    )))
                }
            },
            None => tool.execute(arguments).await,
        };

        match &result {
            Ok(output) => {
                debug!(
                    "Tool {name} completed in {:.0}ms ({} bytes)",
                    start.elapsed().as_secs_f64() * 1000.0,
                    output.len()
                );
                trace!(
                    "Tool {name} result preview: {}",
                    output.chars().take(300).collect::<String>()
                );
            }
            Err(e) => debug!("Tool {name} failed: {e}"),
        }

        result.map(|output| truncate_result(output, self.max_result_bytes))
    }
}

impl Default for ToolSet {
    fn default() -> Self {
        Self::new()
    }
}

// ── FnTool ────────────────────────────────────────────────────────

/// Type-erased async handler for [`FnTool`].
type ErasedToolHandler = Box<
    dyn Fn(String) -> Pin<Box<dyn Future<Output = Result<String, ToolError>> + Send>> + Send + Sync,
>;

/// A closure-based tool that auto-parses arguments and delegates to a handler.
///
/// Use for stateless lookups and in tests; tools that hold clients or
/// configuration read better as a struct implementing [`Tool`].
///
/// ```ignore
/// #[derive(Deserialize, JsonSchema)]
/// struct QuoteArgs {
///     /// Stock ticker symbol.
///     symbol: String,
/// }
///
/// let tool = FnTool::new(
///     ToolDef::new("stock_quote", "Latest quote for a ticker", json_schema_for::<QuoteArgs>()),
///     |args: QuoteArgs| async move { Ok(format!("{}: 123.45", args.symbol)) },
/// );
/// ```
pub struct FnTool {
    def: ToolDef,
    handler: ErasedToolHandler,
}

impl FnTool {
    pub fn new<A, F, Fut>(def: ToolDef, handler: F) -> Self
    where
        A: serde::de::DeserializeOwned + Send + 'static,
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<String, ToolError>> + Send + 'static,
    {
        let erased = move |raw: String| -> Pin<Box<dyn Future<Output = Result<String, ToolError>> + Send>> {
            match parse_tool_args::<A>(&raw) {
                Ok(args) => Box::pin(handler(args)),
                Err(e) => Box::pin(async move { Err(e) }),
            }
        };
        Self {
            def,
            handler: Box::new(erased),
        }
    }
}

impl Tool for FnTool {
    fn definition(&self) -> ToolDef {
        self.def.clone()
    }

    fn execute(&self, arguments: &str) -> ToolFuture<'_> {
        (self.handler)(arguments.to_string())
    }
}

impl fmt::Debug for FnTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnTool")
            .field("name", &self.def.function.name)
            .finish()
    }
}

// ── Helpers ────────────────────────────────────────────────────────

/// Validate raw JSON arguments against a tool's parameter schema.
///
/// The error string is written for the model to read and self-correct.
pub fn validate_arguments(
    name: &str,
    schema: &serde_json::Value,
    arguments: &str,
) -> Result<(), String> {
    let value: serde_json::Value = serde_json::from_str(arguments).map_err(|e| {
        format!(
            "invalid JSON arguments for tool '{name}': {e}. \
             Provide valid JSON matching the tool's parameter schema."
        )
    })?;

    // An unusable schema skips validation rather than blocking the tool.
    let Ok(validator) = jsonschema::validator_for(schema) else {
        return Ok(());
    };

    let errors: Vec<String> = validator
        .iter_errors(&value)
        .map(|e| format!("  - {}: {e}", e.instance_path()))
        .collect();

    if errors.is_empty() {
        Ok(())
    } else {
        Err(format!(
            "argument validation failed for tool '{name}':\n{}\nFix the arguments and try again.",
            errors.join("\n")
        ))
    }
}

/// Log a tool call at INFO level with a truncated preview of arguments.
pub fn log_tool_call(name: &str, arguments: &str) {
    let preview: String = arguments.chars().take(120).collect();
    info!(
        "[tool] {}({preview}{})",
        name,
        if arguments.chars().count() > 120 { "..." } else { "" }
    );
    trace!("[tool] {name} arguments: {arguments}");
}

/// Truncate a string to at most `max` bytes on a char boundary, appending a notice.
pub fn truncate_result(mut s: String, max: usize) -> String {
    if s.len() <= max {
        return s;
    }
    let total = s.len();
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    s.truncate(end);
    s.push_str(&format!("...\n[truncated: {total} bytes total]"));
    s
}

/// Parse raw JSON arguments into a typed struct.
pub fn parse_tool_args<T: serde::de::DeserializeOwned>(arguments: &str) -> Result<T, ToolError> {
    serde_json::from_str(arguments).map_err(|e| {
        ToolError::Failed(format!(
            "invalid tool arguments: {e}. Provide valid JSON matching the tool's parameter schema."
        ))
    })
}

// ── Pseudo-tools ───────────────────────────────────────────────────

/// Name of the researcher's private reasoning tool.
pub const THINK_TOOL: &str = "think";

/// A scratchpad tool for reflecting between searches. It touches no
/// external state; the reflection is echoed back into the transcript.
pub struct ThinkTool;

/// Typed arguments for the `think` pseudo-tool.
#[derive(Deserialize, JsonSchema)]
pub struct ThinkArgs {
    /// Your reflection on what was found, what is missing, and what to do next.
    pub reflection: String,
}

impl Tool for ThinkTool {
    fn definition(&self) -> ToolDef {
        ToolDef::new(
            THINK_TOOL,
            "Record a reflection on research progress. Use after each search to assess \
             what you found, what gaps remain, and whether to continue. Performs no action.",
            crate::json_schema_for::<ThinkArgs>(),
        )
    }

    fn execute(&self, arguments: &str) -> ToolFuture<'_> {
        let arguments = arguments.to_string();
        Box::pin(async move {
            let args: ThinkArgs = parse_tool_args(&arguments)?;
            Ok(format!("Reflection recorded: {}", args.reflection))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::json_schema_for;

    #[derive(Deserialize, JsonSchema)]
    struct EchoArgs {
        text: String,
    }

    fn echo_tool() -> FnTool {
        FnTool::new(
            ToolDef::new("echo", "Echo text", json_schema_for::<EchoArgs>()),
            |args: EchoArgs| async move { Ok(args.text) },
        )
    }

    struct SlowTool;

    impl Tool for SlowTool {
        fn definition(&self) -> ToolDef {
            ToolDef::new("slow", "Sleeps", serde_json::json!({"type": "object"}))
        }

        fn execute(&self, _arguments: &str) -> ToolFuture<'_> {
            Box::pin(async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok("late".to_string())
            })
        }
    }

    #[tokio::test]
    async fn dispatches_by_name() {
        let tools = ToolSet::new().with(echo_tool());
        let out = tools.execute("echo", r#"{"text":"hello"}"#).await;
        assert_eq!(out, Ok("hello".to_string()));
    }

    #[tokio::test]
    async fn unknown_tool_is_recoverable_error() {
        let tools = ToolSet::new();
        let err = tools.execute("nope", "{}").await.unwrap_err();
        assert!(matches!(err, ToolError::Failed(ref m) if m.contains("unknown tool 'nope'")));
    }

    #[tokio::test]
    async fn schema_violation_rejected_before_execution() {
        let tools = ToolSet::new().with(echo_tool());
        let err = tools.execute("echo", r#"{"wrong":1}"#).await.unwrap_err();
        assert!(matches!(err, ToolError::Failed(ref m) if m.contains("validation failed")));
    }

    #[tokio::test]
    async fn invalid_json_rejected() {
        let tools = ToolSet::new().with(echo_tool());
        let err = tools.execute("echo", "not json").await.unwrap_err();
        assert!(matches!(err, ToolError::Failed(ref m) if m.contains("invalid JSON")));
    }

    #[tokio::test]
    async fn timeout_becomes_failed_observation() {
        let tools = ToolSet::new()
            .with_timeout(Some(Duration::from_millis(20)))
            .with(SlowTool);
        let err = tools.execute("slow", "{}").await.unwrap_err();
        assert!(matches!(err, ToolError::Failed(ref m) if m.contains("timed out")));
    }

    #[tokio::test]
    async fn caller_timeout_overrides_the_set_limit() {
        let tools = ToolSet::new().with_timeout(None).with(SlowTool);
        let err = tools
            .execute_within("slow", "{}", Some(Duration::from_millis(20)))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Failed(ref m) if m.contains("timed out")));
    }

    #[tokio::test]
    async fn output_truncated_to_limit() {
        let tools = ToolSet::new().with_max_result_bytes(10).with(echo_tool());
        let out = tools
            .execute("echo", r#"{"text":"abcdefghijklmnopqrstuvwxyz"}"#)
            .await
            .unwrap();
        assert!(out.starts_with("abcdefghij..."));
        assert!(out.contains("[truncated: 26 bytes total]"));
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        let out = truncate_result("ééééé".to_string(), 3);
        assert!(out.starts_with("é..."));
    }

    #[tokio::test]
    async fn think_tool_records_reflection() {
        let tools = ToolSet::new().with(ThinkTool);
        let out = tools
            .execute(THINK_TOOL, r#"{"reflection":"need 2024 figures"}"#)
            .await
            .unwrap();
        assert_eq!(out, "Reflection recorded: need 2024 figures");
    }

    #[test]
    fn definitions_sorted_by_name() {
        let tools = ToolSet::new().with(ThinkTool).with(echo_tool());
        let names: Vec<String> = tools
            .definitions()
            .into_iter()
            .map(|d| d.function.name)
            .collect();
        assert_eq!(names, vec!["echo".to_string(), "think".to_string()]);
    }
}
