//! Tool capability for researchers.
//!
//! Every external capability a researcher can use (web search, page fetches,
//! remote data lookups) is a [`Tool`] implementor collected into a
//! [`ToolSet`]. The set is the dispatch table: tools are looked up by name and
//! their arguments are validated against the declared JSON schema before the
//! call runs. Failures come back as [`ToolError`](crate::error::ToolError)
//! values, never panics.
//!
//! # Defining tools
//!
//! - **[`FnTool`]** — closure-based, auto-parses arguments.
//! - **`impl Tool`** — a struct with [`Tool::definition()`] and
//!   [`Tool::execute()`], for tools that hold clients or configuration.
//!
//! # Submodules
//!
//! - [`core`] — [`Tool`], [`ToolSet`], [`FnTool`], the [`ThinkTool`] pseudo-tool.
//! - [`web`] — [`WebSearch`] (Tavily) and [`FetchUrl`].
//! - [`remote`] — [`RemoteLookup`] for named HTTP GET data services.

pub mod core;
pub mod remote;
pub mod web;

pub use self::core::{
    DEFAULT_MAX_RESULT_BYTES, DEFAULT_TOOL_TIMEOUT, FnTool, THINK_TOOL, ThinkTool, Tool,
    ToolFuture, ToolSet, parse_tool_args, validate_arguments,
};
pub use crate::error::ToolError;
pub use remote::{RemoteLookup, RemoteToolConfig};
pub use web::{FetchUrl, WebSearch};
