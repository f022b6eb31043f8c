//! Web tools: search via the Tavily API and plain page fetches.
//!
//! | Tool | Name | Description |
//! |------|------|-------------|
//! | [`WebSearch`] | `web_search` | Run one or more queries, deduplicate hits by URL |
//! | [`FetchUrl`] | `fetch_url` | Download a page and return it as Markdown |

use crate::ToolDef;
use crate::error::ToolError;
use crate::tools::core::{DEFAULT_MAX_RESULT_BYTES, Tool, ToolFuture, parse_tool_args, truncate_result};
use schemars::JsonSchema;
use serde::Deserialize;
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, warn};

const TAVILY_URL: &str = "https://api.tavily.com/search";

/// Environment variable holding the Tavily API key.
pub const TAVILY_KEY_ENV: &str = "TAVILY_API_KEY";

// ── WebSearch ──────────────────────────────────────────────────────

/// Typed arguments for `web_search`.
#[derive(Deserialize, JsonSchema)]
pub struct WebSearchArgs {
    /// One or more specific search queries. Several related queries can run at once.
    pub queries: Vec<String>,
}

/// One search hit.
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct SearchHit {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub content: String,
}

#[derive(Deserialize, Debug)]
struct TavilyResponse {
    #[serde(default)]
    results: Vec<SearchHit>,
}

/// Search the web through the Tavily API.
///
/// Requires `TAVILY_API_KEY`. Without it every call returns
/// [`ToolError::Unavailable`].
pub struct WebSearch {
    max_results: u32,
    topic: String,
    max_result_bytes: usize,
}

impl Default for WebSearch {
    fn default() -> Self {
        Self::new()
    }
}

impl WebSearch {
    pub fn new() -> Self {
        Self {
            max_results: 5,
            topic: "general".into(),
            max_result_bytes: DEFAULT_MAX_RESULT_BYTES,
        }
    }

    /// Results requested per query.
    pub fn max_results(mut self, n: u32) -> Self {
        self.max_results = n;
        self
    }

    /// Tavily topic filter: `general`, `news`, or `finance`.
    pub fn topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = topic.into();
        self
    }

    pub fn max_result_bytes(mut self, max: usize) -> Self {
        self.max_result_bytes = max;
        self
    }
}

impl Tool for WebSearch {
    fn definition(&self) -> ToolDef {
        ToolDef::new(
            "web_search",
            "A search engine optimized for comprehensive, accurate, and trusted results. \
             Use for current events, figures, and facts you need to verify. Returns titles, \
             URLs, and content snippets, deduplicated by URL.",
            crate::json_schema_for::<WebSearchArgs>(),
        )
    }

    fn execute(&self, arguments: &str) -> ToolFuture<'_> {
        let arguments = arguments.to_string();
        Box::pin(async move {
            let args: WebSearchArgs = parse_tool_args(&arguments)?;
            if args.queries.is_empty() {
                return Err(ToolError::Failed("'queries' must not be empty".into()));
            }
            let api_key = std::env::var(TAVILY_KEY_ENV)
                .map_err(|_| ToolError::Unavailable(format!("{TAVILY_KEY_ENV} not set")))?;
            let client = http_client()?;

            let searches = args
                .queries
                .iter()
                .map(|q| tavily_search(&client, &api_key, q, self.max_results, &self.topic));
            let responses = futures::future::join_all(searches).await;

            let mut batches = Vec::with_capacity(responses.len());
            let mut failures = Vec::new();
            for (query, response) in args.queries.iter().zip(responses) {
                match response {
                    Ok(hits) => batches.push((query.clone(), hits)),
                    Err(e) => {
                        warn!("Search for '{query}' failed: {e}");
                        failures.push(format!("'{query}': {e}"));
                    }
                }
            }
            if batches.is_empty() {
                return Err(ToolError::Failed(format!(
                    "web search failed: {}",
                    failures.join("; ")
                )));
            }

            let mut out = format_search_results(&batches);
            for failure in failures {
                out.push_str(&format!("\n---\nSearch Error: {failure}\n"));
            }
            Ok(truncate_result(out, self.max_result_bytes))
        })
    }
}

fn http_client() -> Result<reqwest::Client, ToolError> {
    reqwest::Client::builder()
        .user_agent("cinch-research/0.1")
        .timeout(Duration::from_secs(30))
        .build()
        .map_err(|e| ToolError::Unavailable(format!("failed to build HTTP client: {e}")))
}

async fn tavily_search(
    client: &reqwest::Client,
    api_key: &str,
    query: &str,
    max_results: u32,
    topic: &str,
) -> Result<Vec<SearchHit>, String> {
    let body = serde_json::json!({
        "query": query,
        "max_results": max_results,
        "topic": topic,
    });
    let resp = client
        .post(TAVILY_URL)
        .header("Authorization", format!("Bearer {api_key}"))
        .json(&body)
        .send()
        .await
        .map_err(|e| format!("request failed: {e}"))?;

    let status = resp.status();
    if !status.is_success() {
        let text = resp.text().await.unwrap_or_default();
        return Err(format!("HTTP {status}: {text}"));
    }
    let parsed: TavilyResponse = resp
        .json()
        .await
        .map_err(|e: reqwest::Error| format!("failed to parse response: {e}"))?;
    debug!("Search '{query}' returned {} hit(s)", parsed.results.len());
    Ok(parsed.results)
}

/// Format search hits as `Title/URL/Content` blocks, keeping the first hit per URL.
pub fn format_search_results(batches: &[(String, Vec<SearchHit>)]) -> String {
    let mut seen = HashSet::new();
    let mut blocks = Vec::new();
    for (_query, hits) in batches {
        for hit in hits {
            if !hit.url.is_empty() && !seen.insert(hit.url.as_str()) {
                continue;
            }
            blocks.push(format!(
                "Title: {}\nURL: {}\nContent: {}\n",
                if hit.title.is_empty() { "No title" } else { &hit.title },
                if hit.url.is_empty() { "No URL" } else { &hit.url },
                if hit.content.is_empty() {
                    "No content available"
                } else {
                    &hit.content
                },
            ));
        }
    }
    if blocks.is_empty() {
        return "No results found.".to_string();
    }
    format!("\n{}", blocks.join("\n---\n"))
}

// ── FetchUrl ───────────────────────────────────────────────────────

/// Typed arguments for `fetch_url`.
#[derive(Deserialize, JsonSchema)]
pub struct FetchUrlArgs {
    /// Absolute http(s) URL to download.
    pub url: String,
}

/// Download a page and return its visible text.
pub struct FetchUrl {
    max_result_bytes: usize,
}

impl Default for FetchUrl {
    fn default() -> Self {
        Self::new()
    }
}

impl FetchUrl {
    pub fn new() -> Self {
        Self {
            max_result_bytes: DEFAULT_MAX_RESULT_BYTES,
        }
    }

    pub fn max_result_bytes(mut self, max: usize) -> Self {
        self.max_result_bytes = max;
        self
    }
}

impl Tool for FetchUrl {
    fn definition(&self) -> ToolDef {
        ToolDef::new(
            "fetch_url",
            "Download a web page found via web_search and return its visible text. \
             Use when a search snippet is too short to answer the question.",
            crate::json_schema_for::<FetchUrlArgs>(),
        )
    }

    fn execute(&self, arguments: &str) -> ToolFuture<'_> {
        let arguments = arguments.to_string();
        Box::pin(async move {
            let args: FetchUrlArgs = parse_tool_args(&arguments)?;
            if !(args.url.starts_with("http://") || args.url.starts_with("https://")) {
                return Err(ToolError::Failed(format!(
                    "'{}' is not an http(s) URL",
                    args.url
                )));
            }
            let client = http_client()?;
            let resp = client
                .get(&args.url)
                .send()
                .await
                .map_err(|e| ToolError::Failed(format!("fetch failed: {e}")))?;
            let status = resp.status();
            if !status.is_success() {
                return Err(ToolError::Failed(format!(
                    "fetch of {} returned HTTP {status}",
                    args.url
                )));
            }
            let body = resp
                .text()
                .await
                .map_err(|e| ToolError::Failed(format!("failed to read body: {e}")))?;
            Ok(truncate_result(html_to_text(&body)?, self.max_result_bytes))
        })
    }
}

/// Convert a page to Markdown, skipping `<script>` and `<style>` blocks.
pub fn html_to_text(html: &str) -> Result<String, ToolError> {
    let converter = htmd::HtmlToMarkdown::builder()
        .skip_tags(vec!["script", "style", "noscript"])
        .build();
    let text = converter
        .convert(html)
        .map_err(|e| ToolError::Failed(format!("failed to convert page: {e}")))?;
    Ok(text.trim().to_string())
}
