//! Remote lookup tools backed by a plain HTTP GET endpoint.
//!
//! Domain-specific data services (financial statements, company profiles,
//! economic calendars) are exposed to researchers by name. Each
//! [`RemoteLookup`] maps one tool name to one endpoint; the model's
//! arguments become query parameters.

use crate::ToolDef;
use crate::error::ToolError;
use crate::tools::core::{DEFAULT_MAX_RESULT_BYTES, Tool, ToolFuture, truncate_result};
use serde::Deserialize;
use std::time::Duration;

/// Declarative description of a remote lookup, loadable from a config file.
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct RemoteToolConfig {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Endpoint URL. Arguments are appended as a query string.
    pub url: String,
}

/// A tool that forwards its arguments to an HTTP endpoint.
pub struct RemoteLookup {
    config: RemoteToolConfig,
    max_result_bytes: usize,
}

impl RemoteLookup {
    pub fn new(config: RemoteToolConfig) -> Self {
        Self {
            config,
            max_result_bytes: DEFAULT_MAX_RESULT_BYTES,
        }
    }

    pub fn max_result_bytes(mut self, max: usize) -> Self {
        self.max_result_bytes = max;
        self
    }

    /// Endpoint URL with arguments encoded as query parameters.
    fn request_url(&self, arguments: &str) -> Result<String, ToolError> {
        let params: serde_json::Map<String, serde_json::Value> = serde_json::from_str(arguments)
            .map_err(|e| {
                ToolError::Failed(format!(
                    "Error calling tool {}: arguments must be a JSON object ({e})",
                    self.config.name
                ))
            })?;
        if params.is_empty() {
            return Ok(self.config.url.clone());
        }
        let query: Vec<String> = params
            .iter()
            .map(|(k, v)| {
                let value = match v {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                format!("{}={}", urlencoded(k), urlencoded(&value))
            })
            .collect();
        let sep = if self.config.url.contains('?') { '&' } else { '?' };
        Ok(format!("{}{sep}{}", self.config.url, query.join("&")))
    }
}

impl Tool for RemoteLookup {
    fn definition(&self) -> ToolDef {
        let description = self
            .config
            .description
            .clone()
            .unwrap_or_else(|| format!("Financial tool: {}", self.config.name));
        ToolDef::new(
            self.config.name.clone(),
            description,
            serde_json::json!({
                "type": "object",
                "additionalProperties": { "type": ["string", "number", "boolean"] }
            }),
        )
    }

    fn execute(&self, arguments: &str) -> ToolFuture<'_> {
        let url = self.request_url(arguments);
        Box::pin(async move {
            let url = url?;
            let name = &self.config.name;
            let client = reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .map_err(|e| ToolError::Unavailable(format!("Error calling tool {name}: {e}")))?;
            let resp = client
                .get(&url)
                .send()
                .await
                .map_err(|e| ToolError::Failed(format!("Error calling tool {name}: {e}")))?;
            let status = resp.status();
            if !status.is_success() {
                return Err(ToolError::Failed(format!(
                    "Error calling tool {name}: HTTP {}",
                    status.as_u16()
                )));
            }
            let body = resp
                .text()
                .await
                .map_err(|e| ToolError::Failed(format!("Error calling tool {name}: {e}")))?;
            Ok(truncate_result(body, self.max_result_bytes))
        })
    }
}

/// Minimal percent-encoding for URL query parameters.
fn urlencoded(s: &str) -> String {
    let mut out = String::with_capacity(s.len() * 3);
    for b in s.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(b as char);
            }
            b' ' => out.push('+'),
            _ => out.push_str(&format!("%{b:02X}")),
        }
    }
    out
}
