//! Optional knowledge store: a one-way sink for integrated findings.
//!
//! After each integration step the supervisor records every successful note
//! in the background. Recording is best-effort: failures are logged and
//! never reach the pipeline.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// One integrated finding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeRecord {
    /// Trace id of the run that produced the finding.
    pub run_id: String,
    pub topic: String,
    pub findings: String,
    /// RFC 3339 timestamp.
    pub recorded_at: String,
}

impl KnowledgeRecord {
    pub fn new(run_id: &str, topic: &str, findings: &str) -> Self {
        Self {
            run_id: run_id.to_string(),
            topic: topic.to_string(),
            findings: findings.to_string(),
            recorded_at: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// A sink for findings. Implementations swallow their own errors.
pub trait KnowledgeStore: Send + Sync {
    fn record(&self, record: KnowledgeRecord) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;
}

/// Discards every record.
pub struct NoopKnowledgeStore;

impl KnowledgeStore for NoopKnowledgeStore {
    fn record(&self, _record: KnowledgeRecord) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async {})
    }
}

/// Appends records as JSON lines to a file.
pub struct JsonlKnowledgeStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlKnowledgeStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn append(&self, record: &KnowledgeRecord) -> Result<(), String> {
        let mut line =
            serde_json::to_string(record).map_err(|e| format!("Failed to serialize record: {e}"))?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| format!("Failed to create knowledge dir: {e}"))?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| format!("Failed to open {}: {e}", self.path.display()))?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| format!("Failed to write knowledge record: {e}"))?;
        file.flush()
            .await
            .map_err(|e| format!("Failed to flush knowledge record: {e}"))
    }
}

impl KnowledgeStore for JsonlKnowledgeStore {
    fn record(&self, record: KnowledgeRecord) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            match self.append(&record).await {
                Ok(()) => debug!("Recorded knowledge for '{}'", record.topic),
                Err(e) => warn!("Knowledge store write failed: {e}"),
            }
        })
    }
}
