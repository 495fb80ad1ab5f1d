// Search Gateway - adapts the external graph-retrieval library's
// global/local search into a cancellable, bounded HTTP handler (§4.5),
// fronting it as a subprocess in "query" mode (§4.5a), reusing the same
// subprocess-supervision primitives as the Index Job Supervisor.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::contracts::{ArtifactStore, SearchBackend, SearchOutcome};
use crate::error::AppError;
use crate::validation::query as validate;

const DEFAULT_COMMUNITY_LEVEL: u32 = 2;
const DEFAULT_RESPONSE_TYPE: &str = "Multiple Paragraphs";

pub struct SubprocessSearchBackend {
    indexer_bin: String,
    backend_root: PathBuf,
}

impl SubprocessSearchBackend {
    pub fn new(indexer_bin: String, backend_root: PathBuf) -> Self {
        Self {
            indexer_bin,
            backend_root,
        }
    }

    async fn run_query(
        &self,
        method: &str,
        query: &str,
        community_level: u32,
        response_type: &str,
        deadline: Duration,
    ) -> Result<SearchOutcome, AppError> {
        let mut child = Command::new(&self.indexer_bin)
            .arg("query")
            .arg("--root")
            .arg(&self.backend_root)
            .arg("--method")
            .arg(method)
            .arg("--community-level")
            .arg(community_level.to_string())
            .arg("--response-type")
            .arg(response_type)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .spawn()
            .map_err(|e| AppError::upstream(format!("failed to spawn search subprocess: {e}")))?;

        if let Some(mut stdin) = child.stdin.take() {
            let _ = stdin.write_all(query.as_bytes()).await;
        }

        let output = tokio::time::timeout(deadline, child.wait_with_output()).await;
        let output = match output {
            Ok(result) => result.map_err(|e| AppError::upstream(format!("search subprocess error: {e}")))?,
            Err(_) => {
                return Err(AppError::timeout(format!(
                    "search call exceeded {}s deadline",
                    deadline.as_secs()
                )));
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AppError::upstream(format!(
                "search subprocess exited with {:?}: {}",
                output.status.code(),
                stderr.trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        serde_json::from_str::<SearchOutcome>(stdout.trim())
            .map_err(|e| AppError::upstream(format!("malformed search response: {e}")))
    }
}

#[async_trait]
impl SearchBackend for SubprocessSearchBackend {
    async fn global_search(
        &self,
        query: &str,
        community_level: u32,
        response_type: &str,
    ) -> Result<SearchOutcome, AppError> {
        self.run_query(
            "global",
            query,
            community_level,
            response_type,
            Duration::from_secs(300),
        )
        .await
    }

    async fn local_search(
        &self,
        query: &str,
        community_level: u32,
        response_type: &str,
    ) -> Result<SearchOutcome, AppError> {
        self.run_query(
            "local",
            query,
            community_level,
            response_type,
            Duration::from_secs(300),
        )
        .await
    }
}

/// Bounds every call with a configurable deadline and the "index not ready"
/// precondition, on top of whichever `SearchBackend` transport is wired in.
pub struct SearchGateway {
    backend: Arc<dyn SearchBackend>,
    store: Arc<dyn ArtifactStore>,
    deadline: Duration,
}

impl SearchGateway {
    pub fn new(backend: Arc<dyn SearchBackend>, store: Arc<dyn ArtifactStore>, deadline: Duration) -> Self {
        Self {
            backend,
            store,
            deadline,
        }
    }

    fn ensure_ready(&self) -> Result<(), AppError> {
        if self.store.current_generation().is_none() {
            return Err(AppError::not_ready(
                "no indexed generation is available yet",
            ));
        }
        Ok(())
    }

    pub async fn global_search(
        &self,
        query: &str,
        community_level: Option<u32>,
        response_type: Option<&str>,
    ) -> Result<SearchOutcome, AppError> {
        validate::validate_search_query(query)?;
        self.ensure_ready()?;
        let community_level = community_level.unwrap_or(DEFAULT_COMMUNITY_LEVEL);
        let response_type = response_type.unwrap_or(DEFAULT_RESPONSE_TYPE);
        tokio::time::timeout(
            self.deadline,
            self.backend.global_search(query, community_level, response_type),
        )
        .await
        .map_err(|_| {
            AppError::timeout(format!(
                "global search exceeded {}s deadline",
                self.deadline.as_secs()
            ))
        })?
    }

    pub async fn local_search(
        &self,
        query: &str,
        community_level: Option<u32>,
        response_type: Option<&str>,
    ) -> Result<SearchOutcome, AppError> {
        validate::validate_search_query(query)?;
        self.ensure_ready()?;
        let community_level = community_level.unwrap_or(DEFAULT_COMMUNITY_LEVEL);
        let response_type = response_type.unwrap_or(DEFAULT_RESPONSE_TYPE);
        tokio::time::timeout(
            self.deadline,
            self.backend.local_search(query, community_level, response_type),
        )
        .await
        .map_err(|_| {
            AppError::timeout(format!(
                "local search exceeded {}s deadline",
                self.deadline.as_secs()
            ))
        })?
    }

    /// Static prompts surfaced to the UI (§4.5 Public contract).
    pub fn suggestions(&self) -> Vec<String> {
        vec![
            "What are the main themes in this corpus?".to_string(),
            "Summarize the key relationships between entities.".to_string(),
            "What communities were detected and what defines them?".to_string(),
            "Which entities are most central to this graph?".to_string(),
        ]
    }
}
