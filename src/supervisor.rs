// Index Job Supervisor - owns the lifecycle of the one-at-a-time indexing
// subprocess: spawn, progress capture, completion, reload, failure (§4.3).
//
// This is the component with the real concurrency glue: a single writer of
// the `IndexJob` record, a cross-process advisory lock over the output
// directory, and line-oriented progress extraction isolated in `progress`.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use fs2::FileExt;
use parking_lot::RwLock;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;

use crate::contracts::ArtifactStore;
use crate::error::AppError;
use crate::metrics_cache::MetricsCache;
use crate::progress;
use crate::types::{IndexJob, JobState};

/// Outcome of the most recently completed run, consulted by Upload Intake
/// when joining file status (§4.4 `list()`).
#[derive(Debug, Clone, Copy)]
pub struct RunOutcome {
    pub finished_at: chrono::DateTime<Utc>,
    pub succeeded: bool,
}

pub struct StartResult {
    pub accepted: bool,
    pub reason: Option<String>,
}

pub struct Supervisor {
    output_dir: PathBuf,
    lock_path: PathBuf,
    indexer_bin: String,
    backend_root: PathBuf,
    index_timeout: std::time::Duration,
    job: Arc<RwLock<IndexJob>>,
    last_outcome: Arc<RwLock<Option<RunOutcome>>>,
    store: Arc<dyn ArtifactStore>,
    cache: Arc<MetricsCache>,
    cancel_requested: Arc<AtomicBool>,
}

impl Supervisor {
    pub fn new(
        backend_root: PathBuf,
        output_dir: PathBuf,
        indexer_bin: String,
        store: Arc<dyn ArtifactStore>,
        cache: Arc<MetricsCache>,
        index_timeout: std::time::Duration,
    ) -> Self {
        let lock_path = output_dir.join(".lock");
        Self {
            output_dir,
            lock_path,
            indexer_bin,
            backend_root,
            index_timeout,
            job: Arc::new(RwLock::new(IndexJob::default())),
            last_outcome: Arc::new(RwLock::new(None)),
            store,
            cache,
            cancel_requested: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn status(&self) -> IndexJob {
        self.job.read().clone()
    }

    pub fn last_outcome(&self) -> Option<RunOutcome> {
        *self.last_outcome.read()
    }

    /// Accept a new job unless one is already running, in-process or held by
    /// another backend process via the output-directory file lock (§4.3a).
    pub fn start(self: &Arc<Self>) -> StartResult {
        {
            let job = self.job.read();
            if job.is_running() {
                return StartResult {
                    accepted: false,
                    reason: Some("already running".to_string()),
                };
            }
        }

        std::fs::create_dir_all(&self.output_dir).ok();
        let lock_file = match std::fs::OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&self.lock_path)
        {
            Ok(f) => f,
            Err(e) => {
                return StartResult {
                    accepted: false,
                    reason: Some(format!("cannot open lock file: {e}")),
                }
            }
        };

        if let Err(e) = FileExt::try_lock_exclusive(&lock_file) {
            tracing::warn!(error = %e, "output directory locked by another process");
            return StartResult {
                accepted: false,
                reason: Some("already running".to_string()),
            };
        }

        {
            let mut job = self.job.write();
            *job = IndexJob {
                state: JobState::Starting,
                progress: 0,
                message: "starting".to_string(),
                started_at: Some(Utc::now()),
                finished_at: None,
                exit_status: None,
            };
        }
        self.cancel_requested.store(false, Ordering::SeqCst);

        let supervisor = Arc::clone(self);
        tokio::spawn(async move {
            supervisor.run(lock_file).await;
        });

        StartResult {
            accepted: true,
            reason: None,
        }
    }

    /// Abort a running job: kill the subprocess and mark the job failed with
    /// `message="cancelled"` (§4.3 Cancellation and shutdown).
    pub fn cancel(&self) {
        self.cancel_requested.store(true, Ordering::SeqCst);
    }

    async fn run(self: Arc<Self>, lock_file: std::fs::File) {
        let mut command = Command::new(&self.indexer_bin);
        command
            .arg("--root")
            .arg(&self.backend_root)
            .arg("--verbose")
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .stdin(std::process::Stdio::null());

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                self.finish(false, format!("failed to spawn indexer: {e}"), None).await;
                drop(lock_file);
                return;
            }
        };

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let job = Arc::clone(&self.job);
        let seen_first_line = Arc::new(AtomicBool::new(false));
        let first_error_line: Arc<parking_lot::Mutex<Option<String>>> =
            Arc::new(parking_lot::Mutex::new(None));

        let out_job = Arc::clone(&job);
        let out_seen = Arc::clone(&seen_first_line);
        let stdout_task = tokio::spawn(async move {
            if let Some(stdout) = stdout {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    observe_line(&out_job, &out_seen, &line);
                }
            }
        });

        let err_job = Arc::clone(&job);
        let err_seen = Arc::clone(&seen_first_line);
        let err_first_line = Arc::clone(&first_error_line);
        let stderr_task = tokio::spawn(async move {
            if let Some(stderr) = stderr {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    let mut first = err_first_line.lock();
                    if first.is_none() && !line.trim().is_empty() {
                        *first = Some(line.clone());
                    }
                    drop(first);
                    observe_line(&err_job, &err_seen, &line);
                }
            }
        });

        let cancel_requested = Arc::clone(&self.cancel_requested);
        let deadline = tokio::time::Instant::now() + self.index_timeout;
        let wait_result = loop {
            if cancel_requested.load(Ordering::SeqCst) {
                let _ = child.start_kill();
                let _ = tokio::time::timeout(std::time::Duration::from_secs(5), child.wait()).await;
                break Err(std::io::Error::new(
                    std::io::ErrorKind::Interrupted,
                    "cancelled",
                ));
            }
            if tokio::time::Instant::now() >= deadline {
                tracing::warn!("indexing run exceeded its timeout budget, cancelling");
                cancel_requested.store(true, Ordering::SeqCst);
                continue;
            }
            match tokio::time::timeout(std::time::Duration::from_millis(200), child.wait()).await {
                Ok(result) => break result,
                Err(_) => continue,
            }
        };

        let _ = stdout_task.await;
        let _ = stderr_task.await;

        let cancelled = cancel_requested.load(Ordering::SeqCst);
        match wait_result {
            Ok(status) if status.success() && !cancelled => {
                self.finish(true, "completed".to_string(), status.code()).await;
            }
            Ok(status) if cancelled => {
                self.finish(false, "cancelled".to_string(), status.code()).await;
            }
            Ok(status) => {
                let message = first_error_line
                    .lock()
                    .clone()
                    .unwrap_or_else(|| "failed".to_string());
                self.finish(false, message, status.code()).await;
            }
            Err(_) if cancelled => {
                self.finish(false, "cancelled".to_string(), None).await;
            }
            Err(e) => {
                self.finish(false, format!("indexer process error: {e}"), None).await;
            }
        }

        drop(lock_file);
    }

    /// On success, the reload must be awaited to completion and the cache
    /// invalidated *before* `state` flips to `Idle` — otherwise a status
    /// reader could observe `is_indexing:false` while the store is still
    /// serving the previous generation (§5 ordering guarantee).
    async fn finish(&self, succeeded: bool, message: String, exit_status: Option<i32>) {
        if succeeded {
            self.cache.invalidate();
            if let Err(e) = self.store.reload().await {
                tracing::error!(error = %e, "artifact store reload failed after successful index run");
            }
        }

        {
            let mut job = self.job.write();
            // The externally observable contract (§6.1) is `is_indexing`,
            // derived from `state`; idle is simply "not starting/running", so
            // collapsing succeeded/failed directly into idle here serves the
            // same purpose as a separate observed-by-reader transition,
            // without requiring status() to mutate state as a side effect.
            job.state = JobState::Idle;
            job.progress = if succeeded { 100 } else { 0 };
            job.message = message;
            job.finished_at = Some(Utc::now());
            job.exit_status = exit_status;
        }
        *self.last_outcome.write() = Some(RunOutcome {
            finished_at: Utc::now(),
            succeeded,
        });
    }
}

fn observe_line(job: &Arc<RwLock<IndexJob>>, seen_first_line: &Arc<AtomicBool>, line: &str) {
    tracing::debug!(line = %line, "indexer output");
    let mut job = job.write();
    if !seen_first_line.swap(true, Ordering::SeqCst) && job.state == JobState::Starting {
        job.state = JobState::Running;
        if job.progress < 10 {
            job.progress = 10;
        }
    }
    job.progress = progress::advance(job.progress, line);
    if job.state == JobState::Running || job.state == JobState::Starting {
        job.message = line.to_string();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn observe_line_transitions_starting_to_running() {
        let job = Arc::new(RwLock::new(IndexJob {
            state: JobState::Starting,
            ..Default::default()
        }));
        let seen = Arc::new(AtomicBool::new(false));
        observe_line(&job, &seen, "reading input files");
        assert_eq!(job.read().state, JobState::Running);
        assert_eq!(job.read().progress, 10);
    }

    #[test]
    fn observe_line_applies_progress_tokens_monotonically() {
        let job = Arc::new(RwLock::new(IndexJob {
            state: JobState::Running,
            progress: 40,
            ..Default::default()
        }));
        let seen = Arc::new(AtomicBool::new(true));
        observe_line(&job, &seen, "chunking more input"); // 20 < 40, ignored
        assert_eq!(job.read().progress, 40);
        observe_line(&job, &seen, "detecting communities"); // 80 > 40
        assert_eq!(job.read().progress, 80);
    }

    struct FakeStore {
        generation: std::sync::atomic::AtomicU64,
        reloaded: std::sync::atomic::AtomicBool,
    }

    #[async_trait::async_trait]
    impl ArtifactStore for FakeStore {
        fn current_generation(&self) -> crate::types::ArtifactGeneration {
            crate::types::ArtifactGeneration(self.generation.load(Ordering::SeqCst))
        }
        async fn load_entities(
            &self,
            _min_degree: Option<u32>,
        ) -> Result<Vec<crate::types::Entity>, AppError> {
            Ok(Vec::new())
        }
        async fn load_relationships(&self) -> Result<Vec<crate::types::Relationship>, AppError> {
            Ok(Vec::new())
        }
        async fn load_communities(
            &self,
            _max_level: Option<u32>,
        ) -> Result<Vec<crate::types::Community>, AppError> {
            Ok(Vec::new())
        }
        async fn load_text_units(&self) -> Result<Vec<crate::types::TextUnit>, AppError> {
            Ok(Vec::new())
        }
        async fn get_entity_by_id(&self, _id: &str) -> Result<crate::types::Entity, AppError> {
            Err(AppError::not_found("no such entity"))
        }
        async fn get_related_entities(
            &self,
            _entity_id: &str,
        ) -> Result<Vec<(crate::types::Entity, crate::types::Relationship)>, AppError> {
            Ok(Vec::new())
        }
        async fn reload(&self) -> Result<(), AppError> {
            self.reloaded.store(true, Ordering::SeqCst);
            self.generation.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn test_supervisor(store: Arc<FakeStore>) -> Supervisor {
        let cache = Arc::new(MetricsCache::new(store.clone()));
        Supervisor::new(
            PathBuf::from("/tmp"),
            PathBuf::from("/tmp/output"),
            "true".to_string(),
            store,
            cache,
            std::time::Duration::from_secs(3600),
        )
    }

    #[tokio::test]
    async fn finish_success_reloads_store_before_flipping_idle() {
        let store = Arc::new(FakeStore {
            generation: std::sync::atomic::AtomicU64::new(0),
            reloaded: std::sync::atomic::AtomicBool::new(false),
        });
        let supervisor = test_supervisor(store.clone());

        supervisor.finish(true, "completed".to_string(), Some(0)).await;

        assert!(store.reloaded.load(Ordering::SeqCst));
        assert_eq!(store.current_generation(), crate::types::ArtifactGeneration(1));
        let status = supervisor.status();
        assert!(!status.is_running());
        assert_eq!(status.progress, 100);
    }

    #[tokio::test]
    async fn finish_failure_skips_reload() {
        let store = Arc::new(FakeStore {
            generation: std::sync::atomic::AtomicU64::new(0),
            reloaded: std::sync::atomic::AtomicBool::new(false),
        });
        let supervisor = test_supervisor(store.clone());

        supervisor
            .finish(false, "indexer exploded".to_string(), Some(1))
            .await;

        assert!(!store.reloaded.load(Ordering::SeqCst));
        let status = supervisor.status();
        assert!(!status.is_running());
        assert_eq!(status.progress, 0);
        assert_eq!(status.message, "indexer exploded");
    }
}
