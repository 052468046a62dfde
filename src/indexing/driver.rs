//! Pipeline driver: walks the candidate list through the file manager.
//!
//! Keeps a bounded submission window so memory stays flat on huge repos,
//! consumes completions in arrival order, and owns the file-level progress
//! counters. Cancellation between files is handled here: once the flag is
//! up no new file is submitted, while already-submitted files finish their
//! atomic lifecycles.

use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, UNIX_EPOCH};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::IndexerConfig;
use crate::embeddings::{EmbeddingProvider, TokenCounter};
use crate::fts::FullTextIndex;
use crate::indexer::FixedSizeChunker;
use crate::storage::{GitMetadata, VectorStore};

use super::files::{FileChunkingManager, FileManagerOptions};
use super::progress::{CompletionHook, ProgressCallback, ProgressEvent};
use super::slots::SlotTracker;
use super::stats::RateWindow;
use super::types::{FileMetadata, FileProcessingResult, ProcessError};
use super::vectors::{VectorCalculationManager, VectorStats};

/// Wiring parameters for a pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub repo_root: PathBuf,
    pub project_id: String,
    pub collection: Option<String>,
    pub worker_count: usize,
    pub vector_thread_count: usize,
    pub chunk_size: usize,
    pub batch_token_safety_fraction: f64,
    pub vector_processing_timeout: Duration,
    pub throttle_window: Duration,
    pub throughput_window: Duration,
}

impl PipelineOptions {
    pub fn from_config(
        config: &IndexerConfig,
        repo_root: PathBuf,
        project_id: String,
        collection: Option<String>,
        vector_thread_count: usize,
    ) -> Self {
        Self {
            repo_root,
            project_id,
            collection,
            worker_count: config.effective_worker_count(),
            vector_thread_count,
            chunk_size: config.chunk_size,
            batch_token_safety_fraction: config.batch_token_safety_fraction,
            vector_processing_timeout: config.vector_processing_timeout(),
            throttle_window: config.throttle_window(),
            throughput_window: config.throughput_window(),
        }
    }
}

/// End-of-run accounting. Per-file errors live here; none of them aborted
/// the pipeline.
#[derive(Debug)]
pub struct IndexReport {
    pub files_total: usize,
    pub files_processed: usize,
    pub files_failed: usize,
    pub chunks_created: usize,
    pub cancelled: bool,
    pub failures: Vec<(PathBuf, ProcessError)>,
    pub elapsed: Duration,
}

impl IndexReport {
    fn new(files_total: usize) -> Self {
        Self {
            files_total,
            files_processed: 0,
            files_failed: 0,
            chunks_created: 0,
            cancelled: false,
            failures: Vec::new(),
            elapsed: Duration::ZERO,
        }
    }

    fn record(&mut self, result: &FileProcessingResult) {
        match &result.error {
            None => {
                self.files_processed += 1;
                self.chunks_created += result.chunks_processed;
            }
            Some(error) => {
                self.files_failed += 1;
                self.failures.push((result.file_path.clone(), error.clone()));
            }
        }
    }

    pub fn summary(&self) -> String {
        if self.files_failed == 0 {
            format!(
                "Successfully processed {} files, created {} chunks",
                self.files_processed, self.chunks_created
            )
        } else {
            format!(
                "Processed {} files with {} errors, created {} chunks",
                self.files_processed, self.files_failed, self.chunks_created
            )
        }
    }
}

struct ProgressState {
    total: usize,
    files_done: usize,
    bytes_done: u64,
    files_window: RateWindow,
    bytes_window: RateWindow,
    pending_sizes: HashMap<PathBuf, u64>,
    window_span: Duration,
}

impl ProgressState {
    fn new(window_span: Duration) -> Self {
        Self {
            total: 0,
            files_done: 0,
            bytes_done: 0,
            files_window: RateWindow::new(window_span),
            bytes_window: RateWindow::new(window_span),
            pending_sizes: HashMap::new(),
            window_span,
        }
    }

    fn reset(&mut self, total: usize) {
        self.total = total;
        self.files_done = 0;
        self.bytes_done = 0;
        self.files_window = RateWindow::new(self.window_span);
        self.bytes_window = RateWindow::new(self.window_span);
        self.pending_sizes.clear();
    }
}

/// Drives candidate files through the chunk/embed/write pipeline.
pub struct IndexingPipeline {
    fcm: Arc<FileChunkingManager>,
    vectors: Arc<VectorCalculationManager>,
    slots: Arc<SlotTracker>,
    cancel: CancellationToken,
    window: usize,
    progress: Option<ProgressCallback>,
    state: Arc<Mutex<ProgressState>>,
    project_id: String,
    collection: Option<String>,
    git: Option<GitMetadata>,
}

impl IndexingPipeline {
    pub fn new(
        provider: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn VectorStore>,
        fts: Option<Arc<dyn FullTextIndex>>,
        options: PipelineOptions,
        progress: Option<ProgressCallback>,
    ) -> anyhow::Result<Self> {
        let cancel = CancellationToken::new();
        let slots = SlotTracker::new(options.worker_count + 2);
        let vectors = VectorCalculationManager::new(
            Arc::clone(&provider),
            options.vector_thread_count,
            cancel.clone(),
            options.throttle_window,
            options.throughput_window,
        );
        let tokens = TokenCounter::for_provider(provider.as_ref());
        let chunker = Arc::new(FixedSizeChunker::new(options.chunk_size));
        let state = Arc::new(Mutex::new(ProgressState::new(options.throughput_window)));

        let hook = Self::completion_hook(
            Arc::clone(&state),
            progress.clone(),
            Arc::clone(&vectors),
        );

        let fcm = FileChunkingManager::new(
            Arc::clone(&vectors),
            chunker,
            store,
            fts,
            Arc::clone(&slots),
            options.repo_root.clone(),
            tokens,
            cancel.clone(),
            FileManagerOptions {
                worker_count: options.worker_count,
                batch_token_safety_fraction: options.batch_token_safety_fraction,
                vector_processing_timeout: options.vector_processing_timeout,
            },
            Some(hook),
        )?;

        let git = detect_git_metadata(&options.repo_root);
        if git.is_some() {
            debug!("Detected git repository at {}", options.repo_root.display());
        }

        Ok(Self {
            fcm,
            vectors,
            slots,
            cancel,
            window: options.worker_count + 2,
            progress,
            state,
            project_id: options.project_id,
            collection: options.collection,
            git,
        })
    }

    /// One progress emission per finished file, from inside the file
    /// manager's completion path.
    fn completion_hook(
        state: Arc<Mutex<ProgressState>>,
        progress: Option<ProgressCallback>,
        vectors: Arc<VectorCalculationManager>,
    ) -> CompletionHook {
        Arc::new(move |path: &Path, _result: &FileProcessingResult| {
            let event = {
                let mut state = state.lock().unwrap_or_else(|p| p.into_inner());
                state.files_done += 1;
                if let Some(size) = state.pending_sizes.remove(path) {
                    state.bytes_done += size;
                }
                let files_done = state.files_done as u64;
                let bytes_done = state.bytes_done;
                state.files_window.record(files_done);
                state.bytes_window.record(bytes_done);

                let stats = vectors.stats();
                let info = format!(
                    "{:.1} files/s | {:.1} KB/s | {} threads | {}",
                    state.files_window.rate(),
                    state.bytes_window.rate() / 1024.0,
                    stats.active_workers,
                    stats.throttling.symbol()
                );
                ProgressEvent::file(state.files_done, state.total, path.to_path_buf(), info)
            };
            if let Some(cb) = &progress {
                cb(event);
            }
        })
    }

    /// Token observers can use to cancel the run from outside.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn request_cancellation(&self) {
        self.cancel.cancel();
    }

    pub fn slots(&self) -> &Arc<SlotTracker> {
        &self.slots
    }

    pub fn vector_stats(&self) -> VectorStats {
        self.vectors.stats()
    }

    /// Index the given files. Per-file failures are recorded and the run
    /// continues; only cancellation stops submission early.
    pub async fn run(&self, files: Vec<PathBuf>) -> IndexReport {
        let started = Instant::now();
        let total = files.len();
        {
            let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
            state.reset(total);
        }
        let mut report = IndexReport::new(total);

        self.emit_setup(format!("Indexing {} files", total));
        info!("Starting indexing of {} files", total);

        let mut pending = files.into_iter();
        let mut in_flight: FuturesUnordered<JoinHandle<FileProcessingResult>> =
            FuturesUnordered::new();

        loop {
            // Keep the submission window full unless cancellation stopped
            // new work.
            while in_flight.len() < self.window && !self.cancel.is_cancelled() {
                match pending.next() {
                    Some(path) => match self.prepare_metadata(&path).await {
                        Ok(metadata) => {
                            {
                                let mut state =
                                    self.state.lock().unwrap_or_else(|p| p.into_inner());
                                state.pending_sizes.insert(path.clone(), metadata.file_size);
                            }
                            in_flight.push(self.fcm.submit_file(path, metadata));
                        }
                        Err(error) => {
                            report.record(&FileProcessingResult::failed(
                                path,
                                error,
                                Duration::ZERO,
                            ));
                        }
                    },
                    None => break,
                }
            }

            // Already-submitted files always finish atomically, cancelled
            // or not.
            match in_flight.next().await {
                Some(joined) => report.record(&flatten(joined)),
                None => break,
            }
        }

        // Files never submitted because cancellation arrived first.
        for path in pending {
            report.record(&FileProcessingResult::failed(
                path,
                ProcessError::Cancelled,
                Duration::ZERO,
            ));
        }

        report.cancelled = self.cancel.is_cancelled();
        report.elapsed = started.elapsed();

        info!(
            "Indexing finished in {:.2}s: {} ok, {} failed, {} chunks",
            report.elapsed.as_secs_f64(),
            report.files_processed,
            report.files_failed,
            report.chunks_created
        );
        self.emit_setup(report.summary());
        report
    }

    async fn prepare_metadata(&self, path: &Path) -> Result<FileMetadata, ProcessError> {
        let owned = path.to_path_buf();
        let read = tokio::task::spawn_blocking(move || {
            let bytes = std::fs::read(&owned)?;
            let stat = std::fs::metadata(&owned)?;
            let mtime = stat
                .modified()
                .ok()
                .and_then(|m| m.duration_since(UNIX_EPOCH).ok())
                .map(|d| d.as_secs());
            Ok::<_, std::io::Error>((format!("{:x}", md5::compute(&bytes)), stat.len(), mtime))
        })
        .await;

        let (file_hash, file_size, file_mtime) = match read {
            Ok(Ok(triple)) => triple,
            Ok(Err(e)) => {
                return Err(ProcessError::Read {
                    path: path.display().to_string(),
                    reason: e.to_string(),
                })
            }
            Err(join_err) => {
                return Err(ProcessError::Read {
                    path: path.display().to_string(),
                    reason: join_err.to_string(),
                })
            }
        };

        Ok(FileMetadata {
            project_id: self.project_id.clone(),
            file_hash,
            collection: self.collection.clone(),
            git: self.git.clone(),
            file_mtime,
            file_size,
        })
    }

    fn emit_setup(&self, message: String) {
        if let Some(cb) = &self.progress {
            cb(ProgressEvent::setup(message));
        }
    }
}

fn flatten(joined: Result<FileProcessingResult, tokio::task::JoinError>) -> FileProcessingResult {
    match joined {
        Ok(result) => result,
        Err(join_err) => FileProcessingResult::failed(
            PathBuf::new(),
            ProcessError::Batch(format!("file task failed: {}", join_err)),
            Duration::ZERO,
        ),
    }
}

/// Best-effort branch/commit detection by reading .git/HEAD directly.
/// Absence of git never fails a run.
fn detect_git_metadata(repo_root: &Path) -> Option<GitMetadata> {
    let head_path = repo_root.join(".git").join("HEAD");
    let head = std::fs::read_to_string(&head_path).ok()?;
    let head = head.trim();

    if let Some(reference) = head.strip_prefix("ref: ") {
        let branch = reference.rsplit('/').next().map(|s| s.to_string());
        let commit_hash = std::fs::read_to_string(repo_root.join(".git").join(reference))
            .ok()
            .map(|s| s.trim().to_string());
        Some(GitMetadata {
            commit_hash,
            branch,
        })
    } else {
        // Detached HEAD: the file holds the commit itself
        Some(GitMetadata {
            commit_hash: Some(head.to_string()),
            branch: None,
        })
    }
}
