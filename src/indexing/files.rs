//! Per-file processing lifecycles.
//!
//! Each submitted file runs the full chunk → batch → await → write sequence
//! inside one worker task, and the write is all-or-nothing: either every
//! chunk of the file lands in the vector store or none does. Cancellation is
//! honored only at the file boundary, never mid-lifecycle, so a cancelled run
//! can never leave a file half-written.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::embeddings::TokenCounter;
use crate::fts::{FtsDocument, FullTextIndex};
use crate::indexer::{Chunk, FixedSizeChunker};
use crate::storage::{point_id, FilesystemMetadata, Point, PointPayload, VectorStore};

use super::progress::CompletionHook;
use super::slots::{FileData, FileStatus, SlotGuard, SlotTracker};
use super::types::{FileMetadata, FileProcessingResult, ProcessError};
use super::vectors::VectorCalculationManager;

/// Extra workers beyond the configured count, so a file is always ready to
/// start the moment a worker frees up.
const WORKER_HEADROOM: usize = 2;

/// Settings the manager needs from `IndexerConfig`.
#[derive(Debug, Clone)]
pub struct FileManagerOptions {
    pub worker_count: usize,
    pub batch_token_safety_fraction: f64,
    pub vector_processing_timeout: Duration,
}

/// Runs complete file lifecycles on a bounded worker pool.
pub struct FileChunkingManager {
    vectors: Arc<VectorCalculationManager>,
    chunker: Arc<FixedSizeChunker>,
    store: Arc<dyn VectorStore>,
    fts: Option<Arc<dyn FullTextIndex>>,
    slots: Arc<SlotTracker>,
    repo_root: PathBuf,
    workers: Arc<Semaphore>,
    cancel: CancellationToken,
    tokens: Arc<TokenCounter>,
    batch_token_cap: usize,
    wait_timeout: Duration,
    on_complete: Option<CompletionHook>,
    in_flight: AtomicUsize,
}

impl FileChunkingManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        vectors: Arc<VectorCalculationManager>,
        chunker: Arc<FixedSizeChunker>,
        store: Arc<dyn VectorStore>,
        fts: Option<Arc<dyn FullTextIndex>>,
        slots: Arc<SlotTracker>,
        repo_root: PathBuf,
        tokens: TokenCounter,
        cancel: CancellationToken,
        options: FileManagerOptions,
        on_complete: Option<CompletionHook>,
    ) -> anyhow::Result<Arc<Self>> {
        anyhow::ensure!(options.worker_count > 0, "worker_count must be positive");
        anyhow::ensure!(
            options.batch_token_safety_fraction > 0.0 && options.batch_token_safety_fraction <= 1.0,
            "batch_token_safety_fraction must be in (0, 1]"
        );

        let worker_count = options.worker_count + WORKER_HEADROOM;
        let model_limit = vectors.provider().model_token_limit();
        let batch_token_cap =
            ((model_limit as f64) * options.batch_token_safety_fraction) as usize;

        info!(
            "Initialized file chunking manager: {} workers, batch cap {} tokens",
            worker_count, batch_token_cap
        );

        Ok(Arc::new(Self {
            vectors,
            chunker,
            store,
            fts,
            slots,
            repo_root,
            workers: Arc::new(Semaphore::new(worker_count)),
            cancel,
            tokens: Arc::new(tokens),
            batch_token_cap,
            wait_timeout: options.vector_processing_timeout,
            on_complete,
            in_flight: AtomicUsize::new(0),
        }))
    }

    pub fn request_cancellation(&self) {
        self.cancel.cancel();
        info!("File chunking cancellation requested");
    }

    pub fn slots(&self) -> &Arc<SlotTracker> {
        &self.slots
    }

    /// Submit a file for its complete lifecycle. Returns immediately with a
    /// handle that resolves to the file's result.
    pub fn submit_file(
        self: &Arc<Self>,
        file_path: PathBuf,
        metadata: FileMetadata,
    ) -> JoinHandle<FileProcessingResult> {
        if self.cancel.is_cancelled() {
            return tokio::spawn(async move {
                FileProcessingResult::failed(file_path, ProcessError::Cancelled, Duration::ZERO)
            });
        }

        let manager = Arc::clone(self);
        tokio::spawn(async move {
            manager.in_flight.fetch_add(1, Ordering::SeqCst);
            let result = manager.run_file(file_path, metadata).await;
            if let Some(hook) = &manager.on_complete {
                hook(&result.file_path, &result);
            }
            manager.in_flight.fetch_sub(1, Ordering::SeqCst);
            result
        })
    }

    async fn run_file(&self, file_path: PathBuf, metadata: FileMetadata) -> FileProcessingResult {
        let started = Instant::now();

        let _worker = match self.workers.acquire().await {
            Ok(permit) => permit,
            Err(_) => {
                return FileProcessingResult::failed(
                    file_path,
                    ProcessError::Cancelled,
                    started.elapsed(),
                )
            }
        };

        // The only cancellation check for this file. Once past it, the
        // lifecycle runs to its end so the store write stays atomic.
        if self.cancel.is_cancelled() {
            return FileProcessingResult::failed(
                file_path,
                ProcessError::Cancelled,
                started.elapsed(),
            );
        }

        let filename = file_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| file_path.to_string_lossy().into_owned());

        let guard = self
            .slots
            .acquire_slot(FileData::new(filename, metadata.file_size))
            .await;

        let result = self
            .lifecycle(&guard, &file_path, &metadata, started)
            .await;
        guard.update(FileStatus::Complete);

        // Slot released here, exactly once, on every path.
        drop(guard);
        result
    }

    /// The guarded portion of the lifecycle: everything between slot
    /// acquisition and release. Errors are folded into the result; nothing
    /// escapes past the guard.
    async fn lifecycle(
        &self,
        guard: &SlotGuard,
        file_path: &Path,
        metadata: &FileMetadata,
        started: Instant,
    ) -> FileProcessingResult {
        let rel_path = match normalize_path(&self.repo_root, file_path) {
            Ok(p) => p,
            Err(e) => return FileProcessingResult::failed(file_path.to_path_buf(), e, started.elapsed()),
        };

        guard.update(FileStatus::Chunking);

        let chunker = Arc::clone(&self.chunker);
        let tokens = Arc::clone(&self.tokens);
        let to_chunk = file_path.to_path_buf();
        let chunked = tokio::task::spawn_blocking(move || {
            let chunks = chunker.chunk_file(&to_chunk)?;
            let counts: Vec<usize> = chunks.iter().map(|c| tokens.count(&c.text)).collect();
            Ok::<_, anyhow::Error>((chunks, counts))
        })
        .await;

        let (chunks, token_counts) = match chunked {
            Ok(Ok(pair)) => pair,
            Ok(Err(e)) => {
                return FileProcessingResult::failed(
                    file_path.to_path_buf(),
                    ProcessError::Read {
                        path: file_path.display().to_string(),
                        reason: format!("{:#}", e),
                    },
                    started.elapsed(),
                )
            }
            Err(join_err) => {
                return FileProcessingResult::failed(
                    file_path.to_path_buf(),
                    ProcessError::Read {
                        path: file_path.display().to_string(),
                        reason: join_err.to_string(),
                    },
                    started.elapsed(),
                )
            }
        };

        if chunks.is_empty() {
            debug!("Skipping empty file: {}", file_path.display());
            return FileProcessingResult::ok(file_path.to_path_buf(), 0, started.elapsed());
        }

        debug!("Generated {} chunks for {}", chunks.len(), file_path.display());
        guard.update(FileStatus::Vectorizing);

        // Token-aware batching: close the batch when the next chunk would
        // push it past the cap, then start a fresh one with that chunk.
        let mut batch: Vec<String> = Vec::new();
        let mut batch_tokens = 0usize;
        let mut batch_futures = Vec::new();

        for (chunk, &chunk_tokens) in chunks.iter().zip(&token_counts) {
            if batch_tokens + chunk_tokens > self.batch_token_cap && !batch.is_empty() {
                debug!(
                    "Submitting batch of {} chunks ({} tokens) for {}",
                    batch.len(),
                    batch_tokens,
                    file_path.display()
                );
                batch_futures.push(self.vectors.submit_batch(&batch, metadata));
                batch.clear();
                batch_tokens = 0;
            }
            batch.push(chunk.text.clone());
            batch_tokens += chunk_tokens;
        }
        if !batch.is_empty() {
            debug!(
                "Submitting final batch of {} chunks ({} tokens) for {}",
                batch.len(),
                batch_tokens,
                file_path.display()
            );
            batch_futures.push(self.vectors.submit_batch(&batch, metadata));
        }

        guard.update(FileStatus::Finalizing);

        // Await batches in submission order; concatenated they line up
        // positionally with the chunks. Any batch failure fails the file.
        let mut embeddings: Vec<Vec<f32>> = Vec::with_capacity(chunks.len());
        for handle in batch_futures {
            let batch_result = match tokio::time::timeout(self.wait_timeout, handle).await {
                Ok(Ok(result)) => result,
                Ok(Err(join_err)) => {
                    return FileProcessingResult::failed(
                        file_path.to_path_buf(),
                        ProcessError::Batch(format!("worker task failed: {}", join_err)),
                        started.elapsed(),
                    )
                }
                Err(_) => {
                    return FileProcessingResult::failed(
                        file_path.to_path_buf(),
                        ProcessError::Batch(format!(
                            "timed out after {}s",
                            self.wait_timeout.as_secs()
                        )),
                        started.elapsed(),
                    )
                }
            };

            if let Some(error) = batch_result.error() {
                return FileProcessingResult::failed(
                    file_path.to_path_buf(),
                    ProcessError::Batch(error.to_string()),
                    started.elapsed(),
                );
            }
            embeddings.extend_from_slice(batch_result.embeddings());
        }

        if embeddings.len() != chunks.len() {
            return FileProcessingResult::failed(
                file_path.to_path_buf(),
                ProcessError::CountMismatch {
                    embeddings: embeddings.len(),
                    chunks: chunks.len(),
                },
                started.elapsed(),
            );
        }
        if let Some(index) = embeddings.iter().position(|e| e.is_empty()) {
            return FileProcessingResult::failed(
                file_path.to_path_buf(),
                ProcessError::EmptyEmbedding { chunk_index: index },
                started.elapsed(),
            );
        }

        let chunk_count = chunks.len();
        let points = build_points(&rel_path, &chunks, embeddings, metadata);

        // Atomic write: the entire file's points in one store call. Never
        // interrupted by cancellation.
        if let Err(e) = self
            .store
            .upsert_points(points, metadata.collection.as_deref())
            .await
        {
            return FileProcessingResult::failed(
                file_path.to_path_buf(),
                ProcessError::Store(e.to_string()),
                started.elapsed(),
            );
        }
        debug!("Wrote {} points for {}", chunk_count, file_path.display());

        // Sidecar is best-effort: a full-text failure never fails the file.
        if let Some(fts) = &self.fts {
            for chunk in &chunks {
                if let Err(e) = fts.add_document(FtsDocument::for_chunk(&rel_path, chunk)) {
                    warn!(
                        "Full-text indexing failed for chunk {} of {}: {:#}",
                        chunk.chunk_index,
                        file_path.display(),
                        e
                    );
                }
            }
        }

        FileProcessingResult::ok(file_path.to_path_buf(), chunk_count, started.elapsed())
    }

    /// Request cancellation and wait for running lifecycles to finish, up to
    /// `grace`. Returns false if workers were still busy at the deadline.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        self.cancel.cancel();
        let deadline = Instant::now() + grace;
        while self.in_flight.load(Ordering::SeqCst) > 0 {
            if Instant::now() >= deadline {
                warn!(
                    "File chunking shutdown timed out with {} lifecycles running",
                    self.in_flight.load(Ordering::SeqCst)
                );
                return false;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        info!("File chunking manager shut down cleanly");
        true
    }
}

/// Store-relative path for a file; absolute paths outside the repository
/// root are a per-file precondition failure.
fn normalize_path(root: &Path, path: &Path) -> Result<String, ProcessError> {
    let relative = if path.is_absolute() {
        path.strip_prefix(root)
            .map_err(|_| ProcessError::OutsideRoot {
                path: path.display().to_string(),
                root: root.display().to_string(),
            })?
            .to_path_buf()
    } else {
        path.to_path_buf()
    };
    Ok(relative.to_string_lossy().into_owned())
}

fn build_points(
    rel_path: &str,
    chunks: &[Chunk],
    embeddings: Vec<Vec<f32>>,
    metadata: &FileMetadata,
) -> Vec<Point> {
    let indexed_timestamp = unix_now();
    let filesystem = if metadata.git.is_none() {
        Some(FilesystemMetadata {
            file_mtime: metadata.file_mtime,
            file_size: metadata.file_size,
        })
    } else {
        None
    };

    chunks
        .iter()
        .zip(embeddings)
        .map(|(chunk, vector)| Point {
            id: point_id(&metadata.project_id, &metadata.file_hash, chunk.chunk_index),
            vector,
            payload: PointPayload {
                path: rel_path.to_string(),
                content: chunk.text.clone(),
                language: chunk.file_extension.clone(),
                file_size: metadata.file_size,
                chunk_index: chunk.chunk_index,
                total_chunks: chunk.total_chunks,
                project_id: metadata.project_id.clone(),
                file_hash: metadata.file_hash.clone(),
                line_start: chunk.line_start,
                line_end: chunk.line_end,
                file_last_modified: metadata.file_mtime,
                indexed_timestamp,
                git: metadata.git.clone(),
                filesystem: filesystem.clone(),
            },
        })
        .collect()
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_path_relative_to_root() {
        let root = Path::new("/home/u/r");
        assert_eq!(
            normalize_path(root, Path::new("/home/u/r/src/a.py")).unwrap(),
            "src/a.py"
        );
        // Already-relative paths pass through
        assert_eq!(
            normalize_path(root, Path::new("src/a.py")).unwrap(),
            "src/a.py"
        );
    }

    #[test]
    fn test_normalize_path_rejects_paths_outside_root() {
        let root = Path::new("/home/u/r");
        let err = normalize_path(root, Path::new("/etc/passwd")).unwrap_err();
        assert!(matches!(err, ProcessError::OutsideRoot { .. }));
    }
}
