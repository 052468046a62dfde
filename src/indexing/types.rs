//! Records passed between pipeline stages.
//!
//! Task and result records are deeply immutable: their fields are private,
//! construction copies the caller's data, and accessors hand out shared
//! slices only. A caller mutating its own buffers after submission can never
//! be observed by a worker thread holding the record.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::storage::GitMetadata;

/// Per-file metadata attached to every batch submitted for that file.
#[derive(Debug, Clone)]
pub struct FileMetadata {
    pub project_id: String,
    /// MD5 of the file's content at read time; all chunks of a file share it
    pub file_hash: String,
    /// Target collection; propagated on every submission so stores holding
    /// several collections never have to guess
    pub collection: Option<String>,
    pub git: Option<GitMetadata>,
    /// Unix seconds of the file's mtime, when obtainable
    pub file_mtime: Option<u64>,
    pub file_size: u64,
}

/// A batch of chunk texts headed for the embedding provider.
#[derive(Debug, Clone)]
pub struct BatchTask {
    task_id: u64,
    texts: Arc<[String]>,
    metadata: FileMetadata,
    created_at: Instant,
}

impl BatchTask {
    /// Copies `texts` and `metadata`; later mutation of the caller's
    /// containers does not reach the task.
    pub fn new(task_id: u64, texts: &[String], metadata: &FileMetadata) -> Self {
        Self {
            task_id,
            texts: texts.to_vec().into(),
            metadata: metadata.clone(),
            created_at: Instant::now(),
        }
    }

    pub fn task_id(&self) -> u64 {
        self.task_id
    }

    pub fn texts(&self) -> &[String] {
        &self.texts
    }

    pub fn metadata(&self) -> &FileMetadata {
        &self.metadata
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// The batch's only text. Fails on multi-element batches instead of
    /// silently returning the first element.
    pub fn single_text(&self) -> Result<&str, BatchAccessError> {
        match self.texts.len() {
            1 => Ok(&self.texts[0]),
            n => Err(BatchAccessError { len: n }),
        }
    }
}

/// Embeddings (or an error) for one submitted batch.
#[derive(Debug, Clone)]
pub struct BatchResult {
    task_id: u64,
    embeddings: Arc<[Vec<f32>]>,
    metadata: FileMetadata,
    processing_time: Duration,
    error: Option<String>,
}

impl BatchResult {
    /// Successful result. Holds exactly one embedding per task text.
    pub fn ok(task: &BatchTask, embeddings: Vec<Vec<f32>>, processing_time: Duration) -> Self {
        debug_assert_eq!(embeddings.len(), task.texts().len());
        Self {
            task_id: task.task_id(),
            embeddings: embeddings.into(),
            metadata: task.metadata().clone(),
            processing_time,
            error: None,
        }
    }

    /// Failed result; carries no embeddings.
    pub fn err(task: &BatchTask, error: impl Into<String>, processing_time: Duration) -> Self {
        Self {
            task_id: task.task_id(),
            embeddings: Vec::new().into(),
            metadata: task.metadata().clone(),
            processing_time,
            error: Some(error.into()),
        }
    }

    /// Result for a batch rejected because cancellation was requested.
    pub fn cancelled(task: &BatchTask) -> Self {
        Self::err(task, "cancelled", Duration::ZERO)
    }

    pub fn task_id(&self) -> u64 {
        self.task_id
    }

    pub fn embeddings(&self) -> &[Vec<f32>] {
        &self.embeddings
    }

    pub fn metadata(&self) -> &FileMetadata {
        &self.metadata
    }

    pub fn processing_time(&self) -> Duration {
        self.processing_time
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn is_cancelled(&self) -> bool {
        self.error.as_deref() == Some("cancelled")
    }

    /// The result's only embedding. Fails on multi-element results.
    pub fn single_embedding(&self) -> Result<&[f32], BatchAccessError> {
        match self.embeddings.len() {
            1 => Ok(&self.embeddings[0]),
            n => Err(BatchAccessError { len: n }),
        }
    }
}

/// Returned when a single-element accessor is used on a batch of another size.
#[derive(Debug, Clone, Error)]
#[error("single-element access on a batch of {len} elements")]
pub struct BatchAccessError {
    pub len: usize,
}

/// Why a file failed to index. Errors are local to the file; the pipeline
/// records them and moves on.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ProcessError {
    #[error("cancelled")]
    Cancelled,

    #[error("path {path} is outside the repository root {root}")]
    OutsideRoot { path: String, root: String },

    #[error("failed to read {path}: {reason}")]
    Read { path: String, reason: String },

    #[error("Batch processing failed: {0}")]
    Batch(String),

    #[error("embedding count mismatch: {embeddings} embeddings for {chunks} chunks")]
    CountMismatch { embeddings: usize, chunks: usize },

    #[error("empty embedding for chunk {chunk_index}")]
    EmptyEmbedding { chunk_index: usize },

    #[error("vector storage write failed: {0}")]
    Store(String),
}

/// Outcome of one complete file lifecycle.
#[derive(Debug, Clone)]
pub struct FileProcessingResult {
    pub file_path: PathBuf,
    pub chunks_processed: usize,
    pub processing_time: Duration,
    pub error: Option<ProcessError>,
}

impl FileProcessingResult {
    pub fn ok(file_path: PathBuf, chunks_processed: usize, processing_time: Duration) -> Self {
        Self {
            file_path,
            chunks_processed,
            processing_time,
            error: None,
        }
    }

    pub fn failed(file_path: PathBuf, error: ProcessError, processing_time: Duration) -> Self {
        Self {
            file_path,
            chunks_processed: 0,
            processing_time,
            error: Some(error),
        }
    }

    pub fn success(&self) -> bool {
        self.error.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_metadata() -> FileMetadata {
        FileMetadata {
            project_id: "proj".to_string(),
            file_hash: "hash".to_string(),
            collection: Some("c".to_string()),
            git: None,
            file_mtime: Some(1_700_000_000),
            file_size: 10,
        }
    }

    #[test]
    fn test_task_copies_texts_at_construction() {
        let mut texts = vec!["chunk1".to_string(), "chunk2".to_string()];
        let task = BatchTask::new(1, &texts, &test_metadata());

        // Caller keeps mutating its own buffer after submission
        texts.push("chunk3".to_string());
        texts[0] = "mutated".to_string();

        assert_eq!(task.texts(), &["chunk1".to_string(), "chunk2".to_string()]);
    }

    #[test]
    fn test_task_copies_metadata_at_construction() {
        let mut metadata = test_metadata();
        let task = BatchTask::new(1, &["a".to_string()], &metadata);

        metadata.project_id = "mutated".to_string();
        metadata.collection = None;

        assert_eq!(task.metadata().project_id, "proj");
        assert_eq!(task.metadata().collection.as_deref(), Some("c"));
    }

    #[test]
    fn test_single_text_fails_on_multi_element_batch() {
        let single = BatchTask::new(1, &["only".to_string()], &test_metadata());
        assert_eq!(single.single_text().unwrap(), "only");

        let multi = BatchTask::new(
            2,
            &["a".to_string(), "b".to_string()],
            &test_metadata(),
        );
        let err = multi.single_text().unwrap_err();
        assert_eq!(err.len, 2);

        let empty = BatchTask::new(3, &[], &test_metadata());
        assert!(empty.single_text().is_err());
    }

    #[test]
    fn test_single_embedding_fails_on_multi_element_result() {
        let task = BatchTask::new(1, &["a".to_string()], &test_metadata());
        let ok = BatchResult::ok(&task, vec![vec![0.1, 0.2]], Duration::from_millis(5));
        assert_eq!(ok.single_embedding().unwrap(), &[0.1, 0.2]);

        let multi_task = BatchTask::new(
            2,
            &["a".to_string(), "b".to_string()],
            &test_metadata(),
        );
        let multi = BatchResult::ok(
            &multi_task,
            vec![vec![0.1], vec![0.2]],
            Duration::from_millis(5),
        );
        assert!(multi.single_embedding().is_err());
    }

    #[test]
    fn test_result_count_invariant() {
        let task = BatchTask::new(
            1,
            &["a".to_string(), "b".to_string()],
            &test_metadata(),
        );

        let ok = BatchResult::ok(&task, vec![vec![0.1], vec![0.2]], Duration::ZERO);
        assert!(ok.error().is_none());
        assert_eq!(ok.embeddings().len(), task.texts().len());

        let failed = BatchResult::err(&task, "boom", Duration::ZERO);
        assert_eq!(failed.error(), Some("boom"));
        assert!(failed.embeddings().is_empty());

        let cancelled = BatchResult::cancelled(&task);
        assert!(cancelled.is_cancelled());
        assert!(cancelled.embeddings().is_empty());
    }
}
