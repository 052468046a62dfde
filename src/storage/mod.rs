mod fs_store;

pub use fs_store::{CollectionMeta, FilesystemVectorStore};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One vector-store row: a chunk's embedding plus its payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Point {
    pub id: String,
    pub vector: Vec<f32>,
    pub payload: PointPayload,
}

/// Everything a search result needs to render and re-locate a chunk.
///
/// `path` is always relative to the repository root so an index directory can
/// be copied or cloned alongside the repo and keep resolving.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PointPayload {
    pub path: String,
    pub content: String,
    pub language: String,
    pub file_size: u64,
    pub chunk_index: usize,
    pub total_chunks: usize,
    pub project_id: String,
    pub file_hash: String,
    pub line_start: usize,
    pub line_end: usize,
    /// Unix seconds of the file's mtime at indexing time
    pub file_last_modified: Option<u64>,
    /// Unix seconds when the point was built
    pub indexed_timestamp: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub git: Option<GitMetadata>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filesystem: Option<FilesystemMetadata>,
}

/// Commit/branch the repository was on when the chunk was indexed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitMetadata {
    pub commit_hash: Option<String>,
    pub branch: Option<String>,
}

/// Staleness-detection metadata for non-git projects
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilesystemMetadata {
    pub file_mtime: Option<u64>,
    pub file_size: u64,
}

/// Stable, content-addressed point id: 128-bit hash over project, file
/// content hash, and chunk ordinal. Re-indexing an unchanged chunk yields
/// the same id.
pub fn point_id(project_id: &str, file_hash: &str, chunk_index: usize) -> String {
    let digest = md5::compute(format!("{}_{}_{}", project_id, file_hash, chunk_index));
    format!("{:x}", digest)
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("collection name required: {0} collections exist")]
    AmbiguousCollection(usize),

    #[error("collection '{0}' does not exist")]
    UnknownCollection(String),

    #[error("storage io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("storage task failed: {0}")]
    Task(String),

    #[error("{0}")]
    Other(String),
}

/// Sink for a file's points.
///
/// `upsert_points` is atomic at the granularity of the supplied batch: either
/// every point becomes visible or none does. Implementations over
/// non-transactional backends must simulate this (stage, commit by rename,
/// delete on failure) rather than writing points piecemeal.
///
/// When more than one collection exists, `collection` is mandatory.
#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn upsert_points(
        &self,
        points: Vec<Point>,
        collection: Option<&str>,
    ) -> Result<(), StoreError>;
}
