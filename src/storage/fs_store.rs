//! Filesystem-backed vector store.
//!
//! Layout: one JSON file per point under `{index_root}/{collection}/`, with a
//! `collection_meta.json` describing the collection. All paths in payloads
//! are relative to the repository root, so the whole index directory can be
//! copied next to a repo clone and keep working.
//!
//! The filesystem has no transactions, so batch atomicity is simulated: a
//! batch is fully written into a hidden staging directory inside the
//! collection, then committed file-by-file with rename; a failed commit rolls
//! back the renames already done and removes the staging directory.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, error};
use uuid::Uuid;

use super::{Point, StoreError, VectorStore};

const COLLECTION_META_FILE: &str = "collection_meta.json";
const DEFAULT_COLLECTION: &str = "default";

/// Collection descriptor stored alongside the points.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionMeta {
    pub name: String,
    pub vector_count: u64,
    pub embedding_provider: String,
    pub embedding_model: String,
    pub embedding_dimensions: usize,
}

/// Vector store writing one JSON file per point.
pub struct FilesystemVectorStore {
    root: PathBuf,
    provider_name: String,
    model: String,
    dimensions: usize,
    // Serializes commits so concurrent per-file upserts cannot interleave
    // staging renames or meta rewrites.
    commit_lock: Arc<Mutex<()>>,
}

impl FilesystemVectorStore {
    pub fn new(
        root: impl Into<PathBuf>,
        provider_name: &str,
        model: &str,
        dimensions: usize,
    ) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            provider_name: provider_name.to_string(),
            model: model.to_string(),
            dimensions,
            commit_lock: Arc::new(Mutex::new(())),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Names of the collections currently present.
    pub fn collection_names(&self) -> Result<Vec<String>, StoreError> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if entry.file_type()?.is_dir()
                && entry.path().join(COLLECTION_META_FILE).exists()
            {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }

    /// Create an empty collection if it does not exist yet.
    pub fn create_collection(&self, name: &str) -> Result<(), StoreError> {
        let dir = self.root.join(name);
        fs::create_dir_all(&dir)?;
        if !dir.join(COLLECTION_META_FILE).exists() {
            self.write_meta(&dir, name, 0)?;
        }
        Ok(())
    }

    pub fn collection_meta(&self, name: &str) -> Result<CollectionMeta, StoreError> {
        let path = self.root.join(name).join(COLLECTION_META_FILE);
        if !path.exists() {
            return Err(StoreError::UnknownCollection(name.to_string()));
        }
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Number of points currently visible in a collection.
    pub fn point_count(&self, name: &str) -> Result<u64, StoreError> {
        let dir = self.root.join(name);
        if !dir.exists() {
            return Err(StoreError::UnknownCollection(name.to_string()));
        }
        Ok(count_point_files(&dir)?)
    }

    /// Load a single point by id.
    pub fn load_point(&self, collection: &str, id: &str) -> Result<Point, StoreError> {
        let path = self.root.join(collection).join(format!("{}.json", id));
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// All points of a collection, for inspection and tests.
    pub fn load_all_points(&self, collection: &str) -> Result<Vec<Point>, StoreError> {
        let dir = self.root.join(collection);
        if !dir.exists() {
            return Err(StoreError::UnknownCollection(collection.to_string()));
        }
        let mut points = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            if is_point_file(&entry.path()) {
                let content = fs::read_to_string(entry.path())?;
                points.push(serde_json::from_str(&content)?);
            }
        }
        Ok(points)
    }

    fn resolve_collection(&self, requested: Option<&str>) -> Result<String, StoreError> {
        if let Some(name) = requested {
            return Ok(name.to_string());
        }
        let existing = self.collection_names()?;
        match existing.len() {
            0 => Ok(DEFAULT_COLLECTION.to_string()),
            1 => Ok(existing.into_iter().next().unwrap()),
            n => Err(StoreError::AmbiguousCollection(n)),
        }
    }

    fn write_meta(&self, dir: &Path, name: &str, vector_count: u64) -> Result<(), StoreError> {
        let meta = CollectionMeta {
            name: name.to_string(),
            vector_count,
            embedding_provider: self.provider_name.clone(),
            embedding_model: self.model.clone(),
            embedding_dimensions: self.dimensions,
        };
        let tmp = dir.join(".collection_meta.json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(&meta)?)?;
        fs::rename(&tmp, dir.join(COLLECTION_META_FILE))?;
        Ok(())
    }

    fn blocking_upsert(
        &self,
        points: Vec<Point>,
        requested: Option<&str>,
    ) -> Result<(), StoreError> {
        let _guard = self
            .commit_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let name = self.resolve_collection(requested)?;
        let dir = self.root.join(&name);
        fs::create_dir_all(&dir)?;

        // Stage the whole batch first; nothing is visible yet.
        let staging = dir.join(format!(".staging-{}", Uuid::new_v4()));
        fs::create_dir(&staging)?;

        let stage_result = (|| -> Result<Vec<String>, StoreError> {
            let mut file_names = Vec::with_capacity(points.len());
            for point in &points {
                let file_name = format!("{}.json", point.id);
                fs::write(staging.join(&file_name), serde_json::to_vec(point)?)?;
                file_names.push(file_name);
            }
            Ok(file_names)
        })();

        let file_names = match stage_result {
            Ok(names) => names,
            Err(e) => {
                let _ = fs::remove_dir_all(&staging);
                return Err(e);
            }
        };

        // Commit: rename each staged file into place. A failure part-way
        // rolls back what was already committed this batch.
        let mut committed: Vec<&String> = Vec::with_capacity(file_names.len());
        for file_name in &file_names {
            match fs::rename(staging.join(file_name), dir.join(file_name)) {
                Ok(()) => committed.push(file_name),
                Err(e) => {
                    error!(
                        "Commit failed for {} in collection '{}', rolling back {} points: {}",
                        file_name,
                        name,
                        committed.len(),
                        e
                    );
                    for done in committed {
                        let _ = fs::remove_file(dir.join(done));
                    }
                    let _ = fs::remove_dir_all(&staging);
                    return Err(StoreError::Io(e));
                }
            }
        }
        fs::remove_dir_all(&staging)?;

        let vector_count = count_point_files(&dir)?;
        self.write_meta(&dir, &name, vector_count)?;

        debug!(
            "Committed {} points to collection '{}' ({} total)",
            points.len(),
            name,
            vector_count
        );
        Ok(())
    }
}

#[async_trait]
impl VectorStore for FilesystemVectorStore {
    async fn upsert_points(
        &self,
        points: Vec<Point>,
        collection: Option<&str>,
    ) -> Result<(), StoreError> {
        let store = self.clone_handle();
        let collection = collection.map(|s| s.to_string());
        tokio::task::spawn_blocking(move || {
            store.blocking_upsert(points, collection.as_deref())
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
    }
}

impl FilesystemVectorStore {
    fn clone_handle(&self) -> Self {
        Self {
            root: self.root.clone(),
            provider_name: self.provider_name.clone(),
            model: self.model.clone(),
            dimensions: self.dimensions,
            commit_lock: Arc::clone(&self.commit_lock),
        }
    }
}

fn is_point_file(path: &Path) -> bool {
    path.extension().map(|e| e == "json").unwrap_or(false)
        && path
            .file_name()
            .map(|n| n != COLLECTION_META_FILE)
            .unwrap_or(false)
}

fn count_point_files(dir: &Path) -> Result<u64, std::io::Error> {
    let mut count = 0;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_file() && is_point_file(&entry.path()) {
            count += 1;
        }
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{point_id, PointPayload};
    use tempfile::tempdir;

    fn test_point(project: &str, hash: &str, index: usize) -> Point {
        Point {
            id: point_id(project, hash, index),
            vector: vec![0.1, 0.2, 0.3],
            payload: PointPayload {
                path: "src/main.rs".to_string(),
                content: format!("chunk {}", index),
                language: "rs".to_string(),
                file_size: 42,
                chunk_index: index,
                total_chunks: 3,
                project_id: project.to_string(),
                file_hash: hash.to_string(),
                line_start: index * 10 + 1,
                line_end: index * 10 + 9,
                file_last_modified: Some(1_700_000_000),
                indexed_timestamp: 1_700_000_001,
                git: None,
                filesystem: None,
            },
        }
    }

    fn test_store(root: &Path) -> FilesystemVectorStore {
        FilesystemVectorStore::new(root, "mock", "mock-embed-v1", 3).unwrap()
    }

    #[tokio::test]
    async fn test_upsert_creates_points_and_meta() {
        let dir = tempdir().unwrap();
        let store = test_store(dir.path());

        let points: Vec<Point> = (0..3).map(|i| test_point("p", "h", i)).collect();
        store
            .upsert_points(points.clone(), Some("p-mock"))
            .await
            .unwrap();

        assert_eq!(store.point_count("p-mock").unwrap(), 3);
        let meta = store.collection_meta("p-mock").unwrap();
        assert_eq!(meta.name, "p-mock");
        assert_eq!(meta.vector_count, 3);
        assert_eq!(meta.embedding_model, "mock-embed-v1");
        assert_eq!(meta.embedding_dimensions, 3);

        let loaded = store.load_point("p-mock", &points[1].id).unwrap();
        assert_eq!(loaded.payload.chunk_index, 1);
        assert_eq!(loaded.payload.path, "src/main.rs");

        // No staging residue
        let leftovers: Vec<_> = fs::read_dir(dir.path().join("p-mock"))
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with(".staging"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn test_upsert_is_idempotent_for_same_ids() {
        let dir = tempdir().unwrap();
        let store = test_store(dir.path());

        let points: Vec<Point> = (0..3).map(|i| test_point("p", "h", i)).collect();
        store.upsert_points(points.clone(), Some("c")).await.unwrap();
        store.upsert_points(points, Some("c")).await.unwrap();

        assert_eq!(store.point_count("c").unwrap(), 3);
        assert_eq!(store.collection_meta("c").unwrap().vector_count, 3);
    }

    #[tokio::test]
    async fn test_missing_collection_name_with_multiple_collections() {
        let dir = tempdir().unwrap();
        let store = test_store(dir.path());
        store.create_collection("a").unwrap();
        store.create_collection("b").unwrap();

        let err = store
            .upsert_points(vec![test_point("p", "h", 0)], None)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::AmbiguousCollection(2)));
    }

    #[tokio::test]
    async fn test_missing_collection_name_with_single_collection() {
        let dir = tempdir().unwrap();
        let store = test_store(dir.path());
        store.create_collection("only").unwrap();

        store
            .upsert_points(vec![test_point("p", "h", 0)], None)
            .await
            .unwrap();
        assert_eq!(store.point_count("only").unwrap(), 1);
    }

    #[tokio::test]
    async fn test_index_directory_is_relocatable() {
        let dir = tempdir().unwrap();
        let original = dir.path().join("index");
        let store = test_store(&original);
        let point = test_point("p", "h", 0);
        store.upsert_points(vec![point.clone()], Some("c")).await.unwrap();

        // Move the whole index directory, as a CoW clone would
        let moved = dir.path().join("clone");
        fs::rename(&original, &moved).unwrap();

        let reopened = test_store(&moved);
        let loaded = reopened.load_point("c", &point.id).unwrap();
        assert_eq!(loaded.payload.path, "src/main.rs");
    }
}
