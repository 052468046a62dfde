//! Stable project identity for content addressing and collection naming.

use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProjectIdError {
    #[error("Failed to compute project ID: {reason}")]
    Canonicalize { reason: String },
}

/// Compute a stable, unique project ID from the root path.
///
/// Format: `{sanitized-name}-{hash8}`: the directory name for readability
/// plus an 8-hex-char hash of the canonical path for uniqueness. Point ids
/// are derived from this, so it must not change across runs.
pub fn compute_project_id(root: &Path) -> Result<String, ProjectIdError> {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    let canonical = root
        .canonicalize()
        .map_err(|e| ProjectIdError::Canonicalize {
            reason: format!("Failed to canonicalize path: {}", e),
        })?;

    let dir_name = canonical
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("project");

    let mut hasher = DefaultHasher::new();
    canonical.hash(&mut hasher);
    let hash = hasher.finish();

    Ok(format!("{}-{:08x}", sanitize_name(dir_name), hash as u32))
}

/// Collection name for a project/model pair: one collection per embedding
/// model so differently-dimensioned vectors never share a partition.
pub fn collection_name(project_id: &str, model: &str) -> String {
    format!("{}-{}", project_id, sanitize_name(model))
}

/// Lowercase a name and replace everything but alphanumerics, hyphens, and
/// underscores with hyphens.
pub fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '-'
            }
        })
        .collect::<String>()
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_project_id_is_stable() {
        let dir = tempdir().unwrap();
        let id1 = compute_project_id(dir.path()).unwrap();
        let id2 = compute_project_id(dir.path()).unwrap();
        assert_eq!(id1, id2);
    }

    #[test]
    fn test_project_id_format() {
        let dir = tempdir().unwrap();
        let id = compute_project_id(dir.path()).unwrap();
        let hash_part = id.rsplit('-').next().unwrap();
        assert_eq!(hash_part.len(), 8);
        assert!(hash_part.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_sanitize_name() {
        assert_eq!(sanitize_name("My Project"), "my-project");
        assert_eq!(sanitize_name("test_project"), "test_project");
        assert_eq!(sanitize_name("foo@bar!baz"), "foo-bar-baz");
    }

    #[test]
    fn test_collection_name() {
        assert_eq!(
            collection_name("proj-12345678", "nomic-embed-text-v1.5"),
            "proj-12345678-nomic-embed-text-v1-5"
        );
    }
}
