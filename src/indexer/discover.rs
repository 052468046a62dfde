//! Candidate file discovery.
//!
//! Drives a gitignore-aware walk over the repository and hands the pipeline
//! its input list. What counts as a candidate is decided by `IndexerConfig`
//! (`ignores_component`, `indexes_extension`); this module only applies
//! those decisions while walking. Ignored directories are pruned as whole
//! subtrees rather than filtered file-by-file afterwards.

use ignore::WalkBuilder;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::config::IndexerConfig;

/// Collect the files the pipeline should consider, in walk order.
///
/// Honors .gitignore (local, global, and exclude files), skips hidden
/// entries, prunes any entry whose own name matches an ignore pattern, and
/// keeps only files with a configured extension. The root itself is never
/// pruned, so a repository that happens to live under a directory named
/// like a pattern still indexes.
pub fn discover_files(root: &Path, config: &IndexerConfig) -> Vec<PathBuf> {
    let mut builder = WalkBuilder::new(root);
    builder
        .git_ignore(true)
        .git_global(true)
        .git_exclude(true)
        .hidden(true);

    let pruning = config.clone();
    builder.filter_entry(move |entry| {
        entry.depth() == 0 || !pruning.ignores_component(entry.file_name())
    });

    let files: Vec<PathBuf> = builder
        .build()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                debug!("Skipping unreadable entry: {}", e);
                None
            }
        })
        .filter(|entry| entry.file_type().map(|ft| ft.is_file()).unwrap_or(false))
        .filter(|entry| config.indexes_extension(entry.path()))
        .map(|entry| entry.into_path())
        .collect();

    debug!(
        "Discovered {} candidate files under {}",
        files.len(),
        root.display()
    );
    files
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn test_config() -> IndexerConfig {
        IndexerConfig {
            extensions: vec!["rs".to_string(), "py".to_string()],
            ignore_patterns: vec!["target".to_string(), "build".to_string()],
            ..Default::default()
        }
    }

    #[test]
    fn test_discovers_configured_extensions_only() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("src");
        fs::create_dir_all(&src).unwrap();

        fs::write(src.join("main.rs"), "fn main() {}").unwrap();
        fs::write(src.join("script.py"), "print('hello')").unwrap();
        fs::write(src.join("index.js"), "console.log('hi')").unwrap();
        fs::write(src.join("readme.md"), "# Readme").unwrap();

        let files = discover_files(dir.path(), &test_config());

        assert_eq!(files.len(), 2);
        assert!(files.iter().any(|f| f.ends_with("main.rs")));
        assert!(files.iter().any(|f| f.ends_with("script.py")));
    }

    #[test]
    fn test_ignored_directories_are_pruned() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("target").join("debug");
        fs::create_dir_all(&target).unwrap();

        fs::write(dir.path().join("main.rs"), "fn main() {}").unwrap();
        fs::write(target.join("generated.rs"), "fn generated() {}").unwrap();

        let files = discover_files(dir.path(), &test_config());

        assert_eq!(files.len(), 1);
        assert!(files[0].ends_with("main.rs"));
    }

    #[test]
    fn test_patterns_match_components_not_substrings() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("src");
        fs::create_dir_all(&src).unwrap();

        // File names merely containing a pattern survive
        fs::write(src.join("builder.rs"), "pub struct Builder;").unwrap();
        fs::write(src.join("rebuild.rs"), "pub fn rebuild() {}").unwrap();
        // An exact component match is pruned with its subtree
        let build_dir = src.join("build");
        fs::create_dir_all(&build_dir).unwrap();
        fs::write(build_dir.join("out.rs"), "fn out() {}").unwrap();

        let files = discover_files(dir.path(), &test_config());

        assert_eq!(files.len(), 2);
        assert!(files.iter().any(|f| f.ends_with("builder.rs")));
        assert!(files.iter().any(|f| f.ends_with("rebuild.rs")));
        assert!(!files.iter().any(|f| f.ends_with("out.rs")));
    }

    #[test]
    fn test_root_under_pattern_named_ancestry_still_indexes() {
        // A repo rooted at .../build/... must not be dropped by its own
        // ancestry; only components below the root are pruned.
        let dir = tempdir().unwrap();
        let root = dir.path().join("build").join("vendor-app");
        fs::create_dir_all(&root).unwrap();
        fs::write(root.join("main.rs"), "fn main() {}").unwrap();

        let files = discover_files(&root, &test_config());

        assert_eq!(files.len(), 1);
        assert!(files[0].ends_with("main.rs"));
    }
}
