//! Full-text sidecar index using Tantivy.
//!
//! The pipeline writes one document per chunk so keyword queries can run
//! next to the vector index. The sidecar is best-effort from the pipeline's
//! point of view: write failures are logged by the caller and never fail a
//! file.

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Mutex;
use tantivy::collector::TopDocs;
use tantivy::query::QueryParser;
use tantivy::schema::{Field, Schema, Value as _, STORED, TEXT};
use tantivy::{doc, Index, IndexReader, IndexWriter, ReloadPolicy, TantivyDocument};
use tracing::{debug, info, warn};

use crate::indexer::Chunk;

/// Index directory name within .codevec/
const FTS_INDEX_DIR: &str = "fts.index";

const FIELD_PATH: &str = "path";
const FIELD_CONTENT: &str = "content";
const FIELD_IDENTIFIERS: &str = "identifiers";
const FIELD_LINE_START: &str = "line_start";
const FIELD_LINE_END: &str = "line_end";
const FIELD_LANGUAGE: &str = "language";

/// One chunk as a full-text document.
#[derive(Debug, Clone)]
pub struct FtsDocument {
    /// Repo-relative path, same invariant as the vector payload
    pub path: String,
    pub content: String,
    /// Whitespace-split tokens of the chunk, indexed for identifier lookup
    pub identifiers: Vec<String>,
    pub line_start: usize,
    pub line_end: usize,
    pub language: String,
}

impl FtsDocument {
    pub fn for_chunk(path: &str, chunk: &Chunk) -> Self {
        Self {
            path: path.to_string(),
            content: chunk.text.clone(),
            identifiers: chunk.text.split_whitespace().map(String::from).collect(),
            line_start: chunk.line_start,
            line_end: chunk.line_end,
            language: chunk.file_extension.clone(),
        }
    }
}

/// Write-side interface the pipeline uses for the sidecar.
pub trait FullTextIndex: Send + Sync {
    fn add_document(&self, document: FtsDocument) -> Result<()>;

    /// Make pending documents visible to searches.
    fn commit(&self) -> Result<()>;
}

/// A keyword hit, for inspection and tests.
#[derive(Debug, Clone)]
pub struct FtsHit {
    pub path: String,
    pub content: String,
    pub line_start: usize,
    pub line_end: usize,
    pub score: f32,
}

struct FtsSchema {
    schema: Schema,
    path: Field,
    content: Field,
    identifiers: Field,
    line_start: Field,
    line_end: Field,
    language: Field,
}

impl FtsSchema {
    fn new() -> Self {
        let mut builder = Schema::builder();
        let path = builder.add_text_field(FIELD_PATH, TEXT | STORED);
        let content = builder.add_text_field(FIELD_CONTENT, TEXT | STORED);
        let identifiers = builder.add_text_field(FIELD_IDENTIFIERS, TEXT);
        let line_start = builder.add_text_field(FIELD_LINE_START, STORED);
        let line_end = builder.add_text_field(FIELD_LINE_END, STORED);
        let language = builder.add_text_field(FIELD_LANGUAGE, STORED);
        let schema = builder.build();

        Self {
            schema,
            path,
            content,
            identifiers,
            line_start,
            line_end,
            language,
        }
    }
}

/// Tantivy-backed sidecar index.
pub struct TantivyFtsIndex {
    index: Index,
    schema: FtsSchema,
    writer: Mutex<IndexWriter>,
    reader: IndexReader,
}

impl TantivyFtsIndex {
    /// Create or open the sidecar index under `path`.
    pub fn new(path: &Path) -> Result<Self> {
        let index_path = path.join(FTS_INDEX_DIR);
        let schema = FtsSchema::new();

        let index = if index_path.exists() {
            info!("Opening existing full-text index at {:?}", index_path);
            Index::open_in_dir(&index_path)
                .with_context(|| format!("Failed to open full-text index at {:?}", index_path))?
        } else {
            info!("Creating new full-text index at {:?}", index_path);
            std::fs::create_dir_all(&index_path).with_context(|| {
                format!("Failed to create full-text index directory {:?}", index_path)
            })?;
            Index::create_in_dir(&index_path, schema.schema.clone())
                .with_context(|| format!("Failed to create full-text index at {:?}", index_path))?
        };

        let writer = index
            .writer(50_000_000)
            .context("Failed to create full-text index writer")?;

        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::OnCommitWithDelay)
            .try_into()
            .context("Failed to create full-text index reader")?;

        Ok(Self {
            index,
            schema,
            writer: Mutex::new(writer),
            reader,
        })
    }

    /// Search chunk contents, for verification and ad-hoc queries.
    pub fn search(&self, query: &str, limit: usize) -> Result<Vec<FtsHit>> {
        let searcher = self.reader.searcher();
        let parser = QueryParser::for_index(&self.index, vec![self.schema.content]);

        let parsed = match parser.parse_query(query) {
            Ok(q) => q,
            Err(e) => {
                warn!("Failed to parse query '{}': {}", query, e);
                let escaped = query.replace(
                    [
                        '(', ')', '[', ']', '{', '}', '"', '\'', ':', '\\', '/', '^', '~', '*',
                        '?', '!', '+', '-',
                    ],
                    " ",
                );
                parser
                    .parse_query(&escaped)
                    .with_context(|| format!("Failed to parse escaped query: {}", escaped))?
            }
        };

        let top_docs = searcher
            .search(&parsed, &TopDocs::with_limit(limit))
            .context("Full-text search failed")?;

        let mut hits = Vec::with_capacity(top_docs.len());
        for (score, address) in top_docs {
            let retrieved: TantivyDocument = searcher
                .doc(address)
                .context("Failed to retrieve document")?;

            let text_field = |field: Field| {
                retrieved
                    .get_first(field)
                    .and_then(|v| v.as_str())
                    .unwrap_or("")
                    .to_string()
            };
            let line_field = |field: Field| {
                retrieved
                    .get_first(field)
                    .and_then(|v| v.as_str())
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(0)
            };

            hits.push(FtsHit {
                path: text_field(self.schema.path),
                content: text_field(self.schema.content),
                line_start: line_field(self.schema.line_start),
                line_end: line_field(self.schema.line_end),
                score,
            });
        }

        debug!("Full-text search returned {} hits", hits.len());
        Ok(hits)
    }
}

impl FullTextIndex for TantivyFtsIndex {
    fn add_document(&self, document: FtsDocument) -> Result<()> {
        let writer = self
            .writer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        writer.add_document(doc!(
            self.schema.path => document.path.as_str(),
            self.schema.content => document.content.as_str(),
            self.schema.identifiers => document.identifiers.join(" "),
            self.schema.line_start => document.line_start.to_string(),
            self.schema.line_end => document.line_end.to_string(),
            self.schema.language => document.language.as_str(),
        ))?;
        Ok(())
    }

    fn commit(&self) -> Result<()> {
        let mut writer = self
            .writer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        writer
            .commit()
            .context("Failed to commit full-text index")?;
        drop(writer);

        self.reader
            .reload()
            .context("Failed to reload full-text index reader")?;
        info!("Full-text index committed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn chunk(text: &str, index: usize) -> Chunk {
        Chunk {
            text: text.to_string(),
            chunk_index: index,
            total_chunks: 1,
            line_start: 1,
            line_end: 3,
            file_extension: "rs".to_string(),
        }
    }

    #[test]
    fn test_add_and_search() {
        let dir = tempdir().unwrap();
        let index = TantivyFtsIndex::new(dir.path()).unwrap();

        index
            .add_document(FtsDocument::for_chunk(
                "src/main.rs",
                &chunk("fn hello_world() { println!(\"Hello\"); }", 0),
            ))
            .unwrap();
        index
            .add_document(FtsDocument::for_chunk(
                "src/lib.rs",
                &chunk("fn goodbye_world() { println!(\"Goodbye\"); }", 0),
            ))
            .unwrap();
        index.commit().unwrap();

        let hits = index.search("hello", 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].path, "src/main.rs");
        assert!(hits[0].content.contains("hello_world"));
        assert_eq!(hits[0].line_start, 1);
    }

    #[test]
    fn test_for_chunk_splits_identifiers() {
        let doc = FtsDocument::for_chunk("a.rs", &chunk("let x = foo(bar);", 0));
        assert_eq!(doc.identifiers, vec!["let", "x", "=", "foo(bar);"]);
        assert_eq!(doc.language, "rs");
    }

    #[test]
    fn test_malformed_query_is_escaped() {
        let dir = tempdir().unwrap();
        let index = TantivyFtsIndex::new(dir.path()).unwrap();
        index
            .add_document(FtsDocument::for_chunk("a.rs", &chunk("parse this", 0)))
            .unwrap();
        index.commit().unwrap();

        // Unbalanced parenthesis would fail the strict parser
        let hits = index.search("parse (", 10).unwrap();
        assert_eq!(hits.len(), 1);
    }
}
