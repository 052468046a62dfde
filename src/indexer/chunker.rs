use anyhow::{Context, Result};
use std::path::Path;

/// A fixed-size slice of one file's text with line-span metadata.
///
/// Chunks of a file form a contiguous ordered sequence `0..total_chunks`;
/// concatenating their texts in order reproduces the file byte for byte.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub text: String,
    pub chunk_index: usize,
    pub total_chunks: usize,
    /// Inclusive, 1-based
    pub line_start: usize,
    /// Inclusive, 1-based
    pub line_end: usize,
    /// Lowercase, no leading dot ("txt" when the file has no extension)
    pub file_extension: String,
}

/// Splits files into fixed-size chunks on line boundaries.
///
/// Lines are never split: a chunk closes once adding the next line would push
/// it past the target size. A single line longer than the target becomes its
/// own oversized chunk rather than being dropped or truncated.
pub struct FixedSizeChunker {
    chunk_size: usize,
}

impl FixedSizeChunker {
    /// Create a chunker with the given target chunk size in bytes.
    pub fn new(chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
        }
    }

    /// Read and chunk a file. Empty files produce no chunks.
    pub fn chunk_file(&self, path: &Path) -> Result<Vec<Chunk>> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Ok(self.chunk_text(&content, &file_extension(path)))
    }

    /// Chunk already-loaded text.
    pub fn chunk_text(&self, content: &str, file_extension: &str) -> Vec<Chunk> {
        if content.is_empty() {
            return Vec::new();
        }

        let mut pieces: Vec<(String, usize, usize)> = Vec::new();
        let mut current = String::new();
        let mut current_start = 1;
        let mut next_line = 1;

        for segment in content.split_inclusive('\n') {
            if !current.is_empty() && current.len() + segment.len() > self.chunk_size {
                pieces.push((std::mem::take(&mut current), current_start, next_line - 1));
                current_start = next_line;
            }
            current.push_str(segment);
            next_line += 1;
        }
        if !current.is_empty() {
            pieces.push((current, current_start, next_line - 1));
        }

        let total_chunks = pieces.len();
        pieces
            .into_iter()
            .enumerate()
            .map(|(chunk_index, (text, line_start, line_end))| Chunk {
                text,
                chunk_index,
                total_chunks,
                line_start,
                line_end,
                file_extension: file_extension.to_string(),
            })
            .collect()
    }
}

/// Lowercase extension without the leading dot; "txt" when absent.
pub fn file_extension(path: &Path) -> String {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_lowercase())
        .unwrap_or_else(|| "txt".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_file_single_chunk() {
        let chunker = FixedSizeChunker::new(2048);
        let content = "fn main() {\n    println!(\"Hello\");\n}";

        let chunks = chunker.chunk_text(content, "rs");

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, content);
        assert_eq!(chunks[0].chunk_index, 0);
        assert_eq!(chunks[0].total_chunks, 1);
        assert_eq!(chunks[0].line_start, 1);
        assert_eq!(chunks[0].line_end, 3);
        assert_eq!(chunks[0].file_extension, "rs");
    }

    #[test]
    fn test_concatenation_reproduces_content() {
        let chunker = FixedSizeChunker::new(64);
        let content = (0..100)
            .map(|i| format!("fn func_{}() {{ /* body */ }}", i))
            .collect::<Vec<_>>()
            .join("\n");

        let chunks = chunker.chunk_text(&content, "rs");

        assert!(chunks.len() > 1);
        let rebuilt: String = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(rebuilt, content);
    }

    #[test]
    fn test_chunks_are_contiguous_and_ordered() {
        let chunker = FixedSizeChunker::new(32);
        let content = (1..=20)
            .map(|i| format!("line number {}", i))
            .collect::<Vec<_>>()
            .join("\n");

        let chunks = chunker.chunk_text(&content, "txt");
        let total = chunks.len();

        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.chunk_index, i);
            assert_eq!(chunk.total_chunks, total);
            assert!(chunk.line_end >= chunk.line_start);
            if i > 0 {
                assert_eq!(chunk.line_start, chunks[i - 1].line_end + 1);
            }
        }
        assert_eq!(chunks[0].line_start, 1);
        assert_eq!(chunks[total - 1].line_end, 20);
    }

    #[test]
    fn test_empty_file() {
        let chunker = FixedSizeChunker::new(2048);
        assert!(chunker.chunk_text("", "rs").is_empty());
    }

    #[test]
    fn test_oversized_line_becomes_own_chunk() {
        let chunker = FixedSizeChunker::new(16);
        let long_line = "x".repeat(100);
        let content = format!("short\n{}\nshort again", long_line);

        let chunks = chunker.chunk_text(&content, "txt");

        assert!(chunks.iter().any(|c| c.text.contains(&long_line)));
        let rebuilt: String = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(rebuilt, content);
    }

    #[test]
    fn test_file_extension() {
        assert_eq!(file_extension(Path::new("main.rs")), "rs");
        assert_eq!(file_extension(Path::new("Upper.PY")), "py");
        assert_eq!(file_extension(Path::new("Makefile")), "txt");
    }
}
