mod chunker;
mod discover;

pub use chunker::{file_extension, Chunk, FixedSizeChunker};
pub use discover::discover_files;
