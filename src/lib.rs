pub mod cli;
pub mod commands;
pub mod config;
pub mod embeddings;
pub mod fts;
pub mod indexer;
pub mod indexing;
pub mod logging;
pub mod project;
pub mod storage;

pub use config::Config;
pub use indexing::{IndexReport, IndexingPipeline, PipelineOptions};
pub use project::{collection_name, compute_project_id, sanitize_name};
