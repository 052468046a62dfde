//! Index command: run the full pipeline over the repository.

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::warn;

use crate::config::Config;
use crate::embeddings::{create_provider, default_vector_thread_count};
use crate::fts::{FullTextIndex, TantivyFtsIndex};
use crate::indexer::discover_files;
use crate::indexing::{IndexingPipeline, PipelineOptions, ProgressCallback, ProgressEvent};
use crate::project::{collection_name, compute_project_id};
use crate::storage::FilesystemVectorStore;

pub async fn run(path: Option<PathBuf>) -> Result<()> {
    let root = match path {
        Some(p) => p.canonicalize().context("Failed to resolve repository root")?,
        None => env::current_dir()?,
    };
    let config = Config::load(&root)?;

    let provider = create_provider(&config.embeddings)?;
    let project_id = compute_project_id(&root)?;
    let collection = config
        .storage
        .collection
        .clone()
        .unwrap_or_else(|| collection_name(&project_id, &provider.current_model()));

    let store = Arc::new(FilesystemVectorStore::new(
        config.index_root(&root),
        provider.provider_name(),
        &provider.current_model(),
        provider.embedding_dimension(),
    )?);

    let fts: Option<Arc<TantivyFtsIndex>> = if config.storage.full_text {
        let fts_root = config.fts_root(&root);
        std::fs::create_dir_all(&fts_root)
            .with_context(|| format!("Failed to create {}", fts_root.display()))?;
        Some(Arc::new(TantivyFtsIndex::new(&fts_root)?))
    } else {
        None
    };

    let files = discover_files(&root, &config.indexer);
    if files.is_empty() {
        println!("No candidate files found under {}", root.display());
        return Ok(());
    }

    let progress_bar = ProgressBar::new(files.len() as u64);
    progress_bar.set_style(
        ProgressStyle::default_bar()
            .template(
                "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}",
            )
            .unwrap()
            .progress_chars("#>-"),
    );

    let bar = progress_bar.clone();
    let progress: ProgressCallback = Arc::new(move |event: ProgressEvent| {
        if event.is_setup() {
            bar.set_message(event.info);
        } else {
            bar.set_position(event.current as u64);
            bar.set_message(event.info);
        }
    });

    let vector_threads = config
        .indexer
        .vector_thread_count
        .unwrap_or_else(|| default_vector_thread_count(provider.as_ref()));

    let options = PipelineOptions::from_config(
        &config.indexer,
        root.clone(),
        project_id,
        Some(collection),
        vector_threads,
    );
    let pipeline = IndexingPipeline::new(
        provider,
        store,
        fts.clone().map(|f| f as Arc<dyn FullTextIndex>),
        options,
        Some(progress),
    )?;

    // Ctrl-C stops submission; in-flight files finish atomically.
    let cancel = pipeline.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nCancellation requested; letting in-flight files finish...");
            cancel.cancel();
        }
    });

    let report = pipeline.run(files).await;
    progress_bar.finish_with_message(report.summary());

    if let Some(fts) = fts {
        if let Err(e) = fts.commit() {
            warn!("Full-text sidecar commit failed: {:#}", e);
        }
    }

    println!("Project root: {}", root.display());
    println!(
        "Indexed {} files ({} chunks) in {:.2}s",
        report.files_processed,
        report.chunks_created,
        report.elapsed.as_secs_f64()
    );
    if report.files_failed > 0 {
        println!("{} files failed:", report.files_failed);
        for (path, error) in report.failures.iter().take(10) {
            println!("  {}: {}", path.display(), error);
        }
        if report.failures.len() > 10 {
            println!("  ... and {} more", report.failures.len() - 10);
        }
    }
    if report.cancelled {
        println!("Run was cancelled before all files were submitted.");
    }

    Ok(())
}
