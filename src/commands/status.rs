//! Status command: list collections in the local vector index.

use anyhow::Result;
use std::env;

use crate::config::Config;
use crate::storage::FilesystemVectorStore;

pub async fn run() -> Result<()> {
    let root = env::current_dir()?;
    let config = Config::load(&root)?;

    let index_root = config.index_root(&root);
    if !index_root.exists() {
        println!(
            "No index found at {}. Run `codevec index` first.",
            index_root.display()
        );
        return Ok(());
    }

    // Reading metadata needs no live provider; collection meta carries the
    // provider and model it was written with.
    let store = FilesystemVectorStore::new(
        &index_root,
        &config.embeddings.provider.to_string(),
        &config.embeddings.model,
        0,
    )?;

    let names = store.collection_names()?;
    if names.is_empty() {
        println!("Index directory exists but holds no collections yet.");
        return Ok(());
    }

    println!("Collections in {}:", index_root.display());
    for name in names {
        let meta = store.collection_meta(&name)?;
        println!(
            "  {}: {} vectors ({} / {}, {} dims)",
            meta.name,
            meta.vector_count,
            meta.embedding_provider,
            meta.embedding_model,
            meta.embedding_dimensions
        );
    }
    Ok(())
}
