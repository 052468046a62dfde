//! Init command: write a default configuration into .codevec/.

use anyhow::{bail, Result};
use std::env;

use crate::config::Config;

pub async fn run(force: bool) -> Result<()> {
    let root = env::current_dir()?;

    if Config::is_initialized(&root) && !force {
        bail!(
            "codevec is already initialized in {} (use --force to overwrite)",
            root.display()
        );
    }

    let config = Config::default();
    config.save(&root)?;

    println!("Initialized codevec in {}", Config::codevec_dir(&root).display());
    println!("Edit .codevec/config.toml to adjust providers and workers.");
    Ok(())
}
