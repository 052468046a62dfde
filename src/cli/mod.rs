use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "codevec")]
#[command(author, version, about = "Parallel semantic indexing for code search")]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize codevec in the current directory
    Init {
        /// Overwrite an existing configuration
        #[arg(long)]
        force: bool,
    },

    /// Index or re-index the codebase
    Index {
        /// Repository root to index (defaults to the current directory)
        #[arg(short, long)]
        path: Option<PathBuf>,
    },

    /// Show index collections and their sizes
    Status,
}
