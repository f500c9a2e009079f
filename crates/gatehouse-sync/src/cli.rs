use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "gatehouse", version)]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Create the permission tables and the search index.
    Migrate,
    /// Rebuild the search index from the permission store.
    ReindexAll,
    /// Re-index resources changed since their last successful index write.
    CatchUp,
    /// Remove a resource's authorization document from the index.
    DeleteResource {
        #[arg(long)]
        resource: String,
        #[arg(long)]
        with_descendants: bool,
    },
}
