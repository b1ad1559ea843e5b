//! CLI argument definitions.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use localdex_core::config::StrategyName;
use localdex_core::types::SearchMode;

use crate::commands;

#[derive(Parser)]
#[command(name = "localdex")]
#[command(about = "Local hybrid search over a project's code and docs")]
#[command(version)]
pub struct Cli {
    /// Project root to operate on
    #[arg(short, long, global = true, default_value = ".", env = "LOCALDEX_PROJECT")]
    pub project: PathBuf,

    /// Print machine-readable JSON instead of text
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Build or refresh the whole index
    Index,

    /// Re-index one file, or drop it if it no longer exists
    Update {
        /// Path relative to the project root
        path: String,
    },

    /// Query the index
    Search(SearchArgs),

    /// Show index state
    Status,

    /// Delete the index, keeping its config file
    Delete,

    /// Keep the index in sync with the file tree until Ctrl-C
    Watch {
        /// Strategy to run; defaults to the configured one
        #[arg(short, long)]
        strategy: Option<StrategyName>,
    },

    /// Compare the index with the project and heal any drift
    Repair {
        /// Use `git ls-files` as the list of files that should be indexed
        #[arg(long)]
        git: bool,

        /// Only report drift
        #[arg(long)]
        dry_run: bool,
    },
}

#[derive(Args)]
pub struct SearchArgs {
    pub query: String,

    #[arg(short = 'k', long, default_value_t = 10)]
    pub top_k: usize,

    /// vector, lexical or hybrid
    #[arg(short, long, default_value = "hybrid")]
    pub mode: SearchMode,

    /// Weight of the vector ranking in hybrid mode, 0.0 to 1.0
    #[arg(short, long)]
    pub alpha: Option<f32>,
}

impl Cli {
    pub async fn execute(&self) -> anyhow::Result<()> {
        let index = commands::open(&self.project).await?;
        match &self.command {
            Command::Index => commands::index(&index, self.json).await,
            Command::Update { path } => commands::update(&index, path, self.json).await,
            Command::Search(args) => commands::search(&index, args, self.json).await,
            Command::Status => commands::status(&index, self.json).await,
            Command::Delete => commands::delete(&index).await,
            Command::Watch { strategy } => commands::watch(&index, *strategy).await,
            Command::Repair { git, dry_run } => commands::repair(&index, *git, *dry_run, self.json).await,
        }
    }
}
