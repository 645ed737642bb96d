use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "deck",
    about = "Deck: schema-governed data kernel",
    version,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Kernel configuration file (TOML)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// List the bootstrap types
    Types,
    /// Run a query against an in-memory kernel seeded from a file
    Query(QueryArgs),
}

#[derive(Args)]
pub struct QueryArgs {
    /// JSON array of cards to insert before querying
    #[arg(long)]
    pub seed: Option<PathBuf>,
    /// JSON schema file describing the query
    #[arg(long)]
    pub schema: PathBuf,
    #[arg(long)]
    pub limit: Option<usize>,
    #[arg(long, default_value = "0")]
    pub skip: usize,
    /// Dotted property path, e.g. `data.timestamp`
    #[arg(long)]
    pub sort_by: Option<String>,
    /// Sort descending
    #[arg(long)]
    pub desc: bool,
}

impl QueryArgs {
    pub fn sort_path(&self) -> Vec<String> {
        self.sort_by
            .as_deref()
            .map(|path| path.split('.').map(str::to_string).collect())
            .unwrap_or_default()
    }
}
