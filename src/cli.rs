use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "clausecheck",
    version,
    about = "Employment-contract compliance checking against a labour-law reference"
)]
pub struct Cli {
    /// Path to the JSON config file (default: config.json)
    #[arg(long, global = true, default_value = "")]
    pub config: String,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Serve the MCP tools over stdio (default)
    Serve,
    /// Build the statute reference collection if missing or stale
    Reference(ReferenceArgs),
    /// Analyse one contract and print its report as JSON
    Analyze(AnalyzeArgs),
    /// Show a stored contract record
    Status(StatusArgs),
    /// Search the statute reference collection
    Search(SearchArgs),
    /// Ask a question about an analysed contract
    Chat(ChatArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ReferenceArgs {
    /// Rebuild even when the collection is up to date
    #[arg(long, default_value_t = false)]
    pub force: bool,

    /// Reference document (default: reference.source_path)
    #[arg(long)]
    pub source: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct AnalyzeArgs {
    pub file: PathBuf,
}

#[derive(Args, Debug, Clone)]
pub struct StatusArgs {
    pub contract_id: String,
}

#[derive(Args, Debug, Clone)]
pub struct SearchArgs {
    pub query: String,

    #[arg(long, default_value_t = 5)]
    pub top_k: usize,
}

#[derive(Args, Debug, Clone)]
pub struct ChatArgs {
    pub contract_id: String,
    pub message: String,
}
