//! CLI argument parsing for the compose pipeline.
//!
//! The CLI stays thin: it loads config, wires collaborators and prints JSON.
use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub const DEFAULT_CONFIG_PATH: &str = "iacc.json";

#[derive(Parser, Debug)]
#[command(
    name = "iacc",
    version,
    about = "Generate policy-checked Terraform from a free-text request",
    after_help = "Commands:\n  init                          Write a config stub\n  compose --ask <text>          Run the full pipeline and persist artifacts\n  check --policy <f> --chunks <f> --ask <text>\n                                Resolve, filter and policy-check chunks offline\n  list --request-id <id>        List persisted artifacts of a request\n\nExamples:\n  iacc init --config iacc.json\n  iacc compose --ask \"Create an S3 bucket\"\n  iacc check --policy org-policy.json --chunks retrieval.json --ask \"Create an S3 bucket\"\n  iacc list --request-id 7c1c0f3e-...",
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct RootArgs {
    /// Emit debug-level logs (RUST_LOG takes precedence when set)
    #[arg(long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    Init(InitArgs),
    Compose(ComposeArgs),
    Check(CheckArgs),
    List(ListArgs),
}

/// Init command inputs for writing a config stub.
#[derive(Parser, Debug)]
#[command(about = "Write a config stub")]
pub struct InitArgs {
    /// Config file to create
    #[arg(long, value_name = "PATH", default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Overwrite an existing config
    #[arg(long)]
    pub force: bool,
}

/// Compose command inputs for one generation request.
#[derive(Parser, Debug)]
#[command(about = "Run the compose pipeline for one request")]
pub struct ComposeArgs {
    /// Config file naming policy, retrieval, generator and artifact store
    #[arg(long, value_name = "PATH", default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Free-text infrastructure request
    #[arg(long, conflicts_with = "request")]
    pub ask: Option<String>,

    /// Constraints object passed to retrieval, as JSON
    #[arg(long, value_name = "JSON", conflicts_with = "request")]
    pub constraints: Option<String>,

    /// Request payload file: {"ask": ..., "constraints": {...}}
    #[arg(long, value_name = "PATH")]
    pub request: Option<PathBuf>,

    /// Also write the result JSON to this path
    #[arg(long, value_name = "PATH")]
    pub out: Option<PathBuf>,
}

/// Check command inputs for offline policy evaluation.
#[derive(Parser, Debug)]
#[command(about = "Resolve, filter and policy-check retrieved chunks offline")]
pub struct CheckArgs {
    /// Org policy JSON document
    #[arg(long, value_name = "PATH")]
    pub policy: PathBuf,

    /// Retrieval response envelope JSON ({"body": {"top_k_chunks": [...]}})
    #[arg(long, value_name = "PATH")]
    pub chunks: PathBuf,

    /// Free-text infrastructure request
    #[arg(long)]
    pub ask: String,

    /// Exit non-zero when any kept chunk is non-compliant
    #[arg(long)]
    pub strict: bool,
}

/// List command inputs for inspecting persisted artifacts.
#[derive(Parser, Debug)]
#[command(about = "List persisted artifacts of a request")]
pub struct ListArgs {
    #[arg(long, value_name = "PATH", default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Request id printed by `compose`
    #[arg(long, value_name = "UUID")]
    pub request_id: String,
}
