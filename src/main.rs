use anyhow::{anyhow, Context, Result};
use clap::Parser;
use iac_composer::config::{config_stub, load_config};
use iac_composer::policy::OrgPolicy;
use iac_composer::request::{ComposeInput, DEFAULT_ASK};
use iac_composer::retrieval::decode_retrieval_response;
use iac_composer::store::{ArtifactStore, FsArtifactStore, REQUESTS_PREFIX};
use iac_composer::util::display_path;
use iac_composer::{annotate, Composer};
use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

mod cli;

use cli::{CheckArgs, Command, ComposeArgs, InitArgs, ListArgs, RootArgs};

#[tokio::main]
async fn main() -> Result<()> {
    let args = RootArgs::parse();
    init_tracing(args.verbose);

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received; cancelling");
            on_signal.cancel();
        }
    });

    match args.command {
        Command::Init(args) => run_init(&args),
        Command::Compose(args) => run_compose(&args, &cancel).await,
        Command::Check(args) => run_check(&args).await,
        Command::List(args) => run_list(&args).await,
    }
}

/// Logs go to stderr so stdout stays machine-readable.
fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(verbose)
        .with_writer(std::io::stderr)
        .init();
}

fn run_init(args: &InitArgs) -> Result<()> {
    if args.config.exists() && !args.force {
        return Err(anyhow!(
            "config already exists at {} (use --force to overwrite)",
            args.config.display()
        ));
    }
    if let Some(parent) = args.config.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create {}", parent.display()))?;
    }
    let stub = config_stub()?;
    std::fs::write(&args.config, format!("{stub}\n"))
        .with_context(|| format!("write config {}", args.config.display()))?;
    println!("{}", args.config.display());
    Ok(())
}

async fn run_compose(args: &ComposeArgs, cancel: &CancellationToken) -> Result<()> {
    let config = load_config(&args.config)?;
    let input = compose_input(args)?;
    let composer = Composer::from_config(&config)?;
    let result = composer.compose(input, cancel).await?;

    let text = serde_json::to_string_pretty(&result).context("serialize compose result")?;
    if let Some(out) = args.out.as_ref() {
        std::fs::write(out, format!("{text}\n"))
            .with_context(|| format!("write result {}", out.display()))?;
    }
    println!("{text}");
    Ok(())
}

fn compose_input(args: &ComposeArgs) -> Result<ComposeInput> {
    if let Some(path) = args.request.as_ref() {
        let bytes = std::fs::read(path).with_context(|| format!("read request {}", path.display()))?;
        return serde_json::from_slice(&bytes)
            .with_context(|| format!("parse request JSON {}", path.display()));
    }
    let mut input = ComposeInput::new(args.ask.as_deref().unwrap_or(DEFAULT_ASK));
    if let Some(raw) = args.constraints.as_deref() {
        input.constraints = serde_json::from_str(raw).context("parse --constraints as a JSON object")?;
    }
    Ok(input)
}

#[derive(Serialize)]
struct CheckReport<'a> {
    ask: &'a str,
    kept: usize,
    non_compliant: usize,
    chunks: Vec<iac_composer::chunk::AnnotatedChunk>,
}

async fn run_check(args: &CheckArgs) -> Result<()> {
    let policy_bytes = std::fs::read(&args.policy)
        .with_context(|| format!("read policy {}", args.policy.display()))?;
    let policy = OrgPolicy::from_json(&policy_bytes, &args.policy.display().to_string())?;

    let chunk_bytes = std::fs::read(&args.chunks)
        .with_context(|| format!("read chunks {}", args.chunks.display()))?;
    let envelope: serde_json::Value = serde_json::from_slice(&chunk_bytes)
        .with_context(|| format!("parse chunks JSON {}", args.chunks.display()))?;
    let chunks = decode_retrieval_response(&envelope)?;

    let annotated = annotate(&args.ask, chunks, Arc::new(policy), num_workers()).await?;
    let non_compliant = annotated.iter().filter(|chunk| !chunk.is_compliant()).count();
    let report = CheckReport {
        ask: &args.ask,
        kept: annotated.len(),
        non_compliant,
        chunks: annotated,
    };
    println!(
        "{}",
        serde_json::to_string_pretty(&report).context("serialize check report")?
    );
    if args.strict && non_compliant > 0 {
        return Err(anyhow!("{non_compliant} chunk(s) violate org policy"));
    }
    Ok(())
}

async fn run_list(args: &ListArgs) -> Result<()> {
    let config = load_config(&args.config)?;
    let store = FsArtifactStore::new(config.artifact_root.clone());
    let prefix = format!("{REQUESTS_PREFIX}/{}", args.request_id);
    let keys = store.list(&prefix).await?;
    if keys.is_empty() {
        return Err(anyhow!("no artifacts for request {}", args.request_id));
    }
    let cwd = std::env::current_dir().ok();
    for key in keys {
        let path = store.root().join(&key);
        println!("{}", display_path(&path, cwd.as_deref()));
    }
    Ok(())
}

fn num_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}
