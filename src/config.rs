//! Composer configuration.
//!
//! A JSON file names the collaborators (policy document, retrieval endpoint,
//! generator command, artifact root) and the pipeline limits. Relative paths
//! resolve against the config file's directory. Two environment variables
//! override the file:
//!
//! - `IACC_GENERATOR_COMMAND`: shell-style generator command line
//! - `IACC_RETRIEVAL_URL`: HTTP retrieval endpoint
use crate::generation::default_generator_command;
use crate::prompt::PromptOptions;
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

pub const CONFIG_SCHEMA_VERSION: u32 = 1;
pub const GENERATOR_COMMAND_ENV: &str = "IACC_GENERATOR_COMMAND";
pub const RETRIEVAL_URL_ENV: &str = "IACC_RETRIEVAL_URL";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ComposeConfig {
    pub schema_version: u32,
    pub policy_path: PathBuf,
    pub artifact_root: PathBuf,
    pub retrieval: RetrievalConfig,
    #[serde(default = "default_generator_command")]
    pub generator_command: Vec<String>,
    #[serde(default)]
    pub prompt: PromptOptions,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case", deny_unknown_fields)]
pub enum RetrievalConfig {
    Http { url: String },
    /// Recorded retrieval envelope, for offline runs.
    Fixture { path: PathBuf },
}

/// Per-call limits, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TimeoutConfig {
    #[serde(default = "default_policy_secs")]
    pub policy_secs: u64,
    #[serde(default = "default_retrieval_secs")]
    pub retrieval_secs: u64,
    #[serde(default = "default_generation_secs")]
    pub generation_secs: u64,
    #[serde(default = "default_upload_secs")]
    pub upload_secs: u64,
}

fn default_policy_secs() -> u64 {
    10
}

fn default_retrieval_secs() -> u64 {
    30
}

fn default_generation_secs() -> u64 {
    120
}

fn default_upload_secs() -> u64 {
    30
}

fn default_max_parallel() -> usize {
    8
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            policy_secs: default_policy_secs(),
            retrieval_secs: default_retrieval_secs(),
            generation_secs: default_generation_secs(),
            upload_secs: default_upload_secs(),
        }
    }
}

impl TimeoutConfig {
    pub fn policy(&self) -> Duration {
        Duration::from_secs(self.policy_secs)
    }

    pub fn retrieval(&self) -> Duration {
        Duration::from_secs(self.retrieval_secs)
    }

    pub fn generation(&self) -> Duration {
        Duration::from_secs(self.generation_secs)
    }

    pub fn upload(&self) -> Duration {
        Duration::from_secs(self.upload_secs)
    }
}

/// Config written by `iacc init`-style bootstrapping and used in docs.
pub fn default_config() -> ComposeConfig {
    ComposeConfig {
        schema_version: CONFIG_SCHEMA_VERSION,
        policy_path: PathBuf::from("policy/org-policy.json"),
        artifact_root: PathBuf::from("artifacts"),
        retrieval: RetrievalConfig::Http {
            url: "http://127.0.0.1:8080/retrieve".to_string(),
        },
        generator_command: default_generator_command(),
        prompt: PromptOptions::default(),
        timeouts: TimeoutConfig::default(),
        max_parallel: default_max_parallel(),
    }
}

/// Render a pretty JSON config stub.
pub fn config_stub() -> Result<String> {
    serde_json::to_string_pretty(&default_config()).context("serialize config stub")
}

/// Load, resolve, override from the environment and validate a config file.
pub fn load_config(path: &Path) -> Result<ComposeConfig> {
    let bytes = fs::read(path).with_context(|| format!("read config {}", path.display()))?;
    let mut config: ComposeConfig = serde_json::from_slice(&bytes)
        .with_context(|| format!("parse config JSON {}", path.display()))?;
    let base = path.parent().unwrap_or_else(|| Path::new("."));
    resolve_relative_paths(&mut config, base);
    apply_env_overrides(&mut config, |name| std::env::var(name).ok())?;
    validate_config(&config)?;
    Ok(config)
}

fn resolve_relative_paths(config: &mut ComposeConfig, base: &Path) {
    let resolve = |path: &Path| {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            base.join(path)
        }
    };
    config.policy_path = resolve(&config.policy_path);
    config.artifact_root = resolve(&config.artifact_root);
    if let RetrievalConfig::Fixture { path } = &mut config.retrieval {
        *path = resolve(path);
    }
}

/// Apply environment overrides; `lookup` stands in for `std::env::var`.
pub fn apply_env_overrides<F>(config: &mut ComposeConfig, lookup: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(raw) = lookup(GENERATOR_COMMAND_ENV).filter(|raw| !raw.trim().is_empty()) {
        config.generator_command =
            shell_words::split(&raw).with_context(|| format!("parse {GENERATOR_COMMAND_ENV}"))?;
    }
    if let Some(url) = lookup(RETRIEVAL_URL_ENV).filter(|url| !url.trim().is_empty()) {
        config.retrieval = RetrievalConfig::Http { url };
    }
    Ok(())
}

pub fn validate_config(config: &ComposeConfig) -> Result<()> {
    if config.schema_version != CONFIG_SCHEMA_VERSION {
        return Err(anyhow!(
            "unsupported config schema_version {}",
            config.schema_version
        ));
    }
    if config.generator_command.is_empty() {
        return Err(anyhow!("generator_command must be non-empty"));
    }
    if config.max_parallel == 0 {
        return Err(anyhow!("max_parallel must be >= 1"));
    }
    let timeouts = config.timeouts;
    for (label, secs) in [
        ("policy_secs", timeouts.policy_secs),
        ("retrieval_secs", timeouts.retrieval_secs),
        ("generation_secs", timeouts.generation_secs),
        ("upload_secs", timeouts.upload_secs),
    ] {
        if secs == 0 {
            return Err(anyhow!("timeouts.{label} must be >= 1"));
        }
    }
    if let RetrievalConfig::Http { url } = &config.retrieval {
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(anyhow!("retrieval url must be http(s) (got {url:?})"));
        }
    }
    if config.prompt.expected_files.is_empty() {
        return Err(anyhow!("prompt.expected_files must be non-empty"));
    }
    for name in &config.prompt.expected_files {
        validate_relative_path(name, "prompt.expected_files")?;
    }
    Ok(())
}

fn validate_relative_path(rel: &str, label: &str) -> Result<()> {
    let path = Path::new(rel);
    if rel.trim().is_empty() || path.is_absolute() || has_parent_components(path) {
        return Err(anyhow!(
            "{label} entries must be relative paths without '..' (got {rel:?})"
        ));
    }
    Ok(())
}

fn has_parent_components(path: &Path) -> bool {
    path.components()
        .any(|component| matches!(component, Component::ParentDir))
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
