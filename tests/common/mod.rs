//! Shared test infrastructure for integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use iac_composer::chunk::Chunk;
use iac_composer::error::{ComposeError, UpstreamError};
use iac_composer::generation::Generator;
use iac_composer::policy::{OrgPolicy, PolicyStore};
use iac_composer::prompt::ComposedPrompt;
use iac_composer::request::GenerationRequest;
use iac_composer::retrieval::Retriever;
use iac_composer::store::FsArtifactStore;
use iac_composer::{ComposeOptions, Composer};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

pub fn policy_from(json: serde_json::Value) -> OrgPolicy {
    serde_json::from_value(json).expect("test policy decodes")
}

/// Policy store that always returns the same document.
pub struct StaticPolicy(pub OrgPolicy);

#[async_trait]
impl PolicyStore for StaticPolicy {
    async fn load(&self) -> Result<OrgPolicy, ComposeError> {
        Ok(self.0.clone())
    }
}

/// Retriever returning canned chunks, optionally after a delay.
pub struct StaticRetriever {
    pub chunks: Vec<Chunk>,
    pub delay: Option<Duration>,
    pub seen_asks: Mutex<Vec<String>>,
}

impl StaticRetriever {
    pub fn new(chunks: Vec<Chunk>) -> Self {
        Self {
            chunks,
            delay: None,
            seen_asks: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl Retriever for StaticRetriever {
    async fn retrieve(&self, request: &GenerationRequest) -> Result<Vec<Chunk>, UpstreamError> {
        self.seen_asks.lock().expect("lock").push(request.ask.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.chunks.clone())
    }
}

/// Generator that records each prompt and answers with a fixed reply.
pub struct RecordingGenerator {
    pub reply: String,
    pub delay: Option<Duration>,
    pub prompts: Mutex<Vec<ComposedPrompt>>,
}

impl RecordingGenerator {
    pub fn new(reply: impl Into<String>) -> Self {
        Self {
            reply: reply.into(),
            delay: None,
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn last_prompt(&self) -> ComposedPrompt {
        self.prompts
            .lock()
            .expect("lock")
            .last()
            .cloned()
            .expect("generator was called")
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().expect("lock").len()
    }
}

#[async_trait]
impl Generator for RecordingGenerator {
    async fn generate(&self, prompt: &ComposedPrompt) -> Result<String, UpstreamError> {
        self.prompts.lock().expect("lock").push(prompt.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.reply.clone())
    }
}

/// A composer over fakes, persisting into a private temp directory.
pub struct Harness {
    pub artifact_root: TempDir,
    pub retriever: Arc<StaticRetriever>,
    pub generator: Arc<RecordingGenerator>,
    pub composer: Composer,
}

impl Harness {
    pub fn new(policy: OrgPolicy, retriever: StaticRetriever, generator: RecordingGenerator) -> Self {
        Self::with_options(policy, retriever, generator, ComposeOptions::default())
    }

    pub fn with_options(
        policy: OrgPolicy,
        retriever: StaticRetriever,
        generator: RecordingGenerator,
        options: ComposeOptions,
    ) -> Self {
        let artifact_root = TempDir::new().expect("tempdir");
        let retriever = Arc::new(retriever);
        let generator = Arc::new(generator);
        let composer = Composer::new(
            Arc::new(StaticPolicy(policy)),
            retriever.clone(),
            generator.clone(),
            Arc::new(FsArtifactStore::new(artifact_root.path())),
            options,
        );
        Self {
            artifact_root,
            retriever,
            generator,
            composer,
        }
    }

    pub fn artifact_path(&self, request_id: &str, filename: &str) -> PathBuf {
        self.artifact_root
            .path()
            .join("requests")
            .join(request_id)
            .join(filename)
    }
}

pub fn write_json(path: &Path, value: &serde_json::Value) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("create parent directory");
    }
    let text = serde_json::to_string_pretty(value).expect("serialize fixture");
    std::fs::write(path, text).expect("write fixture");
}

/// Path to the compiled `iacc` binary under test.
pub fn iacc_bin() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_iacc"))
}
