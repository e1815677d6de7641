//! Compose orchestration: one request from ask to persisted artifacts.
//!
//! Every external call runs under its own timeout and is raced against the
//! caller's [`CancellationToken`]; cancelling drops the in-flight call. Nothing
//! is retried.
use crate::artifact::decompose;
use crate::chunk::{AnnotatedChunk, Chunk};
use crate::config::{ComposeConfig, RetrievalConfig};
use crate::error::{ComposeError, Service, UpstreamError};
use crate::generation::{CommandGenerator, Generator};
use crate::policy::{enforce_all, FilePolicyStore, OrgPolicy, PolicyStore};
use crate::prompt::{compose_prompt, PromptOptions};
use crate::request::{ComposeInput, ComposeResult, GenerationRequest};
use crate::resolve::{filter_chunks, resolve_modules};
use crate::retrieval::{FixtureRetriever, HttpRetriever, Retriever};
use crate::store::{persist_artifacts, ArtifactStore, FsArtifactStore, PersistOptions};
use crate::util::truncate_string;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

#[derive(Debug, Clone)]
pub struct ComposeOptions {
    pub prompt: PromptOptions,
    pub max_parallel: usize,
    pub policy_timeout: Duration,
    pub retrieval_timeout: Duration,
    pub generation_timeout: Duration,
    pub upload_timeout: Duration,
}

impl Default for ComposeOptions {
    fn default() -> Self {
        Self {
            prompt: PromptOptions::default(),
            max_parallel: 8,
            policy_timeout: Duration::from_secs(10),
            retrieval_timeout: Duration::from_secs(30),
            generation_timeout: Duration::from_secs(120),
            upload_timeout: Duration::from_secs(30),
        }
    }
}

impl ComposeOptions {
    pub fn from_config(config: &ComposeConfig) -> Self {
        Self {
            prompt: config.prompt.clone(),
            max_parallel: config.max_parallel,
            policy_timeout: config.timeouts.policy(),
            retrieval_timeout: config.timeouts.retrieval(),
            generation_timeout: config.timeouts.generation(),
            upload_timeout: config.timeouts.upload(),
        }
    }
}

/// The compose pipeline with its collaborators injected.
pub struct Composer {
    policy_store: Arc<dyn PolicyStore>,
    retriever: Arc<dyn Retriever>,
    generator: Arc<dyn Generator>,
    store: Arc<dyn ArtifactStore>,
    options: ComposeOptions,
}

impl Composer {
    pub fn new(
        policy_store: Arc<dyn PolicyStore>,
        retriever: Arc<dyn Retriever>,
        generator: Arc<dyn Generator>,
        store: Arc<dyn ArtifactStore>,
        options: ComposeOptions,
    ) -> Self {
        Self {
            policy_store,
            retriever,
            generator,
            store,
            options,
        }
    }

    /// Wire the file/HTTP/command collaborators named by a config.
    pub fn from_config(config: &ComposeConfig) -> Result<Self, ComposeError> {
        let options = ComposeOptions::from_config(config);
        let retriever: Arc<dyn Retriever> = match &config.retrieval {
            RetrievalConfig::Http { url } => Arc::new(
                HttpRetriever::new(url.clone(), options.retrieval_timeout)
                    .map_err(|err| ComposeError::configuration(err.to_string()))?,
            ),
            RetrievalConfig::Fixture { path } => Arc::new(FixtureRetriever::new(path.clone())),
        };
        let generator = CommandGenerator::new(config.generator_command.clone())
            .map_err(|err| ComposeError::configuration(err.to_string()))?;
        Ok(Self::new(
            Arc::new(FilePolicyStore::new(config.policy_path.clone())),
            retriever,
            Arc::new(generator),
            Arc::new(FsArtifactStore::new(config.artifact_root.clone())),
            options,
        ))
    }

    /// Run the pipeline for a caller payload under a fresh request id.
    pub async fn compose(
        &self,
        input: ComposeInput,
        cancel: &CancellationToken,
    ) -> Result<ComposeResult, ComposeError> {
        let request = GenerationRequest::new(input);
        let span = tracing::info_span!("compose", request_id = %request.request_id);
        self.compose_request(&request, cancel).instrument(span).await
    }

    pub async fn compose_request(
        &self,
        request: &GenerationRequest,
        cancel: &CancellationToken,
    ) -> Result<ComposeResult, ComposeError> {
        let start = Instant::now();
        let options = &self.options;

        let (policy, chunks) = tokio::try_join!(
            guarded(
                "policy load",
                Service::PolicyStore,
                options.policy_timeout,
                cancel,
                self.policy_store.load(),
            ),
            guarded(
                "retrieval",
                Service::Retrieval,
                options.retrieval_timeout,
                cancel,
                async {
                    self.retriever
                        .retrieve(request)
                        .await
                        .map_err(ComposeError::from)
                },
            ),
        )?;
        let policy = Arc::new(policy);

        let enforced = annotate(
            &request.ask,
            chunks,
            Arc::clone(&policy),
            options.max_parallel,
        )
        .await?;

        let prompt = compose_prompt(&request.ask, &enforced, &policy, &options.prompt)
            .map_err(|err| ComposeError::Internal(format!("serialize prompt: {err}")))?;
        tracing::debug!(prompt_bytes = prompt.text.len(), "prompt composed");

        let reply = guarded(
            "generation",
            Service::Generation,
            options.generation_timeout,
            cancel,
            async {
                self.generator
                    .generate(&prompt)
                    .await
                    .map_err(ComposeError::from)
            },
        )
        .await?;

        let decomposition = decompose(&reply).inspect_err(|err| {
            tracing::warn!(
                error = %err,
                reply_preview = %truncate_string(&reply, 300),
                "generator reply did not parse"
            );
        })?;

        let request_id = request.request_id.to_string();
        let persist_options = PersistOptions {
            max_parallel: options.max_parallel,
            upload_timeout: options.upload_timeout,
        };
        let files = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ComposeError::Cancelled { stage: "persist" }),
            persisted = persist_artifacts(
                Arc::clone(&self.store),
                &request_id,
                &decomposition.artifacts,
                persist_options,
            ) => persisted?,
        };

        tracing::info!(
            elapsed_ms = start.elapsed().as_millis() as u64,
            files = files.len(),
            "compose complete"
        );
        Ok(ComposeResult {
            request_id,
            files,
            retrieved_modules: enforced
                .iter()
                .map(|annotated| annotated.chunk.module_name.clone())
                .collect(),
        })
    }
}

/// Resolve, filter and enforce: the offline half of the pipeline.
pub async fn annotate(
    ask: &str,
    chunks: Vec<Chunk>,
    policy: Arc<OrgPolicy>,
    max_parallel: usize,
) -> Result<Vec<AnnotatedChunk>, ComposeError> {
    let retrieved = chunks.len();
    let resolution = resolve_modules(ask, &policy.allowed_modules);
    let filtered = filter_chunks(chunks, &resolution.requested);
    let enforced = enforce_all(filtered, policy, max_parallel).await?;
    let non_compliant = enforced.iter().filter(|chunk| !chunk.is_compliant()).count();
    tracing::info!(
        retrieved,
        requested_modules = ?resolution.requested,
        kept = enforced.len(),
        non_compliant,
        "chunks evaluated"
    );
    Ok(enforced)
}

/// Run one external call under a timeout, abandoning it on cancellation.
async fn guarded<T, F>(
    stage: &'static str,
    service: Service,
    limit: Duration,
    cancel: &CancellationToken,
    call: F,
) -> Result<T, ComposeError>
where
    F: Future<Output = Result<T, ComposeError>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ComposeError::Cancelled { stage }),
        outcome = tokio::time::timeout(limit, call) => match outcome {
            Ok(result) => result,
            Err(_) => Err(UpstreamError::TimedOut { service, after: limit }.into()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn guarded_times_out_slow_calls() {
        let cancel = CancellationToken::new();
        let err = guarded(
            "generation",
            Service::Generation,
            Duration::from_millis(20),
            &cancel,
            async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok::<_, ComposeError>(())
            },
        )
        .await
        .expect_err("timeout");
        assert!(matches!(
            err,
            ComposeError::Upstream(UpstreamError::TimedOut {
                service: Service::Generation,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn guarded_honours_cancellation() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = guarded(
            "retrieval",
            Service::Retrieval,
            Duration::from_secs(10),
            &cancel,
            async { Ok::<_, ComposeError>(1) },
        )
        .await
        .expect_err("cancelled");
        assert!(matches!(err, ComposeError::Cancelled { stage: "retrieval" }));
    }

    #[tokio::test]
    async fn annotate_fails_closed_without_requested_modules() {
        let policy = Arc::new(OrgPolicy::default());
        let chunks = vec![Chunk::new("m/s3/main.tf", "s3", "aws_s3_bucket")];
        let annotated = annotate("Create an S3 bucket", chunks, policy, 2)
            .await
            .expect("annotate");
        assert!(annotated.is_empty());
    }
}
