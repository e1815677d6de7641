//! Artifact persistence.
//!
//! Artifacts are written to a local staging directory first and uploaded from
//! there, one store call per file. Uploads are not transactional: when some
//! fail, the ones that succeeded stay put and are reported. The staging
//! directory is removed on every exit path when its guard drops.
use crate::artifact::Artifact;
use crate::error::{ComposeError, PersistenceError, Service, UpstreamError};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

pub const REQUESTS_PREFIX: &str = "requests";

/// Storage key for one artifact of a request.
pub fn artifact_key(request_id: &str, filename: &str) -> String {
    format!("{REQUESTS_PREFIX}/{request_id}/{filename}")
}

/// Write-mostly object store keyed by `/`-separated strings.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Upload the file at `source` under `key`, replacing any existing object.
    async fn put(&self, key: &str, source: &Path) -> Result<(), UpstreamError>;

    /// Keys under `prefix`, sorted.
    async fn list(&self, prefix: &str) -> Result<Vec<String>, UpstreamError>;
}

/// Object store backed by a directory tree.
#[derive(Debug, Clone)]
pub struct FsArtifactStore {
    root: PathBuf,
}

impl FsArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, key: &str) -> Result<PathBuf, UpstreamError> {
        let rel = Path::new(key);
        let escapes = rel
            .components()
            .any(|component| !matches!(component, Component::Normal(_) | Component::CurDir));
        if key.is_empty() || escapes {
            return Err(UpstreamError::failed(
                Service::ArtifactStore,
                format!("invalid key {key:?}"),
            ));
        }
        Ok(self.root.join(rel))
    }
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    async fn put(&self, key: &str, source: &Path) -> Result<(), UpstreamError> {
        let dest = self.resolve(key)?;
        let source = source.to_path_buf();
        tokio::task::spawn_blocking(move || publish_file(&source, &dest))
            .await
            .map_err(|err| UpstreamError::failed(Service::ArtifactStore, err.to_string()))?
            .map_err(|err| UpstreamError::failed(Service::ArtifactStore, format!("put {key}: {err}")))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, UpstreamError> {
        let dir = self.resolve(prefix)?;
        let root = self.root.clone();
        tokio::task::spawn_blocking(move || -> std::io::Result<Vec<String>> {
            let files = collect_files_recursive(&dir)?;
            Ok(files
                .iter()
                .filter_map(|path| path.strip_prefix(&root).ok())
                .map(key_from_relative)
                .collect())
        })
        .await
        .map_err(|err| UpstreamError::failed(Service::ArtifactStore, err.to_string()))?
        .map_err(|err| {
            UpstreamError::failed(Service::ArtifactStore, format!("list {prefix}: {err}"))
        })
    }
}

fn key_from_relative(rel: &Path) -> String {
    rel.components()
        .map(|component| component.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// Copy to a sibling temp file, then rename, so readers never see a
/// half-written object.
fn publish_file(source: &Path, dest: &Path) -> std::io::Result<()> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    let file_name = dest
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("artifact");
    let tmp_path = dest
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join(format!(".{file_name}.tmp"));
    fs::copy(source, &tmp_path)?;
    fs::rename(&tmp_path, dest)?;
    Ok(())
}

fn collect_files_recursive(root: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    if !root.exists() {
        return Ok(files);
    }
    for entry in fs::read_dir(root)? {
        let path = entry?.path();
        if path.is_dir() {
            files.extend(collect_files_recursive(&path)?);
        } else if path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

#[derive(Debug, Clone, Copy)]
pub struct PersistOptions {
    pub max_parallel: usize,
    pub upload_timeout: Duration,
}

/// Stage and upload every artifact under `requests/{request_id}/`.
///
/// Returns the persisted filenames in artifact order. When any upload fails
/// the result is a [`PersistenceError`] listing what did reach the store.
pub async fn persist_artifacts(
    store: Arc<dyn ArtifactStore>,
    request_id: &str,
    artifacts: &[Artifact],
    options: PersistOptions,
) -> Result<Vec<String>, ComposeError> {
    let staging = tempfile::Builder::new()
        .prefix(&format!("iacc-{request_id}-"))
        .tempdir()?;

    let mut staged = Vec::with_capacity(artifacts.len());
    for artifact in artifacts {
        let path = staging.path().join(&artifact.filename);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, artifact.content.as_bytes()).await?;
        staged.push((artifact.filename.clone(), path));
    }

    let mut outcomes: Vec<(usize, String, Result<(), UpstreamError>)> = stream::iter(
        staged.into_iter().enumerate(),
    )
    .map(|(idx, (filename, path))| {
        let store = Arc::clone(&store);
        let key = artifact_key(request_id, &filename);
        async move {
            let outcome = match tokio::time::timeout(options.upload_timeout, store.put(&key, &path)).await {
                Ok(result) => result,
                Err(_) => Err(UpstreamError::TimedOut {
                    service: Service::ArtifactStore,
                    after: options.upload_timeout,
                }),
            };
            match &outcome {
                Ok(()) => tracing::debug!(key = %key, "artifact persisted"),
                Err(err) => tracing::warn!(key = %key, error = %err, "artifact upload failed"),
            }
            (idx, filename, outcome)
        }
    })
    .buffer_unordered(options.max_parallel.max(1))
    .collect()
    .await;
    outcomes.sort_by_key(|(idx, _, _)| *idx);

    let mut persisted = Vec::new();
    let mut failures = Vec::new();
    for (_, filename, outcome) in outcomes {
        match outcome {
            Ok(()) => persisted.push(filename),
            Err(err) => failures.push((filename, err.to_string())),
        }
    }

    drop(staging);
    if !failures.is_empty() {
        return Err(PersistenceError {
            request_id: request_id.to_string(),
            persisted,
            failures,
        }
        .into());
    }
    Ok(persisted)
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
