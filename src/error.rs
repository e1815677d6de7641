//! Error taxonomy for the compose pipeline.
//!
//! Every failure surfaces to the caller of [`crate::compose::Composer`]; the
//! pipeline itself never retries.
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// External collaborators the pipeline calls out to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Service {
    Retrieval,
    Generation,
    PolicyStore,
    ArtifactStore,
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Retrieval => write!(f, "retrieval"),
            Self::Generation => write!(f, "generation"),
            Self::PolicyStore => write!(f, "policy store"),
            Self::ArtifactStore => write!(f, "artifact store"),
        }
    }
}

/// Failure of an external collaborator call.
#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("{service} throttled the request: {message}")]
    Throttled { service: Service, message: String },

    #[error("{service} call timed out after {}ms", .after.as_millis())]
    TimedOut { service: Service, after: Duration },

    #[error("{service} call failed: {message}")]
    Failed { service: Service, message: String },

    #[error("{service} returned a malformed response: {message}")]
    Malformed { service: Service, message: String },
}

impl UpstreamError {
    pub fn failed(service: Service, message: impl Into<String>) -> Self {
        Self::Failed {
            service,
            message: message.into(),
        }
    }

    pub fn malformed(service: Service, message: impl Into<String>) -> Self {
        Self::Malformed {
            service,
            message: message.into(),
        }
    }
}

/// The generator reply did not follow the artifact delimiter grammar.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("generator reply contained no `--- <filename> ---` blocks (first bytes: {preview:?})")]
    NoArtifacts { preview: String },

    #[error("artifact filename {name:?} must be a relative path without '..'")]
    UnsafeFilename { name: String },
}

/// Artifact upload failed partway; already persisted files are not rolled back.
#[derive(Debug, Error)]
#[error(
    "persisted {} of {} artifacts for request {request_id}; failed: {}",
    .persisted.len(),
    .persisted.len() + .failures.len(),
    failure_names(.failures)
)]
pub struct PersistenceError {
    pub request_id: String,
    /// Filenames that reached the artifact store.
    pub persisted: Vec<String>,
    /// Filename and cause for each upload that did not.
    pub failures: Vec<(String, String)>,
}

fn failure_names(failures: &[(String, String)]) -> String {
    failures
        .iter()
        .map(|(name, cause)| format!("{name} ({cause})"))
        .collect::<Vec<_>>()
        .join(", ")
}

#[derive(Debug, Error)]
pub enum ComposeError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error("compose cancelled during {stage}")]
    Cancelled { stage: &'static str },

    #[error("staging error: {0}")]
    Staging(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ComposeError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }
}
