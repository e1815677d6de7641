//! Organization policy document and the store it is loaded from.
//!
//! The policy is read fresh for every request and never cached, so edits to
//! the document take effect on the next compose.
mod enforce;

pub use enforce::{enforce_all, evaluate, normalize_region};

use crate::error::{ComposeError, Service, UpstreamError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

pub const OPEN_SECURITY_GROUP_RULE: &str = "open_security_group_all";
pub const PUBLIC_S3_ACL_RULE: &str = "public_s3_acl";

/// Machine-readable org ruleset.
///
/// Absent fields decode as empty; a field with the wrong JSON type is a
/// decoding error rather than silently empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrgPolicy {
    #[serde(default)]
    pub allowed_services: BTreeSet<String>,
    #[serde(default)]
    pub allowed_regions: BTreeSet<String>,
    #[serde(default)]
    pub deny_list: BTreeSet<String>,
    #[serde(default)]
    pub default_module_versions: BTreeMap<String, String>,
    #[serde(default)]
    pub required_tags: BTreeSet<String>,
    #[serde(default)]
    pub allowed_modules: BTreeSet<String>,
}

impl OrgPolicy {
    /// Decode a policy document, naming `source` in any error.
    pub fn from_json(bytes: &[u8], source: &str) -> Result<Self, ComposeError> {
        let value: serde_json::Value = serde_json::from_slice(bytes).map_err(|err| {
            ComposeError::configuration(format!("policy {source} is not valid JSON: {err}"))
        })?;
        if !value.is_object() {
            return Err(ComposeError::configuration(format!(
                "policy {source} must be a JSON object"
            )));
        }
        serde_json::from_value(value).map_err(|err| {
            ComposeError::configuration(format!("policy {source} has a malformed field: {err}"))
        })
    }

    pub fn denies(&self, rule: &str) -> bool {
        self.deny_list.contains(rule)
    }
}

/// Source of the org policy document.
#[async_trait]
pub trait PolicyStore: Send + Sync {
    /// Fetch and decode the current policy. Missing or malformed documents
    /// are [`ComposeError::Configuration`].
    async fn load(&self) -> Result<OrgPolicy, ComposeError>;
}

/// Policy document kept as a JSON file on disk.
#[derive(Debug, Clone)]
pub struct FilePolicyStore {
    path: PathBuf,
}

impl FilePolicyStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl PolicyStore for FilePolicyStore {
    async fn load(&self) -> Result<OrgPolicy, ComposeError> {
        let source = self.path.display().to_string();
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(ComposeError::configuration(format!(
                    "policy document {source} not found"
                )));
            }
            Err(err) => {
                return Err(UpstreamError::failed(
                    Service::PolicyStore,
                    format!("read {source}: {err}"),
                )
                .into());
            }
        };
        let policy = OrgPolicy::from_json(&bytes, &source)?;
        tracing::debug!(
            source = %source,
            allowed_modules = policy.allowed_modules.len(),
            required_tags = policy.required_tags.len(),
            "policy loaded"
        );
        Ok(policy)
    }
}
