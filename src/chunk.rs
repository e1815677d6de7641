//! Retrieved code chunks and their policy annotations.
use serde::{Deserialize, Serialize};

/// A candidate code snippet returned by the retrieval service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    #[serde(default)]
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module_name: Option<String>,
    #[serde(default)]
    pub code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl Chunk {
    pub fn new(path: impl Into<String>, module_name: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            module_name: Some(module_name.into()),
            code: code.into(),
            version: None,
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    /// True when no usable version is recorded (absent or blank).
    pub fn version_unset(&self) -> bool {
        self.version
            .as_deref()
            .map(|version| version.trim().is_empty())
            .unwrap_or(true)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyStatus {
    Compliant,
    NonCompliant,
}

/// A chunk after policy evaluation.
///
/// The embedded chunk carries the backfilled version; everything else about it
/// is exactly what retrieval returned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnotatedChunk {
    #[serde(flatten)]
    pub chunk: Chunk,
    pub policy_status: PolicyStatus,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub policy_issues: Vec<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub needs_tag_fix: bool,
}

impl AnnotatedChunk {
    pub fn is_compliant(&self) -> bool {
        self.policy_status == PolicyStatus::Compliant
    }
}
