//! Entrypoint payloads: what callers send in and get back.
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Ask used when a request payload omits one.
pub const DEFAULT_ASK: &str = "Create a VPC with public and private subnets and an EC2 instance";

/// Caller-supplied request body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComposeInput {
    #[serde(default = "default_ask")]
    pub ask: String,
    /// Passed through to retrieval untouched.
    #[serde(default)]
    pub constraints: serde_json::Map<String, serde_json::Value>,
}

fn default_ask() -> String {
    DEFAULT_ASK.to_string()
}

impl ComposeInput {
    pub fn new(ask: impl Into<String>) -> Self {
        Self {
            ask: ask.into(),
            constraints: serde_json::Map::new(),
        }
    }
}

/// One compose invocation. The id namespaces every artifact it writes.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub request_id: Uuid,
    pub ask: String,
    pub constraints: serde_json::Map<String, serde_json::Value>,
}

impl GenerationRequest {
    pub fn new(input: ComposeInput) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            ask: input.ask,
            constraints: input.constraints,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComposeResult {
    pub request_id: String,
    pub files: Vec<String>,
    pub retrieved_modules: Vec<Option<String>>,
}
