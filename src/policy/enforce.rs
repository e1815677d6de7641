//! Rule checks applied to each retrieved chunk.
//!
//! Evaluation is a pure function of the raw chunk and the policy, so running
//! it again on the same input (or on the chunk inside an annotated record)
//! reproduces the same annotations.
use super::{OrgPolicy, OPEN_SECURITY_GROUP_RULE, PUBLIC_S3_ACL_RULE};
use crate::chunk::{AnnotatedChunk, Chunk, PolicyStatus};
use crate::error::ComposeError;
use futures::stream::{self, StreamExt, TryStreamExt};
use regex::Regex;
use std::sync::{Arc, OnceLock};

const OPEN_CIDR: &str = "0.0.0.0/0";
const PUBLIC_READ_ACL: &str = r#"acl = "public-read""#;

fn availability_zone_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"availability_zone\s*=\s*"([a-z0-9-]+)""#).expect("valid availability_zone regex")
    })
}

/// Evaluate one chunk against the policy.
pub fn evaluate(chunk: &Chunk, policy: &OrgPolicy) -> AnnotatedChunk {
    let code = chunk.code.as_str();
    let mut compliant = true;
    let mut issues = Vec::new();

    if !policy
        .allowed_services
        .iter()
        .any(|service| code.contains(service.as_str()))
    {
        issues.push("Service not in allowed_services".to_string());
        compliant = false;
    }

    if code.contains(OPEN_CIDR) && policy.denies(OPEN_SECURITY_GROUP_RULE) {
        issues.push(format!("Security group allows {OPEN_CIDR}"));
        compliant = false;
    }

    if code.contains(PUBLIC_READ_ACL) && policy.denies(PUBLIC_S3_ACL_RULE) {
        issues.push("S3 bucket has public ACL".to_string());
        compliant = false;
    }

    let mut annotated_chunk = chunk.clone();
    if annotated_chunk.version_unset() {
        if let Some(default) = chunk
            .module_name
            .as_deref()
            .and_then(|module| policy.default_module_versions.get(module))
        {
            annotated_chunk.version = Some(default.clone());
        }
    }

    // Missing tags are reported but never change compliance.
    let missing_tags: Vec<&str> = policy
        .required_tags
        .iter()
        .map(String::as_str)
        .filter(|tag| !code.contains(tag))
        .collect();
    let needs_tag_fix = !missing_tags.is_empty();
    if needs_tag_fix {
        issues.push(format!("Missing required tags: {missing_tags:?}"));
    }

    if let Some(region) = extract_region(code) {
        if !policy.allowed_regions.contains(&region) {
            issues.push(format!("Region {region} not allowed"));
            compliant = false;
        }
    }

    AnnotatedChunk {
        chunk: annotated_chunk,
        policy_status: if compliant {
            PolicyStatus::Compliant
        } else {
            PolicyStatus::NonCompliant
        },
        policy_issues: issues,
        needs_tag_fix,
    }
}

/// Region named by the first `availability_zone = "..."` literal, if any.
fn extract_region(code: &str) -> Option<String> {
    let captures = availability_zone_pattern().captures(code)?;
    let zone = captures.get(1)?.as_str();
    Some(normalize_region(zone).to_string())
}

/// Strip a trailing zone letter: `us-east-1a` becomes `us-east-1`.
///
/// Assumes AWS zone naming; a region code that itself ends in a letter is
/// shortened too.
pub fn normalize_region(zone: &str) -> &str {
    match zone.chars().last() {
        Some(last) if last.is_alphabetic() => &zone[..zone.len() - last.len_utf8()],
        _ => zone,
    }
}

/// Evaluate every chunk with at most `max_parallel` evaluations in flight.
///
/// Output order matches input order. Chunks are never dropped.
pub async fn enforce_all(
    chunks: Vec<Chunk>,
    policy: Arc<OrgPolicy>,
    max_parallel: usize,
) -> Result<Vec<AnnotatedChunk>, ComposeError> {
    stream::iter(chunks)
        .map(|chunk| {
            let policy = Arc::clone(&policy);
            async move {
                tokio::task::spawn_blocking(move || evaluate(&chunk, &policy))
                    .await
                    .map_err(|err| ComposeError::Internal(format!("policy evaluation task: {err}")))
            }
        })
        .buffered(max_parallel.max(1))
        .try_collect()
        .await
}

#[cfg(test)]
#[path = "enforce_tests.rs"]
mod tests;
