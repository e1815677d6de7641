//! Map a free-text ask onto known modules and narrow retrieved chunks to them.
use crate::chunk::Chunk;
use regex::Regex;
use std::collections::BTreeSet;
use std::sync::OnceLock;

fn word_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\b\w+\b").expect("valid word regex"))
}

/// Modules named by an ask.
///
/// Both collections are sets; nothing about the ask's word order survives.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModuleResolution {
    pub requested: BTreeSet<String>,
    /// Tokens that matched no allowed module. Reported, never fatal.
    pub unsupported: BTreeSet<String>,
}

/// Tokenize `ask` into lowercase words and split them by `allowed_modules`.
pub fn resolve_modules(ask: &str, allowed_modules: &BTreeSet<String>) -> ModuleResolution {
    let lowered = ask.to_lowercase();
    let tokens: BTreeSet<&str> = word_pattern()
        .find_iter(&lowered)
        .map(|token| token.as_str())
        .collect();

    let mut resolution = ModuleResolution::default();
    for token in tokens {
        if allowed_modules.contains(token) {
            resolution.requested.insert(token.to_string());
        } else {
            resolution.unsupported.insert(token.to_string());
        }
    }

    if !resolution.unsupported.is_empty() {
        tracing::warn!(
            unsupported = ?resolution.unsupported,
            "ask mentions tokens that are not allowed modules"
        );
    }
    resolution
}

/// Keep chunks whose path contains `/<module>/` for a requested module.
///
/// An empty `requested` set keeps nothing: a request that names no module
/// gets no grounding code rather than all of it.
pub fn filter_chunks(chunks: Vec<Chunk>, requested: &BTreeSet<String>) -> Vec<Chunk> {
    let needles: Vec<String> = requested.iter().map(|module| format!("/{module}/")).collect();
    chunks
        .into_iter()
        .filter(|chunk| {
            let path = chunk.path.to_lowercase();
            needles.iter().any(|needle| path.contains(needle.as_str()))
        })
        .collect()
}
