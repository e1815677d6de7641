//! Generation prompt assembly.
//!
//! The output-format section is rendered with [`artifact::delimiter_line`], the
//! same grammar [`artifact::decompose`] parses.
use crate::artifact;
use crate::chunk::AnnotatedChunk;
use crate::policy::OrgPolicy;
use serde::{Deserialize, Serialize};

const COMPOSE_BASE: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/prompts/compose.md"));

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a Terraform expert.";

pub fn default_expected_files() -> Vec<String> {
    vec![
        "main.tf".to_string(),
        "variables.tf".to_string(),
        "outputs.tf".to_string(),
    ]
}

/// Knobs for prompt assembly and the generation call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptOptions {
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
    #[serde(default = "default_expected_files")]
    pub expected_files: Vec<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_system_prompt() -> String {
    DEFAULT_SYSTEM_PROMPT.to_string()
}

fn default_max_tokens() -> u32 {
    3000
}

impl Default for PromptOptions {
    fn default() -> Self {
        Self {
            system_prompt: default_system_prompt(),
            expected_files: default_expected_files(),
            max_tokens: default_max_tokens(),
        }
    }
}

/// Prompt text plus the fixed system instruction that accompanies it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposedPrompt {
    pub system: String,
    pub text: String,
    pub max_tokens: u32,
}

/// Build the grounded generation prompt for one request.
pub fn compose_prompt(
    ask: &str,
    chunks: &[AnnotatedChunk],
    policy: &OrgPolicy,
    options: &PromptOptions,
) -> Result<ComposedPrompt, serde_json::Error> {
    let chunks_json = serde_json::to_string_pretty(chunks)?;
    let policy_json = serde_json::to_string_pretty(policy)?;
    let expected_files = options.expected_files.join(", ");
    let format_example = options
        .expected_files
        .iter()
        .map(|name| format!("{}\n<terraform code>", artifact::delimiter_line(name)))
        .collect::<Vec<_>>()
        .join("\n\n");

    let text = render_template(
        COMPOSE_BASE,
        &[
            ("expected_files", expected_files.as_str()),
            ("chunks", chunks_json.as_str()),
            ("policy", policy_json.as_str()),
            ("ask", ask),
            ("format_example", format_example.as_str()),
        ],
    );

    Ok(ComposedPrompt {
        system: options.system_prompt.clone(),
        text,
        max_tokens: options.max_tokens,
    })
}

/// Substitute `{key}` placeholders in a single pass, so substituted values
/// that happen to contain `{...}` are left alone.
fn render_template(template: &str, values: &[(&str, &str)]) -> String {
    let mut rendered = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        rendered.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let replacement = after.find('}').and_then(|close| {
            let key = &after[..close];
            values
                .iter()
                .find(|(name, _)| *name == key)
                .map(|(_, value)| (*value, close))
        });
        match replacement {
            Some((value, close)) => {
                rendered.push_str(value);
                rest = &after[close + 1..];
            }
            None => {
                rendered.push('{');
                rest = after;
            }
        }
    }
    rendered.push_str(rest);
    rendered
}
