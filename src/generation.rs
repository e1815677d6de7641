//! Generation collaborator: prompt in, reply text out.
//!
//! The default implementation delegates to a user-configured command, so any
//! model CLI (or a wrapper script around a hosted endpoint) can sit behind it.
//! The prompt is written to stdin unless the argv contains a `{prompt}`
//! placeholder. `{system}` and `{max_tokens}` placeholders are substituted
//! in place.
use crate::error::{Service, UpstreamError};
use crate::prompt::ComposedPrompt;
use crate::util::truncate_string;
use async_trait::async_trait;
use serde_json::Value;
use std::process::Stdio;
use std::time::Instant;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

const STDERR_PREVIEW_BYTES: usize = 500;

#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, prompt: &ComposedPrompt) -> Result<String, UpstreamError>;
}

/// Generator backed by a local command.
#[derive(Debug, Clone)]
pub struct CommandGenerator {
    argv: Vec<String>,
}

impl CommandGenerator {
    pub fn new(argv: Vec<String>) -> Result<Self, UpstreamError> {
        if argv.is_empty() {
            return Err(UpstreamError::failed(Service::Generation, "generator command is empty"));
        }
        Ok(Self { argv })
    }
}

pub fn default_generator_command() -> Vec<String> {
    vec![
        "claude".to_string(),
        "--print".to_string(),
        "--output-format".to_string(),
        "json".to_string(),
        "--no-session-persistence".to_string(),
        "--system-prompt".to_string(),
        "{system}".to_string(),
        "--tools".to_string(),
        "".to_string(),
    ]
}

#[async_trait]
impl Generator for CommandGenerator {
    async fn generate(&self, prompt: &ComposedPrompt) -> Result<String, UpstreamError> {
        let mut argv = self.argv.clone();
        let mut prompt_in_argv = false;
        for arg in &mut argv {
            match arg.as_str() {
                "{prompt}" => {
                    *arg = prompt.text.clone();
                    prompt_in_argv = true;
                }
                "{system}" => *arg = prompt.system.clone(),
                "{max_tokens}" => *arg = prompt.max_tokens.to_string(),
                _ => {}
            }
        }
        let program = argv.remove(0);

        let start = Instant::now();
        let mut command = Command::new(&program);
        command
            .args(&argv)
            .stdin(if prompt_in_argv {
                Stdio::null()
            } else {
                Stdio::piped()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // Dropping the future (timeout or cancellation) kills the child.
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|err| {
            UpstreamError::failed(Service::Generation, format!("spawn {program}: {err}"))
        })?;
        // Feed stdin while draining stdout and stderr; a child that echoes
        // before reading all input would otherwise fill its pipe and stall.
        let stdin = child.stdin.take();
        let text = prompt.text.as_bytes();
        let write_prompt = async move {
            match stdin {
                Some(mut stdin) => stdin.write_all(text).await,
                None => Ok(()),
            }
        };
        let (written, output) = tokio::join!(write_prompt, child.wait_with_output());
        let output = output.map_err(|err| {
            UpstreamError::failed(Service::Generation, format!("wait for {program}: {err}"))
        })?;
        match written {
            Ok(()) => {}
            // The command exited without reading its input; its exit status decides.
            Err(err) if err.kind() == std::io::ErrorKind::BrokenPipe => {
                tracing::debug!(program = %program, "generator closed stdin early");
            }
            Err(err) => {
                return Err(UpstreamError::failed(
                    Service::Generation,
                    format!("write prompt: {err}"),
                ));
            }
        }

        tracing::info!(
            elapsed_ms = start.elapsed().as_millis() as u64,
            prompt_bytes = prompt.text.len(),
            response_bytes = output.stdout.len(),
            "generation complete"
        );

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stderr = truncate_string(stderr.trim(), STDERR_PREVIEW_BYTES);
            if is_throttled(&stderr) {
                return Err(UpstreamError::Throttled {
                    service: Service::Generation,
                    message: stderr,
                });
            }
            return Err(UpstreamError::failed(
                Service::Generation,
                format!("{program} exited with {}: {stderr}", output.status),
            ));
        }

        let stdout = String::from_utf8(output.stdout).map_err(|err| {
            UpstreamError::malformed(Service::Generation, format!("stdout is not UTF-8: {err}"))
        })?;
        extract_reply_text(&stdout)
    }
}

fn is_throttled(stderr: &str) -> bool {
    let lowered = stderr.to_lowercase();
    lowered.contains("throttlingexception")
        || lowered.contains("rate limit")
        || lowered.contains("too many requests")
}

/// Unwrap known JSON envelopes around the reply text.
///
/// Recognised shapes are `{"result": "..."}` (CLI wrappers) and
/// `{"content": [{"text": "..."}]}` (messages APIs). Output that is not a
/// JSON object is the reply itself.
pub fn extract_reply_text(stdout: &str) -> Result<String, UpstreamError> {
    if !stdout.trim_start().starts_with('{') {
        return Ok(stdout.to_string());
    }
    let value: Value = match serde_json::from_str(stdout.trim()) {
        Ok(value) => value,
        Err(_) => return Ok(stdout.to_string()),
    };

    if value.get("is_error").and_then(Value::as_bool) == Some(true) {
        let message = value
            .get("result")
            .and_then(Value::as_str)
            .unwrap_or("generator reported an error");
        return Err(UpstreamError::failed(Service::Generation, message));
    }

    if let Some(result) = value.get("result") {
        return result.as_str().map(str::to_string).ok_or_else(|| {
            UpstreamError::malformed(Service::Generation, "`result` is not a string")
        });
    }

    if let Some(content) = value.get("content") {
        return content
            .get(0)
            .and_then(|block| block.get("text"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| {
                UpstreamError::malformed(Service::Generation, "`content[0].text` is missing")
            });
    }

    Ok(stdout.to_string())
}
