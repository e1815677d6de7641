//! Delimiter grammar shared by the prompt contract and the reply parser.
//!
//! A generator reply is a sequence of file blocks:
//!
//! ```text
//! --- main.tf ---
//! resource "aws_s3_bucket" "logs" {}
//!
//! --- variables.tf ---
//! variable "region" {}
//! ```
//!
//! A delimiter is a whole line `--- <filename> ---` (trailing whitespace
//! ignored). A block's content runs to the next delimiter line or the end of
//! the reply and is trimmed. Text before the first delimiter is ignored.
use crate::error::ParseError;
use crate::util::truncate_string;
use serde::Serialize;
use std::path::{Component, Path};

const DELIMITER_OPEN: &str = "--- ";
const DELIMITER_CLOSE: &str = " ---";
const PREVIEW_BYTES: usize = 200;

/// A named file decoded from a generator reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Artifact {
    pub filename: String,
    pub content: String,
}

/// Artifacts in order of first appearance.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Decomposition {
    pub artifacts: Vec<Artifact>,
    /// Non-blank lines seen before the first delimiter.
    pub preamble_lines: usize,
}

impl Decomposition {
    pub fn filenames(&self) -> Vec<String> {
        self.artifacts
            .iter()
            .map(|artifact| artifact.filename.clone())
            .collect()
    }

    pub fn get(&self, filename: &str) -> Option<&str> {
        self.artifacts
            .iter()
            .find(|artifact| artifact.filename == filename)
            .map(|artifact| artifact.content.as_str())
    }

    /// Later blocks for a filename replace earlier content in place.
    fn upsert(&mut self, filename: String, content: String) {
        match self
            .artifacts
            .iter_mut()
            .find(|artifact| artifact.filename == filename)
        {
            Some(existing) => existing.content = content,
            None => self.artifacts.push(Artifact { filename, content }),
        }
    }
}

/// Render the delimiter line that opens a file block.
pub fn delimiter_line(filename: &str) -> String {
    format!("{DELIMITER_OPEN}{filename}{DELIMITER_CLOSE}")
}

fn parse_delimiter(line: &str) -> Option<&str> {
    let line = line.trim_end();
    let inner = line
        .strip_prefix(DELIMITER_OPEN)?
        .strip_suffix(DELIMITER_CLOSE)?
        .trim();
    if inner.is_empty() {
        return None;
    }
    Some(inner)
}

/// Split a generator reply into named artifacts.
///
/// A reply without any delimiter line is a [`ParseError::NoArtifacts`], so
/// callers can tell unparseable output from an empty build.
pub fn decompose(reply: &str) -> Result<Decomposition, ParseError> {
    let mut decomposition = Decomposition::default();
    let mut current: Option<(String, Vec<&str>)> = None;

    for line in reply.lines() {
        if let Some(filename) = parse_delimiter(line) {
            let filename = normalize_filename(filename)?;
            if let Some((name, body)) = current.take() {
                decomposition.upsert(name, body.join("\n").trim().to_string());
            }
            current = Some((filename, Vec::new()));
            continue;
        }
        match current.as_mut() {
            Some((_, body)) => body.push(line),
            None if !line.trim().is_empty() => decomposition.preamble_lines += 1,
            None => {}
        }
    }
    if let Some((name, body)) = current.take() {
        decomposition.upsert(name, body.join("\n").trim().to_string());
    }

    if decomposition.artifacts.is_empty() {
        return Err(ParseError::NoArtifacts {
            preview: truncate_string(reply.trim(), PREVIEW_BYTES),
        });
    }
    if decomposition.preamble_lines > 0 {
        tracing::debug!(
            preamble_lines = decomposition.preamble_lines,
            "ignored text before first artifact delimiter"
        );
    }
    Ok(decomposition)
}

/// Filenames become storage keys and staging paths, so they must stay inside
/// the request namespace. `.` segments are dropped so `./main.tf` and
/// `main.tf` name the same artifact.
fn normalize_filename(filename: &str) -> Result<String, ParseError> {
    let unsafe_name = || ParseError::UnsafeFilename {
        name: filename.to_string(),
    };
    if filename.contains('\\') {
        return Err(unsafe_name());
    }
    let mut segments = Vec::new();
    for component in Path::new(filename).components() {
        match component {
            Component::Normal(segment) => segments.push(segment.to_string_lossy().into_owned()),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(unsafe_name())
            }
        }
    }
    if segments.is_empty() {
        return Err(unsafe_name());
    }
    Ok(segments.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_distinct_blocks_verbatim() {
        let reply = "--- main.tf ---\nresource \"aws_s3_bucket\" \"b\" {\n  bucket = \"logs\"\n}\n\n--- variables.tf ---\nvariable \"region\" {}\n\n--- outputs.tf ---\noutput \"id\" {\n  value = 1\n}\n";
        let decomposition = decompose(reply).expect("decompose");
        assert_eq!(
            decomposition.filenames(),
            vec!["main.tf", "variables.tf", "outputs.tf"]
        );
        assert_eq!(
            decomposition.get("main.tf"),
            Some("resource \"aws_s3_bucket\" \"b\" {\n  bucket = \"logs\"\n}")
        );
        assert_eq!(decomposition.get("variables.tf"), Some("variable \"region\" {}"));
        assert_eq!(decomposition.get("outputs.tf"), Some("output \"id\" {\n  value = 1\n}"));
    }

    #[test]
    fn repeated_filename_keeps_last_block() {
        let reply = "--- main.tf ---\nfirst\n--- variables.tf ---\nvars\n--- main.tf ---\nsecond\n";
        let decomposition = decompose(reply).expect("decompose");
        assert_eq!(decomposition.artifacts.len(), 2);
        assert_eq!(decomposition.get("main.tf"), Some("second"));
        assert_eq!(decomposition.filenames(), vec!["main.tf", "variables.tf"]);
    }

    #[test]
    fn reply_without_blocks_is_parse_error() {
        let err = decompose("Sure! Here is your Terraform code.").expect_err("no blocks");
        match err {
            ParseError::NoArtifacts { preview } => {
                assert!(preview.starts_with("Sure!"), "{preview}")
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(matches!(decompose(""), Err(ParseError::NoArtifacts { .. })));
    }

    #[test]
    fn preamble_is_ignored_and_counted() {
        let reply = "Here you go:\n\n--- main.tf ---\nbody\r\n";
        let decomposition = decompose(reply).expect("decompose");
        assert_eq!(decomposition.preamble_lines, 1);
        assert_eq!(decomposition.get("main.tf"), Some("body"));
    }

    #[test]
    fn delimiter_round_trips_through_parser() {
        let reply = format!("{}\ncontent\n", delimiter_line("modules/net.tf"));
        let decomposition = decompose(&reply).expect("decompose");
        assert_eq!(decomposition.get("modules/net.tf"), Some("content"));
    }

    #[test]
    fn delimiter_must_occupy_whole_line() {
        let reply = "--- main.tf ---\nlocals { note = \"--- not.tf --- inline\" }\n";
        let decomposition = decompose(reply).expect("decompose");
        assert_eq!(decomposition.artifacts.len(), 1);
        assert!(decomposition.get("main.tf").unwrap_or_default().contains("not.tf"));
    }

    #[test]
    fn empty_block_is_kept_as_empty_file() {
        let decomposition = decompose("--- outputs.tf ---\n").expect("decompose");
        assert_eq!(decomposition.get("outputs.tf"), Some(""));
    }

    #[test]
    fn escaping_filenames_are_rejected() {
        for name in ["../main.tf", "/etc/passwd", "a/../../b.tf", "a\\b.tf", ".", "./"] {
            let reply = format!("{}\nx\n", delimiter_line(name));
            assert_eq!(
                decompose(&reply),
                Err(ParseError::UnsafeFilename {
                    name: name.to_string()
                }),
                "{name}"
            );
        }
    }

    #[test]
    fn dot_segments_collapse_onto_one_artifact() {
        let reply = "--- ./main.tf ---\nfirst\n--- main.tf ---\nsecond\n--- modules/./net.tf ---\nnet\n";
        let decomposition = decompose(reply).expect("decompose");
        assert_eq!(decomposition.filenames(), vec!["main.tf", "modules/net.tf"]);
        assert_eq!(decomposition.get("main.tf"), Some("second"));
    }
}
