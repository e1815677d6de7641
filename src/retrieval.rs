//! Retrieval collaborator: ranked candidate chunks for an ask.
//!
//! The response envelope is `{"body": {"top_k_chunks": [...]}}`. Some
//! deployments double-encode `body` as a JSON string; both shapes decode. A
//! missing field means "no chunks", a field that is present but undecodable is
//! reported as malformed.
use crate::chunk::Chunk;
use crate::error::{Service, UpstreamError};
use crate::request::GenerationRequest;
use crate::util::truncate_string;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::time::{Duration, Instant};

#[async_trait]
pub trait Retriever: Send + Sync {
    async fn retrieve(&self, request: &GenerationRequest) -> Result<Vec<Chunk>, UpstreamError>;
}

/// Decode a retrieval response envelope into chunks.
pub fn decode_retrieval_response(raw: &Value) -> Result<Vec<Chunk>, UpstreamError> {
    if let Some(message) = raw.get("errorMessage").and_then(Value::as_str) {
        return Err(UpstreamError::failed(Service::Retrieval, message));
    }

    let decoded_body;
    let body = match raw.get("body") {
        None | Some(Value::Null) => {
            tracing::debug!("retrieval response has no body");
            return Ok(Vec::new());
        }
        Some(Value::String(encoded)) => {
            decoded_body = serde_json::from_str::<Value>(encoded).map_err(|err| {
                UpstreamError::malformed(
                    Service::Retrieval,
                    format!("body is a string but not JSON: {err}"),
                )
            })?;
            &decoded_body
        }
        Some(body) => body,
    };

    match body.get("top_k_chunks") {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(chunks) => serde_json::from_value(chunks.clone()).map_err(|err| {
            UpstreamError::malformed(Service::Retrieval, format!("top_k_chunks: {err}"))
        }),
    }
}

/// Retrieval service reached over HTTP with a JSON POST.
///
/// Dropping the retrieve future (timeout or cancellation) aborts the request
/// and closes its connection.
#[derive(Debug, Clone)]
pub struct HttpRetriever {
    url: String,
    timeout: Duration,
    http_client: reqwest::Client,
}

impl HttpRetriever {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, UpstreamError> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| {
                UpstreamError::failed(Service::Retrieval, format!("build HTTP client: {err}"))
            })?;
        Ok(Self {
            url: url.into(),
            timeout,
            http_client,
        })
    }

    fn map_send_error(&self, err: reqwest::Error) -> UpstreamError {
        if err.is_timeout() {
            UpstreamError::TimedOut {
                service: Service::Retrieval,
                after: self.timeout,
            }
        } else {
            UpstreamError::failed(Service::Retrieval, err.to_string())
        }
    }
}

#[async_trait]
impl Retriever for HttpRetriever {
    async fn retrieve(&self, request: &GenerationRequest) -> Result<Vec<Chunk>, UpstreamError> {
        let payload = json!({
            "ask": request.ask,
            "constraints": request.constraints,
        });
        let start = Instant::now();
        let response = self
            .http_client
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .map_err(|err| self.map_send_error(err))?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(UpstreamError::Throttled {
                service: Service::Retrieval,
                message: format!("HTTP {status}"),
            });
        }
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(UpstreamError::failed(
                Service::Retrieval,
                format!("HTTP {status}: {}", truncate_string(error_text.trim(), 300)),
            ));
        }

        let body = response
            .bytes()
            .await
            .map_err(|err| self.map_send_error(err))?;
        let raw: Value = serde_json::from_slice(&body).map_err(|err| {
            UpstreamError::malformed(Service::Retrieval, format!("response JSON: {err}"))
        })?;
        let chunks = decode_retrieval_response(&raw)?;
        tracing::info!(
            elapsed_ms = start.elapsed().as_millis() as u64,
            chunk_count = chunks.len(),
            url = %self.url,
            "retrieval complete"
        );
        Ok(chunks)
    }
}

/// Canned retrieval response read from a JSON file on every call.
///
/// Useful for offline runs against a recorded retrieval envelope.
#[derive(Debug, Clone)]
pub struct FixtureRetriever {
    path: PathBuf,
}

impl FixtureRetriever {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl Retriever for FixtureRetriever {
    async fn retrieve(&self, request: &GenerationRequest) -> Result<Vec<Chunk>, UpstreamError> {
        let bytes = tokio::fs::read(&self.path).await.map_err(|err| {
            UpstreamError::failed(
                Service::Retrieval,
                format!("read fixture {}: {err}", self.path.display()),
            )
        })?;
        let raw: Value = serde_json::from_slice(&bytes).map_err(|err| {
            UpstreamError::malformed(
                Service::Retrieval,
                format!("fixture {}: {err}", self.path.display()),
            )
        })?;
        let chunks = decode_retrieval_response(&raw)?;
        tracing::debug!(
            request_id = %request.request_id,
            chunk_count = chunks.len(),
            "fixture retrieval complete"
        );
        Ok(chunks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::ComposeInput;

    #[test]
    fn decodes_object_body() {
        let raw = json!({"body": {"top_k_chunks": [
            {"path": "m/s3/bucket.tf", "module_name": "s3", "code": "x", "version": "1.0.0"}
        ]}});
        let chunks = decode_retrieval_response(&raw).expect("decode");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].version.as_deref(), Some("1.0.0"));
    }

    #[test]
    fn decodes_double_encoded_body() {
        let inner = json!({"top_k_chunks": [{"path": "m/vpc/main.tf", "code": "y"}]});
        let raw = json!({"body": inner.to_string()});
        let chunks = decode_retrieval_response(&raw).expect("decode");
        assert_eq!(chunks[0].path, "m/vpc/main.tf");
        assert_eq!(chunks[0].module_name, None);
    }

    #[test]
    fn absent_fields_mean_no_chunks() {
        assert!(decode_retrieval_response(&json!({})).expect("no body").is_empty());
        assert!(decode_retrieval_response(&json!({"body": {}}))
            .expect("no chunks")
            .is_empty());
    }

    #[test]
    fn malformed_body_string_is_reported() {
        let err = decode_retrieval_response(&json!({"body": "{not json"})).expect_err("malformed");
        assert!(matches!(err, UpstreamError::Malformed { service: Service::Retrieval, .. }));
    }

    #[test]
    fn malformed_chunk_list_is_reported() {
        let err = decode_retrieval_response(&json!({"body": {"top_k_chunks": {"path": 1}}}))
            .expect_err("malformed");
        assert!(matches!(err, UpstreamError::Malformed { .. }));
    }

    #[test]
    fn error_envelope_is_upstream_failure() {
        let err = decode_retrieval_response(&json!({"errorMessage": "index offline"}))
            .expect_err("error envelope");
        assert_eq!(err.to_string(), "retrieval call failed: index offline");
    }

    #[tokio::test]
    async fn fixture_retriever_reads_envelope_from_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("retrieval.json");
        std::fs::write(
            &path,
            json!({"body": {"top_k_chunks": [{"path": "m/s3/a.tf", "module_name": "s3", "code": "z"}]}})
                .to_string(),
        )
        .expect("write fixture");
        let retriever = FixtureRetriever::new(&path);
        let request = GenerationRequest::new(ComposeInput::new("Create an S3 bucket"));
        let chunks = retriever.retrieve(&request).await.expect("retrieve");
        assert_eq!(chunks, vec![Chunk::new("m/s3/a.tf", "s3", "z")]);
    }

    /// One-connection HTTP server: reads the request head and body, then
    /// answers with `response` (or never answers when it is `None`). Resolves
    /// once the client side of the connection is closed.
    async fn serve_once(response: Option<String>) -> (String, tokio::task::JoinHandle<()>) {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let url = format!("http://{}/retrieve", listener.local_addr().expect("addr"));
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.expect("accept");
            let mut buf = vec![0u8; 8192];
            let mut seen = Vec::new();
            while !request_complete(&seen) {
                match socket.read(&mut buf).await {
                    Ok(0) | Err(_) => return,
                    Ok(n) => seen.extend_from_slice(&buf[..n]),
                }
            }
            if let Some(response) = response {
                socket
                    .write_all(response.as_bytes())
                    .await
                    .expect("write response");
            }
            loop {
                match socket.read(&mut buf).await {
                    Ok(0) | Err(_) => return,
                    Ok(_) => {}
                }
            }
        });
        (url, handle)
    }

    fn request_complete(seen: &[u8]) -> bool {
        let text = String::from_utf8_lossy(seen);
        let Some(head_end) = text.find("\r\n\r\n") else {
            return false;
        };
        let content_length = text[..head_end]
            .lines()
            .find_map(|line| {
                let (name, value) = line.split_once(':')?;
                name.eq_ignore_ascii_case("content-length")
                    .then(|| value.trim().parse::<usize>().ok())
                    .flatten()
            })
            .unwrap_or(0);
        seen.len() >= head_end + 4 + content_length
    }

    fn http_response(status: &str, body: &str) -> String {
        format!(
            "HTTP/1.1 {status}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
            body.len()
        )
    }

    #[tokio::test]
    async fn http_retriever_posts_and_decodes_envelope() {
        let body = json!({"body": {"top_k_chunks": [
            {"path": "m/s3/a.tf", "module_name": "s3", "code": "z"}
        ]}})
        .to_string();
        let (url, _server) = serve_once(Some(http_response("200 OK", &body))).await;
        let retriever = HttpRetriever::new(url, Duration::from_secs(5)).expect("client");
        let request = GenerationRequest::new(ComposeInput::new("Create an S3 bucket"));
        let chunks = retriever.retrieve(&request).await.expect("retrieve");
        assert_eq!(chunks, vec![Chunk::new("m/s3/a.tf", "s3", "z")]);
    }

    #[tokio::test]
    async fn http_429_is_throttled() {
        let (url, _server) = serve_once(Some(http_response("429 Too Many Requests", "{}"))).await;
        let retriever = HttpRetriever::new(url, Duration::from_secs(5)).expect("client");
        let request = GenerationRequest::new(ComposeInput::new("x"));
        let err = retriever.retrieve(&request).await.expect_err("throttled");
        assert!(matches!(err, UpstreamError::Throttled { service: Service::Retrieval, .. }), "{err}");
    }

    #[tokio::test]
    async fn abandoning_a_call_closes_its_connection() {
        let (url, server) = serve_once(None).await;
        let retriever = HttpRetriever::new(url, Duration::from_secs(60)).expect("client");
        let request = GenerationRequest::new(ComposeInput::new("Create an S3 bucket"));

        let outcome =
            tokio::time::timeout(Duration::from_millis(200), retriever.retrieve(&request)).await;
        assert!(outcome.is_err(), "server never answers");

        tokio::time::timeout(Duration::from_secs(5), server)
            .await
            .expect("connection closed once the call was dropped")
            .expect("server task");
    }
}
