//! OpenAI chat-completions client.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use reqwest::{Client, Response, StatusCode};
use serde_json::{json, Value};
use tracing::debug;

use crate::config::Config;
use crate::error::ProviderError;
use crate::Result;

use super::{
    ChatChunk, ChatCompletion, ChatRequest, ContentStream, EmbeddingResponse, LlmClient,
    ProviderResult,
};

pub const OPENAI_API_URL: &str = "https://api.openai.com/v1";

/// Chat-completions client using bearer-token authentication.
#[derive(Clone)]
pub struct OpenAiClient {
    api_key: String,
    base_url: String,
    model: String,
    client: Client,
}

impl OpenAiClient {
    /// Create a new client with API key.
    pub fn new(api_key: &str, model: &str) -> Self {
        Self {
            api_key: api_key.to_string(),
            base_url: OPENAI_API_URL.to_string(),
            model: model.to_string(),
            client: Client::new(),
        }
    }

    /// Build a client from configuration, applying the request timeout.
    pub fn from_config(config: &Config) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self {
            api_key: config.resolved_api_key()?,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            client,
        })
    }

    /// Point the client at an OpenAI-compatible endpoint.
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    async fn post(&self, path: &str, body: &Value) -> ProviderResult<Response> {
        let response = self
            .client
            .post(self.url(path))
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(map_status(status, &body));
        }

        Ok(response)
    }

    fn request_body(request: &ChatRequest, stream: bool) -> ProviderResult<Value> {
        let mut body = serde_json::to_value(request)
            .map_err(|e| ProviderError::invalid_request(e.to_string()))?;
        if stream {
            body["stream"] = json!(true);
        }
        Ok(body)
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn chat(&self, request: &ChatRequest) -> ProviderResult<ChatCompletion> {
        debug!(
            "Sending {} messages to {} (functions: {})",
            request.messages.len(),
            request.model,
            request.functions.len()
        );

        let body = Self::request_body(request, false)?;
        let response = self.post("chat/completions", &body).await?;
        response.json().await.map_err(map_transport_error)
    }

    async fn chat_stream(&self, request: &ChatRequest) -> ProviderResult<ContentStream> {
        let body = Self::request_body(request, true)?;
        let response = self.post("chat/completions", &body).await?;
        Ok(sse_content(response.bytes_stream()))
    }

    async fn embed(&self, input: &str, model: &str) -> ProviderResult<Vec<f32>> {
        let body = json!({ "input": [input.replace('\n', " ")], "model": model });
        let response = self.post("embeddings", &body).await?;
        let parsed: EmbeddingResponse = response.json().await.map_err(map_transport_error)?;
        parsed
            .data
            .into_iter()
            .next()
            .map(|e| e.embedding)
            .ok_or_else(|| ProviderError::api("No embedding in response"))
    }

    fn default_model(&self) -> &str {
        &self.model
    }
}

/// Split a server-sent event byte stream into lines and yield the content
/// deltas. Lines may span chunks; a final line without a newline is still
/// parsed once the body ends.
fn sse_content<S, B>(bytes: S) -> ContentStream
where
    S: Stream<Item = reqwest::Result<B>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
{
    let stream = async_stream::stream! {
        let mut bytes = Box::pin(bytes);
        let mut buffer: Vec<u8> = Vec::new();

        'read: loop {
            let Some(chunk) = bytes.next().await else {
                let tail = String::from_utf8_lossy(&buffer).into_owned();
                if !tail.trim().is_empty() {
                    match parse_sse_line(&tail) {
                        Ok(SseEvent::Content(text)) => {
                            yield Ok(text);
                        }
                        Ok(SseEvent::Done | SseEvent::Skip) => {}
                        Err(e) => {
                            yield Err(e);
                        }
                    }
                }
                break;
            };

            match chunk {
                Ok(chunk) => buffer.extend_from_slice(chunk.as_ref()),
                Err(e) => {
                    yield Err(map_transport_error(e));
                    break;
                }
            }

            while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = buffer.drain(..=pos).collect();
                match parse_sse_line(&String::from_utf8_lossy(&line)) {
                    Ok(SseEvent::Content(text)) => {
                        yield Ok(text);
                    }
                    Ok(SseEvent::Done) => break 'read,
                    Ok(SseEvent::Skip) => {}
                    Err(e) => {
                        yield Err(e);
                        break 'read;
                    }
                }
            }
        }
    };

    Box::pin(stream)
}

#[derive(Debug, PartialEq)]
enum SseEvent {
    Content(String),
    Done,
    Skip,
}

fn parse_sse_line(line: &str) -> ProviderResult<SseEvent> {
    let Some(data) = line.trim().strip_prefix("data:") else {
        return Ok(SseEvent::Skip);
    };

    let data = data.trim();
    if data == "[DONE]" {
        return Ok(SseEvent::Done);
    }

    let chunk: ChatChunk = serde_json::from_str(data)
        .map_err(|e| ProviderError::api(format!("Malformed stream chunk: {e}")))?;

    Ok(chunk
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.delta.content)
        .filter(|text| !text.is_empty())
        .map_or(SseEvent::Skip, SseEvent::Content))
}

fn map_transport_error(err: reqwest::Error) -> ProviderError {
    if err.is_timeout() {
        ProviderError::timeout(err.to_string())
    } else if err.is_connect() || err.is_request() {
        ProviderError::connection(err.to_string())
    } else if err.is_decode() || err.is_body() {
        ProviderError::api(err.to_string())
    } else {
        ProviderError::other(err.to_string())
    }
}

fn map_status(status: StatusCode, body: &str) -> ProviderError {
    let message = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(str::to_string))
        .unwrap_or_else(|| body.to_string());

    let error = match status.as_u16() {
        401 | 403 => ProviderError::authentication(message),
        408 => ProviderError::timeout(message),
        429 => ProviderError::rate_limit(message),
        503 => ProviderError::service_unavailable(message),
        400 | 404 | 409 | 413 | 422 => ProviderError::invalid_request(message),
        code if code >= 500 => ProviderError::api(message),
        _ => ProviderError::other(message),
    };
    error.with_status(status.as_u16())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderErrorKind;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (401, ProviderErrorKind::Authentication),
            (429, ProviderErrorKind::RateLimit),
            (503, ProviderErrorKind::ServiceUnavailable),
            (500, ProviderErrorKind::Api),
            (502, ProviderErrorKind::Api),
            (408, ProviderErrorKind::Timeout),
            (400, ProviderErrorKind::InvalidRequest),
            (418, ProviderErrorKind::Other),
        ];

        for (code, kind) in cases {
            let err = map_status(StatusCode::from_u16(code).unwrap(), "");
            assert_eq!(err.kind, kind, "status {code}");
            assert_eq!(err.status, Some(code));
        }
    }

    #[test]
    fn test_status_message_extracted_from_body() {
        let body = r#"{"error": {"message": "Rate limit reached for gpt-4", "type": "requests"}}"#;
        let err = map_status(StatusCode::TOO_MANY_REQUESTS, body);
        assert_eq!(err.message, "Rate limit reached for gpt-4");
        assert!(err.is_transient());
    }

    #[test]
    fn test_parse_sse_lines() {
        let line = r#"data: {"choices": [{"delta": {"content": "Hel"}}]}"#;
        assert_eq!(parse_sse_line(line).unwrap(), SseEvent::Content("Hel".to_string()));

        let role_only = r#"data: {"choices": [{"delta": {"role": "assistant"}}]}"#;
        assert_eq!(parse_sse_line(role_only).unwrap(), SseEvent::Skip);

        assert_eq!(parse_sse_line("data: [DONE]").unwrap(), SseEvent::Done);
        assert_eq!(parse_sse_line("").unwrap(), SseEvent::Skip);
        assert_eq!(parse_sse_line(": keep-alive").unwrap(), SseEvent::Skip);
        assert!(parse_sse_line("data: {not json").is_err());
    }

    fn chunks(parts: &[&[u8]]) -> impl Stream<Item = reqwest::Result<Vec<u8>>> + Send + 'static {
        let parts: Vec<reqwest::Result<Vec<u8>>> = parts.iter().map(|p| Ok(p.to_vec())).collect();
        futures_util::stream::iter(parts)
    }

    async fn collect_content(stream: ContentStream) -> Vec<String> {
        stream.map(|fragment| fragment.unwrap()).collect().await
    }

    #[tokio::test]
    async fn test_sse_lines_split_across_chunks() {
        let body: &[&[u8]] = &[
            b"data: {\"choices\": [{\"delta\": {\"con",
            b"tent\": \"Hello \"}}]}\n\n",
            b": keep-alive\n\ndata: {\"choices\": [{\"delta\": {\"content\": \"world\"}}]}\n\n",
            b"data: [DONE]\n\n",
            b"data: {\"choices\": [{\"delta\": {\"content\": \"after done\"}}]}\n\n",
        ];
        assert_eq!(collect_content(sse_content(chunks(body))).await, vec!["Hello ", "world"]);
    }

    #[tokio::test]
    async fn test_sse_multibyte_character_split_across_chunks() {
        let line = "data: {\"choices\": [{\"delta\": {\"content\": \"caf\u{e9} \u{1f981}\"}}]}\n".as_bytes();
        let cut = line.len() - 8;
        let body: &[&[u8]] = &[&line[..cut], &line[cut..]];
        assert_eq!(collect_content(sse_content(chunks(body))).await, vec!["caf\u{e9} \u{1f981}"]);
    }

    #[tokio::test]
    async fn test_sse_unterminated_last_line_is_parsed() {
        let body: &[&[u8]] = &[
            b"data: {\"choices\": [{\"delta\": {\"content\": \"Hello \"}}]}\n\n",
            b"data: {\"choices\": [{\"delta\": {\"content\": \"world\"}}]}",
        ];
        assert_eq!(collect_content(sse_content(chunks(body))).await.concat(), "Hello world");
    }

    #[tokio::test]
    async fn test_sse_malformed_chunk_ends_stream_with_error() {
        let body: &[&[u8]] = &[b"data: {not json\n", b"data: {\"choices\": []}\n"];
        let results: Vec<ProviderResult<String>> = sse_content(chunks(body)).collect().await;
        assert_eq!(results.len(), 1);
        assert!(results[0].is_err());
    }

    #[test]
    fn test_stream_flag_added() {
        let request = ChatRequest {
            model: "gpt-4".to_string(),
            messages: vec![json!({"role": "user", "content": "hi"})],
            temperature: 0.2,
            functions: vec![],
            function_call: None,
            max_tokens: Some(64),
            extra: serde_json::Map::new(),
        };

        let body = OpenAiClient::request_body(&request, true).unwrap();
        assert_eq!(body["stream"], json!(true));
        assert_eq!(body["max_tokens"], json!(64));

        let body = OpenAiClient::request_body(&request, false).unwrap();
        assert!(body.get("stream").is_none());
    }

    #[test]
    fn test_with_base_url_trims_slash() {
        let client = OpenAiClient::new("sk-test", "gpt-4").with_base_url("http://localhost:8080/v1/");
        assert_eq!(client.url("chat/completions"), "http://localhost:8080/v1/chat/completions");
        assert_eq!(client.default_model(), "gpt-4");
    }
}
