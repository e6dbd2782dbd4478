//! LLM client abstraction layer.
//!
//! This module provides:
//! - [`LlmClient`] trait for swappable chat-completion providers
//! - [`ProviderRegistry`] for creating a client from configuration
//! - [`RetryPolicy`] and [`with_retry`] for transient failures
//! - Concrete implementation: OpenAI chat completions
//!
//! # Adding a New Provider
//!
//! 1. Create a new file (e.g., `azure.rs`)
//! 2. Implement `LlmClient` trait
//! 3. Add to `ProviderRegistry::create()`
//! 4. Add config fields in `config.rs`

mod retry;
mod types;

pub mod openai;

use async_trait::async_trait;
use futures_util::stream::BoxStream;

use crate::config::Config;
use crate::error::{Error, ProviderError};
use crate::Result;

pub use openai::{OpenAiClient, OPENAI_API_URL};
pub use retry::{execute_with_retry, with_retry, RetryPolicy};
pub use types::*;

/// Result of a single provider call.
pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

/// Content fragments of a streamed completion, in arrival order.
pub type ContentStream = BoxStream<'static, ProviderResult<String>>;

/// LLM client trait: swappable provider abstraction.
///
/// Implementations report failures as [`ProviderError`] so callers can tell
/// transient kinds from permanent ones.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Send a chat-completion request.
    async fn chat(&self, request: &ChatRequest) -> ProviderResult<ChatCompletion>;

    /// Send a chat-completion request and stream the content back.
    async fn chat_stream(&self, request: &ChatRequest) -> ProviderResult<ContentStream>;

    /// Embed `input` with `model`.
    async fn embed(&self, _input: &str, _model: &str) -> ProviderResult<Vec<f32>> {
        Err(ProviderError::invalid_request(
            "embeddings are not supported by this provider",
        ))
    }

    /// Get the default model for this provider.
    fn default_model(&self) -> &str;
}

#[async_trait]
impl<T: LlmClient + ?Sized> LlmClient for Box<T> {
    async fn chat(&self, request: &ChatRequest) -> ProviderResult<ChatCompletion> {
        (**self).chat(request).await
    }

    async fn chat_stream(&self, request: &ChatRequest) -> ProviderResult<ContentStream> {
        (**self).chat_stream(request).await
    }

    async fn embed(&self, input: &str, model: &str) -> ProviderResult<Vec<f32>> {
        (**self).embed(input, model).await
    }

    fn default_model(&self) -> &str {
        (**self).default_model()
    }
}

/// Provider registry: creates LLM clients dynamically.
///
/// # Example
///
/// ```ignore
/// let client = ProviderRegistry::create(&config)?;
/// let generator = TextGenerator::new(client);
/// ```
pub struct ProviderRegistry;

impl ProviderRegistry {
    /// Create an LLM client from configuration.
    ///
    /// Supported providers:
    /// - `"openai"`: OpenAI (or compatible) chat-completions API
    pub fn create(config: &Config) -> Result<Box<dyn LlmClient>> {
        match config.provider.as_str() {
            "openai" => Ok(Box::new(OpenAiClient::from_config(config)?)),
            other => Err(Error::Config(format!("Unknown provider: {other}"))),
        }
    }

    /// List available provider names.
    pub fn available() -> &'static [&'static str] {
        &["openai"]
    }
}

/// Scripted LLM client for testing.
#[cfg(test)]
pub struct FakeLlmClient {
    responses: std::sync::Mutex<std::collections::VecDeque<ProviderResult<ChatCompletion>>>,
    /// Returned once the script is exhausted.
    fallback: Option<ProviderError>,
    requests: std::sync::Mutex<Vec<ChatRequest>>,
    calls: std::sync::atomic::AtomicUsize,
}

#[cfg(test)]
impl FakeLlmClient {
    /// Create with predefined text responses.
    pub fn new(responses: Vec<&str>) -> Self {
        Self::with_results(responses.into_iter().map(|s| Ok(ChatCompletion::text(s))).collect())
    }

    /// Create with predefined results, errors included.
    pub fn with_results(results: Vec<ProviderResult<ChatCompletion>>) -> Self {
        Self {
            responses: std::sync::Mutex::new(results.into()),
            fallback: None,
            requests: std::sync::Mutex::new(Vec::new()),
            calls: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    /// Every call fails with `error`.
    pub fn failing(error: ProviderError) -> Self {
        Self {
            fallback: Some(error),
            ..Self::with_results(vec![])
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(std::sync::atomic::Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn next(&self, request: &ChatRequest) -> ProviderResult<ChatCompletion> {
        self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());

        let mut responses = self.responses.lock().unwrap();
        match responses.pop_front() {
            Some(result) => result,
            None => Err(self
                .fallback
                .clone()
                .unwrap_or_else(|| ProviderError::other("No more fake responses"))),
        }
    }
}

#[cfg(test)]
#[async_trait]
impl LlmClient for FakeLlmClient {
    async fn chat(&self, request: &ChatRequest) -> ProviderResult<ChatCompletion> {
        self.next(request)
    }

    async fn chat_stream(&self, request: &ChatRequest) -> ProviderResult<ContentStream> {
        let completion = self.next(request)?;
        let content = completion.content().unwrap_or_default().to_string();
        let fragments: Vec<ProviderResult<String>> = content
            .split_inclusive(' ')
            .map(|s| Ok(s.to_string()))
            .collect();
        Ok(Box::pin(futures_util::stream::iter(fragments)))
    }

    async fn embed(&self, input: &str, _model: &str) -> ProviderResult<Vec<f32>> {
        Ok(vec![input.len() as f32, 1.0])
    }

    fn default_model(&self) -> &str {
        "gpt-3.5-turbo"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    fn request() -> ChatRequest {
        ChatRequest {
            model: "gpt-3.5-turbo".to_string(),
            messages: vec![],
            temperature: 0.0,
            functions: vec![],
            function_call: None,
            max_tokens: None,
            extra: Map::new(),
        }
    }

    #[tokio::test]
    async fn test_fake_llm_client() {
        let client = FakeLlmClient::new(vec!["Hello!", "World!"]);

        let resp1 = client.chat(&request()).await.unwrap();
        assert_eq!(resp1.content(), Some("Hello!"));

        let resp2 = client.chat(&request()).await.unwrap();
        assert_eq!(resp2.content(), Some("World!"));

        assert!(client.chat(&request()).await.is_err());
        assert_eq!(client.calls(), 3);
    }

    #[tokio::test]
    async fn test_boxed_client_delegates() {
        let client: Box<dyn LlmClient> = Box::new(FakeLlmClient::new(vec!["boxed"]));
        let resp = client.chat(&request()).await.unwrap();
        assert_eq!(resp.content(), Some("boxed"));
        assert_eq!(client.default_model(), "gpt-3.5-turbo");
    }

    #[test]
    fn test_registry_rejects_unknown_provider() {
        let config = Config {
            provider: "carrier-pigeon".to_string(),
            ..Config::default()
        };
        assert!(matches!(ProviderRegistry::create(&config), Err(Error::Config(_))));
        assert_eq!(ProviderRegistry::available(), &["openai"]);
    }
}
