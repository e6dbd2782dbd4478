//! Text generation on top of an [`LlmClient`].
//!
//! The generator fills message templates, sends them with the retry policy,
//! and turns function-call responses into JSON values.

use std::future::Future;
use std::sync::Arc;

use futures_util::stream::{BoxStream, FuturesUnordered};
use futures_util::{Stream, StreamExt};
use serde_json::{json, Map, Value};
use tokio::sync::Semaphore;
use tracing::{debug, error, warn};

use crate::error::Error;
use crate::prompt::{
    ChatMessage, FunctionTemplate, PromptInput, PromptTemplate, Substitutions,
};
use crate::Result;

use super::llm::{with_retry, ChatCompletion, ChatRequest, LlmClient, RetryPolicy};

/// Model used when none is given.
pub const DEFAULT_MODEL: &str = "gpt-3.5-turbo";

/// Default number of in-flight requests for batch generation.
pub const DEFAULT_CONCURRENCY: usize = 10;

/// Streamed content fragments.
pub type TextStream = BoxStream<'static, Result<String>>;

/// Per-request settings passed through to the provider.
#[derive(Debug, Clone)]
pub struct GenerateOptions {
    pub model: String,
    pub temperature: f32,
    /// Function declarations; filled with the same values as the messages.
    pub functions: Vec<FunctionTemplate>,
    /// Name of a function the model must call.
    pub function_call: Option<String>,
    pub max_tokens: Option<u32>,
    pub extra: Map<String, Value>,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self::new(DEFAULT_MODEL)
    }
}

impl GenerateOptions {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            temperature: 0.0,
            functions: Vec::new(),
            function_call: None,
            max_tokens: None,
            extra: Map::new(),
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_function(mut self, function: FunctionTemplate) -> Self {
        self.functions.push(function);
        self
    }

    /// Force the model to answer through the named function.
    pub fn force_function_call(mut self, name: impl Into<String>) -> Self {
        self.function_call = Some(name.into());
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Any other request key, sent verbatim.
    pub fn with_extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }
}

/// Outcome of one unit of a batch.
#[derive(Debug)]
pub struct BatchItem {
    /// Position of the unit in the submitted batch.
    pub index: usize,
    pub values: Substitutions,
    /// Parsed function arguments; `Ok(None)` when the response was unusable.
    pub result: Result<Option<Value>>,
}

/// Generates completions through an [`LlmClient`], retrying transient errors.
pub struct TextGenerator<C: LlmClient> {
    client: C,
    retry: RetryPolicy,
}

impl<C: LlmClient> TextGenerator<C> {
    pub fn new(client: C) -> Self {
        Self {
            client,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Normalize and fill every message, in order.
    pub fn prepare_messages(messages: &[PromptInput], values: &Substitutions) -> Result<Vec<Value>> {
        messages
            .iter()
            .map(|input| {
                let mut template = input.to_template()?;
                template.format_message(values)?;
                template.to_prompt()
            })
            .collect()
    }

    fn build_request(
        &self,
        messages: Vec<Value>,
        values: &Substitutions,
        options: &GenerateOptions,
    ) -> Result<ChatRequest> {
        let functions = options
            .functions
            .iter()
            .map(|function| {
                let mut function = function.clone();
                function.format_message(values)?;
                function.to_prompt()
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(ChatRequest {
            model: options.model.clone(),
            messages,
            temperature: options.temperature,
            functions,
            function_call: options
                .function_call
                .as_ref()
                .map(|name| json!({ "name": name })),
            max_tokens: options.max_tokens,
            extra: options.extra.clone(),
        })
    }

    /// Fill `messages` with `values` and request a completion.
    pub async fn generate(
        &self,
        messages: &[PromptInput],
        values: &Substitutions,
        options: &GenerateOptions,
    ) -> Result<ChatCompletion> {
        let prepared = Self::prepare_messages(messages, values)?;
        let request = self.build_request(prepared, values, options)?;
        self.send(&request).await
    }

    /// Request a completion for already-filled messages, such as replayed history.
    pub async fn complete(
        &self,
        messages: &[ChatMessage],
        options: &GenerateOptions,
    ) -> Result<ChatCompletion> {
        let prepared = messages
            .iter()
            .map(serde_json::to_value)
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let request = self.build_request(prepared, &Substitutions::new(), options)?;
        self.send(&request).await
    }

    /// Like [`generate`](Self::generate), streaming the content as it arrives.
    ///
    /// Opening the stream is retried; fragments are not.
    pub async fn generate_stream(
        &self,
        messages: &[PromptInput],
        values: &Substitutions,
        options: &GenerateOptions,
    ) -> Result<TextStream> {
        let prepared = Self::prepare_messages(messages, values)?;
        let request = self.build_request(prepared, values, options)?;
        self.open_stream(&request).await
    }

    /// Stream a completion for already-filled messages.
    pub async fn complete_stream(
        &self,
        messages: &[ChatMessage],
        options: &GenerateOptions,
    ) -> Result<TextStream> {
        let prepared = messages
            .iter()
            .map(serde_json::to_value)
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let request = self.build_request(prepared, &Substitutions::new(), options)?;
        self.open_stream(&request).await
    }

    /// Run one function-call request per entry of `batch`, at most
    /// `concurrency` at a time.
    ///
    /// Items are yielded as they complete, not in submission order.
    pub fn generate_batch<'a>(
        &'a self,
        messages: &'a [PromptInput],
        batch: Vec<Substitutions>,
        options: &'a GenerateOptions,
        concurrency: usize,
    ) -> impl Stream<Item = BatchItem> + 'a {
        let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));

        batch
            .into_iter()
            .enumerate()
            .map(move |(index, values)| {
                let semaphore = Arc::clone(&semaphore);
                async move {
                    let result = match semaphore.acquire().await {
                        Ok(_permit) => self.classify(messages, &values, options).await,
                        Err(_) => Err(Error::Other("batch semaphore closed".to_string())),
                    };
                    BatchItem {
                        index,
                        values,
                        result,
                    }
                }
            })
            .collect::<FuturesUnordered<_>>()
    }

    /// One function-call request, parsed tolerantly.
    pub async fn classify(
        &self,
        messages: &[PromptInput],
        values: &Substitutions,
        options: &GenerateOptions,
    ) -> Result<Option<Value>> {
        let completion = self.generate(messages, values, options).await?;
        match completion.function_arguments() {
            Some(arguments) => Ok(parse_function_arguments(arguments)),
            None => {
                warn!("Response carried no function call");
                Ok(None)
            }
        }
    }

    async fn send(&self, request: &ChatRequest) -> Result<ChatCompletion> {
        let client = &self.client;
        let completion = self
            .retrying("chat completion", move |_| client.chat(request))
            .await?;

        if let Some(usage) = &completion.usage {
            debug!(
                "Completion used {} prompt + {} completion tokens",
                usage.prompt_tokens, usage.completion_tokens
            );
        }
        Ok(completion)
    }

    async fn open_stream(&self, request: &ChatRequest) -> Result<TextStream> {
        let client = &self.client;
        let stream = self
            .retrying("streaming chat completion", move |_| client.chat_stream(request))
            .await?;
        Ok(stream.map(|fragment| fragment.map_err(Error::from)).boxed())
    }

    async fn retrying<T, Op, Fut>(&self, operation: &str, execute: Op) -> Result<T>
    where
        Op: FnMut(u32) -> Fut,
        Fut: Future<Output = std::result::Result<T, crate::error::ProviderError>>,
    {
        Ok(with_retry(operation, &self.retry, execute).await?)
    }
}

/// Parse function-call arguments, tolerating single-quoted JSON.
///
/// Returns `None` (after logging) when the text is not JSON either way.
pub fn parse_function_arguments(arguments: &str) -> Option<Value> {
    match serde_json::from_str(arguments) {
        Ok(value) => Some(value),
        Err(_) => match serde_json::from_str(&arguments.replace('\'', "\"")) {
            Ok(value) => Some(value),
            Err(e) => {
                error!("Invalid JSON: Error: {}", e);
                None
            }
        },
    }
}
