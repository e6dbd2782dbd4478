//! Chat-completions request and response types.
//!
//! These mirror the OpenAI chat-completions wire format and are shared by
//! every [`LlmClient`](super::LlmClient) implementation.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Outbound chat-completion request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<Value>,
    pub temperature: f32,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub functions: Vec<Value>,

    /// `{"name": ...}` forces a call; `"auto"` / `"none"` are also accepted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function_call: Option<Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Passthrough keys sent verbatim.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Top-level chat-completion response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatCompletion {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub model: String,
    pub choices: Vec<Choice>,
    #[serde(default)]
    pub usage: Option<Usage>,
}

impl ChatCompletion {
    /// Create a simple text response.
    pub fn text(content: impl Into<String>) -> Self {
        Self::from_message(ResponseMessage {
            role: Some("assistant".to_string()),
            content: Some(content.into()),
            function_call: None,
        })
    }

    /// Create a response carrying a function call.
    pub fn function_call(name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self::from_message(ResponseMessage {
            role: Some("assistant".to_string()),
            content: None,
            function_call: Some(FunctionCall {
                name: name.into(),
                arguments: arguments.into(),
            }),
        })
    }

    fn from_message(message: ResponseMessage) -> Self {
        Self {
            id: String::new(),
            model: String::new(),
            choices: vec![Choice {
                index: 0,
                message,
                finish_reason: Some("stop".to_string()),
            }],
            usage: None,
        }
    }

    /// Free-text content of the first candidate.
    pub fn content(&self) -> Option<&str> {
        self.choices.first()?.message.content.as_deref()
    }

    /// Raw function-call arguments of the first candidate.
    pub fn function_arguments(&self) -> Option<&str> {
        self.choices
            .first()?
            .message
            .function_call
            .as_ref()
            .map(|fc| fc.arguments.as_str())
    }
}

/// A single response candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Choice {
    #[serde(default)]
    pub index: u32,
    pub message: ResponseMessage,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseMessage {
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub function_call: Option<FunctionCall>,
}

/// Function call requested by the model; arguments are JSON-encoded text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    pub arguments: String,
}

/// Token usage information.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    pub total_tokens: usize,
}

/// One server-sent event of a streamed completion.
#[derive(Debug, Deserialize)]
pub struct ChatChunk {
    pub choices: Vec<ChunkChoice>,
}

#[derive(Debug, Deserialize)]
pub struct ChunkChoice {
    #[serde(default)]
    pub delta: Delta,
}

#[derive(Debug, Default, Deserialize)]
pub struct Delta {
    #[serde(default)]
    pub content: Option<String>,
}

/// Embeddings endpoint response.
#[derive(Debug, Deserialize)]
pub struct EmbeddingResponse {
    pub data: Vec<Embedding>,
}

#[derive(Debug, Deserialize)]
pub struct Embedding {
    pub embedding: Vec<f32>,
}
