//! Agent module: generation on top of a chat-completions provider.
//!
//! This module contains:
//! - LLM client trait, provider registry and retry policy
//! - Token counting and history budgeting
//! - Text generator (single, streaming, batch)
//! - Conversation sessions
//!
//! # Adding a New LLM Provider
//!
//! See [`llm::ProviderRegistry`] for instructions.

mod generator;
mod session;
pub mod tokens;

// LLM providers in submodule
pub mod llm;

// Re-exports for convenience
pub use generator::{
    parse_function_arguments, BatchItem, GenerateOptions, TextGenerator, TextStream,
    DEFAULT_CONCURRENCY, DEFAULT_MODEL,
};
pub use llm::{ChatCompletion, LlmClient, OpenAiClient, ProviderRegistry, RetryPolicy, Usage};
pub use session::{Session, SessionSettings};
pub use tokens::TokenCounter;
