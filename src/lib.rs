//! genai - prompt templates, token budgets and resilient LLM generation
//!
//! This library fills chat-message and function templates, keeps
//! conversation history within a model's token budget, and calls a
//! chat-completions provider with retries, streaming and bounded batches.

pub mod agent;
pub mod memory;
pub mod prompt;
pub mod retrieval;
pub mod templates;
pub mod config;
pub mod error;
pub mod ui;

pub use error::{Error, Result};
