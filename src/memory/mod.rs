//! Memory module - conversation history for one session

mod jsonl;

pub use jsonl::JsonlMessageHistory;

use crate::agent::tokens::TokenCounter;
use crate::prompt::ChatMessage;
use crate::Result;

/// Message history trait - the ordered log of one conversation.
///
/// Histories are append-only; reads apply a token budget without touching
/// the stored messages.
pub trait MessageHistory {
    /// Append a message
    fn add(&mut self, message: ChatMessage) -> Result<()>;

    /// Every stored message, oldest first
    fn messages(&self) -> &[ChatMessage];

    /// Counter used for budgeted reads
    fn counter(&self) -> &TokenCounter;

    /// Forget every message
    fn clear(&mut self) -> Result<()>;

    /// Stored messages trimmed to `max_tokens` for `model`.
    ///
    /// With `keep_system`, a leading system message survives trimming.
    fn get(&self, model: &str, max_tokens: usize, keep_system: bool) -> Result<Vec<ChatMessage>> {
        self.counter()
            .buffer(self.messages(), model, max_tokens, keep_system)
    }

    fn len(&self) -> usize {
        self.messages().len()
    }

    fn is_empty(&self) -> bool {
        self.messages().is_empty()
    }
}

/// In-memory message history
#[derive(Debug, Clone, Default)]
pub struct InMemoryMessageHistory {
    messages: Vec<ChatMessage>,
    counter: TokenCounter,
}

impl InMemoryMessageHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Share an existing counter (and its loaded tokenizers).
    pub fn with_counter(counter: TokenCounter) -> Self {
        Self {
            messages: Vec::new(),
            counter,
        }
    }
}

impl MessageHistory for InMemoryMessageHistory {
    fn add(&mut self, message: ChatMessage) -> Result<()> {
        self.messages.push(message);
        Ok(())
    }

    fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    fn counter(&self) -> &TokenCounter {
        &self.counter
    }

    fn clear(&mut self) -> Result<()> {
        self.messages.clear();
        Ok(())
    }
}
