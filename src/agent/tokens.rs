//! Token counting and budget management.
//!
//! Counts follow the chat framing the provider adds around every message:
//! `<|start|>{role/name}\n{content}<|end|>\n`, plus the priming of the reply.
//! Tokenizers come from `tiktoken-rs`; a model without a known tokenizer is an
//! error, never a silent fallback.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use tiktoken_rs::tokenizer::{get_tokenizer, Tokenizer};
use tiktoken_rs::CoreBPE;
use tracing::debug;

use crate::error::Error;
use crate::prompt::{ChatMessage, Role};
use crate::Result;

/// Framing tokens added for every message.
pub const TOKENS_PER_MESSAGE: usize = 3;

/// Extra token charged when a message carries a `name`.
pub const TOKENS_PER_NAME: usize = 1;

/// Every reply is primed with `<|start|>assistant<|message|>`.
pub const REPLY_PRIMING_TOKENS: usize = 3;

/// Counts tokens per model and trims message lists to a budget.
///
/// Cloning is cheap; clones share the loaded tokenizers.
#[derive(Clone, Default)]
pub struct TokenCounter {
    encoders: Arc<Mutex<HashMap<Tokenizer, Arc<CoreBPE>>>>,
}

impl fmt::Debug for TokenCounter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let loaded = self.encoders.lock().map(|m| m.len()).unwrap_or(0);
        f.debug_struct("TokenCounter")
            .field("loaded_encoders", &loaded)
            .finish()
    }
}

impl TokenCounter {
    pub fn new() -> Self {
        Self::default()
    }

    fn encoder(&self, model: &str) -> Result<Arc<CoreBPE>> {
        let tokenizer =
            get_tokenizer(model).ok_or_else(|| Error::UnsupportedModel(model.to_string()))?;

        let mut encoders = self
            .encoders
            .lock()
            .map_err(|_| Error::Other("tokenizer cache poisoned".to_string()))?;

        if let Some(bpe) = encoders.get(&tokenizer) {
            return Ok(Arc::clone(bpe));
        }

        debug!("Loading {:?} tokenizer for {}", tokenizer, model);
        let bpe = Arc::new(tiktoken_rs::get_bpe_from_tokenizer(tokenizer)?);
        encoders.insert(tokenizer, Arc::clone(&bpe));
        Ok(bpe)
    }

    /// Number of tokens in a single string.
    pub fn count_text(&self, text: &str, model: &str) -> Result<usize> {
        let bpe = self.encoder(model)?;
        Ok(bpe.encode_with_special_tokens(text).len())
    }

    /// Token cost of a message list, reply priming included.
    pub fn count(&self, messages: &[ChatMessage], model: &str) -> Result<usize> {
        let bpe = self.encoder(model)?;
        let total = messages
            .iter()
            .map(|m| message_cost(&bpe, m))
            .sum::<usize>()
            + REPLY_PRIMING_TOKENS;
        Ok(total)
    }

    /// Whether `messages` fit in `max_tokens`.
    pub fn fits(&self, messages: &[ChatMessage], model: &str, max_tokens: usize) -> Result<bool> {
        Ok(self.count(messages, model)? <= max_tokens)
    }

    /// Drop the oldest messages until the list fits `max_tokens`.
    ///
    /// With `keep_first`, a leading system message is never dropped. If only
    /// protected messages remain and they still exceed the budget, they are
    /// returned as they are. The input is not modified.
    pub fn buffer(
        &self,
        messages: &[ChatMessage],
        model: &str,
        max_tokens: usize,
        keep_first: bool,
    ) -> Result<Vec<ChatMessage>> {
        let bpe = self.encoder(model)?;

        let protect = keep_first && messages.first().map(|m| m.role) == Some(Role::System);
        let floor = usize::from(protect);

        let mut kept: Vec<ChatMessage> = messages.to_vec();
        let mut costs: Vec<usize> = kept.iter().map(|m| message_cost(&bpe, m)).collect();
        let mut total = costs.iter().sum::<usize>() + REPLY_PRIMING_TOKENS;

        while total > max_tokens && kept.len() > floor {
            kept.remove(floor);
            total -= costs.remove(floor);
        }

        if kept.len() < messages.len() {
            debug!(
                "Buffered history from {} to {} messages ({} tokens, budget {})",
                messages.len(),
                kept.len(),
                total,
                max_tokens
            );
        }

        Ok(kept)
    }

    /// Context window of `model`, in tokens.
    pub fn context_window(&self, model: &str) -> Result<usize> {
        get_tokenizer(model).ok_or_else(|| Error::UnsupportedModel(model.to_string()))?;
        Ok(tiktoken_rs::model::get_context_size(model))
    }
}

fn message_cost(bpe: &CoreBPE, message: &ChatMessage) -> usize {
    let mut tokens = TOKENS_PER_MESSAGE;
    tokens += bpe.encode_with_special_tokens(message.role.as_str()).len();
    tokens += bpe.encode_with_special_tokens(&message.content).len();
    if let Some(name) = &message.name {
        tokens += bpe.encode_with_special_tokens(name).len() + TOKENS_PER_NAME;
    }
    tokens
}
