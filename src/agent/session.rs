//! Conversation session: a system prompt, a history and the settings used to
//! replay it within a token budget.

use chrono::{DateTime, Utc};
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::Config;
use crate::error::Error;
use crate::memory::{InMemoryMessageHistory, MessageHistory};
use crate::prompt::{ChatMessage, MessageTemplate, PromptTemplate, Substitutions};
use crate::Result;

use super::generator::{GenerateOptions, TextGenerator, TextStream};
use super::llm::LlmClient;

/// Settings a session replays its history with.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSettings {
    pub model: String,
    pub temperature: f32,
    /// History budget in tokens; the model's context window when unset.
    pub max_history_tokens: Option<usize>,
    /// Keep a leading system message when trimming.
    pub keep_system: bool,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            model: super::generator::DEFAULT_MODEL.to_string(),
            temperature: 0.0,
            max_history_tokens: None,
            keep_system: true,
        }
    }
}

impl SessionSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            model: config.model.clone(),
            temperature: config.temperature,
            max_history_tokens: config.max_history_tokens,
            keep_system: config.keep_system_message,
        }
    }

    fn options(&self) -> GenerateOptions {
        GenerateOptions::new(&self.model).with_temperature(self.temperature)
    }
}

/// One conversation. Owned by the caller; never shared.
pub struct Session<H: MessageHistory = InMemoryMessageHistory> {
    pub id: String,
    pub started_at: DateTime<Utc>,
    history: H,
    system: Option<ChatMessage>,
    settings: SessionSettings,
}

impl Session<InMemoryMessageHistory> {
    /// Session backed by an in-memory history.
    pub fn in_memory(settings: SessionSettings) -> Self {
        Self::new(InMemoryMessageHistory::new(), settings)
    }
}

impl<H: MessageHistory> Session<H> {
    pub fn new(history: H, settings: SessionSettings) -> Self {
        let system = history
            .messages()
            .first()
            .filter(|m| m.role == crate::prompt::Role::System)
            .cloned();

        Self {
            id: Uuid::new_v4().to_string(),
            started_at: Utc::now(),
            history,
            system,
            settings,
        }
    }

    pub fn history(&self) -> &H {
        &self.history
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    /// Fill `template` and record it as the system prompt.
    ///
    /// Does nothing if the history already has messages, so reopened
    /// histories keep their original prompt.
    pub fn start(&mut self, template: &MessageTemplate, values: &Substitutions) -> Result<()> {
        if !self.history.is_empty() {
            debug!("Session {} resumed with {} messages", self.id, self.history.len());
            return Ok(());
        }

        let mut template = template.clone();
        template.format_message(values)?;
        let message = template.to_message();
        self.history.add(message.clone())?;
        self.system = Some(message);
        Ok(())
    }

    fn budget(&self) -> Result<usize> {
        match self.settings.max_history_tokens {
            Some(budget) => Ok(budget),
            None => self.history.counter().context_window(&self.settings.model),
        }
    }

    /// The messages that would be sent for `input`: history plus the new user
    /// turn, trimmed to the budget. The history itself is left untouched.
    ///
    /// Fails with [`Error::OverBudget`] when the turn cannot fit even after
    /// every older message is dropped.
    pub fn context(&self, input: &str) -> Result<Vec<ChatMessage>> {
        let turn = ChatMessage::user(input);
        let mut messages = self.history.messages().to_vec();
        messages.push(turn.clone());

        let budget = self.budget()?;
        let context = self.history.counter().buffer(
            &messages,
            &self.settings.model,
            budget,
            self.settings.keep_system,
        )?;

        // Trimming drops oldest first, so the new turn goes last.
        if context.last() != Some(&turn) {
            return Err(Error::OverBudget(format!(
                "input does not fit the {budget}-token history budget for {}",
                self.settings.model
            )));
        }
        debug!(
            "Session {} context: {} of {} messages",
            self.id,
            context.len(),
            messages.len()
        );
        Ok(context)
    }

    /// Send `input` and record both turns once the reply arrives.
    pub async fn ask<C: LlmClient>(
        &mut self,
        generator: &TextGenerator<C>,
        input: &str,
    ) -> Result<String> {
        let context = self.context(input)?;
        let completion = generator.complete(&context, &self.settings.options()).await?;
        let reply = completion
            .content()
            .ok_or_else(|| Error::Llm("Response carried no content".to_string()))?
            .to_string();

        self.record_reply(input, &reply)?;
        Ok(reply)
    }

    /// Like [`ask`](Self::ask), streaming the reply.
    ///
    /// The caller records the assembled reply with [`record_reply`](Self::record_reply).
    pub async fn ask_stream<C: LlmClient>(
        &self,
        generator: &TextGenerator<C>,
        input: &str,
    ) -> Result<TextStream> {
        let context = self.context(input)?;
        generator
            .complete_stream(&context, &self.settings.options())
            .await
    }

    pub fn record_reply(&mut self, input: &str, reply: &str) -> Result<()> {
        self.history.add(ChatMessage::user(input))?;
        self.history.add(ChatMessage::assistant(reply))
    }

    /// Drop the conversation, keeping the system prompt.
    pub fn reset(&mut self) -> Result<()> {
        self.history.clear()?;
        if let Some(system) = self.system.clone() {
            self.history.add(system)?;
        }
        info!("Session {} reset", self.id);
        Ok(())
    }
}
