//! Chat message types and the message template.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::placeholder::{self, Substitutions};
use super::PromptTemplate;
use crate::Result;

/// Message role in a conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Function,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Function => "function",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A role/content pair, as sent to the provider and kept in history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,

    /// Function name (for function results)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            name: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// Create a function result message
    pub fn function_result(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Function,
            content: content.into(),
            name: Some(name.into()),
        }
    }
}

/// Template for a single conversational message.
///
/// Keeps the pristine message it was loaded from next to the filled copy, so
/// the same template can be refilled on every turn.
///
/// ```
/// use genai::prompt::{MessageTemplate, PromptTemplate, Substitutions};
///
/// let mut tpl = MessageTemplate::user("Tell me about {topic}");
/// let vars = Substitutions::from([("topic".to_string(), "whales".to_string())]);
/// tpl.format_message(&vars).unwrap();
/// assert_eq!(tpl.content(), "Tell me about whales");
/// assert_eq!(tpl.original().content, "Tell me about {topic}");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageTemplate {
    original: ChatMessage,
    filled: ChatMessage,
}

impl MessageTemplate {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self::from_body(ChatMessage::new(role, content))
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn role(&self) -> Role {
        self.filled.role
    }

    pub fn content(&self) -> &str {
        &self.filled.content
    }

    pub fn name(&self) -> Option<&str> {
        self.filled.name.as_deref()
    }

    /// The filled message.
    pub fn to_message(&self) -> ChatMessage {
        self.filled.clone()
    }
}

impl PromptTemplate for MessageTemplate {
    type Body = ChatMessage;

    const KIND: &'static str = "message";

    fn from_body(body: ChatMessage) -> Self {
        Self {
            filled: body.clone(),
            original: body,
        }
    }

    fn original(&self) -> &ChatMessage {
        &self.original
    }

    fn filled(&self) -> &ChatMessage {
        &self.filled
    }

    fn format_message(&mut self, values: &Substitutions) -> Result<()> {
        let content = placeholder::fill(&self.original.content, values)?;
        let name = self
            .original
            .name
            .as_deref()
            .map(|n| placeholder::fill(n, values))
            .transpose()?;

        self.filled = ChatMessage {
            role: self.original.role,
            content,
            name,
        };
        Ok(())
    }

    fn placeholders(&self) -> Vec<String> {
        let mut names = placeholder::placeholders(&self.original.content);
        if let Some(name) = &self.original.name {
            for n in placeholder::placeholders(name) {
                if !names.contains(&n) {
                    names.push(n);
                }
            }
        }
        names
    }
}

impl From<MessageTemplate> for ChatMessage {
    fn from(template: MessageTemplate) -> Self {
        template.filled
    }
}

impl From<ChatMessage> for MessageTemplate {
    fn from(message: ChatMessage) -> Self {
        Self::from_body(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use serde_json::json;

    fn vars(pairs: &[(&str, &str)]) -> Substitutions {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_load_format_to_prompt() {
        let mut tpl = MessageTemplate::load_value(json!({
            "role": "user",
            "content": "Tell me about {topic}"
        }))
        .unwrap();

        tpl.format_message(&vars(&[("topic", "whales")])).unwrap();

        assert_eq!(
            tpl.to_prompt().unwrap(),
            json!({"role": "user", "content": "Tell me about whales"})
        );
    }

    #[test]
    fn test_refill_does_not_compound() {
        let mut reused = MessageTemplate::system("You help parents of a child aged {age}.");
        reused.format_message(&vars(&[("age", "2")])).unwrap();
        reused.format_message(&vars(&[("age", "4")])).unwrap();

        let mut fresh = MessageTemplate::system("You help parents of a child aged {age}.");
        fresh.format_message(&vars(&[("age", "4")])).unwrap();

        assert_eq!(reused, fresh);
        assert_eq!(reused.content(), "You help parents of a child aged 4.");
    }

    #[test]
    fn test_fill_is_idempotent() {
        let mut tpl = MessageTemplate::user("{a}{b}");
        let values = vars(&[("a", "{b}"), ("b", "x")]);
        tpl.format_message(&values).unwrap();
        let first = tpl.to_message();
        tpl.format_message(&values).unwrap();

        assert_eq!(tpl.to_message(), first);
        assert_eq!(tpl.content(), "{b}x");
    }

    #[test]
    fn test_missing_value_keeps_previous_fill() {
        let mut tpl = MessageTemplate::user("Explain {input}");
        tpl.format_message(&vars(&[("input", "rain")])).unwrap();

        let err = tpl.format_message(&Substitutions::new()).unwrap_err();
        assert!(matches!(err, Error::MissingPlaceholder(_)));
        assert_eq!(tpl.content(), "Explain rain");
    }

    #[test]
    fn test_content_without_placeholders_is_untouched() {
        let mut tpl = MessageTemplate::system("Reply in JSON like {{\"a\": 1}}");
        tpl.format_message(&Substitutions::new()).unwrap();
        assert_eq!(tpl.content(), "Reply in JSON like {{\"a\": 1}}");
    }

    #[test]
    fn test_function_result_serializes_name() {
        let msg = ChatMessage::function_result("predict_intent", "{\"intent\": \"explain\"}");
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["role"], "function");
        assert_eq!(value["name"], "predict_intent");

        let plain = serde_json::to_value(ChatMessage::user("hi")).unwrap();
        assert!(plain.get("name").is_none());
    }

    #[test]
    fn test_unknown_role_rejected() {
        let err = MessageTemplate::load_value(json!({"role": "narrator", "content": "x"})).unwrap_err();
        assert!(matches!(err, Error::Template(_)));
    }
}
