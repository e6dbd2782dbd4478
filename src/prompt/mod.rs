//! Prompt module: placeholder-fillable templates.
//!
//! This module contains:
//! - [`MessageTemplate`] for one conversational message
//! - [`FunctionTemplate`] for one callable-function declaration
//! - [`Template`], the closed union of both
//! - [`PromptInput`], the shapes accepted wherever a message is expected
//!
//! Templates load from a JSON mapping or from a path to a JSON file holding
//! one. Filling always starts from the pristine original, so a template can be
//! reused across turns with different values.

mod function;
mod message;
pub mod placeholder;

use std::fs;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::Error;
use crate::Result;

pub use function::{FunctionSpec, FunctionTemplate};
pub use message::{ChatMessage, MessageTemplate, Role};
pub use placeholder::Substitutions;

/// Where a template is loaded from.
#[derive(Debug, Clone)]
pub enum TemplateSource {
    Mapping(Map<String, Value>),
    Path(PathBuf),
}

impl From<Map<String, Value>> for TemplateSource {
    fn from(map: Map<String, Value>) -> Self {
        Self::Mapping(map)
    }
}

impl From<PathBuf> for TemplateSource {
    fn from(path: PathBuf) -> Self {
        Self::Path(path)
    }
}

impl From<&Path> for TemplateSource {
    fn from(path: &Path) -> Self {
        Self::Path(path.to_path_buf())
    }
}

impl From<&str> for TemplateSource {
    fn from(path: &str) -> Self {
        Self::Path(PathBuf::from(path))
    }
}

impl TryFrom<Value> for TemplateSource {
    type Error = Error;

    /// Objects are mappings and strings are file paths; nothing else loads.
    fn try_from(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => Ok(Self::Mapping(map)),
            Value::String(path) => Ok(Self::Path(PathBuf::from(path))),
            other => Err(Error::InvalidSource(json_type_name(&other).to_string())),
        }
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Shared behaviour of message and function templates.
pub trait PromptTemplate: Sized {
    /// The serializable shape of this template.
    type Body: Clone + Serialize + DeserializeOwned;

    /// Human name of the variant, used in error messages.
    const KIND: &'static str;

    fn from_body(body: Self::Body) -> Self;

    /// The template as loaded, before any filling.
    fn original(&self) -> &Self::Body;

    /// The current, possibly filled, state.
    fn filled(&self) -> &Self::Body;

    /// Re-derive every placeholder-bearing field from the original using
    /// `values`. On error the previous filled state is kept.
    fn format_message(&mut self, values: &Substitutions) -> Result<()>;

    /// Placeholder names referenced by the original.
    fn placeholders(&self) -> Vec<String>;

    fn load(source: impl Into<TemplateSource>) -> Result<Self> {
        let body = match source.into() {
            TemplateSource::Mapping(map) => body_from_value::<Self>(Value::Object(map))?,
            TemplateSource::Path(path) => {
                debug!("Loading {} template from {:?}", Self::KIND, path);
                let content = fs::read_to_string(&path)?;
                let value: Value = serde_json::from_str(&content)?;
                if !value.is_object() {
                    return Err(Error::Template(format!(
                        "{:?} must contain a single mapping, found {}",
                        path,
                        json_type_name(&value)
                    )));
                }
                body_from_value::<Self>(value)?
            }
        };
        Ok(Self::from_body(body))
    }

    /// Load from an untyped JSON value: a mapping or a path string.
    fn load_value(value: Value) -> Result<Self> {
        Self::load(TemplateSource::try_from(value)?)
    }

    /// Load every line of a JSON-lines file as a template.
    fn load_jsonl(path: impl AsRef<Path>) -> Result<Vec<Self>> {
        let file = fs::File::open(path.as_ref())?;
        let mut templates = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let value: Value = serde_json::from_str(&line)?;
            templates.push(Self::from_body(body_from_value::<Self>(value)?));
        }
        Ok(templates)
    }

    /// The filled state as the mapping the provider API expects.
    fn to_prompt(&self) -> Result<Value> {
        Ok(serde_json::to_value(self.filled())?)
    }

    /// Like [`to_prompt`](Self::to_prompt), dropping the named keys.
    fn to_prompt_excluding(&self, exclude: &[&str]) -> Result<Value> {
        let mut value = self.to_prompt()?;
        if let Value::Object(map) = &mut value {
            for key in exclude {
                map.remove(*key);
            }
        }
        Ok(value)
    }

    /// Write the pristine original to `path`.
    fn to_json(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = serde_json::to_string_pretty(self.original())?;
        fs::write(path, content)?;
        Ok(())
    }
}

fn body_from_value<T: PromptTemplate>(value: Value) -> Result<T::Body> {
    serde_json::from_value(value)
        .map_err(|e| Error::Template(format!("invalid {} template: {}", T::KIND, e)))
}

/// A message or function template.
#[derive(Debug, Clone, PartialEq)]
pub enum Template {
    Message(MessageTemplate),
    Function(FunctionTemplate),
}

impl Template {
    /// Load a message template.
    pub fn message(source: impl Into<TemplateSource>) -> Result<Self> {
        MessageTemplate::load(source).map(Self::Message)
    }

    /// Load a function template.
    pub fn function(source: impl Into<TemplateSource>) -> Result<Self> {
        FunctionTemplate::load(source).map(Self::Function)
    }

    pub fn format_message(&mut self, values: &Substitutions) -> Result<()> {
        match self {
            Self::Message(t) => t.format_message(values),
            Self::Function(t) => t.format_message(values),
        }
    }

    pub fn placeholders(&self) -> Vec<String> {
        match self {
            Self::Message(t) => t.placeholders(),
            Self::Function(t) => t.placeholders(),
        }
    }

    pub fn to_prompt(&self) -> Result<Value> {
        match self {
            Self::Message(t) => t.to_prompt(),
            Self::Function(t) => t.to_prompt(),
        }
    }

    pub fn to_json(&self, path: impl AsRef<Path>) -> Result<()> {
        match self {
            Self::Message(t) => t.to_json(path),
            Self::Function(t) => t.to_json(path),
        }
    }

    pub fn as_message(&self) -> Option<&MessageTemplate> {
        match self {
            Self::Message(t) => Some(t),
            Self::Function(_) => None,
        }
    }

    pub fn as_function(&self) -> Option<&FunctionTemplate> {
        match self {
            Self::Function(t) => Some(t),
            Self::Message(_) => None,
        }
    }
}

impl From<MessageTemplate> for Template {
    fn from(t: MessageTemplate) -> Self {
        Self::Message(t)
    }
}

impl From<FunctionTemplate> for Template {
    fn from(t: FunctionTemplate) -> Self {
        Self::Function(t)
    }
}

/// Any of the shapes accepted as a message: a ready template, a mapping, or
/// a path to a template file.
#[derive(Debug, Clone)]
pub enum PromptInput {
    Template(MessageTemplate),
    Mapping(Map<String, Value>),
    Path(PathBuf),
}

impl PromptInput {
    /// Normalize to a message template, loading if needed.
    pub fn to_template(&self) -> Result<MessageTemplate> {
        match self {
            Self::Template(t) => Ok(t.clone()),
            Self::Mapping(map) => MessageTemplate::load(map.clone()),
            Self::Path(path) => MessageTemplate::load(path.as_path()),
        }
    }
}

impl From<MessageTemplate> for PromptInput {
    fn from(t: MessageTemplate) -> Self {
        Self::Template(t)
    }
}

impl From<ChatMessage> for PromptInput {
    fn from(m: ChatMessage) -> Self {
        Self::Template(MessageTemplate::from(m))
    }
}

impl From<Map<String, Value>> for PromptInput {
    fn from(map: Map<String, Value>) -> Self {
        Self::Mapping(map)
    }
}

impl From<PathBuf> for PromptInput {
    fn from(path: PathBuf) -> Self {
        Self::Path(path)
    }
}

impl From<&Path> for PromptInput {
    fn from(path: &Path) -> Self {
        Self::Path(path.to_path_buf())
    }
}

impl TryFrom<Value> for PromptInput {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self> {
        match TemplateSource::try_from(value)? {
            TemplateSource::Mapping(map) => Ok(Self::Mapping(map)),
            TemplateSource::Path(path) => Ok(Self::Path(path)),
        }
    }
}
