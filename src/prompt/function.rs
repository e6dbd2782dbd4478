//! Callable function declarations as templates.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::placeholder::{self, Substitutions};
use super::PromptTemplate;
use crate::Result;

/// A function declaration the model may be asked to call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FunctionSpec {
    pub name: String,
    pub description: String,

    /// JSON schema of the arguments. Older prompt files call this `properties`.
    #[serde(alias = "properties")]
    pub parameters: Value,
}

/// Template for a function declaration; placeholders may appear in the
/// name, the description, or any string nested in the parameter schema.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionTemplate {
    original: FunctionSpec,
    filled: FunctionSpec,
}

impl FunctionTemplate {
    pub fn new(name: impl Into<String>, description: impl Into<String>, parameters: Value) -> Self {
        Self::from_body(FunctionSpec {
            name: name.into(),
            description: description.into(),
            parameters,
        })
    }

    pub fn name(&self) -> &str {
        &self.filled.name
    }

    pub fn description(&self) -> &str {
        &self.filled.description
    }

    pub fn parameters(&self) -> &Value {
        &self.filled.parameters
    }
}

impl PromptTemplate for FunctionTemplate {
    type Body = FunctionSpec;

    const KIND: &'static str = "function";

    fn from_body(body: FunctionSpec) -> Self {
        Self {
            filled: body.clone(),
            original: body,
        }
    }

    fn original(&self) -> &FunctionSpec {
        &self.original
    }

    fn filled(&self) -> &FunctionSpec {
        &self.filled
    }

    fn format_message(&mut self, values: &Substitutions) -> Result<()> {
        let filled = FunctionSpec {
            name: placeholder::fill(&self.original.name, values)?,
            description: placeholder::fill(&self.original.description, values)?,
            parameters: placeholder::fill_value(&self.original.parameters, values)?,
        };
        self.filled = filled;
        Ok(())
    }

    fn placeholders(&self) -> Vec<String> {
        let mut names = placeholder::placeholders(&self.original.name);
        let rest = placeholder::placeholders(&self.original.description)
            .into_iter()
            .chain(placeholder::value_placeholders(&self.original.parameters));
        for name in rest {
            if !names.contains(&name) {
                names.push(name);
            }
        }
        names
    }
}
