//! Built-in prompt templates.
//!
//! Templates are embedded at compile time from the `templates/` directory.
//! `genai init` writes them into the workspace so they can be edited.

use serde_json::{Map, Value};

use crate::error::Error;
use crate::prompt::Template;
use crate::Result;

/// Explain a concept to a three year old. Placeholder: `input`.
pub const ELI3: &str = include_str!("../templates/eli3.json");

/// EYFS activity classifier. Placeholders: `areas_of_learning`, `text`.
pub const EYFS_CLASSIFIER: &str = include_str!("../templates/eyfs_classifier.json");

/// Function the classifier answers through.
pub const EYFS_CLASSIFIER_FUNCTION: &str = include_str!("../templates/eyfs_classifier_function.json");

/// Parenting chatbot system prompt. Placeholder: `guidance`.
pub const PARENTING_SYSTEM: &str = include_str!("../templates/parenting_system.json");

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinKind {
    Message,
    Function,
}

/// File name, kind and content of every built-in template
pub const TEMPLATES: &[(&str, BuiltinKind, &str)] = &[
    ("eli3.json", BuiltinKind::Message, ELI3),
    ("eyfs_classifier.json", BuiltinKind::Message, EYFS_CLASSIFIER),
    ("eyfs_classifier_function.json", BuiltinKind::Function, EYFS_CLASSIFIER_FUNCTION),
    ("parenting_system.json", BuiltinKind::Message, PARENTING_SYSTEM),
];

/// Load a built-in template by name, with or without the `.json` suffix.
pub fn builtin(name: &str) -> Result<Template> {
    let file_name = if name.ends_with(".json") {
        name.to_string()
    } else {
        format!("{name}.json")
    };

    let (_, kind, content) = TEMPLATES
        .iter()
        .find(|(candidate, _, _)| *candidate == file_name)
        .ok_or_else(|| Error::Template(format!("No built-in template named '{name}'")))?;

    let mapping: Map<String, Value> = serde_json::from_str(content)?;
    match kind {
        BuiltinKind::Message => Template::message(mapping),
        BuiltinKind::Function => Template::function(mapping),
    }
}

/// Write every built-in template into `dir`.
/// Only creates files that don't already exist.
pub fn bootstrap_workspace(dir: &std::path::Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dir)?;
    for (filename, _, content) in TEMPLATES {
        let path = dir.join(filename);
        if !path.exists() {
            std::fs::write(&path, content)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtins_load() {
        for (name, kind, _) in TEMPLATES {
            let template = builtin(name).unwrap();
            match kind {
                BuiltinKind::Message => assert!(template.as_message().is_some()),
                BuiltinKind::Function => assert!(template.as_function().is_some()),
            }
        }
    }

    #[test]
    fn test_builtin_placeholders() {
        assert_eq!(builtin("eli3").unwrap().placeholders(), vec!["input"]);

        let mut classifier = builtin("eyfs_classifier").unwrap().placeholders();
        classifier.sort();
        assert_eq!(classifier, vec!["areas_of_learning", "text"]);
    }

    #[test]
    fn test_unknown_builtin() {
        assert!(matches!(builtin("haiku"), Err(Error::Template(_))));
    }

    #[test]
    fn test_bootstrap_keeps_existing_files() {
        let dir = tempfile::tempdir().unwrap();
        let prompts = dir.path().join("prompts");
        std::fs::create_dir_all(&prompts).unwrap();
        std::fs::write(prompts.join("eli3.json"), "edited").unwrap();

        bootstrap_workspace(&prompts).unwrap();

        assert_eq!(std::fs::read_to_string(prompts.join("eli3.json")).unwrap(), "edited");
        assert_eq!(
            std::fs::read_to_string(prompts.join("eyfs_classifier.json")).unwrap(),
            EYFS_CLASSIFIER
        );
    }
}
