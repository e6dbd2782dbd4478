//! `{name}` placeholder scanning and substitution.
//!
//! Only identifiers (`[A-Za-z_][A-Za-z0-9_]*`) between single braces are
//! placeholders. Doubled braces render as one literal brace; any other brace
//! text is left untouched.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::{Captures, Regex};
use serde_json::Value;

use crate::error::Error;
use crate::Result;

/// Values substituted into placeholders, keyed by placeholder name.
pub type Substitutions = HashMap<String, String>;

fn pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    // Constant pattern; compiled on first use by every test in this module.
    PATTERN.get_or_init(|| {
        Regex::new(r"\{\{|\}\}|\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("placeholder pattern is valid")
    })
}

fn placeholder_name<'t>(caps: &Captures<'t>) -> Option<&'t str> {
    caps.get(1).map(|m| m.as_str())
}

/// Names referenced by `text`, in order of first appearance.
pub fn placeholders(text: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for caps in pattern().captures_iter(text) {
        if let Some(name) = placeholder_name(&caps) {
            if !names.iter().any(|n| n == name) {
                names.push(name.to_string());
            }
        }
    }
    names
}

#[inline]
pub fn has_placeholders(text: &str) -> bool {
    pattern()
        .captures_iter(text)
        .any(|caps| placeholder_name(&caps).is_some())
}

/// Substitute every placeholder in `text`.
///
/// Text without placeholders is returned verbatim, escapes included.
pub fn fill(text: &str, values: &Substitutions) -> Result<String> {
    if !has_placeholders(text) {
        return Ok(text.to_string());
    }

    let mut out = String::with_capacity(text.len());
    let mut last = 0;

    for caps in pattern().captures_iter(text) {
        let Some(whole) = caps.get(0) else {
            continue;
        };
        out.push_str(&text[last..whole.start()]);

        match placeholder_name(&caps) {
            Some(name) => {
                let value = values
                    .get(name)
                    .ok_or_else(|| Error::MissingPlaceholder(name.to_string()))?;
                out.push_str(value);
            }
            None => out.push_str(&whole.as_str()[..1]),
        }

        last = whole.end();
    }

    out.push_str(&text[last..]);
    Ok(out)
}

/// Fill every string inside a JSON value, recursing into arrays and objects.
pub fn fill_value(value: &Value, values: &Substitutions) -> Result<Value> {
    match value {
        Value::String(s) => Ok(Value::String(fill(s, values)?)),
        Value::Array(items) => items
            .iter()
            .map(|item| fill_value(item, values))
            .collect::<Result<Vec<_>>>()
            .map(Value::Array),
        Value::Object(map) => {
            let mut filled = serde_json::Map::with_capacity(map.len());
            for (key, item) in map {
                filled.insert(key.clone(), fill_value(item, values)?);
            }
            Ok(Value::Object(filled))
        }
        other => Ok(other.clone()),
    }
}

/// Placeholder names referenced anywhere inside a JSON value.
pub fn value_placeholders(value: &Value) -> Vec<String> {
    let mut names = Vec::new();
    collect_value_placeholders(value, &mut names);
    names
}

fn collect_value_placeholders(value: &Value, names: &mut Vec<String>) {
    match value {
        Value::String(s) => {
            for name in placeholders(s) {
                if !names.contains(&name) {
                    names.push(name);
                }
            }
        }
        Value::Array(items) => items
            .iter()
            .for_each(|item| collect_value_placeholders(item, names)),
        Value::Object(map) => map
            .values()
            .for_each(|item| collect_value_placeholders(item, names)),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn vars(pairs: &[(&str, &str)]) -> Substitutions {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_placeholders_in_order_without_duplicates() {
        let names = placeholders("{a} and {b}, then {a} again");
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn test_fill_substitutes_all_names() {
        let text = fill("Tell me about {topic} for a {age} year old", &vars(&[("topic", "whales"), ("age", "3")]))
            .unwrap();
        assert_eq!(text, "Tell me about whales for a 3 year old");
    }

    #[test]
    fn test_fill_missing_name_fails() {
        let err = fill("Hello {name}", &Substitutions::new()).unwrap_err();
        assert!(matches!(err, Error::MissingPlaceholder(ref n) if n == "name"));
    }

    #[test]
    fn test_fill_ignores_extra_values() {
        let text = fill("Hi {name}", &vars(&[("name", "Sam"), ("unused", "x")])).unwrap();
        assert_eq!(text, "Hi Sam");
    }

    #[test]
    fn test_escaped_braces() {
        let text = fill("{{\"key\": \"{value}\"}}", &vars(&[("value", "v")])).unwrap();
        assert_eq!(text, "{\"key\": \"v\"}");

        // No placeholder: copied verbatim.
        assert_eq!(fill("{{literal}}", &Substitutions::new()).unwrap(), "{{literal}}");
    }

    #[test]
    fn test_fill_adjacent_matches_keep_surrounding_text() {
        let text = fill("{{{a}}}{b}}}x{{", &vars(&[("a", "1"), ("b", "2")])).unwrap();
        assert_eq!(text, "{1}2}x{");
        assert_eq!(fill("{a}{a}", &vars(&[("a", "ab")])).unwrap(), "abab");
    }

    #[test]
    fn test_non_identifier_braces_are_literal() {
        assert!(!has_placeholders("{} and { spaced } and {1abc}"));
        let text = fill("{} {x}", &vars(&[("x", "y")])).unwrap();
        assert_eq!(text, "{} y");
    }

    #[test]
    fn test_fill_value_recurses() {
        let schema = json!({
            "type": "object",
            "properties": {
                "label": {"type": "string", "enum": ["{first}", "{second}", "None"]},
                "count": {"type": "integer", "minimum": 0}
            }
        });
        let filled = fill_value(&schema, &vars(&[("first", "A"), ("second", "B")])).unwrap();
        assert_eq!(filled["properties"]["label"]["enum"], json!(["A", "B", "None"]));
        assert_eq!(filled["properties"]["count"], schema["properties"]["count"]);
        assert_eq!(value_placeholders(&schema), vec!["first", "second"]);
    }
}
