//! Configuration management

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use crate::Result;
use crate::agent::llm::{RetryPolicy, OPENAI_API_URL};
use crate::error::Error;

/// Environment variable that overrides the configured API key.
pub const API_KEY_ENV: &str = "OPENAI_API_KEY";

/// Main configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Workspace directory holding prompt templates and chat histories
    #[serde(default = "default_workspace")]
    pub workspace: PathBuf,

    /// LLM provider to use
    #[serde(default = "default_provider")]
    pub provider: String,

    /// Chat-completions endpoint root
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// API key; `OPENAI_API_KEY` takes precedence when set
    #[serde(default)]
    pub api_key: String,

    /// Model to use
    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default)]
    pub temperature: f32,

    /// Per-request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Chat history budget in tokens (model context window when unset)
    #[serde(default)]
    pub max_history_tokens: Option<usize>,

    /// Keep the system prompt when trimming chat history
    #[serde(default = "default_true")]
    pub keep_system_message: bool,

    /// Maximum in-flight requests for batch classification
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    #[serde(default)]
    pub retry: RetrySettings,
}

/// Retry settings for transient provider failures
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_secs: u64,

    #[serde(default = "default_max_backoff")]
    pub max_backoff_secs: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_secs: default_initial_backoff(),
            max_backoff_secs: default_max_backoff(),
        }
    }
}

fn default_workspace() -> PathBuf {
    config_dir().join("workspace")
}

fn default_provider() -> String {
    "openai".to_string()
}

fn default_base_url() -> String {
    OPENAI_API_URL.to_string()
}

fn default_model() -> String {
    "gpt-3.5-turbo".to_string()
}

fn default_request_timeout() -> u64 {
    60
}

fn default_true() -> bool {
    true
}

fn default_concurrency() -> usize {
    10
}

fn default_max_attempts() -> u32 {
    6
}

fn default_initial_backoff() -> u64 {
    1
}

fn default_max_backoff() -> u64 {
    60
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workspace: default_workspace(),
            provider: default_provider(),
            base_url: default_base_url(),
            api_key: String::new(),
            model: default_model(),
            temperature: 0.0,
            request_timeout_secs: default_request_timeout(),
            max_history_tokens: None,
            keep_system_message: true,
            concurrency: default_concurrency(),
            retry: RetrySettings::default(),
        }
    }
}

impl Config {
    /// API key from the environment, falling back to the config file.
    pub fn resolved_api_key(&self) -> Result<String> {
        let key = std::env::var(API_KEY_ENV)
            .ok()
            .filter(|k| !k.is_empty())
            .unwrap_or_else(|| self.api_key.clone());

        if key.is_empty() {
            return Err(Error::Config(format!(
                "No API key. Set {} or add \"api_key\" to {:?}.",
                API_KEY_ENV,
                config_path()
            )));
        }
        Ok(key)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            initial_backoff: Duration::from_secs(self.retry.initial_backoff_secs),
            max_backoff: Duration::from_secs(self.retry.max_backoff_secs),
            ..RetryPolicy::new(self.retry.max_attempts)
        }
    }

    /// Directory the built-in prompt templates are written to.
    pub fn prompts_dir(&self) -> PathBuf {
        self.workspace.join("prompts")
    }

    /// Directory persisted chat histories live in.
    pub fn history_dir(&self) -> PathBuf {
        self.workspace.join("history")
    }
}

/// Get the config directory path
pub fn config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".genai")
}

/// Get the config file path
pub fn config_path() -> PathBuf {
    config_dir().join("config.json")
}

/// Load configuration from file
pub fn load() -> Result<Config> {
    load_from(&config_path())
}

pub fn load_from(path: &Path) -> Result<Config> {
    if !path.exists() {
        return Err(Error::Config(format!(
            "Config not found at {:?}. Run 'genai init' first.",
            path
        )));
    }

    let content = std::fs::read_to_string(path)?;
    let config: Config = serde_json::from_str(&content)?;
    Ok(config)
}

/// Load configuration, using defaults when no file exists yet
pub fn load_or_default() -> Result<Config> {
    let path = config_path();
    if path.exists() {
        load_from(&path)
    } else {
        Ok(Config::default())
    }
}

/// Save configuration to file
pub fn save(config: &Config) -> Result<()> {
    save_to(config, &config_path())
}

pub fn save_to(config: &Config, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let content = serde_json::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}

/// Initialize configuration and workspace.
///
/// An existing config file is kept; missing prompt templates are written.
pub fn init() -> Result<Config> {
    let path = config_path();
    let config = if path.exists() {
        load_from(&path)?
    } else {
        let config = Config::default();
        save_to(&config, &path)?;
        config
    };

    std::fs::create_dir_all(config.history_dir())?;
    crate::templates::bootstrap_workspace(&config.prompts_dir())?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.model, "gpt-3.5-turbo");
        assert_eq!(config.request_timeout_secs, 60);
        assert_eq!(config.concurrency, 10);
        assert!(config.keep_system_message);
        assert_eq!(config.retry_policy(), RetryPolicy::default());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let config: Config = serde_json::from_str(r#"{"model": "gpt-4", "retry": {"max_attempts": 3}}"#).unwrap();
        assert_eq!(config.model, "gpt-4");
        assert_eq!(config.base_url, OPENAI_API_URL);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.max_backoff_secs, 60);
        assert_eq!(config.retry_policy().max_attempts, 3);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let config = Config {
            model: "gpt-4".to_string(),
            max_history_tokens: Some(2048),
            ..Config::default()
        };
        save_to(&config, &path).unwrap();

        assert_eq!(load_from(&path).unwrap(), config);
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_from(&dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
