//! Error types for genai

use std::fmt;

use thiserror::Error;

/// Result type alias for genai operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in genai
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    /// The value handed to a template loader was neither a mapping nor a path.
    #[error("Expected a JSON file path or a mapping, got {0}")]
    InvalidSource(String),

    #[error("Template error: {0}")]
    Template(String),

    #[error("Missing value for placeholder '{0}'")]
    MissingPlaceholder(String),

    #[error("No tokenizer available for model '{0}'")]
    UnsupportedModel(String),

    /// A message that must be sent cannot fit the token budget.
    #[error("Over token budget: {0}")]
    OverBudget(String),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{0}")]
    Other(String),
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::Other(err.to_string())
    }
}

/// Closed set of failure kinds surfaced by an LLM provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderErrorKind {
    Timeout,
    Api,
    Connection,
    RateLimit,
    ServiceUnavailable,
    Authentication,
    InvalidRequest,
    Other,
}

impl ProviderErrorKind {
    /// Kinds worth retrying: the provider may well succeed on the next attempt.
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            Self::Timeout
                | Self::Api
                | Self::Connection
                | Self::RateLimit
                | Self::ServiceUnavailable
        )
    }
}

impl fmt::Display for ProviderErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Timeout => "timeout",
            Self::Api => "api error",
            Self::Connection => "connection error",
            Self::RateLimit => "rate limit exceeded",
            Self::ServiceUnavailable => "service unavailable",
            Self::Authentication => "authentication failed",
            Self::InvalidRequest => "invalid request",
            Self::Other => "provider error",
        };
        f.write_str(name)
    }
}

/// An error reported by the LLM provider, tagged with its kind.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct ProviderError {
    pub kind: ProviderErrorKind,
    pub message: String,
    /// HTTP status, when the failure came from a response.
    pub status: Option<u16>,
}

impl ProviderError {
    pub fn new(kind: ProviderErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status: None,
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Timeout, message)
    }

    pub fn api(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Api, message)
    }

    pub fn connection(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Connection, message)
    }

    pub fn rate_limit(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::RateLimit, message)
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::ServiceUnavailable, message)
    }

    pub fn authentication(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Authentication, message)
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::InvalidRequest, message)
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Other, message)
    }

    #[inline]
    pub fn is_transient(&self) -> bool {
        self.kind.is_transient()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_kinds() {
        assert!(ProviderError::timeout("t").is_transient());
        assert!(ProviderError::api("a").is_transient());
        assert!(ProviderError::connection("c").is_transient());
        assert!(ProviderError::rate_limit("r").is_transient());
        assert!(ProviderError::service_unavailable("s").is_transient());

        assert!(!ProviderError::authentication("bad key").is_transient());
        assert!(!ProviderError::invalid_request("bad body").is_transient());
        assert!(!ProviderError::other("?").is_transient());
    }

    #[test]
    fn test_provider_error_display() {
        let err = ProviderError::rate_limit("slow down").with_status(429);
        assert_eq!(err.to_string(), "rate limit exceeded: slow down");
        assert_eq!(err.status, Some(429));

        let wrapped: Error = err.clone().into();
        assert_eq!(wrapped.to_string(), err.to_string());
    }
}
