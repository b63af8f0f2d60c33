//! Error types for the adapter.

use thiserror::Error;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ProxyError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Invalid request: {message}")]
    Validation { message: String },

    #[error("No user message found to use as the prompt")]
    MissingPrompt,

    #[error("Unauthorized: {message}")]
    Unauthorized { message: String },

    #[error("Upstream returned status {status}: {message}")]
    Upstream { status: u16, message: String },

    #[error("Translation error: {message}")]
    Translation { message: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("{0}")]
    Other(String),
}

impl ProxyError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::Unauthorized {
            message: msg.into(),
        }
    }

    pub fn translation(msg: impl Into<String>) -> Self {
        Self::Translation {
            message: msg.into(),
        }
    }

    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// HTTP status this error is reported with when no response has been committed yet.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Validation { .. } | Self::MissingPrompt => 400,
            Self::Unauthorized { .. } => 401,
            Self::Upstream { status, .. } => *status,
            _ => 500,
        }
    }

    /// Short client-facing summary used as the `error` field of the error body.
    #[must_use]
    pub fn summary(&self) -> &'static str {
        match self {
            Self::Validation { .. } | Self::MissingPrompt => "Invalid request",
            Self::Unauthorized { .. } => "Missing API key",
            Self::Upstream { .. } | Self::Http(_) => "Upstream request failed",
            _ => "Internal server error",
        }
    }
}

pub type Result<T> = std::result::Result<T, ProxyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_errors_are_client_errors() {
        assert_eq!(ProxyError::validation("bad").status_code(), 400);
        assert_eq!(ProxyError::MissingPrompt.status_code(), 400);
        assert_eq!(ProxyError::unauthorized("no key").status_code(), 401);
    }

    #[test]
    fn test_upstream_status_is_mirrored() {
        let err = ProxyError::Upstream {
            status: 429,
            message: "rate limited".to_string(),
        };
        assert_eq!(err.status_code(), 429);
        assert_eq!(err.summary(), "Upstream request failed");
    }

    #[test]
    fn test_internal_errors_default_to_500() {
        assert_eq!(ProxyError::translation("oops").status_code(), 500);
        assert_eq!(ProxyError::other("oops").status_code(), 500);
    }
}
