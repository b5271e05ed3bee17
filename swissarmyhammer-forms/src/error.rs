//! Error types for the forms engine
//!
//! Only setup-time misconfiguration is reported through [`FormsError`].
//! Validation outcomes and structural rejections are plain return values.

use thiserror::Error;

/// Result type for forms operations
pub type Result<T> = std::result::Result<T, FormsError>;

/// Errors that can occur while configuring or feeding the forms engine
#[derive(Debug, Error)]
pub enum FormsError {
    /// Path could not be parsed
    #[error("invalid path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    /// Option value is out of its allowed range
    #[error("invalid configuration for '{key}': {message}")]
    InvalidConfig { key: String, message: String },

    /// Options could not be extracted from the configuration layers
    #[error("configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// Deferred default values failed to load
    #[error("default values failed to load: {message}")]
    DefaultValues { message: String },

    /// An operation needed a tokio runtime and none was running
    #[error("no async runtime available for {context}")]
    NoRuntime { context: String },

    /// A path does not resolve inside the schema
    #[error("schema mismatch at '{path}': {message}")]
    SchemaMismatch { path: String, message: String },

    /// A rule could not be compiled
    #[error("invalid pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },
}

impl FormsError {
    /// Create a default-values load error
    pub fn default_values(message: impl Into<String>) -> Self {
        Self::DefaultValues {
            message: message.into(),
        }
    }

    /// Create an invalid path error
    pub fn invalid_path(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidPath {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid configuration error
    pub fn invalid_config(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            key: key.into(),
            message: message.into(),
        }
    }
}

impl From<figment::Error> for FormsError {
    fn from(error: figment::Error) -> Self {
        FormsError::Config(Box::new(error))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = FormsError::invalid_path("a..b", "empty segment");
        assert_eq!(err.to_string(), "invalid path 'a..b': empty segment");
    }

    #[test]
    fn test_default_values_error() {
        let err = FormsError::default_values("backend unavailable");
        assert!(err.to_string().contains("backend unavailable"));
    }
}
