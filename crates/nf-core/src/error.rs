//! Error types for nodeforge

use thiserror::Error;

/// Main error type for discovery, generation and caching
#[derive(Error, Debug)]
pub enum Error {
    #[error("Capability source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Malformed descriptor for node '{node}': {reason}")]
    MalformedDescriptor { node: String, reason: String },

    #[error("Tool generation error: {0}")]
    Generation(String),

    #[error("Invalid pattern: {0}")]
    InvalidPattern(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create a source-unavailable error
    pub fn source_unavailable(msg: impl Into<String>) -> Self {
        Error::SourceUnavailable(msg.into())
    }

    /// Create an HTTP error
    pub fn http(msg: impl Into<String>) -> Self {
        Error::Http(msg.into())
    }

    /// Create a malformed descriptor error
    pub fn malformed(node: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::MalformedDescriptor {
            node: node.into(),
            reason: reason.into(),
        }
    }

    /// Create a generation error
    pub fn generation(msg: impl Into<String>) -> Self {
        Error::Generation(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Create a not found error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Error::NotFound(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Error::Internal(msg.into())
    }

    /// Whether this error means the capability source could not be reached at all
    pub fn is_source_failure(&self) -> bool {
        matches!(self, Error::SourceUnavailable(_) | Error::Http(_))
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::Internal(err.to_string())
    }
}
