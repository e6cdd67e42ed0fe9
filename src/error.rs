//! Error types for the Chatgate service.

use thiserror::Error;

/// Main error type for Chatgate operations.
#[derive(Error, Debug)]
pub enum ChatGateError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Rate limit store could not be reached or returned garbage
    #[error("Rate limit store error: {0}")]
    Store(String),

    /// HTTP server errors
    #[error("Server error: {0}")]
    Server(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<config::ConfigError> for ChatGateError {
    fn from(err: config::ConfigError) -> Self {
        ChatGateError::Config(err.to_string())
    }
}

/// Result type alias for Chatgate operations.
pub type Result<T> = std::result::Result<T, ChatGateError>;
