//! Error types for benchcoin.

use thiserror::Error;

/// Result type alias using our error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for benchcoin.
#[derive(Error, Debug)]
pub enum Error {
    /// Settings or benchmark configuration could not be read
    #[error("Configuration error: {0}")]
    Config(String),

    /// A configuration document parsed but failed validation
    #[error("Invalid configuration {path}:\n{}", format_errors(.errors))]
    InvalidConfig { path: String, errors: Vec<String> },

    /// Validation errors on user input
    #[error("Validation error: {0}")]
    Validation(String),

    /// The persisted history document is malformed
    #[error("History error: {0}")]
    History(String),

    /// Harness output could not be turned into a measurement
    #[error("Measurement error: {0}")]
    Measurement(String),

    /// The history lock could not be acquired
    #[error("Lock error: {0}")]
    Lock(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] Box<std::io::Error>),

    /// JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] Box<serde_json::Error>),

    /// TOML errors
    #[error("TOML error: {0}")]
    Toml(#[from] Box<toml::de::Error>),
}

fn format_errors(errors: &[String]) -> String {
    errors
        .iter()
        .map(|e| format!("  - {e}"))
        .collect::<Vec<_>>()
        .join("\n")
}

impl Error {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create an invalid-configuration error carrying every validation message.
    pub fn invalid_config(path: impl Into<String>, errors: Vec<String>) -> Self {
        Self::InvalidConfig {
            path: path.into(),
            errors,
        }
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create a history error.
    pub fn history(message: impl Into<String>) -> Self {
        Self::History(message.into())
    }

    /// Create a measurement error.
    pub fn measurement(message: impl Into<String>) -> Self {
        Self::Measurement(message.into())
    }

    /// Create a lock error.
    pub fn lock(message: impl Into<String>) -> Self {
        Self::Lock(message.into())
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(Box::new(value))
    }
}

impl From<serde_json::Error> for Error {
    fn from(value: serde_json::Error) -> Self {
        Self::Json(Box::new(value))
    }
}

impl From<toml::de::Error> for Error {
    fn from(value: toml::de::Error) -> Self {
        Self::Toml(Box::new(value))
    }
}
