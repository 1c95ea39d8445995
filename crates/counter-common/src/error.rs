//! Error types shared across the workspace

use thiserror::Error;

/// Result type alias for edge operations (config, input files)
pub type Result<T> = std::result::Result<T, CounterError>;

/// Errors raised outside the ingestion pipeline proper
#[derive(Error, Debug)]
pub enum CounterError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid date `{value}`: expected {expected}")]
    InvalidDate { value: String, expected: &'static str },

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl CounterError {
    pub fn config(message: impl Into<String>) -> Self {
        CounterError::Config(message.into())
    }
}

/// Parse a `YYYY-MM-DD` date supplied on the command line or in configuration
pub fn parse_iso_date(value: &str) -> Result<chrono::NaiveDate> {
    chrono::NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d").map_err(|_| {
        CounterError::InvalidDate {
            value: value.to_string(),
            expected: "YYYY-MM-DD",
        }
    })
}
