use std::io;
use thiserror::Error;

/// The primary error type for the `plc-logger` library.
#[derive(Error, Debug)]
pub enum LoggerError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Failed to parse configuration: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Controller connection failed: {0}")]
    Connection(String),

    #[error("Timeout waiting for controller: {0}")]
    Timeout(#[from] tokio::time::error::Elapsed),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Read of tag '{tag}' failed: {status}")]
    TagRead { tag: String, status: String },

    #[error("Unknown trigger type '{0}'")]
    UnknownMode(String),

    #[error("Unknown compare condition '{0}'")]
    UnknownOperator(String),
}

impl LoggerError {
    pub fn tag_read(tag: impl Into<String>, status: impl Into<String>) -> Self {
        LoggerError::TagRead {
            tag: tag.into(),
            status: status.into(),
        }
    }

    /// User-facing error category, printed alongside the message on exit.
    pub fn kind(&self) -> &'static str {
        match self {
            LoggerError::Config(_) | LoggerError::Json(_) => "ConfigError",
            LoggerError::Connection(_) | LoggerError::Timeout(_) | LoggerError::Protocol(_) => {
                "ConnectionError"
            }
            LoggerError::TagRead { .. } => "TagReadError",
            LoggerError::UnknownMode(_) => "UnknownModeError",
            LoggerError::UnknownOperator(_) => "UnknownOperatorError",
            LoggerError::Io(_) | LoggerError::Csv(_) => "OutputError",
        }
    }
}
