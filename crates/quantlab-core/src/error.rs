//! Error types for QuantLab.

use thiserror::Error;

/// Core error type for QuantLab operations.
#[derive(Error, Debug)]
pub enum QuantError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Data error: {0}")]
    Data(String),

    #[error("Invalid order: {0}")]
    Order(String),

    #[error("Portfolio error: {0}")]
    Portfolio(String),

    #[error("Strategy error: {0}")]
    Strategy(String),

    #[error("Risk analytics error: {0}")]
    Risk(String),

    /// Unrecoverable invariant violation. Aborts the run.
    #[error("Critical invariant violation: {0}")]
    Critical(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Result type alias for QuantLab operations.
pub type Result<T> = std::result::Result<T, QuantError>;
