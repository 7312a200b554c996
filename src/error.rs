//! Error types for the rebalancing engine.
//!
//! Only structural problems at the boundary surface as errors. Market-data
//! gaps, infeasible weight bands and short histories are recovered inside
//! the engine and never reach this type.

use thiserror::Error;

/// Main error type for the rebalancing engine.
#[derive(Error, Debug)]
pub enum LeverError {
    #[error("Data error: {0}")]
    DataError(String),

    #[error("CSV parsing error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Date parsing error: {0}")]
    DateParseError(#[from] chrono::ParseError),

    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    #[error("No data loaded")]
    NoData,

    #[error("JSON serialization error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, LeverError>;
