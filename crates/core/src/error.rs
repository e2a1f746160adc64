// crates/core/src/error.rs
use thiserror::Error;

/// Errors produced while validating a job configuration at creation time.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("collection jobs require at least one source")]
    MissingSources,

    #[error("collection jobs support at most 2 sources, got {0}")]
    TooManySources(usize),

    #[error("source '{source_name}' is missing required field '{field}'")]
    MissingField { source_name: String, field: &'static str },

    #[error("invalid date '{value}' for '{field}' (expected YYYY-MM-DD)")]
    InvalidDate { field: &'static str, value: String },

    #[error("invalid config payload: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Errors produced while parsing a 5-field cron expression.
#[derive(Debug, Error)]
pub enum CronError {
    #[error("cron expression must have 5 fields (minute hour day month weekday), got {0}")]
    FieldCount(usize),

    #[error("invalid {field} field: '{value}'")]
    InvalidField { field: &'static str, value: String },

    #[error("{field} value {value} out of range {min}..={max}")]
    OutOfRange {
        field: &'static str,
        value: u32,
        min: u32,
        max: u32,
    },
}
