use crate::date::BatchDate;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TriggerError {
    #[error("invalid date {value:?}: expected YYYYMMDD")]
    InvalidDate { value: String },

    #[error("invalid date range: start {start} must be before or equal to end {end}")]
    InvalidDateRange { start: BatchDate, end: BatchDate },

    #[error("invalid state record: {0}")]
    InvalidState(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("state encoding error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}
