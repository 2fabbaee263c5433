//! ==============================================================================
//! error.rs - typed errors for parsing, persistence and the read api
//! ==============================================================================
//!
//! relationships:
//!     - ParseError: produced by protocol.rs, echoed back to devices in acks
//!     - StoreError: produced by store.rs, turned into "save failed" acks
//!     - ApiError:   produced by stats.rs, mapped to http status in api.rs
//!
//! ==============================================================================

use thiserror::Error;

/// why a payload could not be decoded into a (temperature, humidity) pair
///
/// the display text is what the device sees inside
/// `Error: Invalid data format (<reason>)`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("JSON message missing valid 'temperature' or 'humidity' values.")]
    InvalidPayload,

    #[error("'!'-separated message does not have exactly two parts (temperature!humidity).")]
    MalformedSeparatedMessage,

    #[error("'!'-separated message contains non-numeric values.")]
    NonNumericValue,

    #[error("Unrecognized message format. Expected 'temperature!humidity' or JSON.")]
    UnrecognizedFormat,
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("store i/o failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("timestamp {0} cannot be stored")]
    TimestampOutOfRange(chrono::DateTime<chrono::Utc>),

    #[error("store lock poisoned")]
    Poisoned,
}

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Database not connected")]
    StoreUnavailable,

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("internal error: {0}")]
    Internal(String),
}
