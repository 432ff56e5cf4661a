//! Custom error types for the application.
//!
//! This module defines the primary error type, `DaqError`, for the whole crate.
//! Using the `thiserror` crate, it provides a centralized and consistent way to handle
//! the different kinds of failure that can occur, from configuration issues to
//! transport problems and command conflicts.
//!
//! ## Error Hierarchy
//!
//! - **`Config`**: Wraps errors from `figment`, typically file parsing or type mismatches
//!   while extracting [`crate::config::Settings`].
//! - **`Configuration`**: Semantic errors that pass parsing but are logically invalid
//!   (an even Hampel window, an EMA alpha of zero, ...). Caught by `Settings::validate`.
//! - **`Parse`**: A malformed device line or record. These never escape an ingest source;
//!   they are logged and the sample is skipped.
//! - **`Serial`** / **`Io`**: Transport failures. The live source retries these forever.
//! - **`ReplayFileNotFound`**: Startup configuration error for the replay source, reported
//!   once and never retried.
//! - **`SourceConflict`**: A start request while another ingest source is active.
//!
//! By using `#[from]`, `DaqError` can be created from underlying error types,
//! simplifying error handling with the `?` operator.

use std::path::PathBuf;
use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, DaqError>;

/// Reason a single device line or record could not be turned into readings.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    /// The line looked like JSON but did not decode to an object.
    #[error("invalid JSON record: {0}")]
    Json(String),

    /// A bracketed line with fewer than three bracket groups.
    #[error("bracketed line has {found} fields, expected 3")]
    BracketFields {
        /// Number of bracket groups found.
        found: usize,
    },

    /// A field was present but its value is not numeric.
    #[error("field '{field}' is not numeric: {value}")]
    NotNumeric {
        /// Field name as it appeared on the wire.
        field: String,
        /// Offending raw value.
        value: String,
    },
}

/// The crate-wide error type.
#[derive(Error, Debug)]
pub enum DaqError {
    /// Configuration could not be loaded or deserialized.
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// Configuration loaded but failed validation, or a bad runtime argument.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// Filesystem or socket failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A device line or record was malformed.
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    /// Opening or reading the serial port failed.
    #[error("Serial transport error: {0}")]
    Serial(String),

    /// A live source was requested in a build without serial support.
    #[error("Serial support not enabled. Rebuild with --features instrument_serial")]
    SerialFeatureDisabled,

    /// The replay path does not exist.
    #[error("Replay file not found: {}", .0.display())]
    ReplayFileNotFound(PathBuf),

    /// Reading a recording or writing history failed at the CSV layer.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Encoding or decoding a subscriber message failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The history sink could not prepare its output.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Only one source may run at a time.
    #[error("Cannot start {requested} source while {active} source is running")]
    SourceConflict {
        /// Kind of source the caller tried to start.
        requested: &'static str,
        /// Kind of source already running.
        active: &'static str,
    },

    /// Stop was requested for a source kind that is not running.
    #[error("No {0} source is running")]
    NotRunning(&'static str),

    /// A source task outlived the stop grace period and was aborted.
    #[error("Source did not stop within {0:?}")]
    StopTimeout(std::time::Duration),

    /// A subscriber connection is closed or its send failed.
    #[error("Subscriber disconnected")]
    SubscriberDisconnected,
}

impl From<figment::Error> for DaqError {
    fn from(value: figment::Error) -> Self {
        DaqError::Config(Box::new(value))
    }
}

impl DaqError {
    /// Whether the failing operation may succeed if simply retried later.
    ///
    /// Transport errors are recoverable; configuration and conflict errors are not.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            DaqError::Io(_) | DaqError::Serial(_) | DaqError::SubscriberDisconnected
        )
    }
}
