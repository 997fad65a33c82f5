//! Error and Result types for the Graphite adapter.

use thiserror::Error;

/// A convenience `Result` type for adapter operations.
pub type Result<T> = std::result::Result<T, AdapterError>;

/// The error type for reads and writes against Graphite.
///
/// Validation variants are raised before any I/O happens and abort the
/// statement. `Transport` is raised by the query or ingestion endpoints and
/// is fatal to the current read or write.
#[derive(Debug, Error)]
pub enum AdapterError {
    /// The filter is not a single `name=` / `name~` constraint.
    #[error("filter expression must match: name=\"XXX\"/name~\"X.*\"")]
    InvalidFilter,

    /// A read option outside the recognized set was supplied.
    #[error("unknown read-graphite option {0}")]
    UnknownOption(String),

    /// Neither `-last` nor `-from`/`-to` was supplied.
    #[error("one of -from/-to or -last must be specified to define a query time range")]
    MissingTimeRange,

    /// `-last` was combined with `-from` or `-to`.
    #[error("-last option should not be combined with -from or -to")]
    ConflictingTimeRange,

    /// The resolved `from` is later than the resolved `to`.
    #[error("-from ({from}) must not be later than -to ({to})")]
    InvalidTimeRange { from: String, to: String },

    /// An option value could not be interpreted.
    #[error("invalid value for option {option}: {reason}")]
    InvalidOption { option: String, reason: String },

    /// Graphite could not be reached or answered with something unusable.
    #[error("graphite transport error: {0}")]
    Transport(String),

    /// Exporting read results failed.
    #[error("export failed: {0}")]
    Export(String),

    /// Adapter configuration is unusable.
    #[error("invalid graphite configuration: {0}")]
    Config(String),
}

impl AdapterError {
    /// Stable code reported alongside the message.
    pub fn code(&self) -> &'static str {
        match self {
            AdapterError::InvalidFilter => "RT-INVALID-FILTER",
            AdapterError::UnknownOption(_) => "RT-UNKNOWN-OPTION",
            AdapterError::MissingTimeRange => "MISSING-TIME-RANGE",
            AdapterError::ConflictingTimeRange => "RT-CONFLICTING-TIME-RANGE",
            AdapterError::InvalidTimeRange { .. } => "RT-INVALID-TIME-RANGE",
            AdapterError::InvalidOption { .. } => "RT-INVALID-OPTION",
            AdapterError::Transport(_) => "RT-TRANSPORT-ERROR",
            AdapterError::Export(_) => "RT-EXPORT-ERROR",
            AdapterError::Config(_) => "RT-CONFIG-ERROR",
        }
    }

    /// True for errors raised while checking a statement, before any I/O.
    pub fn is_validation(&self) -> bool {
        !matches!(
            self,
            AdapterError::Transport(_) | AdapterError::Export(_) | AdapterError::Config(_)
        )
    }

    pub(crate) fn invalid_option(option: impl Into<String>, reason: impl Into<String>) -> Self {
        AdapterError::InvalidOption {
            option: option.into(),
            reason: reason.into(),
        }
    }
}

impl From<reqwest::Error> for AdapterError {
    fn from(err: reqwest::Error) -> Self {
        AdapterError::Transport(err.to_string())
    }
}

impl From<std::io::Error> for AdapterError {
    fn from(err: std::io::Error) -> Self {
        AdapterError::Transport(err.to_string())
    }
}

impl From<serde_json::Error> for AdapterError {
    fn from(err: serde_json::Error) -> Self {
        AdapterError::Transport(format!("malformed response: {}", err))
    }
}
