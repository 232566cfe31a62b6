use std::io;

use thiserror::Error;

/// Crate-wide `Result` type using [`RowstreamError`] as the error.
///
/// This alias is re-exported by the parent `error` module and is intended
/// to be used throughout the crate for fallible operations.
pub type Result<T> = std::result::Result<T, RowstreamError>;

/// Top-level error type for rowstream operations.
///
/// Wraps the more specific error kinds so that the binary and the host
/// layer can deal with a single error type.
#[derive(Debug, Error)]
pub enum RowstreamError {
    /// Export pipeline errors.
    #[error("Export error: {0}")]
    Export(#[from] ExportError),

    /// Configuration errors.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// I/O errors outside of an export (binding a listener, reading config).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Errors raised by the streaming export pipeline.
#[derive(Debug, Error)]
pub enum ExportError {
    /// A request parameter is outside its accepted range or is not a number.
    ///
    /// Raised before streaming starts, so the caller can retry with
    /// corrected values.
    #[error("Invalid parameter '{field}': {reason}")]
    InvalidParameters { field: String, reason: String },

    /// The row source failed while producing a batch.
    #[error("Row source unavailable: {0}")]
    SourceUnavailable(String),

    /// The header could not be derived because the first batch was empty.
    #[error("Cannot derive header from an empty first batch")]
    EmptyBatch,

    /// A row's field set differs from the schema derived from the first row.
    #[error("Row {row} does not match export schema: expected [{expected}], found [{found}]")]
    SchemaMismatch {
        row: u64,
        expected: String,
        found: String,
    },

    /// Serializing a batch into the output format failed.
    #[error("Encoding failed: {0}")]
    Encoding(String),

    /// The client went away; production must stop.
    #[error("Transport cancelled by client")]
    TransportCancelled,

    /// Writing to the transport failed for a reason other than disconnection.
    #[error("Transport error: {0}")]
    Transport(#[source] io::Error),

    /// The coordinator was advanced after it had already failed.
    #[error("Export already failed")]
    AlreadyFailed,
}

/// Configuration-specific errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file not found.
    #[error("Config file not found: {0}")]
    FileNotFound(String),

    /// Invalid config format.
    #[error("Invalid config format: {0}")]
    InvalidFormat(String),

    /// Invalid field value.
    #[error("Invalid value '{value}' for field '{field}'")]
    InvalidValue { field: String, value: String },
}

impl ExportError {
    /// Build an `InvalidParameters` error for a value outside `[min, max]`.
    pub fn out_of_range(field: &str, value: u64, min: u64, max: u64) -> Self {
        ExportError::InvalidParameters {
            field: field.to_string(),
            reason: format!("{value} is outside the accepted range {min}..={max}"),
        }
    }

    /// Whether the error is the caller's fault and can be answered with a 4xx.
    pub fn is_client_error(&self) -> bool {
        matches!(self, ExportError::InvalidParameters { .. })
    }

    /// Whether the error only signals that the client stopped listening.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, ExportError::TransportCancelled)
    }

    /// Short machine-readable identifier used in JSON error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            ExportError::InvalidParameters { .. } => "export.invalid_parameters",
            ExportError::SourceUnavailable(_) => "export.source_unavailable",
            ExportError::EmptyBatch => "export.empty_batch",
            ExportError::SchemaMismatch { .. } => "export.schema_mismatch",
            ExportError::Encoding(_) => "export.encoding",
            ExportError::TransportCancelled => "export.transport_cancelled",
            ExportError::Transport(_) => "export.transport",
            ExportError::AlreadyFailed => "export.already_failed",
        }
    }
}

impl From<csv::Error> for ExportError {
    fn from(err: csv::Error) -> Self {
        ExportError::Encoding(err.to_string())
    }
}
