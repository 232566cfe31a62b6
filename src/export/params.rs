//! Export job parameters and job identity

use chrono::{DateTime, Utc};

use crate::config::ExportConfig;
use crate::error::ExportError;

/// Accepted ranges for export parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportLimits {
    pub min_chunk_size: u64,
    pub max_chunk_size: u64,
    pub min_total_rows: u64,
    pub max_total_rows: u64,
}

impl Default for ExportLimits {
    fn default() -> Self {
        Self::from(&ExportConfig::default())
    }
}

impl From<&ExportConfig> for ExportLimits {
    fn from(config: &ExportConfig) -> Self {
        Self {
            min_chunk_size: config.min_chunk_size,
            max_chunk_size: config.max_chunk_size,
            min_total_rows: config.min_total_rows,
            max_total_rows: config.max_total_rows,
        }
    }
}

/// Immutable parameters of one export job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportParams {
    chunk_size: u64,
    total_rows: u64,
}

impl ExportParams {
    /// Validate and build parameters
    ///
    /// # Arguments
    /// * `chunk_size` - Rows per batch
    /// * `total_rows` - Rows to export
    /// * `limits` - Accepted ranges
    ///
    /// # Returns
    /// * `Result<Self, ExportError>` - Parameters, or `InvalidParameters`
    ///   naming the first offending field
    pub fn new(chunk_size: u64, total_rows: u64, limits: &ExportLimits) -> Result<Self, ExportError> {
        if !(limits.min_chunk_size..=limits.max_chunk_size).contains(&chunk_size) {
            return Err(ExportError::out_of_range(
                "chunk_size",
                chunk_size,
                limits.min_chunk_size,
                limits.max_chunk_size,
            ));
        }
        if !(limits.min_total_rows..=limits.max_total_rows).contains(&total_rows) {
            return Err(ExportError::out_of_range(
                "total_rows",
                total_rows,
                limits.min_total_rows,
                limits.max_total_rows,
            ));
        }
        Ok(Self {
            chunk_size,
            total_rows,
        })
    }

    /// Build parameters without range checks beyond positivity
    ///
    /// Used by callers that own their own limits, such as tests and
    /// embedding applications.
    pub fn unchecked(chunk_size: u64, total_rows: u64) -> Result<Self, ExportError> {
        if chunk_size == 0 {
            return Err(ExportError::out_of_range("chunk_size", 0, 1, u64::MAX));
        }
        if total_rows == 0 {
            return Err(ExportError::out_of_range("total_rows", 0, 1, u64::MAX));
        }
        Ok(Self {
            chunk_size,
            total_rows,
        })
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    pub fn total_rows(&self) -> u64 {
        self.total_rows
    }

    /// Number of batches the job will produce
    pub fn batch_count(&self) -> u64 {
        self.total_rows.div_ceil(self.chunk_size)
    }
}

/// Filename of one export, derived from its generation time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobIdentity {
    filename: String,
}

impl JobIdentity {
    /// Build `<prefix>_<YYYYMMDDHHMMSS>.csv` from a UTC timestamp
    pub fn from_timestamp(prefix: &str, at: DateTime<Utc>) -> Self {
        Self {
            filename: format!("{}_{}.csv", prefix, at.format("%Y%m%d%H%M%S")),
        }
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }
}
