//! Error handling for rowstream.
//!
//! This module provides:
//! - Pipeline error kinds (`ExportError`) with client/cancellation classification
//! - A top-level error (`RowstreamError`) and crate `Result` alias
//! - Structured JSON error bodies for responses sent before streaming begins

pub mod kinds;
pub mod response;

// Re-export commonly used types
pub use kinds::{ConfigError, ExportError, Result, RowstreamError};
pub use response::{ErrorInfo, ErrorResponse};
