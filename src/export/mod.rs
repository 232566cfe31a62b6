//! Streaming export pipeline
//!
//! This module streams a large tabular dataset as CSV without holding the
//! whole result set in memory:
//!
//! 1. **RowSource**: pulls rows in fixed-size batches (paginated cursor)
//! 2. **CsvTranscoder**: encodes one batch into one fragment, header first
//! 3. **ExportCoordinator**: pulls a batch only when the transport asks for
//!    the next fragment, so backpressure reaches the source
//!
//! The transport side lives in [`crate::transport`].
//!
//! # Example
//!
//! ```no_run
//! use rowstream::export::{
//!     ExportCoordinator, ExportParams, ProgressTracker, SimulatedRowSource, SystemClock,
//! };
//!
//! use rand::SeedableRng;
//! use rand::rngs::StdRng;
//!
//! # async fn run() -> Result<(), rowstream::error::ExportError> {
//! let params = ExportParams::unchecked(10, 25)?;
//! let source = SimulatedRowSource::new(params, StdRng::from_os_rng(), SystemClock);
//! let mut coordinator = ExportCoordinator::new(source, ProgressTracker::new(None, false));
//!
//! while let Some(fragment) = coordinator.next_fragment().await? {
//!     print!("{}", String::from_utf8_lossy(&fragment));
//! }
//! # Ok(())
//! # }
//! ```

pub mod coordinator;
pub mod params;
pub mod progress;
pub mod row;
pub mod source;
pub mod transcoder;

pub use coordinator::{ExportCoordinator, ExportState, ExportStats};
pub use params::{ExportLimits, ExportParams, JobIdentity};
pub use progress::ProgressTracker;
pub use row::{Batch, FieldValue, Record, Row, Schema};
pub use source::{Clock, FixedClock, RowSource, SimulatedRowSource, SystemClock};
pub use transcoder::{CSV_CONTENT_TYPE, CsvTranscoder};
