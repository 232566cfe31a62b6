//! Export coordinator for orchestrating streaming exports
//!
//! The coordinator pulls one batch from the row source, transcodes it and
//! hands the resulting fragment to the caller. It never fetches ahead: the
//! next batch is only requested when the transport asks for the next
//! fragment, so at most one batch and one fragment are alive at a time.

use bytes::Bytes;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::error::ExportError;

use super::progress::ProgressTracker;
use super::source::RowSource;
use super::transcoder::CsvTranscoder;

/// Lifecycle of one export job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportState {
    /// No fragment requested yet
    NotStarted,
    /// At least one fragment requested, source not exhausted
    Streaming,
    /// Source exhausted, every fragment produced
    Completed,
    /// Source or transcoder error; terminal
    Failed,
    /// Transport went away; terminal
    Cancelled,
}

impl ExportState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExportState::Completed | ExportState::Failed | ExportState::Cancelled
        )
    }
}

/// Result of an export operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportStats {
    /// Batches pulled from the source
    pub batches: u64,
    /// Data rows encoded
    pub rows: u64,
    /// Encoded bytes produced
    pub bytes: u64,
    /// Largest batch held at once
    pub peak_rows_in_flight: u64,
    /// Time taken so far
    pub elapsed_ms: u64,
    /// State when the stats were taken
    pub state: ExportState,
}

/// Coordinator for streaming export operations
pub struct ExportCoordinator<S: RowSource> {
    /// Row source for fetching batches
    source: S,
    /// Encoder producing fragments
    transcoder: CsvTranscoder,
    /// Progress tracker for feedback
    tracker: ProgressTracker,
    /// Cancellation token for aborting the export
    cancel_token: Option<CancellationToken>,
    state: ExportState,
    bytes: u64,
    peak_rows_in_flight: u64,
}

impl<S: RowSource> ExportCoordinator<S> {
    /// Create a new export coordinator
    pub fn new(source: S, tracker: ProgressTracker) -> Self {
        Self {
            source,
            transcoder: CsvTranscoder::new(),
            tracker,
            cancel_token: None,
            state: ExportState::NotStarted,
            bytes: 0,
            peak_rows_in_flight: 0,
        }
    }

    /// Set cancellation token for this export operation
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel_token = Some(token);
        self
    }

    pub fn state(&self) -> ExportState {
        self.state
    }

    /// Row source driven by this coordinator
    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn stats(&self) -> ExportStats {
        ExportStats {
            batches: self.tracker.batches(),
            rows: self.tracker.rows(),
            bytes: self.bytes,
            peak_rows_in_flight: self.peak_rows_in_flight,
            elapsed_ms: self.tracker.elapsed_ms(),
            state: self.state,
        }
    }

    /// Produce the next encoded fragment
    ///
    /// Suspends while the source fetches the next batch.
    ///
    /// # Returns
    /// * `Ok(Some(fragment))` - Next fragment, in production order
    /// * `Ok(None)` - Export completed; repeated calls keep returning `None`
    /// * `Err(TransportCancelled)` - The cancellation token fired
    /// * `Err(_)` - Source or transcoder failure; the export is now `Failed`
    pub async fn next_fragment(&mut self) -> Result<Option<Bytes>, ExportError> {
        match self.state {
            ExportState::Completed => return Ok(None),
            ExportState::Failed => return Err(ExportError::AlreadyFailed),
            ExportState::Cancelled => return Err(ExportError::TransportCancelled),
            ExportState::NotStarted => {
                info!("Starting export operation");
                self.state = ExportState::Streaming;
            }
            ExportState::Streaming => {}
        }

        let batch_no = self.tracker.batches() + 1;
        debug!("Fetching batch #{}", batch_no);

        let fetched = match self.cancel_token.clone() {
            Some(token) => tokio::select! {
                biased;
                _ = token.cancelled() => None,
                result = self.source.next_batch() => Some(result),
            },
            None => Some(self.source.next_batch().await),
        };

        let batch = match fetched {
            None => {
                self.cancel().await;
                return Err(ExportError::TransportCancelled);
            }
            Some(Ok(Some(batch))) => batch,
            Some(Ok(None)) => {
                self.complete().await?;
                return Ok(None);
            }
            Some(Err(e)) => return Err(self.fail(e).await),
        };

        let rows = batch.len() as u64;
        self.peak_rows_in_flight = self.peak_rows_in_flight.max(rows);

        let first = batch_no == 1;
        let fragment = match self.transcoder.encode(&batch, first) {
            Ok(fragment) => fragment,
            Err(e) => return Err(self.fail(e).await),
        };
        drop(batch);

        self.bytes += fragment.len() as u64;
        self.tracker.record_batch(rows);
        debug!(
            "Encoded batch #{}: {} rows, {} bytes",
            batch_no,
            rows,
            fragment.len()
        );

        if batch_no % 10 == 0 {
            info!(
                "Progress: {} rows exported ({} batches)",
                self.tracker.rows(),
                batch_no
            );
        }

        Ok(Some(fragment))
    }

    /// Stop the export because the transport went away
    ///
    /// Closes the source so no further batches are produced. Has no
    /// effect on an export that already reached a terminal state.
    pub async fn cancel(&mut self) {
        if self.state.is_terminal() {
            return;
        }
        self.state = ExportState::Cancelled;
        let _ = self.source.close().await;
        self.tracker.finish();
        info!(
            "Export cancelled by transport after {} rows ({} batches)",
            self.tracker.rows(),
            self.tracker.batches()
        );
    }

    async fn complete(&mut self) -> Result<(), ExportError> {
        self.state = ExportState::Completed;
        self.tracker.finish();
        self.source.close().await?;
        info!(
            "Export completed: {} rows, {} bytes, {} ms",
            self.tracker.rows(),
            self.bytes,
            self.tracker.elapsed_ms()
        );
        Ok(())
    }

    async fn fail(&mut self, err: ExportError) -> ExportError {
        self.state = ExportState::Failed;
        let _ = self.source.close().await;
        self.tracker.finish();
        error!(
            "Export failed after {} rows ({} batches): {}",
            self.tracker.rows(),
            self.tracker.batches(),
            err
        );
        err
    }
}
