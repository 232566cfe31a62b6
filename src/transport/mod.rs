//! Transports for export fragments
//!
//! A [`FragmentSink`] receives the fragments of one export in order. Each
//! `send` resolves only once the sink is ready for more, which is what
//! throttles the coordinator and, through it, the row source.

use std::io;

use async_trait::async_trait;
use bytes::Bytes;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::ExportError;
use crate::export::{ExportCoordinator, ExportStats, JobIdentity, RowSource};

pub mod file;
pub mod http;

pub use file::FileSink;
pub use http::{HttpResponseSink, write_error_response};

/// Metadata that must reach the client before the first fragment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseMetadata {
    pub content_type: String,
    pub filename: String,
    /// Number of data rows the complete document will hold
    pub expected_rows: Option<u64>,
}

impl ResponseMetadata {
    pub fn new(content_type: &str, job: &JobIdentity) -> Self {
        Self {
            content_type: content_type.to_string(),
            filename: job.filename().to_string(),
            expected_rows: None,
        }
    }

    pub fn with_expected_rows(mut self, rows: u64) -> Self {
        self.expected_rows = Some(rows);
        self
    }

    /// Value of the `Content-Disposition` header
    pub fn disposition(&self) -> String {
        format!("attachment; filename={}", self.filename)
    }
}

/// Trait for writing export fragments to a destination
#[async_trait]
pub trait FragmentSink: Send {
    /// Emit response metadata; called once before any fragment
    async fn begin(&mut self, meta: &ResponseMetadata) -> io::Result<()>;

    /// Write one fragment, resolving once the sink can take the next one
    async fn send(&mut self, fragment: Bytes) -> io::Result<()>;

    /// Mark the document as complete
    async fn finish(&mut self) -> io::Result<()>;

    /// Stop without marking the document as complete
    async fn abort(&mut self);
}

/// Whether an I/O error means the peer went away
pub fn is_disconnect(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
            | io::ErrorKind::UnexpectedEof
            | io::ErrorKind::WriteZero
    )
}

fn transport_error(err: io::Error) -> ExportError {
    if is_disconnect(&err) {
        ExportError::TransportCancelled
    } else {
        ExportError::Transport(err)
    }
}

/// Drive an export into a sink until the source is exhausted
///
/// Fragments are pulled one at a time and the next one is only requested
/// after the sink accepted the previous one. A failed write cancels
/// `cancel` and closes the source so nothing more is produced.
///
/// # Returns
/// * `Ok(ExportStats)` - Export completed and the sink was finished
/// * `Err(TransportCancelled)` - The client went away; already-sent data stands
/// * `Err(_)` - Pipeline or transport failure; the sink was aborted
pub async fn stream_export<S, K>(
    coordinator: &mut ExportCoordinator<S>,
    sink: &mut K,
    meta: &ResponseMetadata,
    cancel: &CancellationToken,
) -> Result<ExportStats, ExportError>
where
    S: RowSource,
    K: FragmentSink + ?Sized,
{
    if let Err(e) = sink.begin(meta).await {
        cancel.cancel();
        coordinator.cancel().await;
        return Err(transport_error(e));
    }

    loop {
        match coordinator.next_fragment().await {
            Ok(Some(fragment)) => {
                if let Err(e) = sink.send(fragment).await {
                    debug!("Fragment write failed: {}", e);
                    cancel.cancel();
                    coordinator.cancel().await;
                    sink.abort().await;
                    return Err(transport_error(e));
                }
            }
            Ok(None) => {
                sink.finish().await.map_err(transport_error)?;
                return Ok(coordinator.stats());
            }
            Err(e) => {
                if !e.is_cancellation() {
                    warn!("Aborting transport after export error: {}", e);
                }
                sink.abort().await;
                return Err(e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::{
        CSV_CONTENT_TYPE, ExportParams, ExportState, FixedClock, ProgressTracker,
        SimulatedRowSource,
    };
    use chrono::{TimeZone, Utc};
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    // Sink recording fragments, failing or cancelling after a number of sends
    struct RecordingSink {
        fragments: Vec<Bytes>,
        began: bool,
        finished: bool,
        aborted: bool,
        fail_after: Option<usize>,
        cancel_after: Option<(usize, CancellationToken)>,
    }

    impl RecordingSink {
        fn new() -> Self {
            Self {
                fragments: Vec::new(),
                began: false,
                finished: false,
                aborted: false,
                fail_after: None,
                cancel_after: None,
            }
        }
    }

    #[async_trait]
    impl FragmentSink for RecordingSink {
        async fn begin(&mut self, _meta: &ResponseMetadata) -> io::Result<()> {
            self.began = true;
            Ok(())
        }

        async fn send(&mut self, fragment: Bytes) -> io::Result<()> {
            if self.fail_after.is_some_and(|n| self.fragments.len() >= n) {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "client gone"));
            }
            self.fragments.push(fragment);
            if let Some((n, token)) = &self.cancel_after {
                if self.fragments.len() >= *n {
                    token.cancel();
                }
            }
            Ok(())
        }

        async fn finish(&mut self) -> io::Result<()> {
            self.finished = true;
            Ok(())
        }

        async fn abort(&mut self) {
            self.aborted = true;
        }
    }

    fn coordinator(
        chunk: u64,
        total: u64,
        token: &CancellationToken,
    ) -> ExportCoordinator<SimulatedRowSource<StdRng, FixedClock>> {
        let params = ExportParams::unchecked(chunk, total).unwrap();
        let clock = FixedClock(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        let source = SimulatedRowSource::new(params, StdRng::seed_from_u64(5), clock);
        ExportCoordinator::new(source, ProgressTracker::new(Some(total), false))
            .with_cancellation(token.clone())
    }

    fn meta() -> ResponseMetadata {
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        ResponseMetadata::new(CSV_CONTENT_TYPE, &JobIdentity::from_timestamp("report", at))
    }

    #[test]
    fn test_disposition_header() {
        assert_eq!(
            meta().disposition(),
            "attachment; filename=report_20240101000000.csv"
        );
    }

    #[tokio::test]
    async fn test_stream_to_completion() {
        let token = CancellationToken::new();
        let mut coord = coordinator(10, 25, &token);
        let mut sink = RecordingSink::new();

        let stats = stream_export(&mut coord, &mut sink, &meta(), &token)
            .await
            .unwrap();

        assert!(sink.began && sink.finished && !sink.aborted);
        assert_eq!(sink.fragments.len(), 3);
        assert_eq!(stats.rows, 25);
        assert_eq!(stats.state, ExportState::Completed);
        assert!(!token.is_cancelled());
    }

    #[tokio::test]
    async fn test_chunk_equal_to_total_is_one_fragment() {
        let token = CancellationToken::new();
        let mut coord = coordinator(40, 40, &token);
        let mut sink = RecordingSink::new();

        stream_export(&mut coord, &mut sink, &meta(), &token)
            .await
            .unwrap();

        assert_eq!(sink.fragments.len(), 1);
        let text = std::str::from_utf8(&sink.fragments[0]).unwrap();
        assert_eq!(text.lines().count(), 41);
    }

    #[tokio::test]
    async fn test_disconnect_after_two_batches_stops_source() {
        let token = CancellationToken::new();
        let mut coord = coordinator(10, 100, &token);
        let mut sink = RecordingSink::new();
        sink.cancel_after = Some((2, token.clone()));

        let err = stream_export(&mut coord, &mut sink, &meta(), &token)
            .await
            .unwrap_err();

        assert!(err.is_cancellation());
        assert_eq!(sink.fragments.len(), 2);
        assert!(sink.aborted && !sink.finished);
        assert_eq!(coord.source().produced(), 20);
        assert_eq!(coord.state(), ExportState::Cancelled);
    }

    #[tokio::test]
    async fn test_failed_write_cancels_export() {
        let token = CancellationToken::new();
        let mut coord = coordinator(10, 100, &token);
        let mut sink = RecordingSink::new();
        sink.fail_after = Some(2);

        let err = stream_export(&mut coord, &mut sink, &meta(), &token)
            .await
            .unwrap_err();

        assert!(err.is_cancellation());
        assert!(token.is_cancelled());
        assert_eq!(sink.fragments.len(), 2);
        assert_eq!(coord.state(), ExportState::Cancelled);
        assert!(coord.source().produced() <= 30);
    }

    #[tokio::test]
    async fn test_source_failure_aborts_sink() {
        let token = CancellationToken::new();
        let params = ExportParams::unchecked(10, 100).unwrap();
        let clock = FixedClock(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        let source = SimulatedRowSource::new(params, StdRng::seed_from_u64(5), clock)
            .with_fault_after(3);
        let mut coord = ExportCoordinator::new(source, ProgressTracker::new(None, false));
        let mut sink = RecordingSink::new();

        let err = stream_export(&mut coord, &mut sink, &meta(), &token)
            .await
            .unwrap_err();

        assert!(matches!(err, ExportError::SourceUnavailable(_)));
        assert_eq!(sink.fragments.len(), 3);
        assert!(sink.aborted && !sink.finished);
        assert_eq!(coord.state(), ExportState::Failed);
    }

    #[test]
    fn test_disconnect_classification() {
        assert!(is_disconnect(&io::Error::from(io::ErrorKind::BrokenPipe)));
        assert!(is_disconnect(&io::Error::from(io::ErrorKind::ConnectionReset)));
        assert!(!is_disconnect(&io::Error::from(io::ErrorKind::PermissionDenied)));
    }
}
