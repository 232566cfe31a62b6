//! Progress tracking for export operations
//!
//! Keeps row and batch counters for an export and optionally drives an
//! `indicatif` progress bar for interactive (file) exports.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use indicatif::{ProgressBar, ProgressStyle};
use tracing::warn;

/// Progress tracker for export operations
pub struct ProgressTracker {
    /// Rows handed to the transport so far
    rows: AtomicU64,
    /// Batches handed to the transport so far
    batches: AtomicU64,
    /// Start time of the operation
    start_time: Instant,
    /// Progress bar (optional, disabled for HTTP exports)
    bar: Option<ProgressBar>,
}

impl ProgressTracker {
    /// Create a new progress tracker
    ///
    /// # Arguments
    /// * `total` - Total number of rows if known
    /// * `enable_bar` - Whether to display a progress bar
    pub fn new(total: Option<u64>, enable_bar: bool) -> Self {
        let bar = enable_bar.then(|| Self::make_bar(total));

        Self {
            rows: AtomicU64::new(0),
            batches: AtomicU64::new(0),
            start_time: Instant::now(),
            bar,
        }
    }

    fn make_bar(total: Option<u64>) -> ProgressBar {
        let (bar, template) = match total {
            Some(n) => (
                ProgressBar::new(n),
                "{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} rows {msg}",
            ),
            None => (ProgressBar::new_spinner(), "{spinner:.green} {pos} rows {msg}"),
        };

        match ProgressStyle::default_bar().template(template) {
            Ok(style) => bar.set_style(style.progress_chars("#>-")),
            Err(e) => warn!("Invalid progress template: {}", e),
        }
        bar
    }

    /// Record one more batch of `rows` rows
    pub fn record_batch(&self, rows: u64) {
        let total = self.rows.fetch_add(rows, Ordering::Relaxed) + rows;
        self.batches.fetch_add(1, Ordering::Relaxed);

        if let Some(ref bar) = self.bar {
            bar.set_position(total);

            let elapsed = self.start_time.elapsed().as_secs_f64();
            if elapsed > 0.0 {
                bar.set_message(format!("({:.0} rows/sec)", total as f64 / elapsed));
            }
        }
    }

    /// Rows recorded so far
    pub fn rows(&self) -> u64 {
        self.rows.load(Ordering::Relaxed)
    }

    /// Batches recorded so far
    pub fn batches(&self) -> u64 {
        self.batches.load(Ordering::Relaxed)
    }

    /// Milliseconds since the tracker was created
    pub fn elapsed_ms(&self) -> u64 {
        self.start_time.elapsed().as_millis() as u64
    }

    /// Finish and clear the progress bar
    pub fn finish(&self) {
        if let Some(ref bar) = self.bar {
            bar.finish_and_clear();
        }
    }
}
