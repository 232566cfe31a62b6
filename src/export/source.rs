//! Row sources for export operations
//!
//! This module provides a unified interface for pulling rows in batches
//! without loading the whole result set into memory, plus a simulated
//! source standing in for a paginated database cursor.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::Rng;
use tracing::{debug, info};

use crate::error::ExportError;

use super::params::ExportParams;
use super::row::{Batch, Record, Row};

/// Trait for pulling rows in batches
///
/// Implementations are single-use: once `next_batch` returns `None` (or
/// an error) the source is exhausted and a new instance is needed.
#[async_trait]
pub trait RowSource: Send {
    /// Row type produced by this source
    type Row: Record + Send;

    /// Fetch the next batch of rows
    ///
    /// # Returns
    /// * `Result<Option<Batch>>` - Next batch, or None if exhausted
    async fn next_batch(&mut self) -> Result<Option<Batch<Self::Row>>, ExportError>;

    /// Close the source and release resources
    async fn close(&mut self) -> Result<(), ExportError>;
}

/// Source of the current time for generated rows
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock frozen at a given instant
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

/// Naive ISO-8601 with microseconds, e.g. `2024-01-02T03:04:05.000006`
const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f";

/// Simulated paginated row source
///
/// Produces `total_rows` report rows in batches of `chunk_size`, sleeping
/// once per batch to stand in for a database round trip.
pub struct SimulatedRowSource<G, C> {
    params: ExportParams,
    rng: G,
    clock: C,
    latency: Duration,
    max_value: i64,
    fault_after: Option<u64>,
    produced: u64,
    batches: u64,
    closed: bool,
}

impl<G, C> SimulatedRowSource<G, C>
where
    G: Rng + Send,
    C: Clock,
{
    /// Create a new simulated source
    ///
    /// # Arguments
    /// * `params` - Validated job parameters
    /// * `rng` - Generator for the `value` column
    /// * `clock` - Source of row timestamps
    pub fn new(params: ExportParams, rng: G, clock: C) -> Self {
        Self {
            params,
            rng,
            clock,
            latency: Duration::ZERO,
            max_value: 10_000,
            fault_after: None,
            produced: 0,
            batches: 0,
            closed: false,
        }
    }

    /// Sleep this long before producing each batch
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Upper bound (inclusive) of the `value` column
    pub fn with_max_value(mut self, max_value: i64) -> Self {
        self.max_value = max_value.max(0);
        self
    }

    /// Fail with `SourceUnavailable` once `batches` batches were served
    pub fn with_fault_after(mut self, batches: u64) -> Self {
        self.fault_after = Some(batches);
        self
    }

    /// Rows handed out so far
    pub fn produced(&self) -> u64 {
        self.produced
    }

    fn make_row(&mut self, id: u64) -> Row {
        Row {
            id,
            name: format!("Item {id}"),
            value: self.rng.random_range(0..=self.max_value),
            timestamp: self.clock.now().format(TIMESTAMP_FORMAT).to_string(),
        }
    }
}

#[async_trait]
impl<G, C> RowSource for SimulatedRowSource<G, C>
where
    G: Rng + Send,
    C: Clock,
{
    type Row = Row;

    async fn next_batch(&mut self) -> Result<Option<Batch<Row>>, ExportError> {
        if self.closed {
            return Ok(None);
        }

        let remaining = self.params.total_rows() - self.produced;
        if remaining == 0 {
            debug!(
                "Row source exhausted after {} rows in {} batches",
                self.produced, self.batches
            );
            self.closed = true;
            return Ok(None);
        }

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        if self.fault_after.is_some_and(|n| self.batches >= n) {
            self.closed = true;
            return Err(ExportError::SourceUnavailable(format!(
                "simulated outage before batch {}",
                self.batches + 1
            )));
        }

        let len = remaining.min(self.params.chunk_size());
        let start = self.produced + 1;
        let mut batch = Vec::with_capacity(len as usize);
        for id in start..start + len {
            batch.push(self.make_row(id));
        }

        self.produced += len;
        self.batches += 1;
        debug!(
            "Produced batch #{} of {} rows (total: {})",
            self.batches, len, self.produced
        );

        Ok(Some(batch))
    }

    async fn close(&mut self) -> Result<(), ExportError> {
        if !self.closed {
            self.closed = true;
            info!("Closed row source after producing {} rows", self.produced);
        }
        Ok(())
    }
}
