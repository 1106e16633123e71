//! Incremental feed replication between two databases
//!
//! [`BatchReplicator`] copies feed rows from the source database to the
//! destination in `entry_id` order, one bounded batch per call, tracking a
//! cursor (the last replicated `entry_id`).
//!
//! # Delivery
//!
//! At-least-once. All inserts of a batch run concurrently and the cursor
//! only moves once every one of them succeeded. If any insert fails the call
//! fails, the cursor stays put, and the next call re-reads the same range, so
//! rows inserted before the failure are inserted again. The destination must
//! tolerate (or later remove) those duplicates.
//!
//! # Cursor
//!
//! Kept in memory. At startup it is either given explicitly or recomputed
//! from `MAX(entry_id)` on the destination ([`BatchReplicator::resume`]).

use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::Mutex;

use crate::config::SyncConfig;
use crate::error::Result;
use crate::metrics;
use crate::models::{FeedRow, SyncLogEntry, SyncReport};
use crate::storage::{FeedSink, FeedSource};

/// Replicates feed rows past a cursor
pub struct BatchReplicator {
    source: Arc<dyn FeedSource>,
    sink: Arc<dyn FeedSink>,
    batch_size: usize,

    /// Last replicated `entry_id`; held for the whole of a sync call
    cursor: Mutex<i64>,
}

impl BatchReplicator {
    /// Create a replicator whose cursor starts at `start_after`
    pub fn new(
        source: Arc<dyn FeedSource>,
        sink: Arc<dyn FeedSink>,
        batch_size: usize,
        start_after: i64,
    ) -> Self {
        Self {
            source,
            sink,
            batch_size: batch_size.max(1),
            cursor: Mutex::new(start_after),
        }
    }

    /// Create a replicator whose cursor is the highest `entry_id` already
    /// in the destination (or `start_after` if that is higher)
    pub async fn resume(
        source: Arc<dyn FeedSource>,
        sink: Arc<dyn FeedSink>,
        batch_size: usize,
        start_after: i64,
    ) -> Result<Self> {
        let max_id = sink.max_entry_id().await?;
        let cursor = max_id.unwrap_or(start_after).max(start_after);
        tracing::info!(cursor, destination_max = ?max_id, "Resuming replication");
        Ok(Self::new(source, sink, batch_size, cursor))
    }

    /// Build from configuration, resuming from the destination if configured
    pub async fn from_config(
        source: Arc<dyn FeedSource>,
        sink: Arc<dyn FeedSink>,
        config: &SyncConfig,
    ) -> Result<Self> {
        if config.resume_from_destination {
            Self::resume(source, sink, config.batch_size, config.start_after).await
        } else {
            Ok(Self::new(source, sink, config.batch_size, config.start_after))
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Current cursor
    pub async fn cursor(&self) -> i64 {
        *self.cursor.lock().await
    }

    /// Replicate the next batch
    ///
    /// Returns `{processed: 0, last_id: cursor}` when there is nothing new.
    pub async fn sync_databases(&self) -> Result<SyncReport> {
        let mut cursor = self.cursor.lock().await;

        let records = self.source.fetch_after(*cursor, self.batch_size).await?;
        let Some(last) = records.last() else {
            tracing::debug!(cursor = *cursor, "No new feed entries");
            return Ok(SyncReport {
                processed: 0,
                last_id: *cursor,
            });
        };
        let last_id = last.entry_id;

        let rows = records
            .iter()
            .map(FeedRow::try_from)
            .collect::<Result<Vec<_>>>()
            .inspect_err(|_| metrics::record_sync_failure())?;

        tracing::debug!(
            from = rows[0].entry_id,
            to = last_id,
            count = rows.len(),
            "Replicating batch"
        );

        let results = join_all(rows.iter().map(|row| self.sink.insert_feed(row))).await;
        let mut errors = results.into_iter().filter_map(|r| r.err());
        if let Some(first) = errors.next() {
            let failed = 1 + errors.count();
            metrics::record_sync_failure();
            tracing::warn!(
                cursor = *cursor,
                failed,
                batch = rows.len(),
                error = %first,
                "Batch insert failed, cursor not advanced"
            );
            return Err(first);
        }

        *cursor = last_id.max(*cursor);
        let report = SyncReport {
            processed: rows.len(),
            last_id: *cursor,
        };
        metrics::record_sync_batch(report.processed, report.last_id);

        let entry = SyncLogEntry::new(report);
        tracing::info!(processed = report.processed, last_id = report.last_id, "{}", entry.message);
        if let Err(e) = self.sink.append_sync_log(&entry).await {
            tracing::warn!(error = %e, "Failed to write sync log entry");
        }

        Ok(report)
    }

    /// Call [`sync_databases`](Self::sync_databases) until a batch comes back
    /// short or `max_batches` batches were run
    ///
    /// The returned report sums `processed` over all batches.
    pub async fn sync_until_caught_up(&self, max_batches: usize) -> Result<SyncReport> {
        let mut total = SyncReport {
            processed: 0,
            last_id: self.cursor().await,
        };

        for _ in 0..max_batches {
            let report = self.sync_databases().await?;
            total.processed += report.processed;
            total.last_id = report.last_id;
            if report.processed < self.batch_size {
                break;
            }
        }

        Ok(total)
    }
}
