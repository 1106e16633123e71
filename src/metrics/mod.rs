//! Prometheus metrics for the collector and the replicator
//!
//! This module provides metrics tracking for:
//! - Collector: collections by outcome, retries, cycle duration, channel fetches,
//!   status writes, skipped ticks
//! - Replicator: rows replicated, current cursor, failed batches
//!
//! # Usage
//!
//! Call `init_metrics()` at application startup to register all metrics.
//! Until then (or if registration fails) every recording function is a no-op,
//! which keeps library users and tests free of global registry state.

use prometheus::{
    register_counter, register_counter_vec, register_histogram, register_int_gauge, Counter,
    CounterVec, Encoder, Histogram, IntGauge, TextEncoder,
};
use std::sync::OnceLock;

// ============================================================================
// Metrics Storage
// ============================================================================

/// Container for collector metrics
struct CollectorMetrics {
    collections: CounterVec,
    retries: Counter,
    cycle_duration: Histogram,
    channel_fetches: CounterVec,
    status_writes: Counter,
    skipped_ticks: Counter,
}

/// Container for replicator metrics
struct SyncMetrics {
    rows_replicated: Counter,
    cursor: IntGauge,
    failed_batches: Counter,
}

static COLLECTOR_METRICS: OnceLock<CollectorMetrics> = OnceLock::new();

static SYNC_METRICS: OnceLock<SyncMetrics> = OnceLock::new();

/// Flag to track if initialization was attempted
static METRICS_INIT_ATTEMPTED: OnceLock<bool> = OnceLock::new();

// ============================================================================
// Initialization
// ============================================================================

/// Register all metrics with the default Prometheus registry
///
/// Safe to call more than once; only the first call registers anything.
pub fn init_metrics() -> Result<(), prometheus::Error> {
    if METRICS_INIT_ATTEMPTED.get().is_some() {
        return Ok(());
    }
    METRICS_INIT_ATTEMPTED.set(true).ok();

    let collector = CollectorMetrics {
        collections: register_counter_vec!(
            "feedsync_collections_total",
            "Collection results by outcome",
            &["outcome"]
        )?,
        retries: register_counter!(
            "feedsync_collection_retries_total",
            "Collection errors deferred to the next tick"
        )?,
        cycle_duration: register_histogram!(
            "feedsync_cycle_duration_seconds",
            "Time spent in one collection cycle",
            vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]
        )?,
        channel_fetches: register_counter_vec!(
            "feedsync_channel_fetches_total",
            "Channel fetches by outcome",
            &["outcome"]
        )?,
        status_writes: register_counter!(
            "feedsync_status_writes_total",
            "Device status rows written after a significant change"
        )?,
        skipped_ticks: register_counter!(
            "feedsync_skipped_ticks_total",
            "Ticks dropped because a cycle was still running"
        )?,
    };

    let sync = SyncMetrics {
        rows_replicated: register_counter!(
            "feedsync_sync_rows_total",
            "Feed rows replicated to the destination"
        )?,
        cursor: register_int_gauge!(
            "feedsync_sync_cursor",
            "Last replicated source entry_id"
        )?,
        failed_batches: register_counter!(
            "feedsync_sync_failed_batches_total",
            "Replication batches that failed and will be retried"
        )?,
    };

    COLLECTOR_METRICS.set(collector).ok();
    SYNC_METRICS.set(sync).ok();

    tracing::info!("Prometheus metrics initialized");
    Ok(())
}

/// Whether metrics were registered
pub fn is_initialized() -> bool {
    COLLECTOR_METRICS.get().is_some() && SYNC_METRICS.get().is_some()
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, Box<dyn std::error::Error>> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

fn outcome_label(success: bool) -> &'static str {
    if success {
        "success"
    } else {
        "failure"
    }
}

/// Record a collection result
pub fn record_collection(success: bool) {
    if let Some(m) = COLLECTOR_METRICS.get() {
        m.collections
            .with_label_values(&[outcome_label(success)])
            .inc();
    }
}

/// Record an error deferred to the next tick
pub fn record_retry() {
    if let Some(m) = COLLECTOR_METRICS.get() {
        m.retries.inc();
    }
}

/// Record a single channel fetch
pub fn record_channel_fetch(success: bool) {
    if let Some(m) = COLLECTOR_METRICS.get() {
        m.channel_fetches
            .with_label_values(&[outcome_label(success)])
            .inc();
    }
}

/// Record a device status write
pub fn record_status_write() {
    if let Some(m) = COLLECTOR_METRICS.get() {
        m.status_writes.inc();
    }
}

/// Record a tick dropped by the overlap guard
pub fn record_skipped_tick() {
    if let Some(m) = COLLECTOR_METRICS.get() {
        m.skipped_ticks.inc();
    }
}

/// Record a successful replication batch
pub fn record_sync_batch(rows: usize, cursor: i64) {
    let Some(m) = SYNC_METRICS.get() else {
        return;
    };

    if rows > 0 {
        m.rows_replicated.inc_by(rows as f64);
    }
    m.cursor.set(cursor);
}

/// Record a failed replication batch
pub fn record_sync_failure() {
    if let Some(m) = SYNC_METRICS.get() {
        m.failed_batches.inc();
    }
}

/// Histogram timer guard that records duration on drop
pub struct MetricsTimer {
    timer: Option<prometheus::HistogramTimer>,
}

impl MetricsTimer {
    fn new(timer: prometheus::HistogramTimer) -> Self {
        Self { timer: Some(timer) }
    }

    /// Create a no-op timer when metrics are not initialized
    fn noop() -> Self {
        Self { timer: None }
    }
}

impl Drop for MetricsTimer {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.stop_and_record();
        }
    }
}

/// Start a cycle timer; the duration is recorded when it is dropped
pub fn start_cycle_timer() -> MetricsTimer {
    match COLLECTOR_METRICS.get() {
        Some(m) => MetricsTimer::new(m.cycle_duration.start_timer()),
        None => MetricsTimer::noop(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_before_init_is_noop() {
        // Must not panic whether or not another test initialized metrics
        record_collection(true);
        record_retry();
        record_channel_fetch(false);
        record_sync_batch(10, 42);
        let _timer = start_cycle_timer();
    }

    #[test]
    fn test_init_and_encode() {
        init_metrics().unwrap();
        assert!(is_initialized());
        // Second call is a no-op
        init_metrics().unwrap();

        record_collection(true);
        record_sync_batch(3, 7);

        let text = encode_metrics().unwrap();
        assert!(text.contains("feedsync_collections_total"));
        assert!(text.contains("feedsync_sync_cursor"));
    }
}
