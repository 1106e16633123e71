//! Collection supervisor
//!
//! Runs [`CollectionCycle`]s on a fixed interval and owns the process-lifetime
//! [`CollectionMetrics`]. It is the only writer of those metrics.
//!
//! # State machine
//!
//! ```text
//!            start(): run one cycle, arm ticker
//!   Stopped ─────────────────────────────────────▶ Running
//!      ▲                                              │
//!      └──────────────────────────────────────────────┘
//!            stop(): disarm ticker, emit summary
//! ```
//!
//! Every tick runs its cycle behind a single-slot guard, so two cycles never
//! run at once. A tick that finds the guard taken is handled according to
//! [`OverlapPolicy`]. There is no retry loop inside a cycle: a failed cycle
//! is retried by the next tick.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use super::cycle::{CollectionCycle, CycleOutcome};
use crate::config::{CollectorConfig, OverlapPolicy};
use crate::error::Result;
use crate::metrics;

/// Process-lifetime collection counters
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CollectionMetrics {
    pub successful_collections: u64,
    pub failed_collections: u64,
    pub total_retries: u64,
    pub last_error: Option<String>,
    pub last_success_time: Option<DateTime<Utc>>,
}

impl CollectionMetrics {
    /// successes / (successes + failures), 0.0 before any collection
    pub fn success_rate(&self) -> f64 {
        let total = self.successful_collections + self.failed_collections;
        if total == 0 {
            return 0.0;
        }
        self.successful_collections as f64 / total as f64
    }
}

/// Supervisor lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SupervisorState {
    Stopped,
    Running,
}

/// Read-only snapshot returned by [`Supervisor::collector_stats`]
#[derive(Debug, Clone, Serialize)]
pub struct CollectorStats {
    pub is_running: bool,
    pub metrics: CollectionMetrics,
    pub interval: Duration,
    pub overlap_policy: OverlapPolicy,
    pub skipped_ticks: u64,
}

impl CollectorStats {
    pub fn success_rate(&self) -> f64 {
        self.metrics.success_rate()
    }
}

impl fmt::Display for CollectorStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let m = &self.metrics;
        writeln!(f, "Collection statistics")?;
        writeln!(f, "  Successful collections: {}", m.successful_collections)?;
        writeln!(f, "  Failed collections:     {}", m.failed_collections)?;
        writeln!(f, "  Total retries:          {}", m.total_retries)?;
        writeln!(f, "  Success rate:           {:.2}%", self.success_rate() * 100.0)?;
        writeln!(f, "  Skipped ticks:          {}", self.skipped_ticks)?;
        match m.last_success_time {
            Some(t) => writeln!(f, "  Last success:           {}", t.to_rfc3339())?,
            None => writeln!(f, "  Last success:           never")?,
        }
        write!(
            f,
            "  Last error:             {}",
            m.last_error.as_deref().unwrap_or("none")
        )
    }
}

/// Shared between the supervisor handle and the ticker task
struct SupervisorCore {
    cycle: CollectionCycle,
    metrics: RwLock<CollectionMetrics>,
    policy: OverlapPolicy,

    /// Held for the duration of a cycle
    in_progress: Arc<Mutex<()>>,

    /// A tick is waiting for `in_progress` (queue policy)
    queued: AtomicBool,

    skipped_ticks: AtomicU64,
}

impl SupervisorCore {
    fn update_metrics(
        state: &mut CollectionMetrics,
        success: bool,
        timestamp: DateTime<Utc>,
        error_message: Option<&str>,
    ) {
        if success {
            state.successful_collections += 1;
            state.last_success_time = Some(timestamp);
        } else {
            state.failed_collections += 1;
            if let Some(message) = error_message {
                state.last_error = Some(message.to_string());
            }
        }
        metrics::record_collection(success);
    }

    fn handle_collection_error(state: &mut CollectionMetrics, error: &str) {
        state.total_retries += 1;
        state.failed_collections += 1;
        state.last_error = Some(error.to_string());
        metrics::record_collection(false);
        metrics::record_retry();
    }

    /// Run one cycle and fold its result into the metrics
    async fn collect(&self) {
        let result = self.cycle.run_cycle().await;
        self.fold(result).await;
    }

    async fn fold(&self, result: Result<CycleOutcome>) {
        let now = Utc::now();
        let mut state = self.metrics.write().await;

        match result {
            Ok(outcome) if outcome.is_empty() => {
                Self::update_metrics(&mut state, false, now, Some("No active channels found"));
            }
            Ok(outcome) => {
                for failure in &outcome.failures {
                    let message = format!("channel {}: {}", failure.channel_id, failure.error);
                    Self::handle_collection_error(&mut state, &message);
                }
                Self::update_metrics(&mut state, true, now, None);
            }
            Err(e) => {
                tracing::error!(
                    category = e.category().as_str(),
                    error = %e,
                    "Collection cycle failed"
                );
                Self::handle_collection_error(&mut state, &e.to_string());
            }
        }
    }

    fn skip_tick(&self) {
        self.skipped_ticks.fetch_add(1, Ordering::Relaxed);
        metrics::record_skipped_tick();
        tracing::warn!(policy = ?self.policy, "Previous cycle still running, tick skipped");
    }

    /// Dispatch a tick according to the overlap policy
    fn on_tick(self: &Arc<Self>) {
        match self.policy {
            OverlapPolicy::Skip => match self.in_progress.clone().try_lock_owned() {
                Ok(guard) => {
                    let core = Arc::clone(self);
                    tokio::spawn(async move {
                        core.collect().await;
                        drop(guard);
                    });
                }
                Err(_) => self.skip_tick(),
            },
            OverlapPolicy::Queue => {
                if self
                    .queued
                    .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                    .is_err()
                {
                    self.skip_tick();
                    return;
                }
                let core = Arc::clone(self);
                tokio::spawn(async move {
                    let guard = core.in_progress.clone().lock_owned().await;
                    core.queued.store(false, Ordering::Release);
                    core.collect().await;
                    drop(guard);
                });
            }
        }
    }
}

/// Running ticker task
struct Ticker {
    handle: JoinHandle<()>,
    shutdown: watch::Sender<bool>,
}

/// Drives collection cycles on a fixed interval
pub struct Supervisor {
    core: Arc<SupervisorCore>,
    interval: Duration,
    ticker: Option<Ticker>,
}

impl Supervisor {
    /// Create a stopped supervisor
    pub fn new(cycle: CollectionCycle, config: &CollectorConfig) -> Self {
        Self {
            core: Arc::new(SupervisorCore {
                cycle,
                metrics: RwLock::new(CollectionMetrics::default()),
                policy: config.overlap_policy,
                in_progress: Arc::new(Mutex::new(())),
                queued: AtomicBool::new(false),
                skipped_ticks: AtomicU64::new(0),
            }),
            interval: Duration::from_millis(config.interval_ms.max(1)),
            ticker: None,
        }
    }

    pub fn state(&self) -> SupervisorState {
        if self.ticker.is_some() {
            SupervisorState::Running
        } else {
            SupervisorState::Stopped
        }
    }

    pub fn is_running(&self) -> bool {
        self.state() == SupervisorState::Running
    }

    /// Start collecting
    ///
    /// Runs one cycle before returning, then arms the interval timer.
    /// Returns `false` without doing anything if already running.
    pub async fn start(&mut self) -> bool {
        if self.is_running() {
            tracing::debug!("Supervisor already running");
            return false;
        }

        tracing::info!(
            interval_ms = self.interval.as_millis() as u64,
            policy = ?self.core.policy,
            "Starting data collection"
        );

        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let core = Arc::clone(&self.core);
        let period = self.interval;

        {
            let _guard = core.in_progress.lock().await;
            core.collect().await;
        }

        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick() => core.on_tick(),
                    _ = shutdown_rx.changed() => {
                        tracing::debug!("Collection ticker shutting down");
                        break;
                    }
                }
            }
        });

        self.ticker = Some(Ticker { handle, shutdown });
        true
    }

    /// Stop collecting
    ///
    /// Cancels the timer and returns the final statistics. A cycle already in
    /// flight is left to finish. Returns `None` if not running.
    pub async fn stop(&mut self) -> Option<CollectorStats> {
        let ticker = self.ticker.take()?;

        let _ = ticker.shutdown.send(true);
        if let Err(e) = ticker.handle.await {
            tracing::warn!(error = %e, "Collection ticker ended abnormally");
        }

        let stats = self.collector_stats().await;
        tracing::info!(
            successful = stats.metrics.successful_collections,
            failed = stats.metrics.failed_collections,
            retries = stats.metrics.total_retries,
            success_rate_pct = stats.success_rate() * 100.0,
            last_success = ?stats.metrics.last_success_time,
            last_error = ?stats.metrics.last_error,
            "Data collection stopped"
        );
        Some(stats)
    }

    /// Record the outcome of a collection
    pub async fn update_metrics(
        &self,
        success: bool,
        timestamp: DateTime<Utc>,
        error_message: Option<&str>,
    ) {
        let mut state = self.core.metrics.write().await;
        SupervisorCore::update_metrics(&mut state, success, timestamp, error_message);
    }

    /// Record a failed collection attempt; the next tick is the retry
    pub async fn handle_collection_error(&self, error: &str) {
        let mut state = self.core.metrics.write().await;
        SupervisorCore::handle_collection_error(&mut state, error);
    }

    /// Snapshot of state, metrics and configuration
    pub async fn collector_stats(&self) -> CollectorStats {
        CollectorStats {
            is_running: self.is_running(),
            metrics: self.core.metrics.read().await.clone(),
            interval: self.interval,
            overlap_policy: self.core.policy,
            skipped_ticks: self.core.skipped_ticks.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::cycle::LoggingConsumer;
    use crate::collector::fetcher::ChannelDataSource;
    use crate::collector::registry::ActiveChannelRegistry;
    use crate::error::Error;
    use crate::models::ChannelSnapshot;
    use crate::storage::MemoryChannelStore;
    use async_trait::async_trait;

    struct NeverCalled;

    #[async_trait]
    impl ChannelDataSource for NeverCalled {
        async fn fetch_channel_data(&self, channel_id: i64, _: &str) -> Result<ChannelSnapshot> {
            Err(Error::other(format!("unexpected fetch of {channel_id}")))
        }
    }

    fn idle_supervisor() -> Supervisor {
        let cycle = CollectionCycle::new(
            ActiveChannelRegistry::new(Arc::new(MemoryChannelStore::new())),
            Arc::new(NeverCalled),
            Arc::new(LoggingConsumer),
        );
        Supervisor::new(cycle, &CollectorConfig::default())
    }

    #[tokio::test]
    async fn test_stop_when_stopped_is_noop() {
        let mut supervisor = idle_supervisor();
        let before = supervisor.collector_stats().await;

        assert!(supervisor.stop().await.is_none());

        let after = supervisor.collector_stats().await;
        assert_eq!(before.metrics, after.metrics);
        assert!(!after.is_running);
    }

    #[tokio::test]
    async fn test_update_metrics() {
        let supervisor = idle_supervisor();
        let now = Utc::now();

        supervisor.update_metrics(true, now, None).await;
        supervisor.update_metrics(false, now, Some("boom")).await;

        let m = supervisor.collector_stats().await.metrics;
        assert_eq!(m.successful_collections, 1);
        assert_eq!(m.failed_collections, 1);
        assert_eq!(m.total_retries, 0);
        assert_eq!(m.last_success_time, Some(now));
        assert_eq!(m.last_error.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn test_handle_collection_error() {
        let supervisor = idle_supervisor();
        supervisor.handle_collection_error("timeout").await;

        let m = supervisor.collector_stats().await.metrics;
        assert_eq!(m.total_retries, 1);
        assert_eq!(m.failed_collections, 1);
        assert_eq!(m.successful_collections, 0);
        assert_eq!(m.last_error.as_deref(), Some("timeout"));
    }

    #[test]
    fn test_success_rate() {
        let mut m = CollectionMetrics::default();
        assert_eq!(m.success_rate(), 0.0);

        m.successful_collections = 3;
        m.failed_collections = 1;
        assert!((m.success_rate() - 0.75).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_stats_display() {
        let supervisor = idle_supervisor();
        supervisor.handle_collection_error("timeout").await;

        let text = supervisor.collector_stats().await.to_string();
        assert!(text.contains("Failed collections:     1"));
        assert!(text.contains("Last success:           never"));
        assert!(text.contains("Last error:             timeout"));
    }
}
