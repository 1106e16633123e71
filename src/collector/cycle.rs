//! One collection cycle: every active channel, polled once
//!
//! ```text
//! registry ──▶ [channel 1] ──▶ fetch ──▶ consumers
//!              [channel 2] ──▶ fetch ──✗ (recorded, loop continues)
//!              [channel 3] ──▶ fetch ──▶ consumers
//! ```
//!
//! Channels are processed one after another. A failing channel is logged
//! and recorded in the [`CycleOutcome`]; it never aborts the cycle. Only a
//! registry failure makes [`CollectionCycle::run_cycle`] return `Err`.
//!
//! The cycle does not touch collection metrics. It reports what happened and
//! the supervisor folds that into its state.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;

use super::fetcher::ChannelDataSource;
use super::registry::ActiveChannelRegistry;
use crate::error::{ErrorCategory, Result};
use crate::metrics;
use crate::models::Channel;

/// Downstream consumers of a successfully fetched channel
///
/// Implementations must tolerate duplicate delivery.
#[async_trait]
pub trait ChannelConsumer: Send + Sync {
    /// Handle the raw `channel` payload
    async fn process_channel(&self, channel_id: i64, channel: &Value) -> Result<()>;

    /// Handle the parsed last-known sensor values
    async fn process_sensor_readings(&self, channel_id: i64, readings: &Value) -> Result<()>;
}

/// Consumer that only logs what it receives
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingConsumer;

#[async_trait]
impl ChannelConsumer for LoggingConsumer {
    async fn process_channel(&self, channel_id: i64, channel: &Value) -> Result<()> {
        tracing::debug!(
            channel_id,
            name = channel.get("name").and_then(serde_json::Value::as_str).unwrap_or_default(),
            "Channel processed"
        );
        Ok(())
    }

    async fn process_sensor_readings(&self, channel_id: i64, readings: &Value) -> Result<()> {
        let fields = readings.as_object().map(|m| m.len()).unwrap_or(0);
        tracing::debug!(channel_id, fields, "Sensor readings processed");
        Ok(())
    }
}

/// A channel that failed during a cycle
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelFailure {
    pub channel_id: i64,
    pub category: ErrorCategory,
    pub error: String,
}

/// What a cycle did
#[derive(Debug, Clone, Default)]
pub struct CycleOutcome {
    /// Channels returned by the registry
    pub channel_count: usize,

    /// Channels fetched and handed to the consumers, in order
    pub processed: Vec<i64>,

    /// Channels that failed
    pub failures: Vec<ChannelFailure>,

    /// Status rows written
    pub status_writes: usize,

    /// Wall time of the cycle
    pub duration: Duration,
}

impl CycleOutcome {
    /// The registry had nothing to poll
    pub fn is_empty(&self) -> bool {
        self.channel_count == 0
    }
}

/// Runs collection cycles
pub struct CollectionCycle {
    registry: ActiveChannelRegistry,
    fetcher: Arc<dyn ChannelDataSource>,
    consumer: Arc<dyn ChannelConsumer>,
}

impl CollectionCycle {
    pub fn new(
        registry: ActiveChannelRegistry,
        fetcher: Arc<dyn ChannelDataSource>,
        consumer: Arc<dyn ChannelConsumer>,
    ) -> Self {
        Self {
            registry,
            fetcher,
            consumer,
        }
    }

    /// Poll every active channel once
    pub async fn run_cycle(&self) -> Result<CycleOutcome> {
        let started = Instant::now();
        let _timer = metrics::start_cycle_timer();

        let channels = self.registry.get_active_channels().await?;
        let mut outcome = CycleOutcome {
            channel_count: channels.len(),
            ..Default::default()
        };

        if channels.is_empty() {
            tracing::warn!("No active channels found");
            outcome.duration = started.elapsed();
            return Ok(outcome);
        }

        for channel in &channels {
            match self.process_channel(channel).await {
                Ok(status_written) => {
                    metrics::record_channel_fetch(true);
                    outcome.processed.push(channel.channel_id);
                    if status_written {
                        outcome.status_writes += 1;
                    }
                }
                Err(e) => {
                    metrics::record_channel_fetch(false);
                    tracing::error!(
                        channel_id = channel.channel_id,
                        category = e.category().as_str(),
                        error = %e,
                        "Failed to collect channel"
                    );
                    outcome.failures.push(ChannelFailure {
                        channel_id: channel.channel_id,
                        category: e.category(),
                        error: e.to_string(),
                    });
                }
            }
        }

        outcome.duration = started.elapsed();
        tracing::info!(
            channels = outcome.channel_count,
            processed = outcome.processed.len(),
            failed = outcome.failures.len(),
            status_writes = outcome.status_writes,
            duration_ms = outcome.duration.as_millis() as u64,
            "Collection cycle finished"
        );

        Ok(outcome)
    }

    async fn process_channel(&self, channel: &Channel) -> Result<bool> {
        let snapshot = self
            .fetcher
            .fetch_channel_data(channel.channel_id, &channel.api_key)
            .await?;
        let readings = snapshot.last_values()?;

        self.consumer
            .process_channel(channel.channel_id, &snapshot.channel)
            .await?;
        self.consumer
            .process_sensor_readings(channel.channel_id, &readings)
            .await?;

        Ok(snapshot.status_written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::models::ChannelSnapshot;
    use crate::storage::MemoryChannelStore;
    use serde_json::json;
    use std::sync::Mutex;

    /// Serves canned channels; ids listed in `failing` return a validation error
    struct StubSource {
        failing: Vec<i64>,
        calls: Mutex<Vec<i64>>,
    }

    #[async_trait]
    impl ChannelDataSource for StubSource {
        async fn fetch_channel_data(&self, channel_id: i64, _api_key: &str) -> Result<ChannelSnapshot> {
            self.calls.lock().unwrap().push(channel_id);
            if self.failing.contains(&channel_id) {
                return Err(Error::validation("unexpected response"));
            }
            Ok(ChannelSnapshot {
                channel_id,
                channel: json!({"id": channel_id, "last_values": "{\"field1\": \"20.1\"}"}),
                status_written: channel_id == 1,
            })
        }
    }

    #[derive(Default)]
    struct RecordingConsumer {
        channels: Mutex<Vec<i64>>,
        readings: Mutex<Vec<(i64, Value)>>,
    }

    #[async_trait]
    impl ChannelConsumer for RecordingConsumer {
        async fn process_channel(&self, channel_id: i64, _channel: &Value) -> Result<()> {
            self.channels.lock().unwrap().push(channel_id);
            Ok(())
        }

        async fn process_sensor_readings(&self, channel_id: i64, readings: &Value) -> Result<()> {
            self.readings.lock().unwrap().push((channel_id, readings.clone()));
            Ok(())
        }
    }

    fn cycle_with(
        store: MemoryChannelStore,
        failing: Vec<i64>,
    ) -> (CollectionCycle, Arc<StubSource>, Arc<RecordingConsumer>) {
        let source = Arc::new(StubSource {
            failing,
            calls: Mutex::new(Vec::new()),
        });
        let consumer = Arc::new(RecordingConsumer::default());
        let cycle = CollectionCycle::new(
            ActiveChannelRegistry::new(Arc::new(store)),
            source.clone(),
            consumer.clone(),
        );
        (cycle, source, consumer)
    }

    #[tokio::test]
    async fn test_empty_registry_outcome() {
        let (cycle, source, _) = cycle_with(MemoryChannelStore::new(), vec![]);
        let outcome = cycle.run_cycle().await.unwrap();

        assert!(outcome.is_empty());
        assert!(source.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_channel_does_not_abort_cycle() {
        let store = MemoryChannelStore::with_channels(vec![
            Channel::new(1, "a"),
            Channel::new(2, "b"),
            Channel::new(3, "c"),
        ]);
        let (cycle, source, consumer) = cycle_with(store, vec![2]);

        let outcome = cycle.run_cycle().await.unwrap();

        assert_eq!(*source.calls.lock().unwrap(), vec![1, 2, 3]);
        assert_eq!(outcome.processed, vec![1, 3]);
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].channel_id, 2);
        assert_eq!(outcome.failures[0].category, ErrorCategory::Validation);
        assert_eq!(outcome.status_writes, 1);

        assert_eq!(*consumer.channels.lock().unwrap(), vec![1, 3]);
        let readings = consumer.readings.lock().unwrap();
        assert_eq!(readings[0], (1, json!({"field1": "20.1"})));
    }

    #[tokio::test]
    async fn test_registry_error_fails_cycle() {
        let store = MemoryChannelStore::with_channels(vec![Channel::new(1, "a")]);
        store.fail_registry(true);
        let (cycle, source, _) = cycle_with(store, vec![]);

        assert!(cycle.run_cycle().await.is_err());
        assert!(source.calls.lock().unwrap().is_empty());
    }
}
