//! Common test utilities

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use feedsync::collector::{
    ActiveChannelRegistry, ChannelConsumer, ChannelDataSource, CollectionCycle,
};
use feedsync::config::{CollectorConfig, OverlapPolicy};
use feedsync::error::{Error, Result};
use feedsync::models::{Channel, ChannelSnapshot};
use feedsync::storage::MemoryChannelStore;

/// Channels `1..=n` with keys `key-<id>`
pub fn channels(n: i64) -> Vec<Channel> {
    (1..=n).map(|id| Channel::new(id, format!("key-{id}"))).collect()
}

/// Canned API payload for a channel
pub fn channel_payload(channel_id: i64) -> Value {
    json!({
        "id": channel_id,
        "name": format!("station {channel_id}"),
        "last_values": "{\"field1\": \"21.5\", \"field2\": \"40\"}",
    })
}

/// Serves canned channels, optionally slowly; ids in `failing` error out
#[derive(Default)]
pub struct StubSource {
    failing: HashSet<i64>,
    delay: Duration,
    calls: Mutex<Vec<i64>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl StubSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(mut self, ids: impl IntoIterator<Item = i64>) -> Self {
        self.failing = ids.into_iter().collect();
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Channel ids fetched so far, in call order
    pub fn calls(&self) -> Vec<i64> {
        self.calls.lock().unwrap().clone()
    }

    /// Highest number of fetches that were running at the same time
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChannelDataSource for StubSource {
    async fn fetch_channel_data(&self, channel_id: i64, _api_key: &str) -> Result<ChannelSnapshot> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.calls.lock().unwrap().push(channel_id);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.failing.contains(&channel_id) {
            return Err(Error::validation(format!("channel {channel_id} unavailable")));
        }

        Ok(ChannelSnapshot {
            channel_id,
            channel: channel_payload(channel_id),
            status_written: false,
        })
    }
}

/// Records every delivery
#[derive(Default)]
pub struct RecordingConsumer {
    pub channels: Mutex<Vec<i64>>,
    pub readings: Mutex<Vec<(i64, Value)>>,
}

#[async_trait]
impl ChannelConsumer for RecordingConsumer {
    async fn process_channel(&self, channel_id: i64, _channel: &Value) -> Result<()> {
        self.channels.lock().unwrap().push(channel_id);
        Ok(())
    }

    async fn process_sensor_readings(&self, channel_id: i64, readings: &Value) -> Result<()> {
        self.readings
            .lock()
            .unwrap()
            .push((channel_id, readings.clone()));
        Ok(())
    }
}

/// Collector settings with a short interval
pub fn collector_config(interval_ms: u64, overlap_policy: OverlapPolicy) -> CollectorConfig {
    CollectorConfig {
        interval_ms,
        overlap_policy,
        ..Default::default()
    }
}

/// Wire a cycle from a store, a source and a recording consumer
pub fn build_cycle(
    store: Arc<MemoryChannelStore>,
    source: Arc<StubSource>,
) -> (CollectionCycle, Arc<RecordingConsumer>) {
    let consumer = Arc::new(RecordingConsumer::default());
    let cycle = CollectionCycle::new(
        ActiveChannelRegistry::new(store),
        source,
        consumer.clone(),
    );
    (cycle, consumer)
}
