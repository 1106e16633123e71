//! In-memory repositories
//!
//! Useful for testing without database dependencies. Each store can be told
//! to fail specific operations so error paths can be exercised.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use super::{ChannelRepository, FeedSink, FeedSource};
use crate::error::{Error, Result};
use crate::models::{Channel, FeedRecord, FeedRow, SyncLogEntry};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ============================================================================
// Channels
// ============================================================================

/// A status write recorded by [`MemoryChannelStore`]
#[derive(Debug, Clone, PartialEq)]
pub struct StatusWrite {
    pub channel_id: i64,
    pub status: Value,
    pub updated_at: DateTime<Utc>,
}

#[derive(Default)]
struct ChannelState {
    channels: Vec<Channel>,
    statuses: HashMap<i64, String>,
    writes: Vec<StatusWrite>,
    fail_registry: bool,
}

/// In-memory [`ChannelRepository`]
#[derive(Default)]
pub struct MemoryChannelStore {
    state: Mutex<ChannelState>,
}

impl MemoryChannelStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store with the given active channels
    pub fn with_channels(channels: Vec<Channel>) -> Self {
        let store = Self::new();
        lock(&store.state).channels = channels;
        store
    }

    /// Seed the serialized status stored for a channel
    pub fn set_stored_status(&self, channel_id: i64, status: impl Into<String>) {
        lock(&self.state).statuses.insert(channel_id, status.into());
    }

    /// Make `active_channels` fail until reset
    pub fn fail_registry(&self, fail: bool) {
        lock(&self.state).fail_registry = fail;
    }

    /// Status writes performed so far, oldest first
    pub fn writes(&self) -> Vec<StatusWrite> {
        lock(&self.state).writes.clone()
    }
}

#[async_trait]
impl ChannelRepository for MemoryChannelStore {
    async fn active_channels(&self) -> Result<Vec<Channel>> {
        let state = lock(&self.state);
        if state.fail_registry {
            return Err(Error::database("registry unavailable"));
        }
        Ok(state.channels.clone())
    }

    async fn stored_status(&self, channel_id: i64) -> Result<Option<String>> {
        Ok(lock(&self.state).statuses.get(&channel_id).cloned())
    }

    async fn update_status(
        &self,
        channel_id: i64,
        status: &Value,
        updated_at: DateTime<Utc>,
    ) -> Result<()> {
        let serialized = serde_json::to_string(status)?;
        let mut state = lock(&self.state);
        state.statuses.insert(channel_id, serialized);
        state.writes.push(StatusWrite {
            channel_id,
            status: status.clone(),
            updated_at,
        });
        Ok(())
    }
}

// ============================================================================
// Feeds
// ============================================================================

/// In-memory [`FeedSource`]
#[derive(Default)]
pub struct MemoryFeedSource {
    records: Mutex<Vec<FeedRecord>>,
}

impl MemoryFeedSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a source holding one minimal record per id
    pub fn with_entry_ids(ids: impl IntoIterator<Item = i64>) -> Self {
        let source = Self::new();
        for id in ids {
            source.push(FeedRecord {
                entry_id: id,
                channel_id: 1,
                created_at: 1_700_000_000 + id,
                fields: vec![Some(id.to_string())],
                ..Default::default()
            });
        }
        source
    }

    /// Append a record
    pub fn push(&self, record: FeedRecord) {
        lock(&self.records).push(record);
    }
}

#[async_trait]
impl FeedSource for MemoryFeedSource {
    async fn fetch_after(&self, cursor: i64, limit: usize) -> Result<Vec<FeedRecord>> {
        let mut batch: Vec<FeedRecord> = lock(&self.records)
            .iter()
            .filter(|r| r.entry_id > cursor)
            .cloned()
            .collect();
        batch.sort_by_key(|r| r.entry_id);
        batch.truncate(limit);
        Ok(batch)
    }
}

#[derive(Default)]
struct SinkState {
    rows: Vec<FeedRow>,
    log: Vec<SyncLogEntry>,
    fail_entry: Option<i64>,
    fail_log: bool,
}

/// In-memory [`FeedSink`]
///
/// Inserts are appended without deduplication, so replays after a failed
/// batch show up as duplicate rows.
#[derive(Default)]
pub struct MemoryFeedSink {
    state: Mutex<SinkState>,
}

impl MemoryFeedSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the insert of `entry_id` fail; `None` clears it
    pub fn fail_on_entry(&self, entry_id: Option<i64>) {
        lock(&self.state).fail_entry = entry_id;
    }

    /// Make `append_sync_log` fail
    pub fn fail_sync_log(&self, fail: bool) {
        lock(&self.state).fail_log = fail;
    }

    /// Inserted rows in insertion order
    pub fn rows(&self) -> Vec<FeedRow> {
        lock(&self.state).rows.clone()
    }

    /// Inserted entry ids, sorted
    pub fn entry_ids(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = lock(&self.state).rows.iter().map(|r| r.entry_id).collect();
        ids.sort_unstable();
        ids
    }

    /// Audit log entries
    pub fn sync_log(&self) -> Vec<SyncLogEntry> {
        lock(&self.state).log.clone()
    }
}

#[async_trait]
impl FeedSink for MemoryFeedSink {
    async fn insert_feed(&self, row: &FeedRow) -> Result<()> {
        let mut state = lock(&self.state);
        if state.fail_entry == Some(row.entry_id) {
            return Err(Error::database(format!(
                "failed to insert entry {}",
                row.entry_id
            )));
        }
        state.rows.push(row.clone());
        Ok(())
    }

    async fn append_sync_log(&self, entry: &SyncLogEntry) -> Result<()> {
        let mut state = lock(&self.state);
        if state.fail_log {
            return Err(Error::database("sync log unavailable"));
        }
        state.log.push(entry.clone());
        Ok(())
    }

    async fn max_entry_id(&self) -> Result<Option<i64>> {
        Ok(lock(&self.state).rows.iter().map(|r| r.entry_id).max())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fetch_after_orders_and_limits() {
        let source = MemoryFeedSource::with_entry_ids([5, 3, 9, 1, 7]);

        let batch = source.fetch_after(2, 2).await.unwrap();
        let ids: Vec<i64> = batch.iter().map(|r| r.entry_id).collect();
        assert_eq!(ids, vec![3, 5]);

        assert!(source.fetch_after(9, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_channel_store_registry_failure() {
        let store = MemoryChannelStore::with_channels(vec![Channel::new(1, "k")]);
        assert_eq!(store.active_channels().await.unwrap().len(), 1);

        store.fail_registry(true);
        assert!(store.active_channels().await.is_err());
    }

    #[tokio::test]
    async fn test_update_status_is_visible() {
        let store = MemoryChannelStore::new();
        assert_eq!(store.stored_status(4).await.unwrap(), None);

        store
            .update_status(4, &serde_json::json!({"ssid": "lab"}), Utc::now())
            .await
            .unwrap();

        assert_eq!(
            store.stored_status(4).await.unwrap().as_deref(),
            Some(r#"{"ssid":"lab"}"#)
        );
        assert_eq!(store.writes().len(), 1);
    }
}
