//! Repository abstractions over the source and destination databases
//!
//! Business logic talks to these traits only:
//!
//! ```text
//! ┌──────────────────────────────┐   ┌──────────────────────────────┐
//! │  collector (registry,        │   │  sync (BatchReplicator)      │
//! │  fetcher)                    │   │                              │
//! └──────────────┬───────────────┘   └───────┬──────────────┬───────┘
//!                │                           │              │
//!                ▼                           ▼              ▼
//!       ChannelRepository               FeedSource      FeedSink
//!                │                           │              │
//!      ┌─────────┴─────────┐        ┌────────┴───┐   ┌──────┴──────┐
//!      ▼                   ▼        ▼            ▼   ▼             ▼
//!  PgChannelStore  MemoryChannelStore  PgFeedSource  ...  PgFeedSink ...
//! ```
//!
//! [`postgres`] holds the deadpool-postgres implementations, [`memory`]
//! the in-memory ones used by tests and dry runs.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::error::Result;
use crate::models::{Channel, FeedRecord, FeedRow, SyncLogEntry};

pub use memory::{MemoryChannelStore, MemoryFeedSink, MemoryFeedSource};
pub use postgres::{connect_pool, PgChannelStore, PgFeedSink, PgFeedSource};

/// Channel registry and device-status storage
#[async_trait]
pub trait ChannelRepository: Send + Sync {
    /// Channels enabled for polling
    async fn active_channels(&self) -> Result<Vec<Channel>>;

    /// Serialized status currently stored for a channel, `None` if unset
    async fn stored_status(&self, channel_id: i64) -> Result<Option<String>>;

    /// Overwrite the stored status and its update timestamp
    async fn update_status(
        &self,
        channel_id: i64,
        status: &Value,
        updated_at: DateTime<Utc>,
    ) -> Result<()>;
}

/// Read side of the replication: the source feed table
#[async_trait]
pub trait FeedSource: Send + Sync {
    /// Up to `limit` records with `entry_id > cursor`, ascending by `entry_id`
    async fn fetch_after(&self, cursor: i64, limit: usize) -> Result<Vec<FeedRecord>>;
}

/// Write side of the replication: the destination feed and audit tables
#[async_trait]
pub trait FeedSink: Send + Sync {
    /// Append one replicated feed row
    async fn insert_feed(&self, row: &FeedRow) -> Result<()>;

    /// Append a progress line to the audit log
    async fn append_sync_log(&self, entry: &SyncLogEntry) -> Result<()>;

    /// Highest `entry_id` already present, `None` when the table is empty
    async fn max_entry_id(&self) -> Result<Option<i64>>;
}
