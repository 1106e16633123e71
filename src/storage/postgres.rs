//! PostgreSQL repositories backed by deadpool-postgres
//!
//! No DDL is issued here; the tables are owned by the surrounding system.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_postgres::{
    Config as PgConfig, ManagerConfig, Pool, PoolConfig, RecyclingMethod, Runtime,
};
use serde_json::Value;
use tokio_postgres::types::ToSql;
use tokio_postgres::{NoTls, Row};

use super::{ChannelRepository, FeedSink, FeedSource};
use crate::error::{Error, Result};
use crate::models::{Channel, FeedRecord, FeedRow, SyncLogEntry, FEED_FIELD_COUNT};
use crate::utils::retry::{with_retry, RetryConfig};

/// Channel registry and status table (destination database)
pub const CHANNELS_TABLE: &str = "channels";
/// Feed table read by the replicator (source database)
pub const SOURCE_FEEDS_TABLE: &str = "feeds";
/// Feed table written by the replicator (destination database)
pub const DESTINATION_FEEDS_TABLE: &str = "channel_feeds";
/// Replication audit log (destination database)
pub const SYNC_LOG_TABLE: &str = "sync_log";

/// Create a pool and wait until a connection can be made
///
/// Connection attempts follow `retry`; the pool is returned once
/// `SELECT 1` succeeds.
pub async fn connect_pool(url: &str, pool_size: usize, retry: &RetryConfig) -> Result<Pool> {
    let mut cfg = PgConfig::new();
    cfg.url = Some(url.to_string());
    cfg.manager = Some(ManagerConfig {
        recycling_method: RecyclingMethod::Fast,
    });
    cfg.pool = Some(PoolConfig::new(pool_size));

    let pool = cfg.create_pool(Some(Runtime::Tokio1), NoTls)?;

    with_retry(retry, || async {
        let client = pool.get().await?;
        client.simple_query("SELECT 1").await?;
        Ok::<_, Error>(())
    })
    .await?;

    tracing::info!(pool_size, "PostgreSQL pool ready");
    Ok(pool)
}

fn feed_field_columns() -> String {
    (1..=FEED_FIELD_COUNT)
        .map(|i| format!("field{i}"))
        .collect::<Vec<_>>()
        .join(", ")
}

// ============================================================================
// Channels
// ============================================================================

/// [`ChannelRepository`] over the destination `channels` table
#[derive(Clone)]
pub struct PgChannelStore {
    pool: Pool,
}

impl PgChannelStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ChannelRepository for PgChannelStore {
    async fn active_channels(&self) -> Result<Vec<Channel>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                &format!(
                    "SELECT channel_id, api_key FROM {CHANNELS_TABLE} \
                     WHERE enabled = TRUE ORDER BY channel_id"
                ),
                &[],
            )
            .await
            .map_err(|e| Error::database_with_source("failed to load active channels", e))?;

        Ok(rows
            .iter()
            .map(|row| Channel::new(row.get("channel_id"), row.get::<_, String>("api_key")))
            .collect())
    }

    async fn stored_status(&self, channel_id: i64) -> Result<Option<String>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                &format!("SELECT status FROM {CHANNELS_TABLE} WHERE channel_id = $1"),
                &[&channel_id],
            )
            .await
            .map_err(|e| Error::database_with_source("failed to load channel status", e))?;

        Ok(row.and_then(|r| r.get::<_, Option<String>>(0)))
    }

    async fn update_status(
        &self,
        channel_id: i64,
        status: &Value,
        updated_at: DateTime<Utc>,
    ) -> Result<()> {
        let serialized = serde_json::to_string(status)?;
        let client = self.pool.get().await?;
        client
            .execute(
                &format!(
                    "UPDATE {CHANNELS_TABLE} SET status = $2, status_updated_at = $3 \
                     WHERE channel_id = $1"
                ),
                &[&channel_id, &serialized, &updated_at],
            )
            .await
            .map_err(|e| Error::database_with_source("failed to update channel status", e))?;

        Ok(())
    }
}

// ============================================================================
// Feeds
// ============================================================================

/// [`FeedSource`] over the source `feeds` table
#[derive(Clone)]
pub struct PgFeedSource {
    pool: Pool,
    select_sql: String,
}

impl PgFeedSource {
    pub fn new(pool: Pool) -> Self {
        let select_sql = format!(
            "SELECT entry_id, channel_id, created_at, {}, latitude, longitude, elevation, status \
             FROM {SOURCE_FEEDS_TABLE} WHERE entry_id > $1 ORDER BY entry_id ASC LIMIT $2",
            feed_field_columns()
        );
        Self { pool, select_sql }
    }

    fn record_from_row(row: &Row) -> FeedRecord {
        FeedRecord {
            entry_id: row.get("entry_id"),
            channel_id: row.get("channel_id"),
            created_at: row.get("created_at"),
            fields: (1..=FEED_FIELD_COUNT)
                .map(|i| row.get::<_, Option<String>>(format!("field{i}").as_str()))
                .collect(),
            latitude: row.get("latitude"),
            longitude: row.get("longitude"),
            elevation: row.get("elevation"),
            status: row.get("status"),
        }
    }
}

#[async_trait]
impl FeedSource for PgFeedSource {
    async fn fetch_after(&self, cursor: i64, limit: usize) -> Result<Vec<FeedRecord>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let client = self.pool.get().await?;
        let rows = client
            .query(self.select_sql.as_str(), &[&cursor, &limit])
            .await
            .map_err(|e| Error::database_with_source("failed to read source feeds", e))?;

        Ok(rows.iter().map(Self::record_from_row).collect())
    }
}

/// [`FeedSink`] over the destination `channel_feeds` and `sync_log` tables
#[derive(Clone)]
pub struct PgFeedSink {
    pool: Pool,
    insert_sql: String,
}

impl PgFeedSink {
    pub fn new(pool: Pool) -> Self {
        let placeholders = (1..=FEED_FIELD_COUNT + 7)
            .map(|i| format!("${i}"))
            .collect::<Vec<_>>()
            .join(", ");
        let insert_sql = format!(
            "INSERT INTO {DESTINATION_FEEDS_TABLE} \
             (entry_id, channel_id, created_at, {}, latitude, longitude, elevation, status) \
             VALUES ({placeholders})",
            feed_field_columns()
        );
        Self { pool, insert_sql }
    }
}

#[async_trait]
impl FeedSink for PgFeedSink {
    async fn insert_feed(&self, row: &FeedRow) -> Result<()> {
        let mut params: Vec<&(dyn ToSql + Sync)> = Vec::with_capacity(FEED_FIELD_COUNT + 7);
        params.push(&row.entry_id);
        params.push(&row.channel_id);
        params.push(&row.created_at);
        for field in &row.fields {
            params.push(field);
        }
        params.push(&row.latitude);
        params.push(&row.longitude);
        params.push(&row.elevation);
        params.push(&row.status);

        let client = self.pool.get().await?;
        client
            .execute(self.insert_sql.as_str(), &params)
            .await
            .map_err(|e| {
                Error::database_with_source(format!("failed to insert entry {}", row.entry_id), e)
            })?;

        Ok(())
    }

    async fn append_sync_log(&self, entry: &SyncLogEntry) -> Result<()> {
        let processed = i64::try_from(entry.processed).unwrap_or(i64::MAX);
        let client = self.pool.get().await?;
        client
            .execute(
                &format!(
                    "INSERT INTO {SYNC_LOG_TABLE} (processed, last_id, message, logged_at) \
                     VALUES ($1, $2, $3, $4)"
                ),
                &[&processed, &entry.last_id, &entry.message, &entry.logged_at],
            )
            .await
            .map_err(|e| Error::database_with_source("failed to append sync log", e))?;

        Ok(())
    }

    async fn max_entry_id(&self) -> Result<Option<i64>> {
        let client = self.pool.get().await?;
        let row = client
            .query_one(
                &format!("SELECT MAX(entry_id) FROM {DESTINATION_FEEDS_TABLE}"),
                &[],
            )
            .await
            .map_err(|e| Error::database_with_source("failed to read destination cursor", e))?;

        Ok(row.get::<_, Option<i64>>(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feed_field_columns() {
        let columns = feed_field_columns();
        assert!(columns.starts_with("field1, field2"));
        assert!(columns.ends_with("field20"));
        assert_eq!(columns.split(", ").count(), FEED_FIELD_COUNT);
    }

    #[test]
    fn test_insert_sql_placeholder_count() {
        let mut cfg = PgConfig::new();
        cfg.url = Some("postgresql://localhost/feedsync_test".to_string());
        let pool = cfg.create_pool(Some(Runtime::Tokio1), NoTls).unwrap();

        let sink = PgFeedSink::new(pool);
        assert!(sink.insert_sql.contains("$27)"));
        assert!(!sink.insert_sql.contains("$28"));
    }
}
