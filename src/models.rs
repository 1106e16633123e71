//! Core data structures shared by the collector and the replicator

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// Number of generic payload fields carried by a feed entry
pub const FEED_FIELD_COUNT: usize = 20;

// ============================================================================
// Collector types
// ============================================================================

/// A pollable remote telemetry endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub channel_id: i64,
    pub api_key: String,
}

impl Channel {
    pub fn new(channel_id: i64, api_key: impl Into<String>) -> Self {
        Self {
            channel_id,
            api_key: api_key.into(),
        }
    }
}

/// Result of fetching one channel from the telemetry API
#[derive(Debug, Clone)]
pub struct ChannelSnapshot {
    /// Channel that was fetched
    pub channel_id: i64,

    /// The `channel` object from the API response
    pub channel: Value,

    /// Whether the device status was written to the database
    pub status_written: bool,
}

impl ChannelSnapshot {
    /// The device status carried by the channel, if any
    pub fn status(&self) -> Option<&Value> {
        self.channel.get("status").filter(|v| !v.is_null())
    }

    /// Parsed last-known-values payload
    ///
    /// The API sends `last_values` either as an object or as a JSON string.
    /// A missing payload yields an empty object.
    pub fn last_values(&self) -> Result<Value> {
        match self.channel.get("last_values") {
            None | Some(Value::Null) => Ok(Value::Object(serde_json::Map::new())),
            Some(Value::String(raw)) => Ok(serde_json::from_str(raw)?),
            Some(value @ Value::Object(_)) => Ok(value.clone()),
            Some(other) => Err(Error::validation(format!(
                "last_values of channel {} is neither an object nor a JSON string: {other}",
                self.channel_id
            ))),
        }
    }
}

// ============================================================================
// Replication types
// ============================================================================

/// One sensor-feed entry as stored in the source database
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FeedRecord {
    /// Strictly increasing row identifier
    pub entry_id: i64,
    pub channel_id: i64,
    /// Seconds since the Unix epoch
    pub created_at: i64,
    /// `field1` .. `field20`
    pub fields: Vec<Option<String>>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub elevation: Option<f64>,
    pub status: Option<String>,
}

/// A feed entry ready for insertion into the destination database
#[derive(Debug, Clone, PartialEq)]
pub struct FeedRow {
    pub entry_id: i64,
    pub channel_id: i64,
    pub created_at: DateTime<Utc>,
    pub fields: [Option<String>; FEED_FIELD_COUNT],
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub elevation: Option<f64>,
    pub status: Option<String>,
}

impl TryFrom<&FeedRecord> for FeedRow {
    type Error = Error;

    fn try_from(record: &FeedRecord) -> Result<Self> {
        let created_at = DateTime::from_timestamp(record.created_at, 0).ok_or_else(|| {
            Error::validation(format!(
                "entry {} has an out-of-range timestamp: {}",
                record.entry_id, record.created_at
            ))
        })?;

        if record.fields.len() > FEED_FIELD_COUNT {
            return Err(Error::validation(format!(
                "entry {} carries {} fields, at most {FEED_FIELD_COUNT} are supported",
                record.entry_id,
                record.fields.len()
            )));
        }

        let mut fields: [Option<String>; FEED_FIELD_COUNT] = Default::default();
        for (slot, value) in fields.iter_mut().zip(&record.fields) {
            slot.clone_from(value);
        }

        Ok(Self {
            entry_id: record.entry_id,
            channel_id: record.channel_id,
            created_at,
            fields,
            latitude: record.latitude,
            longitude: record.longitude,
            elevation: record.elevation,
            status: record.status.clone(),
        })
    }
}

/// Outcome of one `sync_databases` call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    /// Rows inserted by this call
    pub processed: usize,
    /// Cursor after the call
    pub last_id: i64,
}

/// A progress line for the destination audit log
#[derive(Debug, Clone, PartialEq)]
pub struct SyncLogEntry {
    pub processed: usize,
    pub last_id: i64,
    pub message: String,
    pub logged_at: DateTime<Utc>,
}

impl SyncLogEntry {
    pub fn new(report: SyncReport) -> Self {
        Self {
            processed: report.processed,
            last_id: report.last_id,
            message: format!(
                "Synced {} records, last entry_id {}",
                report.processed, report.last_id
            ),
            logged_at: Utc::now(),
        }
    }
}
