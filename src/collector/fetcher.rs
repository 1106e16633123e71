//! Telemetry API client
//!
//! Fetches one channel from the remote API and reconciles its device status
//! with the stored copy:
//! - bounded request timeout (5 s by default)
//! - strict `{result: "success", channel: {...}}` response validation
//! - status written only when [`has_significant_change`] says so
//!
//! Transport and timeout errors are returned unchanged. Retrying is the
//! supervisor's business (the next tick), not the fetcher's.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde_json::Value;
use url::Url;

use super::differ::has_significant_change;
use crate::config::{ApiConfig, UrlStyle};
use crate::error::{Error, Result};
use crate::metrics;
use crate::models::ChannelSnapshot;
use crate::storage::ChannelRepository;

/// Anything that can produce a [`ChannelSnapshot`] for a channel
#[async_trait]
pub trait ChannelDataSource: Send + Sync {
    async fn fetch_channel_data(&self, channel_id: i64, api_key: &str) -> Result<ChannelSnapshot>;
}

/// Fetches channels over HTTP and persists changed device status
pub struct ChannelFetcher {
    /// HTTP client with the configured timeout
    client: Client,

    /// API base URL
    base_url: Url,

    /// How channel id and key are put into the URL
    url_style: UrlStyle,

    /// Where device status is stored
    channels: Arc<dyn ChannelRepository>,
}

impl ChannelFetcher {
    /// Create a fetcher from the API configuration
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` for an unparseable base URL and
    /// `Error::Http` if the HTTP client cannot be built.
    pub fn new(config: &ApiConfig, channels: Arc<dyn ChannelRepository>) -> Result<Self> {
        let base_url = Url::parse(&config.base_url)
            .map_err(|e| Error::config(format!("invalid api.base_url '{}': {e}", config.base_url)))?;

        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .gzip(true)
            .user_agent(format!("feedsync/{}", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            base_url,
            url_style: config.url_style,
            channels,
        })
    }

    /// Build the request URL for a channel
    pub fn channel_url(&self, channel_id: i64, api_key: &str) -> Url {
        let id = channel_id.to_string();
        match self.url_style {
            UrlStyle::Query => {
                let mut url = self.base_url.clone();
                url.query_pairs_mut()
                    .append_pair("id", &id)
                    .append_pair("auth_key", api_key);
                url
            }
            UrlStyle::Path => {
                let mut url = self.base_url.clone();
                // Url::path_segments_mut only fails for cannot-be-a-base URLs,
                // which Url::parse of an http(s) base never yields.
                if let Ok(mut segments) = url.path_segments_mut() {
                    segments.pop_if_empty().push("channels").push(&id);
                }
                url.query_pairs_mut().append_pair("api_key", api_key);
                url
            }
        }
    }

    /// Pull the `channel` object out of a decoded response body
    fn extract_channel(body: Value, status: reqwest::StatusCode) -> Result<Value> {
        let Value::Object(mut body) = body else {
            return Err(Error::validation_with_status(
                "response body is not a JSON object",
                status,
            ));
        };

        if body.get("result").and_then(Value::as_str) != Some("success") {
            return Err(Error::validation_with_status(
                "response result is not \"success\"",
                status,
            ));
        }

        match body.remove("channel") {
            Some(channel @ Value::Object(_)) => Ok(channel),
            _ => Err(Error::validation_with_status(
                "response carries no channel object",
                status,
            )),
        }
    }

    /// Write the fetched status if it differs from the stored one
    async fn reconcile_status(&self, channel_id: i64, status: &Value) -> Result<bool> {
        let changed = match self.channels.stored_status(channel_id).await? {
            Some(stored) => has_significant_change(&stored, status),
            None => true,
        };

        if !changed {
            tracing::debug!(channel_id, "Device status unchanged");
            return Ok(false);
        }

        self.channels
            .update_status(channel_id, status, Utc::now())
            .await?;
        metrics::record_status_write();
        tracing::info!(channel_id, "Device status updated");
        Ok(true)
    }
}

#[async_trait]
impl ChannelDataSource for ChannelFetcher {
    async fn fetch_channel_data(&self, channel_id: i64, api_key: &str) -> Result<ChannelSnapshot> {
        let url = self.channel_url(channel_id, api_key);
        tracing::debug!(channel_id, "Fetching channel");

        let response = self.client.get(url).send().await?;
        let status = response.status();
        let bytes = response.bytes().await?;

        let body: Value = serde_json::from_slice(&bytes).map_err(|_| {
            Error::validation_with_status("response body is not valid JSON", status)
        })?;
        let channel = Self::extract_channel(body, status)?;

        let mut snapshot = ChannelSnapshot {
            channel_id,
            channel,
            status_written: false,
        };

        if let Some(device_status) = snapshot.status().cloned() {
            snapshot.status_written = self.reconcile_status(channel_id, &device_status).await?;
        }

        Ok(snapshot)
    }
}
