//! Active channel registry
//!
//! Channels are re-read from the database on every cycle; there is no cache.

use std::sync::Arc;

use crate::error::Result;
use crate::models::Channel;
use crate::storage::ChannelRepository;

/// Source of the channels enabled for polling
#[derive(Clone)]
pub struct ActiveChannelRegistry {
    channels: Arc<dyn ChannelRepository>,
}

impl ActiveChannelRegistry {
    pub fn new(channels: Arc<dyn ChannelRepository>) -> Self {
        Self { channels }
    }

    /// Channels to poll this cycle. An empty list means nothing to do.
    pub async fn get_active_channels(&self) -> Result<Vec<Channel>> {
        let channels = self.channels.active_channels().await?;
        tracing::debug!(count = channels.len(), "Loaded active channels");
        Ok(channels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryChannelStore;

    #[tokio::test]
    async fn test_empty_registry_is_not_an_error() {
        let registry = ActiveChannelRegistry::new(Arc::new(MemoryChannelStore::new()));
        assert!(registry.get_active_channels().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_registry_returns_channels() {
        let store = MemoryChannelStore::with_channels(vec![
            Channel::new(1, "a"),
            Channel::new(2, "b"),
        ]);
        let registry = ActiveChannelRegistry::new(Arc::new(store));

        let channels = registry.get_active_channels().await.unwrap();
        assert_eq!(channels, vec![Channel::new(1, "a"), Channel::new(2, "b")]);
    }
}
