//! feedsync - telemetry channel collector and feed replicator
//!
//! Two independent pipelines share this crate:
//!
//! - **Collection**: a [`collector::Supervisor`] polls the telemetry API for
//!   every active channel on a fixed interval and writes a channel's device
//!   status only when it materially changed.
//! - **Replication**: a [`sync::BatchReplicator`] copies newly arrived feed
//!   rows from a source database to a destination database in cursor-ordered
//!   batches.
//!
//! # Architecture
//!
//! - [`config`] - Configuration sources and settings
//! - [`collector`] - Status differ, fetcher, registry, cycle, supervisor
//! - [`sync`] - Cursor-based batch replication
//! - [`storage`] - Repository traits with PostgreSQL and in-memory backends
//! - [`models`] - Core data structures
//! - [`metrics`] - Prometheus counters
//! - [`utils`] - Retry with backoff
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use feedsync::collector::{ActiveChannelRegistry, ChannelFetcher, CollectionCycle, LoggingConsumer, Supervisor};
//! use feedsync::config::{ConfigSource, EnvConfigSource};
//! use feedsync::storage::MemoryChannelStore;
//!
//! #[tokio::main]
//! async fn main() -> feedsync::error::Result<()> {
//!     let config = EnvConfigSource.load_validated()?;
//!     let channels = Arc::new(MemoryChannelStore::new());
//!     let fetcher = ChannelFetcher::new(&config.api, channels.clone())?;
//!     let cycle = CollectionCycle::new(
//!         ActiveChannelRegistry::new(channels),
//!         Arc::new(fetcher),
//!         Arc::new(LoggingConsumer),
//!     );
//!
//!     let mut supervisor = Supervisor::new(cycle, &config.collector);
//!     supervisor.start().await;
//!     // ...
//!     supervisor.stop().await;
//!     Ok(())
//! }
//! ```

pub mod collector;
pub mod config;
pub mod error;
pub mod metrics;
pub mod models;
pub mod storage;
pub mod sync;
pub mod utils;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::collector::{
        has_significant_change, ActiveChannelRegistry, ChannelConsumer, ChannelDataSource,
        ChannelFetcher, CollectionCycle, CollectorStats, Supervisor,
    };
    pub use crate::config::{Config, ConfigSource, EnvConfigSource, FileConfigSource};
    pub use crate::error::{Error, ErrorCategory, Result};
    pub use crate::models::{Channel, ChannelSnapshot, FeedRecord, FeedRow, SyncReport};
    pub use crate::storage::{ChannelRepository, FeedSink, FeedSource};
    pub use crate::sync::BatchReplicator;
}

pub use models::{Channel, SyncReport};
