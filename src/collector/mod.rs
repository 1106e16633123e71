//! Scheduled collection of channel data from the telemetry API
//!
//! ```text
//! Supervisor ──▶ CollectionCycle ──▶ ActiveChannelRegistry
//!                      │
//!                      └──▶ ChannelFetcher ──▶ has_significant_change
//!                                 │
//!                                 └──▶ (on change) status update
//! ```
//!
//! # Modules
//!
//! - [`differ`] - Device status change detection
//! - [`fetcher`] - Telemetry API client and status reconciliation
//! - [`registry`] - Active channel lookup
//! - [`cycle`] - One pass over all active channels
//! - [`supervisor`] - Interval scheduling, overlap guard, metrics

pub mod cycle;
pub mod differ;
pub mod fetcher;
pub mod registry;
pub mod supervisor;

pub use cycle::{ChannelConsumer, ChannelFailure, CollectionCycle, CycleOutcome, LoggingConsumer};
pub use differ::{has_significant_change, DeviceStatus, StatusInput, MONITORED_FIELDS};
pub use fetcher::{ChannelDataSource, ChannelFetcher};
pub use registry::ActiveChannelRegistry;
pub use supervisor::{CollectionMetrics, CollectorStats, Supervisor, SupervisorState};
