//! twincache Service - Twin Name Cache Coordination
//!
//! Publishes the set of known device tag and reported-property names as one
//! shared record in an eventually consistent key-value store. Any number of
//! instances cooperate through etag-conditioned writes only:
//!
//! - [`TwinCache::try_rebuild_cache`] rebuilds the record from upstream under
//!   an advisory lock stored inside the record itself
//! - [`TwinCache::set_cache`] unions caller-supplied names into the record
//! - [`TwinCache::get_cache`] reads it
//!
//! The [`jobs`] module keeps the record fresh in the background.

pub mod cache;
pub mod config;
pub mod constants;
pub mod discovery;
pub mod jobs;
pub mod merge;
pub mod rebuild;
pub mod telemetry;

pub use cache::TwinCache;
pub use config::ServiceConfig;
pub use constants::CacheLocation;
pub use discovery::NameDiscovery;
pub use jobs::{cache_refresh_task, CacheRefreshMetrics, RefreshJobConfig};
pub use merge::merge_into_store;
pub use rebuild::{need_build, BuildDecision, RebuildCoordinator};
pub use telemetry::{init_tracing, TelemetryConfig};
