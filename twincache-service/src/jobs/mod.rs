//! Background Jobs for the twincache service
//!
//! - `cache_refresh`: builds the twin name cache on startup and keeps it fresh
//!
//! # Usage
//!
//! ```ignore
//! use twincache_service::jobs::{cache_refresh_task, RefreshJobConfig};
//! use tokio::sync::watch;
//!
//! let (shutdown_tx, shutdown_rx) = watch::channel(false);
//! tokio::spawn(cache_refresh_task(Arc::clone(&cache), RefreshJobConfig::default(), shutdown_rx));
//!
//! // On shutdown
//! let _ = shutdown_tx.send(true);
//! ```

pub mod cache_refresh;

pub use cache_refresh::{
    cache_refresh_task, CacheRefreshMetrics, CacheRefreshSnapshot, RefreshJobConfig,
};
