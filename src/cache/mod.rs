//! Offline entity cache.
//!
//! This module keeps remote records available for offline reads:
//! - One partition per entity type (work orders, customers, properties, invoices)
//! - Last-write-wins records stamped with their write time
//! - Per-type sync metadata that drives staleness checks
//! - Age-based pruning to bound local storage
//! - Cache-first fetching that falls back to cached data when the backend is unreachable

mod layer;
mod storage;
mod store;
mod types;

pub use layer::CacheLayer;
pub use storage::{CacheStorage, NoopStorage, SqliteStorage};
pub use store::{EntityCache, DEFAULT_RETENTION, DEFAULT_STALE_AFTER};
pub use types::{CacheItem, CacheResult, EntityType};
