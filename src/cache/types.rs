//! Core types for the entity cache.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Report};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Kinds of remote records kept in the offline cache.
///
/// Each type is its own partition; ids only need to be unique within one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
  WorkOrders,
  Customers,
  Properties,
  Invoices,
}

impl EntityType {
  pub const ALL: [EntityType; 4] = [
    EntityType::WorkOrders,
    EntityType::Customers,
    EntityType::Properties,
    EntityType::Invoices,
  ];

  /// Table holding this partition. Also the name used in metadata rows.
  pub fn table_name(self) -> &'static str {
    match self {
      Self::WorkOrders => "work_orders",
      Self::Customers => "customers",
      Self::Properties => "properties",
      Self::Invoices => "invoices",
    }
  }
}

impl fmt::Display for EntityType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.table_name())
  }
}

impl FromStr for EntityType {
  type Err = Report;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    Self::ALL
      .into_iter()
      .find(|t| t.table_name() == s)
      .ok_or_else(|| {
        eyre!(
          "Unknown entity type '{}' (expected one of: work_orders, customers, properties, invoices)",
          s
        )
      })
  }
}

/// A single cached record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedEntity {
  pub id: String,
  pub data: Value,
  /// When the record was written to the cache (epoch ms)
  pub timestamp: i64,
  /// Remote modification time (RFC 3339)
  pub last_modified: String,
}

/// Input element for bulk cache writes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheItem {
  pub id: String,
  pub data: Value,
  #[serde(default)]
  pub last_modified: Option<String>,
}

impl CacheItem {
  pub fn new(id: impl Into<String>, data: Value) -> Self {
    Self {
      id: id.into(),
      data,
      last_modified: None,
    }
  }
}

/// Sync bookkeeping for one entity type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheMetadata {
  pub entity_type: EntityType,
  /// Time of the last bulk write (epoch ms)
  pub last_sync: i64,
  /// Records written by that bulk write
  pub count: u64,
}

/// Per-type summary reported by `EntityCache::stats`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityStats {
  pub count: u64,
  pub last_sync: Option<i64>,
}

pub type CacheStats = BTreeMap<EntityType, EntityStats>;

/// Result from a cache-first fetch, including data and metadata about the source.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  /// The actual data
  pub data: T,
  /// Where the data came from
  pub source: CacheSource,
  /// Last bulk sync of the cached data (if from cache)
  pub synced_at: Option<DateTime<Utc>>,
}

impl<T> CacheResult<T> {
  /// Create a new cache result from fresh network data.
  pub fn from_network(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Network,
      synced_at: None,
    }
  }

  /// Create a new cache result from cached data that is still fresh.
  pub fn from_cache(data: T, synced_at: Option<DateTime<Utc>>) -> Self {
    Self {
      data,
      source: CacheSource::CacheFresh,
      synced_at,
    }
  }

  /// Create a new cache result for offline mode.
  pub fn offline(data: T, synced_at: Option<DateTime<Utc>>) -> Self {
    Self {
      data,
      source: CacheSource::Offline,
      synced_at,
    }
  }
}

/// Indicates where fetched data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fresh data from network
  Network,
  /// Data from cache, still considered fresh
  CacheFresh,
  /// Offline mode - network unavailable, serving cached data
  Offline,
}

impl fmt::Display for CacheSource {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Network => f.write_str("network"),
      Self::CacheFresh => f.write_str("cache"),
      Self::Offline => f.write_str("offline"),
    }
  }
}
