//! Best-effort entity cache.
//!
//! Storage failures are logged here and turned into empty results. Callers
//! never see a cache error; a broken cache behaves like an empty one.

use chrono::{DateTime, Duration, SecondsFormat};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

use super::storage::CacheStorage;
use super::types::{CacheItem, CacheMetadata, CacheStats, CachedEntity, EntityStats, EntityType};
use crate::clock::{Clock, SystemClock};

/// Default age after which cached data should be refetched.
pub const DEFAULT_STALE_AFTER: Duration = Duration::minutes(5);

/// Default age after which cached records are pruned.
pub const DEFAULT_RETENTION: Duration = Duration::hours(24);

pub struct EntityCache<S: CacheStorage> {
  storage: Arc<S>,
  clock: Arc<dyn Clock>,
}

impl<S: CacheStorage> EntityCache<S> {
  pub fn new(storage: S) -> Self {
    Self {
      storage: Arc::new(storage),
      clock: Arc::new(SystemClock),
    }
  }

  /// Use a different time source.
  #[allow(dead_code)]
  pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
    self.clock = clock;
    self
  }

  fn record(&self, id: String, data: Value, last_modified: Option<String>) -> CachedEntity {
    let now = self.clock.now();
    CachedEntity {
      id,
      data,
      timestamp: now.timestamp_millis(),
      last_modified: last_modified
        .unwrap_or_else(|| now.to_rfc3339_opts(SecondsFormat::Millis, true)),
    }
  }

  /// Write or overwrite one record. Returns whether it was stored.
  pub fn cache_entity(
    &self,
    entity_type: EntityType,
    id: &str,
    data: Value,
    last_modified: Option<String>,
  ) -> bool {
    let entity = self.record(id.to_string(), data, last_modified);

    match self.storage.put_entity(entity_type, &entity) {
      Ok(()) => {
        debug!(%entity_type, id, "cached entity");
        true
      }
      Err(e) => {
        warn!(%entity_type, id, "Failed to cache entity: {}", e);
        false
      }
    }
  }

  /// Bulk upsert in input order, then record the sync in metadata.
  ///
  /// Returns how many records were written. A failed bulk write leaves the
  /// metadata alone, so the type stays stale.
  pub fn cache_entities(&self, entity_type: EntityType, items: Vec<CacheItem>) -> usize {
    let entities: Vec<CachedEntity> = items
      .into_iter()
      .map(|item| self.record(item.id, item.data, item.last_modified))
      .collect();

    let written = match self.storage.put_entities(entity_type, &entities) {
      Ok(written) => written,
      Err(e) => {
        warn!(%entity_type, "Failed to cache entities: {}", e);
        return 0;
      }
    };

    let metadata = CacheMetadata {
      entity_type,
      last_sync: self.clock.now_millis(),
      count: written as u64,
    };
    if let Err(e) = self.storage.put_metadata(&metadata) {
      warn!(%entity_type, "Failed to update cache metadata: {}", e);
    }

    debug!(%entity_type, written, total = entities.len(), "cached entities");
    written
  }

  /// Stored data for `id`, or `None` when absent or unreadable.
  pub fn get_cached_entity(&self, entity_type: EntityType, id: &str) -> Option<Value> {
    match self.storage.get_entity(entity_type, id) {
      Ok(entity) => entity.map(|e| e.data),
      Err(e) => {
        warn!(%entity_type, id, "Failed to read cached entity: {}", e);
        None
      }
    }
  }

  /// Data of every record of a type, unordered.
  pub fn get_all_cached_entities(&self, entity_type: EntityType) -> Vec<Value> {
    self
      .get_all_records(entity_type)
      .into_iter()
      .map(|e| e.data)
      .collect()
  }

  /// Full records of a type, unordered.
  pub fn get_all_records(&self, entity_type: EntityType) -> Vec<CachedEntity> {
    self.storage.get_all(entity_type).unwrap_or_else(|e| {
      warn!(%entity_type, "Failed to read cached entities: {}", e);
      Vec::new()
    })
  }

  /// Remove every record and the metadata of one type.
  pub fn clear_entity_cache(&self, entity_type: EntityType) -> bool {
    match self.storage.clear(entity_type) {
      Ok(()) => true,
      Err(e) => {
        warn!(%entity_type, "Failed to clear cache: {}", e);
        false
      }
    }
  }

  /// Remove everything. Returns false if any type failed to clear.
  pub fn clear_all_caches(&self) -> bool {
    EntityType::ALL
      .into_iter()
      .map(|t| self.clear_entity_cache(t))
      .fold(true, |all, ok| all && ok)
  }

  pub fn get_metadata(&self, entity_type: EntityType) -> Option<CacheMetadata> {
    self.storage.get_metadata(entity_type).unwrap_or_else(|e| {
      warn!(%entity_type, "Failed to read cache metadata: {}", e);
      None
    })
  }

  /// Time of the last bulk sync for a type.
  pub fn last_sync(&self, entity_type: EntityType) -> Option<DateTime<chrono::Utc>> {
    self
      .get_metadata(entity_type)
      .and_then(|m| DateTime::from_timestamp_millis(m.last_sync))
  }

  /// Live record count and last sync time for every type.
  pub fn get_cache_stats(&self) -> CacheStats {
    EntityType::ALL
      .into_iter()
      .map(|entity_type| {
        let count = self.storage.count(entity_type).unwrap_or_else(|e| {
          warn!(%entity_type, "Failed to count cached entities: {}", e);
          0
        });
        let last_sync = self.get_metadata(entity_type).map(|m| m.last_sync);
        (entity_type, EntityStats { count, last_sync })
      })
      .collect()
  }

  /// True when the type was never synced or its last sync is older than `max_age`.
  pub fn is_cache_stale(&self, entity_type: EntityType, max_age: Duration) -> bool {
    match self.get_metadata(entity_type) {
      Some(metadata) => self.clock.now_millis() - metadata.last_sync > max_age.num_milliseconds(),
      None => true,
    }
  }

  /// Delete records written more than `max_age` ago. Returns how many went.
  pub fn prune_old_cache_entries(&self, entity_type: EntityType, max_age: Duration) -> usize {
    let cutoff = self.clock.now_millis() - max_age.num_milliseconds();

    match self.storage.delete_older_than(entity_type, cutoff) {
      Ok(pruned) => {
        if pruned > 0 {
          debug!(%entity_type, pruned, "pruned old cache entries");
        }
        pruned
      }
      Err(e) => {
        warn!(%entity_type, "Failed to prune cache: {}", e);
        0
      }
    }
  }
}

impl<S: CacheStorage> Clone for EntityCache<S> {
  fn clone(&self) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
      clock: Arc::clone(&self.clock),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::storage::SqliteStorage;
  use crate::clock::ManualClock;
  use crate::db::{Database, DbLocation};
  use chrono::{TimeZone, Utc};
  use color_eyre::{eyre::eyre, Result};
  use serde_json::json;

  fn cache_with_clock() -> (EntityCache<SqliteStorage>, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(
      Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap(),
    ));
    let cache = EntityCache::new(SqliteStorage::new(Database::in_memory()))
      .with_clock(clock.clone());
    (cache, clock)
  }

  /// Storage whose every call fails.
  struct BrokenStorage;

  impl CacheStorage for BrokenStorage {
    fn put_entity(&self, _: EntityType, _: &CachedEntity) -> Result<()> {
      Err(eyre!("disk full"))
    }
    fn put_entities(&self, _: EntityType, _: &[CachedEntity]) -> Result<usize> {
      Err(eyre!("disk full"))
    }
    fn get_entity(&self, _: EntityType, _: &str) -> Result<Option<CachedEntity>> {
      Err(eyre!("disk full"))
    }
    fn get_all(&self, _: EntityType) -> Result<Vec<CachedEntity>> {
      Err(eyre!("disk full"))
    }
    fn count(&self, _: EntityType) -> Result<u64> {
      Err(eyre!("disk full"))
    }
    fn delete_older_than(&self, _: EntityType, _: i64) -> Result<usize> {
      Err(eyre!("disk full"))
    }
    fn clear(&self, _: EntityType) -> Result<()> {
      Err(eyre!("disk full"))
    }
    fn get_metadata(&self, _: EntityType) -> Result<Option<CacheMetadata>> {
      Err(eyre!("disk full"))
    }
    fn put_metadata(&self, _: &CacheMetadata) -> Result<()> {
      Err(eyre!("disk full"))
    }
  }

  #[test]
  fn test_cache_entity_round_trip() {
    let (cache, _) = cache_with_clock();
    let data = json!({"name": "Acme", "tags": ["a", "b"], "balance": 12.5});

    for entity_type in EntityType::ALL {
      assert!(cache.cache_entity(entity_type, "id-1", data.clone(), None));
      assert_eq!(cache.get_cached_entity(entity_type, "id-1"), Some(data.clone()));
    }
  }

  #[test]
  fn test_missing_entity_is_none() {
    let (cache, _) = cache_with_clock();
    assert_eq!(cache.get_cached_entity(EntityType::Customers, "nope"), None);
  }

  #[test]
  fn test_last_modified_defaults_to_now() {
    let (cache, _) = cache_with_clock();
    cache.cache_entity(EntityType::WorkOrders, "w1", json!({}), None);
    cache.cache_entity(
      EntityType::WorkOrders,
      "w2",
      json!({}),
      Some("2025-12-31T23:00:00Z".to_string()),
    );

    let mut records = cache.get_all_records(EntityType::WorkOrders);
    records.sort_by(|a, b| a.id.cmp(&b.id));
    assert_eq!(records[0].last_modified, "2026-03-01T12:00:00.000Z");
    assert_eq!(records[1].last_modified, "2025-12-31T23:00:00Z");
    assert_eq!(records[0].timestamp, records[1].timestamp);
  }

  #[test]
  fn test_cache_entities_returns_same_data_set() {
    let (cache, _) = cache_with_clock();
    let items: Vec<CacheItem> = (0..5)
      .rev()
      .map(|i| CacheItem::new(format!("p{}", i), json!({"n": i})))
      .collect();
    let expected: Vec<Value> = items.iter().map(|i| i.data.clone()).collect();

    assert_eq!(cache.cache_entities(EntityType::Properties, items), 5);

    let mut stored = cache.get_all_cached_entities(EntityType::Properties);
    let mut expected = expected;
    stored.sort_by_key(|v| v["n"].as_i64());
    expected.sort_by_key(|v| v["n"].as_i64());
    assert_eq!(stored, expected);
  }

  #[test]
  fn test_cache_entities_updates_metadata() {
    let (cache, clock) = cache_with_clock();
    cache.cache_entities(
      EntityType::Invoices,
      vec![CacheItem::new("i1", json!(1)), CacheItem::new("i2", json!(2))],
    );

    let metadata = cache.get_metadata(EntityType::Invoices).unwrap();
    assert_eq!(metadata.count, 2);
    assert_eq!(metadata.last_sync, clock.now_millis());
    assert_eq!(cache.last_sync(EntityType::Invoices), Some(clock.now()));
  }

  #[test]
  fn test_failed_bulk_write_keeps_type_stale() {
    let db = Database::in_memory();
    let cache = EntityCache::new(SqliteStorage::new(db.clone()));
    db.with_conn(|conn| {
      conn
        .execute_batch("DROP TABLE customers")
        .map_err(|e| eyre!("{}", e))
    })
    .unwrap();

    let written = cache.cache_entities(EntityType::Customers, vec![CacheItem::new("c1", json!({}))]);
    assert_eq!(written, 0);
    assert!(cache.get_metadata(EntityType::Customers).is_none());
    assert!(cache.is_cache_stale(EntityType::Customers, DEFAULT_STALE_AFTER));
  }

  #[test]
  fn test_staleness_window() {
    let (cache, clock) = cache_with_clock();
    assert!(cache.is_cache_stale(EntityType::Customers, DEFAULT_STALE_AFTER));

    cache.cache_entities(EntityType::Customers, vec![CacheItem::new("c1", json!({}))]);
    assert!(!cache.is_cache_stale(EntityType::Customers, DEFAULT_STALE_AFTER));

    clock.advance(Duration::minutes(5));
    assert!(!cache.is_cache_stale(EntityType::Customers, DEFAULT_STALE_AFTER));

    clock.advance(Duration::milliseconds(1));
    assert!(cache.is_cache_stale(EntityType::Customers, DEFAULT_STALE_AFTER));
  }

  #[test]
  fn test_single_writes_do_not_refresh_staleness() {
    let (cache, _) = cache_with_clock();
    cache.cache_entity(EntityType::Customers, "c1", json!({}), None);
    assert!(cache.is_cache_stale(EntityType::Customers, DEFAULT_STALE_AFTER));
  }

  #[test]
  fn test_cleared_cache_is_stale() {
    let (cache, _) = cache_with_clock();
    cache.cache_entities(EntityType::WorkOrders, vec![CacheItem::new("w1", json!({}))]);
    assert!(!cache.is_cache_stale(EntityType::WorkOrders, DEFAULT_STALE_AFTER));

    assert!(cache.clear_entity_cache(EntityType::WorkOrders));
    assert!(cache.is_cache_stale(EntityType::WorkOrders, DEFAULT_STALE_AFTER));
    assert!(cache.get_all_cached_entities(EntityType::WorkOrders).is_empty());
  }

  #[test]
  fn test_prune_removes_only_old_entries() {
    let (cache, clock) = cache_with_clock();
    cache.cache_entity(EntityType::WorkOrders, "old", json!("old"), None);
    clock.advance(Duration::hours(20));
    cache.cache_entity(EntityType::WorkOrders, "recent", json!("recent"), None);
    clock.advance(Duration::hours(5));

    let pruned = cache.prune_old_cache_entries(EntityType::WorkOrders, DEFAULT_RETENTION);
    assert_eq!(pruned, 1);
    assert_eq!(cache.get_cached_entity(EntityType::WorkOrders, "old"), None);
    assert_eq!(
      cache.get_cached_entity(EntityType::WorkOrders, "recent"),
      Some(json!("recent"))
    );
  }

  #[test]
  fn test_prune_empty_store() {
    let (cache, _) = cache_with_clock();
    assert_eq!(
      cache.prune_old_cache_entries(EntityType::Invoices, DEFAULT_RETENTION),
      0
    );
  }

  #[test]
  fn test_clear_all_caches() {
    let (cache, _) = cache_with_clock();
    cache.cache_entity(EntityType::Customers, "c1", json!({"name": "Acme"}), None);
    cache.cache_entities(EntityType::Invoices, vec![CacheItem::new("i1", json!({}))]);

    assert!(cache.clear_all_caches());

    assert_eq!(cache.get_cached_entity(EntityType::Customers, "c1"), None);
    assert!(cache
      .get_cache_stats()
      .values()
      .all(|s| *s == EntityStats::default()));
  }

  #[test]
  fn test_cache_stats() {
    let (cache, clock) = cache_with_clock();
    cache.cache_entities(
      EntityType::Customers,
      vec![CacheItem::new("c1", json!({})), CacheItem::new("c2", json!({}))],
    );
    cache.cache_entity(EntityType::Customers, "c3", json!({}), None);

    let stats = cache.get_cache_stats();
    assert_eq!(stats.len(), EntityType::ALL.len());
    assert_eq!(
      stats[&EntityType::Customers],
      EntityStats {
        count: 3,
        last_sync: Some(clock.now_millis()),
      }
    );
    assert_eq!(stats[&EntityType::WorkOrders], EntityStats::default());
  }

  #[test]
  fn test_storage_errors_are_swallowed() {
    let cache = EntityCache::new(BrokenStorage);

    assert!(!cache.cache_entity(EntityType::Customers, "c1", json!({}), None));
    assert_eq!(
      cache.cache_entities(EntityType::Customers, vec![CacheItem::new("c1", json!({}))]),
      0
    );
    assert_eq!(cache.get_cached_entity(EntityType::Customers, "c1"), None);
    assert!(cache.get_all_cached_entities(EntityType::Customers).is_empty());
    assert!(cache.is_cache_stale(EntityType::Customers, DEFAULT_STALE_AFTER));
    assert_eq!(
      cache.prune_old_cache_entries(EntityType::Customers, DEFAULT_RETENTION),
      0
    );
    assert!(!cache.clear_all_caches());
    assert_eq!(
      cache.get_cache_stats()[&EntityType::Customers],
      EntityStats::default()
    );
  }

  #[test]
  fn test_cache_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::new(DbLocation::File(dir.path().join("offline.db")));
    let cache = EntityCache::new(SqliteStorage::new(db.clone()));

    cache.cache_entity(EntityType::Customers, "c1", json!({"name": "Acme"}), None);
    db.close();

    assert_eq!(
      cache.get_cached_entity(EntityType::Customers, "c1"),
      Some(json!({"name": "Acme"}))
    );
  }
}
