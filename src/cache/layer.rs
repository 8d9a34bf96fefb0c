//! Cache layer that orchestrates caching logic with network fetching.

use chrono::Duration;
use color_eyre::Result;
use serde_json::Value;
use std::future::Future;
use tracing::{info, warn};

use super::storage::CacheStorage;
use super::store::{EntityCache, DEFAULT_STALE_AFTER};
use super::types::{CacheItem, CacheResult, EntityType};

/// Cache layer that manages caching logic and network fetching.
///
/// This layer sits between the application and the backend client,
/// providing transparent caching with offline support.
pub struct CacheLayer<S: CacheStorage> {
  cache: EntityCache<S>,
  /// How long before cached data is considered stale
  stale_time: Duration,
}

impl<S: CacheStorage> CacheLayer<S> {
  /// Create a new cache layer over the given cache.
  pub fn new(cache: EntityCache<S>) -> Self {
    Self {
      cache,
      stale_time: DEFAULT_STALE_AFTER,
    }
  }

  /// Set the stale time for cached data.
  pub fn with_stale_time(mut self, stale_time: Duration) -> Self {
    self.stale_time = stale_time;
    self
  }

  /// Fetch every record of a type with a cache-first strategy.
  ///
  /// 1. If the last sync is fresh, serve the cache
  /// 2. Otherwise fetch from the backend and store the result
  /// 3. On backend failure, serve whatever is cached (offline mode)
  /// 4. With nothing cached either, the backend error is returned
  pub async fn fetch_all<F, Fut>(
    &self,
    entity_type: EntityType,
    fetcher: F,
  ) -> Result<CacheResult<Vec<Value>>>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Vec<CacheItem>>>,
  {
    if !self.cache.is_cache_stale(entity_type, self.stale_time) {
      let cached = self.cache.get_all_cached_entities(entity_type);
      return Ok(CacheResult::from_cache(
        cached,
        self.cache.last_sync(entity_type),
      ));
    }

    match fetcher().await {
      Ok(items) => {
        let data: Vec<Value> = items.iter().map(|item| item.data.clone()).collect();
        let written = self.cache.cache_entities(entity_type, items);
        info!(%entity_type, fetched = data.len(), written, "refreshed cache from backend");
        Ok(CacheResult::from_network(data))
      }
      Err(e) => {
        let cached = self.cache.get_all_cached_entities(entity_type);
        if cached.is_empty() {
          return Err(e);
        }

        // Network failed, return stale cache (offline mode)
        warn!(%entity_type, "Backend fetch failed, serving cached data: {}", e);
        Ok(CacheResult::offline(
          cached,
          self.cache.last_sync(entity_type),
        ))
      }
    }
  }
}

impl<S: CacheStorage> Clone for CacheLayer<S> {
  fn clone(&self) -> Self {
    Self {
      cache: self.cache.clone(),
      stale_time: self.stale_time,
    }
  }
}
