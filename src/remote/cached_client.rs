//! Backend client wrapped with the offline entity cache.

use color_eyre::Result;
use serde_json::Value;

use crate::cache::{CacheLayer, CacheResult, CacheStorage, EntityType};

use super::client::RestClient;

/// Backend client with transparent caching support.
///
/// Reads go through the cache layer, so repeated calls inside the staleness
/// window never touch the network and an unreachable backend falls back to
/// whatever was cached last.
#[derive(Clone)]
pub struct CachedClient<S: CacheStorage> {
  inner: RestClient,
  cache: CacheLayer<S>,
}

impl<S: CacheStorage> CachedClient<S> {
  pub fn new(inner: RestClient, cache: CacheLayer<S>) -> Self {
    Self { inner, cache }
  }

  /// Get every record of a type, with caching and offline fallback.
  pub async fn get_entities(&self, entity_type: EntityType) -> Result<CacheResult<Vec<Value>>> {
    self
      .cache
      .fetch_all(entity_type, || {
        let inner = self.inner.clone();
        async move { inner.list_entities(entity_type).await }
      })
      .await
  }
}
