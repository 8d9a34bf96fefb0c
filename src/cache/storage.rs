//! Cache storage trait and SQLite implementation.

use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, OptionalExtension, Row};
use tracing::warn;

use super::types::{CacheMetadata, CachedEntity, EntityType};
use crate::db::Database;

/// Trait for cache storage backends.
///
/// Every method reports failures; deciding what to do with them is left to
/// the caller.
pub trait CacheStorage: Send + Sync {
  /// Insert or overwrite one record.
  fn put_entity(&self, entity_type: EntityType, entity: &CachedEntity) -> Result<()>;

  /// Upsert records in order, skipping rows that fail. Returns rows written.
  fn put_entities(&self, entity_type: EntityType, entities: &[CachedEntity]) -> Result<usize>;

  /// Get a single record by id.
  fn get_entity(&self, entity_type: EntityType, id: &str) -> Result<Option<CachedEntity>>;

  /// Get every record of a type, in no particular order.
  fn get_all(&self, entity_type: EntityType) -> Result<Vec<CachedEntity>>;

  /// Number of stored records of a type.
  fn count(&self, entity_type: EntityType) -> Result<u64>;

  /// Delete records whose `timestamp` is before `cutoff`. Returns rows deleted.
  fn delete_older_than(&self, entity_type: EntityType, cutoff: i64) -> Result<usize>;

  /// Remove every record and the metadata row of a type.
  fn clear(&self, entity_type: EntityType) -> Result<()>;

  fn get_metadata(&self, entity_type: EntityType) -> Result<Option<CacheMetadata>>;

  fn put_metadata(&self, metadata: &CacheMetadata) -> Result<()>;
}

/// No-op storage for when caching is disabled.
///
/// Writes are discarded and every read misses, so the cache is always stale
/// and the cache layer always goes to the backend.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopStorage;

impl CacheStorage for NoopStorage {
  fn put_entity(&self, _entity_type: EntityType, _entity: &CachedEntity) -> Result<()> {
    Ok(()) // Discard
  }

  fn put_entities(&self, _entity_type: EntityType, _entities: &[CachedEntity]) -> Result<usize> {
    Ok(0) // Nothing written
  }

  fn get_entity(&self, _entity_type: EntityType, _id: &str) -> Result<Option<CachedEntity>> {
    Ok(None) // Always miss
  }

  fn get_all(&self, _entity_type: EntityType) -> Result<Vec<CachedEntity>> {
    Ok(Vec::new())
  }

  fn count(&self, _entity_type: EntityType) -> Result<u64> {
    Ok(0)
  }

  fn delete_older_than(&self, _entity_type: EntityType, _cutoff: i64) -> Result<usize> {
    Ok(0)
  }

  fn clear(&self, _entity_type: EntityType) -> Result<()> {
    Ok(())
  }

  fn get_metadata(&self, _entity_type: EntityType) -> Result<Option<CacheMetadata>> {
    Ok(None) // Never synced
  }

  fn put_metadata(&self, _metadata: &CacheMetadata) -> Result<()> {
    Ok(()) // Discard
  }
}

/// SQLite-based cache storage implementation.
#[derive(Clone)]
pub struct SqliteStorage {
  db: Database,
}

impl SqliteStorage {
  pub fn new(db: Database) -> Self {
    Self { db }
  }
}

fn upsert_sql(entity_type: EntityType) -> String {
  format!(
    "INSERT OR REPLACE INTO {} (id, data, timestamp, last_modified) VALUES (?, ?, ?, ?)",
    entity_type.table_name()
  )
}

fn row_to_entity(row: &Row<'_>) -> rusqlite::Result<(String, String, i64, String)> {
  Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
}

fn decode_entity(
  (id, data, timestamp, last_modified): (String, String, i64, String),
) -> Result<CachedEntity> {
  let data = serde_json::from_str(&data)
    .map_err(|e| eyre!("Failed to deserialize cached entity {}: {}", id, e))?;
  Ok(CachedEntity {
    id,
    data,
    timestamp,
    last_modified,
  })
}

impl CacheStorage for SqliteStorage {
  fn put_entity(&self, entity_type: EntityType, entity: &CachedEntity) -> Result<()> {
    let data =
      serde_json::to_string(&entity.data).map_err(|e| eyre!("Failed to serialize entity: {}", e))?;

    self.db.with_conn(|conn| {
      conn
        .execute(
          &upsert_sql(entity_type),
          params![entity.id, data, entity.timestamp, entity.last_modified],
        )
        .map_err(|e| eyre!("Failed to store entity: {}", e))?;
      Ok(())
    })
  }

  fn put_entities(&self, entity_type: EntityType, entities: &[CachedEntity]) -> Result<usize> {
    self.db.with_conn(|conn| {
      let tx = conn
        .transaction()
        .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

      let mut written = 0;
      {
        let mut stmt = tx
          .prepare(&upsert_sql(entity_type))
          .map_err(|e| eyre!("Failed to prepare entity insert: {}", e))?;

        for entity in entities {
          let stored = serde_json::to_string(&entity.data)
            .map_err(|e| eyre!("Failed to serialize entity: {}", e))
            .and_then(|data| {
              stmt
                .execute(params![
                  entity.id,
                  data,
                  entity.timestamp,
                  entity.last_modified
                ])
                .map_err(|e| eyre!("Failed to store entity: {}", e))
            });

          match stored {
            Ok(_) => written += 1,
            Err(e) => warn!(%entity_type, id = %entity.id, "Skipping entity in bulk write: {}", e),
          }
        }
      }

      tx.commit()
        .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

      Ok(written)
    })
  }

  fn get_entity(&self, entity_type: EntityType, id: &str) -> Result<Option<CachedEntity>> {
    let sql = format!(
      "SELECT id, data, timestamp, last_modified FROM {} WHERE id = ?",
      entity_type.table_name()
    );

    let row = self.db.with_conn(|conn| {
      conn
        .query_row(&sql, params![id], row_to_entity)
        .optional()
        .map_err(|e| eyre!("Failed to query entity: {}", e))
    })?;

    row.map(decode_entity).transpose()
  }

  fn get_all(&self, entity_type: EntityType) -> Result<Vec<CachedEntity>> {
    let sql = format!(
      "SELECT id, data, timestamp, last_modified FROM {}",
      entity_type.table_name()
    );

    let rows = self.db.with_conn(|conn| {
      let mut stmt = conn
        .prepare(&sql)
        .map_err(|e| eyre!("Failed to prepare entity query: {}", e))?;

      let rows = stmt
        .query_map([], row_to_entity)
        .map_err(|e| eyre!("Failed to query entities: {}", e))?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(|e| eyre!("Failed to read entity row: {}", e))?;
      Ok(rows)
    })?;

    // A corrupt row should not hide the rest of the partition
    Ok(
      rows
        .into_iter()
        .filter_map(|row| match decode_entity(row) {
          Ok(entity) => Some(entity),
          Err(e) => {
            warn!(%entity_type, "{}", e);
            None
          }
        })
        .collect(),
    )
  }

  fn count(&self, entity_type: EntityType) -> Result<u64> {
    let sql = format!("SELECT COUNT(*) FROM {}", entity_type.table_name());

    self.db.with_conn(|conn| {
      conn
        .query_row(&sql, [], |row| row.get::<_, i64>(0))
        .map(|n| n as u64)
        .map_err(|e| eyre!("Failed to count entities: {}", e))
    })
  }

  fn delete_older_than(&self, entity_type: EntityType, cutoff: i64) -> Result<usize> {
    let sql = format!(
      "DELETE FROM {} WHERE timestamp < ?",
      entity_type.table_name()
    );

    self.db.with_conn(|conn| {
      conn
        .execute(&sql, params![cutoff])
        .map_err(|e| eyre!("Failed to prune entities: {}", e))
    })
  }

  fn clear(&self, entity_type: EntityType) -> Result<()> {
    self.db.with_conn(|conn| {
      let tx = conn
        .transaction()
        .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

      tx.execute(&format!("DELETE FROM {}", entity_type.table_name()), [])
        .map_err(|e| eyre!("Failed to clear {}: {}", entity_type, e))?;
      tx.execute(
        "DELETE FROM metadata WHERE entity_type = ?",
        params![entity_type.table_name()],
      )
      .map_err(|e| eyre!("Failed to clear metadata for {}: {}", entity_type, e))?;

      tx.commit()
        .map_err(|e| eyre!("Failed to commit transaction: {}", e))
    })
  }

  fn get_metadata(&self, entity_type: EntityType) -> Result<Option<CacheMetadata>> {
    self.db.with_conn(|conn| {
      conn
        .query_row(
          "SELECT last_sync, count FROM metadata WHERE entity_type = ?",
          params![entity_type.table_name()],
          |row| {
            Ok(CacheMetadata {
              entity_type,
              last_sync: row.get(0)?,
              count: row.get::<_, i64>(1)? as u64,
            })
          },
        )
        .optional()
        .map_err(|e| eyre!("Failed to query metadata: {}", e))
    })
  }

  fn put_metadata(&self, metadata: &CacheMetadata) -> Result<()> {
    self.db.with_conn(|conn| {
      conn
        .execute(
          "INSERT OR REPLACE INTO metadata (entity_type, last_sync, count) VALUES (?, ?, ?)",
          params![
            metadata.entity_type.table_name(),
            metadata.last_sync,
            metadata.count as i64
          ],
        )
        .map_err(|e| eyre!("Failed to update metadata: {}", e))?;
      Ok(())
    })
  }
}
