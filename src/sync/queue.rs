//! Durable store of mutations awaiting the backend.

use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Row};
use std::sync::Arc;
use tracing::{debug, warn};

use super::operation::{NewOperation, OperationKind, QueuedOperation, DEFAULT_MAX_RETRIES};
use crate::clock::{Clock, SystemClock};
use crate::db::Database;

/// Sync queue backed by the offline database.
///
/// Like the entity cache, the public operations never fail: storage errors
/// are logged and reported as `false`, `0` or an empty list.
#[derive(Clone)]
pub struct SyncQueue {
  db: Database,
  clock: Arc<dyn Clock>,
  max_retries: u32,
}

impl SyncQueue {
  pub fn new(db: Database) -> Self {
    Self {
      db,
      clock: Arc::new(SystemClock),
      max_retries: DEFAULT_MAX_RETRIES,
    }
  }

  /// Retry budget given to newly queued operations.
  pub fn with_max_retries(mut self, max_retries: u32) -> Self {
    self.max_retries = max_retries.max(1);
    self
  }

  #[allow(dead_code)]
  pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
    self.clock = clock;
    self
  }

  /// Queue a mutation with a fresh retry budget.
  ///
  /// Reusing an id replaces the earlier operation.
  pub fn add_to_sync_queue(&self, op: NewOperation) -> bool {
    let op = QueuedOperation::new(op, self.clock.now_millis(), self.max_retries);

    match self.try_put(&op) {
      Ok(()) => {
        debug!(id = %op.id, kind = %op.kind, "queued operation");
        true
      }
      Err(e) => {
        warn!(id = %op.id, "Failed to queue operation: {}", e);
        false
      }
    }
  }

  pub fn get_pending_sync_count(&self) -> usize {
    self.try_count().unwrap_or_else(|e| {
      warn!("Failed to count queued operations: {}", e);
      0
    })
  }

  /// Every queued operation, oldest first.
  pub fn pending_operations(&self) -> Vec<QueuedOperation> {
    self.try_list().unwrap_or_else(|e| {
      warn!("Failed to read sync queue: {}", e);
      Vec::new()
    })
  }

  /// Persist a changed operation (e.g. after a failed attempt).
  pub fn update(&self, op: &QueuedOperation) -> bool {
    match self.try_put(op) {
      Ok(()) => true,
      Err(e) => {
        warn!(id = %op.id, "Failed to update queued operation: {}", e);
        false
      }
    }
  }

  /// Remove one operation. Returns whether a row was deleted.
  pub fn remove(&self, id: &str) -> bool {
    let removed = self.db.with_conn(|conn| {
      conn
        .execute("DELETE FROM sync_queue WHERE id = ?", params![id])
        .map_err(|e| eyre!("Failed to delete queued operation: {}", e))
    });

    match removed {
      Ok(n) => n > 0,
      Err(e) => {
        warn!(id, "{}", e);
        false
      }
    }
  }

  /// Drop everything in the queue.
  pub fn clear_sync_queue(&self) -> bool {
    let cleared = self.db.with_conn(|conn| {
      conn
        .execute("DELETE FROM sync_queue", [])
        .map_err(|e| eyre!("Failed to clear sync queue: {}", e))
    });

    match cleared {
      Ok(n) => {
        debug!(dropped = n, "cleared sync queue");
        true
      }
      Err(e) => {
        warn!("{}", e);
        false
      }
    }
  }

  fn try_put(&self, op: &QueuedOperation) -> Result<()> {
    let data =
      serde_json::to_string(&op.data).map_err(|e| eyre!("Failed to serialize operation: {}", e))?;

    self.db.with_conn(|conn| {
      conn
        .execute(
          "INSERT OR REPLACE INTO sync_queue (id, kind, data, timestamp, retry_count, max_retries)
           VALUES (?, ?, ?, ?, ?, ?)",
          params![
            op.id,
            op.kind.as_str(),
            data,
            op.timestamp,
            op.retry_count,
            op.max_retries
          ],
        )
        .map_err(|e| eyre!("Failed to store queued operation: {}", e))?;
      Ok(())
    })
  }

  fn try_count(&self) -> Result<usize> {
    self.db.with_conn(|conn| {
      conn
        .query_row("SELECT COUNT(*) FROM sync_queue", [], |row| row.get::<_, i64>(0))
        .map(|n| n as usize)
        .map_err(|e| eyre!("Failed to count queued operations: {}", e))
    })
  }

  fn try_list(&self) -> Result<Vec<QueuedOperation>> {
    let rows = self.db.with_conn(|conn| {
      let mut stmt = conn
        .prepare(
          "SELECT id, kind, data, timestamp, retry_count, max_retries FROM sync_queue
           ORDER BY timestamp, rowid",
        )
        .map_err(|e| eyre!("Failed to prepare queue query: {}", e))?;

      let rows = stmt
        .query_map([], read_row)
        .map_err(|e| eyre!("Failed to query sync queue: {}", e))?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(|e| eyre!("Failed to read queue row: {}", e))?;
      Ok(rows)
    })?;

    Ok(
      rows
        .into_iter()
        .filter_map(|row| match decode_row(row) {
          Ok(op) => Some(op),
          Err(e) => {
            warn!("{}", e);
            None
          }
        })
        .collect(),
    )
  }
}

type RawRow = (String, String, String, i64, u32, u32);

fn read_row(row: &Row<'_>) -> rusqlite::Result<RawRow> {
  Ok((
    row.get(0)?,
    row.get(1)?,
    row.get(2)?,
    row.get(3)?,
    row.get(4)?,
    row.get(5)?,
  ))
}

fn decode_row((id, kind, data, timestamp, retry_count, max_retries): RawRow) -> Result<QueuedOperation> {
  let kind = kind
    .parse::<OperationKind>()
    .map_err(|e| eyre!("Queued operation {} is unreadable: {}", id, e))?;
  let data = serde_json::from_str(&data)
    .map_err(|e| eyre!("Queued operation {} is unreadable: {}", id, e))?;

  Ok(QueuedOperation {
    id,
    kind,
    data,
    timestamp,
    retry_count,
    max_retries,
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::clock::ManualClock;
  use chrono::{Duration, Utc};
  use serde_json::json;

  fn queue() -> (SyncQueue, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(Utc::now()));
    (
      SyncQueue::new(Database::in_memory()).with_clock(clock.clone()),
      clock,
    )
  }

  #[test]
  fn test_add_and_count() {
    let (queue, clock) = queue();
    assert_eq!(queue.get_pending_sync_count(), 0);

    assert!(queue.add_to_sync_queue(NewOperation::new(
      "op1",
      OperationKind::Save,
      json!({"submissionId": "s1", "answers": {"a": 1}}),
    )));
    assert_eq!(queue.get_pending_sync_count(), 1);

    let pending = queue.pending_operations();
    assert_eq!(pending[0].retry_count, 0);
    assert_eq!(pending[0].max_retries, 3);
    assert_eq!(pending[0].timestamp, clock.now_millis());
    assert_eq!(pending[0].data["answers"]["a"], 1);
  }

  #[test]
  fn test_pending_in_queue_order() {
    let (queue, clock) = queue();
    for id in ["b", "a", "c"] {
      queue.add_to_sync_queue(NewOperation::new(id, OperationKind::Submit, json!({})));
      clock.advance(Duration::seconds(1));
    }

    let ids: Vec<String> = queue.pending_operations().into_iter().map(|op| op.id).collect();
    assert_eq!(ids, vec!["b", "a", "c"]);
  }

  #[test]
  fn test_same_id_replaces() {
    let (queue, _) = queue();
    queue.add_to_sync_queue(NewOperation::new("op1", OperationKind::Save, json!(1)));
    let mut op = queue.pending_operations().remove(0);
    op.record_failure();
    assert!(queue.update(&op));

    queue.add_to_sync_queue(NewOperation::new("op1", OperationKind::Save, json!(2)));

    let pending = queue.pending_operations();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].data, json!(2));
    assert_eq!(pending[0].retry_count, 0);
  }

  #[test]
  fn test_update_and_remove() {
    let (queue, _) = queue();
    queue.add_to_sync_queue(NewOperation::new("op1", OperationKind::Submit, json!({})));

    let mut op = queue.pending_operations().remove(0);
    op.record_failure();
    assert!(queue.update(&op));
    assert_eq!(queue.pending_operations()[0].retry_count, 1);

    assert!(queue.remove("op1"));
    assert!(!queue.remove("op1"));
    assert_eq!(queue.get_pending_sync_count(), 0);
  }

  #[test]
  fn test_custom_retry_budget() {
    let queue = SyncQueue::new(Database::in_memory()).with_max_retries(5);
    queue.add_to_sync_queue(NewOperation::new("op1", OperationKind::Save, json!({})));
    assert_eq!(queue.pending_operations()[0].max_retries, 5);
  }

  #[test]
  fn test_clear_sync_queue() {
    let (queue, _) = queue();
    for id in ["a", "b"] {
      queue.add_to_sync_queue(NewOperation::new(id, OperationKind::Save, json!({})));
    }

    assert!(queue.clear_sync_queue());
    assert_eq!(queue.get_pending_sync_count(), 0);
  }

  #[test]
  fn test_unreadable_rows_are_skipped() {
    let db = Database::in_memory();
    let queue = SyncQueue::new(db.clone());
    queue.add_to_sync_queue(NewOperation::new("good", OperationKind::Save, json!({})));
    db.with_conn(|conn| {
      conn
        .execute(
          "INSERT INTO sync_queue VALUES ('bad', 'delete', '{}', 0, 0, 3)",
          [],
        )
        .map_err(|e| eyre!("{}", e))
    })
    .unwrap();

    let pending = queue.pending_operations();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, "good");
  }
}
