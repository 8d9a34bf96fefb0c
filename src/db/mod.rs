pub mod schema;

use color_eyre::{eyre::eyre, Result};
use rusqlite::Connection;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Where the offline database lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DbLocation {
  File(PathBuf),
  /// Private in-memory database. Contents are lost on `close()`.
  Memory,
}

impl DbLocation {
  /// Get the default database location
  pub fn default_file() -> Result<Self> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(Self::File(data_dir.join("ordersnapr").join("offline.db")))
  }
}

/// Shared, lazily opened connection to the offline database.
///
/// Clones share one connection. It is opened and migrated on first use and
/// can be closed at any time; the next use opens it again.
#[derive(Clone)]
pub struct Database {
  inner: Arc<Inner>,
}

struct Inner {
  location: DbLocation,
  conn: Mutex<Option<Connection>>,
}

impl Database {
  /// Create a handle without touching the filesystem.
  pub fn new(location: DbLocation) -> Self {
    Self {
      inner: Arc::new(Inner {
        location,
        conn: Mutex::new(None),
      }),
    }
  }

  /// Handle to a fresh in-memory database.
  #[cfg(test)]
  pub fn in_memory() -> Self {
    Self::new(DbLocation::Memory)
  }

  /// Run `f` with the connection, opening it first if needed.
  pub fn with_conn<R>(&self, f: impl FnOnce(&mut Connection) -> Result<R>) -> Result<R> {
    let mut guard = self
      .inner
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    if guard.is_none() {
      *guard = Some(self.open_connection()?);
    }

    match guard.as_mut() {
      Some(conn) => f(conn),
      None => Err(eyre!("Database connection unavailable")),
    }
  }

  /// Drop the open connection, if any.
  pub fn close(&self) {
    match self.inner.conn.lock() {
      Ok(mut guard) => {
        if guard.take().is_some() {
          debug!(location = ?self.inner.location, "closed offline database");
        }
      }
      Err(e) => tracing::warn!("Failed to close offline database: {}", e),
    }
  }

  #[cfg(test)]
  pub fn is_open(&self) -> bool {
    self
      .inner
      .conn
      .lock()
      .map(|guard| guard.is_some())
      .unwrap_or(false)
  }

  fn open_connection(&self) -> Result<Connection> {
    let conn = match &self.inner.location {
      DbLocation::File(path) => {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
          std::fs::create_dir_all(parent)
            .map_err(|e| eyre!("Failed to create database directory: {}", e))?;
        }

        Connection::open(path)
          .map_err(|e| eyre!("Failed to open database at {}: {}", path.display(), e))?
      }
      DbLocation::Memory => Connection::open_in_memory()
        .map_err(|e| eyre!("Failed to open in-memory database: {}", e))?,
    };

    conn
      .execute_batch(schema::SCHEMA)
      .map_err(|e| eyre!("Failed to run migrations: {}", e))?;

    debug!(location = ?self.inner.location, "opened offline database");
    Ok(conn)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_lazy_open_and_close() {
    let db = Database::in_memory();
    assert!(!db.is_open());

    let tables: i64 = db
      .with_conn(|conn| {
        conn
          .query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table'",
            [],
            |row| row.get(0),
          )
          .map_err(|e| eyre!("{}", e))
      })
      .unwrap();
    assert_eq!(tables, 6);
    assert!(db.is_open());

    db.close();
    assert!(!db.is_open());
  }

  #[test]
  fn test_clones_share_connection() {
    let db = Database::in_memory();
    let other = db.clone();

    db.with_conn(|conn| {
      conn
        .execute("INSERT INTO metadata VALUES ('customers', 1, 1)", [])
        .map_err(|e| eyre!("{}", e))
    })
    .unwrap();

    let count: i64 = other
      .with_conn(|conn| {
        conn
          .query_row("SELECT COUNT(*) FROM metadata", [], |row| row.get(0))
          .map_err(|e| eyre!("{}", e))
      })
      .unwrap();
    assert_eq!(count, 1);
  }

  #[test]
  fn test_file_database_reopens_after_close() {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::new(DbLocation::File(dir.path().join("nested").join("offline.db")));

    db.with_conn(|conn| {
      conn
        .execute("INSERT INTO metadata VALUES ('invoices', 5, 2)", [])
        .map_err(|e| eyre!("{}", e))
    })
    .unwrap();
    db.close();

    let last_sync: i64 = db
      .with_conn(|conn| {
        conn
          .query_row(
            "SELECT last_sync FROM metadata WHERE entity_type = 'invoices'",
            [],
            |row| row.get(0),
          )
          .map_err(|e| eyre!("{}", e))
      })
      .unwrap();
    assert_eq!(last_sync, 5);
  }
}
