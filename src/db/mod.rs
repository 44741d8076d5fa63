pub mod schema;

use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use crate::error::{Error, Result};

/// Shared handle to the on-device SQLite store.
///
/// Opened once at startup and handed to every component that needs it. All
/// access goes through [`Database::call`], which runs the closure on the
/// blocking pool and resolves to a single `Result`.
#[derive(Clone)]
pub struct Database {
  conn: Arc<Mutex<Connection>>,
}

impl Database {
  /// Open or create the database at `path`.
  pub fn open(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent).map_err(|e| {
        Error::StoreUnavailable(format!(
          "failed to create database directory {}: {}",
          parent.display(),
          e
        ))
      })?;
    }

    let conn = Connection::open(path).map_err(|e| {
      Error::StoreUnavailable(format!(
        "failed to open database at {}: {}",
        path.display(),
        e
      ))
    })?;

    Self::init(conn)
  }

  /// Open a private in-memory database.
  #[cfg(test)]
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| Error::StoreUnavailable(format!("failed to open in-memory database: {}", e)))?;
    Self::init(conn)
  }

  /// Get the default database path
  pub fn default_path() -> Result<PathBuf> {
    Ok(data_dir()?.join("vacay.db"))
  }

  fn init(conn: Connection) -> Result<Self> {
    // FULL makes every commit durable before the call returns.
    conn
      .pragma_update_and_check(None, "journal_mode", "WAL", |row| {
        row.get::<_, String>(0)
      })
      .and_then(|_| conn.pragma_update(None, "synchronous", "FULL"))
      .and_then(|_| conn.pragma_update(None, "foreign_keys", "ON"))
      .map_err(|e| Error::StoreUnavailable(format!("failed to configure database: {}", e)))?;

    conn
      .execute_batch(schema::SCHEMA)
      .map_err(|e| Error::StoreUnavailable(format!("failed to run migrations: {}", e)))?;

    Ok(Self {
      conn: Arc::new(Mutex::new(conn)),
    })
  }

  /// Run `f` against the connection without blocking the async runtime.
  pub async fn call<F, R>(&self, f: F) -> Result<R>
  where
    F: FnOnce(&mut Connection) -> Result<R> + Send + 'static,
    R: Send + 'static,
  {
    let conn = Arc::clone(&self.conn);
    tokio::task::spawn_blocking(move || {
      // An open transaction is rolled back while a panicking closure unwinds,
      // so the connection behind a poisoned lock is still consistent.
      let mut conn = conn.lock().unwrap_or_else(PoisonError::into_inner);
      f(&mut conn)
    })
    .await
    .map_err(|e| Error::StoreUnavailable(format!("store task failed: {}", e)))?
  }

  /// Read a value from the key/value table.
  pub async fn get_value(&self, key: &str) -> Result<Option<String>> {
    let key = key.to_string();
    self
      .call(move |conn| {
        let value = conn
          .query_row("SELECT value FROM kv WHERE key = ?", params![key], |row| {
            row.get(0)
          })
          .optional()?;
        Ok(value)
      })
      .await
  }

  /// Write a value to the key/value table, replacing any previous one.
  pub async fn set_value(&self, key: &str, value: &str) -> Result<()> {
    let key = key.to_string();
    let value = value.to_string();
    self
      .call(move |conn| {
        conn.execute(
          "INSERT OR REPLACE INTO kv (key, value) VALUES (?, ?)",
          params![key, value],
        )?;
        Ok(())
      })
      .await
  }
}

const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Parse a datetime string from SQLite format.
pub fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  NaiveDateTime::parse_from_str(s, DATETIME_FORMAT)
    .map(|dt| dt.and_utc())
    .map_err(|e| Error::InvalidInput(format!("failed to parse datetime '{}': {}", s, e)))
}

/// Format a datetime the way SQLite's `datetime('now')` does.
pub fn format_datetime(dt: DateTime<Utc>) -> String {
  dt.format(DATETIME_FORMAT).to_string()
}

/// Directory holding the database and log files.
pub fn data_dir() -> Result<PathBuf> {
  let data_dir = dirs::data_dir()
    .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
    .ok_or_else(|| Error::StoreUnavailable("could not determine data directory".to_string()))?;

  Ok(data_dir.join("vacay"))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn test_kv_roundtrip_and_overwrite() {
    let db = Database::open_in_memory().unwrap();

    assert_eq!(db.get_value("missing").await.unwrap(), None);

    db.set_value("active_snapshot", "vacation-tracker-v1")
      .await
      .unwrap();
    db.set_value("active_snapshot", "vacation-tracker-v2")
      .await
      .unwrap();

    assert_eq!(
      db.get_value("active_snapshot").await.unwrap().as_deref(),
      Some("vacation-tracker-v2")
    );
  }

  #[tokio::test]
  async fn test_open_creates_parent_directory() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("vacay.db");

    let db = Database::open(&path).unwrap();
    db.set_value("k", "v").await.unwrap();

    assert!(path.exists());
  }

  #[tokio::test]
  async fn test_call_surfaces_sql_errors() {
    let db = Database::open_in_memory().unwrap();
    let result = db
      .call(|conn| {
        conn.execute("INSERT INTO no_such_table VALUES (1)", [])?;
        Ok(())
      })
      .await;

    assert!(matches!(result, Err(Error::Store(_))));
  }

  #[tokio::test]
  async fn test_store_usable_after_panicking_call() {
    let db = Database::open_in_memory().unwrap();
    db.set_value("k", "before").await.unwrap();

    let result = db
      .call(|conn| -> Result<()> {
        let tx = conn.transaction()?;
        tx.execute("INSERT INTO kv (key, value) VALUES ('k2', 'v')", [])?;
        panic!("closure panicked mid-transaction");
      })
      .await;
    assert!(matches!(result, Err(Error::StoreUnavailable(_))));

    assert_eq!(db.get_value("k").await.unwrap().as_deref(), Some("before"));
    assert_eq!(db.get_value("k2").await.unwrap(), None);
    db.set_value("k", "after").await.unwrap();
  }
}
