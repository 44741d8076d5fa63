//! Durable deferred-sync registrations.
//!
//! A registration is a row keyed by tag, so there is never more than one
//! outstanding registration per tag, and it survives until the worker claims
//! it. Short-lived CLI invocations register; the long-running worker claims.

use rusqlite::params;

use crate::db::Database;
use crate::error::Result;

#[derive(Clone)]
pub struct SyncRegistry {
  db: Database,
}

impl SyncRegistry {
  pub fn new(db: Database) -> Self {
    Self { db }
  }

  /// Register `tag`. Returns false when it was already registered.
  pub async fn register(&self, tag: &str) -> Result<bool> {
    let tag = tag.to_string();
    self
      .db
      .call(move |conn| {
        let inserted = conn.execute(
          "INSERT OR IGNORE INTO sync_registrations (tag) VALUES (?)",
          params![tag],
        )?;
        Ok(inserted == 1)
      })
      .await
  }

  pub async fn is_registered(&self, tag: &str) -> Result<bool> {
    let tag = tag.to_string();
    self
      .db
      .call(move |conn| {
        let count: i64 = conn.query_row(
          "SELECT COUNT(*) FROM sync_registrations WHERE tag = ?",
          params![tag],
          |row| row.get(0),
        )?;
        Ok(count > 0)
      })
      .await
  }

  /// Take the registration for `tag`, if there is one.
  pub async fn claim(&self, tag: &str) -> Result<bool> {
    let tag = tag.to_string();
    self
      .db
      .call(move |conn| {
        let deleted = conn.execute(
          "DELETE FROM sync_registrations WHERE tag = ?",
          params![tag],
        )?;
        Ok(deleted > 0)
      })
      .await
  }

  /// Every registered tag.
  pub async fn tags(&self) -> Result<Vec<String>> {
    self
      .db
      .call(|conn| {
        let mut stmt = conn.prepare("SELECT tag FROM sync_registrations ORDER BY tag")?;
        let tags = stmt
          .query_map([], |row| row.get(0))?
          .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(tags)
      })
      .await
  }
}
