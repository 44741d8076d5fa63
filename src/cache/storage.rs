//! Named snapshot registry backed by SQLite.

use rusqlite::params;

use super::snapshot::AssetCache;
use crate::db::Database;
use crate::error::Result;

/// Build a snapshot name that embeds the version tag, e.g. `vacation-tracker-v1`.
pub fn snapshot_name(prefix: &str, version: &str) -> String {
  format!("{}-{}", prefix, version)
}

/// Registry of cache snapshots in the shared store.
#[derive(Clone)]
pub struct CacheStorage {
  db: Database,
}

impl CacheStorage {
  pub fn new(db: Database) -> Self {
    Self { db }
  }

  /// Open (creating if needed) the snapshot called `name`.
  pub async fn open(&self, name: &str) -> Result<AssetCache> {
    let owned = name.to_string();
    self
      .db
      .call(move |conn| {
        conn.execute(
          "INSERT OR IGNORE INTO cache_snapshots (name) VALUES (?)",
          params![owned],
        )?;
        Ok(())
      })
      .await?;

    Ok(AssetCache::new(self.db.clone(), name))
  }

  /// Names of every stored snapshot.
  pub async fn keys(&self) -> Result<Vec<String>> {
    self
      .db
      .call(|conn| {
        let mut stmt = conn.prepare("SELECT name FROM cache_snapshots ORDER BY created_at, name")?;
        let names = stmt
          .query_map([], |row| row.get(0))?
          .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(names)
      })
      .await
  }

  /// Delete a snapshot and all of its entries. Returns whether it existed.
  pub async fn delete(&self, name: &str) -> Result<bool> {
    let name = name.to_string();
    self
      .db
      .call(move |conn| {
        let tx = conn.transaction()?;
        tx.execute(
          "DELETE FROM cache_entries WHERE snapshot = ?",
          params![name],
        )?;
        let deleted = tx.execute("DELETE FROM cache_snapshots WHERE name = ?", params![name])?;
        tx.commit()?;
        Ok(deleted > 0)
      })
      .await
  }

  /// Delete every snapshot except `current`. Returns the evicted names.
  pub async fn evict_stale(&self, current: &str) -> Result<Vec<String>> {
    let mut evicted = Vec::new();
    for name in self.keys().await? {
      if name != current && self.delete(&name).await? {
        evicted.push(name);
      }
    }

    if !evicted.is_empty() {
      tracing::info!(?evicted, current, "evicted stale cache snapshots");
    }
    Ok(evicted)
  }
}
