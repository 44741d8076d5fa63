//! A single opened cache snapshot.

use futures::future::join_all;
use rusqlite::{params, OptionalExtension};
use url::Url;

use super::types::{RequestKey, StoredResponse};
use crate::db::Database;
use crate::error::Result;
use crate::net::{Fetcher, Request};

/// Outcome of warming a snapshot. Warming is best-effort: each resource is
/// stored or reported as failed on its own.
#[derive(Debug, Default)]
pub struct WarmReport {
  pub stored: Vec<Url>,
  pub failed: Vec<(Url, String)>,
}

/// Handle to one named snapshot. Only obtainable through
/// [`CacheStorage::open`](super::CacheStorage::open).
#[derive(Clone)]
pub struct AssetCache {
  db: Database,
  name: String,
}

impl AssetCache {
  pub(super) fn new(db: Database, name: &str) -> Self {
    Self {
      db,
      name: name.to_string(),
    }
  }

  /// Look up a stored response.
  pub async fn lookup(&self, key: &RequestKey) -> Result<Option<StoredResponse>> {
    let snapshot = self.name.clone();
    let hash = key.cache_hash();

    let row: Option<(u16, String, Vec<u8>)> = self
      .db
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              "SELECT status, headers, body FROM cache_entries
               WHERE snapshot = ? AND request_hash = ?",
              params![snapshot, hash],
              |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?,
        )
      })
      .await?;

    match row {
      Some((status, headers, body)) => Ok(Some(StoredResponse {
        status,
        headers: serde_json::from_str(&headers)?,
        body,
      })),
      None => Ok(None),
    }
  }

  /// Store `response` under `key`, replacing any earlier entry.
  pub async fn put(&self, key: &RequestKey, response: &StoredResponse) -> Result<()> {
    let snapshot = self.name.clone();
    let hash = key.cache_hash();
    let method = key.method.clone();
    let url = key.url.clone();
    let status = response.status;
    let headers = serde_json::to_string(&response.headers)?;
    let body = response.body.clone();

    self
      .db
      .call(move |conn| {
        conn.execute(
          "INSERT OR REPLACE INTO cache_entries
             (snapshot, request_hash, method, url, status, headers, body, stored_at)
           VALUES (?, ?, ?, ?, ?, ?, ?, datetime('now'))",
          params![snapshot, hash, method, url, status, headers, body],
        )?;
        Ok(())
      })
      .await
  }

  /// Fetch every resource and store the successful ones.
  ///
  /// A resource that fails to fetch (or answers with a non-2xx status) is
  /// logged and skipped; entries already stored are left untouched.
  pub async fn warm<F: Fetcher>(&self, fetcher: &F, resources: &[Url]) -> WarmReport {
    let fetches = resources.iter().map(|url| async move {
      let request = Request::get(url.clone());
      let result = match fetcher.fetch(&request).await {
        Ok(response) if response.is_success() => self.put(&request.key(), &response).await,
        Ok(response) => Err(crate::error::Error::Network(format!(
          "unexpected status {}",
          response.status
        ))),
        Err(e) => Err(e),
      };
      (url.clone(), result)
    });

    let mut report = WarmReport::default();
    for (url, result) in join_all(fetches).await {
      match result {
        Ok(()) => report.stored.push(url),
        Err(e) => {
          tracing::warn!(%url, error = %e, snapshot = %self.name, "failed to cache resource");
          report.failed.push((url, e.to_string()));
        }
      }
    }

    tracing::info!(
      snapshot = %self.name,
      stored = report.stored.len(),
      failed = report.failed.len(),
      "cache warmed"
    );
    report
  }
}
