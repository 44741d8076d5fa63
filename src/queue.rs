//! Durable queue of records waiting for delivery.
//!
//! Every mutation is committed to SQLite before it returns, so records survive
//! restarts and crashes until the sync coordinator confirms their delivery.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use serde::Serialize;
use std::fmt;

use crate::db::{format_datetime, parse_datetime, Database};
use crate::error::Result;
use crate::sync::RetryPolicy;

/// Store-assigned identifier of a queued record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct RecordId(pub i64);

impl fmt::Display for RecordId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.0)
  }
}

/// A unit of user data that has not been delivered yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PendingRecord {
  pub id: RecordId,
  pub payload: String,
  /// Failed delivery attempts so far
  pub attempts: u32,
  pub last_error: Option<String>,
  /// Earliest time the next attempt may run; `None` means immediately
  pub next_attempt_at: Option<DateTime<Utc>>,
  pub created_at: DateTime<Utc>,
}

impl PendingRecord {
  /// Whether the record's backoff has elapsed.
  pub fn is_due(&self, now: DateTime<Utc>) -> bool {
    self.next_attempt_at.map_or(true, |at| at <= now)
  }
}

/// A record that ran out of delivery attempts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeadRecord {
  pub id: RecordId,
  pub payload: String,
  pub attempts: u32,
  pub last_error: Option<String>,
  pub created_at: DateTime<Utc>,
  pub dead_at: DateTime<Utc>,
}

/// Result of [`DurableQueue::remove`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Removal {
  Removed,
  /// Nothing stored under that id, usually because it was already delivered
  NotFound,
}

/// Result of [`DurableQueue::record_failure`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureOutcome {
  /// The record stays queued until `next_attempt_at`
  Rescheduled {
    attempts: u32,
    next_attempt_at: DateTime<Utc>,
  },
  /// The record was moved to the dead-letter table
  DeadLettered { attempts: u32 },
  /// The record disappeared while it was being delivered
  NotFound,
}

/// Queue of pending records backed by the shared store.
#[derive(Clone)]
pub struct DurableQueue {
  db: Database,
}

impl DurableQueue {
  pub fn new(db: Database) -> Self {
    Self { db }
  }

  /// Append a record. The returned id is durable once this resolves.
  pub async fn enqueue(&self, payload: &str) -> Result<RecordId> {
    let payload = payload.to_string();
    let id = self
      .db
      .call(move |conn| {
        conn.execute(
          "INSERT INTO pending_records (payload) VALUES (?)",
          params![payload],
        )?;
        Ok(conn.last_insert_rowid())
      })
      .await?;

    tracing::debug!(id, "record enqueued");
    Ok(RecordId(id))
  }

  /// Snapshot of every pending record, oldest first.
  pub async fn list_all(&self) -> Result<Vec<PendingRecord>> {
    self
      .db
      .call(|conn| {
        let mut stmt = conn.prepare(
          "SELECT id, payload, attempts, last_error, next_attempt_at, created_at
           FROM pending_records
           ORDER BY id ASC",
        )?;
        let rows = stmt
          .query_map([], pending_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter().map(into_pending).collect()
      })
      .await
  }

  /// Delete a record. Removing an absent id reports `NotFound`.
  pub async fn remove(&self, id: RecordId) -> Result<Removal> {
    let deleted = self
      .db
      .call(move |conn| {
        Ok(conn.execute("DELETE FROM pending_records WHERE id = ?", params![id.0])?)
      })
      .await?;

    Ok(if deleted == 0 {
      Removal::NotFound
    } else {
      Removal::Removed
    })
  }

  /// Number of pending records.
  pub async fn len(&self) -> Result<usize> {
    self
      .db
      .call(|conn| {
        let count: i64 =
          conn.query_row("SELECT COUNT(*) FROM pending_records", [], |row| row.get(0))?;
        Ok(count as usize)
      })
      .await
  }

  /// Count a failed delivery attempt and either reschedule the record or move
  /// it to the dead-letter table once `policy` runs out of attempts.
  pub async fn record_failure(
    &self,
    id: RecordId,
    error: &str,
    policy: RetryPolicy,
    now: DateTime<Utc>,
  ) -> Result<FailureOutcome> {
    let error = error.to_string();
    self
      .db
      .call(move |conn| {
        let tx = conn.transaction()?;

        let attempts: Option<u32> = tx
          .query_row(
            "SELECT attempts FROM pending_records WHERE id = ?",
            params![id.0],
            |row| row.get(0),
          )
          .optional()?;

        let Some(attempts) = attempts.map(|a| a + 1) else {
          return Ok(FailureOutcome::NotFound);
        };

        let outcome = match policy.next_attempt(attempts, now) {
          Some(next_attempt_at) => {
            tx.execute(
              "UPDATE pending_records
               SET attempts = ?, last_error = ?, next_attempt_at = ?
               WHERE id = ?",
              params![attempts, error, format_datetime(next_attempt_at), id.0],
            )?;
            FailureOutcome::Rescheduled {
              attempts,
              next_attempt_at,
            }
          }
          None => {
            tx.execute(
              "INSERT OR REPLACE INTO dead_records (id, payload, attempts, last_error, created_at, dead_at)
               SELECT id, payload, ?, ?, created_at, ? FROM pending_records WHERE id = ?",
              params![attempts, error, format_datetime(now), id.0],
            )?;
            tx.execute("DELETE FROM pending_records WHERE id = ?", params![id.0])?;
            FailureOutcome::DeadLettered { attempts }
          }
        };

        tx.commit()?;
        Ok(outcome)
      })
      .await
  }

  /// Records that exhausted their retry budget, oldest first.
  pub async fn dead_letters(&self) -> Result<Vec<DeadRecord>> {
    self
      .db
      .call(|conn| {
        let mut stmt = conn.prepare(
          "SELECT id, payload, attempts, last_error, created_at, dead_at
           FROM dead_records
           ORDER BY id ASC",
        )?;
        let rows = stmt
          .query_map([], |row| {
            Ok((
              row.get::<_, i64>(0)?,
              row.get::<_, String>(1)?,
              row.get::<_, u32>(2)?,
              row.get::<_, Option<String>>(3)?,
              row.get::<_, String>(4)?,
              row.get::<_, String>(5)?,
            ))
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;

        rows
          .into_iter()
          .map(|(id, payload, attempts, last_error, created_at, dead_at)| {
            Ok(DeadRecord {
              id: RecordId(id),
              payload,
              attempts,
              last_error,
              created_at: parse_datetime(&created_at)?,
              dead_at: parse_datetime(&dead_at)?,
            })
          })
          .collect()
      })
      .await
  }

  /// Move a dead-lettered record back into the queue with a fresh attempt
  /// budget. The record gets a new id so ordering stays by insertion.
  pub async fn revive(&self, id: RecordId) -> Result<Option<RecordId>> {
    self
      .db
      .call(move |conn| {
        let tx = conn.transaction()?;

        let payload: Option<String> = tx
          .query_row(
            "SELECT payload FROM dead_records WHERE id = ?",
            params![id.0],
            |row| row.get(0),
          )
          .optional()?;

        let Some(payload) = payload else {
          return Ok(None);
        };

        tx.execute(
          "INSERT INTO pending_records (payload) VALUES (?)",
          params![payload],
        )?;
        let new_id = tx.last_insert_rowid();
        tx.execute("DELETE FROM dead_records WHERE id = ?", params![id.0])?;
        tx.commit()?;

        Ok(Some(RecordId(new_id)))
      })
      .await
  }
}

type PendingRow = (i64, String, u32, Option<String>, Option<String>, String);

fn pending_row(row: &Row<'_>) -> rusqlite::Result<PendingRow> {
  Ok((
    row.get(0)?,
    row.get(1)?,
    row.get(2)?,
    row.get(3)?,
    row.get(4)?,
    row.get(5)?,
  ))
}

fn into_pending(row: PendingRow) -> Result<PendingRecord> {
  let (id, payload, attempts, last_error, next_attempt_at, created_at) = row;
  Ok(PendingRecord {
    id: RecordId(id),
    payload,
    attempts,
    last_error,
    next_attempt_at: next_attempt_at.as_deref().map(parse_datetime).transpose()?,
    created_at: parse_datetime(&created_at)?,
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::Duration;

  fn queue() -> DurableQueue {
    DurableQueue::new(Database::open_in_memory().unwrap())
  }

  #[tokio::test]
  async fn test_enqueue_list_remove_scenario() {
    let queue = queue();

    assert_eq!(queue.enqueue("A").await.unwrap(), RecordId(1));
    assert_eq!(queue.enqueue("B").await.unwrap(), RecordId(2));

    let all = queue.list_all().await.unwrap();
    let pairs: Vec<_> = all.iter().map(|r| (r.id.0, r.payload.as_str())).collect();
    assert_eq!(pairs, vec![(1, "A"), (2, "B")]);

    assert_eq!(queue.remove(RecordId(1)).await.unwrap(), Removal::Removed);

    let all = queue.list_all().await.unwrap();
    let pairs: Vec<_> = all.iter().map(|r| (r.id.0, r.payload.as_str())).collect();
    assert_eq!(pairs, vec![(2, "B")]);
  }

  #[tokio::test]
  async fn test_list_preserves_insertion_order() {
    let queue = queue();
    let payloads = ["x", "y", "z", "w", "v"];

    let mut ids = Vec::new();
    for p in payloads {
      ids.push(queue.enqueue(p).await.unwrap());
    }

    let all = queue.list_all().await.unwrap();
    assert_eq!(all.iter().map(|r| r.id).collect::<Vec<_>>(), ids);
    assert_eq!(
      all.iter().map(|r| r.payload.as_str()).collect::<Vec<_>>(),
      payloads
    );
    assert!(ids.windows(2).all(|w| w[0] < w[1]));
  }

  #[tokio::test]
  async fn test_double_remove_reports_not_found() {
    let queue = queue();
    let id = queue.enqueue("payload").await.unwrap();

    assert_eq!(queue.remove(id).await.unwrap(), Removal::Removed);
    assert_eq!(queue.remove(id).await.unwrap(), Removal::NotFound);
    assert!(queue.list_all().await.unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_ids_are_not_reused_after_remove() {
    let queue = queue();
    let first = queue.enqueue("a").await.unwrap();
    queue.remove(first).await.unwrap();

    let second = queue.enqueue("b").await.unwrap();
    assert!(second > first);
  }

  #[tokio::test]
  async fn test_records_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("vacay.db");

    {
      let queue = DurableQueue::new(Database::open(&path).unwrap());
      queue.enqueue("persisted").await.unwrap();
    }

    let queue = DurableQueue::new(Database::open(&path).unwrap());
    let all = queue.list_all().await.unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].payload, "persisted");
  }

  #[tokio::test]
  async fn test_failure_reschedules_with_backoff() {
    let queue = queue();
    let id = queue.enqueue("a").await.unwrap();
    let now = Utc::now();
    let policy = RetryPolicy {
      max_attempts: 5,
      base_delay: Duration::seconds(30),
      max_delay: Duration::hours(1),
    };

    let outcome = queue
      .record_failure(id, "HTTP 503", policy, now)
      .await
      .unwrap();
    assert!(matches!(
      outcome,
      FailureOutcome::Rescheduled { attempts: 1, .. }
    ));

    let record = &queue.list_all().await.unwrap()[0];
    assert_eq!(record.attempts, 1);
    assert_eq!(record.last_error.as_deref(), Some("HTTP 503"));
    assert!(!record.is_due(now));
    assert!(record.is_due(now + Duration::seconds(31)));
  }

  #[tokio::test]
  async fn test_failure_dead_letters_after_max_attempts() {
    let queue = queue();
    let id = queue.enqueue("doomed").await.unwrap();
    let policy = RetryPolicy {
      max_attempts: 2,
      ..RetryPolicy::default()
    };

    queue
      .record_failure(id, "rejected", policy, Utc::now())
      .await
      .unwrap();
    let outcome = queue
      .record_failure(id, "rejected", policy, Utc::now())
      .await
      .unwrap();

    assert_eq!(outcome, FailureOutcome::DeadLettered { attempts: 2 });
    assert!(queue.list_all().await.unwrap().is_empty());

    let dead = queue.dead_letters().await.unwrap();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].id, id);
    assert_eq!(dead[0].payload, "doomed");
  }

  #[tokio::test]
  async fn test_oversized_backoff_dead_letters_and_keeps_store_usable() {
    let queue = queue();
    let id = queue.enqueue("bad").await.unwrap();
    let policy = RetryPolicy {
      max_attempts: 8,
      base_delay: Duration::days(365 * 1_000_000),
      max_delay: Duration::days(365 * 1_000_000),
    };

    let outcome = queue
      .record_failure(id, "HTTP 500", policy, Utc::now())
      .await
      .unwrap();

    assert_eq!(outcome, FailureOutcome::DeadLettered { attempts: 1 });
    assert!(queue.list_all().await.unwrap().is_empty());
    assert_eq!(queue.enqueue("next").await.unwrap(), RecordId(2));
  }

  #[tokio::test]
  async fn test_failure_on_removed_record() {
    let queue = queue();
    let id = queue.enqueue("a").await.unwrap();
    queue.remove(id).await.unwrap();

    let outcome = queue
      .record_failure(id, "late", RetryPolicy::default(), Utc::now())
      .await
      .unwrap();
    assert_eq!(outcome, FailureOutcome::NotFound);
  }

  #[tokio::test]
  async fn test_revive_requeues_dead_record() {
    let queue = queue();
    let id = queue.enqueue("again").await.unwrap();
    let policy = RetryPolicy {
      max_attempts: 1,
      ..RetryPolicy::default()
    };
    queue
      .record_failure(id, "nope", policy, Utc::now())
      .await
      .unwrap();

    let new_id = queue.revive(id).await.unwrap().unwrap();
    assert!(new_id > id);
    assert!(queue.dead_letters().await.unwrap().is_empty());

    let all = queue.list_all().await.unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].attempts, 0);
    assert_eq!(all[0].payload, "again");

    assert_eq!(queue.revive(id).await.unwrap(), None);
  }
}
