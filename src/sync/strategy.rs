//! Submission strategy, chosen once at startup from what is configured.

use chrono::Utc;
use std::sync::Arc;

use super::delivery::Delivery;
use super::registry::SyncRegistry;
use crate::channel::{Notice, NoticeChannel};
use crate::db::Database;
use crate::error::Result;
use crate::queue::{DurableQueue, PendingRecord, RecordId};

/// How user submissions reach the remote endpoint.
pub enum SyncStrategy<D: Delivery> {
  /// Queue durably and let the worker deliver once online
  QueueAndSync {
    queue: DurableQueue,
    registry: SyncRegistry,
    tag: String,
  },
  /// Try once right away; failures are logged and dropped
  ImmediateOnly { delivery: Arc<D> },
  /// No endpoint configured, data stays on this device
  LocalOnly,
}

/// What happened to one submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submission {
  Queued(RecordId),
  Delivered,
  NotSent,
}

impl<D: Delivery> SyncStrategy<D> {
  /// Pick a strategy: deferred sync needs both an endpoint and the store.
  pub fn negotiate(delivery: Option<Arc<D>>, deferred: bool, db: &Database, tag: &str) -> Self {
    let strategy = match (delivery, deferred) {
      (Some(_), true) => Self::QueueAndSync {
        queue: DurableQueue::new(db.clone()),
        registry: SyncRegistry::new(db.clone()),
        tag: tag.to_string(),
      },
      (Some(delivery), false) => Self::ImmediateOnly { delivery },
      (None, _) => Self::LocalOnly,
    };

    tracing::debug!(strategy = strategy.name(), "sync strategy selected");
    strategy
  }

  pub fn name(&self) -> &'static str {
    match self {
      Self::QueueAndSync { .. } => "queue-and-sync",
      Self::ImmediateOnly { .. } => "immediate-only",
      Self::LocalOnly => "local-only",
    }
  }

  /// Hand `payload` over for delivery. Only store failures are errors; a
  /// failed immediate delivery is invisible to the user.
  pub async fn submit(&self, payload: &str, notices: Option<&NoticeChannel>) -> Result<Submission> {
    match self {
      Self::QueueAndSync {
        queue,
        registry,
        tag,
      } => {
        let id = queue.enqueue(payload).await?;
        if registry.register(tag).await? {
          tracing::debug!(%tag, "deferred sync registered");
        }
        if let Some(notices) = notices {
          notices.post(Notice::RecordQueued { id });
        }
        Ok(Submission::Queued(id))
      }
      Self::ImmediateOnly { delivery } => {
        let record = PendingRecord {
          id: RecordId(0),
          payload: payload.to_string(),
          attempts: 0,
          last_error: None,
          next_attempt_at: None,
          created_at: Utc::now(),
        };
        match delivery.deliver(&record).await {
          Ok(()) => Ok(Submission::Delivered),
          Err(e) => {
            tracing::warn!(error = %e, "immediate delivery failed, not retried");
            Ok(Submission::NotSent)
          }
        }
      }
      Self::LocalOnly => Ok(Submission::NotSent),
    }
  }
}
