//! Deferred sync coordinator: drains the durable queue against the remote
//! endpoint once connectivity is back.

use chrono::Utc;
use futures::{stream, StreamExt};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::delivery::Delivery;
use super::registry::SyncRegistry;
use super::retry::RetryPolicy;
use crate::channel::{Notice, NoticeChannel};
use crate::error::Result;
use crate::queue::{DurableQueue, FailureOutcome, PendingRecord, Removal};

/// Lifecycle of the coordinator's sync tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
  Idle,
  Registered,
  Draining,
}

/// Tally of one drain pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
  /// Delivered and removed from the queue
  pub delivered: usize,
  /// Delivered, but another drain had already removed the record
  pub already_removed: usize,
  /// Delivery failed, record stays queued with backoff
  pub failed: usize,
  /// Delivery failed for the last allowed time, record moved aside
  pub dead_lettered: usize,
  /// Skipped because its backoff has not elapsed
  pub deferred: usize,
  /// The store failed while recording the outcome
  pub store_errors: usize,
}

impl DrainReport {
  /// Whether records are still waiting for another attempt.
  pub fn has_leftovers(&self) -> bool {
    self.failed + self.deferred + self.store_errors > 0
  }
}

enum RecordOutcome {
  Delivered,
  AlreadyRemoved,
  Failed,
  DeadLettered,
  StoreError,
}

pub struct SyncCoordinator<D: Delivery> {
  queue: DurableQueue,
  registry: SyncRegistry,
  delivery: Arc<D>,
  tag: String,
  policy: RetryPolicy,
  concurrency: usize,
  draining: AtomicBool,
  notices: Option<NoticeChannel>,
}

/// Clears the draining flag however the drain ends.
struct DrainGuard<'a>(&'a AtomicBool);

impl Drop for DrainGuard<'_> {
  fn drop(&mut self) {
    self.0.store(false, Ordering::SeqCst);
  }
}

impl<D: Delivery> SyncCoordinator<D> {
  pub fn new(queue: DurableQueue, registry: SyncRegistry, delivery: Arc<D>, tag: &str) -> Self {
    Self {
      queue,
      registry,
      delivery,
      tag: tag.to_string(),
      policy: RetryPolicy::default(),
      concurrency: 4,
      draining: AtomicBool::new(false),
      notices: None,
    }
  }

  pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
    self.policy = policy;
    self
  }

  pub fn with_concurrency(mut self, concurrency: usize) -> Self {
    self.concurrency = concurrency.max(1);
    self
  }

  pub fn with_notices(mut self, notices: NoticeChannel) -> Self {
    self.notices = Some(notices);
    self
  }

  pub fn tag(&self) -> &str {
    &self.tag
  }

  pub async fn state(&self) -> Result<SyncState> {
    if self.draining.load(Ordering::SeqCst) {
      return Ok(SyncState::Draining);
    }
    Ok(if self.registry.is_registered(&self.tag).await? {
      SyncState::Registered
    } else {
      SyncState::Idle
    })
  }

  /// Ask for a drain on the next connectivity signal. No-op when already
  /// registered.
  pub async fn register(&self) -> Result<bool> {
    self.registry.register(&self.tag).await
  }

  /// Connectivity is back: claim the registration and drain.
  ///
  /// Returns `None` when nothing was registered or a drain is already running.
  /// Leftover records re-register the tag so the next signal retries them.
  pub async fn on_connectivity_restored(&self) -> Result<Option<DrainReport>> {
    if self
      .draining
      .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
      .is_err()
    {
      return Ok(None);
    }
    let _guard = DrainGuard(&self.draining);

    if !self.registry.claim(&self.tag).await? {
      return Ok(None);
    }

    let report = match self.run_drain().await {
      Ok(report) => report,
      Err(e) => {
        // Keep the intent around for the next signal
        self.registry.register(&self.tag).await?;
        return Err(e);
      }
    };

    if report.has_leftovers() {
      self.registry.register(&self.tag).await?;
    }

    Ok(Some(report))
  }

  /// Drain now, regardless of registration state.
  pub async fn drain(&self) -> Result<DrainReport> {
    if self
      .draining
      .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
      .is_err()
    {
      tracing::debug!(tag = %self.tag, "drain already running");
      return Ok(DrainReport::default());
    }
    let _guard = DrainGuard(&self.draining);

    self.run_drain().await
  }

  async fn run_drain(&self) -> Result<DrainReport> {
    let now = Utc::now();
    let records = self.queue.list_all().await?;

    let mut report = DrainReport::default();
    let (due, waiting): (Vec<_>, Vec<_>) = records.into_iter().partition(|r| r.is_due(now));
    report.deferred = waiting.len();

    tracing::info!(
      tag = %self.tag,
      due = due.len(),
      deferred = report.deferred,
      "draining sync queue"
    );

    // Each record succeeds or fails on its own
    let outcomes: Vec<RecordOutcome> = stream::iter(due)
      .map(|record| self.process(record))
      .buffer_unordered(self.concurrency)
      .collect()
      .await;

    for outcome in outcomes {
      match outcome {
        RecordOutcome::Delivered => report.delivered += 1,
        RecordOutcome::AlreadyRemoved => report.already_removed += 1,
        RecordOutcome::Failed => report.failed += 1,
        RecordOutcome::DeadLettered => report.dead_lettered += 1,
        RecordOutcome::StoreError => report.store_errors += 1,
      }
    }

    tracing::info!(tag = %self.tag, ?report, "drain finished");
    if let Some(notices) = &self.notices {
      notices.post(Notice::DrainFinished {
        report: report.clone(),
      });
    }

    Ok(report)
  }

  async fn process(&self, record: PendingRecord) -> RecordOutcome {
    let id = record.id;

    match self.delivery.deliver(&record).await {
      Ok(()) => match self.queue.remove(id).await {
        Ok(Removal::Removed) => {
          tracing::debug!(%id, "record delivered");
          RecordOutcome::Delivered
        }
        Ok(Removal::NotFound) => {
          tracing::debug!(%id, "record delivered, already removed");
          RecordOutcome::AlreadyRemoved
        }
        Err(e) => {
          // Stays queued; the endpoint sees it again with the same idempotency key
          tracing::error!(%id, error = %e, "failed to remove delivered record");
          RecordOutcome::StoreError
        }
      },
      Err(delivery_error) => {
        let message = delivery_error.to_string();
        match self
          .queue
          .record_failure(id, &message, self.policy, Utc::now())
          .await
        {
          Ok(FailureOutcome::Rescheduled {
            attempts,
            next_attempt_at,
          }) => {
            tracing::warn!(%id, attempts, %next_attempt_at, error = %message, "delivery failed");
            RecordOutcome::Failed
          }
          Ok(FailureOutcome::DeadLettered { attempts }) => {
            tracing::error!(%id, attempts, error = %message, "delivery abandoned, record dead-lettered");
            RecordOutcome::DeadLettered
          }
          Ok(FailureOutcome::NotFound) => RecordOutcome::AlreadyRemoved,
          Err(e) => {
            tracing::error!(%id, error = %e, "failed to record delivery failure");
            RecordOutcome::StoreError
          }
        }
      }
    }
  }
}
