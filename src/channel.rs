use serde::Serialize;
use tokio::sync::broadcast;

use crate::queue::RecordId;
use crate::sync::{DrainReport, NetworkStatus};

/// Informational notices shared between the CLI and the worker
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notice {
  CacheWarmed {
    snapshot: String,
    stored: usize,
    failed: usize,
  },
  SnapshotsEvicted {
    evicted: Vec<String>,
  },
  RecordQueued {
    id: RecordId,
  },
  DrainFinished {
    report: DrainReport,
  },
  StatusChanged {
    status: NetworkStatus,
  },
}

/// Named fire-and-forget broadcast channel. Nothing waits on a notice, so
/// posting with no subscribers is fine.
#[derive(Clone)]
pub struct NoticeChannel {
  name: String,
  tx: broadcast::Sender<Notice>,
}

impl NoticeChannel {
  pub fn new(name: &str) -> Self {
    let (tx, _rx) = broadcast::channel(64);
    Self {
      name: name.to_string(),
      tx,
    }
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn post(&self, notice: Notice) {
    // Err only means nobody is listening
    let _ = self.tx.send(notice);
  }

  pub fn subscribe(&self) -> broadcast::Receiver<Notice> {
    self.tx.subscribe()
  }
}

/// Log every notice on `channel` until it closes.
pub fn spawn_logger(channel: &NoticeChannel) -> tokio::task::JoinHandle<()> {
  let mut rx = channel.subscribe();
  let name = channel.name().to_string();

  tokio::spawn(async move {
    loop {
      match rx.recv().await {
        Ok(notice) => {
          let json = serde_json::to_string(&notice).unwrap_or_default();
          tracing::info!(channel = %name, notice = %json, "notice");
        }
        Err(broadcast::error::RecvError::Lagged(skipped)) => {
          tracing::debug!(channel = %name, skipped, "notice logger lagged");
        }
        Err(broadcast::error::RecvError::Closed) => break,
      }
    }
  })
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_post_without_subscribers_is_fine() {
    let channel = NoticeChannel::new("vacation-tracker");
    channel.post(Notice::RecordQueued { id: RecordId(1) });
  }

  #[tokio::test]
  async fn test_subscribers_receive_notices() {
    let channel = NoticeChannel::new("vacation-tracker");
    let mut rx = channel.subscribe();

    channel.post(Notice::SnapshotsEvicted {
      evicted: vec!["vacation-tracker-v1".to_string()],
    });

    match rx.recv().await.unwrap() {
      Notice::SnapshotsEvicted { evicted } => assert_eq!(evicted, vec!["vacation-tracker-v1"]),
      other => panic!("unexpected notice: {:?}", other),
    }
  }

  #[test]
  fn test_notice_serializes_with_type_tag() {
    let json = serde_json::to_value(Notice::RecordQueued { id: RecordId(4) }).unwrap();
    assert_eq!(json["type"], "record_queued");
    assert_eq!(json["id"], 4);
  }
}
