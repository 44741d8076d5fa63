//! Background worker: snapshot lifecycle and the sync event loop.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use url::Url;

use crate::cache::{CacheStorage, WarmReport};
use crate::channel::{Notice, NoticeChannel};
use crate::db::Database;
use crate::error::{Error, Result};
use crate::net::Fetcher;
use crate::sync::{Delivery, NetworkStatus, SyncCoordinator};

/// Key under which the active snapshot name is recorded
const ACTIVE_SNAPSHOT_KEY: &str = "active_snapshot";

pub struct Worker<F: Fetcher, D: Delivery> {
  db: Database,
  storage: CacheStorage,
  /// Name of the snapshot matching the running version
  snapshot: String,
  resources: Vec<Url>,
  fetcher: Arc<F>,
  coordinator: Option<SyncCoordinator<D>>,
  notices: NoticeChannel,
}

impl<F: Fetcher, D: Delivery> Worker<F, D> {
  pub fn new(
    db: Database,
    snapshot: &str,
    resources: Vec<Url>,
    fetcher: Arc<F>,
    notices: NoticeChannel,
  ) -> Self {
    Self {
      storage: CacheStorage::new(db.clone()),
      db,
      snapshot: snapshot.to_string(),
      resources,
      fetcher,
      coordinator: None,
      notices,
    }
  }

  /// Attach the coordinator that drains the queue. Without one the worker
  /// only maintains the cache.
  pub fn with_coordinator(mut self, coordinator: SyncCoordinator<D>) -> Self {
    self.coordinator = Some(coordinator);
    self
  }

  /// Warm the current snapshot from the resource list.
  pub async fn install(&self) -> Result<WarmReport> {
    let cache = self.storage.open(&self.snapshot).await?;
    let report = cache.warm(self.fetcher.as_ref(), &self.resources).await;

    self.notices.post(Notice::CacheWarmed {
      snapshot: self.snapshot.clone(),
      stored: report.stored.len(),
      failed: report.failed.len(),
    });
    Ok(report)
  }

  /// Drop every snapshot but the current one and mark it active.
  pub async fn activate(&self) -> Result<Vec<String>> {
    let evicted = self.storage.evict_stale(&self.snapshot).await?;
    self.db.set_value(ACTIVE_SNAPSHOT_KEY, &self.snapshot).await?;

    if !evicted.is_empty() {
      self.notices.post(Notice::SnapshotsEvicted {
        evicted: evicted.clone(),
      });
    }
    Ok(evicted)
  }

  /// Install and activate when the version changed since the last run.
  /// Returns whether a transition happened.
  pub async fn ensure_current(&self) -> Result<bool> {
    let active = self.db.get_value(ACTIVE_SNAPSHOT_KEY).await?;
    if active.as_deref() == Some(self.snapshot.as_str()) {
      return Ok(false);
    }

    tracing::info!(
      from = active.as_deref().unwrap_or("<none>"),
      to = %self.snapshot,
      "version transition"
    );
    let report = self.install().await?;
    if report.stored.is_empty() && !self.resources.is_empty() {
      // Old snapshots stay stored until an install succeeds; the next start retries
      tracing::warn!(snapshot = %self.snapshot, "nothing cached, activation postponed");
      return Ok(false);
    }
    self.activate().await?;
    Ok(true)
  }

  /// Process status changes and ticks until `shutdown` resolves or the
  /// status sender goes away.
  pub async fn run(
    &self,
    mut status: watch::Receiver<NetworkStatus>,
    tick: Duration,
    shutdown: impl Future<Output = ()>,
  ) -> Result<()> {
    tokio::pin!(shutdown);
    let mut ticker = tokio::time::interval(tick);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
      tokio::select! {
        changed = status.changed() => {
          if changed.is_err() {
            break;
          }
          let current = *status.borrow_and_update();
          self.notices.post(Notice::StatusChanged { status: current });
          if current == NetworkStatus::Online {
            self.offer_drain().await?;
          }
        }
        _ = ticker.tick() => {
          // Retry leftovers whose backoff has elapsed
          if *status.borrow() == NetworkStatus::Online {
            self.offer_drain().await?;
          }
        }
        _ = &mut shutdown => {
          tracing::info!("worker shutting down");
          break;
        }
      }
    }

    Ok(())
  }

  /// Connectivity is available: let the coordinator drain if it is
  /// registered. Only an unusable store stops the worker.
  async fn offer_drain(&self) -> Result<()> {
    let Some(coordinator) = &self.coordinator else {
      return Ok(());
    };

    match coordinator.on_connectivity_restored().await {
      Ok(Some(report)) => {
        tracing::debug!(tag = coordinator.tag(), ?report, "sync drained");
        Ok(())
      }
      Ok(None) => Ok(()),
      Err(e @ Error::StoreUnavailable(_)) => Err(e),
      Err(e) => {
        tracing::error!(tag = coordinator.tag(), error = %e, "drain failed");
        Ok(())
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{RequestKey, StoredResponse};
  use crate::queue::DurableQueue;
  use crate::sync::SyncRegistry;
  use crate::testing::{FakeEndpoint, FakeNetwork};

  fn url(path: &str) -> Url {
    Url::parse("https://app.test/").unwrap().join(path).unwrap()
  }

  fn worker(db: &Database, version: &str, network: &FakeNetwork) -> Worker<FakeNetwork, FakeEndpoint> {
    Worker::new(
      db.clone(),
      &format!("vacation-tracker-{}", version),
      vec![url("index.html"), url("app.js")],
      Arc::new(network.clone()),
      NoticeChannel::new("vacation-tracker"),
    )
  }

  #[tokio::test]
  async fn test_version_bump_installs_and_evicts() {
    let db = Database::open_in_memory().unwrap();
    let network = FakeNetwork::new();
    network.serve(url("index.html").as_str(), StoredResponse::new(200, "v1 html"));
    network.serve(url("app.js").as_str(), StoredResponse::new(200, "v1 js"));

    let v1 = worker(&db, "v1", &network);
    assert!(v1.ensure_current().await.unwrap());
    assert!(!v1.ensure_current().await.unwrap());

    network.serve(url("index.html").as_str(), StoredResponse::new(200, "v2 html"));
    let v2 = worker(&db, "v2", &network);
    assert!(v2.ensure_current().await.unwrap());

    let storage = CacheStorage::new(db.clone());
    assert_eq!(storage.keys().await.unwrap(), vec!["vacation-tracker-v2"]);

    let current = storage.open("vacation-tracker-v2").await.unwrap();
    let index = current
      .lookup(&RequestKey::get(url("index.html").as_str()))
      .await
      .unwrap()
      .unwrap();
    assert_eq!(index.body, b"v2 html");
  }

  #[tokio::test]
  async fn test_offline_install_keeps_old_snapshot() {
    let db = Database::open_in_memory().unwrap();
    let network = FakeNetwork::new();
    network.serve(url("index.html").as_str(), StoredResponse::new(200, "v1 html"));
    worker(&db, "v1", &network).ensure_current().await.unwrap();

    network.set_offline(true);
    let v2 = worker(&db, "v2", &network);
    assert!(!v2.ensure_current().await.unwrap());

    let storage = CacheStorage::new(db.clone());
    let v1 = storage.open("vacation-tracker-v1").await.unwrap();
    assert!(v1
      .lookup(&RequestKey::get(url("index.html").as_str()))
      .await
      .unwrap()
      .is_some());
  }

  #[tokio::test]
  async fn test_status_online_drains_registered_queue() {
    let db = Database::open_in_memory().unwrap();
    let network = FakeNetwork::new();
    let endpoint = FakeEndpoint::new();
    let queue = DurableQueue::new(db.clone());
    let registry = SyncRegistry::new(db.clone());

    queue.enqueue("queued while offline").await.unwrap();
    registry.register("sync-vacations").await.unwrap();

    let coordinator = SyncCoordinator::new(
      queue.clone(),
      registry,
      Arc::new(endpoint.clone()),
      "sync-vacations",
    );
    let worker = worker(&db, "v1", &network).with_coordinator(coordinator);

    let (tx, rx) = watch::channel(NetworkStatus::Offline);
    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();

    let handle = tokio::spawn(async move {
      worker
        .run(rx, Duration::from_secs(3600), async {
          let _ = stop_rx.await;
        })
        .await
    });

    tx.send(NetworkStatus::Online).unwrap();
    for _ in 0..100 {
      if !endpoint.delivered().is_empty() {
        break;
      }
      tokio::time::sleep(Duration::from_millis(10)).await;
    }
    stop_tx.send(()).unwrap();
    handle.await.unwrap().unwrap();

    assert_eq!(endpoint.delivered(), vec!["queued while offline".to_string()]);
    assert_eq!(queue.len().await.unwrap(), 0);
  }
}
