//! Connectivity monitor.
//!
//! Probes the origin on an interval and publishes the result on a watch
//! channel. A change into `Online` is the "connectivity restored" signal.

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use url::Url;

use crate::net::{Fetcher, Request};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkStatus {
  Unknown,
  Online,
  Offline,
}

pub struct ConnectivityMonitor<F: Fetcher> {
  fetcher: Arc<F>,
  probe: Url,
  interval: Duration,
  tx: watch::Sender<NetworkStatus>,
}

impl<F: Fetcher + 'static> ConnectivityMonitor<F> {
  pub fn new(fetcher: Arc<F>, probe: Url, interval: Duration) -> Self {
    let (tx, _rx) = watch::channel(NetworkStatus::Unknown);
    Self {
      fetcher,
      probe,
      interval,
      tx,
    }
  }

  pub fn subscribe(&self) -> watch::Receiver<NetworkStatus> {
    self.tx.subscribe()
  }

  /// Probe once and publish the result if it changed.
  pub async fn probe_once(&self) -> NetworkStatus {
    // Any HTTP answer means the network is there
    let status = match self.fetcher.fetch(&Request::get(self.probe.clone())).await {
      Ok(_) => NetworkStatus::Online,
      Err(e) => {
        tracing::debug!(probe = %self.probe, error = %e, "connectivity probe failed");
        NetworkStatus::Offline
      }
    };

    self.tx.send_if_modified(|current| {
      if *current == status {
        false
      } else {
        tracing::info!(from = ?current, to = ?status, "network status changed");
        *current = status;
        true
      }
    });

    status
  }

  /// Keep probing in the background until every receiver is dropped.
  pub fn spawn(self) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
      loop {
        self.probe_once().await;
        if self.tx.is_closed() {
          break;
        }
        tokio::time::sleep(self.interval).await;
      }
    })
  }
}
