//! In-memory fakes for the network and delivery seams.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::cache::StoredResponse;
use crate::error::{Error, Result};
use crate::net::{Fetcher, Request};
use crate::queue::PendingRecord;
use crate::sync::Delivery;

/// Network that serves canned responses by URL, or fails everything when
/// switched offline.
#[derive(Clone, Default)]
pub struct FakeNetwork {
  responses: Arc<Mutex<HashMap<String, StoredResponse>>>,
  offline: Arc<AtomicBool>,
  calls: Arc<AtomicUsize>,
}

impl FakeNetwork {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn serve(&self, url: &str, response: StoredResponse) {
    self
      .responses
      .lock()
      .unwrap()
      .insert(url.to_string(), response);
  }

  pub fn set_offline(&self, offline: bool) {
    self.offline.store(offline, Ordering::SeqCst);
  }

  pub fn calls(&self) -> usize {
    self.calls.load(Ordering::SeqCst)
  }
}

impl Fetcher for FakeNetwork {
  async fn fetch(&self, request: &Request) -> Result<StoredResponse> {
    self.calls.fetch_add(1, Ordering::SeqCst);
    if self.offline.load(Ordering::SeqCst) {
      return Err(Error::Network(format!("offline: {}", request.url)));
    }

    let response = self.responses.lock().unwrap().get(request.url.as_str()).cloned();
    response.ok_or_else(|| Error::Network(format!("connection refused: {}", request.url)))
  }
}

/// Endpoint that accepts every payload except the ones told to fail.
#[derive(Clone, Default)]
pub struct FakeEndpoint {
  rejected: Arc<Mutex<HashSet<String>>>,
  delivered: Arc<Mutex<Vec<String>>>,
}

impl FakeEndpoint {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn reject(&self, payload: &str) {
    self.rejected.lock().unwrap().insert(payload.to_string());
  }

  pub fn accept(&self, payload: &str) {
    self.rejected.lock().unwrap().remove(payload);
  }

  pub fn delivered(&self) -> Vec<String> {
    self.delivered.lock().unwrap().clone()
  }
}

impl Delivery for FakeEndpoint {
  async fn deliver(&self, record: &PendingRecord) -> Result<()> {
    tokio::task::yield_now().await;

    if self.rejected.lock().unwrap().contains(&record.payload) {
      return Err(Error::Delivery("HTTP 500: rejected".to_string()));
    }

    self.delivered.lock().unwrap().push(record.payload.clone());
    Ok(())
  }
}
