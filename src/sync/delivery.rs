//! Delivery of queued records to the remote endpoint.

use std::future::Future;
use std::time::Duration;
use url::Url;

use crate::error::{Error, Result};
use crate::queue::PendingRecord;

/// The remote endpoint, one record per request.
pub trait Delivery: Send + Sync {
  /// Deliver one record. Must be safe to call twice for the same record.
  fn deliver(&self, record: &PendingRecord) -> impl Future<Output = Result<()>> + Send;
}

/// Key the endpoint can use to de-duplicate retried deliveries.
pub fn idempotency_key(record: &PendingRecord) -> String {
  format!("{}-{}", record.id, record.created_at.timestamp_millis())
}

/// Delivers records by POSTing their payload as JSON.
#[derive(Clone)]
pub struct HttpDelivery {
  client: reqwest::Client,
  endpoint: Url,
  token: Option<String>,
}

impl HttpDelivery {
  pub fn new(endpoint: Url, token: Option<String>, timeout: Duration) -> Result<Self> {
    let client = reqwest::Client::builder()
      .timeout(timeout)
      .build()
      .map_err(|e| Error::Network(format!("failed to build HTTP client: {}", e)))?;

    Ok(Self {
      client,
      endpoint,
      token,
    })
  }
}

impl Delivery for HttpDelivery {
  async fn deliver(&self, record: &PendingRecord) -> Result<()> {
    let mut request = self
      .client
      .post(self.endpoint.clone())
      .header(reqwest::header::CONTENT_TYPE, "application/json")
      .header("Idempotency-Key", idempotency_key(record))
      .body(record.payload.clone());

    if let Some(token) = &self.token {
      request = request.bearer_auth(token);
    }

    let response = request
      .send()
      .await
      .map_err(|e| Error::Network(format!("POST {}: {}", self.endpoint, e)))?;

    if !response.status().is_success() {
      let status = response.status();
      let error_text = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());
      return Err(Error::Delivery(format!("HTTP {}: {}", status, error_text)));
    }

    Ok(())
  }
}
