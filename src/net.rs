//! Outbound requests and the network seam used by the cache and the monitor.

use std::future::Future;
use std::time::Duration;
use url::Url;

use crate::cache::{RequestKey, StoredResponse};
use crate::error::{Error, Result};

/// Whether a request loads a full page or a subresource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestMode {
  /// Loads a full document
  Navigate,
  /// Scripts, styles, images and everything else
  Subresource,
}

/// An outbound resource request.
#[derive(Debug, Clone)]
pub struct Request {
  pub method: String,
  pub url: Url,
  pub mode: RequestMode,
}

impl Request {
  pub fn get(url: Url) -> Self {
    Self {
      method: "GET".to_string(),
      url,
      mode: RequestMode::Subresource,
    }
  }

  pub fn navigate(url: Url) -> Self {
    Self {
      method: "GET".to_string(),
      url,
      mode: RequestMode::Navigate,
    }
  }

  pub fn is_navigation(&self) -> bool {
    self.mode == RequestMode::Navigate
  }

  pub fn key(&self) -> RequestKey {
    RequestKey::new(&self.method, self.url.as_str())
  }
}

/// Something that can perform a live network fetch.
pub trait Fetcher: Send + Sync {
  /// Fetch `request`. Any HTTP status counts as success; only transport
  /// failures are errors.
  fn fetch(&self, request: &Request) -> impl Future<Output = Result<StoredResponse>> + Send;
}

/// Fetcher backed by reqwest.
#[derive(Clone)]
pub struct HttpFetcher {
  client: reqwest::Client,
}

impl HttpFetcher {
  pub fn new(timeout: Duration) -> Result<Self> {
    let client = reqwest::Client::builder()
      .timeout(timeout)
      .build()
      .map_err(|e| Error::Network(format!("failed to build HTTP client: {}", e)))?;

    Ok(Self { client })
  }
}

impl Fetcher for HttpFetcher {
  async fn fetch(&self, request: &Request) -> Result<StoredResponse> {
    let method = reqwest::Method::from_bytes(request.method.as_bytes())
      .map_err(|e| Error::InvalidInput(format!("bad method {}: {}", request.method, e)))?;

    let response = self
      .client
      .request(method, request.url.clone())
      .send()
      .await
      .map_err(|e| Error::Network(format!("{} {}: {}", request.method, request.url, e)))?;

    let status = response.status().as_u16();
    let headers = response
      .headers()
      .iter()
      .filter_map(|(name, value)| {
        value
          .to_str()
          .ok()
          .map(|v| (name.as_str().to_string(), v.to_string()))
      })
      .collect();

    let body = response
      .bytes()
      .await
      .map_err(|e| Error::Network(format!("reading body of {}: {}", request.url, e)))?;

    Ok(StoredResponse {
      status,
      headers,
      body: body.to_vec(),
    })
  }
}
