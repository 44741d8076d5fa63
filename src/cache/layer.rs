//! Fetch interception: cache-first with network fallback and an offline page.

use std::sync::Arc;
use url::Url;

use super::snapshot::AssetCache;
use super::types::{RequestKey, Served};
use crate::error::Result;
use crate::net::{Fetcher, Request};

/// Sits between the application and the network, answering every request
/// from the current snapshot when it can.
///
/// 1. Hit in the current snapshot - return it verbatim
/// 2. Miss - fetch from network, store a copy, return it
/// 3. Network failure - navigations get the fallback page, everything else
///    gets the error (or the configured offline asset)
pub struct FetchInterceptor<F: Fetcher> {
  cache: AssetCache,
  fetcher: Arc<F>,
  /// Document served to navigations when offline
  fallback_page: Option<Url>,
  /// Subresource served when offline, only if explicitly configured
  offline_asset: Option<Url>,
}

impl<F: Fetcher> FetchInterceptor<F> {
  pub fn new(cache: AssetCache, fetcher: Arc<F>) -> Self {
    Self {
      cache,
      fetcher,
      fallback_page: None,
      offline_asset: None,
    }
  }

  pub fn with_fallback_page(mut self, url: Url) -> Self {
    self.fallback_page = Some(url);
    self
  }

  pub fn with_offline_asset(mut self, url: Url) -> Self {
    self.offline_asset = Some(url);
    self
  }

  /// Resolve `request` following the cache, network, fallback precedence.
  pub async fn handle(&self, request: &Request) -> Result<Served> {
    let key = request.key();

    // Check cache first
    if let Some(cached) = self.cache.lookup(&key).await? {
      tracing::debug!(url = %request.url, "cache hit");
      return Ok(Served::from_cache(cached));
    }

    match self.fetcher.fetch(request).await {
      Ok(response) => {
        if request.method == "GET" && response.is_success() {
          // Storing is opportunistic, the caller still gets the response
          if let Err(e) = self.cache.put(&key, &response).await {
            tracing::warn!(url = %request.url, error = %e, "failed to cache response");
          }
        }
        Ok(Served::from_network(response))
      }
      Err(e) => {
        tracing::error!(url = %request.url, error = %e, "fetch failed");

        let fallback = if request.is_navigation() {
          self.fallback_page.as_ref()
        } else {
          self.offline_asset.as_ref()
        };

        if let Some(url) = fallback {
          if let Some(cached) = self.cache.lookup(&RequestKey::get(url.as_str())).await? {
            tracing::info!(url = %request.url, fallback = %url, "serving offline fallback");
            return Ok(Served::fallback(cached));
          }
        }

        Err(e)
      }
    }
  }
}

impl<F: Fetcher> Clone for FetchInterceptor<F> {
  fn clone(&self) -> Self {
    Self {
      cache: self.cache.clone(),
      fetcher: Arc::clone(&self.fetcher),
      fallback_page: self.fallback_page.clone(),
      offline_asset: self.offline_asset.clone(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::types::ResponseSource;
  use crate::cache::{CacheStorage, StoredResponse};
  use crate::db::Database;
  use crate::error::Error;
  use crate::testing::FakeNetwork;

  fn url(path: &str) -> Url {
    Url::parse("https://app.test/").unwrap().join(path).unwrap()
  }

  async fn setup() -> (AssetCache, FakeNetwork, FetchInterceptor<FakeNetwork>) {
    let db = Database::open_in_memory().unwrap();
    let cache = CacheStorage::new(db)
      .open("vacation-tracker-v1")
      .await
      .unwrap();
    let network = FakeNetwork::new();
    let interceptor = FetchInterceptor::new(cache.clone(), Arc::new(network.clone()))
      .with_fallback_page(url("/index.html"));
    (cache, network, interceptor)
  }

  #[tokio::test]
  async fn test_cache_hit_served_while_offline() {
    let (cache, network, interceptor) = setup().await;
    let cached = StoredResponse::new(200, "cached css");
    cache
      .put(&RequestKey::get(url("style.css").as_str()), &cached)
      .await
      .unwrap();
    network.set_offline(true);

    let served = interceptor
      .handle(&Request::get(url("style.css")))
      .await
      .unwrap();

    assert_eq!(served.source, ResponseSource::Cache);
    assert_eq!(served.response, cached);
    assert_eq!(network.calls(), 0);
  }

  #[tokio::test]
  async fn test_miss_fetches_and_stores() {
    let (cache, network, interceptor) = setup().await;
    network.serve(url("app.js").as_str(), StoredResponse::new(200, "js"));

    let served = interceptor.handle(&Request::get(url("app.js"))).await.unwrap();
    assert_eq!(served.source, ResponseSource::Network);

    // Second request is answered from the snapshot
    network.set_offline(true);
    let served = interceptor.handle(&Request::get(url("app.js"))).await.unwrap();
    assert_eq!(served.source, ResponseSource::Cache);
    assert_eq!(served.response.body, b"js");
    assert!(cache
      .lookup(&RequestKey::get(url("app.js").as_str()))
      .await
      .unwrap()
      .is_some());
  }

  #[tokio::test]
  async fn test_error_status_is_returned_but_not_stored() {
    let (cache, network, interceptor) = setup().await;
    network.serve(url("gone.js").as_str(), StoredResponse::new(404, "not found"));

    let served = interceptor.handle(&Request::get(url("gone.js"))).await.unwrap();

    assert_eq!(served.source, ResponseSource::Network);
    assert_eq!(served.response.status, 404);
    assert!(cache
      .lookup(&RequestKey::get(url("gone.js").as_str()))
      .await
      .unwrap()
      .is_none());
  }

  #[tokio::test]
  async fn test_navigation_falls_back_to_index() {
    let (cache, network, interceptor) = setup().await;
    cache
      .put(
        &RequestKey::get(url("/index.html").as_str()),
        &StoredResponse::new(200, "<html>app</html>"),
      )
      .await
      .unwrap();
    network.set_offline(true);

    let served = interceptor
      .handle(&Request::navigate(url("/vacations/2024")))
      .await
      .unwrap();

    assert_eq!(served.source, ResponseSource::Fallback);
    assert_eq!(served.response.body, b"<html>app</html>");
  }

  #[tokio::test]
  async fn test_navigation_without_fallback_fails() {
    let (_cache, network, interceptor) = setup().await;
    network.set_offline(true);

    let result = interceptor
      .handle(&Request::navigate(url("/vacations")))
      .await;

    assert!(matches!(result, Err(Error::Network(_))));
  }

  #[tokio::test]
  async fn test_subresource_failure_propagates() {
    let (cache, network, interceptor) = setup().await;
    cache
      .put(
        &RequestKey::get(url("/index.html").as_str()),
        &StoredResponse::new(200, "<html>"),
      )
      .await
      .unwrap();
    network.set_offline(true);

    let result = interceptor.handle(&Request::get(url("/logo.png"))).await;

    assert!(matches!(result, Err(Error::Network(_))));
  }

  #[tokio::test]
  async fn test_configured_offline_asset_is_used() {
    let (cache, network, interceptor) = setup().await;
    let interceptor = interceptor.with_offline_asset(url("/assets/offline.png"));
    cache
      .put(
        &RequestKey::get(url("/assets/offline.png").as_str()),
        &StoredResponse::new(200, "png"),
      )
      .await
      .unwrap();
    network.set_offline(true);

    let served = interceptor
      .handle(&Request::get(url("/photo.png")))
      .await
      .unwrap();

    assert_eq!(served.source, ResponseSource::Fallback);
    assert_eq!(served.response.body, b"png");
  }
}
