//! Cache layer that orchestrates caching logic with network fetching.

use color_eyre::Result;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

use super::result::Served;
use super::storage::{CacheStorage, CachedResponse};
use crate::config::ImageRefresh;
use crate::net::{Request, RequestKey, Response};

/// The current cache store plus the serving strategies built on it.
///
/// This layer sits between the agent and the network, deciding when a reply
/// comes from the store and keeping the store refreshed with whatever the
/// network returns.
pub struct CacheLayer<S: CacheStorage> {
  storage: Arc<S>,
  /// Name of the store this layer reads and writes
  cache_name: String,
}

impl<S: CacheStorage> CacheLayer<S> {
  pub fn new(storage: Arc<S>, cache_name: impl Into<String>) -> Self {
    Self {
      storage,
      cache_name: cache_name.into(),
    }
  }

  pub fn cache_name(&self) -> &str {
    &self.cache_name
  }

  /// Create the current store if it is missing.
  pub fn open(&self) -> Result<()> {
    self.storage.open(&self.cache_name)
  }

  /// Find the stored response for a request. Non-GET requests always miss.
  pub fn lookup(&self, request: &Request) -> Result<Option<CachedResponse>> {
    match request.cache_key() {
      Some(key) => self.storage.get(&self.cache_name, &key),
      None => Ok(None),
    }
  }

  /// Find the stored response for a plain GET of `url`.
  pub fn lookup_url(&self, url: &Url) -> Result<Option<CachedResponse>> {
    self.storage.get(&self.cache_name, &RequestKey::from_url(url))
  }

  /// Write a batch of GET responses atomically.
  pub fn store_all(&self, entries: Vec<(Url, Response)>) -> Result<()> {
    let entries = entries
      .into_iter()
      .map(|(url, response)| (RequestKey::from_url(&url), response))
      .collect();
    self.storage.put_all(&self.cache_name, entries)
  }

  /// Duplicate `response`, store the copy, and hand back the original.
  ///
  /// The write is best-effort: a storage failure is logged and the response is
  /// still returned.
  fn respond_and_store(&self, request: &Request, response: Response) -> Result<Response> {
    let Some(key) = request.cache_key() else {
      return Ok(response);
    };

    let copy = response.duplicate()?;
    if let Err(e) = self.storage.put(&self.cache_name, &key, copy) {
      warn!(url = %request.url, error = %e, "failed to update cache");
    }

    Ok(response)
  }

  /// Delete every store whose name is not the current one.
  ///
  /// Returns the names that were removed.
  pub fn reconcile(&self) -> Result<Vec<String>> {
    let mut removed = Vec::new();

    for name in self.storage.keys()? {
      if name == self.cache_name {
        continue;
      }
      if self.storage.delete(&name)? {
        info!(cache = %name, "deleted stale cache");
        removed.push(name);
      }
    }

    Ok(removed)
  }

  /// Serve with a cache-first strategy.
  ///
  /// 1. Look the request up in the store
  /// 2. With `RefreshOnHit` (or on a miss), fetch from the network; a
  ///    response replaces the entry and is returned
  /// 3. If the fetch fails, return the hit (offline mode)
  /// 4. With neither, the network error propagates
  pub async fn cache_first<F, Fut>(
    &self,
    request: &Request,
    refresh: ImageRefresh,
    fetcher: F,
  ) -> Result<Served<Response>>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Response>>,
  {
    let hit = match (self.lookup(request)?, refresh) {
      (Some(cached), ImageRefresh::ServeHit) => {
        debug!(url = %request.url, stored_at = %cached.stored_at, "cache hit");
        return Ok(Served::from_cache(cached.response, cached.stored_at));
      }
      (hit, _) => hit,
    };

    match fetcher().await {
      Ok(response) => {
        let response = self.respond_and_store(request, response)?;
        Ok(Served::from_network(response))
      }
      Err(e) => match hit {
        Some(cached) => {
          debug!(url = %request.url, error = %e, "network failed, serving cached copy");
          Ok(Served::from_cache(cached.response, cached.stored_at))
        }
        None => Err(e),
      },
    }
  }

  /// Serve with a network-first strategy.
  ///
  /// 1. Fetch from the network; a response is stored and returned
  /// 2. On failure, return the stored response for the request
  /// 3. Otherwise return the stored `fallback` document
  /// 4. With nothing stored, the network error propagates
  pub async fn network_first<F, Fut>(
    &self,
    request: &Request,
    fallback: &Url,
    fetcher: F,
  ) -> Result<Served<Response>>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Response>>,
  {
    let error = match fetcher().await {
      Ok(response) => {
        let response = self.respond_and_store(request, response)?;
        return Ok(Served::from_network(response));
      }
      Err(e) => e,
    };

    warn!(url = %request.url, error = %error, "network failed, trying cache");

    if let Some(cached) = self.lookup(request)? {
      return Ok(Served::from_cache(cached.response, cached.stored_at));
    }

    if let Some(cached) = self.lookup_url(fallback)? {
      return Ok(Served::fallback(cached.response, cached.stored_at));
    }

    Err(error.wrap_err(format!("{} is not cached and no offline fallback is stored", request.url)))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{EntrySummary, ServedFrom, SqliteStorage};
  use bytes::Bytes;
  use color_eyre::eyre::eyre;
  use reqwest::header::HeaderMap;
  use reqwest::StatusCode;

  const PAGE: &str = "https://recipes.example.org/page";
  const INDEX: &str = "https://recipes.example.org/index.html";

  /// Reads work, writes always fail.
  struct ReadOnly(SqliteStorage);

  impl CacheStorage for ReadOnly {
    fn open(&self, cache_name: &str) -> Result<()> {
      self.0.open(cache_name)
    }
    fn keys(&self) -> Result<Vec<String>> {
      self.0.keys()
    }
    fn delete(&self, cache_name: &str) -> Result<bool> {
      self.0.delete(cache_name)
    }
    fn put(&self, _cache_name: &str, _key: &RequestKey, _response: Response) -> Result<()> {
      Err(eyre!("quota exceeded"))
    }
    fn put_all(&self, _cache_name: &str, _entries: Vec<(RequestKey, Response)>) -> Result<()> {
      Err(eyre!("quota exceeded"))
    }
    fn get(&self, cache_name: &str, key: &RequestKey) -> Result<Option<CachedResponse>> {
      self.0.get(cache_name, key)
    }
    fn entries(&self, cache_name: &str) -> Result<Vec<EntrySummary>> {
      self.0.entries(cache_name)
    }
  }

  fn url(s: &str) -> Url {
    Url::parse(s).unwrap()
  }

  fn response(u: &str, body: &'static str) -> Response {
    Response::new(url(u), StatusCode::OK, HeaderMap::new(), Bytes::from_static(body.as_bytes()))
  }

  fn layer() -> CacheLayer<SqliteStorage> {
    CacheLayer::new(Arc::new(SqliteStorage::open_in_memory().unwrap()), "v2")
  }

  #[tokio::test]
  async fn test_network_first_returns_response_it_stored() {
    let layer = layer();
    let request = Request::get(url(PAGE));

    let mut served = layer
      .network_first(&request, &url(INDEX), || async { Ok(response(PAGE, "fresh")) })
      .await
      .unwrap();

    assert_eq!(served.source, ServedFrom::Network);
    assert_eq!(served.data.take_body().unwrap(), Bytes::from_static(b"fresh"));

    let mut cached = layer.lookup(&request).unwrap().unwrap();
    assert_eq!(cached.response.take_body().unwrap(), Bytes::from_static(b"fresh"));
  }

  #[tokio::test]
  async fn test_network_first_error_mentions_request() {
    let layer = layer();
    let request = Request::get(url(PAGE));

    let err = layer
      .network_first(&request, &url(INDEX), || async { Err(eyre!("offline")) })
      .await
      .unwrap_err();

    assert!(err.to_string().contains(PAGE));
  }

  #[tokio::test]
  async fn test_cache_first_miss_offline_propagates_network_error() {
    let layer = layer();
    let request = Request::get(url(PAGE));

    let err = layer
      .cache_first(&request, ImageRefresh::RefreshOnHit, || async {
        Err(eyre!("offline"))
      })
      .await
      .unwrap_err();

    assert_eq!(err.to_string(), "offline");
  }

  #[tokio::test]
  async fn test_failed_write_still_serves_response() {
    let layer = CacheLayer::new(Arc::new(ReadOnly(SqliteStorage::open_in_memory().unwrap())), "v2");
    let request = Request::get(url(PAGE));

    let served = layer
      .network_first(&request, &url(INDEX), || async { Ok(response(PAGE, "fresh")) })
      .await
      .unwrap();

    assert_eq!(served.source, ServedFrom::Network);
    assert!(layer.lookup(&request).unwrap().is_none());
  }

  #[test]
  fn test_reconcile_keeps_current() {
    let layer = layer();
    let storage = &layer.storage;
    storage.open("v1").unwrap();
    storage.open("v2").unwrap();
    storage.open("v3-beta").unwrap();

    let removed = layer.reconcile().unwrap();

    assert_eq!(removed, vec!["v1", "v3-beta"]);
    assert_eq!(storage.keys().unwrap(), vec!["v2"]);
  }

  #[test]
  fn test_reconcile_with_only_current_is_noop() {
    let layer = layer();
    layer.open().unwrap();

    assert!(layer.reconcile().unwrap().is_empty());
    assert_eq!(layer.storage.keys().unwrap(), vec!["v2"]);
  }
}
