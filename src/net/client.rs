use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use tracing::debug;

use super::request::Request;
use super::response::Response;

/// Network access used by the agent.
///
/// An `Err` means the request never produced a response (unreachable host,
/// DNS failure, connection reset). HTTP error statuses are still `Ok`.
#[async_trait]
pub trait Network: Send + Sync {
  async fn fetch(&self, request: &Request) -> Result<Response>;
}

/// Network backed by a reqwest client.
#[derive(Clone)]
pub struct HttpNetwork {
  client: reqwest::Client,
}

impl HttpNetwork {
  pub fn new() -> Result<Self> {
    let client = reqwest::Client::builder()
      .user_agent(concat!("recipe-vault-agent/", env!("CARGO_PKG_VERSION")))
      .gzip(true)
      .deflate(true)
      .build()
      .map_err(|e| eyre!("Failed to build HTTP client: {}", e))?;

    Ok(Self { client })
  }
}

#[async_trait]
impl Network for HttpNetwork {
  async fn fetch(&self, request: &Request) -> Result<Response> {
    let response = self
      .client
      .request(request.method.clone(), request.url.clone())
      .headers(request.headers.clone())
      .send()
      .await
      .map_err(|e| eyre!("Network error fetching {}: {}", request.url, e))?;

    // Where the response came from after any redirects
    let url = response.url().clone();
    let status = response.status();
    let headers = response.headers().clone();

    let body = response
      .bytes()
      .await
      .map_err(|e| eyre!("Failed to read response body for {}: {}", request.url, e))?;

    debug!(url = %url, status = status.as_u16(), bytes = body.len(), "fetched");

    Ok(Response::new(url, status, headers, body))
  }
}

#[cfg(test)]
pub(crate) mod testing {
  //! Scripted network for exercising fetch strategies.

  use super::*;
  use bytes::Bytes;
  use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
  use reqwest::StatusCode;
  use std::collections::{HashMap, HashSet};
  use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
  use std::sync::Mutex;

  #[derive(Clone)]
  struct Route {
    status: StatusCode,
    content_type: &'static str,
    body: Bytes,
  }

  /// Serves canned bodies by URL. Unknown URLs get a 404; going offline makes
  /// every fetch fail. Hung URLs never settle.
  #[derive(Default)]
  pub struct MockNetwork {
    routes: Mutex<HashMap<String, Route>>,
    hung: Mutex<HashSet<String>>,
    offline: AtomicBool,
    calls: AtomicUsize,
  }

  impl MockNetwork {
    pub fn new() -> Self {
      Self::default()
    }

    pub fn serve(&self, url: &str, content_type: &'static str, body: &[u8]) {
      self.serve_status(url, StatusCode::OK, content_type, body);
    }

    pub fn serve_status(&self, url: &str, status: StatusCode, content_type: &'static str, body: &[u8]) {
      let route = Route {
        status,
        content_type,
        body: Bytes::copy_from_slice(body),
      };
      self.routes.lock().unwrap().insert(url.to_string(), route);
    }

    pub fn hang(&self, url: &str) {
      self.hung.lock().unwrap().insert(url.to_string());
    }

    pub fn set_offline(&self, offline: bool) {
      self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
      self.calls.load(Ordering::SeqCst)
    }
  }

  #[async_trait]
  impl Network for MockNetwork {
    async fn fetch(&self, request: &Request) -> Result<Response> {
      self.calls.fetch_add(1, Ordering::SeqCst);

      if self.offline.load(Ordering::SeqCst) {
        return Err(eyre!("Network error fetching {}: offline", request.url));
      }

      let hung = self.hung.lock().unwrap().contains(request.url.as_str());
      if hung {
        return futures::future::pending().await;
      }

      let route = self
        .routes
        .lock()
        .unwrap()
        .get(request.url.as_str())
        .cloned()
        .unwrap_or(Route {
          status: StatusCode::NOT_FOUND,
          content_type: "text/plain",
          body: Bytes::from_static(b"not found"),
        });

      let mut headers = HeaderMap::new();
      headers.insert(CONTENT_TYPE, HeaderValue::from_static(route.content_type));

      Ok(Response::new(request.url.clone(), route.status, headers, route.body))
    }
  }
}
