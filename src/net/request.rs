//! Intercepted request records.

use clap::ValueEnum;
use color_eyre::{eyre::eyre, Result};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Method;
use sha2::{Digest, Sha256};
use url::Url;

/// What kind of resource the page asked for.
///
/// Mirrors the fetch destination a browser attaches to every request. Only
/// `Image` changes how a request is served.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum Destination {
  /// No destination (fetch() / XHR)
  #[default]
  Empty,
  Document,
  Image,
  Script,
  Style,
  Font,
  Manifest,
}

/// A single request seen by the agent. Not persisted.
#[derive(Debug, Clone)]
pub struct Request {
  pub method: Method,
  pub url: Url,
  pub headers: HeaderMap,
  pub destination: Destination,
}

impl Request {
  /// GET request with no destination.
  pub fn get(url: Url) -> Self {
    Self {
      method: Method::GET,
      url,
      headers: HeaderMap::new(),
      destination: Destination::Empty,
    }
  }

  pub fn with_destination(mut self, destination: Destination) -> Self {
    self.destination = destination;
    self
  }

  pub fn with_method(mut self, method: Method) -> Self {
    self.method = method;
    self
  }

  /// Add a header given as a `Name: value` line. Headers are sent with the
  /// request but are not part of its cache identity.
  pub fn with_header_line(mut self, line: &str) -> Result<Self> {
    let (name, value) = line
      .split_once(':')
      .ok_or_else(|| eyre!("Invalid header '{}': expected 'Name: value'", line))?;
    let name = HeaderName::from_bytes(name.trim().as_bytes())
      .map_err(|e| eyre!("Invalid header name in '{}': {}", line, e))?;
    let value = HeaderValue::from_str(value.trim())
      .map_err(|e| eyre!("Invalid header value in '{}': {}", line, e))?;
    self.headers.append(name, value);
    Ok(self)
  }

  /// Whether the request targets the same scheme, host and port as `scope`.
  pub fn is_same_origin(&self, scope: &Url) -> bool {
    self.url.origin() == scope.origin()
  }

  /// Identity of this request inside a cache store.
  ///
  /// Only GET requests can be stored or matched; everything else has no key.
  pub fn cache_key(&self) -> Option<RequestKey> {
    if self.method != Method::GET {
      return None;
    }
    Some(RequestKey::from_url(&self.url))
  }
}

/// Stable key for a cacheable request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestKey {
  /// Absolute URL with the fragment stripped
  pub url: String,
  /// SHA256 of "GET <url>", used as the storage primary key
  pub hash: String,
}

impl RequestKey {
  pub fn from_url(url: &Url) -> Self {
    let mut url = url.clone();
    url.set_fragment(None);
    let url = url.to_string();

    let mut hasher = Sha256::new();
    hasher.update(b"GET ");
    hasher.update(url.as_bytes());
    let hash = hex::encode(hasher.finalize());

    Self { url, hash }
  }
}
