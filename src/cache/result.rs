//! Result type for served requests.

use chrono::{DateTime, Utc};

/// A reply together with where it came from.
#[derive(Debug)]
pub struct Served<T> {
  /// The actual data
  pub data: T,
  /// Where the data came from
  pub source: ServedFrom,
  /// When the data was cached (if from cache)
  pub cached_at: Option<DateTime<Utc>>,
}

impl<T> Served<T> {
  /// Fresh data from the network.
  pub fn from_network(data: T) -> Self {
    Self {
      data,
      source: ServedFrom::Network,
      cached_at: None,
    }
  }

  /// The cache entry for the request itself.
  pub fn from_cache(data: T, cached_at: DateTime<Utc>) -> Self {
    Self {
      data,
      source: ServedFrom::Cache,
      cached_at: Some(cached_at),
    }
  }

  /// The offline fallback document, standing in for a different request.
  pub fn fallback(data: T, cached_at: DateTime<Utc>) -> Self {
    Self {
      data,
      source: ServedFrom::Fallback,
      cached_at: Some(cached_at),
    }
  }
}

/// Indicates where a reply came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServedFrom {
  /// Fresh response from the network
  Network,
  /// Stored response for the same request
  Cache,
  /// Stored offline fallback document
  Fallback,
}

impl std::fmt::Display for ServedFrom {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let s = match self {
      Self::Network => "network",
      Self::Cache => "cache",
      Self::Fallback => "offline fallback",
    };
    f.write_str(s)
  }
}
