//! Cache storage trait and SQLite implementation.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::StatusCode;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;
use url::Url;

use crate::net::{RequestKey, Response};

/// A response read back from a cache store.
#[derive(Debug)]
pub struct CachedResponse {
  pub response: Response,
  /// When the entry was written
  pub stored_at: DateTime<Utc>,
}

/// Listing row for a cache entry, without its body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntrySummary {
  pub url: String,
  pub status: u16,
  pub size: usize,
  pub stored_at: DateTime<Utc>,
}

/// Named request/response stores, persisted outside the agent.
///
/// Every method is a single atomic operation; callers never hold a lock
/// across calls.
pub trait CacheStorage: Send + Sync {
  /// Create the named store if it does not exist yet.
  fn open(&self, cache_name: &str) -> Result<()>;

  /// Names of all stores, oldest first.
  fn keys(&self) -> Result<Vec<String>>;

  /// Delete a store and all its entries. Returns false if it did not exist.
  fn delete(&self, cache_name: &str) -> Result<bool>;

  /// Store a response, replacing any entry with the same key. Consumes the
  /// response body.
  fn put(&self, cache_name: &str, key: &RequestKey, response: Response) -> Result<()>;

  /// Store several responses in one transaction: either all land or none do.
  fn put_all(&self, cache_name: &str, entries: Vec<(RequestKey, Response)>) -> Result<()>;

  /// Look up a single entry.
  fn get(&self, cache_name: &str, key: &RequestKey) -> Result<Option<CachedResponse>>;

  /// List the entries of a store in URL order.
  fn entries(&self, cache_name: &str) -> Result<Vec<EntrySummary>>;
}

/// SQLite-based cache storage implementation.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Open (or create) the database at `path`.
  pub fn open_file(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::with_connection(conn)
  }

  #[cfg(test)]
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory cache database: {}", e))?;
    Self::with_connection(conn)
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    let storage = Self {
      conn: Mutex::new(conn),
    };
    storage.run_migrations()?;
    Ok(storage)
  }

  /// Run database migrations for cache tables.
  fn run_migrations(&self) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(())
  }
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
PRAGMA foreign_keys = ON;

-- Named cache stores
CREATE TABLE IF NOT EXISTS caches (
    name TEXT PRIMARY KEY,
    created_at TEXT NOT NULL
);

-- Stored responses, one per request per store
CREATE TABLE IF NOT EXISTS cache_entries (
    cache_name TEXT NOT NULL,
    request_hash TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    stored_at TEXT NOT NULL,
    PRIMARY KEY (cache_name, request_hash),
    FOREIGN KEY (cache_name) REFERENCES caches(name) ON DELETE CASCADE
);
"#;

fn ensure_cache(conn: &Connection, cache_name: &str) -> Result<()> {
  conn
    .execute(
      "INSERT OR IGNORE INTO caches (name, created_at) VALUES (?, ?)",
      params![cache_name, Utc::now().to_rfc3339()],
    )
    .map_err(|e| eyre!("Failed to create cache {}: {}", cache_name, e))?;
  Ok(())
}

fn insert_entry(
  conn: &Connection,
  cache_name: &str,
  key: &RequestKey,
  mut response: Response,
) -> Result<()> {
  let headers = encode_headers(&response.headers)?;
  let body = response.take_body()?;

  conn
    .execute(
      "INSERT OR REPLACE INTO cache_entries (cache_name, request_hash, url, status, headers, body, stored_at)
       VALUES (?, ?, ?, ?, ?, ?, ?)",
      params![
        cache_name,
        key.hash,
        key.url,
        response.status.as_u16(),
        headers,
        body.as_ref(),
        Utc::now().to_rfc3339(),
      ],
    )
    .map_err(|e| eyre!("Failed to store {} in {}: {}", key.url, cache_name, e))?;

  Ok(())
}

impl CacheStorage for SqliteStorage {
  fn open(&self, cache_name: &str) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    ensure_cache(&conn, cache_name)
  }

  fn keys(&self) -> Result<Vec<String>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare("SELECT name FROM caches ORDER BY rowid")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list caches: {}", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read cache name: {}", e))?;

    Ok(names)
  }

  fn delete(&self, cache_name: &str) -> Result<bool> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let deleted = conn
      .execute("DELETE FROM caches WHERE name = ?", params![cache_name])
      .map_err(|e| eyre!("Failed to delete cache {}: {}", cache_name, e))?;

    Ok(deleted > 0)
  }

  fn put(&self, cache_name: &str, key: &RequestKey, response: Response) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    ensure_cache(&conn, cache_name)?;
    insert_entry(&conn, cache_name, key, response)
  }

  fn put_all(&self, cache_name: &str, entries: Vec<(RequestKey, Response)>) -> Result<()> {
    let mut conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    ensure_cache(&tx, cache_name)?;
    for (key, response) in entries {
      insert_entry(&tx, cache_name, &key, response)?;
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }

  fn get(&self, cache_name: &str, key: &RequestKey) -> Result<Option<CachedResponse>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let row: Option<(String, u16, String, Vec<u8>, String)> = conn
      .query_row(
        "SELECT url, status, headers, body, stored_at FROM cache_entries
         WHERE cache_name = ? AND request_hash = ?",
        params![cache_name, key.hash],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?)),
      )
      .optional()
      .map_err(|e| eyre!("Failed to look up {} in {}: {}", key.url, cache_name, e))?;

    let Some((url, status, headers, body, stored_at)) = row else {
      return Ok(None);
    };

    let url = Url::parse(&url).map_err(|e| eyre!("Corrupt cached URL '{}': {}", url, e))?;
    let status =
      StatusCode::from_u16(status).map_err(|e| eyre!("Corrupt cached status {}: {}", status, e))?;
    let headers = decode_headers(&headers)?;

    Ok(Some(CachedResponse {
      response: Response::new(url, status, headers, Bytes::from(body)),
      stored_at: parse_datetime(&stored_at)?,
    }))
  }

  fn entries(&self, cache_name: &str) -> Result<Vec<EntrySummary>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare(
        "SELECT url, status, length(body), stored_at FROM cache_entries
         WHERE cache_name = ?
         ORDER BY url",
      )
      .map_err(|e| eyre!("Failed to prepare entry query: {}", e))?;

    let rows: Vec<(String, u16, i64, String)> = stmt
      .query_map(params![cache_name], |row| {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
      })
      .map_err(|e| eyre!("Failed to query entries: {}", e))?
      .collect::<rusqlite::Result<_>>()
      .map_err(|e| eyre!("Failed to read entry: {}", e))?;

    rows
      .into_iter()
      .map(|(url, status, size, stored_at)| {
        Ok(EntrySummary {
          url,
          status,
          size: usize::try_from(size).unwrap_or_default(),
          stored_at: parse_datetime(&stored_at)?,
        })
      })
      .collect()
  }
}

/// Serialize headers as a JSON list of name/value pairs. Values are stored
/// hex-encoded since they may hold any byte outside the visible ASCII range.
fn encode_headers(headers: &HeaderMap) -> Result<String> {
  let pairs: Vec<(&str, String)> = headers
    .iter()
    .map(|(name, value)| (name.as_str(), hex::encode(value.as_bytes())))
    .collect();

  serde_json::to_string(&pairs).map_err(|e| eyre!("Failed to serialize headers: {}", e))
}

fn decode_headers(raw: &str) -> Result<HeaderMap> {
  let pairs: Vec<(String, String)> =
    serde_json::from_str(raw).map_err(|e| eyre!("Failed to deserialize headers: {}", e))?;

  let mut headers = HeaderMap::new();
  for (name, value) in pairs {
    let name = HeaderName::from_bytes(name.as_bytes())
      .map_err(|e| eyre!("Invalid stored header name '{}': {}", name, e))?;
    let value = hex::decode(&value)
      .map_err(|e| eyre!("Invalid stored value for header {}: {}", name, e))?;
    let value = HeaderValue::from_bytes(&value)
      .map_err(|e| eyre!("Invalid stored value for header {}: {}", name, e))?;
    headers.append(name, value);
  }
  Ok(headers)
}

/// Parse an RFC 3339 timestamp written by this module.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}
