//! Responses with single-consumption bodies.

use bytes::Bytes;
use color_eyre::{eyre::eyre, Result};
use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use url::Url;

/// A response as handed to the caller or written to a cache store.
///
/// The body can be read exactly once. Anything that needs to both return a
/// response and store it must call [`Response::duplicate`] first.
#[derive(Debug)]
pub struct Response {
  pub url: Url,
  pub status: StatusCode,
  pub headers: HeaderMap,
  body: Option<Bytes>,
}

impl Response {
  pub fn new(url: Url, status: StatusCode, headers: HeaderMap, body: Bytes) -> Self {
    Self {
      url,
      status,
      headers,
      body: Some(body),
    }
  }

  /// True for 2xx statuses.
  pub fn ok(&self) -> bool {
    self.status.is_success()
  }

  /// Split off an independent copy with its own unread body.
  ///
  /// Fails once the body has been consumed.
  pub fn duplicate(&self) -> Result<Response> {
    let body = self
      .body
      .clone()
      .ok_or_else(|| eyre!("Cannot duplicate response for {}: body already used", self.url))?;

    Ok(Response {
      url: self.url.clone(),
      status: self.status,
      headers: self.headers.clone(),
      body: Some(body),
    })
  }

  /// Consume the body.
  pub fn take_body(&mut self) -> Result<Bytes> {
    self
      .body
      .take()
      .ok_or_else(|| eyre!("Response body for {} already used", self.url))
  }

  pub fn content_type(&self) -> Option<&str> {
    self
      .headers
      .get(reqwest::header::CONTENT_TYPE)
      .and_then(|v| v.to_str().ok())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn response(body: &'static str) -> Response {
    Response::new(
      Url::parse("https://recipes.example.org/recipes.json").unwrap(),
      StatusCode::OK,
      HeaderMap::new(),
      Bytes::from_static(body.as_bytes()),
    )
  }

  #[test]
  fn test_duplicate_has_independent_body() {
    let mut original = response(r#"{"recipes":[]}"#);
    let mut copy = original.duplicate().unwrap();

    assert_eq!(copy.take_body().unwrap(), Bytes::from_static(br#"{"recipes":[]}"#));
    assert_eq!(original.take_body().unwrap(), Bytes::from_static(br#"{"recipes":[]}"#));
  }

  #[test]
  fn test_body_reads_once() {
    let mut res = response("hello");
    res.take_body().unwrap();
    assert!(res.take_body().is_err());
  }

  #[test]
  fn test_duplicate_after_read_fails() {
    let mut res = response("hello");
    res.take_body().unwrap();
    assert!(res.duplicate().is_err());
  }
}
