//! The offline agent: install, activate, and fetch handlers.
//!
//! The handlers here know nothing about lifecycle ordering; [`Dispatcher`]
//! decides which one runs and tracks the agent's state.

mod lifecycle;

pub use lifecycle::{Completion, Dispatcher, Event, WorkerState};

use color_eyre::{eyre::eyre, Result};
use futures::future::try_join_all;
use std::sync::Arc;
use tracing::{debug, info};
use url::Url;

use crate::cache::{CacheLayer, CacheStorage, Served};
use crate::config::AgentConfig;
use crate::net::{Destination, Network, Request, Response};

/// What the agent did with an intercepted request.
#[derive(Debug)]
pub enum FetchOutcome {
  /// The agent produced the reply
  Respond(Served<Response>),
  /// The agent stayed out of it; the host handles the request normally
  PassThrough,
}

pub struct Agent<S: CacheStorage, N: Network> {
  config: AgentConfig,
  cache: CacheLayer<S>,
  network: Arc<N>,
}

impl<S: CacheStorage, N: Network> Agent<S, N> {
  pub fn new(config: AgentConfig, storage: Arc<S>, network: Arc<N>) -> Self {
    let cache = CacheLayer::new(storage, config.cache_name);
    Self {
      config,
      cache,
      network,
    }
  }

  pub fn config(&self) -> &AgentConfig {
    &self.config
  }

  /// Provision the current store with every core asset.
  ///
  /// All assets are fetched concurrently and written in one batch once every
  /// fetch has returned a 2xx response. Any failure aborts the whole install
  /// and nothing is written.
  pub async fn install(&self) -> Result<Vec<Url>> {
    self.cache.open()?;

    let urls = self
      .config
      .core_assets
      .iter()
      .map(|path| self.config.resolve(path))
      .collect::<Result<Vec<_>>>()?;

    let responses = try_join_all(urls.iter().map(|url| async move {
      let response = self.network.fetch(&Request::get(url.clone())).await?;
      if !response.ok() {
        return Err(eyre!("Core asset {} returned {}", url, response.status));
      }
      Ok::<_, color_eyre::Report>((url.clone(), response))
    }))
    .await?;

    self.cache.store_all(responses)?;

    info!(cache = self.cache.cache_name(), assets = urls.len(), "provisioned core assets");
    Ok(urls)
  }

  /// Drop every cache store left behind by older versions.
  pub fn activate(&self) -> Result<Vec<String>> {
    let removed = self.cache.reconcile()?;
    info!(cache = self.cache.cache_name(), removed = removed.len(), "caches reconciled");
    Ok(removed)
  }

  /// Decide how to serve an intercepted request.
  ///
  /// Cross-origin requests pass through. Images are served cache-first;
  /// everything else is network-first with the offline fallback document as
  /// the last resort.
  pub async fn fetch(&self, request: &Request) -> Result<FetchOutcome> {
    if !request.is_same_origin(&self.config.scope) {
      debug!(url = %request.url, "cross-origin request, passing through");
      return Ok(FetchOutcome::PassThrough);
    }

    let served = if request.destination == Destination::Image {
      self
        .cache
        .cache_first(request, self.config.image_refresh, || {
          self.network.fetch(request)
        })
        .await?
    } else {
      let fallback = self.config.resolve(self.config.offline_fallback)?;
      self
        .cache
        .network_first(request, &fallback, || self.network.fetch(request))
        .await?
    };

    debug!(url = %request.url, source = %served.source, status = served.data.status.as_u16(), "served");
    Ok(FetchOutcome::Respond(served))
  }
}
