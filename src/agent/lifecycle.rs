//! Lifecycle dispatch for the agent.

use color_eyre::{eyre::eyre, Result};
use tracing::{info, warn};
use url::Url;

use super::{Agent, FetchOutcome};
use crate::cache::CacheStorage;
use crate::net::{Network, Request};

/// Events delivered to the agent by its host
#[derive(Debug)]
pub enum Event {
  /// New agent version is being set up
  Install,
  /// Installed agent is taking over
  Activate,
  /// A controlled page issued a request
  Fetch(Request),
}

/// Where the agent is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
  Parsed,
  Installing,
  Installed,
  Activating,
  Activated,
  /// Install failed; this version will never run
  Redundant,
}

/// Result of a fully handled event.
#[derive(Debug)]
pub enum Completion {
  /// Core assets are cached and the agent has taken over. `removed` lists the
  /// stale caches dropped on the way.
  Installed { cached: Vec<Url>, removed: Vec<String> },
  /// Stale caches were dropped
  Activated { removed: Vec<String> },
  /// A fetch was handled (or passed through)
  Fetched(FetchOutcome),
}

/// Binds the agent's handlers to lifecycle events.
///
/// Each `dispatch` runs its handler to completion before returning, so an
/// event is only considered resolved once the handler's work has finished.
/// Install and activate change state and need exclusive access; fetches only
/// read it, so [`Dispatcher::fetch`] can be called for many requests at once.
pub struct Dispatcher<S: CacheStorage, N: Network> {
  agent: Agent<S, N>,
  state: WorkerState,
  /// Whether open pages are routed through this agent
  controlling: bool,
}

impl<S: CacheStorage, N: Network> Dispatcher<S, N> {
  /// Start a freshly deployed agent. It must be installed before it handles
  /// any fetch.
  pub fn new(agent: Agent<S, N>) -> Self {
    Self {
      agent,
      state: WorkerState::Parsed,
      controlling: false,
    }
  }

  /// Pick up an agent whose install finished in an earlier process but which
  /// has not been activated yet.
  pub fn installed(agent: Agent<S, N>) -> Self {
    Self {
      agent,
      state: WorkerState::Installed,
      controlling: false,
    }
  }

  /// Restart an agent that was installed and activated by an earlier process.
  pub fn resume(agent: Agent<S, N>) -> Self {
    Self {
      agent,
      state: WorkerState::Activated,
      controlling: true,
    }
  }

  pub fn state(&self) -> WorkerState {
    self.state
  }

  pub fn is_controlling(&self) -> bool {
    self.controlling
  }

  pub async fn dispatch(&mut self, event: Event) -> Result<Completion> {
    match event {
      Event::Install => self.install().await,
      Event::Activate => {
        let removed = self.activate()?;
        Ok(Completion::Activated { removed })
      }
      Event::Fetch(request) => Ok(Completion::Fetched(self.fetch(&request).await?)),
    }
  }

  /// Handle an intercepted request. Requests are independent of each other:
  /// a fetch that never settles holds up only its own reply.
  pub async fn fetch(&self, request: &Request) -> Result<FetchOutcome> {
    // Until activation the previous version (or the network) serves pages
    if self.state != WorkerState::Activated {
      return Ok(FetchOutcome::PassThrough);
    }
    self.agent.fetch(request).await
  }

  /// Provision, then skip the waiting phase and activate right away.
  async fn install(&mut self) -> Result<Completion> {
    if self.state != WorkerState::Parsed {
      return Err(eyre!("Cannot install agent in state {:?}", self.state));
    }

    self.state = WorkerState::Installing;
    let cached = match self.agent.install().await {
      Ok(cached) => cached,
      Err(e) => {
        warn!(error = %e, "install failed, agent is redundant");
        self.state = WorkerState::Redundant;
        return Err(e.wrap_err("Provisioning failed"));
      }
    };
    self.state = WorkerState::Installed;
    info!("installed, skipping wait");

    let removed = self.activate()?;
    Ok(Completion::Installed { cached, removed })
  }

  fn activate(&mut self) -> Result<Vec<String>> {
    if self.state != WorkerState::Installed {
      return Err(eyre!("Cannot activate agent in state {:?}", self.state));
    }

    self.state = WorkerState::Activating;
    let removed = match self.agent.activate() {
      Ok(removed) => removed,
      Err(e) => {
        self.state = WorkerState::Installed;
        return Err(e.wrap_err("Activation failed"));
      }
    };
    self.state = WorkerState::Activated;

    self.controlling = true;
    info!(cache = self.agent.config().cache_name, "activated and claimed clients");

    Ok(removed)
  }
}
