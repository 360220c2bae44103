use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use url::Url;

/// Name of the current cache store. Bump the version suffix to invalidate
/// every store written by an older agent.
pub const CACHE_NAME: &str = "recipe-vault-cache-v2";

/// Resources that must be available offline right after install.
pub const CORE_ASSETS: &[&str] = &["./", "./index.html", "./recipes.json"];

/// Document served for navigations that are neither online nor cached.
pub const OFFLINE_FALLBACK: &str = "./index.html";

/// On-disk configuration file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
  /// Scope URL of the vault (e.g. "https://recipes.example.org/vault/")
  pub scope: Option<String>,
  /// SQLite database path (defaults to $XDG_DATA_HOME/recipe-vault/agent.db)
  pub database: Option<PathBuf>,
  #[serde(default)]
  pub image_refresh: ImageRefresh,
}

/// What an image request does when it already has a cache entry.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ImageRefresh {
  /// Fetch anyway; a successful response replaces the entry and is served
  #[default]
  RefreshOnHit,
  /// Serve the entry without touching the network
  ServeHit,
}

/// Immutable settings handed to the agent for the lifetime of the process.
#[derive(Debug, Clone)]
pub struct AgentConfig {
  pub cache_name: &'static str,
  pub core_assets: &'static [&'static str],
  pub offline_fallback: &'static str,
  pub scope: Url,
  pub image_refresh: ImageRefresh,
}

impl AgentConfig {
  pub fn new(scope: Url, image_refresh: ImageRefresh) -> Self {
    Self {
      cache_name: CACHE_NAME,
      core_assets: CORE_ASSETS,
      offline_fallback: OFFLINE_FALLBACK,
      scope,
      image_refresh,
    }
  }

  /// Resolve a path like "./index.html" against the scope URL.
  pub fn resolve(&self, path: &str) -> Result<Url> {
    self
      .scope
      .join(path)
      .map_err(|e| eyre!("Failed to resolve {} against {}: {}", path, self.scope, e))
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./recipe-vault.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/recipe-vault/config.yaml
  ///
  /// Returns an empty config when nothing is found so that `--scope` alone is
  /// enough to run.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    if let Some(p) = explicit_path {
      if !p.exists() {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
      return Self::load_from_path(p);
    }

    match Self::find_config_file() {
      Some(p) => Self::load_from_path(&p),
      None => Ok(Self::default()),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("recipe-vault.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("recipe-vault").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn parse(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    Ok(config)
  }

  /// Build the agent settings, validating the scope URL.
  pub fn agent_config(&self) -> Result<AgentConfig> {
    let raw = self.scope.as_deref().ok_or_else(|| {
      eyre!("No scope configured. Pass --scope or set `scope` in recipe-vault.yaml")
    })?;
    let scope = parse_scope(raw)?;
    Ok(AgentConfig::new(scope, self.image_refresh))
  }

  /// Get the database path, falling back to the data directory.
  pub fn database_path(&self) -> Result<PathBuf> {
    if let Some(path) = &self.database {
      return Ok(path.clone());
    }
    Ok(data_dir()?.join("agent.db"))
  }
}

/// Directory holding the database and log files.
pub fn data_dir() -> Result<PathBuf> {
  let data_dir = dirs::data_dir()
    .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
    .ok_or_else(|| eyre!("Could not determine data directory"))?;

  Ok(data_dir.join("recipe-vault"))
}

/// Parse a scope URL. A missing trailing slash is added so that relative
/// asset paths resolve inside the scope instead of next to it.
fn parse_scope(raw: &str) -> Result<Url> {
  let mut scope = Url::parse(raw.trim()).map_err(|e| eyre!("Invalid scope URL {}: {}", raw, e))?;

  match scope.scheme() {
    "http" | "https" => {}
    other => return Err(eyre!("Unsupported scope scheme: {}", other)),
  }

  if !scope.path().ends_with('/') {
    let path = format!("{}/", scope.path());
    scope.set_path(&path);
  }
  scope.set_query(None);
  scope.set_fragment(None);

  Ok(scope)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_parse_full_config() {
    let config = Config::parse(
      "scope: https://recipes.example.org/vault/\n\
       database: /tmp/agent.db\n\
       image_refresh: serve-hit\n",
    )
    .unwrap();

    assert_eq!(config.scope.as_deref(), Some("https://recipes.example.org/vault/"));
    assert_eq!(config.database, Some(PathBuf::from("/tmp/agent.db")));
    assert_eq!(config.image_refresh, ImageRefresh::ServeHit);
  }

  #[test]
  fn test_image_refresh_defaults_to_refresh_on_hit() {
    let config = Config::parse("scope: https://recipes.example.org/\n").unwrap();
    assert_eq!(config.image_refresh, ImageRefresh::RefreshOnHit);
  }

  #[test]
  fn test_agent_config_requires_scope() {
    assert!(Config::default().agent_config().is_err());
  }

  #[test]
  fn test_scope_gets_trailing_slash() {
    let scope = parse_scope("https://recipes.example.org/vault").unwrap();
    assert_eq!(scope.as_str(), "https://recipes.example.org/vault/");
  }

  #[test]
  fn test_scope_rejects_other_schemes() {
    assert!(parse_scope("ftp://recipes.example.org/").is_err());
  }

  #[test]
  fn test_core_assets_resolve_inside_scope() {
    let config = AgentConfig::new(
      Url::parse("https://recipes.example.org/vault/").unwrap(),
      ImageRefresh::default(),
    );

    let resolved: Vec<String> = config
      .core_assets
      .iter()
      .map(|p| config.resolve(p).unwrap().to_string())
      .collect();

    assert_eq!(
      resolved,
      vec![
        "https://recipes.example.org/vault/",
        "https://recipes.example.org/vault/index.html",
        "https://recipes.example.org/vault/recipes.json",
      ]
    );
  }
}
