mod agent;
mod cache;
mod config;
mod net;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use reqwest::Method;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use agent::{Agent, Completion, Dispatcher, Event, FetchOutcome};
use cache::{CacheStorage, SqliteStorage};
use config::{AgentConfig, Config};
use net::{Destination, HttpNetwork, Network, Request};

#[derive(Parser, Debug)]
#[command(name = "recipe-vault-agent")]
#[command(about = "Offline caching agent for Recipe Vault")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/recipe-vault/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Scope URL of the vault, overriding the config file
  #[arg(short, long)]
  scope: Option<String>,

  /// Write logs to $XDG_DATA_HOME/recipe-vault/agent.log instead of stderr
  #[arg(long)]
  log_file: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Cache the core assets and take over from older versions
  Install,
  /// Delete caches left behind by older versions
  Activate,
  /// Request a resource through the agent
  Fetch {
    /// Absolute URL, or a path relative to the scope
    target: String,
    /// Fetch destination of the request
    #[arg(short, long, value_enum)]
    destination: Option<Destination>,
    /// HTTP method
    #[arg(short = 'X', long, default_value = "GET")]
    method: String,
    /// Extra request header as 'Name: value' (repeatable)
    #[arg(short = 'H', long = "header")]
    headers: Vec<String>,
    /// Write the body here instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,
  },
  /// List cache stores and their entries
  Caches,
}

/// Initialize the tracing subscriber for logging
fn init_tracing(log_file: bool) -> Result<WorkerGuard> {
  // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

  let (writer, guard) = if log_file {
    let dir = config::data_dir()?;
    std::fs::create_dir_all(&dir)
      .map_err(|e| eyre!("Failed to create log directory {}: {}", dir.display(), e))?;
    tracing_appender::non_blocking(tracing_appender::rolling::never(dir, "agent.log"))
  } else {
    tracing_appender::non_blocking(std::io::stderr())
  };

  tracing_subscriber::registry()
    .with(fmt::layer().with_writer(writer).with_ansi(!log_file))
    .with(filter)
    .init();

  Ok(guard)
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _guard = init_tracing(args.log_file)?;

  // Load configuration
  let config = Config::load(args.config.as_deref())?;

  // Override scope if specified on command line
  let config = if let Some(scope) = args.scope {
    Config {
      scope: Some(scope),
      ..config
    }
  } else {
    config
  };

  let storage = Arc::new(SqliteStorage::open_file(&config.database_path()?)?);

  match args.command {
    Command::Caches => list_caches(&storage),
    Command::Install => {
      let (agent, _) = http_agent(config.agent_config()?, storage)?;
      install(agent).await
    }
    Command::Activate => {
      let (agent, _) = http_agent(config.agent_config()?, storage)?;
      activate(agent).await
    }
    Command::Fetch {
      target,
      destination,
      method,
      headers,
      output,
    } => {
      let (agent, network) = http_agent(config.agent_config()?, storage)?;
      let method = Method::from_bytes(method.to_uppercase().as_bytes())
        .map_err(|e| eyre!("Invalid method {}: {}", method, e))?;
      let url = agent.config().resolve(&target)?;
      let request = headers.iter().try_fold(
        Request::get(url)
          .with_method(method)
          .with_destination(destination.unwrap_or_default()),
        |request, line| request.with_header_line(line),
      )?;
      fetch(agent, &network, request, output).await
    }
  }
}

type HttpAgent = Agent<SqliteStorage, HttpNetwork>;

fn http_agent(config: AgentConfig, storage: Arc<SqliteStorage>) -> Result<(HttpAgent, Arc<HttpNetwork>)> {
  let network = Arc::new(HttpNetwork::new()?);
  let agent = Agent::new(config, storage, Arc::clone(&network));
  Ok((agent, network))
}

async fn install(agent: HttpAgent) -> Result<()> {
  let mut dispatcher = Dispatcher::new(agent);
  if let Completion::Installed { cached, removed } = dispatcher.dispatch(Event::Install).await? {
    for url in cached {
      println!("cached  {}", url);
    }
    for name in removed {
      println!("deleted {}", name);
    }
  }
  Ok(())
}

async fn activate(agent: HttpAgent) -> Result<()> {
  let mut dispatcher = Dispatcher::installed(agent);
  if let Completion::Activated { removed } = dispatcher.dispatch(Event::Activate).await? {
    for name in removed {
      println!("deleted {}", name);
    }
  }
  Ok(())
}

async fn fetch(
  agent: HttpAgent,
  network: &HttpNetwork,
  request: Request,
  output: Option<PathBuf>,
) -> Result<()> {
  let dispatcher = Dispatcher::resume(agent);
  let outcome = dispatcher.fetch(&request).await?;

  let (mut response, source) = match outcome {
    FetchOutcome::Respond(served) => {
      let source = match served.cached_at {
        Some(at) => format!("{}, stored {}", served.source, at.format("%Y-%m-%d %H:%M:%S")),
        None => served.source.to_string(),
      };
      (served.data, source)
    }
    // Default host handling
    FetchOutcome::PassThrough => (network.fetch(&request).await?, "pass-through".to_string()),
  };

  eprintln!(
    "{} {} [{}] ({})",
    response.status.as_u16(),
    response.url,
    response.content_type().unwrap_or("-"),
    source
  );

  let body = response.take_body()?;
  match output {
    Some(path) => std::fs::write(&path, &body)
      .map_err(|e| eyre!("Failed to write {}: {}", path.display(), e))?,
    None => std::io::stdout()
      .write_all(&body)
      .map_err(|e| eyre!("Failed to write body: {}", e))?,
  }
  Ok(())
}

fn list_caches(storage: &SqliteStorage) -> Result<()> {
  let names = storage.keys()?;
  if names.is_empty() {
    println!("no caches");
    return Ok(());
  }

  for name in names {
    let marker = if name == config::CACHE_NAME { "*" } else { " " };
    println!("{} {}", marker, name);
    for entry in storage.entries(&name)? {
      println!(
        "    {} {} ({} bytes, {})",
        entry.status,
        entry.url,
        entry.size,
        entry.stored_at.format("%Y-%m-%d %H:%M:%S")
      );
    }
  }

  Ok(())
}
