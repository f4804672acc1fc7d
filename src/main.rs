use clap::{Parser, Subcommand, ValueEnum};
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};

use schoolsync::api::{ApiClient, CachedClient};
use schoolsync::cache::{
  CacheLayer, CacheResult, CacheStores, InvalidationEvent, Invalidator, ScheduleKey, ScheduleScope,
};
use schoolsync::config::Config;
use schoolsync::db::{Identity, KeyValueStore, SqliteKvStore};
use schoolsync::models::{NewsTab, Role};

static LOG_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();

#[derive(Parser, Debug)]
#[command(name = "schoolsync")]
#[command(about = "Inspect and drive the offline cache of the school client")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/schoolsync/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Keep storage in memory for this run only
  #[arg(long)]
  ephemeral: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Show persisted entries per namespace
  Usage,
  /// Drop cached data made stale by an application event
  Invalidate(InvalidateArgs),
  /// Fetch through the cache and report where the data came from
  Sync {
    #[command(subcommand)]
    target: SyncTarget,
  },
  /// Clear every cache and forget the signed-in identity
  Logout,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum EventKind {
  News,
  Schedule,
  Chat,
  All,
}

#[derive(clap::Args, Debug)]
struct InvalidateArgs {
  kind: EventKind,
  #[arg(long)]
  tab: Option<NewsTab>,
  #[arg(long)]
  subject: Option<String>,
  #[arg(long)]
  role: Option<Role>,
  #[arg(long)]
  user_key: Option<String>,
  #[arg(long)]
  year: Option<String>,
  #[arg(long)]
  week: Option<u32>,
  #[arg(long)]
  user: Option<String>,
  #[arg(long)]
  peer: Option<String>,
}

impl InvalidateArgs {
  fn into_event(self) -> InvalidationEvent {
    match self.kind {
      EventKind::News => InvalidationEvent::News {
        tab: self.tab,
        subject: self.subject,
      },
      EventKind::Schedule => InvalidationEvent::Schedule(ScheduleScope {
        role: self.role,
        user_key: self.user_key,
        academic_year: self.year,
        week: self.week,
      }),
      EventKind::Chat => InvalidationEvent::Chat {
        user_id: self.user,
        peer_id: self.peer,
      },
      EventKind::All => InvalidationEvent::All,
    }
  }
}

#[derive(Subcommand, Debug)]
enum SyncTarget {
  Conversations,
  Messages {
    peer: String,
  },
  News {
    #[arg(long, default_value = "feed")]
    tab: NewsTab,
    #[arg(long)]
    subject: Option<String>,
  },
  Schedule {
    #[arg(long)]
    role: Role,
    #[arg(long)]
    user_key: String,
    #[arg(long)]
    year: String,
    #[arg(long)]
    week: u32,
  },
}

fn init_logging() {
  let env_filter = || {
    tracing_subscriber::EnvFilter::try_from_default_env()
      .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
  };

  let log_file = dirs::data_dir()
    .map(|dir| dir.join("schoolsync").join("logs"))
    .ok_or_else(|| eyre!("No data directory"))
    .and_then(|dir| {
      std::fs::create_dir_all(&dir).map_err(|e| eyre!("Failed to create {}: {}", dir.display(), e))?;
      let path = dir.join("schoolsync.log");
      std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .map(|file| (path.clone(), file))
        .map_err(|e| eyre!("Failed to open {}: {}", path.display(), e))
    });

  match log_file {
    Ok((path, file)) => {
      let (non_blocking, guard) = tracing_appender::non_blocking(file);
      tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_target(false)
        .with_ansi(false)
        .with_writer(non_blocking)
        .init();
      let _ = LOG_GUARD.set(guard);
      tracing::info!(path = %path.display(), "logging initialized");
    }
    Err(e) => {
      // Keep running with stderr output
      tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
      tracing::warn!(error = %e, "failed to open log file; using stderr");
    }
  }
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;
  init_logging();

  let args = Args::parse();
  let config = Config::load(args.config.as_deref())?;
  tracing::debug!(
    base_url = %config.api.base_url,
    socket_url = %config.api.socket_url(),
    "configuration loaded"
  );

  let kv: Arc<dyn KeyValueStore> = if args.ephemeral {
    Arc::new(SqliteKvStore::open_in_memory()?)
  } else {
    Arc::new(SqliteKvStore::open(config.storage.path.as_deref())?)
  };

  if let (Some(user_id), Some(token)) = (Config::user_id_from_env(), Config::token_from_env()) {
    Identity::new(user_id, token).store(kv.as_ref())?;
  }

  let stores = Arc::new(CacheStores::new(kv.clone()));
  let mut persisted = stores.persist_events();
  let result = run(args.command, &config, kv.as_ref(), &stores).await;

  // Pending writes must land before the process exits
  stores.flush().await;
  while let Ok(event) = persisted.try_recv() {
    if let Some(error) = event.error {
      eprintln!("Failed to persist {} cache: {}", event.namespace, error);
    }
  }
  result
}

async fn run(
  command: Command,
  config: &Config,
  kv: &dyn KeyValueStore,
  stores: &Arc<CacheStores>,
) -> Result<()> {
  match command {
    Command::Usage => {
      for (namespace, count) in stores.usage_summary().await {
        println!("{:<14} {}", namespace, count);
      }
    }
    Command::Invalidate(args) => {
      let event = args.into_event();
      println!("Invalidating {:?}", event);
      Invalidator::new(stores.clone()).dispatch(event);
    }
    Command::Sync { target } => {
      let identity = Identity::load(kv)
        .ok_or_else(|| eyre!("Not signed in: set SCHOOLSYNC_USER_ID and SCHOOLSYNC_TOKEN"))?;
      let api = ApiClient::new(&config.api, identity.token.clone())?;
      let cache = CacheLayer::new().with_stale_time(config.cache.stale_after());
      let client = CachedClient::new(api, cache, stores.clone(), identity.user_id);
      sync(&client, target).await?;
    }
    Command::Logout => {
      Invalidator::new(stores.clone()).all();
      Identity::clear(kv)?;
      println!("Signed out; caches cleared");
    }
  }

  Ok(())
}

async fn sync(client: &CachedClient, target: SyncTarget) -> Result<()> {
  match target {
    SyncTarget::Conversations => report("conversations", client.conversations().await?),
    SyncTarget::Messages { peer } => report("messages", client.messages(&peer).await?),
    SyncTarget::News { tab, subject } => report("news", client.news(tab, subject.as_deref()).await?),
    SyncTarget::Schedule {
      role,
      user_key,
      year,
      week,
    } => {
      let key = ScheduleKey::new(role, user_key, year, week);
      report("schedule", client.schedule(key).await?)
    }
  }
  Ok(())
}

fn report<T>(label: &str, result: CacheResult<Vec<T>>) {
  match result.cached_at {
    Some(at) => println!(
      "{}: {} item(s) from {} (cached {})",
      label,
      result.data.len(),
      result.source,
      at.to_rfc3339()
    ),
    None => println!("{}: {} item(s) from {}", label, result.data.len(), result.source),
  }
}
