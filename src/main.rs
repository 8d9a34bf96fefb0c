mod cache;
mod clock;
mod config;
mod db;
mod logging;
mod remote;
mod sync;

use cache::{
  CacheItem, CacheLayer, CacheStorage, EntityCache, EntityType, NoopStorage, SqliteStorage,
};
use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use db::{Database, DbLocation};
use remote::{CachedClient, RestClient};
use serde::Serialize;
use std::path::PathBuf;
use sync::{NewOperation, OperationKind, SyncProcessor, SyncQueue, SyncScheduler};
use tokio::sync::watch;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "ordersnapr-sync")]
#[command(about = "Offline entity cache and sync queue for OrderSnapr")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/ordersnapr/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// Offline database file (overrides cache.path); ":memory:" for a throwaway one
  #[arg(long, global = true)]
  db: Option<PathBuf>,

  /// Write logs to this file (rotated daily) instead of stderr
  #[arg(long, global = true)]
  log_file: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Show record counts and last sync time per entity type
  Stats,
  /// Print one cached record
  Get {
    #[arg(value_parser = parse_entity_type)]
    entity: EntityType,
    id: String,
  },
  /// Print every cached record of a type
  List {
    #[arg(value_parser = parse_entity_type)]
    entity: EntityType,
  },
  /// Cache a single record
  Put {
    #[arg(value_parser = parse_entity_type)]
    entity: EntityType,
    id: String,
    /// Record data as JSON
    data: String,
    /// Remote modification time (RFC 3339)
    #[arg(long)]
    last_modified: Option<String>,
  },
  /// Bulk-cache a JSON array of {id, data, lastModified?} objects
  Import {
    #[arg(value_parser = parse_entity_type)]
    entity: EntityType,
    file: PathBuf,
  },
  /// Report whether a type's cache needs refetching
  Stale {
    #[arg(value_parser = parse_entity_type)]
    entity: EntityType,
    #[arg(long)]
    max_age_secs: Option<u64>,
  },
  /// Delete cached records older than the retention window
  Prune {
    /// Entity type (all types when omitted)
    #[arg(value_parser = parse_entity_type)]
    entity: Option<EntityType>,
    #[arg(long)]
    max_age_secs: Option<u64>,
  },
  /// Remove cached records and sync metadata
  Clear {
    /// Entity type (all types when omitted)
    #[arg(value_parser = parse_entity_type)]
    entity: Option<EntityType>,
  },
  /// Fetch a type from the backend, falling back to the cache when offline
  Refresh {
    #[arg(value_parser = parse_entity_type)]
    entity: EntityType,
  },
  /// Queue a mutation for the backend
  Enqueue {
    id: String,
    #[arg(value_parser = parse_operation_kind)]
    kind: OperationKind,
    /// Operation payload as JSON
    data: String,
  },
  /// Show queued operations
  Pending,
  /// Apply queued operations to the backend
  Sync {
    /// Keep running, syncing every sync.interval_secs until Ctrl-C
    #[arg(long)]
    watch: bool,
  },
  /// Drop every queued operation
  ClearQueue,
}

fn parse_entity_type(s: &str) -> Result<EntityType, String> {
  s.parse().map_err(|e: color_eyre::Report| e.to_string())
}

fn parse_operation_kind(s: &str) -> Result<OperationKind, String> {
  s.parse().map_err(|e: color_eyre::Report| e.to_string())
}

fn parse_json(s: &str) -> Result<serde_json::Value> {
  serde_json::from_str(s).map_err(|e| eyre!("Invalid JSON: {}", e))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
  let out =
    serde_json::to_string_pretty(value).map_err(|e| eyre!("Failed to format output: {}", e))?;
  println!("{}", out);
  Ok(())
}

/// Run an extra sync pass whenever the process receives SIGHUP.
#[cfg(unix)]
fn spawn_hangup_trigger(trigger: sync::SyncTrigger) -> Result<()> {
  use tokio::signal::unix::{signal, SignalKind};

  let mut hangup =
    signal(SignalKind::hangup()).map_err(|e| eyre!("Failed to install SIGHUP handler: {}", e))?;
  tokio::spawn(async move {
    while hangup.recv().await.is_some() {
      trigger.trigger();
    }
  });
  Ok(())
}

fn seconds_or(
  secs: Option<u64>,
  default: impl FnOnce() -> Result<chrono::Duration>,
) -> Result<chrono::Duration> {
  match secs {
    Some(s) => config::duration_from_secs(s).map_err(|e| eyre!("Invalid --max-age-secs: {}", e)),
    None => default(),
  }
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _log_guard = logging::init(args.log_file.as_deref())?;

  // Load configuration
  let config = config::Config::load(args.config.as_deref())?;

  let location = match args.db {
    Some(path) if path.as_os_str() == ":memory:" => DbLocation::Memory,
    Some(path) => DbLocation::File(path),
    None => config.cache.location()?,
  };
  let db = Database::new(location);
  let queue = SyncQueue::new(db.clone()).with_max_retries(config.sync.max_retries);

  let result = if config.cache.enabled {
    let cache = EntityCache::new(SqliteStorage::new(db.clone()));
    run(args.command, &config, cache, queue).await
  } else {
    info!("entity cache disabled");
    run(args.command, &config, EntityCache::new(NoopStorage), queue).await
  };
  db.close();
  result
}

async fn run<S: CacheStorage>(
  command: Command,
  config: &config::Config,
  cache: EntityCache<S>,
  queue: SyncQueue,
) -> Result<()> {
  match command {
    Command::Stats => {
      let stats = cache.get_cache_stats();
      print_json(&serde_json::json!({
        "entities": stats,
        "pendingSync": queue.get_pending_sync_count(),
      }))?;
    }
    Command::Get { entity, id } => match cache.get_cached_entity(entity, &id) {
      Some(data) => print_json(&data)?,
      None => return Err(eyre!("No cached {} record with id {}", entity, id)),
    },
    Command::List { entity } => {
      print_json(&cache.get_all_records(entity))?;
    }
    Command::Put {
      entity,
      id,
      data,
      last_modified,
    } => {
      let data = parse_json(&data)?;
      if !cache.cache_entity(entity, &id, data, last_modified) {
        return Err(eyre!("Failed to cache {} record {}", entity, id));
      }
    }
    Command::Import { entity, file } => {
      let contents = std::fs::read_to_string(&file)
        .map_err(|e| eyre!("Failed to read {}: {}", file.display(), e))?;
      let items: Vec<CacheItem> = serde_json::from_str(&contents)
        .map_err(|e| eyre!("Failed to parse {}: {}", file.display(), e))?;
      let total = items.len();
      let written = cache.cache_entities(entity, items);
      println!("cached {}/{} {} records", written, total, entity);
    }
    Command::Stale {
      entity,
      max_age_secs,
    } => {
      let max_age = seconds_or(max_age_secs, || config.cache.stale_after())?;
      let stale = cache.is_cache_stale(entity, max_age);
      println!("{}", if stale { "stale" } else { "fresh" });
    }
    Command::Prune {
      entity,
      max_age_secs,
    } => {
      let max_age = seconds_or(max_age_secs, || config.cache.retention())?;
      let types = entity.map(|e| vec![e]).unwrap_or_else(|| EntityType::ALL.to_vec());
      for entity_type in types {
        let pruned = cache.prune_old_cache_entries(entity_type, max_age);
        println!("{}: pruned {}", entity_type, pruned);
      }
    }
    Command::Clear { entity } => {
      let cleared = match entity {
        Some(entity_type) => cache.clear_entity_cache(entity_type),
        None => cache.clear_all_caches(),
      };
      if !cleared {
        return Err(eyre!("Failed to clear cache"));
      }
    }
    Command::Refresh { entity } => {
      let client = CachedClient::new(
        RestClient::new(config)?,
        CacheLayer::new(cache).with_stale_time(config.cache.stale_after()?),
      );
      let result = client.get_entities(entity).await?;
      info!(%entity, source = %result.source, count = result.data.len(), "refresh finished");
      match result.synced_at {
        Some(at) => println!(
          "{} {} records from {} (synced {})",
          result.data.len(),
          entity,
          result.source,
          at.to_rfc3339()
        ),
        None => println!("{} {} records from {}", result.data.len(), entity, result.source),
      }
    }
    Command::Enqueue { id, kind, data } => {
      let data = parse_json(&data)?;
      if !queue.add_to_sync_queue(NewOperation::new(id.clone(), kind, data)) {
        return Err(eyre!("Failed to queue operation {}", id));
      }
      println!("queued {} ({} pending)", id, queue.get_pending_sync_count());
    }
    Command::Pending => {
      print_json(&queue.pending_operations())?;
    }
    Command::Sync { watch: keep_running } => {
      let processor = SyncProcessor::new(queue, RestClient::new(config)?);

      if keep_running {
        let scheduler = SyncScheduler::new(processor, config.sync.interval());
        let (tx, rx) = watch::channel(false);
        tokio::spawn(async move {
          if tokio::signal::ctrl_c().await.is_ok() {
            let _ = tx.send(true);
          }
        });
        #[cfg(unix)]
        spawn_hangup_trigger(scheduler.trigger_handle())?;

        let totals = scheduler.run(rx).await;
        print_json(&totals)?;
      } else {
        let report = processor.process_sync_queue().await;
        print_json(&report)?;
      }
    }
    Command::ClearQueue => {
      if !queue.clear_sync_queue() {
        return Err(eyre!("Failed to clear sync queue"));
      }
    }
  }

  Ok(())
}
