mod cache;
mod channel;
mod config;
mod db;
mod error;
mod logging;
mod net;
mod queue;
mod sync;
#[cfg(test)]
mod testing;
mod vacation;
mod worker;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use cache::{CacheStorage, FetchInterceptor};
use channel::NoticeChannel;
use config::Config;
use db::Database;
use net::{HttpFetcher, Request};
use queue::{DurableQueue, RecordId};
use sync::{ConnectivityMonitor, HttpDelivery, SyncCoordinator, SyncRegistry, SyncStrategy};
use vacation::{Vacation, VacationStore};
use worker::Worker;

#[derive(Parser, Debug)]
#[command(name = "vacay")]
#[command(about = "An offline-first vacation tracker")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/vacay/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Record a vacation (dates as YYYY-MM-DD)
  Add { start: String, end: String },
  /// Show recorded vacations, newest first
  List,
  /// Load a resource through the offline cache and print its body
  Fetch {
    /// URL or path relative to the origin
    url: String,
    /// Treat the request as a page navigation
    #[arg(long)]
    navigate: bool,
  },
  /// Warm the current cache snapshot
  Install,
  /// Delete stale cache snapshots
  Activate,
  /// Deliver queued records now
  Sync,
  /// Show queued records
  Queue {
    /// Show dead-lettered records instead
    #[arg(long)]
    dead: bool,
    /// Move a dead-lettered record back into the queue
    #[arg(long, value_name = "ID")]
    revive: Option<i64>,
  },
  /// Run the background worker until interrupted
  Run,
}

/// Everything the commands share, built once at startup.
struct Context {
  config: Config,
  db: Database,
  notices: NoticeChannel,
  fetcher: Arc<HttpFetcher>,
  strategy: SyncStrategy<HttpDelivery>,
  delivery: Option<Arc<HttpDelivery>>,
}

impl Context {
  fn new(config: Config) -> Result<Self> {
    let db_path = match &config.database {
      Some(path) => path.clone(),
      None => Database::default_path()?,
    };
    let db = Database::open(&db_path)?;

    let fetcher = Arc::new(HttpFetcher::new(config.fetch_timeout())?);
    let delivery = match &config.sync.endpoint {
      Some(endpoint) => Some(Arc::new(HttpDelivery::new(
        endpoint.clone(),
        Config::get_sync_token(),
        config.fetch_timeout(),
      )?)),
      None => None,
    };
    let strategy =
      SyncStrategy::negotiate(delivery.clone(), config.sync.deferred, &db, &config.sync.tag);
    let notices = NoticeChannel::new(&config.channel);

    Ok(Self {
      config,
      db,
      notices,
      fetcher,
      strategy,
      delivery,
    })
  }

  /// Coordinator for the queue, when submissions are queued at all.
  fn coordinator(&self) -> Option<SyncCoordinator<HttpDelivery>> {
    match (&self.strategy, &self.delivery) {
      (SyncStrategy::QueueAndSync { .. }, Some(delivery)) => Some(
        SyncCoordinator::new(
          DurableQueue::new(self.db.clone()),
          SyncRegistry::new(self.db.clone()),
          Arc::clone(delivery),
          &self.config.sync.tag,
        )
        .with_policy(self.config.retry_policy())
        .with_concurrency(self.config.sync.concurrency)
        .with_notices(self.notices.clone()),
      ),
      _ => None,
    }
  }

  fn worker(&self) -> Result<Worker<HttpFetcher, HttpDelivery>> {
    let worker = Worker::new(
      self.db.clone(),
      &self.config.snapshot_name(),
      self.config.resource_urls()?,
      Arc::clone(&self.fetcher),
      self.notices.clone(),
    );

    Ok(match self.coordinator() {
      Some(coordinator) => worker.with_coordinator(coordinator),
      None => worker,
    })
  }

  async fn interceptor(&self) -> Result<FetchInterceptor<HttpFetcher>> {
    let cache = CacheStorage::new(self.db.clone())
      .open(&self.config.snapshot_name())
      .await?;
    let mut interceptor = FetchInterceptor::new(cache, Arc::clone(&self.fetcher));

    if let Some(page) = &self.config.fallback_page {
      interceptor = interceptor.with_fallback_page(self.config.resolve(page)?);
    }
    if let Some(asset) = &self.config.offline_asset {
      interceptor = interceptor.with_offline_asset(self.config.resolve(asset)?);
    }
    Ok(interceptor)
  }
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = Config::load(args.config.as_deref())?;

  let log_dir = db::data_dir()?.join("logs");
  let _guard = logging::init(&log_dir, matches!(args.command, Command::Run))?;

  let ctx = Context::new(config)?;
  tracing::debug!(strategy = ctx.strategy.name(), "starting");

  match args.command {
    Command::Add { start, end } => add(&ctx, &start, &end).await,
    Command::List => list(&ctx).await,
    Command::Fetch { url, navigate } => fetch(&ctx, &url, navigate).await,
    Command::Install => {
      let report = ctx.worker()?.install().await?;
      println!(
        "Cached {} of {} resources in {}",
        report.stored.len(),
        report.stored.len() + report.failed.len(),
        ctx.config.snapshot_name()
      );
      for (url, error) in &report.failed {
        println!("  failed: {} ({})", url, error);
      }
      Ok(())
    }
    Command::Activate => {
      let evicted = ctx.worker()?.activate().await?;
      if evicted.is_empty() {
        println!("No stale snapshots");
      } else {
        println!("Evicted: {}", evicted.join(", "));
      }
      Ok(())
    }
    Command::Sync => {
      let coordinator = ctx
        .coordinator()
        .ok_or_else(|| eyre!("Deferred sync is not enabled (set sync.endpoint)"))?;
      let report = coordinator.drain().await?;
      println!(
        "Delivered {}, failed {}, dead-lettered {}, deferred {}",
        report.delivered, report.failed, report.dead_lettered, report.deferred
      );
      Ok(())
    }
    Command::Queue { dead, revive } => queue(&ctx, dead, revive).await,
    Command::Run => run(&ctx).await,
  }
}

async fn add(ctx: &Context, start: &str, end: &str) -> Result<()> {
  let vacation = Vacation::parse(start, end)?;
  let payload = vacation.to_payload()?;

  let vacations = VacationStore::new(ctx.db.clone()).add(vacation).await?;

  // Sync problems stay in the log; the entry is already saved locally
  let submission = ctx.strategy.submit(&payload, Some(&ctx.notices)).await?;
  tracing::info!(?submission, "vacation recorded");

  print!("{}", vacation::render(&vacations));
  Ok(())
}

async fn list(ctx: &Context) -> Result<()> {
  let vacations = VacationStore::new(ctx.db.clone()).all().await?;
  if vacations.is_empty() {
    println!("No vacations recorded yet");
  } else {
    print!("{}", vacation::render(&vacations));
  }
  Ok(())
}

async fn fetch(ctx: &Context, target: &str, navigate: bool) -> Result<()> {
  let url = ctx.config.resolve(target)?;
  let request = if navigate {
    Request::navigate(url)
  } else {
    Request::get(url)
  };

  let served = ctx.interceptor().await?.handle(&request).await?;
  tracing::info!(
    url = %request.url,
    source = ?served.source,
    status = served.response.status,
    content_type = served.response.header("content-type").unwrap_or("-"),
    "served"
  );

  let mut stdout = std::io::stdout().lock();
  stdout.write_all(&served.response.body)?;
  stdout.flush()?;
  Ok(())
}

async fn queue(ctx: &Context, dead: bool, revive: Option<i64>) -> Result<()> {
  let queue = DurableQueue::new(ctx.db.clone());

  if let Some(id) = revive {
    match queue.revive(RecordId(id)).await? {
      Some(new_id) => {
        if let Some(coordinator) = ctx.coordinator() {
          coordinator.register().await?;
        }
        println!("Record {} requeued as {}", id, new_id);
      }
      None => println!("No dead-lettered record {}", id),
    }
    return Ok(());
  }

  if dead {
    for record in queue.dead_letters().await? {
      println!(
        "{}\t{} attempts\t{}\t{}",
        record.id,
        record.attempts,
        record.last_error.as_deref().unwrap_or("-"),
        record.payload
      );
    }
    return Ok(());
  }

  println!("{} pending", queue.len().await?);
  for record in queue.list_all().await? {
    let next = record
      .next_attempt_at
      .map(|at| at.to_rfc3339())
      .unwrap_or_else(|| "now".to_string());
    println!(
      "{}\t{} attempts\tnext {}\t{}",
      record.id, record.attempts, next, record.payload
    );
  }

  let tags = SyncRegistry::new(ctx.db.clone()).tags().await?;
  if !tags.is_empty() {
    println!("registered: {}", tags.join(", "));
  }
  if let Some(coordinator) = ctx.coordinator() {
    println!("sync {}: {:?}", coordinator.tag(), coordinator.state().await?);
  }
  Ok(())
}

async fn run(ctx: &Context) -> Result<()> {
  let _logger = channel::spawn_logger(&ctx.notices);
  let worker = ctx.worker()?;

  if worker.ensure_current().await? {
    tracing::info!(snapshot = %ctx.config.snapshot_name(), "snapshot activated");
  }

  let probe_interval = Duration::from_secs(ctx.config.sync.probe_interval_secs.max(1));
  let monitor = ConnectivityMonitor::new(
    Arc::clone(&ctx.fetcher),
    ctx.config.origin()?,
    probe_interval,
  );
  let status = monitor.subscribe();
  let _monitor = monitor.spawn();

  tracing::info!(
    strategy = ctx.strategy.name(),
    channel = ctx.notices.name(),
    "worker started"
  );

  worker
    .run(status, probe_interval, async {
      let _ = tokio::signal::ctrl_c().await;
    })
    .await?;

  Ok(())
}
