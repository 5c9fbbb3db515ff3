use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use ferry_config::{Backoff, LoadTrigger, Settings};
use ferry_orchestrator::{Dependencies, Orchestrator};
use ferry_provider::{ApiClient, HttpExportProvider, HttpKindCatalog, HttpLoadProvider};
use ferry_queue::{CloudTasksConfig, CloudTasksQueue, LocalQueue, LocalQueueConfig, TaskQueue};
use ferry_store::{InMemoryStore, SqliteStore, Store};

/// Ferry - exports document store kinds and loads them into a warehouse
#[derive(Parser)]
#[command(name = "ferry")]
#[command(version, about, long_about = None)]
struct Cli {
  /// SQLite database holding the job records
  #[arg(long, global = true, env = "FERRY_DATABASE_URL", default_value = "sqlite://ferry.db")]
  database_url: String,

  #[command(subcommand)]
  command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
  /// Serve the HTTP API
  Serve(ServeArgs),

  /// Apply database migrations and exit
  Migrate,
}

#[derive(Clone, Copy, ValueEnum)]
enum QueueKind {
  /// Deliver checks in-process; pending checks are lost on exit
  Local,
  /// Create HTTP tasks on a managed queue
  CloudTasks,
}

#[derive(Clone, Copy, ValueEnum)]
enum TriggerArg {
  ExportCompletion,
  StorageNotification,
}

impl From<TriggerArg> for LoadTrigger {
  fn from(value: TriggerArg) -> Self {
    match value {
      TriggerArg::ExportCompletion => LoadTrigger::ExportCompletion,
      TriggerArg::StorageNotification => LoadTrigger::StorageNotification,
    }
  }
}

#[derive(Args)]
struct ServeArgs {
  #[arg(long, env = "FERRY_HOST", default_value = "0.0.0.0")]
  host: IpAddr,

  #[arg(long, env = "PORT", default_value_t = 8080)]
  port: u16,

  /// Keep job records in memory instead of the database
  #[arg(long)]
  in_memory: bool,

  /// Externally reachable base URL status checks are delivered to
  #[arg(long, env = "FERRY_CALLBACK_BASE_URL")]
  callback_base_url: Option<String>,

  #[arg(long, env = "FERRY_EXPORT_BATCH_SIZE", default_value_t = 30)]
  export_batch_size: usize,

  /// Export provider calls per workflow, first attempt included
  #[arg(long, env = "FERRY_MAX_EXPORT_ATTEMPTS", default_value_t = 3)]
  max_export_attempts: u32,

  /// Fail a job after this many "still running" checks
  #[arg(long, env = "FERRY_MAX_STATUS_CHECKS")]
  max_status_checks: Option<u32>,

  #[arg(long, env = "FERRY_DEFAULT_DEST_PROJECT_ID", default_value = "")]
  default_dest_project_id: String,

  #[arg(long, env = "FERRY_DEFAULT_DEST_DATASET_ID", default_value = "datastore")]
  default_dest_dataset_id: String,

  #[arg(long, env = "FERRY_CHECK_INITIAL_DELAY_SECS", default_value_t = 30)]
  check_initial_delay_secs: u64,

  #[arg(long, env = "FERRY_CHECK_MAX_DELAY_SECS", default_value_t = 600)]
  check_max_delay_secs: u64,

  #[arg(long, env = "FERRY_CHECK_BACKOFF_MULTIPLIER", default_value_t = 2)]
  check_backoff_multiplier: u32,

  #[arg(long, env = "FERRY_LOAD_TRIGGER", value_enum, default_value = "export-completion")]
  load_trigger: TriggerArg,

  #[arg(long, env = "FERRY_DATASTORE_API_URL", default_value = "https://datastore.googleapis.com")]
  datastore_api_url: String,

  #[arg(long, env = "FERRY_BIGQUERY_API_URL", default_value = "https://bigquery.googleapis.com")]
  bigquery_api_url: String,

  /// Bearer token sent to the export, load and queue services
  #[arg(long, env = "FERRY_ACCESS_TOKEN", hide_env_values = true)]
  access_token: Option<String>,

  #[arg(long, env = "FERRY_HTTP_TIMEOUT_SECS", default_value_t = 60)]
  http_timeout_secs: u64,

  #[arg(long, env = "FERRY_QUEUE", value_enum, default_value = "local")]
  queue: QueueKind,

  /// Full queue name: projects/{project}/locations/{location}/queues/{queue}
  #[arg(long, env = "FERRY_TASKS_QUEUE")]
  tasks_queue: Option<String>,

  #[arg(long, env = "FERRY_TASKS_API_URL", default_value = "https://cloudtasks.googleapis.com")]
  tasks_api_url: String,

  /// Service account the queue signs callback OIDC tokens with
  #[arg(long, env = "FERRY_TASKS_SERVICE_ACCOUNT")]
  tasks_service_account: Option<String>,
}

impl ServeArgs {
  fn settings(&self) -> Settings {
    let callback_base_url = self
      .callback_base_url
      .clone()
      .unwrap_or_else(|| format!("http://localhost:{}", self.port));

    Settings {
      export_batch_size: self.export_batch_size,
      max_export_attempts: self.max_export_attempts,
      max_status_checks: self.max_status_checks,
      default_dest_project_id: self.default_dest_project_id.clone(),
      default_dest_dataset_id: self.default_dest_dataset_id.clone(),
      check_backoff: Backoff {
        initial_delay_ms: self.check_initial_delay_secs.saturating_mul(1_000),
        max_delay_ms: self.check_max_delay_secs.saturating_mul(1_000),
        multiplier: self.check_backoff_multiplier,
      },
      callback_base_url,
      load_trigger: self.load_trigger.into(),
    }
  }

  fn api_client(&self, base_url: &str) -> Result<ApiClient> {
    let client = ApiClient::new(base_url, Duration::from_secs(self.http_timeout_secs))
      .with_context(|| format!("failed to build client for {base_url}"))?;
    Ok(client.with_bearer_token(self.access_token.clone()))
  }
}

fn main() -> Result<()> {
  let cli = Cli::parse();

  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_env("FERRY_LOG").unwrap_or_else(|_| EnvFilter::new("info")))
    .init();

  let rt = tokio::runtime::Runtime::new()?;
  match cli.command {
    Some(Commands::Serve(args)) => rt.block_on(serve(args, cli.database_url)),
    Some(Commands::Migrate) => rt.block_on(migrate(&cli.database_url)),
    None => {
      println!("ferry - use --help to see available commands");
      Ok(())
    }
  }
}

async fn open_store(database_url: &str) -> Result<SqliteStore> {
  let store = SqliteStore::connect(database_url)
    .await
    .with_context(|| format!("failed to open database: {database_url}"))?;
  store.migrate().await.context("failed to apply migrations")?;
  Ok(store)
}

async fn migrate(database_url: &str) -> Result<()> {
  open_store(database_url).await?;
  tracing::info!(database_url, "migrations_applied");
  Ok(())
}

async fn serve(args: ServeArgs, database_url: String) -> Result<()> {
  let cancel = CancellationToken::new();
  let settings = args.settings();

  let store: Arc<dyn Store> = if args.in_memory {
    tracing::warn!("job records are kept in memory and lost on exit");
    Arc::new(InMemoryStore::new())
  } else {
    Arc::new(open_store(&database_url).await?)
  };

  let datastore = args.api_client(&args.datastore_api_url)?;
  let bigquery = args.api_client(&args.bigquery_api_url)?;

  let mut local_queue = None;
  let queue: Arc<dyn TaskQueue> = match args.queue {
    QueueKind::Local => {
      let queue = Arc::new(
        LocalQueue::new(LocalQueueConfig::default(), cancel.child_token())
          .context("failed to build local queue")?,
      );
      local_queue = Some(queue.clone());
      queue
    }
    QueueKind::CloudTasks => {
      let Some(tasks_queue) = args.tasks_queue.clone() else {
        bail!("--tasks-queue is required with --queue cloud-tasks");
      };
      let config = CloudTasksConfig {
        api_base_url: args.tasks_api_url.clone(),
        queue: tasks_queue,
        service_account_email: args.tasks_service_account.clone(),
        bearer_token: args.access_token.clone(),
        timeout: Duration::from_secs(args.http_timeout_secs),
        retry_delay: Duration::from_millis(500),
      };
      Arc::new(CloudTasksQueue::new(config).context("failed to build task queue client")?)
    }
  };

  let deps = Dependencies {
    store,
    exports: Arc::new(HttpExportProvider::new(datastore.clone())),
    kinds: Arc::new(HttpKindCatalog::new(datastore)),
    loads: Arc::new(HttpLoadProvider::new(bigquery)),
    queue,
  };
  tracing::info!(
    callback_base_url = %settings.callback_base_url,
    load_trigger = ?settings.load_trigger,
    batch_size = settings.export_batch_size,
    "orchestrator_configured"
  );
  let app = ferry_server::router(Arc::new(Orchestrator::new(deps, settings)));

  let shutdown = cancel.clone();
  tokio::spawn(async move {
    match tokio::signal::ctrl_c().await {
      Ok(()) => {
        tracing::info!("shutdown_requested");
        shutdown.cancel();
      }
      Err(e) => tracing::error!(error = %e, "failed to listen for shutdown signal"),
    }
  });

  let addr = SocketAddr::new(args.host, args.port);
  ferry_server::serve(addr, app, cancel.clone())
    .await
    .with_context(|| format!("server failed on {addr}"))?;

  if let Some(queue) = local_queue {
    tracing::info!(pending = queue.pending(), "dropping undelivered checks");
    queue.shutdown().await;
  }
  Ok(())
}
