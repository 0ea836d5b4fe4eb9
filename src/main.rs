use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use dataset_indexer::config::{self, AppConfig, SearchBackendKind};
use dataset_indexer::db;
use dataset_indexer::indexer::{IndexingCoordinator, IndexerSettings, JobHandle, JobReport};
use dataset_indexer::search::{MemorySearchEngine, SearchBackend, SqliteSearchBackend};
use dataset_indexer::source::SqliteDatasetSource;

/// Keeps search collections in sync with the dataset store
#[derive(Parser, Debug)]
#[command(name = "dataset-indexer", version)]
struct Cli {
    /// Path of config.json (default: ./config.json)
    #[arg(long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Re-index every dataset
    All,
    /// Index datasets that have no collection yet
    New,
    /// Index the given dataset ids
    Ids {
        #[arg(value_name = "ID", required = true)]
        ids: Vec<i64>,
    },
    /// Keep running: index new datasets at startup and periodically
    Serve,
    /// Query the search database
    Search {
        query: String,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Show search database statistics
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "dataset_indexer=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    tracing::info!(
        "dataset-indexer {} (built {})",
        env!("CARGO_PKG_VERSION"),
        env!("BUILD_TIME")
    );

    // Load configuration / 加载配置
    let config_path = cli.config.unwrap_or_else(config::default_config_path);
    let app_config = config::load_config(&config_path)?;

    match &cli.command {
        Command::Search { query, limit } => return search(&app_config, query, *limit).await,
        Command::Status => return status(&app_config).await,
        _ => {}
    }

    // Create data directory if not exists / 创建数据目录
    let data_dir = app_config.get_data_dir();
    if !data_dir.exists() {
        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory {:?}", data_dir))?;
        tracing::info!("Created data directory: {:?}", data_dir);
    }

    let database_url = std::env::var("DATABASE_URL").unwrap_or_else(|_| app_config.get_database_url());
    let source = SqliteDatasetSource::connect(&database_url).await?;
    db::run_migrations(source.pool()).await?;

    let backend: Arc<dyn SearchBackend> = match app_config.search.backend {
        SearchBackendKind::Sqlite => Arc::new(SqliteSearchBackend::open(&app_config.get_search_db_path()).await?),
        SearchBackendKind::Memory => {
            tracing::warn!("Using the in-memory search backend, collections are lost on exit");
            Arc::new(MemorySearchEngine::new())
        }
    };

    let coordinator = IndexingCoordinator::builder()
        .source(Arc::new(source))
        .backend(backend)
        .policy(app_config.indexer.failure_policy)
        .settings(IndexerSettings::from(&app_config.indexer))
        .build()?;

    match cli.command {
        Command::All => print_report(coordinator.index_all()).await,
        Command::New => print_report(coordinator.index_new()).await,
        Command::Ids { ids } => {
            let ids: BTreeSet<i64> = ids.into_iter().collect();
            print_report(coordinator.index_by_ids(ids)).await
        }
        Command::Serve => serve(&app_config, coordinator).await,
        Command::Search { .. } | Command::Status => Ok(()),
    }
}

async fn print_report(job: JobHandle) -> anyhow::Result<()> {
    let report: JobReport = job.wait().await;
    println!("{}", serde_json::to_string_pretty(&report)?);
    if let Some(error) = report.outcome.error() {
        bail!("index job {} failed: {}", report.job_id, error);
    }
    Ok(())
}

async fn serve(app_config: &AppConfig, coordinator: IndexingCoordinator) -> anyhow::Result<()> {
    if app_config.indexer.index_new_on_startup {
        // Fire-and-forget; progress shows up in the logs
        let _ = coordinator.index_new();
    }

    let mut events = coordinator.subscribe();
    let interval = app_config.indexer.reindex_interval();
    let mut ticker = interval.map(|period| {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        ticker
    });
    if let Some(ticker) = ticker.as_mut() {
        // The first tick completes immediately
        ticker.tick().await;
    }

    tracing::info!("Indexer running, press Ctrl-C to stop");
    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result.context("Failed to listen for Ctrl-C")?;
                break;
            }
            _ = async {
                match ticker.as_mut() {
                    Some(ticker) => {
                        ticker.tick().await;
                    }
                    None => std::future::pending::<()>().await,
                }
            } => {
                if coordinator.is_indexing_running() {
                    tracing::debug!("Periodic pass queued behind a running job");
                }
                let _ = coordinator.index_new();
            }
            event = events.recv() => match event {
                Ok(event) => tracing::debug!("Job event: {:?}", event),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!("Missed {} job events", n);
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            },
        }
    }

    coordinator.shutdown();
    coordinator.wait_idle().await;
    tracing::info!("Indexer stopped, last progress: {:?}", coordinator.status());
    Ok(())
}

async fn search(app_config: &AppConfig, query: &str, limit: usize) -> anyhow::Result<()> {
    if app_config.search.backend != SearchBackendKind::Sqlite {
        bail!("search needs the sqlite search backend");
    }
    let backend = SqliteSearchBackend::open(&app_config.get_search_db_path()).await?;
    let hits = backend.search(query, limit).await?;
    println!("{}", serde_json::to_string_pretty(&hits)?);
    backend.close().await;
    Ok(())
}

async fn status(app_config: &AppConfig) -> anyhow::Result<()> {
    if app_config.search.backend != SearchBackendKind::Sqlite {
        bail!("status needs the sqlite search backend");
    }
    let backend = SqliteSearchBackend::open(&app_config.get_search_db_path()).await?;
    let stats = backend.stats().await?;
    let collections = backend.list_collections().await?;
    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "stats": stats,
            "collections": collections,
        }))?
    );
    backend.close().await;
    Ok(())
}
