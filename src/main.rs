use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use feedwell::config::{default_data_dir, Config};
use feedwell::feed::{convert_items, DiscoverResult};
use feedwell::storage::Database;
use feedwell::worker::{RefreshOutcome, Worker, WorkerContext};

#[derive(Parser, Debug)]
#[command(name = "feedwell", version, about = "Feed ingestion engine")]
struct Args {
    /// Configuration file (default: ~/.config/feedwell/config.toml)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Refresh periodically, sweep favicons and purge old items until Ctrl-C
    Run,
    /// Run one refresh cycle and print a summary
    Refresh,
    /// Resolve an address to a feed and print the result as JSON
    Discover { url: String },
    /// Discover a feed, store it with its current items and look up its icon
    Add { url: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let config_path = args
        .config
        .unwrap_or_else(|| default_data_dir().join("config.toml"));
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    let db = open_database(&config.database_path).await?;
    let ctx = WorkerContext::new(&config, Arc::new(db.clone()))
        .context("Failed to build HTTP client")?;
    let worker = Worker::new(ctx);

    match args.command {
        Command::Run => run(&worker, &config).await,
        Command::Refresh => refresh_once(&worker).await,
        Command::Discover { url } => {
            let result = worker.discover_feed(&url).await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(())
        }
        Command::Add { url } => add_feed(&worker, &db, &url).await,
    }
}

async fn open_database(path: &Path) -> Result<Database> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        if !dir.exists() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create {}", dir.display()))?;

            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                if let Err(e) = std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700))
                {
                    tracing::warn!(path = %dir.display(), error = %e, "Failed to restrict data directory permissions");
                }
            }
        }
    }

    let path_str = path
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("Invalid UTF-8 in database path"))?;
    Database::open(path_str)
        .await
        .with_context(|| format!("Failed to open database {}", path.display()))
}

async fn run(worker: &Arc<Worker>, config: &Config) -> Result<()> {
    worker.start_maintenance().await;
    worker.find_favicons();
    worker.set_refresh_rate(config.refresh_interval_minutes).await;
    if config.refresh_interval_minutes > 0 {
        worker.refresh_feeds().await?;
    }

    tracing::info!("Running, press Ctrl-C to stop");
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;

    worker.stop_refresh().await;
    worker.shutdown().await;
    Ok(())
}

async fn refresh_once(worker: &Worker) -> Result<()> {
    match worker.refresh_feeds().await? {
        RefreshOutcome::Started(handle) => {
            let report = handle.await.context("Refresh cycle panicked")?;
            println!(
                "Refreshed {} feeds: {} new items, {} failed",
                report.results.len(),
                report.new_items(),
                report.failures().count()
            );
            for (feed_id, error) in report.failures() {
                eprintln!("  feed {feed_id}: {error}");
            }
        }
        RefreshOutcome::AlreadyRunning => println!("A refresh is already running"),
        RefreshOutcome::NothingToRefresh => println!("No feeds to refresh"),
    }
    Ok(())
}

async fn add_feed(worker: &Worker, db: &Database, url: &str) -> Result<()> {
    let (feed_link, parsed) = match worker.discover_feed(url).await? {
        DiscoverResult::Feed { feed_link, feed } => (feed_link, feed),
        DiscoverResult::Sources { sources } => {
            println!("Several feeds found, add one of them:");
            for source in sources {
                println!("  {}  {}", source.url, source.title);
            }
            return Ok(());
        }
    };

    let title = if parsed.title.is_empty() {
        feed_link.as_str()
    } else {
        parsed.title.as_str()
    };
    let feed_id = db
        .insert_feed(title, &parsed.site_link, &feed_link)
        .await
        .context("Failed to store feed")?;
    let created = db
        .create_items(&convert_items(parsed.items, feed_id))
        .await
        .context("Failed to store items")?;
    println!("Added {title} ({created} items)");

    if let Some(feed) = db.get_feed(feed_id).await? {
        // Outcome is logged; a missing icon is not an error here
        let _ = worker.find_feed_favicon(&feed).await;
    }
    Ok(())
}
