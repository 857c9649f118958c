use std::time::Duration;

use trifle_sync::config::Config;
use trifle_sync::db::{ContentStore, Repository};
use trifle_sync::error::Result;
use trifle_sync::services::{Auth, ReaderClient};
use trifle_sync::sync::SyncEngine;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging (only show warnings and errors by default)
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    // Parse command line arguments
    let args: Vec<String> = std::env::args().collect();
    let watch = args.len() >= 2 && args[1] == "--watch";
    if args.len() >= 2 && !watch && args[1] != "--refresh" {
        eprintln!("Usage: {} [--refresh | --watch]", args[0]);
        std::process::exit(2);
    }

    let config = Config::load()?;

    let repository = Repository::new(&config.db_path).await?;
    let content = ContentStore::open(&config.content_dir).await?;
    let client = ReaderClient::new(&config, Auth::from_config(&config)?)?;
    let engine = SyncEngine::new(repository.clone(), content, client, &config);

    if !watch {
        let report = engine.refresh().await?;
        println!(
            "Sync {}: {} unread items",
            if report.is_complete() { "finished" } else { "incomplete" },
            repository.unread_count().await?
        );
        return Ok(());
    }

    let period = Duration::from_secs(u64::from(config.refresh_interval_minutes.max(1)) * 60);
    let mut interval = tokio::time::interval(period);
    loop {
        interval.tick().await;
        match engine.refresh().await {
            Ok(report) => {
                let unread = repository.unread_count().await?;
                tracing::info!("Refreshed ({:?}), {} unread items", report, unread);
            }
            Err(e) => tracing::error!("Refresh failed: {}", e),
        }
    }
}
