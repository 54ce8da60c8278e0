use std::sync::Arc;

use anyhow::{Context, Result};
use bidfront_sync::{start_scheduler, LeadStore, PgLeadStore, SyncConfig, SyncPipeline};
use bidfront_web::AppState;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "bidfront-cli")]
#[command(about = "Municipal bid-lead ingestion pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Sweep expired leads, then scrape and reconcile every enabled source.
    Cycle,
    /// Scrape and reconcile without sweeping.
    Scrape,
    /// Close leads whose deadline has passed.
    Sweep,
    Migrate,
    /// Run the HTTP surface, plus the scheduler when enabled.
    Serve,
}

fn init_tracing() {
    let json = std::env::var("BIDFRONT_LOG_JSON")
        .map(|v| matches!(v.as_str(), "1" | "true"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "bidfront_cli=info,bidfront_sync=info,bidfront_adapters=info,bidfront_web=info".into()),
    );

    if json {
        registry
            .with(tracing_subscriber::fmt::layer().with_target(true).json())
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer().with_target(true)).init();
    }
}

async fn connect_store(config: &SyncConfig) -> Result<PgLeadStore> {
    PgLeadStore::connect(&config.database_url)
        .await
        .context("connecting to postgres")
}

async fn build_pipeline(config: &SyncConfig) -> Result<Arc<SyncPipeline>> {
    let store: Arc<dyn LeadStore> = Arc::new(connect_store(config).await?);
    let pipeline = SyncPipeline::from_config(config, store)
        .await
        .context("building sync pipeline")?;
    Ok(Arc::new(pipeline))
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = SyncConfig::from_env();

    match cli.command.unwrap_or(Commands::Cycle) {
        Commands::Cycle => {
            let report = build_pipeline(&config).await?.run_full_cycle().await;
            println!("cycle complete: {}", report.summary_line());
        }
        Commands::Scrape => {
            let report = build_pipeline(&config).await?.run_scrape_only().await;
            println!("scrape complete: {}", report.summary_line());
        }
        Commands::Sweep => {
            let closed = build_pipeline(&config).await?.run_sweep_only().await?;
            println!("sweep complete: closed={closed}");
        }
        Commands::Migrate => {
            connect_store(&config).await?.run_migrations().await?;
            println!("migrations applied");
        }
        Commands::Serve => {
            let pipeline = build_pipeline(&config).await?;
            info!(sources = ?pipeline.source_ids(), "pipeline ready");
            let _scheduler = start_scheduler(Arc::clone(&pipeline), &config).await?;
            let state = AppState::new(pipeline, config.scraper_secret.clone());
            bidfront_web::serve(state, config.web_port).await?;
        }
    }

    Ok(())
}
